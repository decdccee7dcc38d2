use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use shiftbook_lib::config::AppConfig;
use shiftbook_lib::export::{create_backup, write_legacy_manifest, ExportOptions};
use shiftbook_lib::import::{load_backup, preview_restore, restore_into_store, Policy};
use shiftbook_lib::{logging, AppError, DatasetStore};

#[derive(Debug, Parser)]
#[command(name = "shiftbook", about = "Shiftbook backup and restore", version)]
struct Cli {
    /// Data directory holding dataset.json and images (overrides SHIFTBOOK_DATA_DIR).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Also write JSON logs to <data-dir>/logs.
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile a backup bundle into the local dataset.
    Restore {
        /// Path to a .zip/.shiftbackup bundle or a legacy backup.json.
        #[arg(long, value_name = "PATH")]
        bundle: PathBuf,
        #[arg(long, value_enum)]
        policy: Policy,
        /// Print the counts the restore would produce without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print what a bundle contains.
    Inspect {
        #[arg(value_name = "PATH")]
        bundle: PathBuf,
    },
    /// Write a backup bundle of the local dataset.
    Export {
        #[arg(long, value_name = "DIR", required_unless_present = "legacy")]
        out: Option<PathBuf>,
        /// Leave images out of the archive.
        #[arg(long)]
        no_images: bool,
        /// Write a bare legacy backup.json to this path instead of an archive.
        #[arg(long, value_name = "FILE", conflicts_with = "no_images")]
        legacy: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = AppConfig::from_env().context("load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let store = DatasetStore::new(&config.data_dir).with_thumbnail_edge(config.thumbnail_edge);
    let log_dir = cli.log_file.then(|| store.logs_dir());
    let _log_guard = logging::init(&config.log_filter, log_dir.as_deref())?;
    tracing::debug!(target: "shiftbook", event = "cli_started", data_dir = %config.data_dir.display());

    match cli.command {
        Commands::Restore {
            bundle,
            policy,
            dry_run,
        } => handle_restore(&store, bundle, policy, dry_run),
        Commands::Inspect { bundle } => {
            let loaded = load_backup(&bundle).map_err(|err| report_error(err.into()))?;
            print_json(&loaded.summary())?;
            Ok(0)
        }
        Commands::Export {
            out,
            no_images,
            legacy,
        } => handle_export(&store, out, no_images, legacy),
    }
}

fn handle_restore(store: &DatasetStore, bundle: PathBuf, policy: Policy, dry_run: bool) -> Result<i32> {
    if dry_run {
        let (summary, preview) =
            preview_restore(&bundle, store, policy).map_err(report_error)?;
        print_json(&json!({
            "dryRun": true,
            "policy": policy,
            "bundle": summary,
            "preview": preview,
        }))?;
        return Ok(0);
    }

    let outcome = restore_into_store(&bundle, store, policy).map_err(report_error)?;
    let warnings = outcome.result.warnings.len();
    print_json(&outcome)?;
    if warnings > 0 {
        eprintln!("Restore finished with {warnings} attachment warning(s).");
    }
    Ok(0)
}

fn handle_export(
    store: &DatasetStore,
    out: Option<PathBuf>,
    no_images: bool,
    legacy: Option<PathBuf>,
) -> Result<i32> {
    let dataset = store.load().map_err(report_error)?;
    if let Some(path) = legacy {
        write_legacy_manifest(&dataset, &path).map_err(report_error)?;
        print_json(&json!({ "path": path }))?;
        return Ok(0);
    }

    let Some(out) = out else {
        anyhow::bail!("--out is required unless --legacy is given");
    };
    let mut opts = ExportOptions::new(out);
    opts.include_images = !no_images;
    let export = create_backup(&dataset, &store.attachment_store(), &opts).map_err(report_error)?;
    print_json(&export)?;
    Ok(0)
}

fn report_error(err: AppError) -> anyhow::Error {
    tracing::error!(
        target: "shiftbook",
        event = "cli_command_failed",
        code = err.code(),
        error = %err
    );
    anyhow::anyhow!("{} ({})", err.message(), err.code())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{rendered}");
    Ok(())
}
