use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::bundle::BundleSummary;
use super::engine::ReconciliationResult;
use super::policy::Policy;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreReportFile<'a> {
    generated_at: String,
    policy: Policy,
    bundle: &'a BundleSummary,
    result: &'a ReconciliationResult,
}

pub fn write_restore_report(
    reports_dir: &Path,
    bundle: &BundleSummary,
    result: &ReconciliationResult,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let path = reports_dir.join(now.format("restore-%Y%m%d-%H%M%S.json").to_string());
    let payload = RestoreReportFile {
        generated_at: now.to_rfc3339(),
        policy: result.policy,
        bundle,
        result,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize restore report")?;
    fs::write(&path, json).with_context(|| format!("write restore report {}", path.display()))?;
    Ok(path)
}
