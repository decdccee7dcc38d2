use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::attachments::IMAGES_DIR;
use crate::export::manifest::{BackupManifest, MANIFEST_NAME};

const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const EMPTY_ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];
const SNIFF_BYTES: u64 = 512;
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "shiftbackup"];
const LEGACY_EXTENSIONS: &[&str] = &["json"];
const IGNORED_ENTRIES: &[&str] = &["__MACOSX", ".DS_Store"];

#[derive(Debug, Error)]
pub enum BundleLoadError {
    #[error("backup archive is corrupt: {0}")]
    CorruptArchive(String),
    #[error("backup.json not found in bundle")]
    ManifestMissing,
    #[error("backup.json is malformed: {0}")]
    ManifestMalformed(String),
    #[error("failed to read bundle {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("not enough disk space to unpack bundle (need {required} bytes, {available} available)")]
    InsufficientSpace { required: u64, available: u64 },
}

impl BundleLoadError {
    pub fn code(&self) -> &'static str {
        match self {
            BundleLoadError::CorruptArchive(_) => "BUNDLE/CORRUPT_ARCHIVE",
            BundleLoadError::ManifestMissing => "BUNDLE/MANIFEST_MISSING",
            BundleLoadError::ManifestMalformed(_) => "BUNDLE/MANIFEST_MALFORMED",
            BundleLoadError::Io { .. } => "BUNDLE/IO",
            BundleLoadError::InsufficientSpace { .. } => "BUNDLE/LOW_DISK",
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        BundleLoadError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleFormat {
    /// Zip archive with a top-level folder, `backup.json` and optional `Images/`.
    Archive,
    /// Bare `backup.json` without images.
    Legacy,
}

/// A decoded backup, ready to be restored.
///
/// Archive bundles are unpacked into a temporary directory owned by this
/// value; the directory is removed on drop.
#[derive(Debug)]
pub struct LoadedBundle {
    source: PathBuf,
    format: BundleFormat,
    manifest: BackupManifest,
    images_root: Option<PathBuf>,
    _workdir: Option<TempDir>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub source: String,
    pub format: BundleFormat,
    pub app_version: String,
    pub export_date: DateTime<Utc>,
    pub shifts: usize,
    pub expenses: usize,
    pub transactions: Option<usize>,
    pub bank_transfers: usize,
    pub statement_periods: Vec<String>,
    pub image_attachments: usize,
    pub has_images: bool,
}

/// Load a bundle from disk, detecting archive vs legacy format.
pub fn load_backup(path: impl AsRef<Path>) -> Result<LoadedBundle, BundleLoadError> {
    LoadedBundle::load(path)
}

impl LoadedBundle {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BundleLoadError> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let bundle = match format {
            BundleFormat::Archive => load_archive(path)?,
            BundleFormat::Legacy => load_legacy(path)?,
        };
        note_app_version(&bundle.manifest.app_version);
        info!(
            target: "shiftbook",
            event = "bundle_loaded",
            format = ?bundle.format,
            app_version = %bundle.manifest.app_version,
            shifts = bundle.manifest.shifts.len(),
            expenses = bundle.manifest.expenses.len(),
            transactions = bundle.manifest.transactions.as_ref().map(Vec::len),
            has_images = bundle.images_root.is_some()
        );
        Ok(bundle)
    }

    /// Wrap an already decoded manifest that carries no image tree.
    pub fn from_manifest(manifest: BackupManifest) -> Self {
        Self {
            source: PathBuf::new(),
            format: BundleFormat::Legacy,
            manifest,
            images_root: None,
            _workdir: None,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn format(&self) -> BundleFormat {
        self.format
    }

    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    /// Root of the unpacked `Images/` tree, if the bundle carried one.
    pub fn images_root(&self) -> Option<&Path> {
        self.images_root.as_deref()
    }

    pub fn summary(&self) -> BundleSummary {
        let manifest = &self.manifest;
        let statement_periods = manifest
            .transactions
            .iter()
            .flatten()
            .map(|tx| tx.statement_period.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        BundleSummary {
            source: self.source.display().to_string(),
            format: self.format,
            app_version: manifest.app_version.clone(),
            export_date: manifest.export_date,
            shifts: manifest.shifts.len(),
            expenses: manifest.expenses.len(),
            transactions: manifest.transactions.as_ref().map(Vec::len),
            bank_transfers: manifest
                .transactions
                .iter()
                .flatten()
                .filter(|tx| tx.is_bank_transfer())
                .count(),
            statement_periods,
            image_attachments: manifest.image_count(),
            has_images: self.images_root.is_some(),
        }
    }
}

fn detect_format(path: &Path) -> Result<BundleFormat, BundleLoadError> {
    let file = File::open(path).map_err(|err| BundleLoadError::io(path, err))?;
    let mut head = Vec::new();
    file.take(SNIFF_BYTES)
        .read_to_end(&mut head)
        .map_err(|err| BundleLoadError::io(path, err))?;

    if head.starts_with(&ZIP_MAGIC) || head.starts_with(&EMPTY_ZIP_MAGIC) {
        return Ok(BundleFormat::Archive);
    }
    let text = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&head);
    if text
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{')
    {
        return Ok(BundleFormat::Legacy);
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ARCHIVE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(BundleFormat::Archive)
    } else if LEGACY_EXTENSIONS.contains(&extension.as_str()) {
        Ok(BundleFormat::Legacy)
    } else {
        Err(BundleLoadError::CorruptArchive(format!(
            "unrecognised bundle format: {}",
            path.display()
        )))
    }
}

fn load_legacy(path: &Path) -> Result<LoadedBundle, BundleLoadError> {
    let manifest = parse_manifest(path)?;
    Ok(LoadedBundle {
        source: path.to_path_buf(),
        format: BundleFormat::Legacy,
        manifest,
        images_root: None,
        _workdir: None,
    })
}

fn load_archive(path: &Path) -> Result<LoadedBundle, BundleLoadError> {
    let file = File::open(path).map_err(|err| BundleLoadError::io(path, err))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| BundleLoadError::CorruptArchive(err.to_string()))?;

    let workdir = tempfile::Builder::new()
        .prefix("shiftbook-restore-")
        .tempdir()
        .map_err(|err| BundleLoadError::io(path, err))?;

    let required = unpacked_size(&mut archive)?;
    let available = fs2::available_space(workdir.path())
        .map_err(|err| BundleLoadError::io(workdir.path(), err))?;
    if available < required {
        return Err(BundleLoadError::InsufficientSpace {
            required,
            available,
        });
    }

    unpack(&mut archive, workdir.path())?;

    let folder = locate_bundle_folder(workdir.path())?;
    let manifest_path = folder.join(MANIFEST_NAME);
    if !manifest_path.is_file() {
        return Err(BundleLoadError::ManifestMissing);
    }
    let manifest = parse_manifest(&manifest_path)?;

    let images = folder.join(IMAGES_DIR);
    let images_root = images.is_dir().then_some(images);

    Ok(LoadedBundle {
        source: path.to_path_buf(),
        format: BundleFormat::Archive,
        manifest,
        images_root,
        _workdir: Some(workdir),
    })
}

fn unpacked_size(archive: &mut ZipArchive<File>) -> Result<u64, BundleLoadError> {
    let mut total = 0_u64;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| BundleLoadError::CorruptArchive(err.to_string()))?;
        total = total.saturating_add(entry.size());
    }
    Ok(total)
}

fn unpack(archive: &mut ZipArchive<File>, dest: &Path) -> Result<(), BundleLoadError> {
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| BundleLoadError::CorruptArchive(err.to_string()))?;
        let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            BundleLoadError::CorruptArchive(format!(
                "entry escapes archive root: {}",
                entry.name()
            ))
        })?;
        if is_ignored(&relative) {
            debug!(
                target: "shiftbook",
                event = "bundle_entry_ignored",
                entry = %relative.display()
            );
            continue;
        }

        let out = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|err| BundleLoadError::io(&out, err))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|err| BundleLoadError::io(parent, err))?;
        }
        let mut target = File::create(&out).map_err(|err| BundleLoadError::io(&out, err))?;
        io::copy(&mut entry, &mut target).map_err(|err| {
            BundleLoadError::CorruptArchive(format!("{}: {err}", relative.display()))
        })?;
    }
    Ok(())
}

fn is_ignored(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            IGNORED_ENTRIES.contains(&name.as_ref()) || name.starts_with("._")
        }
        _ => false,
    })
}

/// Find the folder holding `backup.json`: the archive root itself, its single
/// top-level folder, or the one top-level folder that contains a manifest.
fn locate_bundle_folder(root: &Path) -> Result<PathBuf, BundleLoadError> {
    if root.join(MANIFEST_NAME).is_file() {
        return Ok(root.to_path_buf());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| BundleLoadError::io(root, err))? {
        let entry = entry.map_err(|err| BundleLoadError::io(root, err))?;
        let path = entry.path();
        if path.is_dir() && !is_ignored(Path::new(&entry.file_name())) {
            dirs.push(path);
        }
    }
    if dirs.len() == 1 {
        return Ok(dirs.remove(0));
    }
    dirs.into_iter()
        .find(|dir| dir.join(MANIFEST_NAME).is_file())
        .ok_or(BundleLoadError::ManifestMissing)
}

fn parse_manifest(path: &Path) -> Result<BackupManifest, BundleLoadError> {
    let bytes = fs::read(path).map_err(|err| BundleLoadError::io(path, err))?;
    let text = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    serde_json::from_slice(text).map_err(|err| BundleLoadError::ManifestMalformed(err.to_string()))
}

/// Record the bundle's app version. Bundles are never rejected on version.
fn note_app_version(raw: &str) {
    let current = Version::parse(env!("CARGO_PKG_VERSION")).ok();
    match (lenient_version(raw), current) {
        (Some(bundle), Some(current)) if bundle > current => warn!(
            target: "shiftbook",
            event = "bundle_from_newer_app",
            bundle_version = %bundle,
            app_version = %current
        ),
        (Some(_), _) => {}
        (None, _) => debug!(
            target: "shiftbook",
            event = "bundle_version_unparsed",
            app_version = raw
        ),
    }
}

/// Parse "2", "2.1" and "2.1.3" style versions.
fn lenient_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return None;
    }
    let padded = match trimmed.matches('.').count() {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).ok()
}
