use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::parent_kind::ParentKind;
use crate::{AppError, AppResult};

/// Directory holding images inside a bundle folder.
pub const IMAGES_DIR: &str = "Images";
/// Per-parent subfolder holding thumbnails, mirroring the full image names.
pub const THUMBNAILS_DIR: &str = "Thumbnails";
pub const DEFAULT_THUMBNAIL_EDGE: u32 = 300;

pub const ERR_FILENAME_INVALID: &str = "ATTACHMENTS/FILENAME_INVALID";
pub const ERR_NAME_TOO_LONG: &str = "ATTACHMENTS/NAME_TOO_LONG";
pub const ERR_SOURCE_MISSING: &str = "ATTACHMENTS/SOURCE_MISSING";

const MAX_COMPONENT_BYTES: usize = 255;

/// File storage for image attachments, keyed by (parent kind, parent id, filename).
///
/// The store owns the thumbnail-follows-full-image invariant: every write or
/// extract leaves a thumbnail next to the image when one can be produced, and
/// every delete removes both.
pub trait AttachmentStorage {
    /// Copy one image (and its thumbnail) out of an unpacked bundle's `Images/` tree.
    fn extract(
        &self,
        images_root: &Path,
        kind: ParentKind,
        parent_id: Uuid,
        filename: &str,
    ) -> AppResult<()>;

    fn write(&self, kind: ParentKind, parent_id: Uuid, filename: &str, bytes: &[u8])
        -> AppResult<()>;

    /// Remove one image and its thumbnail. Missing files are not an error.
    fn delete(&self, kind: ParentKind, parent_id: Uuid, filename: &str) -> AppResult<()>;

    /// Remove every image stored for a parent.
    fn delete_all(&self, kind: ParentKind, parent_id: Uuid) -> AppResult<()>;

    fn exists(&self, kind: ParentKind, parent_id: Uuid, filename: &str) -> bool;

    /// Full-image filenames stored for a parent, sorted.
    fn list(&self, kind: ParentKind, parent_id: Uuid) -> AppResult<Vec<String>>;

    /// Parent ids that currently own an image folder.
    fn parents(&self, kind: ParentKind) -> AppResult<Vec<Uuid>>;
}

#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
    root: PathBuf,
    thumbnail_edge: u32,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            thumbnail_edge: DEFAULT_THUMBNAIL_EDGE,
        }
    }

    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parent_dir(&self, kind: ParentKind, parent_id: Uuid) -> PathBuf {
        parent_dir_in(&self.root, kind, parent_id)
    }

    pub fn image_path(&self, kind: ParentKind, parent_id: Uuid, filename: &str) -> AppResult<PathBuf> {
        let name = normalize_filename(filename)?;
        Ok(self.parent_dir(kind, parent_id).join(name))
    }

    pub fn thumbnail_path(
        &self,
        kind: ParentKind,
        parent_id: Uuid,
        filename: &str,
    ) -> AppResult<PathBuf> {
        let name = normalize_filename(filename)?;
        Ok(self
            .parent_dir(kind, parent_id)
            .join(THUMBNAILS_DIR)
            .join(name))
    }

    fn ensure_parent_dirs(&self, kind: ParentKind, parent_id: Uuid) -> AppResult<()> {
        let thumbs = self.parent_dir(kind, parent_id).join(THUMBNAILS_DIR);
        fs::create_dir_all(&thumbs).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "attachments_create_dir")
                .with_context("path", thumbs.display().to_string())
        })
    }

    fn refresh_thumbnail(&self, image: &Path, thumbnail: &Path) {
        if let Err(err) = generate_thumbnail(image, thumbnail, self.thumbnail_edge) {
            warn!(
                target: "shiftbook",
                event = "attachment_thumbnail_failed",
                path = %image.display(),
                error = %err
            );
        }
    }
}

impl AttachmentStorage for FsAttachmentStore {
    fn extract(
        &self,
        images_root: &Path,
        kind: ParentKind,
        parent_id: Uuid,
        filename: &str,
    ) -> AppResult<()> {
        let name = normalize_filename(filename)?;
        let source_dir = parent_dir_in(images_root, kind, parent_id);
        let source = source_dir.join(&name);
        if !source.is_file() {
            return Err(AppError::new(ERR_SOURCE_MISSING, "Image is missing from the bundle.")
                .with_context("kind", kind.as_str())
                .with_context("parent_id", parent_id.to_string())
                .with_context("filename", name));
        }

        self.ensure_parent_dirs(kind, parent_id)?;
        let dest = self.image_path(kind, parent_id, &name)?;
        let thumb_dest = self.thumbnail_path(kind, parent_id, &name)?;
        // A thumbnail of the image being replaced must not outlive it.
        remove_file_if_present(&thumb_dest)?;
        copy_file(&source, &dest)?;

        let thumb_source = source_dir.join(THUMBNAILS_DIR).join(&name);
        if thumb_source.is_file() {
            if let Err(err) = copy_file(&thumb_source, &thumb_dest) {
                warn!(
                    target: "shiftbook",
                    event = "attachment_thumbnail_copy_failed",
                    path = %thumb_source.display(),
                    error = %err
                );
                self.refresh_thumbnail(&dest, &thumb_dest);
            }
        } else {
            self.refresh_thumbnail(&dest, &thumb_dest);
        }

        debug!(
            target: "shiftbook",
            event = "attachment_extracted",
            kind = kind.as_str(),
            parent_id = %parent_id,
            filename = %name
        );
        Ok(())
    }

    fn write(
        &self,
        kind: ParentKind,
        parent_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<()> {
        self.ensure_parent_dirs(kind, parent_id)?;
        let dest = self.image_path(kind, parent_id, filename)?;
        let thumb = self.thumbnail_path(kind, parent_id, filename)?;
        remove_file_if_present(&thumb)?;
        fs::write(&dest, bytes).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "attachments_write")
                .with_context("path", dest.display().to_string())
        })?;
        self.refresh_thumbnail(&dest, &thumb);
        Ok(())
    }

    fn delete(&self, kind: ParentKind, parent_id: Uuid, filename: &str) -> AppResult<()> {
        let image = self.image_path(kind, parent_id, filename)?;
        let thumb = self.thumbnail_path(kind, parent_id, filename)?;
        remove_file_if_present(&image)?;
        remove_file_if_present(&thumb)?;
        Ok(())
    }

    fn delete_all(&self, kind: ParentKind, parent_id: Uuid) -> AppResult<()> {
        let dir = self.parent_dir(kind, parent_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::from(err)
                .with_context("operation", "attachments_delete_all")
                .with_context("path", dir.display().to_string())),
        }
    }

    fn exists(&self, kind: ParentKind, parent_id: Uuid, filename: &str) -> bool {
        self.image_path(kind, parent_id, filename)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn list(&self, kind: ParentKind, parent_id: Uuid) -> AppResult<Vec<String>> {
        let dir = self.parent_dir(kind, parent_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                AppError::new("ATTACHMENTS/WALK", err.to_string())
                    .with_context("path", dir.display().to_string())
            })?;
            if entry.file_type().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn parents(&self, kind: ParentKind) -> AppResult<Vec<Uuid>> {
        let dir = self.root.join(kind.as_str());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                AppError::new("ATTACHMENTS/WALK", err.to_string())
                    .with_context("path", dir.display().to_string())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            match Uuid::parse_str(&entry.file_name().to_string_lossy()) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(
                    target: "shiftbook",
                    event = "attachment_parent_skipped",
                    path = %entry.path().display()
                ),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

pub(crate) fn parent_dir_in(root: &Path, kind: ParentKind, parent_id: Uuid) -> PathBuf {
    root.join(kind.as_str()).join(parent_id.to_string())
}

/// Validate a stored filename and return its NFC form.
///
/// Filenames are single path components: no separators, no traversal, no
/// control characters.
pub fn normalize_filename(filename: &str) -> AppResult<String> {
    if filename.trim().is_empty() {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Attachment filename cannot be empty.",
        ));
    }
    let name = filename.nfc().collect::<String>();
    if name == "." || name == ".." || name.eq_ignore_ascii_case(THUMBNAILS_DIR) {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Attachment filename is reserved.",
        )
        .with_context("filename", name));
    }
    if name.len() > MAX_COMPONENT_BYTES {
        return Err(AppError::new(
            ERR_NAME_TOO_LONG,
            "Attachment filename is too long.",
        ));
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':' | '\0'))
    {
        return Err(AppError::new(
            ERR_FILENAME_INVALID,
            "Attachment filename contains unsupported characters.",
        )
        .with_context("filename", name));
    }
    Ok(name)
}

fn copy_file(source: &Path, dest: &Path) -> AppResult<()> {
    fs::copy(source, dest).map(|_| ()).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "attachments_copy")
            .with_context("source", source.display().to_string())
            .with_context("path", dest.display().to_string())
    })
}

fn remove_file_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::from(err)
            .with_context("operation", "attachments_delete")
            .with_context("path", path.display().to_string())),
    }
}

fn generate_thumbnail(image: &Path, thumbnail: &Path, edge: u32) -> anyhow::Result<()> {
    let decoded = image::open(image)?;
    let thumb = decoded.thumbnail(edge, edge);
    // JPEG cannot carry alpha.
    DynamicImage::ImageRgb8(thumb.to_rgb8()).save(thumbnail)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn write_creates_image_and_thumbnail() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path()).with_thumbnail_edge(16);
        let parent = Uuid::new_v4();

        let staging = TempDir::new().unwrap();
        let png = staging.path().join("pump.png");
        write_png(&png, 64, 32);
        let bytes = fs::read(&png).unwrap();

        store
            .write(ParentKind::Shifts, parent, "pump.png", &bytes)
            .unwrap();
        assert!(store.exists(ParentKind::Shifts, parent, "pump.png"));
        let thumb = store
            .thumbnail_path(ParentKind::Shifts, parent, "pump.png")
            .unwrap();
        let decoded = image::open(&thumb).unwrap();
        assert!(decoded.width() <= 16 && decoded.height() <= 16);
    }

    #[test]
    fn undecodable_bytes_still_store_the_image() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path());
        let parent = Uuid::new_v4();
        store
            .write(ParentKind::Expenses, parent, "receipt.jpg", b"not an image")
            .unwrap();
        assert!(store.exists(ParentKind::Expenses, parent, "receipt.jpg"));
        let thumb = store
            .thumbnail_path(ParentKind::Expenses, parent, "receipt.jpg")
            .unwrap();
        assert!(!thumb.exists());
    }

    #[test]
    fn extract_copies_bundle_thumbnail_when_present() {
        let bundle = TempDir::new().unwrap();
        let parent = Uuid::new_v4();
        let src_dir = parent_dir_in(bundle.path(), ParentKind::Shifts, parent);
        fs::create_dir_all(src_dir.join(THUMBNAILS_DIR)).unwrap();
        fs::write(src_dir.join("odo.jpg"), b"full").unwrap();
        fs::write(src_dir.join(THUMBNAILS_DIR).join("odo.jpg"), b"thumb").unwrap();

        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path());
        store
            .extract(bundle.path(), ParentKind::Shifts, parent, "odo.jpg")
            .unwrap();

        let image = store.image_path(ParentKind::Shifts, parent, "odo.jpg").unwrap();
        let thumb = store
            .thumbnail_path(ParentKind::Shifts, parent, "odo.jpg")
            .unwrap();
        assert_eq!(fs::read(image).unwrap(), b"full");
        assert_eq!(fs::read(thumb).unwrap(), b"thumb");
    }

    #[test]
    fn extract_over_existing_image_drops_its_old_thumbnail() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path()).with_thumbnail_edge(16);
        let parent = Uuid::new_v4();
        let staging = TempDir::new().unwrap();
        let png = staging.path().join("a.png");
        write_png(&png, 40, 40);
        store
            .write(ParentKind::Shifts, parent, "a.png", &fs::read(&png).unwrap())
            .unwrap();
        let thumb = store.thumbnail_path(ParentKind::Shifts, parent, "a.png").unwrap();
        assert!(thumb.is_file());

        let bundle = TempDir::new().unwrap();
        let src_dir = parent_dir_in(bundle.path(), ParentKind::Shifts, parent);
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("a.png"), b"replaced-not-an-image").unwrap();

        store
            .extract(bundle.path(), ParentKind::Shifts, parent, "a.png")
            .unwrap();
        let image = store.image_path(ParentKind::Shifts, parent, "a.png").unwrap();
        assert_eq!(fs::read(image).unwrap(), b"replaced-not-an-image");
        assert!(!thumb.exists());
    }

    #[test]
    fn rewrite_with_undecodable_bytes_drops_old_thumbnail() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path()).with_thumbnail_edge(16);
        let parent = Uuid::new_v4();
        let staging = TempDir::new().unwrap();
        let png = staging.path().join("b.png");
        write_png(&png, 40, 40);
        store
            .write(ParentKind::Expenses, parent, "b.png", &fs::read(&png).unwrap())
            .unwrap();
        let thumb = store.thumbnail_path(ParentKind::Expenses, parent, "b.png").unwrap();
        assert!(thumb.is_file());

        store
            .write(ParentKind::Expenses, parent, "b.png", b"garbage")
            .unwrap();
        assert!(!thumb.exists());
    }

    #[test]
    fn extract_reports_missing_source() {
        let bundle = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path());
        let err = store
            .extract(bundle.path(), ParentKind::Shifts, Uuid::new_v4(), "gone.jpg")
            .unwrap_err();
        assert_eq!(err.code(), ERR_SOURCE_MISSING);
    }

    #[test]
    fn delete_removes_image_and_thumbnail() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path());
        let parent = Uuid::new_v4();
        store
            .write(ParentKind::Shifts, parent, "a.jpg", b"bytes")
            .unwrap();
        let thumb = store.thumbnail_path(ParentKind::Shifts, parent, "a.jpg").unwrap();
        fs::write(&thumb, b"thumb").unwrap();

        store.delete(ParentKind::Shifts, parent, "a.jpg").unwrap();
        assert!(!store.exists(ParentKind::Shifts, parent, "a.jpg"));
        assert!(!thumb.exists());
        store.delete(ParentKind::Shifts, parent, "a.jpg").unwrap();
    }

    #[test]
    fn list_and_parents_enumerate_store() {
        let dir = TempDir::new().unwrap();
        let store = FsAttachmentStore::new(dir.path());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.write(ParentKind::Shifts, first, "b.jpg", b"1").unwrap();
        store.write(ParentKind::Shifts, first, "a.jpg", b"2").unwrap();
        store.write(ParentKind::Shifts, second, "c.jpg", b"3").unwrap();
        fs::create_dir_all(dir.path().join("shifts").join("not-a-uuid")).unwrap();

        assert_eq!(
            store.list(ParentKind::Shifts, first).unwrap(),
            vec!["a.jpg".to_string(), "b.jpg".to_string()]
        );
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(store.parents(ParentKind::Shifts).unwrap(), expected);
        assert!(store.parents(ParentKind::Expenses).unwrap().is_empty());

        store.delete_all(ParentKind::Shifts, first).unwrap();
        assert!(store.list(ParentKind::Shifts, first).unwrap().is_empty());
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for bad in ["", "..", "../escape.jpg", "nested/file.jpg", "back\\slash.jpg", "Thumbnails"] {
            assert!(normalize_filename(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(normalize_filename("re\u{301}ceipt.jpg").unwrap(), "réceipt.jpg");
    }
}
