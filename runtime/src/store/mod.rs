//! Deduplicating image store.
//!
//! A store is a root directory holding one subdirectory per image, each in
//! the directory transport layout (see [`dir`]). A blob is written once per
//! store: the first image to receive it owns the file, and every later
//! image that references the same digest resolves it from the owner.
//!
//! ```text
//! <root>/
//! ├── img1/          manifest.json, version, <hex>...
//! ├── team/img2/     manifest.json, version (blobs resolved from img1)
//! └── .git/          hidden, never an image
//! ```

pub mod dir;
mod destination;
mod resolve;
mod seen;
mod source;

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use crate::fs::{is_hidden, walk_files};
use dir::ImageDirectory;

pub use destination::StoreDestination;
pub use resolve::find_blob;
pub use seen::{SeenBlob, SeenIndex};
pub use source::StoreSource;

use destination::WriteSlot;

/// Hook invoked after a store destination is committed.
pub trait Committer: Send + Sync {
    fn commit(&self, message: &str) -> Result<()>;
}

impl<F> Committer for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn commit(&self, message: &str) -> Result<()> {
        self(message)
    }
}

/// Content-addressed store of many images under one root.
pub struct Storage {
    root: PathBuf,
    seen: Arc<SeenIndex>,
    current: Mutex<Option<(String, ImageDirectory)>>,
    writer: Arc<Mutex<Option<String>>>,
    verify_digests: bool,
    committer: Option<Arc<dyn Committer>>,
}

impl Storage {
    /// Open a store rooted at `root`. Nothing is created until an image
    /// is selected.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seen: Arc::new(SeenIndex::new()),
            current: Mutex::new(None),
            writer: Arc::new(Mutex::new(None)),
            verify_digests: true,
            committer: None,
        }
    }

    /// Register a hook run after every committed write session.
    pub fn with_committer(mut self, committer: impl Committer + 'static) -> Self {
        self.committer = Some(Arc::new(committer));
        self
    }

    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn seen(&self) -> &SeenIndex {
        &self.seen
    }

    /// Name of the selected image.
    pub fn current_image(&self) -> Option<String> {
        self.current.lock().as_ref().map(|(name, _)| name.clone())
    }

    /// Make `name` the current image, creating its directory if needed.
    pub fn select_image(&self, name: &str) -> Result<()> {
        if let Some(active) = self.writer.lock().as_ref() {
            return Err(TagbagError::SessionActive(active.clone()));
        }

        let path = self.image_path(name)?;
        std::fs::create_dir_all(&path).map_err(|e| {
            TagbagError::storage(&path, format!("Failed to create image directory: {}", e))
        })?;

        tracing::debug!(image = name, path = %path.display(), "Selected image");
        *self.current.lock() = Some((name.to_string(), ImageDirectory::new(path)));
        Ok(())
    }

    /// Open a write session on the current image.
    pub fn new_image_destination(&self) -> Result<StoreDestination> {
        let (name, dir) = self.selected()?;
        let slot = WriteSlot::acquire(&self.writer, &name)?;
        Ok(StoreDestination::new(
            name,
            dir,
            Arc::clone(&self.seen),
            self.verify_digests,
            slot,
            self.committer.clone(),
        ))
    }

    /// Open the current image for reading.
    pub fn new_image_source(&self) -> Result<StoreSource> {
        let (name, dir) = self.selected()?;
        Ok(StoreSource::new(
            name,
            dir,
            self.root.clone(),
            Arc::clone(&self.seen),
        ))
    }

    /// Names of every image in the store, sorted.
    ///
    /// An image is a directory below the root with no subdirectories,
    /// hidden ones included. Nothing under a hidden directory is listed;
    /// the root is never an image.
    pub fn images(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut images = Vec::new();
        collect_leaves(&self.root, &self.root, &mut images)
            .map_err(|e| TagbagError::storage(&self.root, format!("Failed to list images: {}", e)))?;
        images.sort();
        Ok(images)
    }

    /// Every non-hidden regular file in the store, keyed by path relative
    /// to the root.
    pub fn files(&self) -> Result<BTreeMap<PathBuf, Metadata>> {
        let files = walk_files(&self.root)
            .map_err(|e| TagbagError::storage(&self.root, format!("Failed to list files: {}", e)))?;

        let mut result = BTreeMap::new();
        for path in files {
            let metadata =
                std::fs::metadata(&path).map_err(|e| TagbagError::storage(&path, e))?;
            let relative = path
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or(path);
            result.insert(relative, metadata);
        }
        Ok(result)
    }

    /// Locate a blob anywhere in the store.
    pub fn find_blob(&self, digest: &Digest) -> Result<PathBuf> {
        find_blob(&self.root, &self.seen, digest)
    }

    fn selected(&self) -> Result<(String, ImageDirectory)> {
        self.current
            .lock()
            .clone()
            .ok_or(TagbagError::NoImageSelected)
    }

    fn image_path(&self, name: &str) -> Result<PathBuf> {
        let invalid = |reason: &str| TagbagError::InvalidImageName(format!("{}: {}", name, reason));

        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        let mut path = self.root.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) if !is_hidden(part) => path.push(part),
                Component::Normal(_) => return Err(invalid("hidden component")),
                _ => return Err(invalid("must be a relative path without '.' or '..'")),
            }
        }
        Ok(path)
    }
}

fn collect_leaves(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    // Hidden directories still make their parent a non-leaf.
    let mut has_subdirs = false;
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        has_subdirs = true;
        if !is_hidden(&entry.file_name()) {
            subdirs.push(entry.path());
        }
    }

    if !has_subdirs {
        if dir != root {
            if let Ok(relative) = dir.strip_prefix(root) {
                let name: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(name.join("/"));
            }
        }
        return Ok(());
    }

    for subdir in subdirs {
        collect_leaves(root, &subdir, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{BlobInfo, BlobReader, ImageDestination, ImageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn reader(data: &'static [u8]) -> BlobReader {
        Box::new(data)
    }

    async fn read_all(source: &StoreSource, info: &BlobInfo) -> Vec<u8> {
        let (mut stream, _) = source.get_blob(info).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_blob_shared_across_images() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        let info = BlobInfo::new(Digest::from_bytes(b"x"));

        storage.select_image("img1").unwrap();
        let dest = storage.new_image_destination().unwrap();
        let written = dest.put_blob(reader(b"x"), &info, false).await.unwrap();
        assert_eq!(written.size, Some(1));
        dest.commit().await.unwrap();

        storage.select_image("img2").unwrap();
        let dest = storage.new_image_destination().unwrap();
        let reused = dest.try_reusing_blob(&info).await.unwrap();
        assert!(reused.is_some());
        dest.commit().await.unwrap();

        let source = storage.new_image_source().unwrap();
        assert_eq!(read_all(&source, &info).await, b"x");

        // written exactly once, in the first image
        assert!(tmp.path().join("img1").join(info.digest.hex()).is_file());
        assert!(!tmp.path().join("img2").join(info.digest.hex()).exists());
    }

    #[tokio::test]
    async fn test_read_falls_back_to_scan_with_cold_index() {
        let tmp = TempDir::new().unwrap();
        let digest = Digest::from_bytes(b"cold");
        std::fs::create_dir_all(tmp.path().join("old")).unwrap();
        std::fs::write(tmp.path().join("old").join(digest.hex()), b"cold").unwrap();

        let storage = Storage::new(tmp.path());
        storage.select_image("new").unwrap();
        let source = storage.new_image_source().unwrap();
        assert_eq!(read_all(&source, &BlobInfo::new(digest.clone())).await, b"cold");
        assert!(storage.seen().contains(&digest));
    }

    #[tokio::test]
    async fn test_read_missing_blob() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.select_image("img").unwrap();
        let source = storage.new_image_source().unwrap();

        let err = source
            .get_blob(&BlobInfo::new(Digest::from_bytes(b"missing")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TagbagError::BlobNotFound(_)));
    }

    #[tokio::test]
    async fn test_digest_mismatch_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.select_image("img").unwrap();
        let dest = storage.new_image_destination().unwrap();

        let info = BlobInfo::new(Digest::from_bytes(b"expected"));
        let err = dest.put_blob(reader(b"actual"), &info, false).await.unwrap_err();
        assert!(matches!(err, TagbagError::DigestMismatch { .. }));
        assert!(storage.files().unwrap().is_empty());
        assert!(!storage.seen().contains(&info.digest));
    }

    #[tokio::test]
    async fn test_reuse_checks_own_directory() {
        let tmp = TempDir::new().unwrap();
        let digest = Digest::from_bytes(b"local");
        std::fs::create_dir_all(tmp.path().join("img")).unwrap();
        std::fs::write(tmp.path().join("img").join(digest.hex()), b"local").unwrap();

        let storage = Storage::new(tmp.path());
        storage.select_image("img").unwrap();
        let dest = storage.new_image_destination().unwrap();
        let reused = dest
            .try_reusing_blob(&BlobInfo::new(digest.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reused.size, Some(5));
        assert!(storage.seen().contains(&digest));
    }

    #[test]
    fn test_operations_require_selection() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        assert!(matches!(
            storage.new_image_source().err().unwrap(),
            TagbagError::NoImageSelected
        ));
        assert!(matches!(
            storage.new_image_destination().err().unwrap(),
            TagbagError::NoImageSelected
        ));
    }

    #[tokio::test]
    async fn test_select_blocked_while_writing() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.select_image("img1").unwrap();
        let dest = storage.new_image_destination().unwrap();

        let err = storage.select_image("img2").unwrap_err();
        assert!(matches!(err, TagbagError::SessionActive(ref name) if name == "img1"));
        assert!(storage.new_image_destination().is_err());

        dest.commit().await.unwrap();
        storage.select_image("img2").unwrap();
        assert_eq!(storage.current_image().as_deref(), Some("img2"));
    }

    #[test]
    fn test_abandoned_destination_releases_slot() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.select_image("img1").unwrap();
        drop(storage.new_image_destination().unwrap());
        storage.select_image("img2").unwrap();
    }

    #[test]
    fn test_invalid_image_names() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        for name in ["", "../escape", "/abs", ".hidden", "a/.git", "a/../b", "./a"] {
            let err = storage.select_image(name).unwrap_err();
            assert!(
                matches!(err, TagbagError::InvalidImageName(_)),
                "{} should be rejected",
                name
            );
        }
        assert!(storage.current_image().is_none());
    }

    #[test]
    fn test_select_fails_when_path_is_a_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("taken"), "file").unwrap();
        let storage = Storage::new(tmp.path());

        let err = storage.select_image("taken").unwrap_err();
        assert!(matches!(err, TagbagError::StorageFault { .. }));
    }

    #[test]
    fn test_images_lists_leaf_directories() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        assert!(storage.images().unwrap().is_empty());

        for name in ["a", "b/c", "b/d", "e/f/g"] {
            storage.select_image(name).unwrap();
        }
        std::fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        std::fs::create_dir_all(tmp.path().join("h/.cache")).unwrap();

        assert_eq!(
            storage.images().unwrap(),
            vec!["a", "b/c", "b/d", "e/f/g"]
        );
    }

    #[test]
    fn test_images_missing_root() {
        let storage = Storage::new("/nonexistent/tagbag/store");
        assert!(storage.images().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_relative_and_skips_hidden() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.select_image("img").unwrap();
        let dest = storage.new_image_destination().unwrap();
        let info = BlobInfo::new(Digest::from_bytes(b"data"));
        dest.put_blob(reader(b"data"), &info, false).await.unwrap();
        dest.put_manifest(b"{}", None).await.unwrap();
        dest.commit().await.unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();

        let files = storage.files().unwrap();
        let names: Vec<_> = files.keys().cloned().collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("img").join(info.digest.hex()),
                PathBuf::from("img/manifest.json"),
                PathBuf::from("img/version"),
            ]
        );
        assert_eq!(files[&PathBuf::from("img").join(info.digest.hex())].len(), 4);
    }

    #[tokio::test]
    async fn test_committer_runs_after_finalize() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let root = tmp.path().to_path_buf();
        let storage = Storage::new(tmp.path()).with_committer(move |message: &str| -> Result<()> {
            assert!(message.contains("img"));
            assert!(root.join("img/version").is_file());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        storage.select_image("img").unwrap();
        storage.new_image_destination().unwrap().commit().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_committer_failure_surfaces() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path()).with_committer(|_: &str| -> Result<()> {
            Err(TagbagError::Other("refused".to_string()))
        });

        storage.select_image("img").unwrap();
        let err = storage
            .new_image_destination()
            .unwrap()
            .commit()
            .await
            .unwrap_err();
        assert!(matches!(err, TagbagError::CommitError(_)));
        // slot released by finalization even though the hook failed
        storage.select_image("other").unwrap();
    }
}
