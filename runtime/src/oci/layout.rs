//! OCI image layouts and `oci-archive` tarballs.
//!
//! ```text
//! <layout>/
//! ├── oci-layout           {"imageLayoutVersion":"1.0.0"}
//! ├── index.json           one entry: the top-level manifest
//! └── blobs/<alg>/<hex>    configs, layers and manifests
//! ```
//!
//! An archive is the same tree as a plain tar. Destinations build the tree
//! in a work directory and tar it on commit; sources unpack it first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oci_spec::image::{
    DescriptorBuilder, ImageIndex, ImageIndexBuilder, MediaType, OciLayoutBuilder, SCHEMA_VERSION,
};
use oci_spec::OciSpecError;
use parking_lot::Mutex;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;
use tempfile::TempDir;

use super::manifest::guess_mime;
use crate::fs::write_blob_file;
use crate::tgz;
use crate::transfer::{BlobInfo, BlobReader, ImageDestination, ImageSource};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

fn blob_path(root: &Path, digest: &Digest) -> PathBuf {
    root.join("blobs")
        .join(digest.algorithm().as_str())
        .join(digest.hex())
}

#[derive(Debug, Clone)]
struct TopManifest {
    digest: Digest,
    size: u64,
    media_type: String,
}

/// Writes an image as an OCI layout directory or `oci-archive`.
pub struct OciLayoutDestination {
    root: PathBuf,
    archive: Option<PathBuf>,
    tag: Option<String>,
    verify: bool,
    top: Mutex<Option<TopManifest>>,
    _work: Option<TempDir>,
}

impl OciLayoutDestination {
    /// Write a layout directory at `dir`.
    pub fn new(dir: impl Into<PathBuf>, tag: Option<String>) -> Result<Self> {
        let root = dir.into();
        std::fs::create_dir_all(root.join("blobs"))
            .map_err(|e| TagbagError::storage(&root, format!("Failed to create layout: {}", e)))?;
        Ok(Self {
            root,
            archive: None,
            tag,
            verify: true,
            top: Mutex::new(None),
            _work: None,
        })
    }

    /// Write an `oci-archive` at `path`, staging the layout under
    /// `work_dir`.
    pub fn archive(path: impl Into<PathBuf>, tag: Option<String>, work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)
            .map_err(|e| TagbagError::storage(work_dir, format!("Failed to create work directory: {}", e)))?;
        let work = tempfile::Builder::new()
            .prefix("oci-layout-")
            .tempdir_in(work_dir)
            .map_err(|e| TagbagError::storage(work_dir, e))?;

        let mut dest = Self::new(work.path(), tag)?;
        dest.archive = Some(path.into());
        dest._work = Some(work);
        Ok(dest)
    }

    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    fn write_index(&self, top: &TopManifest) -> Result<()> {
        let spec_error = |e: OciSpecError| TagbagError::OciImageError(e.to_string());

        OciLayoutBuilder::default()
            .image_layout_version("1.0.0")
            .build()
            .map_err(spec_error)?
            .to_file(self.root.join(OCI_LAYOUT_FILE))
            .map_err(|e| TagbagError::storage(&self.root, format!("Failed to write oci-layout: {}", e)))?;

        let size = i64::try_from(top.size)
            .map_err(|_| TagbagError::OciImageError(format!("Manifest too large: {}", top.size)))?;
        let mut entry = DescriptorBuilder::default()
            .media_type(MediaType::from(top.media_type.as_str()))
            .digest(top.digest.to_string())
            .size(size);
        if let Some(tag) = &self.tag {
            entry = entry.annotations(HashMap::from([(
                REF_NAME_ANNOTATION.to_string(),
                tag.clone(),
            )]));
        }

        ImageIndexBuilder::default()
            .schema_version(SCHEMA_VERSION)
            .manifests(vec![entry.build().map_err(spec_error)?])
            .build()
            .map_err(spec_error)?
            .to_file_pretty(self.root.join(INDEX_FILE))
            .map_err(|e| TagbagError::storage(&self.root, format!("Failed to write index.json: {}", e)))
    }

    fn write_archive(&self, target: &Path) -> Result<()> {
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".tmp-archive-")
            .tempfile_in(parent)
            .map_err(|e| TagbagError::storage(parent, e))?;

        let tmp = tgz::write_tree(tmp, &self.root)?;
        tmp.persist(target)
            .map_err(|e| TagbagError::storage(target, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ImageDestination for OciLayoutDestination {
    fn reference(&self) -> String {
        match &self.archive {
            Some(path) => format!("oci-archive:{}", path.display()),
            None => format!("oci:{}", self.root.display()),
        }
    }

    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>> {
        let path = blob_path(&self.root, &info.digest);
        Ok(std::fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| BlobInfo {
                digest: info.digest.clone(),
                size: Some(m.len()),
                media_type: info.media_type.clone(),
            }))
    }

    async fn put_blob(
        &self,
        stream: BlobReader,
        info: &BlobInfo,
        _is_config: bool,
    ) -> Result<BlobInfo> {
        let dir = self.root.join("blobs").join(info.digest.algorithm().as_str());
        std::fs::create_dir_all(&dir).map_err(|e| TagbagError::storage(&dir, e))?;
        write_blob_file(&dir, stream, info, self.verify).await
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        let digest = Digest::from_bytes(manifest);
        let path = blob_path(&self.root, &digest);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TagbagError::storage(parent, e))?;
        }
        std::fs::write(&path, manifest)
            .map_err(|e| TagbagError::storage(&path, format!("Failed to write manifest: {}", e)))?;

        if instance.is_none() {
            *self.top.lock() = Some(TopManifest {
                digest,
                size: manifest.len() as u64,
                media_type: guess_mime(manifest),
            });
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let top = self.top.lock().clone().ok_or_else(|| {
            TagbagError::OciImageError(format!("{}: no manifest written", self.reference()))
        })?;
        self.write_index(&top)?;

        if let Some(archive) = &self.archive {
            self.write_archive(archive)?;
        }

        tracing::info!(destination = %self.reference(), digest = %top.digest, "Wrote OCI layout");
        Ok(())
    }
}

/// Reads an image from an OCI layout directory or `oci-archive`.
pub struct OciLayoutSource {
    root: PathBuf,
    name: String,
    manifest: Digest,
    media_type: String,
    _work: Option<TempDir>,
}

impl OciLayoutSource {
    /// Open a layout directory. With `tag`, the index entry annotated with
    /// that name is used; otherwise the first entry.
    pub fn open(dir: impl Into<PathBuf>, tag: Option<&str>) -> Result<Self> {
        let root = dir.into();
        let index_path = root.join(INDEX_FILE);
        let raw = std::fs::read(&index_path).map_err(|e| {
            TagbagError::OciImageError(format!("Failed to read {}: {}", index_path.display(), e))
        })?;
        let index: ImageIndex = serde_json::from_slice(&raw).map_err(|e| {
            TagbagError::OciImageError(format!("Failed to parse {}: {}", index_path.display(), e))
        })?;

        let descriptor = index
            .manifests()
            .iter()
            .find(|d| match tag {
                Some(tag) => {
                    let annotations: Option<&HashMap<String, String>> = d.annotations().as_ref();
                    annotations.and_then(|a| a.get(REF_NAME_ANNOTATION)).map(String::as_str)
                        == Some(tag)
                }
                None => true,
            })
            .ok_or_else(|| {
                TagbagError::OciImageError(format!(
                    "No manifest{} in {}",
                    tag.map(|t| format!(" tagged {}", t)).unwrap_or_default(),
                    root.display()
                ))
            })?;

        Ok(Self {
            name: format!("oci:{}", root.display()),
            manifest: Digest::parse(&descriptor.digest().to_string())?,
            media_type: descriptor.media_type().to_string(),
            root,
            _work: None,
        })
    }

    /// Unpack an `oci-archive` under `work_dir` and open it.
    pub fn from_archive(path: &Path, tag: Option<&str>, work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)
            .map_err(|e| TagbagError::storage(work_dir, format!("Failed to create work directory: {}", e)))?;
        let work = tempfile::Builder::new()
            .prefix("oci-archive-")
            .tempdir_in(work_dir)
            .map_err(|e| TagbagError::storage(work_dir, e))?;

        let file = std::fs::File::open(path)
            .map_err(|e| TagbagError::storage(path, format!("Failed to open archive: {}", e)))?;
        tgz::unpack(file, work.path())?;

        let mut source = Self::open(work.path(), tag)?;
        source.name = format!("oci-archive:{}", path.display());
        source._work = Some(work);
        Ok(source)
    }
}

#[async_trait]
impl ImageSource for OciLayoutSource {
    fn reference(&self) -> String {
        self.name.clone()
    }

    async fn get_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        let digest = instance.unwrap_or(&self.manifest);
        let path = blob_path(&self.root, digest);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            TagbagError::OciImageError(format!("{}: manifest {}: {}", self.name, digest, e))
        })?;
        let mime = match instance {
            Some(_) => guess_mime(&raw),
            None => self.media_type.clone(),
        };
        Ok((raw, mime))
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobReader, Option<u64>)> {
        let path = blob_path(&self.root, &info.digest);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TagbagError::BlobNotFound(info.digest.to_string()))
            }
            Err(e) => return Err(TagbagError::storage(&path, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| TagbagError::storage(&path, e))?
            .len();
        Ok((Box::new(file), Some(size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::tests::image_manifest;
    use crate::oci::manifest::OCI_MANIFEST;
    use tokio::io::AsyncReadExt;

    async fn write_image(dest: &OciLayoutDestination) -> (Digest, Digest, Vec<u8>) {
        let config = Digest::from_bytes(b"config");
        let layer = Digest::from_bytes(b"layer");
        dest.put_blob(Box::new(&b"config"[..]), &BlobInfo::new(config.clone()), true)
            .await
            .unwrap();
        dest.put_blob(Box::new(&b"layer"[..]), &BlobInfo::new(layer.clone()), false)
            .await
            .unwrap();
        let manifest = image_manifest(&config, &[&layer]);
        dest.put_manifest(&manifest, None).await.unwrap();
        dest.commit().await.unwrap();
        (config, layer, manifest)
    }

    #[tokio::test]
    async fn test_layout_directory_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dest = OciLayoutDestination::new(tmp.path().join("layout"), Some("v1".to_string())).unwrap();
        let (_, layer, manifest) = write_image(&dest).await;

        assert!(tmp.path().join("layout/oci-layout").is_file());
        let source = OciLayoutSource::open(tmp.path().join("layout"), Some("v1")).unwrap();
        let (raw, mime) = source.get_manifest(None).await.unwrap();
        assert_eq!(raw, manifest);
        assert_eq!(mime, OCI_MANIFEST);

        let (mut stream, size) = source.get_blob(&BlobInfo::new(layer)).await.unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"layer");
        assert_eq!(size, Some(5));

        assert!(OciLayoutSource::open(tmp.path().join("layout"), Some("v2")).is_err());
    }

    #[tokio::test]
    async fn test_index_written_with_ref_name() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("layout");
        let dest = OciLayoutDestination::new(&root, Some("v1".to_string())).unwrap();
        let (_, _, manifest) = write_image(&dest).await;

        let index = ImageIndex::from_file(root.join(INDEX_FILE)).unwrap();
        assert_eq!(index.schema_version(), SCHEMA_VERSION);
        assert_eq!(index.manifests().len(), 1);
        let entry = &index.manifests()[0];
        assert_eq!(entry.digest(), &Digest::from_bytes(&manifest).to_string());
        assert_eq!(entry.size(), manifest.len() as i64);
        assert_eq!(entry.media_type(), &MediaType::ImageManifest);
        assert_eq!(
            entry.annotations().as_ref().unwrap()[REF_NAME_ANNOTATION],
            "v1"
        );

        let layout = std::fs::read_to_string(root.join(OCI_LAYOUT_FILE)).unwrap();
        let layout: serde_json::Value = serde_json::from_str(&layout).unwrap();
        assert_eq!(layout["imageLayoutVersion"], "1.0.0");
    }

    #[tokio::test]
    async fn test_archive_roundtrip_and_missing_blob() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("image.tar");
        let dest = OciLayoutDestination::archive(&archive, None, &tmp.path().join("work")).unwrap();
        let (config, _, _) = write_image(&dest).await;
        assert!(archive.is_file());
        assert_eq!(dest.reference(), format!("oci-archive:{}", archive.display()));

        let source = OciLayoutSource::from_archive(&archive, None, &tmp.path().join("work")).unwrap();
        assert!(source.get_blob(&BlobInfo::new(config)).await.is_ok());

        let err = source
            .get_blob(&BlobInfo::new(Digest::from_bytes(b"elided")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TagbagError::BlobNotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_without_manifest_fails() {
        let tmp = TempDir::new().unwrap();
        let dest = OciLayoutDestination::new(tmp.path(), None).unwrap();
        assert!(dest.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_reuse_only_blobs_in_layout() {
        let tmp = TempDir::new().unwrap();
        let dest = OciLayoutDestination::new(tmp.path(), None).unwrap();
        let info = BlobInfo::new(Digest::from_bytes(b"layer"));
        assert!(dest.try_reusing_blob(&info).await.unwrap().is_none());
        dest.put_blob(Box::new(&b"layer"[..]), &info, false).await.unwrap();
        assert_eq!(dest.try_reusing_blob(&info).await.unwrap().unwrap().size, Some(5));
    }
}
