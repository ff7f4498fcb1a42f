//! Filesystem helpers shared by the store, the OCI layout writer and the
//! tarball diff.

use std::io::Write;
use std::path::{Path, PathBuf};

use tagbag_core::error::{Result, TagbagError};
use tokio::io::AsyncReadExt;

use crate::transfer::{BlobInfo, BlobReader};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Whether a directory entry name is reserved (hidden).
pub fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Collect every regular file below `root`, skipping hidden entries.
///
/// Symlinks are not followed.
pub fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_files_into(root, &mut files)?;
    Ok(files)
}

fn walk_files_into(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if is_hidden(&entry.file_name()) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_files_into(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

/// Remove `start` and each of its ancestors while they are empty, stopping
/// before `stop`.
pub fn prune_empty_dirs(start: &Path, stop: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        match std::fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                current = dir.parent();
                continue;
            }
            Err(e) => return Err(e),
        }
        std::fs::remove_dir(dir)?;
        removed += 1;
        current = dir.parent();
    }
    Ok(removed)
}

/// Stream a blob into `dir/<hex>` through a hidden temporary file.
///
/// The digest is computed while writing. With `verify` set, a mismatch is
/// rejected and nothing is left in `dir`.
pub async fn write_blob_file(
    dir: &Path,
    mut stream: BlobReader,
    info: &BlobInfo,
    verify: bool,
) -> Result<BlobInfo> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-blob-")
        .tempfile_in(dir)
        .map_err(|e| TagbagError::storage(dir, format!("Failed to create temp file: {}", e)))?;

    let mut hasher = info.digest.algorithm().hasher();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        tmp.write_all(&buf[..n])
            .map_err(|e| TagbagError::storage(tmp.path(), e))?;
        written += n as u64;
    }

    if verify {
        let actual = hasher.finish();
        if actual != info.digest {
            return Err(TagbagError::DigestMismatch {
                expected: info.digest.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    let target = dir.join(info.digest.hex());
    tmp.persist(&target)
        .map_err(|e| TagbagError::storage(&target, e.error))?;

    Ok(BlobInfo {
        digest: info.digest.clone(),
        size: Some(written),
        media_type: info.media_type.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tagbag_core::Digest;
    use tempfile::TempDir;

    fn reader(data: &'static [u8]) -> BlobReader {
        Box::new(data)
    }

    #[test]
    fn test_walk_files_skips_hidden() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("a/b/f1"), "1").unwrap();
        fs::write(tmp.path().join("a/f2"), "2").unwrap();
        fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(tmp.path().join("a/.hidden"), "h").unwrap();

        let mut files = walk_files(tmp.path()).unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![tmp.path().join("a/b/f1"), tmp.path().join("a/f2")]
        );
    }

    #[test]
    fn test_prune_empty_dirs_stops_at_root_and_non_empty() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("x/y/z")).unwrap();
        fs::write(tmp.path().join("x/keep"), "k").unwrap();

        let removed = prune_empty_dirs(&tmp.path().join("x/y/z"), tmp.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(!tmp.path().join("x/y").exists());
        assert!(tmp.path().join("x/keep").exists());
        assert!(tmp.path().exists());
    }

    #[test]
    fn test_prune_empty_dirs_never_removes_stop() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("only")).unwrap();
        prune_empty_dirs(&tmp.path().join("only"), tmp.path()).unwrap();
        assert!(tmp.path().exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_blob_file_verifies() {
        let tmp = TempDir::new().unwrap();
        let info = BlobInfo::new(Digest::from_bytes(b"testing"));

        let written = write_blob_file(tmp.path(), reader(b"testing"), &info, true)
            .await
            .unwrap();
        assert_eq!(written.size, Some(7));
        let stored = fs::read(tmp.path().join(info.digest.hex())).unwrap();
        assert_eq!(stored, b"testing");
    }

    #[tokio::test]
    async fn test_write_blob_file_rejects_mismatch() {
        let tmp = TempDir::new().unwrap();
        let info = BlobInfo::new(Digest::from_bytes(b"declared"));

        let err = write_blob_file(tmp.path(), reader(b"actual"), &info, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TagbagError::DigestMismatch { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_blob_file_without_verification_trusts_declared() {
        let tmp = TempDir::new().unwrap();
        let info = BlobInfo::new(Digest::from_bytes(b"declared"));

        let written = write_blob_file(tmp.path(), reader(b"actual"), &info, false)
            .await
            .unwrap();
        assert_eq!(written.digest, info.digest);
        assert!(tmp.path().join(info.digest.hex()).exists());
    }
}
