//! Cross-image blob resolution.

use std::path::{Path, PathBuf};

use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use super::seen::SeenIndex;
use crate::fs::is_hidden;
use crate::transfer::BlobInfo;

/// Locate a blob anywhere below `root`.
///
/// The seen index is consulted first; when it has no live entry the whole
/// tree is scanned for a file named by the digest's hex. A scan hit is
/// recorded in the index.
pub fn find_blob(root: &Path, seen: &SeenIndex, digest: &Digest) -> Result<PathBuf> {
    if let Some(entry) = seen.get(digest) {
        if entry.path.is_file() {
            return Ok(entry.path);
        }
    }

    tracing::debug!(digest = %digest, root = %root.display(), "Scanning store for blob");

    let path = scan(root, digest.hex())
        .map_err(|e| TagbagError::storage(root, format!("Failed to traverse store: {}", e)))?
        .ok_or_else(|| TagbagError::BlobNotFound(digest.to_string()))?;

    let size = std::fs::metadata(&path).map(|m| m.len()).ok();
    let mut info = BlobInfo::new(digest.clone());
    info.size = size;
    seen.add(info, &path);
    Ok(path)
}

fn scan(dir: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if is_hidden(&file_name) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_file() && file_name == name {
            return Ok(Some(entry.path()));
        }
        if file_type.is_dir() {
            subdirs.push(entry.path());
        }
    }
    for subdir in subdirs {
        if let Some(found) = scan(&subdir, name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
