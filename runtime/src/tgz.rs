//! Gzip tarballs of whole directory trees.
//!
//! Entries are stored relative to the packed directory, so unpacking into
//! any other directory reproduces the tree there.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tagbag_core::error::{Result, TagbagError};

/// Pack `source` into a gzip tarball at `target`.
pub fn compress(source: &Path, target: &Path) -> Result<()> {
    let file = File::create(target)
        .map_err(|e| TagbagError::storage(target, format!("Failed to create tarball: {}", e)))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let encoder = write_tree(encoder, source)?;
    encoder
        .finish()
        .map_err(|e| TagbagError::storage(target, format!("Failed to finish gzip stream: {}", e)))?;

    tracing::debug!(source = %source.display(), target = %target.display(), "Compressed tree");
    Ok(())
}

/// Unpack the gzip tarball `source` into `target`, creating it if needed.
///
/// Files already present in `target` are overwritten.
pub fn uncompress(source: &Path, target: &Path) -> Result<()> {
    let file = File::open(source)
        .map_err(|e| TagbagError::storage(source, format!("Failed to open tarball: {}", e)))?;
    unpack(GzDecoder::new(file), target)?;

    tracing::debug!(source = %source.display(), target = %target.display(), "Uncompressed tarball");
    Ok(())
}

/// Write every entry below `root` as a tar stream into `writer` and hand
/// the writer back.
pub(crate) fn write_tree<W: Write>(writer: W, root: &Path) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    let mut entries: Vec<_> = std::fs::read_dir(root)
        .map_err(|e| TagbagError::storage(root, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| TagbagError::storage(root, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let file_type = entry.file_type().map_err(|e| TagbagError::storage(&path, e))?;
        let result = if file_type.is_dir() {
            builder.append_dir_all(&name, &path)
        } else {
            builder.append_path_with_name(&path, &name)
        };
        result.map_err(|e| TagbagError::storage(&path, format!("Failed to archive: {}", e)))?;
    }

    builder
        .into_inner()
        .map_err(|e| TagbagError::storage(root, format!("Failed to finish tar stream: {}", e)))
}

/// Unpack a tar stream into `target`.
pub(crate) fn unpack<R: Read>(reader: R, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)
        .map_err(|e| TagbagError::storage(target, format!("Failed to create directory: {}", e)))?;

    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive
        .unpack(target)
        .map_err(|e| TagbagError::storage(target, format!("Failed to unpack archive: {}", e)))
}
