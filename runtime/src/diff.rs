//! File-level difference between two expanded stores.
//!
//! Every file in the target whose base name also appears in the source is
//! deleted, restricted to digest-named blobs unless [`MatchPolicy::AnyName`]
//! is asked for. What remains is an overlay that, unpacked over the source,
//! reproduces the target.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tagbag_core::digest::is_digest_name;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::MatchPolicy;

use crate::fs::{prune_empty_dirs, walk_files};
use crate::tgz;

/// What a diff removed from the target tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Deleted files, relative to the target root
    pub removed: Vec<PathBuf>,
    /// Directories removed because they became empty
    pub pruned_dirs: usize,
}

fn eligible(name: &OsString, policy: MatchPolicy) -> bool {
    match policy {
        MatchPolicy::AnyName => true,
        MatchPolicy::DigestOnly => name.to_str().map(is_digest_name).unwrap_or(false),
    }
}

/// Delete from `target` every regular file whose base name exists under
/// `source`, then prune the directories this empties. Running it again
/// on the result removes nothing.
pub fn diff_trees(source: &Path, target: &Path, policy: MatchPolicy) -> Result<DiffReport> {
    let source_names: HashSet<OsString> = walk_files(source)
        .map_err(|e| TagbagError::storage(source, format!("Failed to traverse source: {}", e)))?
        .into_iter()
        .filter_map(|path| path.file_name().map(|n| n.to_os_string()))
        .filter(|name| eligible(name, policy))
        .collect();

    let target_files = walk_files(target)
        .map_err(|e| TagbagError::storage(target, format!("Failed to traverse target: {}", e)))?;

    let mut report = DiffReport::default();
    for path in target_files {
        let matched = path
            .file_name()
            .map(|name| source_names.contains(name))
            .unwrap_or(false);
        if !matched {
            continue;
        }

        std::fs::remove_file(&path)
            .map_err(|e| TagbagError::storage(&path, format!("Failed to remove file: {}", e)))?;
        if let Some(parent) = path.parent() {
            report.pruned_dirs += prune_empty_dirs(parent, target).map_err(|e| {
                TagbagError::storage(parent, format!("Failed to prune directory: {}", e))
            })?;
        }

        let relative = path.strip_prefix(target).map(Path::to_path_buf).unwrap_or(path);
        tracing::trace!(file = %relative.display(), "Removed from target");
        report.removed.push(relative);
    }

    report.removed.sort();
    tracing::info!(
        source = %source.display(),
        target = %target.display(),
        removed = report.removed.len(),
        pruned = report.pruned_dirs,
        "Computed tree difference"
    );
    Ok(report)
}

/// Unpack two store tarballs under `work_dir`, diff them and write the
/// remaining target tree to `output`.
pub fn diff_tarballs(
    source: &Path,
    target: &Path,
    output: &Path,
    work_dir: &Path,
    policy: MatchPolicy,
) -> Result<DiffReport> {
    std::fs::create_dir_all(work_dir)
        .map_err(|e| TagbagError::storage(work_dir, format!("Failed to create work directory: {}", e)))?;
    let work = tempfile::Builder::new()
        .prefix("diff-")
        .tempdir_in(work_dir)
        .map_err(|e| TagbagError::storage(work_dir, e))?;

    let source_dir = work.path().join("source");
    let target_dir = work.path().join("target");
    tgz::uncompress(source, &source_dir)?;
    tgz::uncompress(target, &target_dir)?;

    let report = diff_trees(&source_dir, &target_dir, policy)?;
    tgz::compress(&target_dir, output)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn remaining(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = walk_files(root)
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_keeps_only_new_names() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        for name in ["img/a", "img/b", "img/c"] {
            touch(&source, name);
        }
        for name in ["img/a", "img/b", "img/d"] {
            touch(&target, name);
        }

        let report = diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        assert_eq!(remaining(&target), vec!["img/d"]);
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.pruned_dirs, 0);
    }

    #[test]
    fn test_matches_by_base_name_across_directories() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        touch(&source, "one/blob");
        touch(&target, "two/deep/blob");
        touch(&target, "two/keep");

        diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        assert_eq!(remaining(&target), vec!["two/keep"]);
        assert!(!target.join("two/deep").exists());
    }

    #[test]
    fn test_identical_trees_empty_target() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        for name in ["x/y/1", "x/2", "z/3"] {
            touch(&source, name);
            touch(&target, name);
        }

        let report = diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        assert!(remaining(&target).is_empty());
        assert_eq!(report.pruned_dirs, 3);
        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        touch(&source, "img/a");
        touch(&target, "img/a");
        touch(&target, "img/b");

        diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        let again = diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        assert!(again.removed.is_empty());
        assert_eq!(remaining(&target), vec!["img/b"]);
    }

    #[test]
    fn test_digest_only_keeps_manifests() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        for name in [
            format!("img/{}", "a".repeat(64)),
            format!("img/{}", "b".repeat(128)),
            "img/manifest.json".to_string(),
        ] {
            touch(&source, &name);
            touch(&target, &name);
        }

        let report = diff_trees(&source, &target, MatchPolicy::default()).unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(remaining(&target), vec!["img/manifest.json"]);
    }

    #[test]
    fn test_hidden_files_untouched() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        touch(&source, ".git/HEAD");
        touch(&target, ".git/HEAD");
        touch(&target, "img/a");

        diff_trees(&source, &target, MatchPolicy::AnyName).unwrap();
        assert!(target.join(".git/HEAD").is_file());
    }

    #[test]
    fn test_diff_tarballs() {
        let tmp = TempDir::new().unwrap();
        let (source, target) = (tmp.path().join("s"), tmp.path().join("t"));
        for name in ["img/a", "img/b"] {
            touch(&source, name);
        }
        for name in ["img/a", "img2/c"] {
            touch(&target, name);
        }
        let source_tgz = tmp.path().join("s.tgz");
        let target_tgz = tmp.path().join("t.tgz");
        tgz::compress(&source, &source_tgz).unwrap();
        tgz::compress(&target, &target_tgz).unwrap();

        let output = tmp.path().join("overlay.tgz");
        let report = diff_tarballs(
            &source_tgz,
            &target_tgz,
            &output,
            &tmp.path().join("work"),
            MatchPolicy::AnyName,
        )
        .unwrap();
        assert_eq!(report.removed, vec![PathBuf::from("img/a")]);

        let unpacked = tmp.path().join("unpacked");
        tgz::uncompress(&output, &unpacked).unwrap();
        assert_eq!(remaining(&unpacked), vec!["img2/c"]);
        assert_eq!(fs::read_dir(tmp.path().join("work")).unwrap().count(), 0);
    }
}
