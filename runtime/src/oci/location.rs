//! Transport-qualified image names.
//!
//! | Form                     | Location                  |
//! |--------------------------|---------------------------|
//! | `docker://ref` or `ref`  | registry                  |
//! | `oci:path[:tag]`         | OCI layout directory      |
//! | `oci-archive:path[:tag]` | OCI layout tarball        |

use std::path::{Path, PathBuf};

use tagbag_core::error::Result;

use super::layout::{OciLayoutDestination, OciLayoutSource};
use super::reference::ImageReference;
use super::registry::{RegistryDestination, RegistrySource};
use crate::transfer::{ImageDestination, ImageSource};

/// Where an image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    Registry(ImageReference),
    Layout { path: PathBuf, tag: Option<String> },
    Archive { path: PathBuf, tag: Option<String> },
}

impl ImageLocation {
    pub fn parse(name: &str) -> Result<Self> {
        if let Some(rest) = name.strip_prefix("docker://") {
            return Ok(Self::Registry(ImageReference::parse(rest)?));
        }
        if let Some(rest) = name.strip_prefix("oci-archive:") {
            let (path, tag) = split_tag(rest);
            return Ok(Self::Archive { path, tag });
        }
        if let Some(rest) = name.strip_prefix("oci:") {
            let (path, tag) = split_tag(rest);
            return Ok(Self::Layout { path, tag });
        }
        Ok(Self::Registry(ImageReference::parse(name)?))
    }

    /// Open for reading. Archives are unpacked below `work_dir`.
    pub fn source(&self, work_dir: &Path) -> Result<Box<dyn ImageSource>> {
        Ok(match self {
            Self::Registry(reference) => Box::new(RegistrySource::new(reference.clone())),
            Self::Layout { path, tag } => Box::new(OciLayoutSource::open(path, tag.as_deref())?),
            Self::Archive { path, tag } => Box::new(OciLayoutSource::from_archive(
                path,
                tag.as_deref(),
                work_dir,
            )?),
        })
    }

    /// Open for writing. Archives are staged below `work_dir`.
    pub fn destination(&self, work_dir: &Path) -> Result<Box<dyn ImageDestination>> {
        Ok(match self {
            Self::Registry(reference) => Box::new(RegistryDestination::new(reference.clone())),
            Self::Layout { path, tag } => {
                Box::new(OciLayoutDestination::new(path, tag.clone())?)
            }
            Self::Archive { path, tag } => Box::new(OciLayoutDestination::archive(
                path,
                tag.clone(),
                work_dir,
            )?),
        })
    }
}

/// `path:tag` where the tag is the part after the last colon, unless that
/// part contains a path separator.
fn split_tag(value: &str) -> (PathBuf, Option<String>) {
    match value.rsplit_once(':') {
        Some((path, tag)) if !tag.is_empty() && !tag.contains('/') && !path.is_empty() => {
            (PathBuf::from(path), Some(tag.to_string()))
        }
        _ => (PathBuf::from(value), None),
    }
}
