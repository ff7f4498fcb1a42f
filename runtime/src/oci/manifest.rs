//! Manifest and manifest list parsing.
//!
//! OCI and Docker schema 2 documents share the fields needed here, so both
//! are decoded through the `oci-spec` types.

use oci_spec::image::{Descriptor, ImageIndex, ImageManifest};
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use crate::transfer::BlobInfo;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media types requested from registries.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] =
    &[OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// Whether a MIME type names a manifest list.
pub fn is_manifest_list(mime: &str) -> bool {
    mime == OCI_INDEX || mime == DOCKER_MANIFEST_LIST
}

/// Guess the MIME type of a manifest from its content.
///
/// Uses the embedded `mediaType` when present, otherwise the presence of a
/// `manifests` array.
pub fn guess_mime(raw: &[u8]) -> String {
    let value: serde_json::Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(_) => return OCI_MANIFEST.to_string(),
    };
    if let Some(media_type) = value.get("mediaType").and_then(|m| m.as_str()) {
        return media_type.to_string();
    }
    if value.get("manifests").is_some() {
        OCI_INDEX.to_string()
    } else {
        OCI_MANIFEST.to_string()
    }
}

/// Blobs referenced by a single-image manifest.
#[derive(Debug, Clone)]
pub struct ImageBlobs {
    pub config: BlobInfo,
    /// Layers, bottom to top
    pub layers: Vec<BlobInfo>,
}

impl ImageBlobs {
    /// Config first, then layers.
    pub fn all(&self) -> impl Iterator<Item = &BlobInfo> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// One entry of a manifest list.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub digest: Digest,
    pub media_type: String,
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub variant: Option<String>,
}

/// A decoded manifest.
#[derive(Debug, Clone)]
pub enum ParsedManifest {
    Image(ImageBlobs),
    List(Vec<ListEntry>),
}

impl ParsedManifest {
    /// Decode `raw` according to `mime`.
    pub fn parse(raw: &[u8], mime: &str) -> Result<Self> {
        if is_manifest_list(mime) {
            let index: ImageIndex = serde_json::from_slice(raw).map_err(|e| {
                TagbagError::OciImageError(format!("Failed to parse manifest list: {}", e))
            })?;
            let entries = index
                .manifests()
                .iter()
                .map(list_entry)
                .collect::<Result<Vec<_>>>()?;
            Ok(ParsedManifest::List(entries))
        } else {
            let manifest: ImageManifest = serde_json::from_slice(raw).map_err(|e| {
                TagbagError::OciImageError(format!("Failed to parse manifest: {}", e))
            })?;
            let layers = manifest
                .layers()
                .iter()
                .map(blob_info)
                .collect::<Result<Vec<_>>>()?;
            Ok(ParsedManifest::Image(ImageBlobs {
                config: blob_info(manifest.config())?,
                layers,
            }))
        }
    }

    /// Decode a manifest that must describe a single image.
    pub fn parse_image(raw: &[u8], mime: &str) -> Result<ImageBlobs> {
        match Self::parse(raw, mime)? {
            ParsedManifest::Image(blobs) => Ok(blobs),
            ParsedManifest::List(_) => Err(TagbagError::OciImageError(
                "Nested manifest lists are not supported".to_string(),
            )),
        }
    }
}

/// Pick the list entry for `linux/<host architecture>`.
///
/// Images are stored for Linux hosts regardless of the machine running the
/// copy, so only the architecture follows the host.
pub fn select_platform(entries: &[ListEntry]) -> Option<&ListEntry> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    entries.iter().find(|entry| {
        entry.os.as_deref() == Some("linux") && entry.architecture.as_deref() == Some(arch)
    })
}

fn blob_info(descriptor: &Descriptor) -> Result<BlobInfo> {
    let digest = Digest::parse(&descriptor.digest().to_string())?;
    Ok(BlobInfo {
        digest,
        size: u64::try_from(descriptor.size()).ok(),
        media_type: Some(descriptor.media_type().to_string()),
    })
}

fn list_entry(descriptor: &Descriptor) -> Result<ListEntry> {
    let platform = descriptor.platform().as_ref();
    Ok(ListEntry {
        digest: Digest::parse(&descriptor.digest().to_string())?,
        media_type: descriptor.media_type().to_string(),
        os: platform.map(|p| p.os().to_string()),
        architecture: platform.map(|p| p.architecture().to_string()),
        variant: platform.and_then(|p| p.variant().clone()),
    })
}
