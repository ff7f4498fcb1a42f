//! OCI image formats and transports.
//!
//! - [`manifest`]: manifest and manifest list decoding
//! - [`reference`]: registry reference parsing
//! - [`registry`]: anonymous registry source/destination
//! - [`layout`]: OCI layout directories and `oci-archive` tarballs
//! - [`location`]: transport-qualified names (`docker://`, `oci:`, `oci-archive:`)

pub mod layout;
pub mod location;
pub mod manifest;
pub mod reference;
pub mod registry;

pub use layout::{OciLayoutDestination, OciLayoutSource};
pub use location::ImageLocation;
pub use manifest::{ImageBlobs, ListEntry, ParsedManifest};
pub use reference::ImageReference;
pub use registry::{RegistryDestination, RegistrySource};
