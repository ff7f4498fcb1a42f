//! Tagbag Runtime - deduplicated image storage and incremental transfer.
//!
//! - [`store`]: many images under one root, each blob stored once
//! - [`incremental`]: base-aware writer and delta archives
//! - [`diff`]: overlay tarballs from two expanded stores
//! - [`transfer`]: the source/destination protocol and the copy driver
//! - [`oci`]: manifests, registries, OCI layouts and archives

#![allow(clippy::result_large_err)]

pub mod diff;
pub mod fs;
pub mod incremental;
pub mod oci;
pub mod store;
pub mod tgz;
pub mod transfer;

// Re-export common types
pub use diff::{diff_tarballs, diff_trees, DiffReport};
pub use incremental::{collect_digests, Incremental, IncrementalWriter};
pub use oci::{ImageLocation, ImageReference, OciLayoutDestination, OciLayoutSource};
pub use oci::{RegistryDestination, RegistrySource};
pub use store::{Committer, SeenIndex, Storage, StoreDestination, StoreSource};
pub use transfer::{copy_image, BlobInfo, CopyOptions, CopyReport, ImageDestination, ImageSource};

/// Tagbag Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
