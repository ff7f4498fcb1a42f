//! Tagbag Core - Foundational Types
//!
//! Errors, content digests and configuration shared by the tagbag
//! runtime and command line.

pub mod config;
pub mod digest;
pub mod error;

// Re-export commonly used types
pub use config::{ImageSelection, LogLevel, MatchPolicy, TagbagConfig};
pub use digest::{Algorithm, Digest};
pub use error::{Result, TagbagError};

/// Tagbag version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
