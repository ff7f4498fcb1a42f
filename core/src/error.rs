use thiserror::Error;

/// Tagbag error types
#[derive(Error, Debug)]
pub enum TagbagError {
    /// Directory creation or filesystem I/O failed inside the store
    #[error("Storage fault: {path} - {message}")]
    StorageFault { path: String, message: String },

    /// Blob absent from the selected image and from every other image
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Network or parse failure while collecting manifest digests
    #[error("Manifest fetch failed: {reference} - {message}")]
    ManifestFetchFailed { reference: String, message: String },

    /// Declared and computed digests disagree
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Read or write requested before an image was selected
    #[error("No image selected")]
    NoImageSelected,

    /// Another write session holds the store
    #[error("Write session already active for image {0}")]
    SessionActive(String),

    /// Image name cannot be mapped to a store directory
    #[error("Invalid image name: {0}")]
    InvalidImageName(String),

    /// Malformed digest string
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Commit callback failed
    #[error("Commit failed: {0}")]
    CommitError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation aborted by an external cancellation signal
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl TagbagError {
    /// Build a `StorageFault` for a path.
    pub fn storage(path: impl AsRef<std::path::Path>, message: impl std::fmt::Display) -> Self {
        TagbagError::StorageFault {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the blob does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            TagbagError::BlobNotFound(_) => true,
            TagbagError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TagbagError {
    fn from(err: serde_json::Error) -> Self {
        TagbagError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for TagbagError {
    fn from(err: serde_yaml::Error) -> Self {
        TagbagError::SerializationError(err.to_string())
    }
}

/// Result type alias for tagbag operations
pub type Result<T> = std::result::Result<T, TagbagError>;
