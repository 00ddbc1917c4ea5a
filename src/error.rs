//! Error types for Engram

use thiserror::Error;

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, EngramError>;

/// Main error type for Engram.
///
/// Every public operation on the memory engine returns `Result<T, EngramError>`;
/// the core never panics or throws across the module boundary. The variant names
/// double as the wire-level error codes surfaced to callers (spec §6).
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("no such parent message: {0}")]
    NoSuchParent(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("embedding unavailable: {0}")]
    EmbedUnavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error ({id}): {detail}")]
    Internal { id: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngramError {
    /// Construct an `Internal` error with a fresh opaque id, logging the detail.
    ///
    /// Per spec §7: internal errors are logged with full detail but surfaced
    /// to callers with only an opaque id, so the detail never leaks across
    /// the boundary.
    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let id = uuid::Uuid::new_v4().to_string();
        tracing::error!(error_id = %id, %detail, "internal error");
        EngramError::Internal { id, detail }
    }

    /// The wire-level error code string (spec §6).
    pub fn code(&self) -> &'static str {
        match self {
            EngramError::UnknownNamespace(_) => "UnknownNamespace",
            EngramError::NotFound(_) => "NotFound",
            EngramError::InvalidArgument(_) => "InvalidArgument",
            EngramError::UnknownRecipient(_) => "UnknownRecipient",
            EngramError::NoSuchParent(_) => "NoSuchParent",
            EngramError::StorageUnavailable(_) => "StorageUnavailable",
            EngramError::EmbedUnavailable(_) => "EmbedUnavailable",
            EngramError::PermissionDenied(_) => "PermissionDenied",
            EngramError::DeadlineExceeded => "DeadlineExceeded",
            EngramError::Internal { .. } => "Internal",
            EngramError::Serialization(_) | EngramError::Io(_) => "StorageUnavailable",
        }
    }

    /// Whether a caller may retry this error with backoff (spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngramError::StorageUnavailable(_) | EngramError::Io(_)
        )
    }

    /// `EmbedUnavailable` never aborts an operation; it only downgrades it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngramError::EmbedUnavailable(_))
    }
}
