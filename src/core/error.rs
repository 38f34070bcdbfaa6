use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Partial write failure: {inserted} rows written, {failed} failed, first error: {first_error}")]
    PartialWriteFailure {
        inserted: usize,
        failed: usize,
        first_error: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("OTLP protocol error: {0}")]
    Protocol(String),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for pulseops operations
pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    /// Creates a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new storage-unavailable error
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Returns true if the caller sent something we will never accept
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Protocol(_))
    }

    /// Returns true if the storage engine could not be reached or answered too late
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Timeout { .. })
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::PartialWriteFailure { .. } => "partial_write",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Protocol(_) => "protocol",
            Self::Timeout { .. } => "timeout",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
