use thiserror::Error;

/// Main error type for the sync protocol
#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Ephemeral store errors
    #[error("Ephemeral store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Stale record: {key}")]
    StaleRecord { key: String },

    #[error("Version race lost on {key}: observed {observed}, fetched {fetched}")]
    VersionRaceLost {
        key: String,
        observed: u64,
        fetched: u64,
    },

    // Authoritative store errors
    #[error("Authoritative fetch of {what} failed after {attempts} attempt(s): {reason}")]
    AuthoritativeFetchFailed {
        what: String,
        attempts: u32,
        reason: String,
    },

    #[error("Config apply failed: {0}")]
    ConfigApplyFailed(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether the error came from the ephemeral store being unreachable
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_))
    }
}

/// Result type alias for SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors returned by the authoritative config store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Transient failures are worth retrying within the same cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Transport(_))
    }
}

/// Errors decoding an ephemeral hash record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl From<RecordError> for SyncError {
    fn from(err: RecordError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        SyncError::AuthoritativeFetchFailed {
            what: "config".to_string(),
            attempts: 1,
            reason: err.to_string(),
        }
    }
}

/// A fetch that failed for good within one cycle, with the last error seen
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Authoritative fetch of {what} failed after {attempts} attempt(s): {last}")]
pub struct FetchFailure {
    pub what: String,
    pub attempts: u32,
    pub last: FetchError,
}

impl From<FetchFailure> for SyncError {
    fn from(failure: FetchFailure) -> Self {
        match failure.last {
            // The authority answered, but with nothing we can apply
            FetchError::Malformed(reason) => SyncError::ConfigApplyFailed(format!(
                "{}: malformed payload: {}",
                failure.what, reason
            )),
            last => SyncError::AuthoritativeFetchFailed {
                what: failure.what,
                attempts: failure.attempts,
                reason: last.to_string(),
            },
        }
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}
