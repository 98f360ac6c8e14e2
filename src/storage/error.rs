//! Error types for storage operations

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::schema::MetricKind;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A write that was rejected before touching any stored state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The metric id is empty
    EmptyId,

    /// The key a record was stored under differs from its own id
    IdMismatch { key: String, id: String },

    /// The metric type is neither gauge nor counter
    UnsupportedKind(String),

    /// The field required by the kind (value for gauges, delta for counters) is missing
    MissingValue { id: String, kind: MetricKind },

    /// Both value and delta are set
    ConflictingValues { id: String, kind: MetricKind },

    /// Gauge value is NaN or infinite
    NonFiniteValue { id: String },

    /// Adding the delta would take the counter past the 64-bit range
    CounterOverflow { id: String },

    /// The id is already stored with another kind
    TypeMismatch {
        id: String,
        stored: MetricKind,
        incoming: MetricKind,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyId => write!(f, "metric id is empty"),
            ValidationError::IdMismatch { key, id } => {
                write!(f, "metric '{}' stored under key '{}'", id, key)
            }
            ValidationError::UnsupportedKind(kind) => {
                write!(f, "unsupported metric type '{}'", kind)
            }
            ValidationError::MissingValue { id, kind } => {
                let field = match kind {
                    MetricKind::Gauge => "value",
                    MetricKind::Counter => "delta",
                };
                write!(f, "{} metric '{}' has no {}", kind, id, field)
            }
            ValidationError::ConflictingValues { id, kind } => {
                write!(f, "{} metric '{}' has both value and delta set", kind, id)
            }
            ValidationError::NonFiniteValue { id } => {
                write!(f, "gauge metric '{}' has a non-finite value", id)
            }
            ValidationError::CounterOverflow { id } => {
                write!(f, "counter metric '{}' would overflow", id)
            }
            ValidationError::TypeMismatch {
                id,
                stored,
                incoming,
            } => write!(
                f,
                "type mismatch for '{}': stored as {}, got {}",
                id, stored, incoming
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// The write was rejected, nothing was applied
    Validation(ValidationError),

    /// A single database call failed
    #[cfg(feature = "storage-sqlite")]
    Database {
        op: &'static str,
        source: sqlx::Error,
    },

    /// A single call did not finish within its deadline
    Timeout { op: &'static str, after: Duration },

    /// The failure was classified as not worth retrying
    Permanent {
        op: &'static str,
        source: Box<StorageError>,
    },

    /// Every attempt of the retry schedule failed
    RetriesExhausted {
        op: &'static str,
        attempts: usize,
        source: Box<StorageError>,
    },

    /// A wait between attempts was interrupted by the caller
    Cancelled { op: &'static str, attempts: usize },

    /// I/O error while reading or writing the snapshot file
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metric serialization error
    Serialization(serde_json::Error),

    /// The snapshot file exists but does not decode
    CorruptSnapshot {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Database connection failed
    ConnectionFailed(String),

    /// Invalid configuration
    InvalidConfig(String),

    /// The store was closed, its background flusher is gone
    Closed,
}

impl StorageError {
    /// The write was rejected by validation (including type mismatches)
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(
            self,
            StorageError::Validation(ValidationError::TypeMismatch { .. })
        )
    }

    /// The backend was temporarily unavailable and the retry schedule gave up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::RetriesExhausted { .. }
                | StorageError::Cancelled { .. }
                | StorageError::Timeout { .. }
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, StorageError::Permanent { .. })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Validation(err) => write!(f, "invalid metric: {}", err),
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database { op, source } => {
                write!(f, "{}: database error: {}", op, source)
            }
            StorageError::Timeout { op, after } => {
                write!(f, "{}: timed out after {:?}", op, after)
            }
            StorageError::Permanent { op, source } => {
                write!(f, "{}: non-retriable error: {}", op, source)
            }
            StorageError::RetriesExhausted {
                op,
                attempts,
                source,
            } => write!(f, "{}: gave up after {} attempts: {}", op, attempts, source),
            StorageError::Cancelled { op, attempts } => {
                write!(f, "{}: cancelled after {} attempts", op, attempts)
            }
            StorageError::Io { op, path, source } => {
                write!(f, "{}: I/O error on {}: {}", op, path.display(), source)
            }
            StorageError::Serialization(err) => write!(f, "metric serialization error: {}", err),
            StorageError::CorruptSnapshot { path, source } => {
                write!(f, "corrupt snapshot {}: {}", path.display(), source)
            }
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {}", msg),
            StorageError::Closed => write!(f, "storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Validation(err) => Some(err),
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database { source, .. } => Some(source),
            StorageError::Permanent { source, .. }
            | StorageError::RetriesExhausted { source, .. } => Some(source.as_ref()),
            StorageError::Io { source, .. } => Some(source),
            StorageError::Serialization(err) => Some(err),
            StorageError::CorruptSnapshot { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ValidationError> for StorageError {
    fn from(err: ValidationError) -> Self {
        StorageError::Validation(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err)
    }
}
