//! Error types for the dimetl ETL framework.
//!
//! All public APIs return `EtlResult<T>`: no panics in library code.
//! A lookup miss is never an error: it is reported as `Ok(None)` or as the
//! dimension's configured sentinel key.

use thiserror::Error;

/// Unified error type for all dimetl operations.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Invalid table/source definition or call-site name mapping
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A typed source could not cast a field value
    #[error("type conversion error at line {line}: field '{field}' value '{value}' is not a valid {target}")]
    TypeConversion {
        field: String,
        value: String,
        target: String,
        line: usize,
    },

    /// Generic store failure reported by the backend
    #[error("store error: {0}")]
    Store(String),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Constraint violation (duplicate key, conflicting fact, etc.)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Bulk-load callback failure; the fact buffer is retained
    #[error("bulk load into '{table}' failed: {message}")]
    BulkLoad { table: String, message: String },

    /// `reset` called on a single-pass source
    #[error("source '{0}' cannot be restarted")]
    NotRestartable(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// sled embedded database error
    #[error("sled error: {source}")]
    Sled {
        #[from]
        source: sled::Error,
    },

    /// Apache Arrow error (bulk-load batches)
    #[error("arrow error: {source}")]
    Arrow {
        #[from]
        source: arrow::error::ArrowError,
    },

    /// Apache Parquet error (bulk-load files)
    #[error("parquet error: {source}")]
    Parquet {
        #[from]
        source: parquet::errors::ParquetError,
    },
}

/// Result type alias for all dimetl operations.
pub type EtlResult<T> = Result<T, EtlError>;

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn bulk_load(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BulkLoad {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are raised at construction or first call and are
    /// never worth retrying.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Errors that originate in the store collaborator. The orchestration
    /// layer decides whether these are retried.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::StoreUnavailable(_)
                | Self::ConstraintViolation(_)
                | Self::BulkLoad { .. }
                | Self::Sled { .. }
        )
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for EtlError {
    fn from(err: bincode::Error) -> Self {
        EtlError::Serialization(err.to_string())
    }
}
