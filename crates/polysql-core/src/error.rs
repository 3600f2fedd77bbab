//! Error types for polysql
//!
//! Drivers wrap every native error at the call site. Recognized native codes
//! are promoted to `NotExist` or `ConstraintViolation`; anything else becomes
//! `Generic` with the native error kept as its source.

use thiserror::Error;

/// Boxed native error kept as the source of a wrapped error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for polysql operations
#[derive(Error, Debug)]
pub enum PolysqlError {
    /// A referenced table, schema or catalog does not exist.
    #[error("{message}")]
    NotExist {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A uniqueness, foreign key, not-null or check constraint was violated.
    #[error("{message}")]
    ConstraintViolation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The operation has no meaning for this engine.
    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("{message}")]
    Generic {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("closed: {0}")]
    Closed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid SQL: {0}")]
    InvalidSql(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`PolysqlError`].
///
/// Ambient failures (closed handles, bad configuration, IO) classify as
/// `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotExist,
    ConstraintViolation,
    Cancelled,
    Unsupported,
    Generic,
}

impl PolysqlError {
    pub fn not_exist(message: impl Into<String>) -> Self {
        Self::NotExist {
            message: message.into(),
            source: None,
        }
    }

    pub fn not_exist_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::NotExist {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn constraint_violation(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
            source: None,
        }
    }

    pub fn generic_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Generic {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist { .. } => ErrorKind::NotExist,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Generic { .. }
            | Self::Closed(_)
            | Self::Config(_)
            | Self::InvalidSql(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Generic,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.kind() == ErrorKind::ConstraintViolation
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }
}

/// Result type alias for polysql operations
pub type Result<T> = std::result::Result<T, PolysqlError>;
