//! Error types for ShelfDB core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Default status code carried by verb errors.
pub const BAD_REQUEST: u16 = 400;

/// Status code for a value already taken by another record.
pub const CONFLICT: u16 = 409;

/// Errors that can occur in ShelfDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be written as CBOR.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// A shelf file could not be read back as CBOR.
    #[error("decoding failed: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// Another live instance holds the lock marker of a resource.
    #[error("resource blocked by another instance: {}", path.display())]
    AlreadyBlocked {
        /// The locked resource.
        path: PathBuf,
    },

    /// A fetch matched no record.
    #[error("no record matches the filter")]
    NotFound,

    /// `new` or `insert` was rejected.
    #[error("new failed ({code}): {message}")]
    NewFailed {
        /// Status-like code.
        code: u16,
        /// Description of the rejection.
        message: String,
    },

    /// `fetch` was rejected.
    #[error("fetch failed ({code}): {message}")]
    FetchFailed {
        /// Status-like code.
        code: u16,
        /// Description of the rejection.
        message: String,
    },

    /// `replace` was rejected.
    #[error("replace failed ({code}): {message}")]
    ReplaceFailed {
        /// Status-like code.
        code: u16,
        /// Description of the rejection.
        message: String,
    },

    /// `edit` was rejected.
    #[error("edit failed ({code}): {message}")]
    EditFailed {
        /// Status-like code.
        code: u16,
        /// Description of the rejection.
        message: String,
    },

    /// `drop` was rejected.
    #[error("drop failed ({code}): {message}")]
    DropFailed {
        /// Status-like code.
        code: u16,
        /// Description of the rejection.
        message: String,
    },

    /// Invalid on-disk format.
    #[error("invalid collection format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The collection's processing loop has shut down.
    #[error("collection is closed")]
    CollectionClosed,
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a `new` rejection with the default code.
    pub fn new_failed(message: impl Into<String>) -> Self {
        Self::NewFailed {
            code: BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a `fetch` rejection with the default code.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::FetchFailed {
            code: BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a `replace` rejection with the default code.
    pub fn replace_failed(message: impl Into<String>) -> Self {
        Self::ReplaceFailed {
            code: BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates an `edit` rejection with the default code.
    pub fn edit_failed(message: impl Into<String>) -> Self {
        Self::EditFailed {
            code: BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a `drop` rejection with the default code.
    pub fn drop_failed(message: impl Into<String>) -> Self {
        Self::DropFailed {
            code: BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Replaces the status code of a verb error. Other variants are returned as is.
    #[must_use]
    pub fn with_code(self, code: u16) -> Self {
        match self {
            Self::NewFailed { message, .. } => Self::NewFailed { code, message },
            Self::FetchFailed { message, .. } => Self::FetchFailed { code, message },
            Self::ReplaceFailed { message, .. } => Self::ReplaceFailed { code, message },
            Self::EditFailed { message, .. } => Self::EditFailed { code, message },
            Self::DropFailed { message, .. } => Self::DropFailed { code, message },
            other => other,
        }
    }

    /// Returns the status-like code an outer HTTP layer should answer with.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NewFailed { code, .. }
            | Self::FetchFailed { code, .. }
            | Self::ReplaceFailed { code, .. }
            | Self::EditFailed { code, .. }
            | Self::DropFailed { code, .. } => *code,
            Self::NotFound => 404,
            Self::AlreadyBlocked { .. } => 423,
            Self::CollectionClosed => 503,
            Self::Io(_)
            | Self::Encode { .. }
            | Self::Decode { .. }
            | Self::InvalidFormat { .. }
            | Self::InvalidOperation { .. } => 500,
        }
    }

    /// Returns true for failures worth retrying inside a locked section.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Decode { .. } | Self::AlreadyBlocked { .. }
        )
    }
}

impl From<ciborium::ser::Error<io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        match err {
            ciborium::ser::Error::Io(e) => Self::Io(e),
            other => Self::Encode {
                message: other.to_string(),
            },
        }
    }
}

impl From<ciborium::de::Error<io::Error>> for CoreError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        match err {
            ciborium::de::Error::Io(e) => Self::Io(e),
            other => Self::Decode {
                message: other.to_string(),
            },
        }
    }
}
