// core/src/error.rs
//
// Error taxonomy shared by the loaders, the model and the model set.

use thiserror::Error;

/// Root error type for all engine failures.
///
/// Looking up a word that is not in the vocabulary and falling back to a
/// lower-order estimate are *not* errors; they never produce an `LmError`.
#[derive(Error, Debug)]
pub enum LmError {
    /// File unreadable or truncated. Fatal to the load call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid ARPA or DMP content. Fatal to the load call.
    #[error("format error: {0}")]
    Format(String),

    /// Invalid log base, weight parameter or configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A model set already holds an entry with this name.
    #[error("duplicate model name: {0}")]
    DuplicateName(String),

    /// No model set entry with this name.
    #[error("model not found: {0}")]
    NotFound(String),

    /// The model was built on a different log-math context than the set.
    #[error("incompatible log-math context for model {0}")]
    IncompatibleLogMath(String),

    /// The requested operation has no meaning for this kind of model.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl LmError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        LmError::Format(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LmError::Configuration(msg.into())
    }
}

impl From<toml::de::Error> for LmError {
    fn from(e: toml::de::Error) -> Self {
        LmError::Configuration(e.to_string())
    }
}

impl From<toml::ser::Error> for LmError {
    fn from(e: toml::ser::Error) -> Self {
        LmError::Configuration(e.to_string())
    }
}

pub type LmResult<T> = Result<T, LmError>;
