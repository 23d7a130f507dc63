//! Centralized error types for mimexplode.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mimexplode library.
#[derive(Error, Debug)]
pub enum MimeError {
    /// I/O error, with the file path when one is known.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A header could not be extracted from the raw lines.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The shape of the message is wrong: bad boundary, premature end of
    /// input, unterminated header.
    #[error("Structural error: {0}")]
    Structural(String),

    /// The parser reached a state that should be impossible.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A codec failed while decoding.
    #[error("Error decoding '{encoding}': {reason}")]
    Decode { encoding: String, reason: String },

    /// No codec is registered under the requested name.
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedEncoding(String),

    /// Not even the `binary` codec is registered.
    #[error("No codec for '{0}' and no 'binary' fallback is registered")]
    NoFallbackCodec(String),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a `Decode` error for the named encoding.
    pub fn decode(encoding: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            encoding: encoding.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether tolerant mode may downgrade this error to a warning.
    ///
    /// I/O failures and internal errors always abort the parse.
    pub fn is_forgivable(&self) -> bool {
        matches!(
            self,
            Self::Syntax(_)
                | Self::Structural(_)
                | Self::Decode { .. }
                | Self::UnsupportedEncoding(_)
        )
    }
}

/// Allow `?` on `std::io::Error` when no path context is available.
impl From<std::io::Error> for MimeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<stream>"),
            source,
        }
    }
}
