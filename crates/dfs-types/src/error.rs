use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("invalid identifier {0:?}")]
    InvalidId(String),

    #[error("malformed file info: {0}")]
    MalformedInfo(String),
}
