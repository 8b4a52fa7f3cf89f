use dfs_store::StoreError;
use dfs_types::TypeError;

/// Errors from namespace tree operations.
#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {requester} may not remove {path} (owner {owner})")]
    PermissionDenied {
        path: String,
        requester: String,
        owner: String,
    },

    #[error(transparent)]
    InvalidPath(#[from] TypeError),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Refused structural change, e.g. removing the root or moving a
    /// directory into itself.
    #[error("invalid operation on {path}: {reason}")]
    InvalidOperation { path: String, reason: &'static str },

    #[error("entry encoding error: {0}")]
    Serialization(String),

    #[error("durable store error: {0}")]
    Store(#[from] StoreError),

    #[error("namespace lock poisoned")]
    Poisoned,
}

pub type NamespaceResult<T> = Result<T, NamespaceError>;
