use std::time::Duration;

use dfs_blockstore::BlockError;
use dfs_cluster::ClusterError;
use dfs_namespace::NamespaceError;
use dfs_protocol::{codes, ProtocolError};
use dfs_store::StoreError;

/// Errors from the metadata service.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A block node call failed.
    #[error("storage node {node}: {source}")]
    Storage {
        node: String,
        #[source]
        source: BlockError,
    },

    /// A rollback step failed; metadata and content may disagree.
    #[error("{operation} of {path} failed and could not be rolled back: {cause}")]
    CompensationFailed {
        operation: &'static str,
        path: String,
        cause: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A file with no content location yet.
    #[error("no content location recorded for {0}")]
    NoLocation(String),

    #[error("durable store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no progress within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetaError {
    /// Wire code reported for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Namespace(e) => match e {
                NamespaceError::NotFound(_) => codes::NOT_FOUND,
                NamespaceError::AlreadyExists(_) => codes::ALREADY_EXISTS,
                NamespaceError::PermissionDenied { .. } => codes::PERMISSION_DENIED,
                NamespaceError::InvalidPath(_)
                | NamespaceError::NotADirectory(_)
                | NamespaceError::IsADirectory(_)
                | NamespaceError::InvalidOperation { .. } => codes::INVALID_ARGUMENT,
                _ => codes::FAILURE,
            },
            Self::Cluster(_) | Self::Storage { .. } | Self::Timeout(_) => codes::UNAVAILABLE,
            Self::CompensationFailed { .. } => codes::COMPENSATION_FAILED,
            Self::InvalidArgument(_) => codes::INVALID_ARGUMENT,
            Self::NoLocation(_) => codes::NOT_FOUND,
            Self::Store(_) | Self::Protocol(_) | Self::Io(_) => codes::FAILURE,
        }
    }
}

pub type MetaResult<T> = Result<T, MetaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_error_kind() {
        assert_eq!(MetaError::from(NamespaceError::NotFound("/x".into())).code(), codes::NOT_FOUND);
        assert_eq!(
            MetaError::from(NamespaceError::PermissionDenied {
                path: "/g".into(),
                requester: "u2".into(),
                owner: "u1".into(),
            })
            .code(),
            codes::PERMISSION_DENIED
        );
        assert_eq!(MetaError::from(ClusterError::PlacementUnavailable).code(), codes::UNAVAILABLE);
        let fatal = MetaError::CompensationFailed {
            operation: "create",
            path: "/f".into(),
            cause: "disk gone".into(),
        };
        assert_eq!(fatal.code(), codes::COMPENSATION_FAILED);
        assert_eq!(MetaError::NoLocation("/f".into()).code(), codes::NOT_FOUND);
    }
}
