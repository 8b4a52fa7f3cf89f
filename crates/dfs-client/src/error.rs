use std::time::Duration;

use dfs_blockstore::BlockError;
use dfs_protocol::{ProtocolError, StatusKind};
use dfs_types::TypeError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The metadata service answered with a nonzero code.
    #[error("{message} (code {code})")]
    Remote { code: i32, message: String },

    #[error("block node {addr}: {source}")]
    Block {
        addr: String,
        #[source]
        source: BlockError,
    },

    #[error(transparent)]
    InvalidPath(#[from] TypeError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("metadata service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Kind of a nonzero code reported by the metadata service or a block
    /// node. `None` for local failures.
    pub fn kind(&self) -> Option<StatusKind> {
        match self {
            Self::Remote { code, .. } => Some(StatusKind::from_code(*code)),
            Self::Block {
                source: BlockError::Remote { code, .. },
                ..
            } => Some(StatusKind::from_code(*code)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(StatusKind::NotFound)
    }

    /// The metadata connection may hold part of an unread reply.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_) | Self::Protocol(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
