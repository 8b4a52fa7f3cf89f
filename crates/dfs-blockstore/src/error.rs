use std::time::Duration;

use dfs_protocol::{codes, ProtocolError};

/// Errors from block storage and block node calls.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block not found: {0}")]
    NotFound(String),

    #[error("block already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A block node answered with a nonzero status.
    #[error("block node error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("block node did not answer within {0:?}")]
    Timeout(Duration),

    /// An earlier call left unread or half-written data on the connection.
    #[error("connection to block node {0} was abandoned after a failed or partial call")]
    ConnectionLost(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlockError {
    /// Wire code reported for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::AlreadyExists(_) => codes::ALREADY_EXISTS,
            Self::InvalidArgument(_) | Self::Protocol(ProtocolError::InvalidField(_)) => {
                codes::INVALID_ARGUMENT
            }
            Self::Remote { code, .. } => *code,
            _ => codes::FAILURE,
        }
    }

    /// The connection's framing can no longer be trusted after this error.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Protocol(e) if !matches!(e, ProtocolError::RemoteStream(_)))
    }
}

pub type BlockResult<T> = Result<T, BlockError>;
