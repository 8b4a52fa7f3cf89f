use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    #[error("string too long for wire encoding: {0} bytes (max 65535)")]
    StringTooLong(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid chunk length: {0}")]
    InvalidChunkLength(i32),

    #[error("chunk too large: {size} bytes (max {max})")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("remote stream error: {0}")]
    RemoteStream(String),

    #[error("invalid field: {0}")]
    InvalidField(#[from] dfs_types::TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
