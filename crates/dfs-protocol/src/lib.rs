//! Wire protocol for the distributed file system.
//!
//! Every exchange is a one-byte opcode followed by typed fields, answered
//! by a [`Status`] header and an operation-specific payload. File content
//! moves as chunk streams (see [`chunk`]).

pub mod chunk;
pub mod error;
pub mod message;
pub mod opcode;
pub mod wire;

pub use chunk::{read_stream, write_stream, ChunkReader, ChunkWriter, CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{codes, DataRequest, LocationRecord, MetaRequest, Status, StatusKind};
pub use opcode::{DataOp, MetaOp};
pub use wire::{read_bool, read_i32, read_i64, read_string, read_tag, FrameBuilder, MAX_STRING_LEN};
