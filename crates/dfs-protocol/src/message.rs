use bytes::Bytes;
use dfs_types::{BlockId, NodeId};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ProtocolError, ProtocolResult};
use crate::opcode::{DataOp, MetaOp};
use crate::wire::{read_bool, read_i32, read_i64, read_string, read_tag, FrameBuilder};

/// Response codes carried in every [`Status`] header.
pub mod codes {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = -1;
    pub const NOT_FOUND: i32 = -2;
    pub const ALREADY_EXISTS: i32 = -3;
    pub const PERMISSION_DENIED: i32 = -4;
    pub const INVALID_ARGUMENT: i32 = -5;
    pub const UNAVAILABLE: i32 = -6;
    pub const COMPENSATION_FAILED: i32 = -7;
    pub const UNSUPPORTED: i32 = -8;
}

/// Typed view of a nonzero response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Failure,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    InvalidArgument,
    Unavailable,
    CompensationFailed,
    Unsupported,
}

impl StatusKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            codes::NOT_FOUND => Self::NotFound,
            codes::ALREADY_EXISTS => Self::AlreadyExists,
            codes::PERMISSION_DENIED => Self::PermissionDenied,
            codes::INVALID_ARGUMENT => Self::InvalidArgument,
            codes::UNAVAILABLE => Self::Unavailable,
            codes::COMPENSATION_FAILED => Self::CompensationFailed,
            codes::UNSUPPORTED => Self::Unsupported,
            _ => Self::Failure,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Failure => codes::FAILURE,
            Self::NotFound => codes::NOT_FOUND,
            Self::AlreadyExists => codes::ALREADY_EXISTS,
            Self::PermissionDenied => codes::PERMISSION_DENIED,
            Self::InvalidArgument => codes::INVALID_ARGUMENT,
            Self::Unavailable => codes::UNAVAILABLE,
            Self::CompensationFailed => codes::COMPENSATION_FAILED,
            Self::Unsupported => codes::UNSUPPORTED,
        }
    }
}

/// Response header: `i32 code` followed by a message string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self { code: codes::OK, message: String::new() }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn unsupported(op: &str) -> Self {
        Self::error(codes::UNSUPPORTED, format!("operation not supported: {op}"))
    }

    pub fn is_ok(&self) -> bool {
        self.code == codes::OK
    }

    /// `None` for success.
    pub fn kind(&self) -> Option<StatusKind> {
        (!self.is_ok()).then(|| StatusKind::from_code(self.code))
    }

    /// Start a response frame with this header; payload fields are appended
    /// by the caller.
    pub fn frame(&self) -> ProtocolResult<FrameBuilder> {
        FrameBuilder::new().i32(self.code).string(&self.message)
    }

    /// Send a header-only response.
    pub async fn send<W>(&self, w: &mut W) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.frame()?.send(w).await
    }

    pub async fn read_from<R>(r: &mut R) -> ProtocolResult<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let code = read_i32(r).await?;
        let message = read_string(r).await?;
        Ok(Self { code, message })
    }
}

/// A resolved content location: which node, where to reach it, and the
/// block id it stores the content under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationRecord {
    pub node: NodeId,
    pub addr: String,
    pub block: BlockId,
}

impl LocationRecord {
    pub fn append_to(&self, frame: FrameBuilder) -> ProtocolResult<FrameBuilder> {
        frame
            .string(self.node.as_str())?
            .string(&self.addr)?
            .string(self.block.as_str())
    }

    pub async fn read_from<R>(r: &mut R) -> ProtocolResult<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let node = NodeId::new(read_string(r).await?)?;
        let addr = read_string(r).await?;
        let block = BlockId::new(read_string(r).await?)?;
        Ok(Self { node, addr, block })
    }
}

/// Requests understood by the metadata service.
///
/// Paths and names travel unvalidated; the service rejects bad ones with an
/// error status rather than dropping the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaRequest {
    Heartbeat { node: String, addr: String },
    Create { path: String, owner: String, is_directory: bool },
    Rename { src: String, dst: String },
    Delete { path: String, requester: String },
    List { path: String },
    GetLocations { path: String },
    Close { path: String },
    GetSize { path: String },
    SetSize { path: String, size: i64 },
    GetInfo { path: String },
    Copy { src: String, dst: String },
    Move { src: String, dst: String },
    Download { path: String },
    Open { path: String },
}

impl MetaRequest {
    pub fn op(&self) -> MetaOp {
        match self {
            Self::Heartbeat { .. } => MetaOp::Heartbeat,
            Self::Create { .. } => MetaOp::Create,
            Self::Rename { .. } => MetaOp::Rename,
            Self::Delete { .. } => MetaOp::Delete,
            Self::List { .. } => MetaOp::List,
            Self::GetLocations { .. } => MetaOp::GetLocations,
            Self::Close { .. } => MetaOp::Close,
            Self::GetSize { .. } => MetaOp::GetSize,
            Self::SetSize { .. } => MetaOp::SetSize,
            Self::GetInfo { .. } => MetaOp::GetInfo,
            Self::Copy { .. } => MetaOp::Copy,
            Self::Move { .. } => MetaOp::Move,
            Self::Download { .. } => MetaOp::Download,
            Self::Open { .. } => MetaOp::Open,
        }
    }

    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let frame = FrameBuilder::request(self.op().tag());
        let frame = match self {
            Self::Heartbeat { node, addr } => frame.string(node)?.string(addr)?,
            Self::Create { path, owner, is_directory } => {
                frame.string(path)?.string(owner)?.bool(*is_directory)
            }
            Self::Delete { path, requester } => frame.string(path)?.string(requester)?,
            Self::SetSize { path, size } => frame.string(path)?.i64(*size),
            Self::Rename { src, dst } | Self::Copy { src, dst } | Self::Move { src, dst } => {
                frame.string(src)?.string(dst)?
            }
            Self::List { path }
            | Self::GetLocations { path }
            | Self::Close { path }
            | Self::GetSize { path }
            | Self::GetInfo { path }
            | Self::Download { path }
            | Self::Open { path } => frame.string(path)?,
        };
        Ok(frame.freeze())
    }

    /// Read the next request. `Ok(None)` means the peer closed the
    /// connection between requests.
    pub async fn read_from<R>(r: &mut R) -> ProtocolResult<Option<Self>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match read_tag(r).await? {
            Some(tag) => Ok(Some(Self::read_body(tag, r).await?)),
            None => Ok(None),
        }
    }

    /// Read the fields that follow an already-consumed opcode byte.
    pub async fn read_body<R>(tag: u8, r: &mut R) -> ProtocolResult<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let op = MetaOp::from_u8(tag).ok_or(ProtocolError::UnknownOpcode(tag))?;
        let req = match op {
            MetaOp::Heartbeat => Self::Heartbeat {
                node: read_string(r).await?,
                addr: read_string(r).await?,
            },
            MetaOp::Create => Self::Create {
                path: read_string(r).await?,
                owner: read_string(r).await?,
                is_directory: read_bool(r).await?,
            },
            MetaOp::Rename => Self::Rename {
                src: read_string(r).await?,
                dst: read_string(r).await?,
            },
            MetaOp::Delete => Self::Delete {
                path: read_string(r).await?,
                requester: read_string(r).await?,
            },
            MetaOp::List => Self::List { path: read_string(r).await? },
            MetaOp::GetLocations => Self::GetLocations { path: read_string(r).await? },
            MetaOp::Close => Self::Close { path: read_string(r).await? },
            MetaOp::GetSize => Self::GetSize { path: read_string(r).await? },
            MetaOp::SetSize => Self::SetSize {
                path: read_string(r).await?,
                size: read_i64(r).await?,
            },
            MetaOp::GetInfo => Self::GetInfo { path: read_string(r).await? },
            MetaOp::Copy => Self::Copy {
                src: read_string(r).await?,
                dst: read_string(r).await?,
            },
            MetaOp::Move => Self::Move {
                src: read_string(r).await?,
                dst: read_string(r).await?,
            },
            MetaOp::Download => Self::Download { path: read_string(r).await? },
            MetaOp::Open => Self::Open { path: read_string(r).await? },
        };
        Ok(req)
    }
}

/// Requests understood by a block-storage node.
///
/// `Write` is followed on the wire by a chunk stream carrying the content;
/// that stream is not part of the request value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataRequest {
    Write { block: BlockId },
    Read { block: BlockId, offset: i64 },
    Delete { block: BlockId },
    CreateDirectory { name: String },
    DeleteDirectory { name: String },
    Move { src: BlockId, dst: BlockId },
    GetSize { block: BlockId },
    Download { block: BlockId },
    Open { block: BlockId },
    Copy { src: BlockId, dst: BlockId },
    Create { block: BlockId },
}

impl DataRequest {
    pub fn op(&self) -> DataOp {
        match self {
            Self::Write { .. } => DataOp::Write,
            Self::Read { .. } => DataOp::Read,
            Self::Delete { .. } => DataOp::Delete,
            Self::CreateDirectory { .. } => DataOp::CreateDirectory,
            Self::DeleteDirectory { .. } => DataOp::DeleteDirectory,
            Self::Move { .. } => DataOp::Move,
            Self::GetSize { .. } => DataOp::GetSize,
            Self::Download { .. } => DataOp::Download,
            Self::Open { .. } => DataOp::Open,
            Self::Copy { .. } => DataOp::Copy,
            Self::Create { .. } => DataOp::Create,
        }
    }

    pub fn encode(&self) -> ProtocolResult<Bytes> {
        let frame = FrameBuilder::request(self.op().tag());
        let frame = match self {
            Self::Read { block, offset } => frame.string(block.as_str())?.i64(*offset),
            Self::Move { src, dst } | Self::Copy { src, dst } => {
                frame.string(src.as_str())?.string(dst.as_str())?
            }
            Self::CreateDirectory { name } | Self::DeleteDirectory { name } => {
                frame.string(name)?
            }
            Self::Write { block }
            | Self::Delete { block }
            | Self::GetSize { block }
            | Self::Download { block }
            | Self::Open { block }
            | Self::Create { block } => frame.string(block.as_str())?,
        };
        Ok(frame.freeze())
    }

    pub async fn read_from<R>(r: &mut R) -> ProtocolResult<Option<Self>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match read_tag(r).await? {
            Some(tag) => Ok(Some(Self::read_body(tag, r).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_body<R>(tag: u8, r: &mut R) -> ProtocolResult<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let op = DataOp::from_u8(tag).ok_or(ProtocolError::UnknownOpcode(tag))?;
        let req = match op {
            DataOp::Write => Self::Write { block: read_block(r).await? },
            DataOp::Read => Self::Read {
                block: read_block(r).await?,
                offset: read_i64(r).await?,
            },
            DataOp::Delete => Self::Delete { block: read_block(r).await? },
            DataOp::CreateDirectory => Self::CreateDirectory { name: read_string(r).await? },
            DataOp::DeleteDirectory => Self::DeleteDirectory { name: read_string(r).await? },
            DataOp::Move => Self::Move {
                src: read_block(r).await?,
                dst: read_block(r).await?,
            },
            DataOp::GetSize => Self::GetSize { block: read_block(r).await? },
            DataOp::Download => Self::Download { block: read_block(r).await? },
            DataOp::Open => Self::Open { block: read_block(r).await? },
            DataOp::Copy => Self::Copy {
                src: read_block(r).await?,
                dst: read_block(r).await?,
            },
            DataOp::Create => Self::Create { block: read_block(r).await? },
        };
        Ok(req)
    }
}

async fn read_block<R>(r: &mut R) -> ProtocolResult<BlockId>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(BlockId::new(read_string(r).await?)?)
}
