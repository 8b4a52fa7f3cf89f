//! Primitive field encoding.
//!
//! Integers are big-endian, booleans one byte, strings a `u16` byte length
//! followed by UTF-8. Frames are assembled in memory with [`FrameBuilder`]
//! and written with a single `write_all`; fields are read straight off the
//! stream.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};

pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// In-memory frame assembly.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(64) }
    }

    /// Start a request frame with its one-byte opcode.
    pub fn request(tag: u8) -> Self {
        let mut b = Self::new();
        b.buf.put_u8(tag);
        b
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(mut self, v: bool) -> Self {
        self.buf.put_u8(v as u8);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.put_i32(v);
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.buf.put_i64(v);
        self
    }

    pub fn string(mut self, s: &str) -> ProtocolResult<Self> {
        let len = s.len();
        if len > MAX_STRING_LEN {
            return Err(ProtocolError::StringTooLong(len));
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(s.as_bytes());
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Write the assembled frame and flush.
    pub async fn send<W>(self, w: &mut W) -> ProtocolResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        w.write_all(&self.buf).await?;
        w.flush().await?;
        Ok(())
    }
}

/// Read the next opcode byte, or `None` if the peer closed the stream
/// cleanly between requests.
pub async fn read_tag<R>(r: &mut R) -> ProtocolResult<Option<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match r.read_u8().await {
        Ok(tag) => Ok(Some(tag)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn read_string<R>(r: &mut R) -> ProtocolResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

pub async fn read_bool<R>(r: &mut R) -> ProtocolResult<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(r.read_u8().await? != 0)
}

pub async fn read_i32<R>(r: &mut R) -> ProtocolResult<i32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(r.read_i32().await?)
}

pub async fn read_i64<R>(r: &mut R) -> ProtocolResult<i64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(r.read_i64().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fields_roundtrip_in_order() {
        let frame = FrameBuilder::request(31)
            .string("/a/b")
            .unwrap()
            .bool(true)
            .i64(-5)
            .i32(7)
            .freeze();
        let mut r: &[u8] = &frame;
        assert_eq!(read_tag(&mut r).await.unwrap(), Some(31));
        assert_eq!(read_string(&mut r).await.unwrap(), "/a/b");
        assert!(read_bool(&mut r).await.unwrap());
        assert_eq!(read_i64(&mut r).await.unwrap(), -5);
        assert_eq!(read_i32(&mut r).await.unwrap(), 7);
        assert_eq!(read_tag(&mut r).await.unwrap(), None);
    }

    #[test]
    fn big_endian_layout() {
        let frame = FrameBuilder::new().i32(1).string("ab").unwrap().freeze();
        assert_eq!(&frame[..], &[0, 0, 0, 1, 0, 2, b'a', b'b']);
    }

    #[test]
    fn rejects_oversized_string() {
        let s = "x".repeat(MAX_STRING_LEN + 1);
        let err = FrameBuilder::new().string(&s).unwrap_err();
        assert!(matches!(err, ProtocolError::StringTooLong(_)));
    }

    #[tokio::test]
    async fn truncated_string_is_io_error() {
        let mut r: &[u8] = &[0, 5, b'a'];
        let err = read_string(&mut r).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let mut r: &[u8] = &[0, 2, 0xff, 0xfe];
        let err = read_string(&mut r).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8));
    }
}
