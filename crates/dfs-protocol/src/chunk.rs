//! Bulk content framing.
//!
//! Content travels as `(i32 len, bytes)` pairs terminated by
//! [`END_OF_STREAM`], or by [`STREAM_ERROR`] followed by a message string.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{read_string, FrameBuilder};

pub const END_OF_STREAM: i32 = -1;
pub const STREAM_ERROR: i32 = -2;

/// Largest chunk a sender emits.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Largest chunk a receiver accepts.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Writes one content stream.
pub struct ChunkWriter<'a, W: ?Sized> {
    w: &'a mut W,
}

impl<'a, W> ChunkWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(w: &'a mut W) -> Self {
        Self { w }
    }

    /// Send `data`, split into chunks of at most [`CHUNK_SIZE`].
    pub async fn write(&mut self, data: &[u8]) -> ProtocolResult<()> {
        for piece in data.chunks(CHUNK_SIZE) {
            let mut buf = BytesMut::with_capacity(4 + piece.len());
            buf.put_i32(piece.len() as i32);
            buf.put_slice(piece);
            self.w.write_all(&buf).await?;
        }
        Ok(())
    }

    /// Terminate the stream successfully.
    pub async fn finish(self) -> ProtocolResult<()> {
        self.w.write_all(&END_OF_STREAM.to_be_bytes()).await?;
        self.w.flush().await?;
        Ok(())
    }

    /// Terminate the stream with an error the receiver will surface.
    pub async fn fail(self, message: &str) -> ProtocolResult<()> {
        FrameBuilder::new()
            .i32(STREAM_ERROR)
            .string(message)?
            .send(self.w)
            .await
    }
}

/// Send a whole buffer as one terminated stream.
pub async fn write_stream<W>(w: &mut W, data: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut cw = ChunkWriter::new(w);
    cw.write(data).await?;
    cw.finish().await
}

/// Reads one content stream.
pub struct ChunkReader<'a, R: ?Sized> {
    r: &'a mut R,
    done: bool,
}

impl<'a, R> ChunkReader<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    pub fn new(r: &'a mut R) -> Self {
        Self { r, done: false }
    }

    /// Next chunk, or `None` at end of stream. A `-2` marker is returned as
    /// [`ProtocolError::RemoteStream`].
    pub async fn next_chunk(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let len = self.r.read_i32().await?;
        match len {
            END_OF_STREAM => {
                self.done = true;
                Ok(None)
            }
            STREAM_ERROR => {
                self.done = true;
                let message = read_string(self.r).await?;
                Err(ProtocolError::RemoteStream(message))
            }
            n if n < 0 => Err(ProtocolError::InvalidChunkLength(n)),
            n if n as usize > MAX_CHUNK_SIZE => Err(ProtocolError::ChunkTooLarge {
                size: n as usize,
                max: MAX_CHUNK_SIZE,
            }),
            n => {
                let mut buf = vec![0u8; n as usize];
                self.r.read_exact(&mut buf).await?;
                Ok(Some(buf))
            }
        }
    }
}

/// Read a whole stream into memory.
pub async fn read_stream<R>(r: &mut R) -> ProtocolResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut out = Vec::new();
    let mut reader = ChunkReader::new(r);
    while let Some(chunk) = reader.next_chunk().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn large_payload_is_split() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        write_stream(&mut wire, &data).await.unwrap();
        // three chunk headers + terminator
        assert_eq!(wire.len(), data.len() + 4 * 4);

        let mut r: &[u8] = &wire;
        let mut reader = ChunkReader::new(&mut r);
        let first = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.len(), CHUNK_SIZE);

        let mut r: &[u8] = &wire;
        assert_eq!(read_stream(&mut r).await.unwrap(), data);
    }

    #[tokio::test]
    async fn empty_stream() {
        let mut wire = Vec::new();
        write_stream(&mut wire, &[]).await.unwrap();
        assert_eq!(wire, END_OF_STREAM.to_be_bytes());
        let mut r: &[u8] = &wire;
        assert!(read_stream(&mut r).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_marker_surfaces_message() {
        let mut wire = Vec::new();
        let mut w = ChunkWriter::new(&mut wire);
        w.write(b"partial").await.unwrap();
        w.fail("disk gone").await.unwrap();

        let mut r: &[u8] = &wire;
        let err = read_stream(&mut r).await.unwrap_err();
        match err {
            ProtocolError::RemoteStream(m) => assert_eq!(m, "disk gone"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_bogus_lengths() {
        let mut r: &[u8] = &(-7i32).to_be_bytes();
        assert!(matches!(
            read_stream(&mut r).await.unwrap_err(),
            ProtocolError::InvalidChunkLength(-7)
        ));
        let huge = ((MAX_CHUNK_SIZE + 1) as i32).to_be_bytes();
        let mut r: &[u8] = &huge;
        assert!(matches!(
            read_stream(&mut r).await.unwrap_err(),
            ProtocolError::ChunkTooLarge { .. }
        ));
    }
}
