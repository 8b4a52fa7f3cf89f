use std::future::Future;
use std::time::Duration;

use dfs_protocol::{read_i64, ChunkReader, ChunkWriter, DataRequest, ProtocolError, Status, CHUNK_SIZE};
use dfs_types::BlockId;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{BlockError, BlockResult};

async fn bounded<T, F>(limit: Duration, fut: F) -> BlockResult<T>
where
    F: Future<Output = BlockResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BlockError::Timeout(limit))?
}

/// True when the failed call may have left bytes in flight.
fn desyncs(e: &BlockError) -> bool {
    match e {
        BlockError::Timeout(_) | BlockError::Io(_) => true,
        BlockError::Protocol(ProtocolError::RemoteStream(_)) => false,
        BlockError::Protocol(_) => true,
        _ => false,
    }
}

/// One connection to a block node.
///
/// Each I/O step (request header, one content chunk, status) is bounded
/// by `io_timeout`; a transfer as a whole may take longer. After a call
/// fails mid-exchange, or stops reading a stream early, the connection is
/// out of step and every later call fails with
/// [`BlockError::ConnectionLost`].
pub struct BlockNodeClient {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
    lost: bool,
}

impl BlockNodeClient {
    pub async fn connect(addr: &str, io_timeout: Duration) -> BlockResult<Self> {
        let stream = bounded(io_timeout, async {
            TcpStream::connect(addr).await.map_err(BlockError::from)
        })
        .await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        debug!(addr, "connected to block node");
        Ok(Self {
            addr: addr.to_string(),
            reader: BufReader::new(r),
            writer: w,
            io_timeout,
            lost: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection can still carry requests.
    pub fn is_usable(&self) -> bool {
        !self.lost
    }

    fn ensure_usable(&self) -> BlockResult<()> {
        if self.lost {
            return Err(BlockError::ConnectionLost(self.addr.clone()));
        }
        Ok(())
    }

    fn settle<T>(&mut self, result: BlockResult<T>) -> BlockResult<T> {
        if let Err(e) = &result {
            if desyncs(e) {
                debug!(addr = %self.addr, error = %e, "block connection abandoned");
                self.lost = true;
            }
        }
        result
    }

    // ---- Exchange steps ----

    /// Send `req`, plus a content stream for writes.
    async fn send(&mut self, req: &DataRequest, body: Option<&[u8]>) -> BlockResult<()> {
        let limit = self.io_timeout;
        let header = req.encode()?;
        let writer = &mut self.writer;
        bounded(limit, async { writer.write_all(&header).await.map_err(BlockError::from) }).await?;
        match body {
            Some(data) => {
                let mut chunks = ChunkWriter::new(writer);
                for piece in data.chunks(CHUNK_SIZE) {
                    bounded(limit, async { chunks.write(piece).await.map_err(BlockError::from) }).await?;
                }
                bounded(limit, async move { chunks.finish().await.map_err(BlockError::from) }).await
            }
            None => bounded(limit, async { writer.flush().await.map_err(BlockError::from) }).await,
        }
    }

    async fn status(&mut self) -> BlockResult<()> {
        let limit = self.io_timeout;
        let reader = &mut self.reader;
        let status = bounded(limit, async { Status::read_from(&mut *reader).await.map_err(BlockError::from) }).await?;
        if !status.is_ok() {
            return Err(BlockError::Remote {
                code: status.code,
                message: status.message,
            });
        }
        Ok(())
    }

    async fn roundtrip(&mut self, req: &DataRequest, body: Option<&[u8]>) -> BlockResult<()> {
        self.send(req, body).await?;
        self.status().await
    }

    async fn sized_inner(&mut self, req: DataRequest) -> BlockResult<i64> {
        self.roundtrip(&req, None).await?;
        let limit = self.io_timeout;
        let reader = &mut self.reader;
        bounded(limit, async { read_i64(&mut *reader).await.map_err(BlockError::from) }).await
    }

    /// Read a content stream until it ends or `max` bytes have arrived.
    /// The flag is false when the stream was left unfinished.
    async fn streamed_inner(&mut self, req: DataRequest, max: usize) -> BlockResult<(Vec<u8>, bool)> {
        self.roundtrip(&req, None).await?;
        let limit = self.io_timeout;
        let mut chunks = ChunkReader::new(&mut self.reader);
        let mut out = Vec::new();
        while out.len() < max {
            let next = bounded(limit, async { chunks.next_chunk().await.map_err(BlockError::from) }).await?;
            match next {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => return Ok((out, true)),
            }
        }
        out.truncate(max);
        Ok((out, false))
    }

    async fn simple(&mut self, req: DataRequest) -> BlockResult<()> {
        self.ensure_usable()?;
        let result = self.roundtrip(&req, None).await;
        self.settle(result)
    }

    async fn sized(&mut self, req: DataRequest) -> BlockResult<i64> {
        self.ensure_usable()?;
        let result = self.sized_inner(req).await;
        self.settle(result)
    }

    async fn streamed(&mut self, req: DataRequest, max: usize) -> BlockResult<Vec<u8>> {
        self.ensure_usable()?;
        let result = self.streamed_inner(req, max).await;
        let (data, complete) = self.settle(result)?;
        if !complete {
            debug!(addr = %self.addr, bytes = data.len(), "stream left unfinished");
            self.lost = true;
        }
        Ok(data)
    }

    // ---- Block operations ----

    pub async fn create(&mut self, block: &BlockId) -> BlockResult<()> {
        self.simple(DataRequest::Create { block: block.clone() }).await
    }

    pub async fn delete(&mut self, block: &BlockId) -> BlockResult<()> {
        self.simple(DataRequest::Delete { block: block.clone() }).await
    }

    pub async fn copy(&mut self, src: &BlockId, dst: &BlockId) -> BlockResult<()> {
        self.simple(DataRequest::Copy { src: src.clone(), dst: dst.clone() }).await
    }

    pub async fn rename(&mut self, src: &BlockId, dst: &BlockId) -> BlockResult<()> {
        self.simple(DataRequest::Move { src: src.clone(), dst: dst.clone() }).await
    }

    pub async fn size(&mut self, block: &BlockId) -> BlockResult<i64> {
        self.sized(DataRequest::GetSize { block: block.clone() }).await
    }

    pub async fn open(&mut self, block: &BlockId) -> BlockResult<i64> {
        self.sized(DataRequest::Open { block: block.clone() }).await
    }

    /// Replace the block's content.
    pub async fn write(&mut self, block: &BlockId, data: &[u8]) -> BlockResult<()> {
        self.ensure_usable()?;
        let req = DataRequest::Write { block: block.clone() };
        let result = self.roundtrip(&req, Some(data)).await;
        self.settle(result)
    }

    /// Content from `offset` to the end of the block.
    pub async fn read(&mut self, block: &BlockId, offset: i64) -> BlockResult<Vec<u8>> {
        self.read_range(block, offset, usize::MAX).await
    }

    /// At most `len` bytes from `offset`. Stops pulling chunks once `len`
    /// bytes are in; the connection is unusable afterwards if the block
    /// had more to send.
    pub async fn read_range(&mut self, block: &BlockId, offset: i64, len: usize) -> BlockResult<Vec<u8>> {
        self.streamed(DataRequest::Read { block: block.clone(), offset }, len).await
    }

    pub async fn download(&mut self, block: &BlockId) -> BlockResult<Vec<u8>> {
        self.streamed(DataRequest::Download { block: block.clone() }, usize::MAX).await
    }
}
