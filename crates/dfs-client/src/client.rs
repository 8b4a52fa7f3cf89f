use std::future::Future;
use std::path::Path;
use std::time::Duration;

use dfs_blockstore::{BlockError, BlockNodeClient};
use dfs_protocol::{read_i32, read_i64, read_string, LocationRecord, MetaRequest, Status};
use dfs_types::{path, FileInfo};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

async fn bounded<T, F>(limit: Duration, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout(limit))?
}

fn block_error(addr: &str) -> impl FnOnce(BlockError) -> ClientError + '_ {
    move |source| ClientError::Block {
        addr: addr.to_string(),
        source,
    }
}

/// Request side and reply side of one metadata service connection.
struct MetaConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MetaConnection {
    async fn open(addr: &str, limit: Duration) -> ClientResult<Self> {
        let stream = bounded(limit, async { TcpStream::connect(addr).await.map_err(ClientError::from) }).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
        })
    }

    async fn exchange(&mut self, req: &MetaRequest) -> ClientResult<()> {
        self.writer.write_all(&req.encode()?).await?;
        self.writer.flush().await?;
        let status = Status::read_from(&mut self.reader).await?;
        if !status.is_ok() {
            return Err(ClientError::Remote {
                code: status.code,
                message: status.message,
            });
        }
        Ok(())
    }

    async fn unit(&mut self, req: MetaRequest) -> ClientResult<()> {
        self.exchange(&req).await
    }

    async fn names(&mut self, req: MetaRequest) -> ClientResult<Vec<String>> {
        self.exchange(&req).await?;
        let n = read_i32(&mut self.reader).await?;
        let mut names = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            names.push(read_string(&mut self.reader).await?);
        }
        Ok(names)
    }

    async fn locations(&mut self, req: MetaRequest) -> ClientResult<Vec<LocationRecord>> {
        self.exchange(&req).await?;
        let n = read_i32(&mut self.reader).await?;
        let mut records = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            records.push(LocationRecord::read_from(&mut self.reader).await?);
        }
        Ok(records)
    }

    async fn location(&mut self, req: MetaRequest) -> ClientResult<LocationRecord> {
        self.exchange(&req).await?;
        Ok(LocationRecord::read_from(&mut self.reader).await?)
    }

    async fn i64(&mut self, req: MetaRequest) -> ClientResult<i64> {
        self.exchange(&req).await?;
        Ok(read_i64(&mut self.reader).await?)
    }

    async fn string(&mut self, req: MetaRequest) -> ClientResult<String> {
        self.exchange(&req).await?;
        Ok(read_string(&mut self.reader).await?)
    }
}

/// File system client. Talks to the metadata service over one
/// connection at a time; content moves over short-lived block node
/// connections.
///
/// A request that fails partway (timeout, I/O or framing error) may leave
/// its reply in flight, so that connection is dropped and the next
/// request opens a fresh one.
pub struct DfsClient {
    meta_addr: String,
    user: String,
    conn: Option<MetaConnection>,
    io_timeout: Duration,
}

impl DfsClient {
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let io_timeout = config.io_timeout();
        let conn = MetaConnection::open(&config.meta_addr, io_timeout).await?;
        debug!(meta = %config.meta_addr, user = %config.user, "connected to metadata service");
        Ok(Self {
            meta_addr: config.meta_addr.clone(),
            user: config.user.clone(),
            conn: Some(conn),
            io_timeout,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    // ---- Request plumbing ----

    async fn connection(&mut self) -> ClientResult<&mut MetaConnection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = MetaConnection::open(&self.meta_addr, self.io_timeout).await?;
                debug!(meta = %self.meta_addr, "reconnected to metadata service");
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }

    /// Drop the connection if `result` may have left it out of step.
    fn settle<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(e) = &result {
            if e.breaks_connection() && self.conn.take().is_some() {
                warn!(meta = %self.meta_addr, error = %e, "metadata connection dropped");
            }
        }
        result
    }

    async fn unit(&mut self, req: MetaRequest) -> ClientResult<()> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.unit(req)).await;
        self.settle(result)
    }

    async fn names(&mut self, req: MetaRequest) -> ClientResult<Vec<String>> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.names(req)).await;
        self.settle(result)
    }

    async fn locations(&mut self, req: MetaRequest) -> ClientResult<Vec<LocationRecord>> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.locations(req)).await;
        self.settle(result)
    }

    async fn location(&mut self, req: MetaRequest) -> ClientResult<LocationRecord> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.location(req)).await;
        self.settle(result)
    }

    async fn i64(&mut self, req: MetaRequest) -> ClientResult<i64> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.i64(req)).await;
        self.settle(result)
    }

    async fn string(&mut self, req: MetaRequest) -> ClientResult<String> {
        let limit = self.io_timeout;
        let conn = self.connection().await?;
        let result = bounded(limit, conn.string(req)).await;
        self.settle(result)
    }

    async fn block_node(&self, addr: &str) -> ClientResult<BlockNodeClient> {
        BlockNodeClient::connect(addr, self.io_timeout)
            .await
            .map_err(block_error(addr))
    }

    // ---- Namespace operations ----

    pub async fn create_file(&mut self, p: &str) -> ClientResult<()> {
        let path = path::normalize(p)?;
        let owner = self.user.clone();
        self.unit(MetaRequest::Create { path, owner, is_directory: false }).await
    }

    pub async fn create_directory(&mut self, p: &str) -> ClientResult<()> {
        let path = path::normalize(p)?;
        let owner = self.user.clone();
        self.unit(MetaRequest::Create { path, owner, is_directory: true }).await
    }

    pub async fn list_files(&mut self, p: &str) -> ClientResult<Vec<String>> {
        let path = path::normalize(p)?;
        self.names(MetaRequest::List { path }).await
    }

    /// Size of a file, or the total size of the files under a directory.
    pub async fn get_file_size(&mut self, p: &str) -> ClientResult<i64> {
        let path = path::normalize(p)?;
        self.i64(MetaRequest::GetSize { path }).await
    }

    pub async fn get_file_info(&mut self, p: &str) -> ClientResult<FileInfo> {
        let path = path::normalize(p)?;
        let raw = self.string(MetaRequest::GetInfo { path }).await?;
        Ok(FileInfo::parse(&raw)?)
    }

    pub async fn get_locations(&mut self, p: &str) -> ClientResult<Vec<LocationRecord>> {
        let path = path::normalize(p)?;
        self.locations(MetaRequest::GetLocations { path }).await
    }

    /// Resolve where a file's content lives.
    pub async fn open_file(&mut self, p: &str) -> ClientResult<LocationRecord> {
        let path = path::normalize(p)?;
        self.location(MetaRequest::Open { path }).await
    }

    pub async fn close_file(&mut self, p: &str) -> ClientResult<()> {
        let path = path::normalize(p)?;
        self.unit(MetaRequest::Close { path }).await
    }

    async fn require_kind(&mut self, p: &str, directory: bool) -> ClientResult<()> {
        let info = self.get_file_info(p).await?;
        if info.is_directory != directory {
            let expected = if directory { "a directory" } else { "a file" };
            return Err(ClientError::InvalidArgument(format!("{} is not {expected}", info.path)));
        }
        Ok(())
    }

    pub async fn delete_file(&mut self, p: &str) -> ClientResult<()> {
        let path = path::normalize(p)?;
        self.require_kind(&path, false).await?;
        let requester = self.user.clone();
        self.unit(MetaRequest::Delete { path, requester }).await
    }

    /// Delete a directory and everything under it.
    pub async fn delete_directory(&mut self, p: &str) -> ClientResult<()> {
        let path = path::normalize(p)?;
        self.require_kind(&path, true).await?;
        let requester = self.user.clone();
        self.unit(MetaRequest::Delete { path, requester }).await
    }

    pub async fn copy_file(&mut self, src: &str, dst: &str) -> ClientResult<()> {
        let (src, dst) = (path::normalize(src)?, path::normalize(dst)?);
        self.unit(MetaRequest::Copy { src, dst }).await
    }

    pub async fn move_file(&mut self, src: &str, dst: &str) -> ClientResult<()> {
        let (src, dst) = (path::normalize(src)?, path::normalize(dst)?);
        self.unit(MetaRequest::Move { src, dst }).await
    }

    // ---- Content operations ----

    /// Replace a file's content, creating the file first if needed.
    ///
    /// The new size is recorded before the bytes are sent, and the two
    /// steps are not atomic: if the transfer fails the recorded size is
    /// already the new one.
    pub async fn write_file(&mut self, p: &str, data: &[u8]) -> ClientResult<()> {
        let path = path::normalize(p)?;
        let location = match self.open_file(&path).await {
            Ok(location) => location,
            // Not-found also covers an existing file with no content location.
            Err(e) if e.is_not_found() => match self.get_file_info(&path).await {
                Ok(_) => return Err(e),
                Err(missing) if missing.is_not_found() => {
                    self.create_file(&path).await?;
                    self.open_file(&path).await?
                }
                Err(other) => return Err(other),
            },
            Err(e) => return Err(e),
        };
        let size = i64::try_from(data.len())
            .map_err(|_| ClientError::InvalidArgument(format!("{} bytes is too large", data.len())))?;
        self.unit(MetaRequest::SetSize { path: path.clone(), size }).await?;

        let mut node = self.block_node(&location.addr).await?;
        node.write(&location.block, data)
            .await
            .map_err(block_error(&location.addr))?;
        debug!(path = %path, bytes = data.len(), node = %location.node, "file written");
        Ok(())
    }

    /// Up to `len` bytes starting at `offset`. Only as many chunks as
    /// needed are pulled from the block node.
    pub async fn read_file(&mut self, p: &str, offset: i64, len: usize) -> ClientResult<Vec<u8>> {
        if offset < 0 {
            return Err(ClientError::InvalidArgument(format!("negative offset {offset}")));
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let location = self.open_file(p).await?;
        let mut node = self.block_node(&location.addr).await?;
        node.read_range(&location.block, offset, len)
            .await
            .map_err(block_error(&location.addr))
    }

    /// Copy a file's whole content to `local`. Returns the bytes written.
    pub async fn download_file(&mut self, remote: &str, local: &Path) -> ClientResult<u64> {
        let path = path::normalize(remote)?;
        let location = self.location(MetaRequest::Download { path }).await?;
        let mut node = self.block_node(&location.addr).await?;
        let data = node
            .download(&location.block)
            .await
            .map_err(block_error(&location.addr))?;
        tokio::fs::write(local, &data).await?;
        Ok(data.len() as u64)
    }
}
