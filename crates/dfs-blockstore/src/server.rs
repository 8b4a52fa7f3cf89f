use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dfs_protocol::{codes, ChunkWriter, DataRequest, ProtocolError, Status, CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DataNodeConfig;
use crate::error::{BlockError, BlockResult};
use crate::heartbeat::HeartbeatTask;
use crate::store::BlockStore;

/// TCP server exposing a [`BlockStore`].
pub struct DataServer {
    listener: TcpListener,
    store: Arc<BlockStore>,
}

impl DataServer {
    pub async fn bind(addr: SocketAddr, store: BlockStore) -> BlockResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            store: Arc::new(store),
        })
    }

    pub fn local_addr(&self) -> BlockResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> BlockResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, root = %self.store.root().display(), "data server listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %addr, "data server stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "data connection opened");
                        let store = Arc::clone(&self.store);
                        tokio::spawn(async move {
                            match handle_connection(stream, store).await {
                                Ok(()) => debug!(peer = %peer, "data connection closed"),
                                Err(e) => warn!(peer = %peer, error = %e, "data connection error"),
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }
    }

    pub async fn serve(self) -> BlockResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }
}

async fn handle_connection(stream: TcpStream, store: Arc<BlockStore>) -> BlockResult<()> {
    stream.set_nodelay(true)?;
    let (r, mut w) = stream.into_split();
    let mut r = BufReader::new(r);
    loop {
        let req = match DataRequest::read_from(&mut r).await {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(ProtocolError::InvalidField(e)) => {
                // Anything after the bad field (e.g. a write's content) is unframed.
                Status::error(codes::INVALID_ARGUMENT, e.to_string()).send(&mut w).await?;
                return Err(BlockError::InvalidArgument(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let op = req.op();
        debug!(op = op.name(), "data request");

        match dispatch(&store, req, &mut r, &mut w).await {
            Ok(()) => {}
            Err(e) if e.is_connection_fatal() => return Err(e),
            Err(e) => {
                debug!(op = op.name(), error = %e, "data request failed");
                Status::error(e.code(), e.to_string()).send(&mut w).await?;
            }
        }
    }
}

/// Serve one request. On success the full response has been written; on
/// error nothing has been written yet (except for a failure mid-stream,
/// which is reported in-band).
async fn dispatch<R, W>(store: &BlockStore, req: DataRequest, r: &mut R, w: &mut W) -> BlockResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let op = req.op();
    match req {
        DataRequest::Write { block } => {
            store.write_stream(&block, r).await?;
            Status::ok().send(w).await?;
        }
        DataRequest::Read { block, offset } => {
            let file = store.open_at(&block, offset).await?;
            send_file(file, w).await?;
        }
        DataRequest::Download { block } => {
            let file = store.open_at(&block, 0).await?;
            send_file(file, w).await?;
        }
        DataRequest::Delete { block } => {
            store.delete(&block).await?;
            Status::ok().send(w).await?;
        }
        DataRequest::Create { block } => {
            store.create(&block).await?;
            Status::ok().send(w).await?;
        }
        DataRequest::Move { src, dst } => {
            store.rename(&src, &dst).await?;
            Status::ok().send(w).await?;
        }
        DataRequest::Copy { src, dst } => {
            store.copy(&src, &dst).await?;
            Status::ok().send(w).await?;
        }
        DataRequest::GetSize { block } | DataRequest::Open { block } => {
            let size = store.size(&block).await?;
            Status::ok().frame()?.i64(size).send(w).await?;
        }
        DataRequest::CreateDirectory { .. } | DataRequest::DeleteDirectory { .. } => {
            Status::unsupported(op.name()).send(w).await?;
        }
    }
    Ok(())
}

/// Status header followed by the file as a chunk stream. A read error
/// after the header is sent as an in-band stream error.
async fn send_file<W>(mut file: tokio::fs::File, w: &mut W) -> BlockResult<()>
where
    W: AsyncWrite + Unpin,
{
    Status::ok().send(w).await?;
    let mut chunks = ChunkWriter::new(w);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => chunks.write(&buf[..n]).await?,
            Err(e) => {
                warn!(error = %e, "block read failed mid-stream");
                chunks.fail(&e.to_string()).await?;
                return Ok(());
            }
        }
    }
    chunks.finish().await?;
    Ok(())
}

/// Run a complete block node: data server plus heartbeat task, until
/// `shutdown` flips to `true`.
pub async fn run_data_node(config: DataNodeConfig, mut shutdown: watch::Receiver<bool>) -> BlockResult<()> {
    let store = BlockStore::open(&config.storage_root).await?;
    let server = DataServer::bind(config.bind_addr, store).await?;
    let bound = server.local_addr()?;
    let advertise = config.advertise_addr.clone().unwrap_or_else(|| bound.to_string());
    info!(node = %config.node_id, addr = %bound, advertise = %advertise, "block node starting");

    let heartbeat = HeartbeatTask::new(
        config.node_id.clone(),
        advertise,
        config.meta_addr.clone(),
        config.heartbeat_interval(),
    );
    let hb = tokio::spawn(heartbeat.run(shutdown.clone()));

    let stop = async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    };
    let result = server.serve_with_shutdown(stop).await;
    if let Err(e) = hb.await {
        warn!(error = %e, "heartbeat task aborted");
    }
    result
}
