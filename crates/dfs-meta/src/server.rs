use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dfs_cluster::NodeRegistry;
use dfs_namespace::NamespaceTree;
use dfs_protocol::{read_tag, FrameBuilder, MetaRequest, ProtocolError, Status};
use dfs_store::{InMemoryMetaStore, LogConfig, LogMetaStore, MetaStore};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::MetaConfig;
use crate::coordinator::{Coordinator, RemoteBlockClient};
use crate::error::{MetaError, MetaResult};

/// Open the namespace store named by the configuration.
pub async fn open_store(config: &MetaConfig) -> MetaResult<Arc<dyn MetaStore>> {
    match &config.db_path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            Ok(Arc::new(LogMetaStore::open(path, LogConfig::default())?))
        }
        None => {
            warn!("no db_path configured; namespace is kept in memory only");
            Ok(Arc::new(InMemoryMetaStore::new()))
        }
    }
}

/// TCP front end of the metadata service.
pub struct MetaServer {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    workers: Arc<Semaphore>,
    io_timeout: Duration,
}

impl MetaServer {
    /// Recover the namespace, seed the registry, and bind the listener.
    pub async fn bind(config: &MetaConfig) -> MetaResult<Self> {
        let store = open_store(config).await?;
        let tree = Arc::new(NamespaceTree::open(store)?);
        info!(entries = tree.len()?, "namespace recovered");
        let registry = Arc::new(NodeRegistry::new(config.registry_config(), config.static_nodes()?));
        let blocks = Arc::new(RemoteBlockClient::new(config.io_timeout()));
        let coordinator = Arc::new(Coordinator::new(tree, registry, blocks));
        Self::with_coordinator(config.bind_addr, coordinator, config.max_connections, config.io_timeout()).await
    }

    pub async fn with_coordinator(
        addr: SocketAddr,
        coordinator: Arc<Coordinator>,
        max_connections: usize,
        io_timeout: Duration,
    ) -> MetaResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            coordinator,
            workers: Arc::new(Semaphore::new(max_connections.max(1))),
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> MetaResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Accept connections until `shutdown` resolves. Each connection waits
    /// for a worker permit before its first request is read.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> MetaResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, workers = self.workers.available_permits(), "metadata service listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %addr, "metadata service stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "client connected");
                        let coordinator = Arc::clone(&self.coordinator);
                        let workers = Arc::clone(&self.workers);
                        let io_timeout = self.io_timeout;
                        tokio::spawn(async move {
                            let Ok(_permit) = workers.acquire_owned().await else {
                                return;
                            };
                            match handle_connection(stream, &coordinator, io_timeout).await {
                                Ok(()) => debug!(peer = %peer, "client disconnected"),
                                Err(e) => warn!(peer = %peer, error = %e, "client connection closed"),
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }
    }

    pub async fn serve(self) -> MetaResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }
}

/// Serve requests until the peer hangs up. Idle time between requests is
/// unbounded; once an opcode arrives the rest of the request and the
/// response must each finish within `io_timeout`.
async fn handle_connection(stream: TcpStream, coordinator: &Coordinator, io_timeout: Duration) -> MetaResult<()> {
    stream.set_nodelay(true)?;
    let (r, mut w) = stream.into_split();
    let mut r = BufReader::new(r);
    loop {
        let Some(tag) = read_tag(&mut r).await? else {
            return Ok(());
        };
        let req = match tokio::time::timeout(io_timeout, MetaRequest::read_body(tag, &mut r)).await {
            Ok(Ok(req)) => req,
            Ok(Err(e @ ProtocolError::UnknownOpcode(_))) => {
                warn!(error = %e, "closing connection");
                return Err(e.into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(MetaError::Timeout(io_timeout)),
        };
        let op = req.op();
        debug!(op = op.name(), "metadata request");

        let response = match respond(coordinator, req).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(op = op.name(), code = e.code(), error = %e, "metadata request failed");
                Status::error(e.code(), e.to_string()).frame()?
            }
        };
        tokio::time::timeout(io_timeout, response.send(&mut w))
            .await
            .map_err(|_| MetaError::Timeout(io_timeout))??;
    }
}

/// Run one request and build its full response.
async fn respond(c: &Coordinator, req: MetaRequest) -> MetaResult<FrameBuilder> {
    let op = req.op();
    let ok = || Status::ok().frame();
    let frame = match req {
        MetaRequest::Heartbeat { node, addr } => {
            c.heartbeat(&node, addr).await?;
            ok()?
        }
        MetaRequest::Create { path, owner, is_directory } => {
            c.create(&path, &owner, is_directory).await?;
            ok()?
        }
        MetaRequest::Rename { .. } => Status::unsupported(op.name()).frame()?,
        MetaRequest::Delete { path, requester } => {
            c.delete(&path, &requester).await?;
            ok()?
        }
        MetaRequest::List { path } => {
            let names = c.list(&path)?;
            let mut frame = ok()?.i32(count(names.len())?);
            for name in &names {
                frame = frame.string(name)?;
            }
            frame
        }
        MetaRequest::GetLocations { path } => {
            let records = c.get_locations(&path).await?;
            let mut frame = ok()?.i32(count(records.len())?);
            for record in &records {
                frame = record.append_to(frame)?;
            }
            frame
        }
        MetaRequest::Close { path } => {
            c.close(&path)?;
            ok()?
        }
        MetaRequest::GetSize { path } => ok()?.i64(c.get_size(&path)?),
        MetaRequest::SetSize { path, size } => {
            c.set_size(&path, size).await?;
            ok()?
        }
        MetaRequest::GetInfo { path } => ok()?.string(&c.get_info(&path)?)?,
        MetaRequest::Copy { src, dst } => {
            c.copy(&src, &dst).await?;
            ok()?
        }
        MetaRequest::Move { src, dst } => {
            c.move_entry(&src, &dst).await?;
            ok()?
        }
        MetaRequest::Download { path } => c.download(&path).await?.append_to(ok()?)?,
        MetaRequest::Open { path } => c.open(&path).await?.append_to(ok()?)?,
    };
    Ok(frame)
}

fn count(n: usize) -> MetaResult<i32> {
    i32::try_from(n).map_err(|_| MetaError::InvalidArgument(format!("{n} items do not fit a response")))
}
