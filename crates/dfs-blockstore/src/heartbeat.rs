use std::time::Duration;

use dfs_protocol::{MetaRequest, Status};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{BlockError, BlockResult};

/// Periodic liveness ping from a block node to the metadata service.
///
/// Keeps one connection open, sends a heartbeat every `interval`, and
/// reconnects after any failure.
#[derive(Debug, Clone)]
pub struct HeartbeatTask {
    node_id: String,
    advertise_addr: String,
    meta_addr: String,
    interval: Duration,
}

impl HeartbeatTask {
    pub fn new(node_id: String, advertise_addr: String, meta_addr: String, interval: Duration) -> Self {
        Self {
            node_id,
            advertise_addr,
            meta_addr,
            interval,
        }
    }

    /// Send one heartbeat on `stream` and wait for the acknowledgement.
    pub async fn beat(&self, stream: &mut TcpStream) -> BlockResult<()> {
        let req = MetaRequest::Heartbeat {
            node: self.node_id.clone(),
            addr: self.advertise_addr.clone(),
        };
        stream.write_all(&req.encode()?).await?;
        let status = Status::read_from(stream).await?;
        if !status.is_ok() {
            return Err(BlockError::Remote {
                code: status.code,
                message: status.message,
            });
        }
        Ok(())
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(node = %self.node_id, meta = %self.meta_addr, every_secs = self.interval.as_secs(), "heartbeat task started");
        let mut conn: Option<TcpStream> = None;
        loop {
            if *shutdown.borrow() {
                break;
            }

            if conn.is_none() {
                match TcpStream::connect(&self.meta_addr).await {
                    Ok(s) => {
                        debug!(meta = %self.meta_addr, "heartbeat connection established");
                        conn = Some(s);
                    }
                    Err(e) => warn!(meta = %self.meta_addr, error = %e, "metadata service unreachable"),
                }
            }
            if let Some(stream) = conn.as_mut() {
                let limit = self.interval.max(Duration::from_secs(1));
                let sent = tokio::time::timeout(limit, self.beat(stream)).await;
                match sent {
                    Ok(Ok(())) => debug!(node = %self.node_id, "heartbeat sent"),
                    Ok(Err(e)) => {
                        warn!(error = %e, "heartbeat failed; reconnecting");
                        conn = None;
                    }
                    Err(_) => {
                        warn!("heartbeat timed out; reconnecting");
                        conn = None;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(node = %self.node_id, "heartbeat task stopped");
    }
}
