use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one block storage node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNodeConfig {
    /// Stable node name reported in heartbeats.
    pub node_id: String,
    pub bind_addr: SocketAddr,
    /// Address the metadata service hands to clients. Defaults to
    /// `bind_addr` (after the listener is bound, so port 0 works).
    pub advertise_addr: Option<String>,
    /// Directory holding one file per block.
    pub storage_root: PathBuf,
    /// Metadata service address heartbeats are sent to.
    pub meta_addr: String,
    pub heartbeat_interval_secs: u64,
}

impl DataNodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            node_id: "dfs101".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9526)),
            advertise_addr: None,
            storage_root: PathBuf::from("./dfs-data"),
            meta_addr: "127.0.0.1:9527".to_string(),
            heartbeat_interval_secs: 3,
        }
    }
}
