use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Metadata service address, `host:port`.
    pub meta_addr: String,
    /// Owner of created entries and requester of deletes.
    pub user: String,
    pub io_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            meta_addr: "127.0.0.1:9527".to_string(),
            user: "dfs".to_string(),
            io_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}
