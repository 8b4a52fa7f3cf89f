use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dfs_cluster::RegistryConfig;
use dfs_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// A statically configured block node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Data address, `host:port`.
    pub addr: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    pub bind_addr: SocketAddr,
    /// Namespace log file. `None` keeps the namespace in memory only.
    pub db_path: Option<PathBuf>,
    pub nodes: Vec<NodeConfig>,
    pub heartbeat_interval_secs: u64,
    /// Missed heartbeats before a node is SUSPECT.
    pub heartbeat_timeout_multiplier: u32,
    /// Concurrent client connections served.
    pub max_connections: usize,
    /// Bound on request reads, response writes, and block node calls.
    pub io_timeout_secs: u64,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9527)),
            db_path: Some(PathBuf::from("./dfs-meta/namespace.log")),
            nodes: ["dfs101", "dfs102", "dfs103"]
                .into_iter()
                .map(|id| NodeConfig {
                    id: id.to_string(),
                    addr: format!("{id}:9526"),
                })
                .collect(),
            heartbeat_interval_secs: 3,
            heartbeat_timeout_multiplier: 20,
            max_connections: 100,
            io_timeout_secs: 30,
        }
    }
}

impl MetaConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            timeout_multiplier: self.heartbeat_timeout_multiplier.max(1),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }

    pub fn static_nodes(&self) -> MetaResult<Vec<(NodeId, String)>> {
        self.nodes
            .iter()
            .map(|n| {
                NodeId::new(n.id.as_str())
                    .map(|id| (id, n.addr.clone()))
                    .map_err(|e| MetaError::InvalidArgument(format!("node {:?}: {e}", n.id)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let c = MetaConfig::default();
        assert_eq!(c.bind_addr.port(), 9527);
        assert_eq!(c.max_connections, 100);
        assert_eq!(c.registry_config().timeout(), Duration::from_secs(60));
        let ids: Vec<String> = c.static_nodes().unwrap().into_iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["dfs101", "dfs102", "dfs103"]);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: MetaConfig = toml::from_str(
            r#"
            bind_addr = "127.0.0.1:7000"
            [[nodes]]
            id = "n1"
            addr = "127.0.0.1:7001"
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 7000);
        assert_eq!(c.nodes.len(), 1);
        assert_eq!(c.heartbeat_interval_secs, 3);
    }

    #[test]
    fn bad_node_id_rejected() {
        let c = MetaConfig {
            nodes: vec![NodeConfig { id: "a:b".into(), addr: "x:1".into() }],
            ..MetaConfig::default()
        };
        assert!(c.static_nodes().is_err());
    }
}
