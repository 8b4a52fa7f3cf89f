//! Storage node membership and heartbeat liveness.
//!
//! Liveness is observational: it is logged and reported, never used to
//! exclude a node from placement.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dfs_types::{BlockId, NodeId};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::placement::{PlacementPolicy, RandomPlacement};

/// Heartbeat interval used by block nodes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
/// Missed heartbeats before a node is SUSPECT.
pub const DEFAULT_TIMEOUT_MULTIPLIER: u32 = 20;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_interval: Duration,
    pub timeout_multiplier: u32,
}

impl RegistryConfig {
    /// Silence longer than this marks a node SUSPECT.
    pub fn timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_multiplier
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Liveness {
    /// Never heard from.
    Unknown,
    Alive,
    /// Silent for longer than the timeout.
    Suspect,
}

/// What a heartbeat changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// First heartbeat from a node absent from the static list.
    Registered,
    /// First heartbeat from a statically configured node.
    FirstContact,
    /// Heartbeat after a gap longer than the timeout.
    Recovered,
    Refreshed,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    addr: String,
    last_heartbeat: Option<Instant>,
    /// Last state reported by `sweep`, used to log transitions once.
    observed: Liveness,
}

impl NodeRecord {
    fn new(addr: String) -> Self {
        Self {
            addr,
            last_heartbeat: None,
            observed: Liveness::Unknown,
        }
    }

    fn liveness_at(&self, now: Instant, timeout: Duration) -> Liveness {
        match self.last_heartbeat {
            None => Liveness::Unknown,
            Some(t) if now.saturating_duration_since(t) > timeout => Liveness::Suspect,
            Some(_) => Liveness::Alive,
        }
    }
}

/// Point-in-time view of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub addr: String,
    pub liveness: Liveness,
}

/// Authoritative list of storage nodes.
pub struct NodeRegistry {
    config: RegistryConfig,
    nodes: RwLock<BTreeMap<NodeId, NodeRecord>>,
    policy: Arc<dyn PlacementPolicy>,
}

impl NodeRegistry {
    /// Registry seeded with static membership `(id, data address)`.
    pub fn new(config: RegistryConfig, static_nodes: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        let nodes = static_nodes
            .into_iter()
            .map(|(id, addr)| (id, NodeRecord::new(addr)))
            .collect();
        Self {
            config,
            nodes: RwLock::new(nodes),
            policy: Arc::new(RandomPlacement),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PlacementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub async fn heartbeat(&self, node: NodeId, addr: String) -> HeartbeatOutcome {
        self.heartbeat_at(node, addr, Instant::now()).await
    }

    /// Record a heartbeat received at `now`. An empty `addr` keeps the
    /// address already on record.
    pub async fn heartbeat_at(&self, node: NodeId, addr: String, now: Instant) -> HeartbeatOutcome {
        let timeout = self.config.timeout();
        let mut nodes = self.nodes.write().await;

        let Some(record) = nodes.get_mut(&node) else {
            let mut record = NodeRecord::new(addr);
            record.last_heartbeat = Some(now);
            record.observed = Liveness::Alive;
            info!(node = %node, addr = %record.addr, "storage node registered via heartbeat");
            nodes.insert(node, record);
            return HeartbeatOutcome::Registered;
        };

        if !addr.is_empty() && record.addr != addr {
            info!(node = %node, old = %record.addr, new = %addr, "storage node address changed");
            record.addr = addr;
        }

        let outcome = match record.last_heartbeat {
            None => {
                info!(node = %node, addr = %record.addr, "storage node registered");
                HeartbeatOutcome::FirstContact
            }
            Some(last) => {
                let gap = now.saturating_duration_since(last);
                if gap > timeout {
                    info!(node = %node, gap_secs = gap.as_secs(), "storage node recovered");
                    HeartbeatOutcome::Recovered
                } else {
                    debug!(node = %node, "heartbeat");
                    HeartbeatOutcome::Refreshed
                }
            }
        };
        record.last_heartbeat = Some(now);
        record.observed = Liveness::Alive;
        outcome
    }

    /// `None` if the node was never configured nor heard from.
    pub async fn liveness(&self, node: &NodeId) -> Option<Liveness> {
        self.liveness_at(node, Instant::now()).await
    }

    pub async fn liveness_at(&self, node: &NodeId, now: Instant) -> Option<Liveness> {
        let timeout = self.config.timeout();
        self.nodes
            .read()
            .await
            .get(node)
            .map(|r| r.liveness_at(now, timeout))
    }

    pub async fn sweep(&self) -> Vec<NodeId> {
        self.sweep_at(Instant::now()).await
    }

    /// Recompute liveness, log every ALIVE to SUSPECT transition, and return
    /// the nodes currently SUSPECT.
    pub async fn sweep_at(&self, now: Instant) -> Vec<NodeId> {
        let timeout = self.config.timeout();
        let mut nodes = self.nodes.write().await;
        let mut suspects = Vec::new();
        for (id, record) in nodes.iter_mut() {
            let current = record.liveness_at(now, timeout);
            if current == Liveness::Suspect {
                if record.observed == Liveness::Alive {
                    warn!(node = %id, timeout_secs = timeout.as_secs(), "storage node suspect: heartbeats missed");
                }
                suspects.push(id.clone());
            }
            record.observed = current;
        }
        suspects
    }

    pub async fn address(&self, node: &NodeId) -> ClusterResult<String> {
        self.nodes
            .read()
            .await
            .get(node)
            .map(|r| r.addr.clone())
            .ok_or_else(|| ClusterError::UnknownNode(node.to_string()))
    }

    pub async fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.snapshot_at(Instant::now()).await
    }

    pub async fn snapshot_at(&self, now: Instant) -> Vec<NodeSnapshot> {
        let timeout = self.config.timeout();
        self.nodes
            .read()
            .await
            .iter()
            .map(|(id, r)| NodeSnapshot {
                id: id.clone(),
                addr: r.addr.clone(),
                liveness: r.liveness_at(now, timeout),
            })
            .collect()
    }

    /// Pick the node for new content and mint its block id.
    pub async fn place(&self, size_hint: i64) -> ClusterResult<(NodeId, BlockId)> {
        let now = Instant::now();
        self.sweep_at(now).await;
        let candidates = self.snapshot_at(now).await;
        let node = self
            .policy
            .choose(&candidates, size_hint)
            .ok_or(ClusterError::PlacementUnavailable)?;
        debug!(node = %node, policy = self.policy.name(), size_hint, "placement chosen");
        Ok((node, BlockId::generate()))
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            RegistryConfig::default(),
            vec![
                (id("dfs101"), "10.0.0.1:9526".to_string()),
                (id("dfs102"), "10.0.0.2:9526".to_string()),
            ],
        )
    }

    #[test]
    fn default_timeout_is_twenty_heartbeats() {
        assert_eq!(RegistryConfig::default().timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn static_nodes_start_unknown() {
        let reg = registry();
        assert_eq!(reg.liveness(&id("dfs101")).await, Some(Liveness::Unknown));
        assert_eq!(reg.liveness(&id("nope")).await, None);
        assert_eq!(reg.address(&id("dfs102")).await.unwrap(), "10.0.0.2:9526");
        assert!(matches!(reg.address(&id("nope")).await, Err(ClusterError::UnknownNode(_))));
    }

    #[tokio::test]
    async fn liveness_transitions() {
        let reg = registry();
        let t0 = Instant::now();
        let n = id("dfs101");

        assert_eq!(reg.heartbeat_at(n.clone(), String::new(), t0).await, HeartbeatOutcome::FirstContact);
        assert_eq!(reg.liveness_at(&n, t0 + Duration::from_secs(59)).await, Some(Liveness::Alive));
        assert_eq!(reg.liveness_at(&n, t0 + Duration::from_secs(61)).await, Some(Liveness::Suspect));

        let suspects = reg.sweep_at(t0 + Duration::from_secs(61)).await;
        assert_eq!(suspects, vec![n.clone()]);

        let t1 = t0 + Duration::from_secs(90);
        assert_eq!(reg.heartbeat_at(n.clone(), String::new(), t1).await, HeartbeatOutcome::Recovered);
        assert_eq!(reg.liveness_at(&n, t1).await, Some(Liveness::Alive));
        assert_eq!(
            reg.heartbeat_at(n.clone(), String::new(), t1 + Duration::from_secs(3)).await,
            HeartbeatOutcome::Refreshed
        );
        // address kept when heartbeat carries none
        assert_eq!(reg.address(&n).await.unwrap(), "10.0.0.1:9526");
    }

    #[tokio::test]
    async fn unknown_node_registers_dynamically() {
        let reg = registry();
        let outcome = reg.heartbeat(id("dfs900"), "10.0.0.9:9526".into()).await;
        assert_eq!(outcome, HeartbeatOutcome::Registered);
        assert_eq!(reg.len().await, 3);
        assert_eq!(reg.address(&id("dfs900")).await.unwrap(), "10.0.0.9:9526");
        assert_eq!(reg.liveness(&id("dfs900")).await, Some(Liveness::Alive));
    }

    #[tokio::test]
    async fn heartbeat_updates_address() {
        let reg = registry();
        reg.heartbeat(id("dfs101"), "127.0.0.1:7000".into()).await;
        assert_eq!(reg.address(&id("dfs101")).await.unwrap(), "127.0.0.1:7000");
    }

    #[tokio::test]
    async fn placement_ignores_liveness_and_mints_fresh_blocks() {
        let reg = registry();
        // dfs101 never heartbeats, dfs102 is alive: both must be eligible.
        reg.heartbeat(id("dfs102"), String::new()).await;
        let mut seen = std::collections::HashSet::new();
        let mut blocks = std::collections::HashSet::new();
        for _ in 0..200 {
            let (node, block) = reg.place(0).await.unwrap();
            seen.insert(node);
            assert!(blocks.insert(block));
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn empty_registry_cannot_place() {
        let reg = NodeRegistry::new(RegistryConfig::default(), Vec::new());
        assert!(reg.is_empty().await);
        assert!(matches!(reg.place(1).await, Err(ClusterError::PlacementUnavailable)));
    }

    struct First;

    impl PlacementPolicy for First {
        fn choose(&self, candidates: &[NodeSnapshot], _size_hint: i64) -> Option<NodeId> {
            candidates.first().map(|n| n.id.clone())
        }
        fn name(&self) -> &'static str {
            "first"
        }
    }

    #[tokio::test]
    async fn custom_policy() {
        let reg = registry().with_policy(Arc::new(First));
        for _ in 0..10 {
            assert_eq!(reg.place(0).await.unwrap().0, id("dfs101"));
        }
    }
}
