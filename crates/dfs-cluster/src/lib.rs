//! Storage node registry for the distributed file system.
//!
//! Tracks which block-storage nodes exist, where to reach them, and whether
//! they have been heard from recently. New file content is placed through a
//! [`PlacementPolicy`]; the default picks uniformly at random.

pub mod error;
pub mod placement;
pub mod registry;

pub use error::{ClusterError, ClusterResult};
pub use placement::{PlacementPolicy, RandomPlacement};
pub use registry::{
    HeartbeatOutcome, Liveness, NodeRegistry, NodeSnapshot, RegistryConfig,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_TIMEOUT_MULTIPLIER,
};
