//! Metadata service for the distributed file system.
//!
//! Owns the namespace tree and the storage node registry, and runs the
//! coordination handlers that pair namespace changes with block node calls
//! (create, delete, copy, move). Clients reach it over the binary protocol
//! in `dfs-protocol`; block nodes reach it with heartbeats.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod server;

pub use config::{MetaConfig, NodeConfig};
pub use coordinator::{BlockClient, Coordinator, RemoteBlockClient};
pub use error::{MetaError, MetaResult};
pub use locks::{PathGuard, PathLocks};
pub use server::{open_store, MetaServer};
