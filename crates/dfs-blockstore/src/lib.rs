//! Block storage node for the distributed file system.
//!
//! A node stores file content as plain files named by block id under a
//! storage root, serves them over the block protocol, and pings the
//! metadata service on a fixed interval.
//!
//! - [`BlockStore`] - local block files
//! - [`DataServer`] - TCP server for block requests
//! - [`HeartbeatTask`] - liveness pings to the metadata service
//! - [`BlockNodeClient`] - client side of the block protocol

pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod server;
pub mod store;

pub use client::BlockNodeClient;
pub use config::DataNodeConfig;
pub use error::{BlockError, BlockResult};
pub use heartbeat::HeartbeatTask;
pub use server::{run_data_node, DataServer};
pub use store::BlockStore;
