//! Client library for the distributed file system.
//!
//! [`DfsClient`] asks the metadata service where things are and moves file
//! content directly to and from block nodes. Nonzero answers surface as
//! [`ClientError::Remote`]; nothing is retried.

pub mod client;
pub mod config;
pub mod error;

pub use client::DfsClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use dfs_protocol::{LocationRecord, StatusKind};
pub use dfs_types::FileInfo;
