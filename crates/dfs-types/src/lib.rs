//! Foundation types for the distributed file system.
//!
//! Every other crate in the workspace depends on `dfs-types`. It defines the
//! records that the metadata service persists and sends over the wire, plus
//! the path rules that keep the namespace tree well formed.
//!
//! # Key Types
//!
//! - [`NamespaceEntry`] - One file or directory in the namespace tree
//! - [`BlockLocation`] - A `(node, block)` placement of file content
//! - [`NodeId`] / [`BlockId`] - Storage node name and on-disk block identifier
//! - [`FileInfo`] - The comma-joined summary returned by `get-info`
//! - [`path`] - Canonical path validation and parent/child helpers

pub mod entry;
pub mod error;
pub mod ids;
pub mod info;
pub mod path;

pub use entry::{BlockLocation, NamespaceEntry, ReplicaStatus};
pub use error::TypeError;
pub use ids::{BlockId, NodeId};
pub use info::FileInfo;
pub use path::ROOT;
