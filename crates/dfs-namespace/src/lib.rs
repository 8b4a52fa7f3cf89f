//! Namespace tree for the distributed file system.
//!
//! [`NamespaceTree`] maps canonical paths to [`dfs_types::NamespaceEntry`]
//! records and keeps them mirrored in a [`dfs_store::MetaStore`]. It
//! enforces tree connectivity: every non-root entry has a parent directory,
//! missing ancestors are created on demand, and directories are removed
//! together with their whole subtree.

pub mod error;
pub mod tree;

pub use error::{NamespaceError, NamespaceResult};
pub use tree::NamespaceTree;
