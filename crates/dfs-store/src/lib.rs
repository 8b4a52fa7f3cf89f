//! Durable key/value storage for namespace metadata.
//!
//! The namespace tree persists one record per path through the
//! [`MetaStore`] trait. Two backends are provided:
//!
//! - [`InMemoryMetaStore`] for tests and throwaway clusters
//! - [`LogMetaStore`], a CRC-framed append log replayed on open

pub mod error;
pub mod log;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use log::{LogConfig, LogMetaStore, SyncMode};
pub use memory::InMemoryMetaStore;
pub use traits::{MetaStore, StoreOp};
