use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// One mutation inside a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl StoreOp {
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Put { key: key.into(), value }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Ordered, durable key/value store backing the namespace tree.
///
/// Implementations must satisfy:
/// - A successful `put`/`delete`/`apply` is visible to every later read and
///   survives reopening the store (for durable backends).
/// - `scan` yields entries in ascending key order.
/// - A batch is applied entirely or not at all.
pub trait MetaStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.apply(&[StoreOp::put(key, value.to_vec())])
    }

    /// Returns `true` if the key existed.
    fn delete(&self, key: &str) -> StoreResult<bool> {
        let existed = self.get(key)?.is_some();
        self.apply(&[StoreOp::delete(key)])?;
        Ok(existed)
    }

    /// Apply several mutations atomically, in order.
    fn apply(&self, ops: &[StoreOp]) -> StoreResult<()>;

    /// Every live entry, ascending by key.
    fn scan(&self) -> StoreResult<Vec<(String, Vec<u8>)>>;

    fn len(&self) -> StoreResult<usize> {
        Ok(self.scan()?.len())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
