use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{poisoned, StoreResult};
use crate::traits::{MetaStore, StoreOp};

/// In-memory, BTreeMap-based store.
///
/// Intended for tests and ephemeral clusters; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn apply_to(map: &mut BTreeMap<String, Vec<u8>>, ops: &[StoreOp]) {
    for op in ops {
        match op {
            StoreOp::Put { key, value } => {
                map.insert(key.clone(), value.clone());
            }
            StoreOp::Delete { key } => {
                map.remove(key);
            }
        }
    }
}

impl MetaStore for InMemoryMetaStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn apply(&self, ops: &[StoreOp]) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        apply_to(&mut map, ops);
        Ok(())
    }

    fn scan(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}
