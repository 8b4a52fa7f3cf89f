use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dfs_store::{MetaStore, StoreOp};
use dfs_types::{path, BlockLocation, NamespaceEntry, ReplicaStatus};
use tracing::{debug, info, warn};

use crate::error::{NamespaceError, NamespaceResult};

#[derive(Default)]
struct TreeState {
    entries: HashMap<String, NamespaceEntry>,
    /// Parent path -> child paths. Rebuilt on load, never persisted.
    children: HashMap<String, BTreeSet<String>>,
}

impl TreeState {
    fn insert(&mut self, entry: NamespaceEntry) {
        if let Some(parent) = entry.parent_path() {
            self.children
                .entry(parent.to_string())
                .or_default()
                .insert(entry.path.clone());
        }
        self.entries.insert(entry.path.clone(), entry);
    }

    fn remove(&mut self, p: &str) -> Option<NamespaceEntry> {
        let entry = self.entries.remove(p)?;
        if let Some(parent) = path::parent(p) {
            if let Some(set) = self.children.get_mut(parent) {
                set.remove(p);
                if set.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
        self.children.remove(p);
        Some(entry)
    }

    fn get(&self, p: &str) -> NamespaceResult<&NamespaceEntry> {
        self.entries
            .get(p)
            .ok_or_else(|| NamespaceError::NotFound(p.to_string()))
    }

    fn get_file(&self, p: &str) -> NamespaceResult<&NamespaceEntry> {
        let entry = self.get(p)?;
        if entry.is_directory {
            return Err(NamespaceError::IsADirectory(p.to_string()));
        }
        Ok(entry)
    }

    fn ensure_free(&self, p: &str) -> NamespaceResult<()> {
        if self.entries.contains_key(p) {
            return Err(NamespaceError::AlreadyExists(p.to_string()));
        }
        Ok(())
    }

    /// Directory entries that must be created before `p` can exist.
    fn missing_ancestors(&self, p: &str, owner: &str) -> NamespaceResult<Vec<NamespaceEntry>> {
        let mut missing = Vec::new();
        for ancestor in path::ancestors(p) {
            match self.entries.get(ancestor) {
                Some(e) if !e.is_directory => {
                    return Err(NamespaceError::NotADirectory(ancestor.to_string()))
                }
                Some(_) => {}
                None => missing.push(NamespaceEntry::directory(ancestor, owner)),
            }
        }
        Ok(missing)
    }

    /// `p` and all its descendants, children before parents.
    fn subtree(&self, p: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_post_order(p, &mut out);
        out
    }

    fn collect_post_order(&self, p: &str, out: &mut Vec<String>) {
        if let Some(kids) = self.children.get(p) {
            for kid in kids {
                self.collect_post_order(kid, out);
            }
        }
        out.push(p.to_string());
    }

    fn files_in(&self, p: &str) -> impl Iterator<Item = &NamespaceEntry> {
        self.subtree(p)
            .into_iter()
            .filter_map(|q| self.entries.get(&q))
            .filter(|e| !e.is_directory)
            .collect::<Vec<_>>()
            .into_iter()
    }
}

fn encode(entry: &NamespaceEntry) -> NamespaceResult<Vec<u8>> {
    bincode::serialize(entry).map_err(|e| NamespaceError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> NamespaceResult<NamespaceEntry> {
    bincode::deserialize(bytes).map_err(|e| NamespaceError::Serialization(e.to_string()))
}

/// The authoritative directory tree.
///
/// Every mutation is written to the durable store first and applied to the
/// in-memory map only once the store accepted it, both under the same write
/// lock. A failed store write therefore leaves the tree untouched.
pub struct NamespaceTree {
    store: Arc<dyn MetaStore>,
    state: RwLock<TreeState>,
}

impl NamespaceTree {
    /// Rebuild the tree from `store`, iterating keys in order.
    ///
    /// Stored entries whose parent is missing or is a file are skipped, so
    /// the loaded tree is always connected. The root is created if absent.
    pub fn open(store: Arc<dyn MetaStore>) -> NamespaceResult<Self> {
        let mut state = TreeState::default();
        state.insert(NamespaceEntry::root());
        let mut root_stored = false;
        let mut skipped = 0usize;

        for (key, value) in store.scan()? {
            let entry = match decode(&value) {
                Ok(e) => e,
                Err(e) => {
                    warn!(path = %key, error = %e, "undecodable namespace record; skipping");
                    skipped += 1;
                    continue;
                }
            };
            if entry.path != key || path::validate(&key).is_err() {
                warn!(key = %key, path = %entry.path, "namespace record under wrong key; skipping");
                skipped += 1;
                continue;
            }
            if entry.is_root() {
                root_stored = true;
                state.insert(entry);
                continue;
            }
            let parent_ok = entry
                .parent_path()
                .and_then(|p| state.entries.get(p))
                .is_some_and(|p| p.is_directory);
            if !parent_ok {
                warn!(path = %key, "orphaned namespace record; skipping");
                skipped += 1;
                continue;
            }
            state.insert(entry);
        }

        if !root_stored {
            store.put(path::ROOT, &encode(&NamespaceEntry::root())?)?;
        }
        info!(entries = state.entries.len(), skipped, "namespace recovered");

        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> NamespaceResult<RwLockReadGuard<'_, TreeState>> {
        self.state.read().map_err(|_| NamespaceError::Poisoned)
    }

    fn write(&self) -> NamespaceResult<RwLockWriteGuard<'_, TreeState>> {
        self.state.write().map_err(|_| NamespaceError::Poisoned)
    }

    fn persist(&self, puts: &[NamespaceEntry], deletes: &[String]) -> NamespaceResult<()> {
        let mut ops: Vec<StoreOp> = deletes.iter().map(|p| StoreOp::delete(p.clone())).collect();
        for entry in puts {
            ops.push(StoreOp::put(entry.path.clone(), encode(entry)?));
        }
        self.store.apply(&ops)?;
        Ok(())
    }

    /// Create a file or directory, auto-creating missing ancestor
    /// directories owned by `owner`.
    pub fn create(&self, p: &str, owner: &str, is_directory: bool) -> NamespaceResult<NamespaceEntry> {
        path::validate(p)?;
        let mut state = self.write()?;
        state.ensure_free(p)?;

        let mut created = state.missing_ancestors(p, owner)?;
        let entry = if is_directory {
            NamespaceEntry::directory(p, owner)
        } else {
            NamespaceEntry::file(p, owner)
        };
        created.push(entry.clone());

        self.persist(&created, &[])?;
        for e in created {
            debug!(path = %e.path, dir = e.is_directory, "namespace entry created");
            state.insert(e);
        }
        Ok(entry)
    }

    pub fn get(&self, p: &str) -> NamespaceResult<NamespaceEntry> {
        self.read()?.get(p).cloned()
    }

    pub fn contains(&self, p: &str) -> NamespaceResult<bool> {
        Ok(self.read()?.entries.contains_key(p))
    }

    /// Number of entries, root included.
    pub fn len(&self) -> NamespaceResult<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> NamespaceResult<bool> {
        Ok(self.len()? <= 1)
    }

    /// Remove `p` and, for a directory, its whole subtree (children first).
    ///
    /// Only the owner of `p` itself is checked. Returns the removed entries
    /// so callers can clean up their content.
    pub fn remove(&self, p: &str, requester: &str) -> NamespaceResult<Vec<NamespaceEntry>> {
        path::validate(p)?;
        let mut state = self.write()?;
        let entry = state.get(p)?;
        if entry.owner != requester {
            return Err(NamespaceError::PermissionDenied {
                path: p.to_string(),
                requester: requester.to_string(),
                owner: entry.owner.clone(),
            });
        }
        self.remove_locked(&mut state, p)
    }

    /// Remove without an ownership check. Used for compensation and for
    /// clearing a copy/move destination.
    pub fn purge(&self, p: &str) -> NamespaceResult<Vec<NamespaceEntry>> {
        path::validate(p)?;
        let mut state = self.write()?;
        state.get(p)?;
        self.remove_locked(&mut state, p)
    }

    fn remove_locked(&self, state: &mut TreeState, p: &str) -> NamespaceResult<Vec<NamespaceEntry>> {
        if p == path::ROOT {
            return Err(NamespaceError::InvalidOperation {
                path: p.to_string(),
                reason: "the root cannot be removed",
            });
        }
        let doomed = state.subtree(p);
        self.persist(&[], &doomed)?;
        let removed: Vec<NamespaceEntry> = doomed.iter().filter_map(|q| state.remove(q)).collect();
        debug!(path = %p, count = removed.len(), "namespace entries removed");
        Ok(removed)
    }

    /// Names of the direct children of `p`, sorted. Empty for files.
    pub fn list_children(&self, p: &str) -> NamespaceResult<Vec<String>> {
        let state = self.read()?;
        state.get(p)?;
        Ok(state
            .children
            .get(p)
            .map(|kids| kids.iter().map(|k| path::file_name(k).to_string()).collect())
            .unwrap_or_default())
    }

    fn update_file<F>(&self, p: &str, mutate: F) -> NamespaceResult<NamespaceEntry>
    where
        F: FnOnce(&mut NamespaceEntry),
    {
        let mut state = self.write()?;
        let mut entry = state.get_file(p)?.clone();
        mutate(&mut entry);
        self.persist(std::slice::from_ref(&entry), &[])?;
        state.insert(entry.clone());
        Ok(entry)
    }

    pub fn update_size(&self, p: &str, size: i64) -> NamespaceResult<NamespaceEntry> {
        if size < 0 {
            return Err(NamespaceError::InvalidOperation {
                path: p.to_string(),
                reason: "size must not be negative",
            });
        }
        self.update_file(p, |e| e.size = size)
    }

    pub fn append_location(&self, p: &str, location: BlockLocation) -> NamespaceResult<NamespaceEntry> {
        self.update_file(p, |e| {
            e.locations.push(location);
            e.replica_status.push(ReplicaStatus::Unknown);
        })
    }

    pub fn set_locations(&self, p: &str, locations: Vec<BlockLocation>) -> NamespaceResult<NamespaceEntry> {
        self.update_file(p, |e| {
            e.replica_status = vec![ReplicaStatus::Unknown; locations.len()];
            e.locations = locations;
        })
    }

    /// Relocate `src` (and every descendant) to `dst`, keeping content
    /// locations. `dst` must not exist; its missing ancestors are created.
    pub fn rename(&self, src: &str, dst: &str) -> NamespaceResult<NamespaceEntry> {
        path::validate(src)?;
        path::validate(dst)?;
        let mut state = self.write()?;
        let source = state.get(src)?.clone();
        if source.is_root() {
            return Err(NamespaceError::InvalidOperation {
                path: src.to_string(),
                reason: "the root cannot be moved",
            });
        }
        state.ensure_free(dst)?;
        if path::is_within(dst, src) {
            return Err(NamespaceError::InvalidOperation {
                path: dst.to_string(),
                reason: "cannot move a directory into itself",
            });
        }

        let mut puts = state.missing_ancestors(dst, &source.owner)?;
        let old_paths = state.subtree(src);
        let moved: Vec<NamespaceEntry> = old_paths
            .iter()
            .filter_map(|old| state.entries.get(old))
            .map(|e| e.relocated(&path::rebase(&e.path, src, dst)))
            .collect();
        puts.extend(moved);

        self.persist(&puts, &old_paths)?;
        for old in &old_paths {
            state.remove(old);
        }
        for e in puts {
            state.insert(e);
        }
        debug!(src, dst, count = old_paths.len(), "namespace entries renamed");
        state.get(dst).cloned()
    }

    /// Create a file at `dst` with the size and owner of `src` and its own
    /// `locations`. `dst` must not exist; its missing ancestors are created.
    pub fn insert_copy(
        &self,
        src: &str,
        dst: &str,
        locations: Vec<BlockLocation>,
    ) -> NamespaceResult<NamespaceEntry> {
        path::validate(src)?;
        path::validate(dst)?;
        let mut state = self.write()?;
        let source = state.get_file(src)?;
        state.ensure_free(dst)?;

        let mut copy = NamespaceEntry::file(dst, &source.owner);
        copy.size = source.size;
        copy.replica_status = vec![ReplicaStatus::Unknown; locations.len()];
        copy.locations = locations;

        let mut puts = state.missing_ancestors(dst, &source.owner)?;
        puts.push(copy.clone());
        self.persist(&puts, &[])?;
        for e in puts {
            state.insert(e);
        }
        Ok(copy)
    }

    /// Size of a file, or the recursive sum of file sizes under a directory.
    pub fn directory_size(&self, p: &str) -> NamespaceResult<i64> {
        let state = self.read()?;
        let entry = state.get(p)?;
        if !entry.is_directory {
            return Ok(entry.size);
        }
        Ok(state.files_in(p).map(|e| e.size.max(0)).sum())
    }

    /// Every content location of every file at or under `p`.
    pub fn subtree_locations(&self, p: &str) -> NamespaceResult<Vec<BlockLocation>> {
        let state = self.read()?;
        state.get(p)?;
        Ok(state
            .files_in(p)
            .flat_map(|e| e.locations.iter().cloned())
            .collect())
    }
}
