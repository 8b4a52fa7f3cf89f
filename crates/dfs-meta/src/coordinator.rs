//! Multi-step handlers that keep the namespace and the block nodes in step.
//!
//! There is no distributed transaction: each handler runs its steps in a
//! fixed order and, when a content step fails after metadata was written,
//! undoes the metadata. A failed undo is reported as
//! [`MetaError::CompensationFailed`] and never swallowed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dfs_blockstore::{BlockError, BlockNodeClient, BlockResult};
use dfs_cluster::{HeartbeatOutcome, NodeRegistry};
use dfs_namespace::{NamespaceError, NamespaceTree};
use dfs_protocol::LocationRecord;
use dfs_types::{path, BlockId, BlockLocation, FileInfo, NamespaceEntry, NodeId};
use tracing::{debug, error, info, warn};

use crate::error::{MetaError, MetaResult};
use crate::locks::PathLocks;

/// Block node calls issued by the coordinator, addressed by data address.
#[async_trait]
pub trait BlockClient: Send + Sync {
    async fn create(&self, addr: &str, block: &BlockId) -> BlockResult<()>;

    async fn delete(&self, addr: &str, block: &BlockId) -> BlockResult<()>;

    /// Copy `src` into `dst` on the node itself.
    async fn copy(&self, addr: &str, src: &BlockId, dst: &BlockId) -> BlockResult<()>;
}

/// [`BlockClient`] over TCP, one short-lived connection per call.
#[derive(Debug, Clone)]
pub struct RemoteBlockClient {
    io_timeout: Duration,
}

impl RemoteBlockClient {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

#[async_trait]
impl BlockClient for RemoteBlockClient {
    async fn create(&self, addr: &str, block: &BlockId) -> BlockResult<()> {
        BlockNodeClient::connect(addr, self.io_timeout).await?.create(block).await
    }

    async fn delete(&self, addr: &str, block: &BlockId) -> BlockResult<()> {
        BlockNodeClient::connect(addr, self.io_timeout).await?.delete(block).await
    }

    async fn copy(&self, addr: &str, src: &BlockId, dst: &BlockId) -> BlockResult<()> {
        BlockNodeClient::connect(addr, self.io_timeout).await?.copy(src, dst).await
    }
}

fn is_missing_block(e: &BlockError) -> bool {
    e.code() == dfs_protocol::codes::NOT_FOUND
}

fn check_path(p: &str) -> MetaResult<()> {
    path::validate(p).map_err(|e| MetaError::Namespace(NamespaceError::from(e)))
}

/// Index of the location a copy reads from: stable for a given path.
fn copy_source_index(src: &str, count: usize) -> usize {
    crc32fast::hash(src.as_bytes()) as usize % count
}

/// Sequences namespace mutations with block node calls.
pub struct Coordinator {
    tree: Arc<NamespaceTree>,
    registry: Arc<NodeRegistry>,
    blocks: Arc<dyn BlockClient>,
    locks: PathLocks,
}

impl Coordinator {
    pub fn new(tree: Arc<NamespaceTree>, registry: Arc<NodeRegistry>, blocks: Arc<dyn BlockClient>) -> Self {
        Self {
            tree,
            registry,
            blocks,
            locks: PathLocks::new(),
        }
    }

    pub fn tree(&self) -> &NamespaceTree {
        &self.tree
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub async fn heartbeat(&self, node: &str, addr: String) -> MetaResult<HeartbeatOutcome> {
        let id = NodeId::new(node).map_err(|e| MetaError::InvalidArgument(e.to_string()))?;
        Ok(self.registry.heartbeat(id, addr).await)
    }

    /// Create a file or directory. A file also gets an empty block on a
    /// placed node; if that fails the new entry is removed again.
    pub async fn create(&self, p: &str, owner: &str, is_directory: bool) -> MetaResult<NamespaceEntry> {
        check_path(p)?;
        if owner.contains(',') {
            return Err(MetaError::InvalidArgument(format!("owner {owner:?} contains ','")));
        }
        let _guard = self.locks.lock(&[p]).await;
        let entry = self.tree.create(p, owner, is_directory)?;
        if is_directory {
            info!(path = %p, owner, "directory created");
            return Ok(entry);
        }
        match self.place_content(p).await {
            Ok(entry) => {
                info!(path = %p, owner, "file created");
                Ok(entry)
            }
            Err(e) => Err(self.compensate("create", p, e)),
        }
    }

    async fn place_content(&self, p: &str) -> MetaResult<NamespaceEntry> {
        let (node, block) = self.registry.place(0).await?;
        let addr = self.registry.address(&node).await?;
        self.blocks
            .create(&addr, &block)
            .await
            .map_err(|source| MetaError::Storage { node: node.to_string(), source })?;
        let location = BlockLocation::new(node, block);
        match self.tree.append_location(p, location.clone()) {
            Ok(entry) => Ok(entry),
            Err(e) => {
                self.delete_block(&location).await;
                Err(e.into())
            }
        }
    }

    /// Undo a just-created entry after `cause`. Returns the error to report.
    fn compensate(&self, operation: &'static str, p: &str, cause: MetaError) -> MetaError {
        warn!(operation, path = %p, error = %cause, "rolling back namespace entry");
        match self.tree.purge(p) {
            Ok(_) | Err(NamespaceError::NotFound(_)) => cause,
            Err(undo) => {
                error!(operation, path = %p, cause = %cause, error = %undo, "compensation failed; namespace and storage disagree");
                MetaError::CompensationFailed {
                    operation,
                    path: p.to_string(),
                    cause: format!("{cause}; rollback: {undo}"),
                }
            }
        }
    }

    /// Delete a file or a directory subtree. Content cleanup runs after the
    /// metadata is gone and only logs its failures.
    pub async fn delete(&self, p: &str, requester: &str) -> MetaResult<()> {
        check_path(p)?;
        let _guard = self.locks.lock(&[p]).await;
        // Taken from the removed entries themselves, so a file created
        // under a directory while it is being deleted still loses its block.
        let locations: Vec<BlockLocation> = self
            .tree
            .remove(p, requester)?
            .into_iter()
            .flat_map(|e| e.locations)
            .collect();
        info!(path = %p, blocks = locations.len(), "deleted");
        for location in &locations {
            self.delete_block(location).await;
        }
        Ok(())
    }

    /// Best effort: failures are logged.
    async fn delete_block(&self, location: &BlockLocation) {
        let addr = match self.registry.address(&location.node).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(location = %location, error = %e, "block delete skipped");
                return;
            }
        };
        match self.blocks.delete(&addr, &location.block).await {
            Ok(()) => debug!(location = %location, "block deleted"),
            Err(e) => warn!(location = %location, addr = %addr, error = %e, "block delete failed"),
        }
    }

    /// Delete the content of an existing file that is about to be replaced.
    /// A block already gone is fine; any other failure aborts the caller.
    async fn clear_content(&self, entry: &NamespaceEntry) -> MetaResult<()> {
        for location in &entry.locations {
            let addr = self.registry.address(&location.node).await?;
            match self.blocks.delete(&addr, &location.block).await {
                Ok(()) => {}
                Err(e) if is_missing_block(&e) => {
                    debug!(location = %location, "replaced block already gone")
                }
                Err(source) => {
                    return Err(MetaError::Storage {
                        node: location.node.to_string(),
                        source,
                    })
                }
            }
        }
        self.tree.purge(&entry.path)?;
        Ok(())
    }

    pub fn list(&self, p: &str) -> MetaResult<Vec<String>> {
        Ok(self.tree.list_children(p)?)
    }

    async fn resolve(&self, location: &BlockLocation) -> MetaResult<LocationRecord> {
        Ok(LocationRecord {
            node: location.node.clone(),
            addr: self.registry.address(&location.node).await?,
            block: location.block.clone(),
        })
    }

    /// Every location of `p` with its node's current address. Empty for
    /// directories.
    pub async fn get_locations(&self, p: &str) -> MetaResult<Vec<LocationRecord>> {
        let entry = self.tree.get(p)?;
        let mut records = Vec::with_capacity(entry.locations.len());
        for location in &entry.locations {
            records.push(self.resolve(location).await?);
        }
        Ok(records)
    }

    fn file(&self, p: &str) -> MetaResult<NamespaceEntry> {
        let entry = self.tree.get(p)?;
        if entry.is_directory {
            return Err(NamespaceError::IsADirectory(p.to_string()).into());
        }
        Ok(entry)
    }

    /// Nothing to release; only checks that `p` is a file.
    pub fn close(&self, p: &str) -> MetaResult<()> {
        self.file(p).map(|_| ())
    }

    pub fn get_size(&self, p: &str) -> MetaResult<i64> {
        Ok(self.tree.directory_size(p)?)
    }

    /// Record a new size ahead of a content write. The write itself goes
    /// from the client to the block node, so a crash in between leaves
    /// the size ahead of the content.
    pub async fn set_size(&self, p: &str, size: i64) -> MetaResult<()> {
        let _guard = self.locks.lock(&[p]).await;
        self.tree.update_size(p, size)?;
        debug!(path = %p, size, "size updated");
        Ok(())
    }

    pub fn get_info(&self, p: &str) -> MetaResult<String> {
        Ok(FileInfo::from_entry(&self.tree.get(p)?).encode())
    }

    /// The authoritative location of a file, `locations[0]`.
    pub async fn primary_location(&self, p: &str) -> MetaResult<LocationRecord> {
        let entry = self.file(p)?;
        let location = entry
            .primary_location()
            .ok_or_else(|| MetaError::NoLocation(p.to_string()))?;
        self.resolve(location).await
    }

    pub async fn download(&self, p: &str) -> MetaResult<LocationRecord> {
        self.primary_location(p).await
    }

    pub async fn open(&self, p: &str) -> MetaResult<LocationRecord> {
        self.primary_location(p).await
    }

    /// Copy a file. The copy lives on the node holding the source block,
    /// under a fresh block id, and the node duplicates the bytes itself.
    /// An existing destination file is replaced.
    pub async fn copy(&self, src: &str, dst: &str) -> MetaResult<NamespaceEntry> {
        check_path(src)?;
        check_path(dst)?;
        if src == dst {
            return Err(MetaError::InvalidArgument(format!("cannot copy {src} onto itself")));
        }
        let _guard = self.locks.lock(&[src, dst]).await;

        let source = self.file(src)?;
        if source.locations.is_empty() {
            return Err(MetaError::NoLocation(src.to_string()));
        }
        let from = &source.locations[copy_source_index(src, source.locations.len())];
        let addr = self.registry.address(&from.node).await?;

        if self.tree.contains(dst)? {
            let existing = self.file(dst)?;
            self.clear_content(&existing).await?;
        }

        let to = BlockLocation::new(from.node.clone(), BlockId::generate());
        let entry = self.tree.insert_copy(src, dst, vec![to.clone()])?;
        match self.blocks.copy(&addr, &from.block, &to.block).await {
            Ok(()) => {
                info!(src = %src, dst = %dst, node = %to.node, "file copied");
                Ok(entry)
            }
            Err(source) => {
                let cause = MetaError::Storage { node: to.node.to_string(), source };
                Err(self.compensate("copy", dst, cause))
            }
        }
    }

    /// Rename a file or directory. Only metadata changes; blocks stay
    /// where they are. An existing destination file is replaced.
    pub async fn move_entry(&self, src: &str, dst: &str) -> MetaResult<NamespaceEntry> {
        check_path(src)?;
        check_path(dst)?;
        if src == dst {
            return Ok(self.tree.get(src)?);
        }
        let _guard = self.locks.lock(&[src, dst]).await;

        let source = self.tree.get(src)?;
        if self.tree.contains(dst)? {
            let existing = self.tree.get(dst)?;
            if existing.is_directory || source.is_directory {
                return Err(NamespaceError::AlreadyExists(dst.to_string()).into());
            }
            self.clear_content(&existing).await?;
        }
        let entry = self.tree.rename(src, dst)?;
        info!(src = %src, dst = %dst, "moved");
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dfs_cluster::RegistryConfig;
    use dfs_protocol::codes;
    use dfs_store::{InMemoryMetaStore, MetaStore, StoreError, StoreOp, StoreResult};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records block operations; individual calls can be made to fail.
    #[derive(Default)]
    pub(crate) struct FakeBlocks {
        pub blocks: Mutex<HashSet<(String, BlockId)>>,
        pub fail_create: Mutex<bool>,
        pub fail_copy: Mutex<bool>,
        pub fail_delete: Mutex<bool>,
    }

    impl FakeBlocks {
        fn has(&self, addr: &str, block: &BlockId) -> bool {
            self.blocks.lock().unwrap().contains(&(addr.to_string(), block.clone()))
        }

        fn count(&self) -> usize {
            self.blocks.lock().unwrap().len()
        }
    }

    fn refused() -> BlockError {
        BlockError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[async_trait]
    impl BlockClient for FakeBlocks {
        async fn create(&self, addr: &str, block: &BlockId) -> BlockResult<()> {
            if *self.fail_create.lock().unwrap() {
                return Err(refused());
            }
            self.blocks.lock().unwrap().insert((addr.to_string(), block.clone()));
            Ok(())
        }

        async fn delete(&self, addr: &str, block: &BlockId) -> BlockResult<()> {
            if *self.fail_delete.lock().unwrap() {
                return Err(refused());
            }
            if self.blocks.lock().unwrap().remove(&(addr.to_string(), block.clone())) {
                Ok(())
            } else {
                Err(BlockError::NotFound(block.to_string()))
            }
        }

        async fn copy(&self, addr: &str, src: &BlockId, dst: &BlockId) -> BlockResult<()> {
            if *self.fail_copy.lock().unwrap() {
                return Err(refused());
            }
            if !self.has(addr, src) {
                return Err(BlockError::NotFound(src.to_string()));
            }
            self.blocks.lock().unwrap().insert((addr.to_string(), dst.clone()));
            Ok(())
        }
    }

    fn node(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    pub(crate) fn coordinator_with(store: Arc<dyn MetaStore>) -> (Coordinator, Arc<FakeBlocks>) {
        let tree = Arc::new(NamespaceTree::open(store).unwrap());
        let registry = Arc::new(NodeRegistry::new(
            RegistryConfig::default(),
            vec![(node("dfs101"), "n1:9526".to_string()), (node("dfs102"), "n2:9526".to_string())],
        ));
        let blocks = Arc::new(FakeBlocks::default());
        (Coordinator::new(tree, registry, blocks.clone()), blocks)
    }

    fn coordinator() -> (Coordinator, Arc<FakeBlocks>) {
        coordinator_with(Arc::new(InMemoryMetaStore::new()))
    }

    #[tokio::test]
    async fn create_file_places_an_empty_block() {
        let (c, blocks) = coordinator();
        let entry = c.create("/a/b/f", "u", false).await.unwrap();
        assert_eq!(entry.locations.len(), 1);

        let loc = c.open("/a/b/f").await.unwrap();
        assert!(blocks.has(&loc.addr, &loc.block));
        assert_eq!(loc.node, entry.locations[0].node);
        assert!(c.tree().get("/a/b").unwrap().is_directory);
        assert_eq!(c.tree().get("/a").unwrap().owner, "u");
    }

    #[tokio::test]
    async fn create_directory_touches_no_block() {
        let (c, blocks) = coordinator();
        c.create("/d", "u", true).await.unwrap();
        assert_eq!(blocks.count(), 0);
        assert!(c.get_locations("/d").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_block_create_rolls_back_entry() {
        let (c, blocks) = coordinator();
        *blocks.fail_create.lock().unwrap() = true;
        let err = c.create("/f", "u", false).await.unwrap_err();
        assert!(matches!(err, MetaError::Storage { .. }));
        assert_eq!(err.code(), codes::UNAVAILABLE);
        assert!(!c.tree().contains("/f").unwrap());
    }

    #[tokio::test]
    async fn create_without_nodes_is_unavailable_and_rolled_back() {
        let tree = Arc::new(NamespaceTree::open(Arc::new(InMemoryMetaStore::new())).unwrap());
        let registry = Arc::new(NodeRegistry::new(RegistryConfig::default(), Vec::new()));
        let c = Coordinator::new(tree, registry, Arc::new(FakeBlocks::default()));
        let err = c.create("/f", "u", false).await.unwrap_err();
        assert_eq!(err.code(), codes::UNAVAILABLE);
        assert!(!c.tree().contains("/f").unwrap());
    }

    #[tokio::test]
    async fn create_existing_is_already_exists() {
        let (c, _) = coordinator();
        c.create("/f", "u", false).await.unwrap();
        let err = c.create("/f", "u", false).await.unwrap_err();
        assert_eq!(err.code(), codes::ALREADY_EXISTS);
    }

    /// Accepts writes until `broken` is set.
    struct FlakyStore {
        inner: InMemoryMetaStore,
        broken: Arc<AtomicBool>,
    }

    impl MetaStore for FlakyStore {
        fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn apply(&self, ops: &[StoreOp]) -> StoreResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::ReadOnly);
            }
            self.inner.apply(ops)
        }

        fn scan(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
            self.inner.scan()
        }
    }

    /// Fails every create and takes the durable store down with it.
    struct Meltdown {
        broken: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BlockClient for Meltdown {
        async fn create(&self, _addr: &str, _block: &BlockId) -> BlockResult<()> {
            self.broken.store(true, Ordering::SeqCst);
            Err(refused())
        }

        async fn delete(&self, _addr: &str, _block: &BlockId) -> BlockResult<()> {
            Ok(())
        }

        async fn copy(&self, _addr: &str, _src: &BlockId, _dst: &BlockId) -> BlockResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_compensation_is_reported_not_swallowed() {
        let broken = Arc::new(AtomicBool::new(false));
        let store = Arc::new(FlakyStore {
            inner: InMemoryMetaStore::new(),
            broken: Arc::clone(&broken),
        });
        let tree = Arc::new(NamespaceTree::open(store).unwrap());
        let registry = Arc::new(NodeRegistry::new(
            RegistryConfig::default(),
            vec![(node("dfs101"), "n1:9526".to_string())],
        ));
        let c = Coordinator::new(tree, registry, Arc::new(Meltdown { broken: Arc::clone(&broken) }));

        let err = c.create("/f", "u", false).await.unwrap_err();
        assert!(matches!(err, MetaError::CompensationFailed { operation: "create", .. }));
        assert_eq!(err.code(), codes::COMPENSATION_FAILED);

        // the service keeps answering
        broken.store(false, Ordering::SeqCst);
        assert!(c.tree().get("/f").is_ok());
        c.create("/d", "u", true).await.unwrap();
    }

    #[tokio::test]
    async fn delete_file_removes_its_block() {
        let (c, blocks) = coordinator();
        c.create("/f", "u", false).await.unwrap();
        assert_eq!(blocks.count(), 1);
        c.delete("/f", "u").await.unwrap();
        assert_eq!(blocks.count(), 0);
        assert_eq!(c.get_info("/f").unwrap_err().code(), codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_directory_removes_every_block_in_the_subtree() {
        let (c, blocks) = coordinator();
        c.create("/d/x", "u", false).await.unwrap();
        c.create("/d/y/z", "u", false).await.unwrap();
        assert_eq!(blocks.count(), 2);
        c.delete("/d", "u").await.unwrap();
        assert_eq!(blocks.count(), 0);
        for p in ["/d", "/d/x", "/d/y", "/d/y/z"] {
            assert!(!c.tree().contains(p).unwrap());
        }
    }

    #[tokio::test]
    async fn block_delete_failures_do_not_fail_delete() {
        let (c, blocks) = coordinator();
        c.create("/f", "u", false).await.unwrap();
        *blocks.fail_delete.lock().unwrap() = true;
        c.delete("/f", "u").await.unwrap();
        assert!(!c.tree().contains("/f").unwrap());
    }

    #[tokio::test]
    async fn delete_checks_owner_and_existence() {
        let (c, blocks) = coordinator();
        c.create("/g", "u1", false).await.unwrap();
        let err = c.delete("/g", "u2").await.unwrap_err();
        assert_eq!(err.code(), codes::PERMISSION_DENIED);
        assert!(c.tree().contains("/g").unwrap());
        assert_eq!(blocks.count(), 1);

        let before = c.tree().len().unwrap();
        assert_eq!(c.delete("/nope", "u1").await.unwrap_err().code(), codes::NOT_FOUND);
        assert_eq!(c.tree().len().unwrap(), before);
    }

    #[tokio::test]
    async fn copy_is_independent_and_colocated() {
        let (c, blocks) = coordinator();
        c.create("/src", "u", false).await.unwrap();
        c.set_size("/src", 10).await.unwrap();

        let copy = c.copy("/src", "/dir/dst").await.unwrap();
        let src = c.tree().get("/src").unwrap();
        assert_eq!(copy.size, 10);
        assert_eq!(copy.owner, "u");
        assert_eq!(copy.locations[0].node, src.locations[0].node);
        assert_ne!(copy.locations[0].block, src.locations[0].block);
        assert_eq!(blocks.count(), 2);

        c.set_size("/dir/dst", 99).await.unwrap();
        assert_eq!(c.get_size("/src").unwrap(), 10);
    }

    #[tokio::test]
    async fn copy_replaces_existing_destination() {
        let (c, blocks) = coordinator();
        c.create("/src", "u", false).await.unwrap();
        c.create("/dst", "u", false).await.unwrap();
        let old = c.open("/dst").await.unwrap();

        c.copy("/src", "/dst").await.unwrap();
        assert!(!blocks.has(&old.addr, &old.block));
        assert_eq!(blocks.count(), 2);
    }

    #[tokio::test]
    async fn copy_failure_rolls_back_destination() {
        let (c, blocks) = coordinator();
        c.create("/src", "u", false).await.unwrap();
        *blocks.fail_copy.lock().unwrap() = true;
        let err = c.copy("/src", "/dst").await.unwrap_err();
        assert_eq!(err.code(), codes::UNAVAILABLE);
        assert!(!c.tree().contains("/dst").unwrap());
        assert!(c.tree().contains("/src").unwrap());
    }

    #[tokio::test]
    async fn copy_refuses_directories_and_self() {
        let (c, _) = coordinator();
        c.create("/src", "u", false).await.unwrap();
        c.create("/d", "u", true).await.unwrap();
        assert_eq!(c.copy("/d", "/e").await.unwrap_err().code(), codes::INVALID_ARGUMENT);
        assert_eq!(c.copy("/src", "/d").await.unwrap_err().code(), codes::INVALID_ARGUMENT);
        assert_eq!(c.copy("/src", "/src").await.unwrap_err().code(), codes::INVALID_ARGUMENT);
        assert_eq!(c.copy("/none", "/x").await.unwrap_err().code(), codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn move_keeps_locations() {
        let (c, blocks) = coordinator();
        let before = c.create("/src", "u", false).await.unwrap();
        let moved = c.move_entry("/src", "/a/dst").await.unwrap();
        assert_eq!(moved.locations, before.locations);
        assert_eq!(c.tree().get("/a/dst").unwrap().locations, before.locations);
        assert_eq!(c.get_info("/src").unwrap_err().code(), codes::NOT_FOUND);
        assert_eq!(blocks.count(), 1);
    }

    #[tokio::test]
    async fn move_replaces_existing_file() {
        let (c, blocks) = coordinator();
        let src = c.create("/src", "u", false).await.unwrap();
        c.create("/dst", "u", false).await.unwrap();
        c.move_entry("/src", "/dst").await.unwrap();
        assert_eq!(blocks.count(), 1);
        assert_eq!(c.tree().get("/dst").unwrap().locations, src.locations);
    }

    #[tokio::test]
    async fn move_directory_and_refusals() {
        let (c, _) = coordinator();
        c.create("/d/f", "u", false).await.unwrap();
        c.create("/e", "u", true).await.unwrap();
        assert_eq!(c.move_entry("/d", "/e").await.unwrap_err().code(), codes::ALREADY_EXISTS);
        assert_eq!(c.move_entry("/d", "/d/sub").await.unwrap_err().code(), codes::INVALID_ARGUMENT);

        c.move_entry("/d", "/moved").await.unwrap();
        assert!(c.tree().contains("/moved/f").unwrap());
        // moving onto itself is a no-op
        c.move_entry("/moved", "/moved").await.unwrap();
        assert!(c.tree().contains("/moved").unwrap());
    }

    #[tokio::test]
    async fn queries() {
        let (c, _) = coordinator();
        c.create("/d/a", "u", false).await.unwrap();
        c.create("/d/b", "u", false).await.unwrap();
        c.set_size("/d/a", 4).await.unwrap();
        c.set_size("/d/b", 6).await.unwrap();

        assert_eq!(c.list("/d").unwrap(), vec!["a", "b"]);
        assert!(c.list("/d/a").unwrap().is_empty());
        assert_eq!(c.get_size("/d").unwrap(), 10);
        assert_eq!(c.get_size("/d/a").unwrap(), 4);
        assert_eq!(c.set_size("/d/a", -1).await.unwrap_err().code(), codes::INVALID_ARGUMENT);

        let info = FileInfo::parse(&c.get_info("/d/a").unwrap()).unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.parent_name, "d");
        assert_eq!(info.locations.len(), 1);

        c.close("/d/a").unwrap();
        assert_eq!(c.close("/d").unwrap_err().code(), codes::INVALID_ARGUMENT);
        assert_eq!(c.open("/d").await.unwrap_err().code(), codes::INVALID_ARGUMENT);

        let locs = c.get_locations("/d/a").await.unwrap();
        assert_eq!(locs.len(), 1);
        assert!(locs[0].addr.ends_with(":9526"));
        assert_eq!(c.download("/d/a").await.unwrap(), locs[0]);
    }

    #[tokio::test]
    async fn file_without_location_cannot_be_opened() {
        let (c, _) = coordinator();
        c.tree().create("/bare", "u", false).unwrap();
        assert!(matches!(c.open("/bare").await, Err(MetaError::NoLocation(_))));
        assert_eq!(c.copy("/bare", "/x").await.unwrap_err().code(), codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_registers_unknown_nodes() {
        let (c, _) = coordinator();
        let outcome = c.heartbeat("dfs900", "n9:9526".into()).await.unwrap();
        assert_eq!(outcome, HeartbeatOutcome::Registered);
        assert_eq!(c.registry().address(&node("dfs900")).await.unwrap(), "n9:9526");
        assert!(c.heartbeat("bad:id", String::new()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_invalid_paths() {
        let (c, _) = coordinator();
        for bad in ["relative", "/a/../b", "/a,b", "/trailing/"] {
            assert_eq!(c.create(bad, "u", false).await.unwrap_err().code(), codes::INVALID_ARGUMENT, "{bad}");
        }
        assert_eq!(c.create("/ok", "a,b", false).await.unwrap_err().code(), codes::INVALID_ARGUMENT);
    }

    /// Every block the fake nodes hold is referenced by exactly one entry.
    fn assert_no_orphans(c: &Coordinator, blocks: &FakeBlocks) {
        let mut referenced: Vec<BlockId> = c
            .tree()
            .subtree_locations("/")
            .unwrap()
            .into_iter()
            .map(|l| l.block)
            .collect();
        referenced.sort();
        let mut held: Vec<BlockId> = blocks.blocks.lock().unwrap().iter().map(|(_, b)| b.clone()).collect();
        held.sort();
        assert_eq!(held, referenced);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_of_one_path_admit_one() {
        let (c, blocks) = coordinator();
        let c = Arc::new(c);
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.create("/same", &format!("u{i}"), false).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.code(), codes::ALREADY_EXISTS, "{e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(blocks.count(), 1);
        assert_eq!(c.tree().get("/same").unwrap().locations.len(), 1);
        assert_no_orphans(&c, &blocks);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_copy_and_move_onto_one_destination() {
        for _ in 0..20 {
            let (c, blocks) = coordinator();
            let c = Arc::new(c);
            c.create("/a", "u", false).await.unwrap();
            c.create("/b", "u", false).await.unwrap();

            let copier = {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.copy("/a", "/out/d").await })
            };
            let mover = {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.move_entry("/b", "/out/d").await })
            };
            copier.await.unwrap().unwrap();
            mover.await.unwrap().unwrap();

            assert_eq!(c.list("/").unwrap(), vec!["a", "out"]);
            assert_eq!(c.list("/out").unwrap(), vec!["d"]);
            assert!(!c.tree().get("/out/d").unwrap().is_directory);
            assert_eq!(blocks.count(), 2);
            assert_no_orphans(&c, &blocks);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn creates_racing_a_directory_delete_leave_no_stray_blocks() {
        for _ in 0..20 {
            let (c, blocks) = coordinator();
            let c = Arc::new(c);
            c.create("/d/seed", "u", false).await.unwrap();

            let creators: Vec<_> = (0..8)
                .map(|i| {
                    let c = Arc::clone(&c);
                    tokio::spawn(async move { c.create(&format!("/d/f{i}"), "u", false).await })
                })
                .collect();
            let deleter = {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.delete("/d", "u").await })
            };
            deleter.await.unwrap().unwrap();
            for task in creators {
                // losing the race to the delete is fine; leaking is not
                let _ = task.await.unwrap();
            }
            assert_no_orphans(&c, &blocks);
        }
    }

    #[test]
    fn copy_source_is_stable() {
        assert_eq!(copy_source_index("/f", 3), copy_source_index("/f", 3));
        assert!(copy_source_index("/anything", 2) < 2);
    }
}
