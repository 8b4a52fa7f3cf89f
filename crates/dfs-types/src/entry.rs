use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{BlockId, NodeId};
use crate::path;

/// One placement of file content: the node holding it and the block id the
/// node stores it under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockLocation {
    pub node: NodeId,
    pub block: BlockId,
}

impl BlockLocation {
    pub fn new(node: NodeId, block: BlockId) -> Self {
        Self { node, block }
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.block)
    }
}

impl FromStr for BlockLocation {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, block) = s
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidId(s.to_string()))?;
        Ok(Self::new(NodeId::new(node)?, BlockId::new(block)?))
    }
}

/// Per-location replica state.
///
/// Stored alongside `locations` but never populated by the current
/// single-replica read path, which always trusts `locations[0]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    #[default]
    Unknown,
    Available,
    Lost,
}

/// One file or directory in the namespace tree.
///
/// The parent is never stored as a reference; it is the path prefix up to
/// the last `/`, resolved through the tree map on demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    /// Canonical absolute path (the persistence key).
    pub path: String,
    /// Last path segment; `/` for the root.
    pub name: String,
    pub is_directory: bool,
    /// Byte length of the file content; `0` until the first write.
    pub size: i64,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Content placements, first entry authoritative for reads.
    pub locations: Vec<BlockLocation>,
    pub replica_status: Vec<ReplicaStatus>,
}

impl NamespaceEntry {
    fn new(path: &str, owner: &str, is_directory: bool) -> Self {
        Self {
            path: path.to_string(),
            name: path::file_name(path).to_string(),
            is_directory,
            size: 0,
            owner: owner.to_string(),
            created_at: Utc::now(),
            locations: Vec::new(),
            replica_status: Vec::new(),
        }
    }

    pub fn file(path: &str, owner: &str) -> Self {
        Self::new(path, owner, false)
    }

    pub fn directory(path: &str, owner: &str) -> Self {
        Self::new(path, owner, true)
    }

    /// The root directory, owned by `root`.
    pub fn root() -> Self {
        let mut entry = Self::directory(path::ROOT, "root");
        entry.created_at = DateTime::<Utc>::default();
        entry
    }

    pub fn is_root(&self) -> bool {
        self.path == path::ROOT
    }

    pub fn parent_path(&self) -> Option<&str> {
        path::parent(&self.path)
    }

    /// Location that reads are served from.
    pub fn primary_location(&self) -> Option<&BlockLocation> {
        self.locations.first()
    }

    /// Same entry under a different path; content placements are kept.
    pub fn relocated(&self, new_path: &str) -> Self {
        let mut moved = self.clone();
        moved.path = new_path.to_string();
        moved.name = path::file_name(new_path).to_string();
        moved
    }
}
