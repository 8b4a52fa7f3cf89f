use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Characters that would break either the on-disk block filename or the
/// `nodeId:blockId` / comma-joined encodings.
const RESERVED: &[char] = &['/', '\\', ',', ':'];

fn validate(raw: &str) -> Result<(), TypeError> {
    if raw.is_empty()
        || raw == "."
        || raw == ".."
        || raw.chars().any(|c| RESERVED.contains(&c) || c.is_control())
    {
        return Err(TypeError::InvalidId(raw.to_string()));
    }
    Ok(())
}

/// Stable name of a block-storage node (typically its hostname).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a node name.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of one block file on a storage node.
///
/// Decouples the logical path from the physical filename: renaming a path
/// never touches the block, and a block id is never reused.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh, globally unique block id (UUID v7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate and wrap an existing block id, e.g. one read off the wire.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlockId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_block_ids_are_unique() {
        let a = BlockId::generate();
        let b = BlockId::generate();
        assert_ne!(a, b);
        assert!(BlockId::new(a.as_str()).is_ok());
    }

    #[test]
    fn rejects_separators() {
        assert!(NodeId::new("dfs101").is_ok());
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("a:b").is_err());
        assert!(BlockId::new("../etc").is_err());
        assert!(BlockId::new("a,b").is_err());
        assert!(BlockId::new("..").is_err());
    }

    #[test]
    fn display_is_raw() {
        let id: NodeId = "dfs102".parse().unwrap();
        assert_eq!(id.to_string(), "dfs102");
        assert_eq!(format!("{id:?}"), "NodeId(dfs102)");
    }
}
