use dfs_types::NodeId;
use rand::seq::SliceRandom;

use crate::registry::NodeSnapshot;

/// Chooses the node that receives new content.
pub trait PlacementPolicy: Send + Sync {
    /// Pick one of `candidates`, or `None` if there are none.
    fn choose(&self, candidates: &[NodeSnapshot], size_hint: i64) -> Option<NodeId>;

    fn name(&self) -> &'static str;
}

/// Uniformly random choice over every known node.
///
/// Ignores both the size hint and node liveness: a SUSPECT node can still
/// receive new content.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPlacement;

impl PlacementPolicy for RandomPlacement {
    fn choose(&self, candidates: &[NodeSnapshot], _size_hint: i64) -> Option<NodeId> {
        candidates
            .choose(&mut rand::thread_rng())
            .map(|n| n.id.clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Liveness;
    use std::collections::HashSet;

    fn snap(id: &str, liveness: Liveness) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::new(id).unwrap(),
            addr: format!("{id}:9526"),
            liveness,
        }
    }

    #[test]
    fn empty_candidates() {
        assert_eq!(RandomPlacement.choose(&[], 0), None);
    }

    #[test]
    fn reaches_every_node_including_suspect() {
        let nodes = vec![
            snap("dfs101", Liveness::Alive),
            snap("dfs102", Liveness::Suspect),
            snap("dfs103", Liveness::Unknown),
        ];
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(RandomPlacement.choose(&nodes, 1024).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
