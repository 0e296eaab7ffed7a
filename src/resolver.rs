use rustc_hash::FxHashMap;

use crate::id_pool::GlobalId;
use crate::overlap_graph::OverlapEdge;

/// Sparse disjoint-set forest over offset global labels.
///
/// Union keeps the smaller root as parent, so every class's final root is
/// its minimum member (the canonical GlobalID) independent of the order
/// edges arrive in. Labels never mentioned in an edge are implicit
/// singletons and are not tracked.
pub struct DisjointSets {
    parent: FxHashMap<GlobalId, GlobalId>,
}

impl DisjointSets {
    pub fn new() -> Self {
        Self { parent: FxHashMap::default() }
    }

    pub fn find(&mut self, x: GlobalId) -> GlobalId {
        let mut root = x;
        while let Some(&p) = self.parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }
        // Path compression.
        let mut cur = x;
        while let Some(&p) = self.parent.get(&cur) {
            if p == root {
                break;
            }
            self.parent.insert(cur, root);
            cur = p;
        }
        root
    }

    pub fn union(&mut self, a: GlobalId, b: GlobalId) {
        self.parent.entry(a).or_insert(a);
        self.parent.entry(b).or_insert(b);
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (min, max) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent.insert(max, min);
    }

    /// Non-identity representative entries, sorted by member label.
    pub fn into_reps(mut self) -> Vec<(GlobalId, GlobalId)> {
        let members: Vec<GlobalId> = self.parent.keys().copied().collect();
        let mut reps: Vec<(GlobalId, GlobalId)> = members
            .into_iter()
            .filter_map(|m| {
                let r = self.find(m);
                if r == m { None } else { Some((m, r)) }
            })
            .collect();
        reps.sort_unstable();
        reps
    }
}

impl Default for DisjointSets {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse accepted overlap edges into the representative map that the
/// pool persists. Background (0) never participates.
pub fn resolve_edges(edges: &[OverlapEdge]) -> Vec<(GlobalId, GlobalId)> {
    let mut sets = DisjointSets::new();
    for edge in edges {
        if edge.a == 0 || edge.b == 0 {
            continue;
        }
        sets.union(edge.a, edge.b);
    }
    sets.into_reps()
}
