use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::VA;

/// Directed multigraph of call relationships between functions, identified
/// by entry address. One edge is appended per call site, so an edge's
/// multiplicity equals the number of distinct call instructions from caller
/// to callee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallGraph {
    edges: Vec<(VA, VA)>,
}

impl CallGraph {
    pub fn add_call(&mut self, caller: VA, callee: VA) {
        self.edges.push((caller, callee));
    }

    /// Edges aggregated by (caller, callee), in ascending address order.
    pub fn multiplicities(&self) -> BTreeMap<(VA, VA), usize> {
        let mut counts: BTreeMap<(VA, VA), usize> = BTreeMap::new();
        for &edge in &self.edges {
            *counts.entry(edge).or_default() += 1;
        }
        counts
    }

    /// Total number of recorded call sites.
    pub fn call_count(&self) -> usize {
        self.edges.len()
    }
}
