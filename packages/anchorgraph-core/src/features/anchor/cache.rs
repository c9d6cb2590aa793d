//! Per-run traversal caches. Never shared between runs.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::features::anchor::Classification;
use crate::shared::models::NodeId;

/// Memo and visited-state tables for one finder run.
#[derive(Debug, Default)]
pub struct CacheCenter {
    /// Visited AST roots of the PDG walk.
    visited_pdg: FxHashSet<NodeId>,
    /// Classification memo keyed by (declaration id, declaration code).
    classified: FxHashMap<(NodeId, String), Classification>,
    /// Sorted id spans already queued for bounded CFG exploration.
    tainted_ranges: Vec<(NodeId, NodeId)>,
}

impl CacheCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Marks a PDG root visited; false when it already was.
    pub fn visit_pdg(&mut self, id: NodeId) -> bool {
        self.visited_pdg.insert(id)
    }

    pub fn classification(&self, decl: NodeId, code: &str) -> Option<Classification> {
        self.classified.get(&(decl, code.to_string())).copied()
    }

    /// Records a classification, merging with any previous value.
    pub fn record_classification(
        &mut self,
        decl: NodeId,
        code: &str,
        value: Classification,
    ) -> Classification {
        let entry = self
            .classified
            .entry((decl, code.to_string()))
            .or_insert(Classification::NotSensitive);
        *entry = entry.merge(value);
        *entry
    }

    pub fn add_tainted_range(&mut self, start: NodeId, end: NodeId) {
        self.tainted_ranges.push((start, end));
        self.tainted_ranges.sort_unstable_by_key(|r| r.0);
    }

    pub fn is_tainted(&self, id: NodeId) -> bool {
        self.tainted_ranges
            .iter()
            .any(|&(start, end)| start <= id && id <= end)
    }
}
