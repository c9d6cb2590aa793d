//! Fingerprint extraction.
//!
//! A fingerprint is the id set of everything that decides whether the
//! anchor statement executes and with what data: the minimal backward
//! slice of the anchor plus the control nodes of the forward path from the
//! slice's farthest statement back to the anchor, plus the backward slices
//! of those control conditions.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::errors::Result;
use crate::graph::{walk_cfg, WalkOptions};
use crate::shared::models::{FlowLabel, NodeId, NodeKind};
use crate::shared::ports::{GraphQueryExt, GraphStore};

/// Assembled fingerprint of one anchor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    pub anchor: NodeId,
    /// Sorted, deduplicated member node ids.
    pub ids: Vec<NodeId>,
    /// Line numbers parallel to `ids`, for human inspection.
    pub lines: Vec<Option<u32>>,
}

/// Extracts fingerprints over one graph. Reusable across anchors through
/// [`FingerprintExtractor::clear_cache`].
pub struct FingerprintExtractor<'g, S> {
    store: &'g S,
    slice_ids: FxHashSet<NodeId>,
    slice_edges: FxHashSet<(NodeId, NodeId)>,
    taint_params: FxHashSet<String>,
    far_node: Option<NodeId>,
}

impl<'g, S: GraphStore> FingerprintExtractor<'g, S> {
    pub fn new(store: &'g S) -> Self {
        FingerprintExtractor {
            store,
            slice_ids: FxHashSet::default(),
            slice_edges: FxHashSet::default(),
            taint_params: FxHashSet::default(),
            far_node: None,
        }
    }

    /// Drops all per-anchor state.
    pub fn clear_cache(&mut self) {
        self.slice_ids.clear();
        self.slice_edges.clear();
        self.taint_params.clear();
        self.far_node = None;
    }

    /// Variable names flowing into the last extracted fingerprint.
    pub fn taint_params(&self) -> &FxHashSet<String> {
        &self.taint_params
    }

    /// Full extraction for one anchor.
    pub fn run(&mut self, anchor: NodeId) -> Result<Fingerprint> {
        self.backward_slice(anchor)?;
        self.forward_path_exploration(anchor)?;

        let mut ids: Vec<NodeId> = self.slice_ids.iter().copied().collect();
        ids.sort_unstable();
        let lines = ids
            .iter()
            .map(|&id| self.store.node(id).and_then(|n| n.lineno))
            .collect();
        debug!(anchor, members = ids.len(), "fingerprint assembled");
        Ok(Fingerprint { anchor, ids, lines })
    }

    /// Minimal backward slice from the anchor along PDG def-edges.
    ///
    /// Termination: every followed edge tightens the id threshold to the
    /// definition's own id (ids decrease along def-edges by construction),
    /// and a followed (def, use) pair is never followed twice.
    fn backward_slice(&mut self, anchor: NodeId) -> Result<()> {
        struct SliceFrame {
            node: NodeId,
            parent: Option<NodeId>,
            threshold: NodeId,
        }
        let mut stack = vec![SliceFrame { node: anchor, parent: None, threshold: anchor }];
        while let Some(frame) = stack.pop() {
            let Some(node) = self.store.node(frame.node) else { continue };
            if node.id > frame.threshold {
                continue;
            }
            self.slice_ids.insert(node.id);

            let mut slice_root = node.id;
            match frame.parent {
                Some(parent) => {
                    if !self.slice_edges.insert((node.id, parent)) {
                        continue;
                    }
                }
                None => {
                    // Anchors inside compound headers have no CFG presence
                    // of their own; normalize to the statement root, then
                    // to the control condition.
                    if !self.store.has_cfg(node.id) {
                        slice_root = self.store.ast_root_of(node.id);
                        let root_kind = self.store.node(slice_root).map(|n| n.kind);
                        if matches!(
                            root_kind,
                            Some(
                                NodeKind::If
                                    | NodeKind::IfElem
                                    | NodeKind::While
                                    | NodeKind::DoWhile
                            )
                        ) {
                            slice_root = self.store.control_condition(slice_root);
                        }
                    }
                }
            }

            for edge in self.store.pdg_def_edges(slice_root) {
                let def = edge.from;
                if def == slice_root || def > frame.threshold {
                    continue;
                }
                if self.store.node(def).map(|n| n.kind) == Some(NodeKind::Param) {
                    continue;
                }
                if frame.parent.is_some() {
                    self.taint_params.insert(edge.var.clone());
                }
                stack.push(SliceFrame {
                    node: def,
                    parent: Some(slice_root),
                    threshold: def,
                });
            }
        }
        self.far_node = self.slice_ids.iter().copied().min();
        Ok(())
    }

    /// Forward CFG walk from the slice's farthest node back to the anchor;
    /// branch points on the way are control nodes and join the fingerprint,
    /// together with the backward slices of their conditions.
    fn forward_path_exploration(&mut self, anchor: NodeId) -> Result<()> {
        let Some(far) = self.far_node else { return Ok(()) };
        let same_line = match (self.store.node(far), self.store.node(anchor)) {
            (Some(f), Some(a)) => f.lineno == a.lineno,
            _ => true,
        };
        if same_line {
            return Ok(());
        }

        let mut path: Vec<(NodeId, NodeId, Option<FlowLabel>)> = Vec::new();
        let options = WalkOptions::for_path_exploration((far, anchor));
        walk_cfg(self.store, far, &options, &mut |_, _, parent, node, label| {
            if let Some(parent) = parent {
                path.push((parent.id, node.id, label.cloned()));
            }
            Ok(())
        })?;

        let mut graph: DiGraph<NodeId, Option<FlowLabel>> = DiGraph::new();
        let mut indices: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        let mut index_of = |graph: &mut DiGraph<NodeId, Option<FlowLabel>>, id: NodeId| {
            *indices.entry(id).or_insert_with(|| graph.add_node(id))
        };
        for (from, to, label) in path {
            let a = index_of(&mut graph, from);
            let b = index_of(&mut graph, to);
            graph.add_edge(a, b, label);
        }

        let control_nodes: Vec<NodeId> = graph
            .node_indices()
            .filter(|&ix| graph.neighbors_directed(ix, Direction::Outgoing).count() >= 2)
            .map(|ix| graph[ix])
            .collect();

        for control in control_nodes {
            self.slice_ids.insert(control);
            self.control_condition_slice(control);
        }
        Ok(())
    }

    /// Backward slice of a control condition, bounded by the control node's
    /// own id, with statement-root normalization at every step.
    fn control_condition_slice(&mut self, control: NodeId) {
        let mut stack = vec![(control, None::<NodeId>, control)];
        while let Some((id, parent, threshold)) = stack.pop() {
            if self.store.node(id).is_none() || id > threshold {
                continue;
            }
            self.slice_ids.insert(id);
            if let Some(parent) = parent {
                if !self.slice_edges.insert((id, parent)) {
                    continue;
                }
            }
            let root = self.store.ast_root_of(id);
            for edge in self.store.pdg_def_edges(root) {
                let def = edge.from;
                if def == root || def > threshold {
                    continue;
                }
                if parent.is_none() {
                    self.taint_params.insert(edge.var.clone());
                }
                stack.push((def, Some(root), def));
            }
        }
    }
}
