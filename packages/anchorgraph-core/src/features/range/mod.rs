//! Id spans of syntactic constructs.
//!
//! Node ids order source position, so the statements governed by a
//! construct all fall inside an inclusive id window. [`RangeStep`]
//! computes that window per construct kind and memoizes it; the anchor
//! search uses it to bound the structured CFG walk.

use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::errors::{AnchorError, Result};
use crate::shared::models::{FileId, NodeId, NodeKind, NodeQuery};
use crate::shared::ports::{GraphQueryExt, GraphStore};

/// Fallback span width when a branch arm has no outgoing flow, typically a
/// branch that ends in `exit`/`throw`.
const DANGLING_BRANCH_SPAN: NodeId = 500;

/// Memoizing id-span resolver.
#[derive(Debug, Default)]
pub struct RangeStep {
    cache: FxHashMap<NodeId, (NodeId, NodeId)>,
}

impl RangeStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive `[lo, hi]` id window covering `node` and everything it
    /// governs.
    pub fn node_range<S: GraphStore>(&mut self, store: &S, id: NodeId) -> Result<(NodeId, NodeId)> {
        if let Some(&range) = self.cache.get(&id) {
            return Ok(range);
        }
        let range = self.compute(store, id)?;
        debug!(node = id, lo = range.0, hi = range.1, "resolved construct range");
        self.cache.insert(id, range);
        Ok(range)
    }

    fn compute<S: GraphStore>(&mut self, store: &S, id: NodeId) -> Result<(NodeId, NodeId)> {
        let node = store.expect_node(id)?;
        let parent = store.parent(id);

        match node.kind {
            NodeKind::Foreach => {
                // The loop body sits between the header and the exit edge
                // target; the last successor is the exit.
                let end = store
                    .cfg_successors(id)
                    .last()
                    .copied()
                    .ok_or_else(|| AnchorError::graph_query(format!("foreach {id} has no flow")))?;
                if end <= id {
                    return Err(AnchorError::unsupported(format!(
                        "foreach {id} with backward exit edge"
                    )));
                }
                Ok((id, end))
            }
            NodeKind::FuncDecl | NodeKind::Method | NodeKind::Closure => {
                self.declaration_range(store, id)
            }
            _ if parent.is_some_and(|p| p.kind == NodeKind::IfElem) => {
                let parent_id = parent.map(|p| p.id).unwrap_or(id);
                let successors = store.cfg_successors(id);
                match successors.last() {
                    Some(&next) => Ok((parent_id, next.saturating_sub(1))),
                    None => {
                        error!(node = id, "branch arm has no outgoing flow");
                        Ok((parent_id, parent_id + DANGLING_BRANCH_SPAN))
                    }
                }
            }
            _ => {
                let end = store.descendants(id).last().copied().unwrap_or(id);
                Ok((id, end))
            }
        }
    }

    /// Span of a function or method body, located through its closing-line
    /// node. `end_lineno` may sit one line past the last statement.
    fn declaration_range<S: GraphStore>(
        &mut self,
        store: &S,
        id: NodeId,
    ) -> Result<(NodeId, NodeId)> {
        let node = store.expect_node(id)?;
        let end_lineno = node.end_lineno.ok_or_else(|| {
            AnchorError::graph_query(format!("declaration {id} has no end line"))
        })?;
        let file_id = node.file_id;

        let closing = self
            .node_on_line(store, file_id, end_lineno)
            .or_else(|| self.node_on_line(store, file_id, end_lineno.saturating_sub(1)))
            .ok_or_else(|| {
                AnchorError::graph_query(format!(
                    "no node on closing line {end_lineno} of declaration {id}"
                ))
            })?;

        let root = store.ast_root_of(closing);
        let end = store.descendants(root).last().copied().unwrap_or(root);
        Ok((id, end.max(id)))
    }

    fn node_on_line<S: GraphStore>(
        &self,
        store: &S,
        file_id: FileId,
        lineno: u32,
    ) -> Option<NodeId> {
        store
            .nodes_in_file(file_id, &NodeQuery::default())
            .into_iter()
            .find(|&n| store.node(n).and_then(|n| n.lineno) == Some(lineno))
    }
}
