//! Graph store port.
//!
//! The engine never builds graphs; it consumes a code property graph
//! (AST + CFG + PDG + call graph) through [`GraphStore`]. The in-memory
//! arena in [`crate::graph`] implements it for tests and local runs; a
//! remote-store adapter would implement the same trait.
//!
//! All queries are synchronous. Lookup misses are `None`/empty answers, not
//! errors: the algorithms treat a dangling reference as a
//! [`GraphQuery`](crate::errors::AnchorError::GraphQuery) condition where it
//! matters.

use crate::errors::{AnchorError, Result};
use crate::shared::models::{
    CfgEdge, DataFlowEdge, FileId, GraphNode, NodeId, NodeKind, NodeQuery,
};

/// Query surface over one version's code property graph.
pub trait GraphStore {
    /// Node by id.
    fn node(&self, id: NodeId) -> Option<&GraphNode>;

    /// AST parent.
    fn parent(&self, id: NodeId) -> Option<&GraphNode>;

    /// Direct AST children, in sibling order.
    fn children(&self, id: NodeId) -> Vec<NodeId>;

    /// CFG successor node ids.
    fn cfg_successors(&self, id: NodeId) -> Vec<NodeId>;

    /// Labeled outgoing CFG edges.
    fn cfg_edges(&self, id: NodeId) -> Vec<CfgEdge>;

    /// Number of incoming CFG edges.
    fn cfg_in_degree(&self, id: NodeId) -> usize;

    /// Data-flow definition edges reaching `id` (def → use, use side = `id`).
    fn pdg_def_edges(&self, id: NodeId) -> Vec<DataFlowEdge>;

    /// Nodes that use a value defined at `id`.
    fn pdg_use_nodes(&self, id: NodeId) -> Vec<NodeId>;

    /// Call-graph resolution: declaration nodes a call may bind to.
    fn call_declarations(&self, id: NodeId) -> Vec<NodeId>;

    /// Toplevel node of the file with the given name, if present.
    fn file_node(&self, name: &str) -> Option<&GraphNode>;

    /// Name of a file by id.
    fn file_name(&self, file: FileId) -> Option<&str>;

    /// All node ids in a file satisfying the query, in id order.
    fn nodes_in_file(&self, file: FileId, query: &NodeQuery) -> Vec<NodeId>;
}

/// Derived queries every algorithm needs, expressed over [`GraphStore`].
pub trait GraphQueryExt: GraphStore {
    /// Node by id, or a `GraphQuery` error naming the dangling id.
    fn expect_node(&self, id: NodeId) -> Result<&GraphNode> {
        self.node(id)
            .ok_or_else(|| AnchorError::graph_query(format!("node {id} not in store")))
    }

    /// Statement root: highest ancestor below a statement list or
    /// declaration body.
    fn ast_root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if matches!(
                parent.kind,
                NodeKind::StmtList
                    | NodeKind::Toplevel
                    | NodeKind::FuncDecl
                    | NodeKind::Method
                    | NodeKind::Closure
                    | NodeKind::Try
            ) {
                break;
            }
            current = parent.id;
        }
        current
    }

    /// Descendants (including `id` itself) whose kind is in `kinds`,
    /// in ascending id order. `max_depth` bounds AST depth when given.
    fn descendants_of_kind(
        &self,
        id: NodeId,
        kinds: &[NodeKind],
        max_depth: Option<usize>,
    ) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            if let Some(node) = self.node(current) {
                if kinds.contains(&node.kind) {
                    out.push(current);
                }
            }
            if max_depth.map_or(true, |limit| depth < limit) {
                for child in self.children(current) {
                    stack.push((child, depth + 1));
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// All descendant ids (including `id`), ascending.
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current));
        }
        out.sort_unstable();
        out
    }

    /// Free variable names under `id`, literals excluded, in discovery order
    /// without duplicates.
    fn free_variables(&self, id: NodeId) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for var_id in self.descendants_of_kind(id, &[NodeKind::Var, NodeKind::Prop], None) {
            if let Some(node) = self.node(var_id) {
                let name = node.code_str();
                if !name.is_empty() && !out.iter().any(|existing| existing == name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// Textual form of a `Dim` (array access): `base[index]`, or `base[]`
    /// for an appended element.
    fn dim_code(&self, id: NodeId) -> String {
        let children = self.children(id);
        let base = children
            .first()
            .and_then(|&c| self.node(c))
            .map(|n| n.code_str().to_string())
            .unwrap_or_default();
        let index = children
            .get(1)
            .and_then(|&c| self.node(c))
            .map(|n| n.code_str().to_string());
        match index {
            Some(index) if !index.is_empty() => format!("{base}[{index}]"),
            _ => format!("{base}[]"),
        }
    }

    /// Base variable name of a `Dim` (the `_GET` of `$_GET['f']`).
    fn dim_body_code(&self, id: NodeId) -> String {
        self.children(id)
            .first()
            .and_then(|&c| self.node(c))
            .map(|n| n.code_str().to_string())
            .unwrap_or_default()
    }

    /// Argument nodes of a call-like or output statement: the children of
    /// its argument list when present, the non-body children otherwise.
    fn args_of(&self, id: NodeId) -> Vec<NodeId> {
        let children = self.children(id);
        for &child in &children {
            if self.node(child).map(|n| n.kind) == Some(NodeKind::ArgList) {
                return self.children(child);
            }
        }
        children
            .into_iter()
            .filter(|&c| self.node(c).map(|n| n.kind) != Some(NodeKind::StmtList))
            .collect()
    }

    /// Argument count of a call-like or output statement.
    fn arg_count(&self, id: NodeId) -> usize {
        self.args_of(id).len()
    }

    /// The enclosing function/toplevel declaration node.
    fn enclosing_declaration(&self, id: NodeId) -> Option<&GraphNode> {
        let func_id = self.node(id)?.func_id;
        self.node(func_id)
    }

    /// `return` expression nodes inside a declaration, ascending.
    fn function_return_exprs(&self, decl: NodeId) -> Vec<NodeId> {
        self.descendants_of_kind(decl, &[NodeKind::Return], None)
            .into_iter()
            .filter_map(|ret| self.args_of(ret).into_iter().last())
            .collect()
    }

    /// Does the node participate in control flow at all?
    fn has_cfg(&self, id: NodeId) -> bool {
        !self.cfg_edges(id).is_empty() || self.cfg_in_degree(id) > 0
    }

    /// Boolean condition of a control construct, normalized:
    /// `If` → first branch's test, `IfElem` → child 0, `While` → child 0,
    /// `DoWhile` → last child. Other kinds return the node itself.
    fn control_condition(&self, id: NodeId) -> NodeId {
        let Some(node) = self.node(id) else { return id };
        let children = self.children(id);
        match node.kind {
            NodeKind::If => children
                .first()
                .map(|&elem| self.control_condition(elem))
                .unwrap_or(id),
            NodeKind::IfElem | NodeKind::While => children.first().copied().unwrap_or(id),
            NodeKind::DoWhile => children.last().copied().unwrap_or(id),
            _ => id,
        }
    }
}

impl<S: GraphStore + ?Sized> GraphQueryExt for S {}
