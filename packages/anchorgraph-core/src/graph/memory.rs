//! In-memory code property graph.
//!
//! An explicit node-id-indexed arena plus separate per-edge-kind indices
//! (AST parent/children, CFG, PDG def/use, call graph). Implements the
//! [`GraphStore`] port for tests and for graphs loaded from an exported
//! dump.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::shared::models::{
    CfgEdge, DataFlowEdge, FileId, FlowLabel, GraphNode, NodeId, NodeKind, NodeQuery,
};
use crate::shared::ports::GraphStore;

/// Serializable exchange format for a whole graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDump {
    pub nodes: Vec<GraphNode>,
    /// (parent, child) AST edges; child order follows `child_num`.
    pub ast_edges: Vec<(NodeId, NodeId)>,
    pub cfg_edges: Vec<CfgEdge>,
    pub dataflow_edges: Vec<DataFlowEdge>,
    /// (call site, declaration) resolutions.
    pub call_edges: Vec<(NodeId, NodeId)>,
    /// (file id, file name, toplevel node).
    pub files: Vec<(FileId, String, NodeId)>,
}

/// Arena-backed [`GraphStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    nodes: FxHashMap<NodeId, GraphNode>,
    ast_parent: FxHashMap<NodeId, NodeId>,
    ast_children: FxHashMap<NodeId, Vec<NodeId>>,
    cfg_out: FxHashMap<NodeId, Vec<CfgEdge>>,
    cfg_in: FxHashMap<NodeId, usize>,
    pdg_def: FxHashMap<NodeId, Vec<DataFlowEdge>>,
    pdg_use: FxHashMap<NodeId, Vec<NodeId>>,
    call_decl: FxHashMap<NodeId, Vec<NodeId>>,
    file_by_name: FxHashMap<String, NodeId>,
    file_names: FxHashMap<FileId, String>,
    file_nodes: FxHashMap<FileId, Vec<NodeId>>,
}

impl MemoryGraphStore {
    /// Load a store from an exported dump.
    pub fn from_dump(dump: GraphDump) -> Self {
        let mut store = MemoryGraphStore::default();
        for node in dump.nodes {
            store.insert_node(node);
        }
        for (parent, child) in dump.ast_edges {
            store.insert_ast_edge(parent, child);
        }
        for edge in dump.cfg_edges {
            store.insert_cfg_edge(edge);
        }
        for edge in dump.dataflow_edges {
            store.insert_dataflow_edge(edge);
        }
        for (call, decl) in dump.call_edges {
            store.call_decl.entry(call).or_default().push(decl);
        }
        for (file_id, name, toplevel) in dump.files {
            store.register_file(file_id, name, toplevel);
        }
        store.finalize();
        store
    }

    fn insert_node(&mut self, node: GraphNode) {
        self.file_nodes.entry(node.file_id).or_default().push(node.id);
        self.nodes.insert(node.id, node);
    }

    fn insert_ast_edge(&mut self, parent: NodeId, child: NodeId) {
        self.ast_parent.insert(child, parent);
        self.ast_children.entry(parent).or_default().push(child);
    }

    fn insert_cfg_edge(&mut self, edge: CfgEdge) {
        *self.cfg_in.entry(edge.to).or_default() += 1;
        self.cfg_out.entry(edge.from).or_default().push(edge);
    }

    fn insert_dataflow_edge(&mut self, edge: DataFlowEdge) {
        self.pdg_use.entry(edge.from).or_default().push(edge.to);
        self.pdg_def.entry(edge.to).or_default().push(edge);
    }

    fn register_file(&mut self, file_id: FileId, name: String, toplevel: NodeId) {
        self.file_by_name.insert(name.clone(), toplevel);
        self.file_names.insert(file_id, name);
    }

    fn finalize(&mut self) {
        let by_child_num = |store: &FxHashMap<NodeId, GraphNode>, id: &NodeId| {
            store.get(id).map(|n| n.child_num).unwrap_or(u32::MAX)
        };
        let nodes = &self.nodes;
        for children in self.ast_children.values_mut() {
            children.sort_by_key(|id| by_child_num(nodes, id));
        }
        for ids in self.file_nodes.values_mut() {
            ids.sort_unstable();
        }
        for edges in self.cfg_out.values_mut() {
            edges.sort_by_key(|e| e.to);
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    fn parent(&self, id: NodeId) -> Option<&GraphNode> {
        self.ast_parent.get(&id).and_then(|p| self.nodes.get(p))
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.ast_children.get(&id).cloned().unwrap_or_default()
    }

    fn cfg_successors(&self, id: NodeId) -> Vec<NodeId> {
        self.cfg_out
            .get(&id)
            .map(|edges| edges.iter().map(|e| e.to).collect())
            .unwrap_or_default()
    }

    fn cfg_edges(&self, id: NodeId) -> Vec<CfgEdge> {
        self.cfg_out.get(&id).cloned().unwrap_or_default()
    }

    fn cfg_in_degree(&self, id: NodeId) -> usize {
        self.cfg_in.get(&id).copied().unwrap_or(0)
    }

    fn pdg_def_edges(&self, id: NodeId) -> Vec<DataFlowEdge> {
        self.pdg_def.get(&id).cloned().unwrap_or_default()
    }

    fn pdg_use_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.pdg_use.get(&id).cloned().unwrap_or_default()
    }

    fn call_declarations(&self, id: NodeId) -> Vec<NodeId> {
        self.call_decl.get(&id).cloned().unwrap_or_default()
    }

    fn file_node(&self, name: &str) -> Option<&GraphNode> {
        self.file_by_name.get(name).and_then(|id| self.nodes.get(id))
    }

    fn file_name(&self, file: FileId) -> Option<&str> {
        self.file_names.get(&file).map(String::as_str)
    }

    fn nodes_in_file(&self, file: FileId, query: &NodeQuery) -> Vec<NodeId> {
        self.file_nodes
            .get(&file)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.nodes.get(id).is_some_and(|n| query.matches(n)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fluent builder for in-memory graphs.
///
/// Ids are assigned in insertion order starting at 1, so building a fixture
/// top-to-bottom reproduces the source-position ordering the engine relies
/// on. Used by tests and by adapters that ingest graphs incrementally.
#[derive(Debug)]
pub struct GraphBuilder {
    store: MemoryGraphStore,
    next_id: NodeId,
    next_file: FileId,
    current_file: FileId,
    func_stack: Vec<NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            store: MemoryGraphStore::default(),
            next_id: 1,
            next_file: 1,
            current_file: 0,
            func_stack: Vec::new(),
        }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn current_func(&self) -> NodeId {
        self.func_stack.last().copied().unwrap_or(0)
    }

    /// Open a new file; subsequent nodes belong to it. Returns the
    /// toplevel node id.
    pub fn file(&mut self, name: &str) -> NodeId {
        let file_id = self.next_file;
        self.next_file += 1;
        self.current_file = file_id;
        self.func_stack.clear();
        let id = self.fresh_id();
        self.store.insert_node(GraphNode {
            id,
            kind: NodeKind::Toplevel,
            flags: vec![],
            lineno: Some(1),
            end_lineno: None,
            file_id,
            func_id: id,
            child_num: 0,
            code: None,
            name: Some(name.to_string()),
        });
        self.store.register_file(file_id, name.to_string(), id);
        self.func_stack.push(id);
        id
    }

    /// Open a function declaration scope; nodes created until
    /// [`end_func`](Self::end_func) belong to it.
    pub fn func_decl(&mut self, kind: NodeKind, name: &str, lineno: u32) -> NodeId {
        debug_assert!(kind.is_declaration() || kind == NodeKind::Closure);
        let id = self.fresh_id();
        self.store.insert_node(GraphNode {
            id,
            kind,
            flags: vec![],
            lineno: Some(lineno),
            end_lineno: None,
            file_id: self.current_file,
            func_id: id,
            child_num: 0,
            code: Some(name.to_string()),
            name: Some(name.to_string()),
        });
        self.func_stack.push(id);
        id
    }

    /// Close the innermost function scope.
    pub fn end_func(&mut self) {
        if self.func_stack.len() > 1 {
            self.func_stack.pop();
        }
    }

    /// Plain node.
    pub fn node(&mut self, kind: NodeKind, lineno: u32) -> NodeId {
        let id = self.fresh_id();
        self.store.insert_node(GraphNode {
            id,
            kind,
            flags: vec![],
            lineno: Some(lineno),
            end_lineno: None,
            file_id: self.current_file,
            func_id: self.current_func(),
            child_num: 0,
            code: None,
            name: None,
        });
        id
    }

    /// Node carrying literal code text.
    pub fn coded(&mut self, kind: NodeKind, lineno: u32, code: &str) -> NodeId {
        let id = self.node(kind, lineno);
        if let Some(node) = self.store.nodes.get_mut(&id) {
            node.code = Some(code.to_string());
        }
        id
    }

    /// Append a flag to a node.
    pub fn flag(&mut self, id: NodeId, flag: &str) {
        if let Some(node) = self.store.nodes.get_mut(&id) {
            node.flags.push(flag.to_string());
        }
    }

    /// Set the end line of a node.
    pub fn end_line(&mut self, id: NodeId, end_lineno: u32) {
        if let Some(node) = self.store.nodes.get_mut(&id) {
            node.end_lineno = Some(end_lineno);
        }
    }

    /// AST edge; the child's sibling index is assigned in attachment order.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        let child_num = self
            .store
            .ast_children
            .get(&parent)
            .map(|c| c.len() as u32)
            .unwrap_or(0);
        if let Some(node) = self.store.nodes.get_mut(&child) {
            node.child_num = child_num;
        }
        self.store.insert_ast_edge(parent, child);
    }

    /// Labeled CFG edge.
    pub fn cfg(&mut self, from: NodeId, to: NodeId, label: FlowLabel) {
        self.store.insert_cfg_edge(CfgEdge { from, to, label });
    }

    /// Data-flow (def → use) edge labeled with the carried variable.
    pub fn dataflow(&mut self, def: NodeId, use_site: NodeId, var: &str) {
        self.store.insert_dataflow_edge(DataFlowEdge {
            from: def,
            to: use_site,
            var: var.to_string(),
        });
    }

    /// Call-graph resolution edge.
    pub fn declares(&mut self, call: NodeId, decl: NodeId) {
        self.store.call_decl.entry(call).or_default().push(decl);
    }

    pub fn build(mut self) -> MemoryGraphStore {
        self.store.finalize();
        self.store
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ports::GraphQueryExt;

    #[test]
    fn builder_assigns_ids_in_source_order() {
        let mut b = GraphBuilder::new();
        let file = b.file("a.php");
        let assign = b.node(NodeKind::Assign, 2);
        let var = b.coded(NodeKind::Var, 2, "x");
        b.attach(file, assign);
        b.attach(assign, var);
        let store = b.build();

        assert!(file < assign && assign < var);
        assert_eq!(store.parent(var).unwrap().id, assign);
        assert_eq!(store.children(assign), vec![var]);
        assert_eq!(store.node(var).unwrap().code_str(), "x");
    }

    #[test]
    fn file_lookup_and_scoping() {
        let mut b = GraphBuilder::new();
        let top = b.file("admin/x.php");
        let f = b.func_decl(NodeKind::FuncDecl, "helper", 3);
        let call = b.coded(NodeKind::Call, 4, "unlink");
        b.end_func();
        let echo = b.node(NodeKind::Echo, 9);
        b.attach(top, f);
        b.attach(f, call);
        b.attach(top, echo);
        let store = b.build();

        assert_eq!(store.file_node("admin/x.php").unwrap().id, top);
        assert_eq!(store.node(call).unwrap().func_id, f);
        assert_eq!(store.node(echo).unwrap().func_id, top);
        assert_eq!(
            store.nodes_in_file(1, &NodeQuery::kind(NodeKind::Echo)),
            vec![echo]
        );
    }

    #[test]
    fn dataflow_edges_index_both_directions() {
        let mut b = GraphBuilder::new();
        b.file("a.php");
        let def = b.node(NodeKind::Assign, 2);
        let use_site = b.coded(NodeKind::Call, 3, "unlink");
        b.dataflow(def, use_site, "path");
        let store = b.build();

        assert_eq!(store.pdg_use_nodes(def), vec![use_site]);
        let defs = store.pdg_def_edges(use_site);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].var, "path");
    }

    #[test]
    fn ast_root_climbs_to_statement() {
        let mut b = GraphBuilder::new();
        let top = b.file("a.php");
        let stmts = b.node(NodeKind::StmtList, 1);
        let call = b.coded(NodeKind::Call, 2, "unlink");
        let args = b.node(NodeKind::ArgList, 2);
        let var = b.coded(NodeKind::Var, 2, "p");
        b.attach(top, stmts);
        b.attach(stmts, call);
        b.attach(call, args);
        b.attach(args, var);
        let store = b.build();

        assert_eq!(store.ast_root_of(var), call);
        assert_eq!(store.args_of(call), vec![var]);
    }

    #[test]
    fn dump_round_trip() {
        let mut b = GraphBuilder::new();
        let top = b.file("a.php");
        let call = b.coded(NodeKind::Call, 2, "unlink");
        b.attach(top, call);
        let store = b.build();

        let dump = GraphDump {
            nodes: vec![
                store.node(top).unwrap().clone(),
                store.node(call).unwrap().clone(),
            ],
            ast_edges: vec![(top, call)],
            cfg_edges: vec![],
            dataflow_edges: vec![],
            call_edges: vec![],
            files: vec![(1, "a.php".to_string(), top)],
        };
        let json = serde_json::to_string(&dump).unwrap();
        let reloaded = MemoryGraphStore::from_dump(serde_json::from_str(&json).unwrap());
        assert_eq!(reloaded.file_node("a.php").unwrap().id, top);
        assert_eq!(reloaded.children(top), vec![call]);
    }
}
