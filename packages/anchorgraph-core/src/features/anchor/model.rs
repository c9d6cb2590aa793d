//! Anchor node model.

use serde::{Deserialize, Serialize};

use crate::shared::models::{NodeId, NodeKind};
use crate::shared::ports::{GraphQueryExt, GraphStore};

/// How a statement relates to the sensitive-function tables.
///
/// Interprocedural analysis combines classifications per declaration;
/// `merge` is the combination rule. `DelayedReturn` is never produced by
/// classification, only assigned when a remembered `return` is promoted to
/// a last-resort anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    NotSensitive,
    /// Call resolving to a user-defined declaration; sensitivity depends on
    /// the callee body.
    IndirectCall,
    /// Direct use of a sensitive function for the active category.
    DirectSensitive,
    /// Return statement promoted as a last-resort anchor.
    DelayedReturn,
}

impl Classification {
    /// Combine two classifications of the same declaration.
    /// `DirectSensitive` dominates, `IndirectCall` beats `NotSensitive`.
    pub fn merge(self, other: Classification) -> Classification {
        use Classification::*;
        match (self, other) {
            (DirectSensitive, _) | (_, DirectSensitive) => DirectSensitive,
            (DelayedReturn, _) | (_, DelayedReturn) => DelayedReturn,
            (IndirectCall, _) | (_, IndirectCall) => IndirectCall,
            (NotSensitive, NotSensitive) => NotSensitive,
        }
    }

    pub fn is_sensitive(self) -> bool {
        self == Classification::DirectSensitive
    }
}

/// A discovered security-relevant statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorNode {
    pub node_id: NodeId,
    pub repository: String,
    pub version: String,
    pub func_name: String,
    pub file_name: String,
    /// Index of the tainted argument, `-1` when none is singled out.
    pub param_loc: i32,
    pub classification: Classification,
    pub cve_id: String,
}

impl AnchorNode {
    /// Builds an anchor from a graph node, pulling name and file from the
    /// store.
    pub fn from_graph<S: GraphStore>(
        store: &S,
        id: NodeId,
        repository: &str,
        version: &str,
        cve_id: &str,
        classification: Classification,
        param_loc: i32,
    ) -> Self {
        let func_name = statement_name(store, id);
        let file_name = store
            .node(id)
            .and_then(|n| store.file_name(n.file_id))
            .unwrap_or_default()
            .to_string();
        AnchorNode {
            node_id: id,
            repository: repository.to_string(),
            version: version.to_string(),
            func_name,
            file_name,
            param_loc,
            classification,
            cve_id: cve_id.to_string(),
        }
    }
}

/// The growing anchor set, with the admission filter applied on insert.
///
/// An anchor whose every free variable is fully re-derived from other
/// variables cannot be influenced by external input on this statement, so
/// it is rejected. A variable counts as re-derived when some PDG definition
/// assigns it from a plain variable expression.
#[derive(Debug, Default)]
pub struct AnchorSet {
    anchors: Vec<AnchorNode>,
}

impl AnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: GraphStore>(&mut self, store: &S, anchor: AnchorNode) -> bool {
        if self.anchors.iter().any(|a| a.node_id == anchor.node_id) {
            return false;
        }
        if !Self::admissible(store, anchor.node_id) {
            return false;
        }
        self.anchors.push(anchor);
        true
    }

    /// Admission filter over the PDG definitions reaching the statement.
    fn admissible<S: GraphStore>(store: &S, id: NodeId) -> bool {
        let vars = store.free_variables(id);
        if vars.is_empty() {
            return true;
        }
        let mut derived = vec![false; vars.len()];
        for edge in store.pdg_def_edges(id) {
            let Some(def) = store.node(edge.from) else { continue };
            if !def.kind.is_assign() {
                continue;
            }
            let children = store.children(def.id);
            let Some(&lhs) = children.first() else { continue };
            let Some(lhs_node) = store.node(lhs) else { continue };
            let Some(position) = vars.iter().position(|v| v == lhs_node.code_str()) else {
                continue;
            };
            let rhs_is_plain_var = children
                .get(1)
                .and_then(|&rhs| store.node(rhs))
                .map(|rhs| rhs.kind == NodeKind::Var)
                .unwrap_or(false);
            derived[position] = rhs_is_plain_var;
        }
        !derived.iter().all(|&d| d)
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorNode> {
        self.anchors.iter()
    }

    pub fn into_vec(self) -> Vec<AnchorNode> {
        self.anchors
    }
}

/// Name the matcher keys candidate selection on: the callee code for calls,
/// the statement keyword for output and include forms.
pub fn statement_name<S: GraphStore>(store: &S, id: NodeId) -> String {
    let Some(node) = store.node(id) else { return String::new() };
    match node.kind {
        NodeKind::Echo => "echo".to_string(),
        NodeKind::Print => "print".to_string(),
        NodeKind::Exit => "exit".to_string(),
        NodeKind::Return => "return".to_string(),
        NodeKind::IncludeOrEval => match node.last_flag() {
            Some(crate::shared::models::flags::EXEC_EVAL) => "eval".to_string(),
            Some(crate::shared::models::flags::EXEC_INCLUDE_ONCE) => "include_once".to_string(),
            Some(crate::shared::models::flags::EXEC_REQUIRE) => "require".to_string(),
            Some(crate::shared::models::flags::EXEC_REQUIRE_ONCE) => "require_once".to_string(),
            _ => "include".to_string(),
        },
        _ => node.code_str().to_string(),
    }
}

/// Kinds the table-driven classification inspects on a line.
pub const SINK_CANDIDATE_KINDS: &[NodeKind] = &[
    NodeKind::Call,
    NodeKind::MethodCall,
    NodeKind::StaticCall,
    NodeKind::New,
    NodeKind::IncludeOrEval,
    NodeKind::Echo,
    NodeKind::Print,
    NodeKind::Exit,
];
