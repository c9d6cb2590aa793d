//! Code property graph node model.
//!
//! Node ids are assigned in source order and are monotonically increasing
//! within a file. The id doubles as an ordering and boundary key: backward
//! slicing relies on strict id decrease for termination, and compound
//! constructs are described by inclusive `[start, end]` id spans.

use serde::{Deserialize, Serialize};

/// Graph node identifier. Orders source position within a file.
pub type NodeId = u32;

/// File identifier inside one graph.
pub type FileId = u32;

/// Id of the enclosing function declaration (or toplevel pseudo-node).
pub type FuncId = u32;

/// AST node kinds the engine inspects.
///
/// The underlying store carries the full PHP AST vocabulary; everything the
/// traversal never branches on collapses into [`NodeKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Assign,
    AssignOp,
    AssignRef,
    Var,
    Dim,
    Prop,
    ConstString,
    Call,
    MethodCall,
    StaticCall,
    New,
    IncludeOrEval,
    Echo,
    Print,
    Exit,
    Return,
    Unset,
    Throw,
    If,
    IfElem,
    While,
    DoWhile,
    For,
    Foreach,
    Switch,
    SwitchCase,
    Try,
    Param,
    ArgList,
    FuncDecl,
    Method,
    Closure,
    Toplevel,
    StmtList,
    Null,
    Other,
}

impl NodeKind {
    /// Call-like statements resolved through the call graph.
    pub fn is_call_like(self) -> bool {
        matches!(
            self,
            NodeKind::Call | NodeKind::MethodCall | NodeKind::StaticCall | NodeKind::New
        )
    }

    /// Node kinds classified as potentially security relevant on a line.
    ///
    /// Mirrors the statement families the sensitive-function tables cover:
    /// calls, include/eval, and output statements.
    pub fn is_sink_candidate(self) -> bool {
        self.is_call_like()
            || matches!(
                self,
                NodeKind::IncludeOrEval | NodeKind::Echo | NodeKind::Print | NodeKind::Exit
            )
    }

    /// Variable-shaped kinds, excluding constants and literals.
    pub fn is_variable(self) -> bool {
        matches!(self, NodeKind::Var | NodeKind::Dim | NodeKind::Prop)
    }

    /// Assignment family.
    pub fn is_assign(self) -> bool {
        matches!(self, NodeKind::Assign | NodeKind::AssignOp | NodeKind::AssignRef)
    }

    /// Function-like declarations.
    pub fn is_declaration(self) -> bool {
        matches!(self, NodeKind::FuncDecl | NodeKind::Method)
    }
}

/// Exec-kind flags carried by `IncludeOrEval` nodes.
pub mod flags {
    pub const EXEC_INCLUDE: &str = "EXEC_INCLUDE";
    pub const EXEC_INCLUDE_ONCE: &str = "EXEC_INCLUDE_ONCE";
    pub const EXEC_REQUIRE: &str = "EXEC_REQUIRE";
    pub const EXEC_REQUIRE_ONCE: &str = "EXEC_REQUIRE_ONCE";
    pub const EXEC_EVAL: &str = "EXEC_EVAL";

    /// Include/require family (everything except eval).
    pub fn is_include_flag(flag: &str) -> bool {
        matches!(
            flag,
            EXEC_INCLUDE | EXEC_INCLUDE_ONCE | EXEC_REQUIRE | EXEC_REQUIRE_ONCE
        )
    }
}

/// One node of the code property graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Exec flags and friends. Last entry wins for include/eval dispatch.
    #[serde(default)]
    pub flags: Vec<String>,
    pub lineno: Option<u32>,
    pub end_lineno: Option<u32>,
    pub file_id: FileId,
    pub func_id: FuncId,
    /// Index among the siblings of the AST parent.
    pub child_num: u32,
    /// Literal code text (identifier, callee name, string value).
    pub code: Option<String>,
    /// Declaration or file name on Toplevel/FuncDecl/Method nodes.
    pub name: Option<String>,
}

impl GraphNode {
    /// Literal code text, or empty.
    pub fn code_str(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    /// Last flag on the node, the one include/eval dispatch reads.
    pub fn last_flag(&self) -> Option<&str> {
        self.flags.last().map(String::as_str)
    }
}

/// CFG edge labels.
///
/// Raw stores expose `"0"`/`"1"` on branch edges; those normalize to
/// `False`/`True`. Foreach loops use `Complete` (loop exhausted) vs `Next`
/// (another iteration). Switch edges carry the case label; the implicit
/// default edge is later rewritten to a synthesized "none of the cases
/// matched" expression, kept purely textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowLabel {
    True,
    False,
    Complete,
    Next,
    Case(String),
    Default,
    /// Synthesized textual condition (switch default rewrite).
    Synthetic(String),
    /// Unconditional flow.
    Epsilon,
}

impl FlowLabel {
    /// Normalize raw store labels: `"1"` → `True`, `"0"` → `False`.
    pub fn normalized(self) -> FlowLabel {
        match self {
            FlowLabel::Case(ref s) if s == "1" => FlowLabel::True,
            FlowLabel::Case(ref s) if s == "0" => FlowLabel::False,
            other => other,
        }
    }

    /// Comparable textual form, used in fingerprint path records.
    pub fn as_text(&self) -> String {
        match self {
            FlowLabel::True => "True".to_string(),
            FlowLabel::False => "False".to_string(),
            FlowLabel::Complete => "complete".to_string(),
            FlowLabel::Next => "next".to_string(),
            FlowLabel::Case(s) => s.clone(),
            FlowLabel::Default => "default".to_string(),
            FlowLabel::Synthetic(s) => s.clone(),
            FlowLabel::Epsilon => String::new(),
        }
    }
}

/// One labeled CFG edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub label: FlowLabel,
}

/// One PDG data-flow (def → use) edge, labeled with the carried variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub var: String,
}

/// Filter for file-scoped node lookups.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    pub kind: Option<NodeKind>,
    pub code: Option<String>,
}

impl NodeQuery {
    pub fn kind(kind: NodeKind) -> Self {
        NodeQuery { kind: Some(kind), code: None }
    }

    pub fn code(code: impl Into<String>) -> Self {
        NodeQuery { kind: None, code: Some(code.into()) }
    }

    /// Does `node` satisfy this query?
    pub fn matches(&self, node: &GraphNode) -> bool {
        if let Some(kind) = self.kind {
            if node.kind != kind {
                return false;
            }
        }
        if let Some(ref code) = self.code {
            if node.code.as_deref() != Some(code.as_str()) {
                return false;
            }
        }
        true
    }
}
