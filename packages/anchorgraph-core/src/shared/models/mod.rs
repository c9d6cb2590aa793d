//! Graph data models shared across features.

mod modified;
mod node;

pub use modified::ModifiedLine;
pub use node::{
    CfgEdge, DataFlowEdge, FileId, FlowLabel, FuncId, GraphNode, NodeId, NodeKind, NodeQuery,
    flags,
};
