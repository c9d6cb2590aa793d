//! Patch-analysis input: modified source lines.

use serde::{Deserialize, Serialize};

use super::NodeId;

/// One modified line reported by the external diff analyzer.
///
/// `root_node` is the id of the statement root covering the line in the
/// patched ("high") graph; it seeds the anchor search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedLine {
    pub lineno: u32,
    pub root_node: NodeId,
    pub file: String,
}
