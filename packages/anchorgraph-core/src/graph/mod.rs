//! Graph infrastructure: the in-memory arena store and the shared
//! structured CFG walker.

mod memory;
mod walk;

pub use memory::{GraphBuilder, GraphDump, MemoryGraphStore};
pub use walk::{walk_cfg, StepShape, WalkOptions};
