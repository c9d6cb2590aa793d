//! Anchor discovery: model, per-run caches, and the finder.

mod cache;
mod finder;
mod model;

pub use cache::CacheCenter;
pub use finder::AnchorFinder;
pub use model::{statement_name, AnchorNode, AnchorSet, Classification, SINK_CANDIDATE_KINDS};
