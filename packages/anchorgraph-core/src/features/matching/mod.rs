//! Cross-version matching: candidate relocation, similarity scoring, and
//! the append-only match log.

mod log;
mod matcher;
mod similarity;

pub use log::{MatchLog, MatchRecord, NO_NODE};
pub use matcher::AnchorNodeMatcher;
pub use similarity::{canonicalize, jaro_similarity, similarity_scores};
