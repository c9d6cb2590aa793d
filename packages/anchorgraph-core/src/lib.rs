//! Cross-version vulnerability anchor matching over PHP code property
//! graphs.
//!
//! Given a fixing commit analyzed into per-file modified lines on a
//! patched graph, and a target version's graph, the engine decides whether
//! the target is affected by the fixed vulnerability:
//!
//! 1. [`features::anchor::AnchorFinder`] walks CFG and PDG flow from the
//!    modified lines to discover security-relevant anchor statements,
//!    escalating its interprocedural search depth until something is found.
//! 2. [`features::fingerprint::FingerprintExtractor`] reduces each anchor
//!    to a fingerprint: its minimal backward slice plus the control nodes
//!    of the forward path leading back to it.
//! 3. [`features::matching::AnchorNodeMatcher`] relocates candidates for
//!    the anchor in the target graph, fingerprints them, and scores the
//!    reconstructed texts; every run appends one row to the match log.
//! 4. [`pipeline::VersionComparison`] folds the score matrix into an
//!    affected / unaffected / unknown verdict.
//!
//! Graphs are consumed through the [`shared::ports::GraphStore`] trait;
//! [`graph::MemoryGraphStore`] is the in-memory implementation used by
//! tests and local runs.

pub mod config;
pub mod errors;
pub mod features;
pub mod graph;
pub mod pipeline;
pub mod shared;

pub use errors::{AnchorError, Result};
