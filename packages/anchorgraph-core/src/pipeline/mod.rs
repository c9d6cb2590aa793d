//! Per-(fixing commit, target version) comparison pipeline.
//!
//! Orchestrates one full decision: escalating anchor search over the
//! patched graph, per-anchor fingerprint extraction and persistence, a
//! matcher run against the target graph, and the score matrix read back
//! from the match log. The verdict maps the matrix to
//! affected / unaffected / unknown, with a separate outcome for a matrix
//! that only reflects tooling failures.

use tracing::{info, warn};

use crate::config::{SearchConfig, StorageLayout, VersionPrefix, VulnCategory};
use crate::errors::Result;
use crate::features::anchor::{AnchorFinder, AnchorNode};
use crate::features::fingerprint::{FingerprintExtractor, FingerprintStore};
use crate::features::matching::{AnchorNodeMatcher, MatchLog, NO_NODE};
use crate::shared::models::ModifiedLine;
use crate::shared::ports::GraphStore;

/// Security verdict for one target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Affected,
    Unaffected,
    Unknown,
    /// Every score is the missing-row sentinel; a tooling failure, not a
    /// security statement.
    Undetermined,
}

impl Verdict {
    /// Thresholded mapping from a per-anchor score matrix.
    pub fn from_scores(scores: &[f64]) -> Verdict {
        if scores.is_empty() || scores.iter().all(|&s| s == -1.0) {
            return Verdict::Undetermined;
        }
        let max = scores.iter().copied().fold(f64::MIN, f64::max);
        if max > 0.9999 {
            Verdict::Affected
        } else if (0.0..0.0001).contains(&max) {
            Verdict::Unaffected
        } else {
            Verdict::Unknown
        }
    }
}

/// Result of one comparison run.
#[derive(Debug)]
pub struct ComparisonOutcome {
    pub anchors: Vec<AnchorNode>,
    /// One score per anchor: best match similarity, `0.0` for a recorded
    /// miss, `-1.0` for a missing log row.
    pub scores: Vec<f64>,
    pub verdict: Verdict,
}

/// One (fixing commit, target version) comparison.
pub struct VersionComparison<'h, 'l, H, L> {
    high_store: &'h H,
    low_store: &'l L,
    repository: String,
    commit_id: String,
    cve_id: String,
    category: VulnCategory,
    high_prefix: VersionPrefix,
    low_prefix: VersionPrefix,
    storage: StorageLayout,
}

impl<'h, 'l, H: GraphStore, L: GraphStore> VersionComparison<'h, 'l, H, L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        high_store: &'h H,
        low_store: &'l L,
        repository: impl Into<String>,
        commit_id: impl Into<String>,
        cve_id: impl Into<String>,
        category: VulnCategory,
        high_prefix: VersionPrefix,
        low_prefix: VersionPrefix,
        storage: StorageLayout,
    ) -> Self {
        VersionComparison {
            high_store,
            low_store,
            repository: repository.into(),
            commit_id: commit_id.into(),
            cve_id: cve_id.into(),
            category,
            high_prefix,
            low_prefix,
            storage,
        }
    }

    /// Full run over the fixing commit's modified lines.
    pub fn run(&self, modified: &[ModifiedLine]) -> Result<ComparisonOutcome> {
        let anchors = self.find_anchors(modified)?;
        info!(
            commit = %self.commit_id,
            anchors = anchors.len(),
            "anchor search complete"
        );

        let fingerprints = FingerprintStore::new(self.storage.clone());
        let log = MatchLog::open(&self.storage.match_log_path(&self.repository))?;

        for anchor in &anchors {
            let mut extractor = FingerprintExtractor::new(self.high_store);
            let fingerprint = extractor.run(anchor.node_id)?;
            fingerprints.save(&self.repository, &anchor.version, &fingerprint)?;
            // Matching consumes the persisted record, not the in-memory one,
            // so a later rerun against another target reads the same bytes.
            let fingerprint =
                fingerprints.load(&self.repository, &anchor.version, anchor.node_id)?;

            let required_kind = self.high_store.node(anchor.node_id).map(|n| n.kind);
            let matcher = AnchorNodeMatcher::new(
                self.high_store,
                self.low_store,
                anchor.clone(),
                self.high_prefix.clone(),
                self.low_prefix.clone(),
                required_kind,
            );
            matcher.run_with_fingerprint(&fingerprint, &log)?;
        }

        let scores = self.score_matrix(&anchors, &log)?;
        let verdict = Verdict::from_scores(&scores);
        info!(?verdict, ?scores, "comparison finished");
        Ok(ComparisonOutcome { anchors, scores, verdict })
    }

    /// Escalating anchor search: fresh finder per level, never regressing.
    fn find_anchors(&self, modified: &[ModifiedLine]) -> Result<Vec<AnchorNode>> {
        let mut config = SearchConfig::default();
        loop {
            let mut finder = AnchorFinder::new(
                self.high_store,
                self.repository.clone(),
                &self.commit_id,
                self.cve_id.clone(),
                self.category,
                config,
            );
            let complete = finder.traversal(modified)?;
            if complete {
                return Ok(finder.into_anchors().into_vec());
            }
            match config.escalated() {
                Some(next) => config = next,
                None => return Ok(finder.into_anchors().into_vec()),
            }
        }
    }

    /// Latest log row per anchor, folded to one score each.
    fn score_matrix(&self, anchors: &[AnchorNode], log: &MatchLog) -> Result<Vec<f64>> {
        let low_version = self.low_prefix.version_tag();
        let mut scores = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            let score = match log.latest(&anchor.version, low_version, anchor.node_id)? {
                None => {
                    warn!(anchor = anchor.node_id, "no match log row for anchor");
                    -1.0
                }
                Some(record) if record.low_node_id == NO_NODE => 0.0,
                Some(record) => record
                    .match_scores
                    .iter()
                    .copied()
                    .fold(0.0f64, f64::max),
            };
            scores.push(score);
        }
        Ok(scores)
    }
}
