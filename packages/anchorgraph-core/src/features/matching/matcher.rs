//! Cross-version anchor relocation.
//!
//! Given an anchor found in the patched "high" graph, the matcher looks
//! for the same statement in a target "low" version: remap the file path,
//! collect syntactic candidates of the anchor's statement family, filter
//! them structurally, fingerprint the survivors, and score their
//! reconstructed texts against the anchor's fingerprint text. Every run
//! appends exactly one row to the match log, miss or hit.

use tracing::{debug, warn};

use crate::config::VersionPrefix;
use crate::errors::Result;
use crate::features::anchor::AnchorNode;
use crate::features::ast2code::extract_code_list;
use crate::features::fingerprint::{Fingerprint, FingerprintExtractor};
use crate::features::matching::log::{MatchLog, MatchRecord};
use crate::features::matching::similarity::similarity_scores;
use crate::shared::models::{FileId, NodeId, NodeKind, NodeQuery};
use crate::shared::ports::{GraphQueryExt, GraphStore};

const INCLUDE_FAMILY: &[&str] = &["include", "include_once", "require", "require_once", "eval"];

pub struct AnchorNodeMatcher<'h, 'l, H, L> {
    high_store: &'h H,
    low_store: &'l L,
    high_anchor: AnchorNode,
    high_prefix: VersionPrefix,
    low_prefix: VersionPrefix,
    /// Exact statement kind the candidate must have, when the caller knows
    /// it.
    required_kind: Option<NodeKind>,
}

impl<'h, 'l, H: GraphStore, L: GraphStore> AnchorNodeMatcher<'h, 'l, H, L> {
    pub fn new(
        high_store: &'h H,
        low_store: &'l L,
        high_anchor: AnchorNode,
        high_prefix: VersionPrefix,
        low_prefix: VersionPrefix,
        required_kind: Option<NodeKind>,
    ) -> Self {
        AnchorNodeMatcher {
            high_store,
            low_store,
            high_anchor,
            high_prefix,
            low_prefix,
            required_kind,
        }
    }

    /// Full matching run. Exactly one record is appended to `log`.
    pub fn run_with_fingerprint(
        &self,
        high_fingerprint: &Fingerprint,
        log: &MatchLog,
    ) -> Result<MatchRecord> {
        let mut record = MatchRecord::new(
            self.high_anchor.version.clone(),
            self.high_anchor.node_id,
            self.low_prefix.version_tag(),
        );

        match self.match_node() {
            None => {
                record.reason = "file not found".to_string();
            }
            Some(candidates) if candidates.is_empty() => {
                record.reason = "no matching statement type".to_string();
            }
            Some(candidates) => {
                let survivors = self.node_filter(&candidates);
                if survivors.is_empty() {
                    record.reason =
                        format!("no matching function {}", self.high_anchor.func_name);
                } else {
                    let scores = self.compare_with_fingerprint(high_fingerprint, &survivors);
                    let best = scores
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(index, _)| index);
                    if let Some(best) = best {
                        record.low_node_id = i64::from(survivors[best]);
                    }
                    record.candidate_ids = survivors;
                    record.match_scores = scores;
                }
            }
        }

        debug!(
            high_node = record.high_node_id,
            low_node = record.low_node_id,
            reason = %record.reason,
            "match recorded"
        );
        log.append(&record)?;
        Ok(record)
    }

    /// Statement-family candidate selection in the remapped low file.
    /// `None` when the file itself is gone.
    fn match_node(&self) -> Option<Vec<NodeId>> {
        let low_file = self
            .high_anchor
            .file_name
            .replace(self.high_prefix.as_str(), self.low_prefix.as_str());
        let file = self.low_store.file_node(&low_file)?;
        let file_id = file.file_id;

        let name = self.high_anchor.func_name.as_str();
        let raw: Vec<NodeId> = if INCLUDE_FAMILY.contains(&name) {
            self.kind_candidates(file_id, NodeKind::IncludeOrEval)
        } else if name == "echo" {
            self.kind_candidates(file_id, NodeKind::Echo)
        } else if name == "print" {
            self.kind_candidates(file_id, NodeKind::Print)
        } else if name == "die" || name == "exit" {
            self.kind_candidates(file_id, NodeKind::Exit)
        } else if name == "return" {
            self.kind_candidates(file_id, NodeKind::Return)
        } else {
            self.call_candidates(file_id, name)
        };

        Some(raw.into_iter().filter(|&id| self.admit(id)).collect())
    }

    fn kind_candidates(&self, file_id: FileId, kind: NodeKind) -> Vec<NodeId> {
        self.low_store.nodes_in_file(file_id, &NodeQuery::kind(kind))
    }

    /// Call-like statements whose invoked name equals the anchor's, with a
    /// leading class qualifier stripped.
    fn call_candidates(&self, file_id: FileId, name: &str) -> Vec<NodeId> {
        let bare = name
            .rsplit_once("::")
            .or_else(|| name.rsplit_once("->"))
            .map(|(_, tail)| tail)
            .unwrap_or(name);
        let mut out = Vec::new();
        for id in self
            .low_store
            .nodes_in_file(file_id, &NodeQuery::code(bare))
        {
            if let Some(call) = self.nearest_call_like(id) {
                if !out.contains(&call) {
                    out.push(call);
                }
            }
        }
        out
    }

    fn nearest_call_like(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = self.low_store.node(current)?;
            if node.kind.is_call_like() {
                return Some(current);
            }
            current = self.low_store.parent(current)?.id;
        }
    }

    /// Structural admission of one candidate.
    fn admit(&self, id: NodeId) -> bool {
        let Some(node) = self.low_store.node(id) else { return false };
        let arg_count = self.low_store.arg_count(id) as i32;
        if arg_count - 1 < self.high_anchor.param_loc {
            return false;
        }
        if let Some(required) = self.required_kind {
            if node.kind != required {
                return false;
            }
        }
        if node.kind == NodeKind::Echo {
            // A literal-only echo cannot carry the vulnerability.
            let args = self.low_store.args_of(id);
            let all_literal = !args.is_empty()
                && args.iter().all(|&arg| {
                    self.low_store.node(arg).map(|n| n.kind) == Some(NodeKind::ConstString)
                });
            if all_literal {
                return false;
            }
        }
        true
    }

    /// Exact filter on free-variable names and the enclosing scope name.
    fn node_filter(&self, candidates: &[NodeId]) -> Vec<NodeId> {
        let mut anchor_vars = self.high_store.free_variables(self.high_anchor.node_id);
        anchor_vars.sort_unstable();
        let anchor_scope = scope_name(
            self.high_store,
            self.high_anchor.node_id,
            self.high_prefix.as_str(),
        );

        candidates
            .iter()
            .copied()
            .filter(|&id| {
                let mut vars = self.low_store.free_variables(id);
                vars.sort_unstable();
                let scope = scope_name(self.low_store, id, self.low_prefix.as_str());
                vars == anchor_vars && scope == anchor_scope
            })
            .collect()
    }

    /// Fingerprints each survivor in the low graph and scores reconstructed
    /// texts against the anchor's fingerprint text. A failed extraction
    /// degrades to empty text rather than aborting the run.
    fn compare_with_fingerprint(
        &self,
        high_fingerprint: &Fingerprint,
        survivors: &[NodeId],
    ) -> Vec<f64> {
        let high_text = extract_code_list(self.high_store, &high_fingerprint.ids);
        let mut extractor = FingerprintExtractor::new(self.low_store);
        let mut low_texts: Vec<String> = Vec::with_capacity(survivors.len());
        for &candidate in survivors {
            extractor.clear_cache();
            let text = match extractor.run(candidate) {
                Ok(fingerprint) => extract_code_list(self.low_store, &fingerprint.ids),
                Err(error) => {
                    warn!(candidate, %error, "candidate fingerprint failed");
                    String::new()
                }
            };
            low_texts.push(text);
        }
        similarity_scores(&high_text, &low_texts)
    }
}

/// Enclosing function or method name; the containing file name, stripped of
/// the version prefix, for top-level code.
fn scope_name<S: GraphStore>(store: &S, id: NodeId, prefix: &str) -> String {
    let Some(decl) = store.enclosing_declaration(id) else { return String::new() };
    match decl.kind {
        NodeKind::FuncDecl | NodeKind::Method => decl
            .name
            .clone()
            .or_else(|| decl.code.clone())
            .unwrap_or_default(),
        NodeKind::Closure => "anonymous_function".to_string(),
        NodeKind::Toplevel => decl
            .name
            .clone()
            .unwrap_or_default()
            .replace(prefix, ""),
        _ => String::new(),
    }
}
