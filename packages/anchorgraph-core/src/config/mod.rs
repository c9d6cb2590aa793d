//! Immutable configuration values threaded through constructors.
//!
//! Three concerns live here:
//! - the vulnerability-category → sensitive-function tables,
//! - the interprocedural search-level configuration,
//! - filesystem layout for persisted fingerprints and match logs, plus the
//!   version path prefixes used to remap file paths across versions.

mod tables;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AnchorError, Result};
use crate::shared::models::NodeId;

pub use tables::{PHP_BUILT_IN_FUNCTIONS, SUPERGLOBALS, VulnCategory};

/// Per-parent CFG revisit cap. Bounds traversal over back-edges the
/// structured shapes do not capture.
pub const TRAVERSAL_REVISIT_THRESHOLD: usize = 2;

/// Overall traversal-step budget. The graph store is an external dependency;
/// the walker stops with a warning once the budget runs out instead of
/// spinning on a pathological answer.
pub const TRAVERSAL_STEP_BUDGET: usize = 1_000_000;

/// Interprocedural search configuration.
///
/// A discrete level selects a callee-resolution depth mask. Level 0 resolves
/// no user-declared callees during classification; level 1 follows one
/// additional level of declarations. Escalation constructs a fresh finder at
/// `level + 1`; it never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    level: u8,
}

impl SearchConfig {
    pub const MAX_LEVEL: u8 = 1;

    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX_LEVEL {
            return Err(AnchorError::config(format!(
                "search level {level} exceeds max {}",
                Self::MAX_LEVEL
            )));
        }
        Ok(SearchConfig { level })
    }

    pub fn level(self) -> u8 {
        self.level
    }

    pub fn is_max_level(self) -> bool {
        self.level >= Self::MAX_LEVEL
    }

    /// Next level up, if any.
    pub fn escalated(self) -> Option<SearchConfig> {
        if self.is_max_level() {
            None
        } else {
            Some(SearchConfig { level: self.level + 1 })
        }
    }

    /// Callee-depth bound for interprocedural classification. A call chain
    /// is followed while the current depth is below this bound.
    pub fn callee_depth(self) -> u32 {
        match self.level {
            0 => 0b0001,
            _ => 0b0011,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig { level: 0 }
    }
}

/// Path prefix of one version's source layout inside the graph store,
/// e.g. `repo-1.2.3` or `repo-abcdef_prepatch`.
///
/// File paths recorded on anchors carry this prefix; matching substitutes
/// the high-version prefix with the low-version one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPrefix {
    prefix: String,
}

impl VersionPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        VersionPrefix { prefix: prefix.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Version tag: everything after the first `-` separator, the whole
    /// prefix when there is none.
    pub fn version_tag(&self) -> &str {
        match self.prefix.split_once('-') {
            Some((_, version)) => version,
            None => &self.prefix,
        }
    }
}

/// Filesystem layout for persisted artifacts.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StorageLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one anchor's fingerprint series.
    pub fn fingerprint_dir(&self, repository: &str, version: &str, node_id: NodeId) -> PathBuf {
        self.root
            .join(repository)
            .join(version)
            .join(node_id.to_string())
    }

    /// Per-repository match log database.
    pub fn match_log_path(&self, repository: &str) -> PathBuf {
        self.root.join(repository).join("node_mapping.sqlite")
    }
}
