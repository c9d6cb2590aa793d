//! Anchor discovery.
//!
//! Starting from patch-modified statement roots, the finder follows PDG
//! use-edges and structured CFG flow to every statement a fix can
//! influence, classifying each against the vulnerability category's
//! sensitive-function table. Calls into user code are classified
//! interprocedurally up to the configured callee depth. When nothing is
//! found and the search is at its deepest level, remembered `return`
//! statements are promoted as last-resort anchors.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::config::{SearchConfig, VulnCategory, PHP_BUILT_IN_FUNCTIONS, SUPERGLOBALS};
use crate::errors::Result;
use crate::features::anchor::{
    AnchorNode, AnchorSet, CacheCenter, Classification, SINK_CANDIDATE_KINDS,
};
use crate::features::range::RangeStep;
use crate::graph::{walk_cfg, StepShape, WalkOptions};
use crate::shared::models::{flags, ModifiedLine, NodeId, NodeKind};
use crate::shared::ports::{GraphQueryExt, GraphStore};

/// One anchor search over one graph at one configuration level.
///
/// Escalation uses a fresh finder (fresh caches) per level.
pub struct AnchorFinder<'g, S> {
    store: &'g S,
    repository: String,
    version: String,
    cve_id: String,
    category: VulnCategory,
    config: SearchConfig,
    ranges: RangeStep,
    cache: CacheCenter,
    anchors: AnchorSet,
    delay_nodes: Vec<NodeId>,
}

impl<'g, S: GraphStore> AnchorFinder<'g, S> {
    pub fn new(
        store: &'g S,
        repository: impl Into<String>,
        commit_id: &str,
        cve_id: impl Into<String>,
        category: VulnCategory,
        config: SearchConfig,
    ) -> Self {
        AnchorFinder {
            store,
            repository: repository.into(),
            version: format!("{commit_id}_prepatch"),
            cve_id: cve_id.into(),
            category,
            config,
            ranges: RangeStep::new(),
            cache: CacheCenter::new(),
            anchors: AnchorSet::new(),
            delay_nodes: Vec::new(),
        }
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn into_anchors(self) -> AnchorSet {
        self.anchors
    }

    /// Runs the search over all modified lines. Returns true when the
    /// search is complete: anchors were found, or the deepest level was
    /// already in use and escalating further cannot help.
    pub fn traversal(&mut self, modified: &[ModifiedLine]) -> Result<bool> {
        let mut pdg_seeds: Vec<NodeId> = Vec::new();
        let mut cfg_seeds: Vec<NodeId> = Vec::new();
        for line in modified {
            let (pdg, cfg) = self.traversal_initiation(line.root_node)?;
            pdg_seeds.extend(pdg);
            cfg_seeds.extend(cfg);
        }
        dedup_sorted(&mut pdg_seeds);
        dedup_sorted(&mut cfg_seeds);

        for seed in pdg_seeds {
            self.forward_pdg_traversal(seed);
        }
        for seed in cfg_seeds {
            if self.store.node(seed).map(|n| n.kind) == Some(NodeKind::Null) {
                continue;
            }
            self.forward_cfg_traversal(seed)?;
        }

        if self.anchors.is_empty() && self.config.is_max_level() {
            self.promote_delay_nodes();
        }
        let complete = !self.anchors.is_empty() || self.config.is_max_level();
        debug!(
            level = self.config.level(),
            anchors = self.anchors.len(),
            complete,
            "anchor search finished"
        );
        Ok(complete)
    }

    /// Seeds both traversals from one modified statement root. Returns
    /// `(pdg seeds, cfg seeds)`.
    fn traversal_initiation(&mut self, root: NodeId) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        let mut pdg_seeds: Vec<NodeId> = Vec::new();
        let mut cfg_seeds: Vec<NodeId> = Vec::new();

        let Some(mut node_id) = self.store.node(root).map(|n| n.id) else {
            warn!(root, "modified line root missing from graph");
            return Ok((pdg_seeds, cfg_seeds));
        };
        // A modified `throw` seeds from its thrown expression.
        if self.store.node(node_id).map(|n| n.kind) == Some(NodeKind::Throw) {
            if let Some(&child) = self.store.children(node_id).first() {
                node_id = child;
            }
        }
        // A line inside a construct another modified line already covers
        // needs no seeds of its own.
        if self.cache.is_tainted(node_id) {
            return Ok((pdg_seeds, cfg_seeds));
        }
        let node = self.store.expect_node(node_id)?.clone();
        let parent_kind = self.store.parent(node_id).map(|p| p.kind);

        if node.kind.is_assign() {
            if !self.store.pdg_use_nodes(node_id).is_empty() {
                pdg_seeds.push(node_id);
            } else if let Some(&lhs) = self.store.children(node_id).first() {
                // Appends to an array leave no use-edge on the element;
                // fall back to same-named scalar reads in the function.
                let lhs_kind = self.store.node(lhs).map(|n| n.kind);
                if lhs_kind == Some(NodeKind::Dim) && self.store.dim_code(lhs).ends_with("[]") {
                    pdg_seeds.extend(self.scalar_uses_of_array(lhs, node.func_id)?);
                }
            }
        } else if parent_kind == Some(NodeKind::Throw) {
            // Expression already handled through the throw rewrite above.
        } else if is_control_header(&node, parent_kind) {
            let (start, end) = self.ranges.node_range(self.store, node_id)?;
            self.cache.add_tainted_range(start, end);
            cfg_seeds.push(node_id);
        } else if node.kind == NodeKind::Exit {
            if self.category == VulnCategory::Output {
                self.insert_anchor(node_id, Classification::DirectSensitive, 0);
            }
            self.scan_line(node_id);
            cfg_seeds.extend(self.store.cfg_successors(node_id));
        } else if node.kind.is_call_like() {
            let declarations = self.store.call_declarations(node_id);
            if let Some(&decl) = declarations.first() {
                if self.classify_declaration(decl, 1).is_sensitive() {
                    self.insert_anchor(node_id, Classification::IndirectCall, -1);
                }
            }
        } else if matches!(node.kind, NodeKind::Unset | NodeKind::Echo | NodeKind::Print) {
            for child in self.store.children(node_id) {
                self.scan_line(child);
            }
        }

        // Superglobal reads anywhere on the line are taint sources.
        for dim in self
            .store
            .descendants_of_kind(node_id, &[NodeKind::Dim], None)
        {
            let base = self.store.dim_body_code(dim);
            if SUPERGLOBALS.contains(&base.as_str()) {
                pdg_seeds.push(dim);
            }
        }

        if self.category.contains(node.code_str())
            && self.store.arg_count(node_id) >= 1
            && !self.store.free_variables(node_id).is_empty()
        {
            self.insert_anchor(node_id, Classification::DirectSensitive, 0);
        } else if node.kind == NodeKind::Return {
            self.delay_nodes.push(node_id);
        } else if self
            .store
            .node(node.func_id)
            .map(|d| d.kind.is_declaration())
            .unwrap_or(false)
        {
            // Inside a function body every later return can carry the fix's
            // effect outward.
            for ret in self.store.function_return_exprs(node.func_id) {
                if ret >= node_id {
                    self.delay_nodes.push(ret);
                }
            }
        }

        Ok((pdg_seeds, cfg_seeds))
    }

    /// Same-named scalar `Var` reads inside the enclosing declaration, the
    /// fallback seeds for `$arr[] = ...` appends.
    fn scalar_uses_of_array(&mut self, dim: NodeId, func_id: NodeId) -> Result<Vec<NodeId>> {
        let name = self.store.dim_code(dim);
        let name = name.trim_end_matches("[]").trim_start_matches('$').to_string();
        let (start, end) = self.ranges.node_range(self.store, func_id)?;
        let file_id = self.store.expect_node(dim)?.file_id;
        let query = crate::shared::models::NodeQuery {
            kind: Some(NodeKind::Var),
            code: Some(name),
        };
        Ok(self
            .store
            .nodes_in_file(file_id, &query)
            .into_iter()
            .filter(|&id| start <= id && id <= end)
            .collect())
    }

    /// PDG walk: visit each statement root once, classify its line, follow
    /// every use-successor.
    fn forward_pdg_traversal(&mut self, seed: NodeId) {
        let mut stack = vec![seed];
        while let Some(id) = stack.pop() {
            let root = self.store.ast_root_of(id);
            if !self.cache.visit_pdg(root) {
                continue;
            }
            self.scan_line(root);
            self.remember_return_delay(root);
            stack.extend(self.store.pdg_use_nodes(root));
        }
    }

    /// CFG walk bounded to the seed construct's id span.
    fn forward_cfg_traversal(&mut self, seed: NodeId) -> Result<()> {
        let range = self.ranges.node_range(self.store, seed)?;
        let options = WalkOptions::for_anchor_search(range);
        let store = self.store;
        let mut this = self;
        walk_cfg(store, seed, &options, &mut |_, shape, _, node, _| {
            match shape {
                StepShape::WhileHeader | StepShape::IfTest | StepShape::ForTest => {
                    this.scan_line(node.id);
                }
                StepShape::ForeachHeader => {
                    for child in store.children(node.id) {
                        if store.node(child).map(|n| n.kind) != Some(NodeKind::StmtList) {
                            this.scan_line(child);
                        }
                    }
                }
                StepShape::SwitchValue => {}
                StepShape::Statement => {
                    this.scan_line(node.id);
                    this.remember_return_delay(node.id);
                }
            }
            Ok(())
        })
    }

    fn remember_return_delay(&mut self, id: NodeId) {
        if self.store.node(id).map(|n| n.kind) != Some(NodeKind::Return) {
            return;
        }
        let has_vars = self
            .store
            .args_of(id)
            .last()
            .map(|&arg| !self.store.free_variables(arg).is_empty())
            .unwrap_or(false);
        if has_vars {
            self.delay_nodes.push(id);
        }
    }

    /// Classifies every sink candidate on the statement's line and inserts
    /// anchors for the sensitive ones.
    fn scan_line(&mut self, id: NodeId) {
        for candidate in self
            .store
            .descendants_of_kind(id, SINK_CANDIDATE_KINDS, None)
        {
            match self.classify_statement(candidate) {
                Classification::DirectSensitive => {
                    self.insert_anchor(candidate, Classification::DirectSensitive, -1);
                }
                Classification::IndirectCall => {
                    if let Some(&decl) = self.store.call_declarations(candidate).last() {
                        if self.classify_declaration(decl, 1).is_sensitive() {
                            self.insert_anchor(candidate, Classification::IndirectCall, -1);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Single-statement classification against the active category table.
    fn classify_statement(&self, id: NodeId) -> Classification {
        let Some(node) = self.store.node(id) else {
            return Classification::NotSensitive;
        };
        match node.kind {
            NodeKind::Echo | NodeKind::Print => {
                let output_category = self.category == VulnCategory::Output;
                if output_category && !self.store.free_variables(id).is_empty() {
                    Classification::DirectSensitive
                } else {
                    Classification::NotSensitive
                }
            }
            NodeKind::IncludeOrEval => match node.last_flag() {
                Some(flag) if flags::is_include_flag(flag) => {
                    if self.category == VulnCategory::FileInclude {
                        Classification::DirectSensitive
                    } else {
                        Classification::NotSensitive
                    }
                }
                Some(flags::EXEC_EVAL) if self.category == VulnCategory::CommandExec => {
                    Classification::DirectSensitive
                }
                _ => Classification::NotSensitive,
            },
            _ => {
                let code = node.code_str();
                if self.category.contains(code) {
                    return Classification::DirectSensitive;
                }
                if node.kind == NodeKind::Call && PHP_BUILT_IN_FUNCTIONS.contains(code) {
                    return Classification::NotSensitive;
                }
                if node.kind.is_call_like() {
                    if !self.store.call_declarations(id).is_empty() {
                        Classification::IndirectCall
                    } else if self.category == VulnCategory::DbQuery
                        && VulnCategory::db_wrapper_methods().contains(&code)
                    {
                        Classification::DirectSensitive
                    } else {
                        Classification::NotSensitive
                    }
                } else {
                    Classification::NotSensitive
                }
            }
        }
    }

    /// Interprocedural classification of a declaration body, memoized and
    /// bounded by the configured callee depth.
    fn classify_declaration(&mut self, decl: NodeId, current_level: u32) -> Classification {
        if current_level >= self.config.callee_depth() {
            return Classification::NotSensitive;
        }
        let Some(decl_node) = self.store.node(decl) else {
            return Classification::NotSensitive;
        };
        let code = decl_node.code_str().to_string();
        if let Some(known) = self.cache.classification(decl, &code) {
            return known;
        }
        let candidates = self
            .store
            .descendants_of_kind(decl, SINK_CANDIDATE_KINDS, Some(100));
        if candidates.is_empty() {
            return self
                .cache
                .record_classification(decl, &code, Classification::NotSensitive);
        }
        let mut result = Classification::NotSensitive;
        for candidate in candidates {
            let value = match self.classify_statement(candidate) {
                Classification::IndirectCall => {
                    match self.store.call_declarations(candidate).last() {
                        Some(&callee) => self.classify_declaration(callee, current_level + 1),
                        None => Classification::NotSensitive,
                    }
                }
                other => other,
            };
            result = self.cache.record_classification(decl, &code, value);
        }
        result
    }

    fn insert_anchor(&mut self, id: NodeId, classification: Classification, param_loc: i32) {
        let anchor = AnchorNode::from_graph(
            self.store,
            id,
            &self.repository,
            &self.version,
            &self.cve_id,
            classification,
            param_loc,
        );
        if self.anchors.insert(self.store, anchor) {
            debug!(node = id, ?classification, "anchor admitted");
        }
    }

    /// Last-resort promotion of remembered returns, deepest level only.
    fn promote_delay_nodes(&mut self) {
        let delays = std::mem::take(&mut self.delay_nodes);
        for id in delays {
            if self.store.node(id).map(|n| n.kind) != Some(NodeKind::Return) {
                continue;
            }
            let has_vars = self
                .store
                .args_of(id)
                .last()
                .map(|&arg| !self.store.free_variables(arg).is_empty())
                .unwrap_or(false);
            if has_vars {
                self.insert_anchor(id, Classification::DelayedReturn, 0);
            }
        }
    }
}

/// Is this node the header position of a control construct the CFG walk
/// should cover as a whole?
fn is_control_header(
    node: &crate::shared::models::GraphNode,
    parent_kind: Option<NodeKind>,
) -> bool {
    matches!(node.kind, NodeKind::Foreach | NodeKind::While)
        || (parent_kind == Some(NodeKind::For) && node.child_num == 1)
        || (parent_kind == Some(NodeKind::IfElem) && node.child_num == 0)
}

fn dedup_sorted(ids: &mut Vec<NodeId>) {
    let mut seen = FxHashSet::default();
    ids.retain(|id| seen.insert(*id));
    ids.sort_unstable();
}
