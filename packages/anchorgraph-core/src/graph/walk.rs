//! Structured CFG walk.
//!
//! The store exposes raw CFG edges, not control structure; the walker
//! reconstructs the structured shapes explicitly. Loops register a
//! "cycle exit" alias (loop header → exit target) so that a back-edge
//! arriving at the header is redirected past the loop; aliases are resolved
//! iteratively before every step. An id window bounds the walk to one
//! construct or to a `[far, anchor]` span, a per-parent revisit counter
//! bounds re-entry over unmodeled back-edges, and an overall step budget
//! guards against a misbehaving store.
//!
//! Both the anchor search and the fingerprint path exploration drive this
//! walker with different sinks.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::config::{TRAVERSAL_REVISIT_THRESHOLD, TRAVERSAL_STEP_BUDGET};
use crate::errors::{AnchorError, Result};
use crate::shared::models::{CfgEdge, FlowLabel, GraphNode, NodeId, NodeKind};
use crate::shared::ports::GraphStore;

/// Which structured position a walked node occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepShape {
    /// Condition of a `while` loop.
    WhileHeader,
    /// Test expression of an `if`/`elseif` branch.
    IfTest,
    /// Test clause of a `for` loop.
    ForTest,
    /// `foreach` header.
    ForeachHeader,
    /// Subject expression of a `switch`.
    SwitchValue,
    /// Plain statement followed through its single successor.
    Statement,
}

/// Walk configuration.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Inclusive id window `[lo, hi]`.
    pub window: (NodeId, NodeId),
    /// Enforce the lower bound on every step (anchor search) or only on the
    /// seed (path exploration).
    pub enforce_lower_always: bool,
    /// Per-parent revisit cap; `None` disables the counter.
    pub revisit_limit: Option<usize>,
    /// Drop steps whose (parent, node, label) triple was already taken.
    pub dedup_steps: bool,
    /// Overall step budget.
    pub step_budget: usize,
}

impl WalkOptions {
    /// Options for the anchor search over one construct's id range.
    pub fn for_anchor_search(window: (NodeId, NodeId)) -> Self {
        WalkOptions {
            window,
            enforce_lower_always: true,
            revisit_limit: Some(TRAVERSAL_REVISIT_THRESHOLD),
            dedup_steps: false,
            step_budget: TRAVERSAL_STEP_BUDGET,
        }
    }

    /// Options for fingerprint path exploration over `[far, anchor]`.
    pub fn for_path_exploration(window: (NodeId, NodeId)) -> Self {
        WalkOptions {
            window,
            enforce_lower_always: false,
            revisit_limit: None,
            dedup_steps: true,
            step_budget: TRAVERSAL_STEP_BUDGET,
        }
    }
}

struct Frame {
    node: NodeId,
    parent: Option<NodeId>,
    label: Option<FlowLabel>,
    is_seed: bool,
}

/// Walk the CFG from `seed`, reporting every resolved step to `sink` as
/// `(shape, parent, node, label)`.
///
/// Fails fast with [`AnchorError::UnsupportedConstruct`] on try/catch
/// shapes.
pub fn walk_cfg<S, F>(store: &S, seed: NodeId, options: &WalkOptions, sink: &mut F) -> Result<()>
where
    S: GraphStore,
    F: FnMut(&S, StepShape, Option<&GraphNode>, &GraphNode, Option<&FlowLabel>) -> Result<()>,
{
    let (lo, hi) = options.window;
    let mut alias: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    let mut revisits: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut taken_steps: FxHashSet<(Option<NodeId>, NodeId, Option<String>)> =
        FxHashSet::default();
    let mut budget = options.step_budget;

    let mut stack = vec![Frame { node: seed, parent: None, label: None, is_seed: true }];

    while let Some(frame) = stack.pop() {
        if budget == 0 {
            warn!(seed, "traversal step budget exhausted, stopping walk");
            return Ok(());
        }
        budget -= 1;

        let node_id = resolve_alias(&alias, frame.node);
        let Some(node) = store.node(node_id) else { continue };

        if node.id > hi {
            continue;
        }
        if (frame.is_seed || options.enforce_lower_always) && node.id < lo {
            continue;
        }
        // Artificial entry/exit nodes carry no line.
        let Some(lineno) = node.lineno else { continue };

        if let Some(parent_id) = frame.parent {
            if let Some(parent) = store.node(parent_id) {
                // Artificial top node reached through a back-edge.
                if parent.lineno.is_some_and(|pl| lineno < pl)
                    && lineno == 1
                    && node.kind == NodeKind::Null
                {
                    continue;
                }
            }
            // First parented arrival through a node counts 1 and proceeds;
            // re-entry that reaches the threshold is cut.
            if let Some(limit) = options.revisit_limit {
                let count = revisits.entry(parent_id).or_insert(0);
                *count += 1;
                if *count >= limit {
                    continue;
                }
            }
        }

        if options.dedup_steps {
            let key = (
                frame.parent,
                node.id,
                frame.label.as_ref().map(FlowLabel::as_text),
            );
            if !taken_steps.insert(key) {
                continue;
            }
        }

        let parent_node = frame.parent.and_then(|p| store.node(p));
        let ast_parent_kind = store.parent(node.id).map(|p| p.kind);
        let shape = classify_shape(node, ast_parent_kind)?;
        sink(store, shape, parent_node, node, frame.label.as_ref())?;

        match shape {
            StepShape::WhileHeader => {
                let edges = sorted_edges(store, node.id);
                if let [enter, exit] = edges.as_slice() {
                    alias.insert(node.id, exit.to);
                    stack.push(Frame {
                        node: enter.to,
                        parent: Some(node.id),
                        label: None,
                        is_seed: false,
                    });
                }
            }
            StepShape::IfTest => {
                let edges = sorted_edges(store, node.id);
                for edge in edges.into_iter().rev() {
                    stack.push(Frame {
                        node: edge.to,
                        parent: Some(node.id),
                        label: Some(edge.label.normalized()),
                        is_seed: false,
                    });
                }
            }
            StepShape::ForTest => {
                let edges = sorted_edges(store, node.id);
                if let [enter, exit] = edges.as_slice() {
                    // The back-edge re-enters through the increment clause.
                    let for_node = store.parent(node.id).map(|p| p.id);
                    if let Some(for_id) = for_node {
                        if let Some(&increment) = store.children(for_id).get(2) {
                            alias.insert(increment, exit.to);
                        }
                    }
                    stack.push(Frame {
                        node: enter.to,
                        parent: Some(node.id),
                        label: None,
                        is_seed: false,
                    });
                }
            }
            StepShape::ForeachHeader => {
                let edges = sorted_edges(store, node.id);
                if edges.len() == 2 {
                    let (complete, next) = if edges[0].label == FlowLabel::Complete {
                        (&edges[0], &edges[1])
                    } else {
                        (&edges[1], &edges[0])
                    };
                    alias.insert(node.id, complete.to);
                    stack.push(Frame {
                        node: next.to,
                        parent: Some(node.id),
                        label: None,
                        is_seed: false,
                    });
                }
            }
            StepShape::SwitchValue => {
                let mut edges = sorted_edges(store, node.id);
                if edges.last().map(|e| &e.label) == Some(&FlowLabel::Default) {
                    let synthesized = synthesize_default_label(&edges);
                    if let Some(last) = edges.last_mut() {
                        last.label = FlowLabel::Synthetic(synthesized);
                    }
                }
                for edge in edges.into_iter().rev() {
                    stack.push(Frame {
                        node: edge.to,
                        parent: Some(node.id),
                        label: Some(edge.label.normalized()),
                        is_seed: false,
                    });
                }
            }
            StepShape::Statement => {
                let successors = store.cfg_successors(node.id);
                let Some(&next) = successors.last() else { continue };
                // Control flow after exit/die never executes; record the
                // successor without attributing it to this statement.
                let parent = if node.kind == NodeKind::Exit { None } else { Some(node.id) };
                stack.push(Frame { node: next, parent, label: None, is_seed: false });
            }
        }
    }

    Ok(())
}

fn classify_shape(node: &GraphNode, ast_parent_kind: Option<NodeKind>) -> Result<StepShape> {
    if node.kind == NodeKind::Foreach {
        return Ok(StepShape::ForeachHeader);
    }
    match ast_parent_kind {
        Some(NodeKind::While) => Ok(StepShape::WhileHeader),
        Some(NodeKind::IfElem) if node.child_num == 0 => Ok(StepShape::IfTest),
        Some(NodeKind::For) if node.child_num == 1 => Ok(StepShape::ForTest),
        Some(NodeKind::Switch) => Ok(StepShape::SwitchValue),
        Some(NodeKind::Try) => Err(AnchorError::unsupported(format!(
            "try/catch control flow at node {}",
            node.id
        ))),
        _ => Ok(StepShape::Statement),
    }
}

fn sorted_edges<S: GraphStore>(store: &S, id: NodeId) -> Vec<CfgEdge> {
    let mut edges = store.cfg_edges(id);
    edges.sort_by_key(|e| e.to);
    edges
}

/// Resolve cycle-exit aliases transitively, iteratively. Alias values point
/// forward (to higher ids); the hop cap guards a store handing back a loop.
fn resolve_alias(alias: &FxHashMap<NodeId, NodeId>, mut id: NodeId) -> NodeId {
    for _ in 0..64 {
        match alias.get(&id) {
            Some(&next) if next != id => id = next,
            _ => break,
        }
    }
    id
}

/// Textual "none of the prior cases matched" condition for the implicit
/// switch default edge. Purely textual; nothing evaluates it.
fn synthesize_default_label(edges: &[CfgEdge]) -> String {
    let cases: Vec<String> = edges[..edges.len().saturating_sub(1)]
        .iter()
        .map(|e| e.label.as_text())
        .collect();
    format!("! ( in_array( switch_tmp, [{}] ) )", cases.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    /// while ($c) { body; } after;
    fn while_graph() -> (crate::graph::MemoryGraphStore, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let top = b.file("w.php");
        let while_node = b.node(NodeKind::While, 2);
        let cond = b.coded(NodeKind::Var, 2, "c");
        let stmts = b.node(NodeKind::StmtList, 3);
        let body = b.coded(NodeKind::Call, 3, "body_call");
        let after = b.coded(NodeKind::Call, 5, "after_call");
        b.attach(top, while_node);
        b.attach(while_node, cond);
        b.attach(while_node, stmts);
        b.attach(stmts, body);
        b.attach(top, after);
        b.cfg(cond, body, FlowLabel::True);
        b.cfg(cond, after, FlowLabel::False);
        b.cfg(body, cond, FlowLabel::Epsilon);
        (b.build(), cond, body, after)
    }

    #[test]
    fn while_loop_exits_through_alias() {
        let (store, cond, body, after) = while_graph();
        let mut visited = Vec::new();
        let options = WalkOptions::for_anchor_search((0, NodeId::MAX));
        walk_cfg(&store, cond, &options, &mut |_, _, _, node, _| {
            visited.push(node.id);
            Ok(())
        })
        .unwrap();
        // Condition, body, then redirected past the loop to `after`.
        assert_eq!(visited, vec![cond, body, after]);
    }

    #[test]
    fn revisit_counter_bounds_unstructured_back_edges() {
        let mut b = GraphBuilder::new();
        let top = b.file("l.php");
        let a = b.coded(NodeKind::Call, 2, "a");
        let c = b.coded(NodeKind::Call, 3, "c");
        b.attach(top, a);
        b.attach(top, c);
        // Raw cycle not expressed as a structured loop.
        b.cfg(a, c, FlowLabel::Epsilon);
        b.cfg(c, a, FlowLabel::Epsilon);
        let store = b.build();

        let mut arrivals: FxHashMap<NodeId, usize> = FxHashMap::default();
        let options = WalkOptions::for_anchor_search((0, NodeId::MAX));
        walk_cfg(&store, a, &options, &mut |_, _, _, node, _| {
            *arrivals.entry(node.id).or_insert(0) += 1;
            Ok(())
        })
        .unwrap();
        // Seed arrival is unparented; each parent admits one re-entry
        // before the counter reaches the threshold and cuts the cycle.
        for (_, count) in arrivals {
            assert!(count <= TRAVERSAL_REVISIT_THRESHOLD);
        }
    }

    #[test]
    fn if_branches_both_explored() {
        let mut b = GraphBuilder::new();
        let top = b.file("i.php");
        let if_node = b.node(NodeKind::If, 2);
        let elem = b.node(NodeKind::IfElem, 2);
        let cond = b.coded(NodeKind::Var, 2, "c");
        let then_call = b.coded(NodeKind::Call, 3, "t");
        let else_call = b.coded(NodeKind::Call, 5, "e");
        b.attach(top, if_node);
        b.attach(if_node, elem);
        b.attach(elem, cond);
        b.attach(top, then_call);
        b.attach(top, else_call);
        b.cfg(cond, then_call, FlowLabel::Case("1".into()));
        b.cfg(cond, else_call, FlowLabel::Case("0".into()));
        let store = b.build();

        let mut labels = Vec::new();
        let options = WalkOptions::for_path_exploration((0, NodeId::MAX));
        walk_cfg(&store, cond, &options, &mut |_, _, parent, node, label| {
            if let Some(parent) = parent {
                labels.push((parent.id, node.id, label.cloned()));
            }
            Ok(())
        })
        .unwrap();
        assert!(labels.contains(&(cond, then_call, Some(FlowLabel::True))));
        assert!(labels.contains(&(cond, else_call, Some(FlowLabel::False))));
    }

    #[test]
    fn try_shape_fails_fast() {
        let mut b = GraphBuilder::new();
        let top = b.file("t.php");
        let try_node = b.node(NodeKind::Try, 2);
        let stmt = b.coded(NodeKind::Call, 3, "guarded");
        b.attach(top, try_node);
        b.attach(try_node, stmt);
        let store = b.build();

        let options = WalkOptions::for_anchor_search((0, NodeId::MAX));
        let result = walk_cfg(&store, stmt, &options, &mut |_, _, _, _, _| Ok(()));
        assert!(matches!(result, Err(AnchorError::UnsupportedConstruct(_))));
    }

    #[test]
    fn switch_default_label_synthesized() {
        let mut b = GraphBuilder::new();
        let top = b.file("s.php");
        let switch = b.node(NodeKind::Switch, 2);
        let value = b.coded(NodeKind::Var, 2, "v");
        let case_a = b.coded(NodeKind::Call, 3, "a");
        let case_b = b.coded(NodeKind::Call, 4, "b");
        let dflt = b.coded(NodeKind::Call, 5, "d");
        b.attach(top, switch);
        b.attach(switch, value);
        b.attach(top, case_a);
        b.attach(top, case_b);
        b.attach(top, dflt);
        b.cfg(value, case_a, FlowLabel::Case("'a'".into()));
        b.cfg(value, case_b, FlowLabel::Case("'b'".into()));
        b.cfg(value, dflt, FlowLabel::Default);
        let store = b.build();

        let mut default_label = None;
        let options = WalkOptions::for_path_exploration((0, NodeId::MAX));
        walk_cfg(&store, value, &options, &mut |_, _, _, node, label| {
            if node.id == dflt {
                default_label = label.cloned();
            }
            Ok(())
        })
        .unwrap();
        match default_label {
            Some(FlowLabel::Synthetic(text)) => {
                assert!(text.contains("in_array"));
                assert!(text.contains("'a'"));
                assert!(text.contains("'b'"));
            }
            other => panic!("expected synthesized default label, got {other:?}"),
        }
    }

    #[test]
    fn window_upper_bound_stops_walk() {
        let (store, cond, body, after) = while_graph();
        let mut visited = Vec::new();
        // Window excludes the statement after the loop.
        let options = WalkOptions::for_anchor_search((cond, after - 1));
        walk_cfg(&store, cond, &options, &mut |_, _, _, node, _| {
            visited.push(node.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![cond, body]);
    }
}
