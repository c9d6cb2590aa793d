//! End-to-end comparison runs over hand-built graph pairs.
//!
//! Each scenario builds a patched ("high") graph and a target ("low")
//! graph with `GraphBuilder`, drives `VersionComparison::run` from the
//! fixing commit's modified lines, and checks the verdict together with
//! the persisted artifacts (fingerprint files, match log rows).

use proptest::prelude::*;
use tempfile::tempdir;

use anchorgraph_core::config::{SearchConfig, StorageLayout, VersionPrefix, VulnCategory};
use anchorgraph_core::features::anchor::{AnchorFinder, Classification};
use anchorgraph_core::features::fingerprint::FingerprintExtractor;
use anchorgraph_core::features::matching::{MatchLog, NO_NODE};
use anchorgraph_core::graph::{GraphBuilder, MemoryGraphStore};
use anchorgraph_core::pipeline::{Verdict, VersionComparison};
use anchorgraph_core::shared::models::{FlowLabel, ModifiedLine, NodeId, NodeKind};

/// `$f = $_GET['file']; $p = realpath($f); unlink($p);` at top level of
/// `path`. Returns the store plus the ids of the first assignment and the
/// `unlink` call.
fn delete_page(path: &str) -> (MemoryGraphStore, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let top = b.file(path);

    let assign_get = b.node(NodeKind::Assign, 2);
    let lhs_f = b.coded(NodeKind::Var, 2, "f");
    let dim = b.node(NodeKind::Dim, 2);
    let base = b.coded(NodeKind::Var, 2, "_GET");
    let key = b.coded(NodeKind::ConstString, 2, "file");
    b.attach(top, assign_get);
    b.attach(assign_get, lhs_f);
    b.attach(assign_get, dim);
    b.attach(dim, base);
    b.attach(dim, key);

    let assign_real = b.node(NodeKind::Assign, 3);
    let lhs_p = b.coded(NodeKind::Var, 3, "p");
    let realpath = b.coded(NodeKind::Call, 3, "realpath");
    let real_args = b.node(NodeKind::ArgList, 3);
    let real_arg = b.coded(NodeKind::Var, 3, "f");
    b.attach(top, assign_real);
    b.attach(assign_real, lhs_p);
    b.attach(assign_real, realpath);
    b.attach(realpath, real_args);
    b.attach(real_args, real_arg);

    let unlink = b.coded(NodeKind::Call, 4, "unlink");
    let unlink_args = b.node(NodeKind::ArgList, 4);
    let unlink_arg = b.coded(NodeKind::Var, 4, "p");
    b.attach(top, unlink);
    b.attach(unlink, unlink_args);
    b.attach(unlink_args, unlink_arg);

    b.cfg(assign_get, assign_real, FlowLabel::Epsilon);
    b.cfg(assign_real, unlink, FlowLabel::Epsilon);
    b.dataflow(assign_get, assign_real, "f");
    b.dataflow(assign_real, unlink, "p");

    (b.build(), assign_get, unlink)
}

enum ArgSpec<'a> {
    Var(&'a str),
    Str(&'a str),
}

fn call_assign(
    b: &mut GraphBuilder,
    top: NodeId,
    line: u32,
    lhs: &str,
    callee: &str,
    args: &[ArgSpec<'_>],
) -> NodeId {
    let assign = b.node(NodeKind::Assign, line);
    let lhs = b.coded(NodeKind::Var, line, lhs);
    let call = b.coded(NodeKind::Call, line, callee);
    let arg_list = b.node(NodeKind::ArgList, line);
    b.attach(top, assign);
    b.attach(assign, lhs);
    b.attach(assign, call);
    b.attach(call, arg_list);
    for arg in args {
        let child = match arg {
            ArgSpec::Var(name) => b.coded(NodeKind::Var, line, name),
            ArgSpec::Str(text) => b.coded(NodeKind::ConstString, line, text),
        };
        b.attach(arg_list, child);
    }
    assign
}

/// A purge script whose `$path` goes through a chain of string handling
/// before `unlink($path)`. With `sanitized` the patched form inserts a
/// `$path = realpath($path)` step right before the call; without it the
/// chain feeds the call directly. Returns the store, the sanitizer
/// assignment when present, and the `unlink` call.
fn purge_page(path: &str, sanitized: bool) -> (MemoryGraphStore, Option<NodeId>, NodeId) {
    use ArgSpec::{Str, Var};

    let mut b = GraphBuilder::new();
    let top = b.file(path);

    let read = b.node(NodeKind::Assign, 2);
    let lhs = b.coded(NodeKind::Var, 2, "path");
    let dim = b.node(NodeKind::Dim, 2);
    let base = b.coded(NodeKind::Var, 2, "_GET");
    let key = b.coded(NodeKind::ConstString, 2, "file");
    b.attach(top, read);
    b.attach(read, lhs);
    b.attach(read, dim);
    b.attach(dim, base);
    b.attach(dim, key);

    let strip = call_assign(&mut b, top, 3, "path", "stripslashes", &[Var("path")]);
    let decode = call_assign(&mut b, top, 4, "path", "urldecode", &[Var("path")]);

    let root_dir = b.node(NodeKind::Assign, 5);
    let root_lhs = b.coded(NodeKind::Var, 5, "base");
    let root_rhs = b.coded(NodeKind::ConstString, 5, "/var/www/gallery/uploads");
    b.attach(top, root_dir);
    b.attach(root_dir, root_lhs);
    b.attach(root_dir, root_rhs);

    let name = call_assign(&mut b, top, 6, "name", "basename", &[Var("path")]);
    let joined = call_assign(
        &mut b,
        top,
        7,
        "path",
        "sprintf",
        &[Str("%s/%s"), Var("base"), Var("name")],
    );
    let cleaned = call_assign(
        &mut b,
        top,
        8,
        "path",
        "str_replace",
        &[Str(".."), Str("."), Var("path")],
    );

    let sanitizer = sanitized
        .then(|| call_assign(&mut b, top, 9, "path", "realpath", &[Var("path")]));

    let unlink = b.coded(NodeKind::Call, 10, "unlink");
    let unlink_args = b.node(NodeKind::ArgList, 10);
    let unlink_arg = b.coded(NodeKind::Var, 10, "path");
    b.attach(top, unlink);
    b.attach(unlink, unlink_args);
    b.attach(unlink_args, unlink_arg);

    b.cfg(read, strip, FlowLabel::Epsilon);
    b.cfg(strip, decode, FlowLabel::Epsilon);
    b.cfg(decode, root_dir, FlowLabel::Epsilon);
    b.cfg(root_dir, name, FlowLabel::Epsilon);
    b.cfg(name, joined, FlowLabel::Epsilon);
    b.cfg(joined, cleaned, FlowLabel::Epsilon);
    match sanitizer {
        Some(sanitizer) => {
            b.cfg(cleaned, sanitizer, FlowLabel::Epsilon);
            b.cfg(sanitizer, unlink, FlowLabel::Epsilon);
            b.dataflow(cleaned, sanitizer, "path");
            b.dataflow(sanitizer, unlink, "path");
        }
        None => {
            b.cfg(cleaned, unlink, FlowLabel::Epsilon);
            b.dataflow(cleaned, unlink, "path");
        }
    }
    b.dataflow(read, strip, "path");
    b.dataflow(strip, decode, "path");
    b.dataflow(decode, name, "path");
    b.dataflow(root_dir, joined, "base");
    b.dataflow(name, joined, "name");
    b.dataflow(joined, cleaned, "path");

    (b.build(), sanitizer, unlink)
}

/// `function remove_file($x) { unlink($x); }` plus a top-level
/// `$f = $_GET['file']; remove_file($f);` in `path`. Returns the store,
/// the assignment id, and the wrapper call id.
fn wrapped_delete_page(path: &str) -> (MemoryGraphStore, NodeId, NodeId) {
    let mut b = GraphBuilder::new();
    let top = b.file(path);

    let decl = b.func_decl(NodeKind::FuncDecl, "remove_file", 10);
    let inner = b.coded(NodeKind::Call, 11, "unlink");
    let inner_args = b.node(NodeKind::ArgList, 11);
    let inner_arg = b.coded(NodeKind::Var, 11, "x");
    b.end_func();
    b.attach(top, decl);
    b.attach(decl, inner);
    b.attach(inner, inner_args);
    b.attach(inner_args, inner_arg);

    let assign = b.node(NodeKind::Assign, 2);
    let lhs = b.coded(NodeKind::Var, 2, "f");
    let dim = b.node(NodeKind::Dim, 2);
    let base = b.coded(NodeKind::Var, 2, "_GET");
    let key = b.coded(NodeKind::ConstString, 2, "file");
    b.attach(top, assign);
    b.attach(assign, lhs);
    b.attach(assign, dim);
    b.attach(dim, base);
    b.attach(dim, key);

    let call = b.coded(NodeKind::Call, 3, "remove_file");
    let args = b.node(NodeKind::ArgList, 3);
    let arg = b.coded(NodeKind::Var, 3, "f");
    b.attach(top, call);
    b.attach(call, args);
    b.attach(args, arg);

    b.cfg(assign, call, FlowLabel::Epsilon);
    b.dataflow(assign, call, "f");
    b.declares(call, decl);

    (b.build(), assign, call)
}

#[test]
fn preserved_vulnerable_call_yields_affected() {
    let (high, modified_root, unlink) =
        delete_page("piwigo-deadbeef_prepatch/admin/delete.php");
    let (low, _, low_unlink) = delete_page("piwigo-2.9.0/admin/delete.php");
    let storage_dir = tempdir().unwrap();
    let storage = StorageLayout::new(storage_dir.path());

    let comparison = VersionComparison::new(
        &high,
        &low,
        "piwigo",
        "deadbeef",
        "CVE-2019-0001",
        VulnCategory::FileDelete,
        VersionPrefix::new("piwigo-deadbeef_prepatch"),
        VersionPrefix::new("piwigo-2.9.0"),
        storage.clone(),
    );
    let modified = vec![ModifiedLine {
        lineno: 2,
        root_node: modified_root,
        file: "admin/delete.php".to_string(),
    }];
    let outcome = comparison.run(&modified).unwrap();

    assert_eq!(outcome.verdict, Verdict::Affected);
    assert_eq!(outcome.scores, vec![1.0]);
    assert_eq!(outcome.anchors.len(), 1);
    assert_eq!(outcome.anchors[0].node_id, unlink);
    assert_eq!(outcome.anchors[0].func_name, "unlink");
    assert_eq!(outcome.anchors[0].version, "deadbeef_prepatch");

    // Fingerprint series persisted under repo/version/anchor.
    let series = storage
        .fingerprint_dir("piwigo", "deadbeef_prepatch", unlink)
        .join(format!("series-{unlink}.json"));
    assert!(series.exists());

    // The relocated node is recorded in the match log.
    let log = MatchLog::open(&storage.match_log_path("piwigo")).unwrap();
    let record = log
        .latest("deadbeef_prepatch", "2.9.0", unlink)
        .unwrap()
        .unwrap();
    assert_eq!(record.low_node_id, i64::from(low_unlink));
}

#[test]
fn sanitizer_lacking_target_scores_high_but_short_of_affected() {
    let (high, sanitizer, unlink) =
        purge_page("piwigo-cafef00d_prepatch/admin/purge.php", true);
    let (low, _, low_unlink) = purge_page("piwigo-2.9.0/admin/purge.php", false);
    let storage_dir = tempdir().unwrap();
    let storage = StorageLayout::new(storage_dir.path());

    let comparison = VersionComparison::new(
        &high,
        &low,
        "piwigo",
        "cafef00d",
        "CVE-2019-0003",
        VulnCategory::FileDelete,
        VersionPrefix::new("piwigo-cafef00d_prepatch"),
        VersionPrefix::new("piwigo-2.9.0"),
        storage.clone(),
    );
    let modified = vec![ModifiedLine {
        lineno: 9,
        root_node: sanitizer.unwrap(),
        file: "admin/purge.php".to_string(),
    }];
    let outcome = comparison.run(&modified).unwrap();

    assert_eq!(outcome.anchors.len(), 1);
    assert_eq!(outcome.anchors[0].node_id, unlink);

    // The target keeps the whole handling chain but lacks the realpath
    // step, so the texts differ by exactly one inserted line. Jaro keeps
    // the score high; the one-line gap still rules out an exact match,
    // so the run is flagged for review instead of decided.
    assert!(outcome.scores[0] > 0.95, "score was {}", outcome.scores[0]);
    assert!(outcome.scores[0] < 0.9999);
    assert_eq!(outcome.verdict, Verdict::Unknown);

    let log = MatchLog::open(&storage.match_log_path("piwigo")).unwrap();
    let record = log
        .latest("cafef00d_prepatch", "2.9.0", unlink)
        .unwrap()
        .unwrap();
    assert_eq!(record.low_node_id, i64::from(low_unlink));
    assert!(record.reason.is_empty());
}

#[test]
fn removed_file_scores_zero_but_keeps_the_miss_reason() {
    let (high, modified_root, unlink) =
        delete_page("piwigo-deadbeef_prepatch/admin/delete.php");
    // Target version no longer ships admin/delete.php.
    let (low, _, _) = delete_page("piwigo-2.9.0/admin/other.php");
    let storage_dir = tempdir().unwrap();
    let storage = StorageLayout::new(storage_dir.path());

    let comparison = VersionComparison::new(
        &high,
        &low,
        "piwigo",
        "deadbeef",
        "CVE-2019-0001",
        VulnCategory::FileDelete,
        VersionPrefix::new("piwigo-deadbeef_prepatch"),
        VersionPrefix::new("piwigo-2.9.0"),
        storage.clone(),
    );
    let modified = vec![ModifiedLine {
        lineno: 2,
        root_node: modified_root,
        file: "admin/delete.php".to_string(),
    }];
    let outcome = comparison.run(&modified).unwrap();

    assert_eq!(outcome.scores, vec![0.0]);
    assert_eq!(outcome.verdict, Verdict::Unaffected);

    // The verdict alone conflates "file gone" with "statement gone"; the
    // log row keeps them distinguishable.
    let log = MatchLog::open(&storage.match_log_path("piwigo")).unwrap();
    let record = log
        .latest("deadbeef_prepatch", "2.9.0", unlink)
        .unwrap()
        .unwrap();
    assert_eq!(record.low_node_id, NO_NODE);
    assert_eq!(record.reason, "file not found");
}

#[test]
fn wrapped_call_requires_escalation_and_still_resolves() {
    let (high, modified_root, wrapper_call) =
        wrapped_delete_page("piwigo-deadbeef_prepatch/admin/exec.php");
    let (low, _, low_call) = wrapped_delete_page("piwigo-2.9.0/admin/exec.php");

    let modified = vec![ModifiedLine {
        lineno: 2,
        root_node: modified_root,
        file: "admin/exec.php".to_string(),
    }];

    // At the base search level the wrapper body is out of reach.
    let mut base = AnchorFinder::new(
        &high,
        "piwigo",
        "deadbeef",
        "CVE-2019-0002",
        VulnCategory::FileDelete,
        SearchConfig::default(),
    );
    assert!(!base.traversal(&modified).unwrap());
    assert!(base.into_anchors().is_empty());

    // The pipeline escalates internally and lands on the wrapper call.
    let storage_dir = tempdir().unwrap();
    let storage = StorageLayout::new(storage_dir.path());
    let comparison = VersionComparison::new(
        &high,
        &low,
        "piwigo",
        "deadbeef",
        "CVE-2019-0002",
        VulnCategory::FileDelete,
        VersionPrefix::new("piwigo-deadbeef_prepatch"),
        VersionPrefix::new("piwigo-2.9.0"),
        storage.clone(),
    );
    let outcome = comparison.run(&modified).unwrap();

    assert_eq!(outcome.verdict, Verdict::Affected);
    assert_eq!(outcome.anchors.len(), 1);
    assert_eq!(outcome.anchors[0].node_id, wrapper_call);
    assert_eq!(
        outcome.anchors[0].classification,
        Classification::IndirectCall
    );

    let log = MatchLog::open(&storage.match_log_path("piwigo")).unwrap();
    let record = log
        .latest("deadbeef_prepatch", "2.9.0", wrapper_call)
        .unwrap()
        .unwrap();
    assert_eq!(record.low_node_id, i64::from(low_call));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Fingerprinting must finish on any dataflow relation, cycles and
    /// self-edges included, and always emit a sorted id list.
    #[test]
    fn fingerprinting_terminates_on_cyclic_dataflow(
        edges in proptest::collection::vec((0usize..12, 0usize..12), 0..40)
    ) {
        let mut b = GraphBuilder::new();
        let top = b.file("repo-v2/a.php");
        let mut stmts = Vec::new();
        for line in 0..12u32 {
            let stmt = b.node(NodeKind::Assign, line + 2);
            b.attach(top, stmt);
            stmts.push(stmt);
        }
        for (from, to) in &edges {
            b.dataflow(stmts[*from], stmts[*to], "v");
        }
        let store = b.build();

        let mut extractor = FingerprintExtractor::new(&store);
        let fingerprint = extractor.run(stmts[11]).unwrap();
        prop_assert!(fingerprint.ids.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(fingerprint.ids.contains(&stmts[11]));
    }
}
