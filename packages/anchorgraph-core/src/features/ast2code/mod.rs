//! Source-text reconstruction.
//!
//! Fingerprints are compared as text, so the engine needs a textual form of
//! any node. The reconstruction is deterministic and comparable, not
//! syntactically faithful PHP; both sides of a comparison go through the
//! same rules, which is all the similarity scoring needs.

use crate::shared::models::{flags, NodeId, NodeKind};
use crate::shared::ports::{GraphQueryExt, GraphStore};

/// Reconstructed text of one node, empty when the subtree carries no code.
pub fn extract_code<S: GraphStore>(store: &S, id: NodeId) -> String {
    let Some(node) = store.node(id) else { return String::new() };

    match node.kind {
        NodeKind::Var => match node.code.as_deref() {
            Some(code) => format!("${code}"),
            None => render_children(store, id, ""),
        },
        NodeKind::Prop => {
            let children = store.children(id);
            match children.as_slice() {
                [base, prop, ..] => {
                    format!("{}->{}", extract_code(store, *base), raw_code(store, *prop))
                }
                _ => format!("${}", node.code_str()),
            }
        }
        NodeKind::Dim => {
            let children = store.children(id);
            let base = children
                .first()
                .map(|&c| extract_code(store, c))
                .unwrap_or_default();
            let index = children.get(1).map(|&c| extract_code(store, c));
            match index {
                Some(index) if !index.is_empty() => format!("{base}[{index}]"),
                _ => format!("{base}[]"),
            }
        }
        NodeKind::ConstString => {
            let code = node.code_str();
            if code.is_empty() {
                String::new()
            } else {
                format!("'{code}'")
            }
        }
        NodeKind::Call | NodeKind::StaticCall | NodeKind::MethodCall | NodeKind::New => {
            render_call(store, id)
        }
        NodeKind::IncludeOrEval => {
            let keyword = match node.last_flag() {
                Some(flags::EXEC_EVAL) => "eval",
                Some(flag) if flags::is_include_flag(flag) => match flag {
                    flags::EXEC_INCLUDE_ONCE => "include_once",
                    flags::EXEC_REQUIRE => "require",
                    flags::EXEC_REQUIRE_ONCE => "require_once",
                    _ => "include",
                },
                _ => "include",
            };
            format!("{keyword} {}", render_children(store, id, " "))
        }
        NodeKind::Echo => format!("echo {}", render_args(store, id, ", ")),
        NodeKind::Print => format!("print {}", render_args(store, id, ", ")),
        NodeKind::Exit => {
            let inner = render_children(store, id, ", ");
            format!("exit({inner})")
        }
        NodeKind::Return => format!("return {}", render_children(store, id, " ")),
        NodeKind::Throw => format!("throw {}", render_children(store, id, " ")),
        NodeKind::Unset => format!("unset({})", render_children(store, id, ", ")),
        NodeKind::Assign | NodeKind::AssignRef => {
            let children = store.children(id);
            match children.as_slice() {
                [lhs, rhs, ..] => format!(
                    "{} = {}",
                    extract_code(store, *lhs),
                    extract_code(store, *rhs)
                ),
                _ => render_children(store, id, " "),
            }
        }
        NodeKind::AssignOp => {
            let children = store.children(id);
            match children.as_slice() {
                [lhs, rhs, ..] => format!(
                    "{} {}= {}",
                    extract_code(store, *lhs),
                    node.code_str(),
                    extract_code(store, *rhs)
                ),
                _ => render_children(store, id, " "),
            }
        }
        NodeKind::If | NodeKind::IfElem | NodeKind::While | NodeKind::DoWhile => {
            let condition = store.control_condition(id);
            if condition == id {
                String::new()
            } else {
                extract_code(store, condition)
            }
        }
        NodeKind::Foreach | NodeKind::For | NodeKind::Switch => {
            // Header expressions only; the body is reconstructed per
            // statement by the caller.
            let children = store.children(id);
            let headers: Vec<String> = children
                .iter()
                .filter(|&&c| store.node(c).map(|n| n.kind) != Some(NodeKind::StmtList))
                .map(|&c| extract_code(store, c))
                .filter(|s| !s.is_empty())
                .collect();
            headers.join(" ")
        }
        NodeKind::ArgList | NodeKind::StmtList => render_children(store, id, ", "),
        NodeKind::Param => format!("${}", node.code_str()),
        NodeKind::FuncDecl | NodeKind::Method | NodeKind::Closure => {
            format!("function {}", node.name.as_deref().unwrap_or(""))
        }
        NodeKind::Null => String::new(),
        _ => {
            let own = node.code_str();
            if own.is_empty() {
                render_children(store, id, " ")
            } else {
                own.to_string()
            }
        }
    }
}

/// Texts of several nodes, one per line, empty reconstructions skipped.
pub fn extract_code_list<S: GraphStore>(store: &S, ids: &[NodeId]) -> String {
    let mut out = String::new();
    for &id in ids {
        let text = extract_code(store, id);
        if !text.is_empty() {
            out.push_str(&text);
            out.push('\n');
        }
    }
    out
}

fn render_call<S: GraphStore>(store: &S, id: NodeId) -> String {
    let Some(node) = store.node(id) else { return String::new() };
    let args: Vec<String> = store
        .args_of(id)
        .into_iter()
        .map(|arg| extract_code(store, arg))
        .collect();
    let callee = match node.kind {
        NodeKind::MethodCall => {
            let receiver = store
                .children(id)
                .first()
                .map(|&c| extract_code(store, c))
                .unwrap_or_default();
            format!("{receiver}->{}", node.code_str())
        }
        NodeKind::New => format!("new {}", node.code_str()),
        _ => node.code_str().to_string(),
    };
    format!("{callee}({})", args.join(", "))
}

fn render_children<S: GraphStore>(store: &S, id: NodeId, sep: &str) -> String {
    let parts: Vec<String> = store
        .children(id)
        .into_iter()
        .map(|c| extract_code(store, c))
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(sep)
}

fn render_args<S: GraphStore>(store: &S, id: NodeId, sep: &str) -> String {
    let parts: Vec<String> = store
        .args_of(id)
        .into_iter()
        .map(|c| extract_code(store, c))
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(sep)
}

fn raw_code<S: GraphStore>(store: &S, id: NodeId) -> String {
    store
        .node(id)
        .map(|n| n.code_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    #[test]
    fn call_with_args_reconstructs() {
        let mut b = GraphBuilder::new();
        let top = b.file("c.php");
        let call = b.coded(NodeKind::Call, 2, "unlink");
        let args = b.node(NodeKind::ArgList, 2);
        let var = b.coded(NodeKind::Var, 2, "path");
        b.attach(top, call);
        b.attach(call, args);
        b.attach(args, var);
        let store = b.build();

        assert_eq!(extract_code(&store, call), "unlink($path)");
    }

    #[test]
    fn assignment_with_superglobal_dim() {
        let mut b = GraphBuilder::new();
        let top = b.file("a.php");
        let assign = b.node(NodeKind::Assign, 2);
        let lhs = b.coded(NodeKind::Var, 2, "f");
        let dim = b.node(NodeKind::Dim, 2);
        let base = b.coded(NodeKind::Var, 2, "_GET");
        let index = b.coded(NodeKind::ConstString, 2, "file");
        b.attach(top, assign);
        b.attach(assign, lhs);
        b.attach(assign, dim);
        b.attach(dim, base);
        b.attach(dim, index);
        let store = b.build();

        assert_eq!(extract_code(&store, assign), "$f = $_GET['file']");
    }

    #[test]
    fn echo_joins_arguments() {
        let mut b = GraphBuilder::new();
        let top = b.file("e.php");
        let echo = b.node(NodeKind::Echo, 2);
        let a = b.coded(NodeKind::Var, 2, "a");
        let s = b.coded(NodeKind::ConstString, 2, "sep");
        b.attach(top, echo);
        b.attach(echo, a);
        b.attach(echo, s);
        let store = b.build();

        assert_eq!(extract_code(&store, echo), "echo $a, 'sep'");
    }

    #[test]
    fn include_keyword_follows_flag() {
        let mut b = GraphBuilder::new();
        let top = b.file("i.php");
        let inc = b.node(NodeKind::IncludeOrEval, 2);
        b.flag(inc, crate::shared::models::flags::EXEC_REQUIRE_ONCE);
        let path = b.coded(NodeKind::Var, 2, "page");
        b.attach(top, inc);
        b.attach(inc, path);
        let store = b.build();

        assert_eq!(extract_code(&store, inc), "require_once $page");
    }

    #[test]
    fn list_extraction_is_stable() {
        let mut b = GraphBuilder::new();
        let top = b.file("l.php");
        let call = b.coded(NodeKind::Call, 2, "f");
        let echo = b.node(NodeKind::Echo, 3);
        let v = b.coded(NodeKind::Var, 3, "x");
        b.attach(top, call);
        b.attach(top, echo);
        b.attach(echo, v);
        let store = b.build();

        let first = extract_code_list(&store, &[call, echo]);
        let second = extract_code_list(&store, &[call, echo]);
        assert_eq!(first, second);
        assert_eq!(first, "f()\necho $x\n");
    }
}
