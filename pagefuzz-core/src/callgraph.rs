//! Call-site collection and resolution
//!
//! Every call expression of a script is attributed to the innermost leaf whose
//! range contains it, then its callee name is matched against declaration
//! names. The search is bounded: a call made from a leaf of nested degree `d`
//! only explores the tree down to degree `d + 1` before giving up, so deeply
//! indirect calls and built-ins stay unresolved. That is expected, not an
//! error.

use crate::discover::{member_prop_name, unparen};
use crate::span::{ByteRange, LineIndex};
use crate::tree::{FunctionLeaf, FunctionTree, UsedFunction};
use serde::Serialize;
use swc_common::{SourceMap, Spanned};
use swc_ecma_ast::*;
use swc_ecma_visit::{Visit, VisitWith};

/// Name recorded for immediately-invoked function expressions
pub const IIFE_NAME: &str = "(immediately invoked)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeName {
    /// `foo`, `a.b.c`, or a member chain with a non-name root (`.bar`)
    Named(String),
    /// Member chain rooted at `this`; holds the tail, e.g. `.render`
    ThisMember(String),
    ImmediatelyInvoked,
    Unnamed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub callee: CalleeName,
    pub range: ByteRange,
    pub line: usize,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    /// Calls newly recorded on a leaf
    pub attributed: usize,
    /// Recorded calls that were matched to a declaration in this pass
    pub resolved: usize,
    /// Calls outside the script root's range
    pub unattributed: usize,
}

/// Collect every call expression of a script in source order
pub fn collect_calls(script: &Script, source: &str, source_map: &SourceMap) -> Vec<CallSite> {
    let mut collector = CallCollector {
        index: LineIndex::new(source),
        source_map,
        calls: Vec::new(),
    };
    script.visit_with(&mut collector);
    collector.calls
}

struct CallCollector<'a> {
    index: LineIndex<'a>,
    source_map: &'a SourceMap,
    calls: Vec<CallSite>,
}

impl Visit for CallCollector<'_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        let arguments = call
            .args
            .iter()
            .map(|arg| {
                let text = self
                    .index
                    .slice(self.index.range_of(arg.expr.span(), self.source_map));
                match arg.spread {
                    Some(_) => format!("...{}", text),
                    None => text.to_string(),
                }
            })
            .collect();
        self.calls.push(CallSite {
            callee: callee_name(&call.callee),
            range: self.index.range_of(call.span, self.source_map),
            line: self.source_map.lookup_char_pos(call.span.lo).line,
            arguments,
        });
        call.visit_children_with(self);
    }
}

fn callee_name(callee: &Callee) -> CalleeName {
    let Callee::Expr(expr) = callee else {
        return CalleeName::Unnamed;
    };
    match unparen(expr) {
        Expr::Ident(ident) => CalleeName::Named(ident.sym.to_string()),
        member @ Expr::Member(_) => match member_chain(member) {
            (true, tail) => CalleeName::ThisMember(tail),
            (false, name) => CalleeName::Named(name),
        },
        Expr::Fn(_) | Expr::Arrow(_) => CalleeName::ImmediatelyInvoked,
        _ => CalleeName::Unnamed,
    }
}

/// Dotted name of a member chain and whether it is rooted at `this`
///
/// Roots that are neither names nor `this` render as an empty string, so
/// `make().run` yields `.run`.
fn member_chain(expr: &Expr) -> (bool, String) {
    match unparen(expr) {
        Expr::Ident(ident) => (false, ident.sym.to_string()),
        Expr::This(_) => (true, String::new()),
        Expr::Member(member) => {
            let (this_rooted, object) = member_chain(&member.obj);
            let prop = member_prop_name(&member.prop).unwrap_or_else(|| "<computed>".to_string());
            (this_rooted, format!("{}.{}", object, prop))
        }
        _ => (false, String::new()),
    }
}

/// Attribute calls to their innermost leaf and resolve callee names
///
/// Only leaves under `file_name`'s script root receive calls, since offsets of
/// different files are not comparable. Calls already recorded (same range) are
/// skipped and resolved entries are left untouched, so running this twice on
/// the same input changes nothing.
pub fn resolve_calls(tree: &mut FunctionTree, file_name: &str, calls: &[CallSite]) -> ResolutionStats {
    let mut stats = ResolutionStats::default();
    let Some(root) = tree.script_root_mut(file_name) else {
        return stats;
    };

    for call in calls {
        if !root.range.contains(&call.range) {
            stats.unattributed += 1;
            continue;
        }
        let leaf = innermost_mut(root, call.range);
        if leaf.used_functions.iter().any(|u| u.range == call.range) {
            continue;
        }
        let name = match &call.callee {
            CalleeName::Named(name) => name.clone(),
            CalleeName::ThisMember(tail) => {
                let holder = match &leaf.from_object {
                    Some(object) => object.name.clone(),
                    None => leaf.name().to_string(),
                };
                format!("{}{}", holder, tail)
            }
            CalleeName::ImmediatelyInvoked => IIFE_NAME.to_string(),
            CalleeName::Unnamed => String::new(),
        };
        leaf.used_functions.push(UsedFunction {
            name,
            range: call.range,
            line: call.line,
            arguments: call.arguments.clone(),
            path: None,
            immediately_invoked: call.callee == CalleeName::ImmediatelyInvoked,
        });
        stats.attributed += 1;
    }

    let Some(root) = tree.script_root(file_name) else {
        return stats;
    };
    let mut matches = Vec::new();
    let mut stack: Vec<(Vec<usize>, &FunctionLeaf)> = vec![(Vec::new(), root)];
    while let Some((position, leaf)) = stack.pop() {
        let limit = leaf.nested_degree() + 1;
        for (entry, used) in leaf.used_functions.iter().enumerate() {
            if used.path.is_some() || used.immediately_invoked {
                continue;
            }
            if let Some(found) = find_declaration(tree, &used.name, limit) {
                matches.push((position.clone(), entry, found.path().to_string()));
            }
        }
        for (i, child) in leaf.children.iter().enumerate() {
            let mut child_position = position.clone();
            child_position.push(i);
            stack.push((child_position, child));
        }
    }

    if let Some(root) = tree.script_root_mut(file_name) {
        for (position, entry, path) in matches {
            if let Some(used) = leaf_at_mut(root, &position).and_then(|l| l.used_functions.get_mut(entry)) {
                used.path = Some(path);
                stats.resolved += 1;
            }
        }
    }
    stats
}

/// First leaf, in depth-first pre-order, with a name matching `name`
///
/// Script roots sit at degree 1. Children of a leaf at degree `n` are only
/// explored while `limit >= n`.
pub fn find_declaration<'t>(tree: &'t FunctionTree, name: &str, limit: usize) -> Option<&'t FunctionLeaf> {
    if name.is_empty() {
        return None;
    }
    tree.children
        .iter()
        .find_map(|root| root.children.iter().find_map(|c| search(c, name, 2, limit)))
}

fn search<'t>(leaf: &'t FunctionLeaf, name: &str, degree: usize, limit: usize) -> Option<&'t FunctionLeaf> {
    if leaf.names().any(|n| n == name) {
        return Some(leaf);
    }
    if limit < degree {
        return None;
    }
    leaf.children
        .iter()
        .find_map(|c| search(c, name, degree + 1, limit))
}

fn innermost_mut(leaf: &mut FunctionLeaf, range: ByteRange) -> &mut FunctionLeaf {
    match leaf.children.iter().position(|c| c.range.contains(&range)) {
        Some(i) => innermost_mut(&mut leaf.children[i], range),
        None => leaf,
    }
}

fn leaf_at_mut<'t>(root: &'t mut FunctionLeaf, position: &[usize]) -> Option<&'t mut FunctionLeaf> {
    let mut leaf = root;
    for &i in position {
        leaf = leaf.children.get_mut(i)?;
    }
    Some(leaf)
}

#[cfg(test)]
#[path = "callgraph/tests.rs"]
mod tests;
