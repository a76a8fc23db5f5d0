//! Function declaration indexing
//!
//! Walks one script's AST and builds the declaration hierarchy under the
//! script's root leaf. A stack of enclosing leaves tracks where each new leaf
//! is attached.
//!
//! Indexed constructs:
//! - Function declarations (`function f() {}`)
//! - Function or arrow expressions assigned to a variable (`var f = function () {}`)
//! - Function or arrow expressions assigned to a property (`a.b = function () {}`),
//!   including chained assignments, which become path aliases
//! - Function-valued properties of an object literal whose root is a variable
//!   declarator, an assignment, or an `extend(...)` call with one or two arguments
//! - Anonymous call-argument callbacks, only when enabled in [`DiscoverOptions`]
//!
//! Anything else is not indexed. Function-valued properties of object literals
//! without a recognizable root produce an error diagnostic for that branch, and
//! an `extend` call of any other arity aborts the file.

use crate::span::{ByteRange, LineIndex};
use crate::tree::{FromObject, FunctionLeaf, FunctionTree, ANONYMOUS_PREFIX};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use swc_common::{SourceMap, Span, Spanned};
use swc_ecma_ast::*;
use swc_ecma_visit::{Visit, VisitWith};

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Index anonymous functions passed as call arguments
    pub index_anonymous_callbacks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Object literal with function properties in an unsupported position
    UnresolvedObjectRoot,
    /// Function assigned to a target that has no static name
    UnsupportedAssignmentTarget,
}

/// Structural problem found while indexing a branch of the AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub range: ByteRange,
    pub line: usize,
}

/// Declaration hierarchy of one script
#[derive(Debug, Clone)]
pub struct Discovery {
    pub root: FunctionLeaf,
    pub diagnostics: Vec<Diagnostic>,
}

/// Index every supported function declaration in a script
///
/// The returned root leaf has path `/<file_name>` and spans the whole source.
pub fn index_declarations(
    script: &Script,
    file_name: &str,
    source: &str,
    source_map: &SourceMap,
    options: &DiscoverOptions,
) -> Result<Discovery> {
    let root = FunctionLeaf::new(
        FunctionTree::script_root_path(file_name),
        ByteRange::new(0, source.len()),
    );
    let mut indexer = DeclarationIndexer {
        file: file_name,
        index: LineIndex::new(source),
        source_map,
        options,
        stack: vec![root],
        statement_ends: Vec::new(),
        diagnostics: Vec::new(),
        anonymous_count: 0,
        fatal: None,
    };

    script.visit_with(&mut indexer);

    if let Some(err) = indexer.fatal {
        return Err(err.context(format!("failed to index declarations in {}", file_name)));
    }
    while indexer.stack.len() > 1 {
        indexer.leave();
    }
    let root = indexer
        .stack
        .pop()
        .ok_or_else(|| anyhow!("declaration stack for {} is empty", file_name))?;

    Ok(Discovery {
        root,
        diagnostics: indexer.diagnostics,
    })
}

/// Object literal root: the identifier it is bound to and where that binding ends
struct ObjectRoot {
    name: String,
    end: usize,
}

#[derive(Clone, Copy)]
enum FunctionValue<'n> {
    Fn(&'n Function),
    Arrow(&'n ArrowExpr),
}

impl FunctionValue<'_> {
    fn span(&self) -> Span {
        match self {
            FunctionValue::Fn(f) => f.span,
            FunctionValue::Arrow(a) => a.span,
        }
    }
}

struct DeclarationIndexer<'a> {
    file: &'a str,
    index: LineIndex<'a>,
    source_map: &'a SourceMap,
    options: &'a DiscoverOptions,
    stack: Vec<FunctionLeaf>,
    statement_ends: Vec<usize>,
    diagnostics: Vec<Diagnostic>,
    anonymous_count: usize,
    fatal: Option<anyhow::Error>,
}

impl DeclarationIndexer<'_> {
    fn range(&self, span: Span) -> ByteRange {
        self.index.range_of(span, self.source_map)
    }

    fn line(&self, span: Span) -> usize {
        self.source_map.lookup_char_pos(span.lo).line
    }

    fn parent_path(&self) -> String {
        self.stack
            .last()
            .map(|leaf| leaf.path().to_string())
            .unwrap_or_default()
    }

    fn statement_end(&self) -> Option<usize> {
        self.statement_ends.last().copied()
    }

    fn leave(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some(done) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.children.push(done);
            }
        }
    }

    fn report(&mut self, kind: DiagnosticKind, severity: Severity, span: Span, message: String) {
        self.diagnostics.push(Diagnostic {
            file: self.file.to_string(),
            severity,
            kind,
            message,
            range: self.range(span),
            line: self.line(span),
        });
    }

    fn params(&self, value: FunctionValue<'_>) -> Vec<String> {
        let pats: Vec<&Pat> = match value {
            FunctionValue::Fn(f) => f.params.iter().map(|p| &p.pat).collect(),
            FunctionValue::Arrow(a) => a.params.iter().collect(),
        };
        pats.into_iter()
            .map(|pat| match pat {
                Pat::Ident(binding) => binding.id.sym.to_string(),
                other => self.index.slice(self.range(other.span())).to_string(),
            })
            .collect()
    }

    /// Create a leaf for a function value, index its body, and attach it
    fn index_function(&mut self, names: &[String], value: FunctionValue<'_>, leaf_init: LeafInit) {
        let parent = self.parent_path();
        let range = self.range(value.span());
        let mut leaf = FunctionLeaf::new(format!("{}/{}", parent, names[0]), range);
        leaf.paths
            .extend(names[1..].iter().map(|n| format!("{}/{}", parent, n)));
        leaf.args = self.params(value);
        leaf.declaration_end = leaf_init.declaration_end;
        leaf.from_object = leaf_init.from_object;
        if let Some(end) = leaf_init.anonymous_end {
            leaf.anonymous_end = Some(end);
            leaf.function_source
                .push(self.index.slice(range).to_string());
        }

        self.stack.push(leaf);
        match value {
            FunctionValue::Fn(f) => f.visit_with(self),
            FunctionValue::Arrow(a) => a.visit_children_with(self),
        }
        self.leave();
    }

    /// Index the function-valued properties of an object literal with a known root
    fn index_object(&mut self, obj: &ObjectLit, root: &ObjectRoot, prefix: &mut Vec<String>) {
        let holder = std::iter::once(root.name.clone())
            .chain(prefix.iter().cloned())
            .collect::<Vec<_>>()
            .join(".");

        for prop in &obj.props {
            let prop = match prop {
                PropOrSpread::Prop(prop) => prop,
                PropOrSpread::Spread(spread) => {
                    spread.visit_with(self);
                    continue;
                }
            };
            match &**prop {
                Prop::KeyValue(kv) => {
                    let key = prop_name(&kv.key);
                    match (key, as_function_value(&kv.value), unparen(&kv.value)) {
                        (Some(key), Some(value), _) => {
                            let name = format!("{}.{}", holder, key);
                            self.index_function(
                                &[name],
                                value,
                                LeafInit::method(&holder, root.end),
                            );
                        }
                        (Some(key), None, Expr::Object(inner)) => {
                            prefix.push(key);
                            self.index_object(inner, root, prefix);
                            prefix.pop();
                        }
                        _ => kv.visit_with(self),
                    }
                }
                Prop::Method(method) => match prop_name(&method.key) {
                    Some(key) => {
                        let name = format!("{}.{}", holder, key);
                        self.index_function(
                            &[name],
                            FunctionValue::Fn(&method.function),
                            LeafInit::method(&holder, root.end),
                        );
                    }
                    None => method.visit_with(self),
                },
                other => other.visit_with(self),
            }
        }
    }

    /// Handle `target.extend({...})` and `$.extend(target, {...})`
    ///
    /// Returns `false` when the call is not an extend-style merge of object
    /// literals holding functions.
    fn index_extend_call(&mut self, call: &CallExpr) -> bool {
        let member = match &call.callee {
            Callee::Expr(expr) => match unparen(expr) {
                Expr::Member(member) => member,
                _ => return false,
            },
            _ => return false,
        };
        if member_prop_name(&member.prop).as_deref() != Some("extend") {
            return false;
        }
        let holds_functions = call.args.iter().any(|arg| match unparen(&arg.expr) {
            Expr::Object(obj) => has_function_properties(obj),
            _ => false,
        });
        if !holds_functions {
            return false;
        }

        let root_name = match call.args.len() {
            1 => expr_chain_name(&member.obj),
            2 => expr_chain_name(&call.args[0].expr),
            n => {
                self.fatal = Some(anyhow!(
                    "extend call at line {} has {} arguments; object roots need 1 or 2",
                    self.line(call.span),
                    n
                ));
                return true;
            }
        };
        let Some(name) = root_name else {
            return false;
        };
        let end = self
            .statement_end()
            .unwrap_or_else(|| self.range(call.span).end);
        let root = ObjectRoot { name, end };

        call.callee.visit_with(self);
        for arg in &call.args {
            match unparen(&arg.expr) {
                Expr::Object(obj) => self.index_object(obj, &root, &mut Vec::new()),
                _ => arg.visit_with(self),
            }
        }
        true
    }

    fn index_anonymous_callbacks(&mut self, call: &CallExpr) {
        call.callee.visit_with(self);
        for arg in &call.args {
            let anonymous = match unparen(&arg.expr) {
                Expr::Fn(f) if f.ident.is_none() => Some(FunctionValue::Fn(&f.function)),
                Expr::Arrow(a) => Some(FunctionValue::Arrow(a)),
                _ => None,
            };
            match anonymous {
                Some(value) => {
                    let name = format!("{}{}", ANONYMOUS_PREFIX, self.anonymous_count);
                    self.anonymous_count += 1;
                    let end = self
                        .statement_end()
                        .unwrap_or_else(|| self.range(call.span).end);
                    self.index_function(&[name], value, LeafInit::anonymous(end));
                }
                None => arg.visit_with(self),
            }
        }
    }
}

/// Extra attributes for a new leaf, depending on how it was declared
#[derive(Default)]
struct LeafInit {
    declaration_end: Option<usize>,
    from_object: Option<FromObject>,
    anonymous_end: Option<usize>,
}

impl LeafInit {
    fn declared_until(end: Option<usize>) -> Self {
        LeafInit {
            declaration_end: end,
            ..Default::default()
        }
    }

    fn method(holder: &str, end: usize) -> Self {
        LeafInit {
            from_object: Some(FromObject {
                name: holder.to_string(),
                end_index: end,
            }),
            ..Default::default()
        }
    }

    fn anonymous(end: usize) -> Self {
        LeafInit {
            anonymous_end: Some(end),
            ..Default::default()
        }
    }
}

impl Visit for DeclarationIndexer<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.fatal.is_some() {
            return;
        }
        let end = self.range(stmt.span()).end;
        self.statement_ends.push(end);
        stmt.visit_children_with(self);
        self.statement_ends.pop();
    }

    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        if self.fatal.is_some() {
            return;
        }
        let name = decl.ident.sym.to_string();
        self.index_function(
            &[name],
            FunctionValue::Fn(&decl.function),
            LeafInit::default(),
        );
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) {
        if self.fatal.is_some() {
            return;
        }
        let decl_end = self.range(decl.span).end;
        for declarator in &decl.decls {
            if let (Pat::Ident(binding), Some(init)) = (&declarator.name, declarator.init.as_deref())
            {
                let name = binding.id.sym.to_string();
                if let Some(value) = as_function_value(init) {
                    self.index_function(&[name], value, LeafInit::declared_until(Some(decl_end)));
                    continue;
                }
                if let Expr::Object(obj) = unparen(init) {
                    let root = ObjectRoot {
                        name,
                        end: decl_end,
                    };
                    self.index_object(obj, &root, &mut Vec::new());
                    continue;
                }
            }
            declarator.visit_with(self);
        }
    }

    fn visit_assign_expr(&mut self, assign: &AssignExpr) {
        if self.fatal.is_some() {
            return;
        }
        if assign.op != AssignOp::Assign {
            assign.visit_children_with(self);
            return;
        }

        // a = b.c = function () {} binds one function to every target
        let mut names = Vec::new();
        let mut target = Some(&assign.left);
        let mut value: &Expr = &assign.right;
        loop {
            match target.and_then(assign_target_name) {
                Some(name) => names.push(name),
                None => {
                    names.clear();
                    break;
                }
            }
            match unparen(value) {
                Expr::Assign(inner) if inner.op == AssignOp::Assign => {
                    target = Some(&inner.left);
                    value = &inner.right;
                }
                _ => break,
            }
        }

        if names.is_empty() {
            if as_function_value(&assign.right).is_some() {
                self.report(
                    DiagnosticKind::UnsupportedAssignmentTarget,
                    Severity::Warning,
                    assign.span,
                    "function assigned to a target without a static name".to_string(),
                );
            }
            assign.visit_children_with(self);
            return;
        }

        let end = self
            .statement_end()
            .unwrap_or_else(|| self.range(assign.span).end);
        if let Some(function) = as_function_value(value) {
            self.index_function(&names, function, LeafInit::declared_until(Some(end)));
        } else if let Expr::Object(obj) = unparen(value) {
            let root = ObjectRoot {
                name: names[0].clone(),
                end,
            };
            self.index_object(obj, &root, &mut Vec::new());
        } else {
            assign.visit_children_with(self);
        }
    }

    fn visit_call_expr(&mut self, call: &CallExpr) {
        if self.fatal.is_some() {
            return;
        }
        if self.index_extend_call(call) {
            return;
        }
        if self.options.index_anonymous_callbacks {
            self.index_anonymous_callbacks(call);
            return;
        }
        call.visit_children_with(self);
    }

    fn visit_object_lit(&mut self, obj: &ObjectLit) {
        if self.fatal.is_some() {
            return;
        }
        // Reached only for object literals that no supported root claimed
        for prop in &obj.props {
            if let PropOrSpread::Prop(prop) = prop {
                let key = match &**prop {
                    Prop::KeyValue(kv) if as_function_value(&kv.value).is_some() => {
                        prop_name(&kv.key)
                    }
                    Prop::Method(method) => prop_name(&method.key),
                    _ => continue,
                };
                self.report(
                    DiagnosticKind::UnresolvedObjectRoot,
                    Severity::Error,
                    prop.span(),
                    format!(
                        "object root not found for function property `{}`",
                        key.unwrap_or_else(|| "<computed>".to_string())
                    ),
                );
            }
        }
        obj.visit_children_with(self);
    }
}

pub(crate) fn unparen(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(paren) => unparen(&paren.expr),
        other => other,
    }
}

fn as_function_value(expr: &Expr) -> Option<FunctionValue<'_>> {
    match unparen(expr) {
        Expr::Fn(f) => Some(FunctionValue::Fn(&f.function)),
        Expr::Arrow(a) => Some(FunctionValue::Arrow(a)),
        _ => None,
    }
}

fn has_function_properties(obj: &ObjectLit) -> bool {
    obj.props.iter().any(|prop| match prop {
        PropOrSpread::Prop(prop) => match &**prop {
            Prop::KeyValue(kv) => {
                as_function_value(&kv.value).is_some()
                    || matches!(unparen(&kv.value), Expr::Object(inner) if has_function_properties(inner))
            }
            Prop::Method(_) => true,
            _ => false,
        },
        PropOrSpread::Spread(_) => false,
    })
}

fn prop_name(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(ident) => Some(ident.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_atom_lossy().to_string()),
        PropName::Num(num) => Some(num.to_string()),
        _ => None,
    }
}

pub(crate) fn member_prop_name(prop: &MemberProp) -> Option<String> {
    match prop {
        MemberProp::Ident(ident) => Some(ident.sym.to_string()),
        MemberProp::Computed(computed) => match &*computed.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_atom_lossy().to_string()),
            _ => None,
        },
        MemberProp::PrivateName(_) => None,
    }
}

/// Dotted name of an identifier or member chain (`jQuery.fn.init`)
pub(crate) fn expr_chain_name(expr: &Expr) -> Option<String> {
    match unparen(expr) {
        Expr::Ident(ident) => Some(ident.sym.to_string()),
        Expr::This(_) => Some("this".to_string()),
        Expr::Member(member) => Some(format!(
            "{}.{}",
            expr_chain_name(&member.obj)?,
            member_prop_name(&member.prop)?
        )),
        _ => None,
    }
}

fn assign_target_name(target: &AssignTarget) -> Option<String> {
    match target {
        AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => {
            Some(binding.id.sym.to_string())
        }
        AssignTarget::Simple(SimpleAssignTarget::Member(member)) => Some(format!(
            "{}.{}",
            expr_chain_name(&member.obj)?,
            member_prop_name(&member.prop)?
        )),
        _ => None,
    }
}

#[cfg(test)]
#[path = "discover/tests.rs"]
mod tests;
