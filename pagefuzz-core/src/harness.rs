//! Harness script generation
//!
//! A harness is the JavaScript spliced into the target's script. It calls the
//! target with one argument tuple inside a `try` block and posts an execution
//! report back to the page context. A baseline tuple posts the same report
//! without calling anything.

use crate::protocol::Tuple;
use crate::tree::FunctionLeaf;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Report class posted for a fuzzed call
pub const FUZZING_RESPONSE: &str = "fuzzingResponse";
/// Report class posted for the baseline snapshot
pub const FUZZING_INIT_RESPONSE: &str = "fuzzingInitResponse";

fn callee_pattern() -> &'static Regex {
    static CALLEE_RE: OnceLock<Regex> = OnceLock::new();
    CALLEE_RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][\w$]*(\.[A-Za-z_$][\w$]*)*$").unwrap())
}

/// Everything needed to call the target from injected code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessTarget {
    /// Callable expression, e.g. `validate` or `app.views.render`
    pub callee: String,
    /// Nesting level below the script root; 1 is a top-level function
    pub level: usize,
    /// Source of an anonymous callback, re-bound to `callee` before the call
    pub anonymous_source: Option<String>,
}

impl HarnessTarget {
    /// Build the harness target of a leaf
    ///
    /// Fails when the leaf's name is not a callable dotted identifier, which
    /// is the one error that aborts a fuzz session.
    pub fn for_leaf(leaf: &FunctionLeaf) -> Result<Self> {
        let callee = leaf.name().to_string();
        if !callee_pattern().is_match(&callee) {
            bail!("cannot build a harness for {}: not a callable name", leaf.path());
        }
        let anonymous_source = if leaf.is_anonymous() {
            let source = leaf
                .function_source
                .first()
                .with_context(|| format!("anonymous function {} has no source", leaf.path()))?;
            Some(source.clone())
        } else {
            None
        };
        Ok(HarnessTarget {
            callee,
            level: leaf.nested_degree().saturating_sub(1),
            anonymous_source,
        })
    }

    pub fn is_top_level(&self) -> bool {
        self.level <= 1
    }

    /// Lines of the harness for one tuple
    pub fn lines(&self, tuple: &Tuple) -> Vec<String> {
        let mut lines = Vec::new();
        if let (Some(source), Some(_)) = (&self.anonymous_source, &tuple.args) {
            lines.push(format!("var {} = {};", self.callee, source));
        }
        let (class, invocation) = match &tuple.args {
            Some(args) => (
                FUZZING_RESPONSE,
                Some(format!("{}({})", self.callee, render_arguments(args))),
            ),
            None => (FUZZING_INIT_RESPONSE, None),
        };
        lines.extend(post_message_lines(class, &tuple.uuid, invocation.as_deref()));
        if self.is_top_level() {
            lines.insert(0, " window.onload = function(){".to_string());
            lines.push("};".to_string());
        }
        lines
    }

    /// Harness text ready to splice
    pub fn render(&self, tuple: &Tuple) -> String {
        format!("\n{}\n", self.lines(tuple).join(" \n "))
    }
}

/// Render arguments as JavaScript literals
///
/// JSON is a subset of JavaScript expression syntax, so strings come out
/// quoted and escaped.
pub fn render_arguments(args: &[Value]) -> String {
    args.iter()
        .map(|a| serde_json::to_string(a).unwrap_or_else(|_| "undefined".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Call to a dependency, with its arguments as written by the user
pub fn dependency_call(name: &str, args: &[String]) -> String {
    format!("\n{}({});\n", name, args.join(","))
}

fn post_message_lines(class: &str, uuid: &str, invocation: Option<&str>) -> Vec<String> {
    let mut lines = vec![
        "try{".to_string(),
        "   postMessage({".to_string(),
        "       debug: false,".to_string(),
        format!("       class: '{}',", class),
        "       payload: {".to_string(),
        format!("           uniqueId: '{}',", uuid),
    ];
    if let Some(call) = invocation {
        lines.push(format!("           returnedValue: {},", call));
    }
    lines.extend(
        [
            "           serializedDOM: document.documentElement.outerHTML,",
            "           callStack: [],",
            "           error: false",
            "       },",
            "   }, '*');",
            "} catch (e) {",
            "   postMessage({",
            "       debug: false,",
        ]
        .iter()
        .map(|l| l.to_string()),
    );
    lines.push(format!("       class: '{}',", class));
    lines.push("       payload: {".to_string());
    lines.push(format!("           uniqueId: '{}',", uuid));
    lines.extend(
        [
            "           returnedValue: undefined,",
            "           serializedDOM: undefined,",
            "           callStack: undefined,",
            "           error: e.toString()",
            "       },",
            "   }, '*');",
            "};",
        ]
        .iter()
        .map(|l| l.to_string()),
    );
    lines
}
