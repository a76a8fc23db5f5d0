//! Reporting and output generation
//!
//! Output ordering follows the tree's declaration order and the dispatcher's
//! execution order, so repeated runs over the same input render identically.

use crate::analysis::AnalysisReport;
use crate::dispatcher::FuzzOutcome;
use crate::harness::render_arguments;
use crate::registry::{ModuleKind, ModuleRegistry};
use crate::tree::{FunctionLeaf, FunctionTree};
use serde::Serialize;

/// Render the function tree as an indented listing
pub fn render_tree_text(tree: &FunctionTree) -> String {
    let mut output = format!("{}\n", tree.page);
    for root in &tree.children {
        render_leaf(root, 1, &mut output);
    }
    output
}

fn render_leaf(leaf: &FunctionLeaf, depth: usize, output: &mut String) {
    let indent = "  ".repeat(depth);
    if depth == 1 {
        output.push_str(&format!("{}{}\n", indent, leaf.name()));
    } else {
        let mut line = format!("{}{}({})", indent, leaf.name(), leaf.args.join(", "));
        if leaf.paths.len() > 1 {
            let aliases: Vec<&str> = leaf.names().skip(1).collect();
            line.push_str(&format!(" aka {}", aliases.join(", ")));
        }
        line.push_str(&format!(" [{}..{}]", leaf.range.start, leaf.range.end));
        output.push_str(&line);
        output.push('\n');
        for used in &leaf.used_functions {
            let target = used.path.as_deref().unwrap_or("?");
            output.push_str(&format!(
                "{}  -> {} (line {}) {}\n",
                indent, used.name, used.line, target
            ));
        }
    }
    for child in &leaf.children {
        render_leaf(child, depth + 1, output);
    }
}

/// Render per-file analysis summaries and their diagnostics
pub fn render_analysis_text(reports: &[AnalysisReport]) -> String {
    let mut output = format!(
        "{:<24} {:<10} {:<6} {}\n",
        "FILE", "FUNCTIONS", "CALLS", "RESOLVED"
    );
    for report in reports {
        output.push_str(&format!(
            "{:<24} {:<10} {:<6} {}\n",
            truncate_or_pad(&report.file, 24),
            report.functions,
            report.calls,
            report.resolution.resolved
        ));
        for diagnostic in &report.diagnostics {
            output.push_str(&format!(
                "  {}:{} {:?}: {}\n",
                diagnostic.file, diagnostic.line, diagnostic.severity, diagnostic.message
            ));
        }
    }
    output
}

/// Render a fuzz outcome, one line per executed tuple
pub fn render_outcome_text(outcome: &FuzzOutcome) -> String {
    let mut output = format!("target: {}\n", outcome.target);
    output.push_str(&format!(
        "{:<8} {:<40} {:<30} {}\n",
        "FLAGGED", "ARGS", "VALUE", "INFO"
    ));
    for record in &outcome.records {
        let flagged = match &record.detection {
            Some(verdict) if verdict.result => "yes",
            Some(_) => "no",
            None => "-",
        };
        let args = match &record.args {
            Some(args) => render_arguments(args),
            None => "<baseline>".to_string(),
        };
        let value = match &record.response.error {
            Some(error) => format!("error: {}", error),
            None => record.response.value.to_string(),
        };
        let info = record
            .detection
            .as_ref()
            .map(|d| d.info.as_str())
            .unwrap_or("");
        output.push_str(&format!(
            "{:<8} {:<40} {:<30} {}\n",
            flagged,
            truncate_or_pad(&args, 40),
            truncate_or_pad(&value, 30),
            info
        ));
    }
    output.push_str(&format!(
        "{} of {} executions flagged\n",
        outcome.flagged().count(),
        outcome.records.len()
    ));
    output
}

/// Render registered and rejected plugins
pub fn render_registry_text(registry: &ModuleRegistry) -> String {
    let mut output = String::new();
    for (title, kind) in [
        ("generation", ModuleKind::Generation),
        ("detection", ModuleKind::Detection),
        ("brain", ModuleKind::Brain),
    ] {
        output.push_str(&format!("{}:\n", title));
        for descriptor in registry.descriptors(kind) {
            output.push_str(&format!(
                "  {:<24} {:<24} {}\n",
                descriptor.module_file, descriptor.display_name, descriptor.description
            ));
        }
    }
    if !registry.rejected.is_empty() {
        output.push_str("rejected:\n");
        for rejection in &registry.rejected {
            output.push_str(&format!("  {:<24} {}\n", rejection.module_file, rejection.reason));
        }
    }
    output
}

/// Render any serializable report as pretty JSON
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyse_script, ScriptSource};
    use crate::discover::DiscoverOptions;
    use crate::protocol::{DetectionVerdict, ExecutionResponse, FuzzRecord};
    use serde_json::json;

    #[test]
    fn test_tree_text_lists_nested_functions_and_calls() {
        let mut tree = FunctionTree::new("http://localhost/");
        analyse_script(
            &mut tree,
            &ScriptSource::new(
                "app.js",
                "function outer(a) {\n  function inner(b) { return b; }\n  inner(a);\n}\n",
            ),
            &DiscoverOptions::default(),
        )
        .unwrap();
        let text = render_tree_text(&tree);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "http://localhost/");
        assert_eq!(lines[1], "  app.js");
        assert!(lines[2].starts_with("    outer(a) [0.."));
        assert!(text.contains("-> inner (line 3) /app.js/outer/inner"));
        assert!(text.contains("      inner(b) ["));
    }

    #[test]
    fn test_outcome_text() {
        let outcome = FuzzOutcome {
            target: "/app.js/clean".to_string(),
            records: vec![
                FuzzRecord {
                    uuid: "1".into(),
                    args: Some(vec![json!("<b>")]),
                    response: ExecutionResponse {
                        value: json!("<b>"),
                        ..Default::default()
                    },
                    detection: Some(DetectionVerdict {
                        result: true,
                        info: "The filter didn't filter the entry".into(),
                    }),
                },
                FuzzRecord {
                    uuid: "2".into(),
                    args: None,
                    response: ExecutionResponse {
                        error: Some("timeout".into()),
                        ..Default::default()
                    },
                    detection: None,
                },
            ],
        };
        let text = render_outcome_text(&outcome);
        assert!(text.starts_with("target: /app.js/clean\n"));
        assert!(text.contains("yes      \"<b>\""));
        assert!(text.contains("<baseline>"));
        assert!(text.contains("error: timeout"));
        assert!(text.ends_with("1 of 2 executions flagged\n"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_or_pad("éééééé", 5), "éé...");
        assert_eq!(truncate_or_pad("ab", 4), "ab  ");
    }
}
