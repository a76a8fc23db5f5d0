//! Script analysis for one page
//!
//! A page context owns a [`FunctionTree`] and an analysis stack of script
//! files. Files are analysed one at a time, oldest first. Each analysis runs
//! on a blocking worker thread that receives its own copy of the tree and
//! hands back the updated tree, so the page context never shares the tree
//! with a running analysis.

use crate::callgraph::{self, ResolutionStats};
use crate::discover::{self, Diagnostic, DiscoverOptions};
use crate::parser::parse_script;
use crate::tree::FunctionTree;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use swc_common::{sync::Lrc, SourceMap};
use tracing::{debug, warn};

/// One script file of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// File name as it appears in the script's URL (last path segment)
    pub name: String,
    pub source: String,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        ScriptSource {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid script file name: {}", path.display()))?;
        Ok(ScriptSource::new(name, source))
    }
}

/// Outcome of analysing one script
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub file: String,
    pub functions: usize,
    pub calls: usize,
    pub resolution: ResolutionStats,
    pub diagnostics: Vec<Diagnostic>,
}

/// Analyse one script and merge its declarations into `tree`
///
/// The script root `/<name>` replaces any earlier root for the same file.
/// Structural diagnostics are returned in the report; a fatal structural
/// error or a parse error leaves the tree untouched.
pub fn analyse_script(
    tree: &mut FunctionTree,
    script: &ScriptSource,
    options: &DiscoverOptions,
) -> Result<AnalysisReport> {
    let cm: Lrc<SourceMap> = Default::default();
    let (ast, _) = parse_script(&script.source, &cm, &script.name)?;

    let discovery =
        discover::index_declarations(&ast, &script.name, &script.source, &cm, options)?;
    let functions = discovery.root.walk().len().saturating_sub(1);
    tree.upsert_script_root(discovery.root);

    let calls = callgraph::collect_calls(&ast, &script.source, &cm);
    let resolution = callgraph::resolve_calls(tree, &script.name, &calls);

    debug!(
        file = %script.name,
        functions,
        calls = calls.len(),
        resolved = resolution.resolved,
        "script analysed"
    );
    for diagnostic in &discovery.diagnostics {
        warn!(
            file = %diagnostic.file,
            line = diagnostic.line,
            "{}",
            diagnostic.message
        );
    }

    Ok(AnalysisReport {
        file: script.name.clone(),
        functions,
        calls: calls.len(),
        resolution,
        diagnostics: discovery.diagnostics,
    })
}

/// A failed file analysis; other files still proceed
#[derive(Debug)]
pub struct AnalysisFailure {
    pub file: String,
    pub error: anyhow::Error,
}

/// Function tree and analysis stack of one loaded page
#[derive(Debug)]
pub struct PageAnalysis {
    tree: FunctionTree,
    stack: Vec<ScriptSource>,
    attempted: Vec<String>,
    options: DiscoverOptions,
    reports: Vec<AnalysisReport>,
    failures: Vec<AnalysisFailure>,
    finished: bool,
}

impl PageAnalysis {
    /// Start a page context with an empty tree
    pub fn loaded_context(page: impl Into<String>, options: DiscoverOptions) -> Self {
        PageAnalysis {
            tree: FunctionTree::new(page),
            stack: Vec::new(),
            attempted: Vec::new(),
            options,
            reports: Vec::new(),
            failures: Vec::new(),
            finished: true,
        }
    }

    /// Queue every script not analysed yet, preserving page order
    pub fn populate_analysis_stack(&mut self, scripts: Vec<ScriptSource>) {
        let pending: Vec<ScriptSource> = scripts
            .into_iter()
            .filter(|s| !self.is_analysed(&s.name))
            .filter(|s| !self.stack.iter().any(|queued| queued.name == s.name))
            .collect();
        if pending.is_empty() {
            return;
        }
        // The stack pops from the back, so the first script goes last
        let mut ordered = pending;
        ordered.reverse();
        ordered.append(&mut self.stack);
        self.stack = ordered;
        self.finished = false;
    }

    pub fn is_analysed(&self, file_name: &str) -> bool {
        self.attempted.iter().any(|f| f == file_name)
    }

    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    pub fn analysis_finished(&self) -> bool {
        self.finished
    }

    /// Analyse the next queued script
    ///
    /// Returns `None` once the stack is empty.
    pub async fn analyse_next(&mut self) -> Option<Result<AnalysisReport>> {
        let script = self.stack.pop()?;
        self.attempted.push(script.name.clone());
        let file = script.name.clone();

        let snapshot = self.tree.clone();
        let options = self.options.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut tree = snapshot;
            let result = analyse_script(&mut tree, &script, &options);
            (tree, result)
        })
        .await;

        let result = match joined {
            Ok((tree, Ok(report))) => {
                self.tree = tree;
                self.reports.push(report.clone());
                Ok(report)
            }
            Ok((_, Err(error))) => Err(error),
            Err(join_error) => Err(anyhow::anyhow!(join_error).context("analysis task failed")),
        };

        if let Err(error) = &result {
            warn!(file = %file, "skipping script: {:#}", error);
            self.failures.push(AnalysisFailure {
                file,
                error: anyhow::anyhow!("{:#}", error),
            });
        }
        if self.stack.is_empty() {
            self.finished = true;
        }
        Some(result)
    }

    /// Drain the analysis stack
    pub async fn analyse_all(&mut self) -> &FunctionTree {
        while self.analyse_next().await.is_some() {}
        &self.tree
    }

    pub fn tree(&self) -> &FunctionTree {
        &self.tree
    }

    pub fn reports(&self) -> &[AnalysisReport] {
        &self.reports
    }

    pub fn failures(&self) -> &[AnalysisFailure] {
        &self.failures
    }

    /// Discard the page context, yielding its tree
    pub fn unload(self) -> FunctionTree {
        self.tree
    }
}
