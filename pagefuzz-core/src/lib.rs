//! pagefuzz core library - function-tree analysis and fuzzing of JavaScript
//! functions embedded in web pages

#![deny(warnings)]

// Invariants enforced in this crate:
// - Exactly one tuple is in flight during a fuzz run
// - Only the dispatcher mutates the injector's queue and active flag
// - Plugins never share memory with the dispatcher; they are reached through channels
// - Analysis of one file never blocks or aborts the analysis of another

pub mod analysis;
pub mod callgraph;
pub mod config;
pub mod context;
pub mod discover;
pub mod dispatcher;
pub mod harness;
pub mod injector;
pub mod model;
pub mod parser;
pub mod plugins;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod span;
pub mod tree;
pub mod worker;

pub use analysis::{AnalysisReport, PageAnalysis, ScriptSource};
pub use config::ResolvedConfig;
pub use context::{ExecutionContextFactory, PageResource, ProcessContextFactory};
pub use dispatcher::{Dispatcher, FuzzOutcome, FuzzRequest};
pub use injector::{preview_injection, InterceptionHandle, ScriptInjector};
pub use plugins::PluginCatalog;
pub use registry::{ModuleKind, ModuleRegistry};
pub use tree::{FunctionLeaf, FunctionTree};

use anyhow::{Context, Result};
use discover::DiscoverOptions;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

/// Scripts and resources of one page, in page order
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub page: String,
    pub scripts: Vec<ScriptSource>,
    pub resources: Vec<PageResource>,
}

/// Load a page from an HTML file, a directory of scripts, or a single script
///
/// An HTML page contributes its local `<script src>` files in document
/// order. A directory contributes every included `.js` file, sorted.
pub fn load_page(path: &Path, config: &ResolvedConfig) -> Result<LoadedPage> {
    let mut resources = Vec::new();
    let files = if is_html_file(path) {
        let html = std::fs::read(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        resources.push(PageResource {
            uri: file_name(path)?.to_string(),
            content_type: "text/html".to_string(),
            body: html.clone(),
        });
        let base = path.parent().unwrap_or(Path::new("."));
        script_sources(&String::from_utf8_lossy(&html))
            .into_iter()
            .map(|src| base.join(src))
            .collect()
    } else {
        collect_source_files(path, config)?
    };

    let mut scripts: Vec<ScriptSource> = Vec::new();
    for file in files {
        let script = ScriptSource::from_path(&file)?;
        if scripts.iter().any(|s| s.name == script.name) {
            warn!(file = %file.display(), "a script with the same file name is already loaded, skipping");
            continue;
        }
        resources.push(PageResource::script(
            script.name.clone(),
            script.source.clone().into_bytes(),
        ));
        scripts.push(script);
    }

    Ok(LoadedPage {
        page: path.display().to_string(),
        scripts,
        resources,
    })
}

/// Build the function tree of a loaded page
pub async fn analyze_page(page: &LoadedPage, config: &ResolvedConfig) -> PageAnalysis {
    let options = DiscoverOptions {
        index_anonymous_callbacks: config.index_anonymous_callbacks,
    };
    let mut analysis = PageAnalysis::loaded_context(page.page.clone(), options);
    analysis.populate_analysis_stack(page.scripts.clone());
    analysis.analyse_all().await;
    analysis
}

fn is_html_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("html") | Some("htm")
        )
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))
}

fn script_src_pattern() -> &'static Regex {
    static SCRIPT_SRC_RE: OnceLock<Regex> = OnceLock::new();
    SCRIPT_SRC_RE
        .get_or_init(|| Regex::new(r#"(?i)<script[^>]*\ssrc\s*=\s*["']([^"']+)["']"#).unwrap())
}

/// Local script paths referenced by an HTML document, in document order
pub fn script_sources(html: &str) -> Vec<String> {
    script_src_pattern()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|src| {
            let remote = src.contains("://") || src.starts_with("//");
            if remote {
                warn!(src = %src, "remote script is not loaded");
            }
            !remote
        })
        .map(|src| {
            src.split(|c| c == '?' || c == '#')
                .next()
                .unwrap_or(&src)
                .to_string()
        })
        .collect()
}

fn is_supported_source_file(filename: &str) -> bool {
    filename.ends_with(".js")
}

/// Collect script files under `path`, honouring include/exclude globs
pub fn collect_source_files(path: &Path, config: &ResolvedConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if path.is_file() {
        if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
            if is_supported_source_file(filename) {
                files.push(path.to_path_buf());
            }
        }
    } else if path.is_dir() {
        collect_source_files_recursive(path, &mut files)?;
        files.retain(|f| config.should_include(f.strip_prefix(path).unwrap_or(f)));
    }

    // Sort files for deterministic order
    files.sort();

    Ok(files)
}

/// Returns true for directory names that should not be traversed
fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name == "dist" || name == "coverage"
}

fn collect_source_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry_result in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry_result?;
        let path = entry.path();
        let metadata = std::fs::symlink_metadata(&path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        if metadata.is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_skipped_dir);
            if !skipped {
                collect_source_files_recursive(&path, files)?;
            }
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_supported_source_file)
        {
            files.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_sources_in_document_order() {
        let html = r#"<html><head>
<script src="js/vendor.js"></script>
<script type="text/javascript" SRC='js/app.js?v=3'></script>
<script src="https://cdn.example.com/lib.js"></script>
<script>inline();</script>
</head></html>"#;
        assert_eq!(script_sources(html), vec!["js/vendor.js", "js/app.js"]);
    }

    #[test]
    fn test_collect_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.js"), "function b() {}").unwrap();
        std::fs::write(dir.path().join("a.js"), "function a() {}").unwrap();
        std::fs::write(dir.path().join("a.test.js"), "test()").unwrap();
        std::fs::write(dir.path().join("style.css"), "p {}").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules").join("dep.js"), "x()").unwrap();

        let config = ResolvedConfig::defaults().unwrap();
        let files = collect_source_files(dir.path(), &config).unwrap();
        let names: Vec<&str> = files
            .iter()
            .filter_map(|f| f.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.js", "b.js"]);
    }

    #[tokio::test]
    async fn test_html_page_loads_scripts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js").join("z.js"), "function z() {}").unwrap();
        std::fs::write(dir.path().join("js").join("a.js"), "function a() { z(); }").unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            r#"<script src="js/z.js"></script><script src="js/a.js"></script>"#,
        )
        .unwrap();

        let config = ResolvedConfig::defaults().unwrap();
        let page = load_page(&dir.path().join("index.html"), &config).unwrap();
        let names: Vec<&str> = page.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["z.js", "a.js"]);
        assert_eq!(page.resources.len(), 3);
        assert_eq!(page.resources[0].content_type, "text/html");

        let analysis = analyze_page(&page, &config).await;
        assert!(analysis.tree().find_leaf_from_path("/a.js/a").is_some());
        assert!(analysis.failures().is_empty());
    }
}
