//! Configuration file support for pagefuzz
//!
//! Loads project-specific configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.pagefuzzrc.json` in the page directory
//! 3. `pagefuzz.config.json` in the page directory
//! 4. `"pagefuzz"` key in `package.json`
//!
//! All fields are optional. CLI flags take precedence over config file values.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default exclude patterns applied when no config is specified
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*.test.js",
    "**/*.spec.js",
    "**/node_modules/**",
    "**/__tests__/**",
];

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_TUPLE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_BRAIN: &str = "noBrainModule";
pub const DEFAULT_DETECTOR: &str = "specialCharDetecModule";

/// pagefuzz configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PagefuzzConfig {
    /// Glob patterns for scripts to include (default: every `.js` file)
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns for scripts to exclude (default: tests and node_modules)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Values requested from each generator per run (default: 10)
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Deadline for one tuple execution in milliseconds (default: 10000)
    #[serde(default)]
    pub tuple_timeout_ms: Option<u64>,

    /// Adaptation module id (default: noBrainModule)
    #[serde(default)]
    pub brain: Option<String>,

    /// Detection module id (default: specialCharDetecModule)
    #[serde(default)]
    pub detector: Option<String>,

    /// Size of the network chunks fed through the injector (default: 8192)
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Seed for generator randomness (default: 0)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Index anonymous callbacks passed as call arguments (default: false)
    #[serde(default)]
    pub index_anonymous_callbacks: Option<bool>,

    /// Program that executes one rewritten script per tuple
    #[serde(default)]
    pub runner: Option<RunnerConfig>,
}

/// External program used as the isolated execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resolved configuration with compiled glob patterns
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Compiled include patterns (empty means include all)
    pub include: Option<GlobSet>,
    /// Compiled exclude patterns
    pub exclude: GlobSet,
    pub batch_size: usize,
    pub tuple_timeout_ms: u64,
    pub brain: String,
    pub detector: String,
    pub chunk_size: usize,
    pub seed: u64,
    pub index_anonymous_callbacks: bool,
    pub runner: Option<RunnerConfig>,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl PagefuzzConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.batch_size {
            if size == 0 || size > MAX_BATCH_SIZE {
                anyhow::bail!(
                    "batch_size must be between 1 and {} (got {})",
                    MAX_BATCH_SIZE,
                    size
                );
            }
        }

        if self.tuple_timeout_ms == Some(0) {
            anyhow::bail!("tuple_timeout_ms must be positive (got 0)");
        }

        if self.chunk_size == Some(0) {
            anyhow::bail!("chunk_size must be positive (got 0)");
        }

        for (name, value) in [("brain", &self.brain), ("detector", &self.detector)] {
            if let Some(id) = value {
                if id.trim().is_empty() {
                    anyhow::bail!("{} must not be empty", name);
                }
            }
        }

        if let Some(ref runner) = self.runner {
            if runner.program.trim().is_empty() {
                anyhow::bail!("runner.program must not be empty");
            }
        }

        // Validate glob patterns compile
        for pattern in &self.include {
            Glob::new(pattern).with_context(|| format!("invalid include pattern: {}", pattern))?;
        }
        for pattern in &self.exclude {
            Glob::new(pattern).with_context(|| format!("invalid exclude pattern: {}", pattern))?;
        }

        Ok(())
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let include = if self.include.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &self.include {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        let exclude = {
            let mut builder = GlobSetBuilder::new();
            if self.exclude.is_empty() {
                for pattern in DEFAULT_EXCLUDES {
                    builder.add(Glob::new(pattern)?);
                }
            } else {
                for pattern in &self.exclude {
                    builder.add(Glob::new(pattern)?);
                }
            }
            builder.build()?
        };

        Ok(ResolvedConfig {
            include,
            exclude,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            tuple_timeout_ms: self.tuple_timeout_ms.unwrap_or(DEFAULT_TUPLE_TIMEOUT_MS),
            brain: self.brain.clone().unwrap_or_else(|| DEFAULT_BRAIN.to_string()),
            detector: self
                .detector
                .clone()
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            seed: self.seed.unwrap_or(0),
            index_anonymous_callbacks: self.index_anonymous_callbacks.unwrap_or(false),
            runner: self.runner.clone(),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Check if a script path should be analysed based on include/exclude patterns
    pub fn should_include(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();

        if self.exclude.is_match(path_str.as_ref()) {
            return false;
        }

        if let Some(ref include) = self.include {
            return include.is_match(path_str.as_ref());
        }

        true
    }

    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        PagefuzzConfig::default().resolve()
    }
}

/// Discover and load a config file from the page directory
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(project_root: &Path) -> Result<Option<(PagefuzzConfig, PathBuf)>> {
    let rc_path = project_root.join(".pagefuzzrc.json");
    if rc_path.exists() {
        let config = load_config_file(&rc_path)?;
        return Ok(Some((config, rc_path)));
    }

    let config_path = project_root.join("pagefuzz.config.json");
    if config_path.exists() {
        let config = load_config_file(&config_path)?;
        return Ok(Some((config, config_path)));
    }

    let pkg_path = project_root.join("package.json");
    if pkg_path.exists() {
        if let Some(config) = load_from_package_json(&pkg_path)? {
            return Ok(Some((config, pkg_path)));
        }
    }

    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<PagefuzzConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: PagefuzzConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

fn load_from_package_json(path: &Path) -> Result<Option<PagefuzzConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let pkg: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    match pkg.get("pagefuzz") {
        Some(value) => {
            let config: PagefuzzConfig = serde_json::from_value(value.clone())
                .with_context(|| format!("invalid pagefuzz config in {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("invalid pagefuzz config in {}", path.display()))?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

/// Load and resolve config for a page directory
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from the page directory.
/// Returns default config if nothing is found.
pub fn load_and_resolve(project_root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(project_root)? {
            Some((config, path)) => (config, Some(path)),
            None => (PagefuzzConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
