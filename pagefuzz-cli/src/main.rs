//! pagefuzz CLI - analyse and fuzz JavaScript functions embedded in web pages

#![deny(warnings)]

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagefuzz_core::config::{self, RunnerConfig};
use pagefuzz_core::model::{ModelUpdate, SelectedModules, SessionModel};
use pagefuzz_core::protocol::{GenerationMap, Tuple};
use pagefuzz_core::report::{
    render_analysis_text, render_json, render_outcome_text, render_registry_text, render_tree_text,
};
use pagefuzz_core::{
    analyze_page, load_page, preview_injection, Dispatcher, ModuleKind, ModuleRegistry,
    PluginCatalog, ProcessContextFactory, ResolvedConfig,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagefuzz")]
#[command(about = "Function-tree analysis and fuzzing of JavaScript functions in web pages")]
#[command(version = env!("PAGEFUZZ_VERSION"))]
struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and print the function tree of a page
    Analyze {
        /// HTML page, directory of scripts, or single script
        path: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the target's script as rewritten for one tuple
    Inject {
        /// HTML page, directory of scripts, or single script
        path: PathBuf,

        /// Canonical path of the function, e.g. /app.js/outer/inner
        #[arg(long)]
        function: String,

        /// Arguments as a JSON array (default: the baseline snapshot)
        #[arg(long)]
        args: Option<String>,

        /// Arguments of each enclosing function, outermost first, comma separated
        #[arg(long = "dep-args")]
        dep_args: Vec<String>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run every plugin's integrity check and list the registered modules
    Plugins {
        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Fuzz one function of a page
    Fuzz {
        /// HTML page, directory of scripts, or single script
        path: PathBuf,

        /// Canonical path of the function, e.g. /app.js/clean
        #[arg(long)]
        function: String,

        /// Generator module per argument, in argument order
        /// (default: HTMLGenModule for every parameter)
        #[arg(long = "generator")]
        generators: Vec<String>,

        /// Detection module (overrides config file)
        #[arg(long)]
        detector: Option<String>,

        /// Brain module (overrides config file)
        #[arg(long)]
        brain: Option<String>,

        /// Values requested from each generator (overrides config file)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Per-tuple deadline in milliseconds (overrides config file)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Arguments of each enclosing function, outermost first, comma separated
        #[arg(long = "dep-args")]
        dep_args: Vec<String>,

        /// Program running one execution context (overrides config file)
        #[arg(long)]
        runner: Option<String>,

        /// Arguments passed to the runner
        #[arg(long = "runner-arg", allow_hyphen_values = true)]
        runner_args: Vec<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate or show the configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running anything
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Analyze {
            path,
            format,
            config: config_path,
        } => {
            let path = normalize(path)?;
            let resolved = load_config(&path, config_path.as_deref())?;
            let page = load_page(&path, &resolved)?;
            let analysis = analyze_page(&page, &resolved).await;

            match format {
                OutputFormat::Text => {
                    print!("{}", render_tree_text(analysis.tree()));
                    println!();
                    print!("{}", render_analysis_text(analysis.reports()));
                }
                OutputFormat::Json => println!("{}", render_json(analysis.tree())),
            }
            for failure in analysis.failures() {
                eprintln!("{}: {:#}", failure.file, failure.error);
            }
        }
        Commands::Inject {
            path,
            function,
            args,
            dep_args,
            config: config_path,
        } => {
            let path = normalize(path)?;
            let resolved = load_config(&path, config_path.as_deref())?;
            let page = load_page(&path, &resolved)?;
            let analysis = analyze_page(&page, &resolved).await;
            let tree = analysis.tree();

            let leaf = tree
                .find_leaf_from_path(&function)
                .with_context(|| format!("unknown function: {}", function))?;
            let script = page
                .scripts
                .iter()
                .find(|s| s.name == leaf.script_name())
                .with_context(|| format!("script {} is not loaded", leaf.script_name()))?;
            let tuple = match args {
                Some(json) => {
                    let values: Vec<Value> = serde_json::from_str(&json)
                        .context("--args must be a JSON array")?;
                    Tuple::new(values)
                }
                None => Tuple::baseline(),
            };
            let rewritten = preview_injection(
                tree,
                &function,
                &split_dependency_args(&dep_args),
                &tuple,
                &script.source,
            )?;
            print!("{}", rewritten);
        }
        Commands::Plugins { format } => {
            let resolved = load_config(&std::env::current_dir()?, None)?;
            let registry = ModuleRegistry::index(&PluginCatalog::builtin(resolved.seed)).await;
            match format {
                OutputFormat::Text => print!("{}", render_registry_text(&registry)),
                OutputFormat::Json => println!("{}", render_json(&registry)),
            }
        }
        Commands::Fuzz {
            path,
            function,
            generators,
            detector,
            brain,
            batch_size,
            timeout_ms,
            dep_args,
            runner,
            runner_args,
            format,
            config: config_path,
        } => {
            let path = normalize(path)?;
            let resolved = load_config(&path, config_path.as_deref())?;

            // CLI flags override config file values
            let batch_size = batch_size.unwrap_or(resolved.batch_size);
            if batch_size == 0 || batch_size > config::MAX_BATCH_SIZE {
                bail!("--batch-size must be between 1 and {}", config::MAX_BATCH_SIZE);
            }
            let timeout = Duration::from_millis(timeout_ms.unwrap_or(resolved.tuple_timeout_ms));
            let detector = detector.unwrap_or_else(|| resolved.detector.clone());
            let brain = brain.unwrap_or_else(|| resolved.brain.clone());
            let runner = match runner {
                Some(program) => RunnerConfig {
                    program,
                    args: runner_args,
                },
                None => resolved
                    .runner
                    .clone()
                    .context("no runner configured; pass --runner or set \"runner\" in the config file")?,
            };

            let page = load_page(&path, &resolved)?;
            let analysis = analyze_page(&page, &resolved).await;
            let tree = analysis.tree();
            let leaf = tree
                .find_leaf_from_path(&function)
                .with_context(|| format!("unknown function: {}", function))?;

            let generators: GenerationMap = if generators.is_empty() {
                (0..leaf.args.len())
                    .map(|i| (i, "HTMLGenModule".to_string()))
                    .collect()
            } else {
                generators.into_iter().enumerate().collect()
            };

            let catalog = PluginCatalog::builtin(resolved.seed);
            let registry = ModuleRegistry::index(&catalog).await;
            for id in generators.values() {
                require_module(&registry, ModuleKind::Generation, id)?;
            }
            require_module(&registry, ModuleKind::Detection, &detector)?;
            require_module(&registry, ModuleKind::Brain, &brain)?;

            let factory = ProcessContextFactory::new(page.resources.clone(), runner, resolved.chunk_size);
            let mut dispatcher =
                Dispatcher::new(catalog, Arc::new(factory)).with_tuple_timeout(timeout);

            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{bar:40} {pos:>3}% {msg}")
                    .context("invalid progress template")?,
            );
            let progress = bar.clone();
            let model = dispatcher.model_mut();
            model.update_available_modules(&registry);
            model.subscribe(move |update: &ModelUpdate, _: &SessionModel| match update {
                ModelUpdate::FuzzingInProgress { progress: p } => progress.set_position(*p as u64),
                ModelUpdate::FuzzingFinished => progress.set_position(100),
                _ => {}
            });
            model.update_selected_function(tree, &function)?;
            for (i, args) in split_dependency_args(&dep_args).into_iter().enumerate() {
                model.set_dependency_args(i, args)?;
            }
            model.update_selected_modules(SelectedModules {
                generators,
                brain: Some(brain),
                detector,
            });
            let request = model.fuzz_request(batch_size)?;

            info!(target = %request.target, "starting fuzz run");
            bar.set_message(request.target.clone());
            let outcome = dispatcher.dispatch(tree, request).await?;
            bar.finish_and_clear();

            match format {
                OutputFormat::Text => print!("{}", render_outcome_text(&outcome)),
                OutputFormat::Json => println!("{}", render_json(&outcome)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Make `path` absolute and check that it exists
fn normalize(path: PathBuf) -> anyhow::Result<PathBuf> {
    let path = if path.is_relative() {
        std::env::current_dir()?.join(&path)
    } else {
        path
    };
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }
    Ok(path)
}

/// Load configuration from the page's directory
fn load_config(path: &Path, config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let project_root = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    let resolved = config::load_and_resolve(project_root, config_path)
        .context("failed to load configuration")?;
    if let Some(config_path) = &resolved.config_path {
        eprintln!("Using config: {}", config_path.display());
    }
    Ok(resolved)
}

fn require_module(registry: &ModuleRegistry, kind: ModuleKind, id: &str) -> anyhow::Result<()> {
    if ModuleKind::from_module_id(id) != Some(kind) {
        bail!("{} is not a {:?} module id", id, kind);
    }
    if !registry.is_registered(kind, id) {
        bail!("module {} is not registered", id);
    }
    Ok(())
}

fn split_dependency_args(dep_args: &[String]) -> Vec<Vec<String>> {
    dep_args
        .iter()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Fuzzing:");
    println!("  batch_size: {}", resolved.batch_size);
    println!("  tuple_timeout_ms: {}", resolved.tuple_timeout_ms);
    println!("  brain: {}", resolved.brain);
    println!("  detector: {}", resolved.detector);
    println!("  seed: {}", resolved.seed);
    println!("  chunk_size: {}", resolved.chunk_size);
    println!(
        "  runner: {}",
        resolved
            .runner
            .as_ref()
            .map(|r| format!("{} {}", r.program, r.args.join(" ")))
            .unwrap_or_else(|| "none".to_string())
    );
    println!();
    println!("Analysis:");
    println!("  index_anonymous_callbacks: {}", resolved.index_anonymous_callbacks);
    println!(
        "  include: {}",
        if resolved.include.is_some() {
            "custom"
        } else {
            "all .js files"
        }
    );
}
