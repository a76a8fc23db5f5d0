//! Module registry
//!
//! Every plugin in the catalog is started in its own worker and asked for an
//! integrity check. Only plugins whose every declared check passes are
//! registered; the others are discarded. The worker is terminated either way.

use crate::plugins::PluginCatalog;
use crate::protocol::{IntegrityReport, PluginRequest, ResponseBody};
use crate::worker::{self, WorkerHandle};
use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for one integrity check
const INTEGRITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Generation,
    Detection,
    Brain,
}

impl ModuleKind {
    /// Kind implied by a module id suffix (`...GenModule`, `...DetecModule`,
    /// `...BrainModule`)
    pub fn from_module_id(id: &str) -> Option<Self> {
        if id.ends_with("GenModule") {
            Some(ModuleKind::Generation)
        } else if id.ends_with("DetecModule") {
            Some(ModuleKind::Detection)
        } else if id.ends_with("BrainModule") || id.ends_with("brainModule") {
            Some(ModuleKind::Brain)
        } else {
            None
        }
    }
}

/// A validated plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub module_file: String,
    pub display_name: String,
    pub description: String,
}

impl From<IntegrityReport> for ModuleDescriptor {
    fn from(report: IntegrityReport) -> Self {
        ModuleDescriptor {
            module_file: report.file_name,
            display_name: report.caract.name,
            description: report.caract.description,
        }
    }
}

/// A plugin that failed registration
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub module_file: String,
    pub kind: ModuleKind,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ModuleRegistry {
    pub generators: Vec<ModuleDescriptor>,
    pub detectors: Vec<ModuleDescriptor>,
    pub brains: Vec<ModuleDescriptor>,
    pub rejected: Vec<Rejection>,
}

impl ModuleRegistry {
    /// Integrity-check every plugin of the catalog
    pub async fn index(catalog: &PluginCatalog) -> Self {
        let mut registry = ModuleRegistry::default();
        let shared = Arc::new(catalog.clone());

        let generators: Vec<String> = catalog.generator_ids().map(str::to_string).collect();
        for id in generators {
            let worker = catalog
                .generator(&id, 0)
                .map(|g| worker::spawn_generator(&id, g));
            registry.admit(ModuleKind::Generation, &id, worker).await;
        }

        let detectors: Vec<String> = catalog.detector_ids().map(str::to_string).collect();
        for id in detectors {
            let worker = catalog.detector(&id).map(|d| worker::spawn_detector(&id, d));
            registry.admit(ModuleKind::Detection, &id, worker).await;
        }

        let brains: Vec<String> = catalog.brain_ids().map(str::to_string).collect();
        for id in brains {
            let worker = catalog
                .brain(&id)
                .map(|b| worker::spawn_brain(&id, b, Arc::clone(&shared)));
            registry.admit(ModuleKind::Brain, &id, worker).await;
        }

        info!(
            generators = registry.generators.len(),
            detectors = registry.detectors.len(),
            brains = registry.brains.len(),
            rejected = registry.rejected.len(),
            "module registry indexed"
        );
        registry
    }

    async fn admit(&mut self, kind: ModuleKind, id: &str, worker: Result<WorkerHandle>) {
        let outcome = match worker {
            Ok(worker) => check_integrity(worker, id).await,
            Err(error) => Err(error),
        };
        match outcome {
            Ok(report) => {
                let descriptor = ModuleDescriptor::from(report);
                match kind {
                    ModuleKind::Generation => self.generators.push(descriptor),
                    ModuleKind::Detection => self.detectors.push(descriptor),
                    ModuleKind::Brain => self.brains.push(descriptor),
                }
            }
            Err(error) => {
                warn!(module = id, "plugin discarded: {:#}", error);
                self.rejected.push(Rejection {
                    module_file: id.to_string(),
                    kind,
                    reason: format!("{:#}", error),
                });
            }
        }
    }

    pub fn descriptors(&self, kind: ModuleKind) -> &[ModuleDescriptor] {
        match kind {
            ModuleKind::Generation => &self.generators,
            ModuleKind::Detection => &self.detectors,
            ModuleKind::Brain => &self.brains,
        }
    }

    pub fn is_registered(&self, kind: ModuleKind, module_file: &str) -> bool {
        self.descriptors(kind)
            .iter()
            .any(|d| d.module_file == module_file)
    }
}

async fn check_integrity(mut worker: WorkerHandle, id: &str) -> Result<IntegrityReport> {
    worker.post(PluginRequest::CheckIntegrity(id.to_string()))?;
    let body = match tokio::time::timeout(INTEGRITY_TIMEOUT, worker.next_result()).await {
        Ok(body) => body?,
        Err(_) => bail!("integrity check timed out"),
    };
    worker.terminate();

    let ResponseBody::IntegrityCheck(report) = body else {
        bail!("unexpected reply to integrity check");
    };
    if !report.passed() {
        let failed: Vec<&str> = report
            .check
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect();
        bail!("failed checks: {}", failed.join(", "));
    }
    Ok(report)
}
