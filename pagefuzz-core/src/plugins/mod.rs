//! Plugin strategies behind the worker message contract
//!
//! Three plugin kinds exist: generators produce argument values, adapters
//! ("brains") turn generator output into argument tuples, and detectors
//! judge executions. Concrete strategies are looked up by module id in a
//! [`PluginCatalog`].

pub mod brain;
pub mod detection;
pub mod generation;

use crate::protocol::{
    DetectionVerdict, ExecutionResponse, FuzzRecord, GenerateRequest, GeneratedBatch,
};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use brain::{cartesian_product, NoBrain};
pub use detection::DifferenceDetector;
pub use generation::{HtmlGenerator, SpecialCharGenerator};

/// Named capability checks reported by `checkIntegrity`
pub type IntegrityChecks = BTreeMap<String, bool>;

/// Batch size used by the generator smoke test
const INTEGRITY_BATCH_SIZE: usize = 10;

/// Produces values for one argument position
pub trait Generator: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Brains able to drive `generate_from_parameters`; empty means only the
    /// pass-through brain
    fn compatible_brains(&self) -> &[&str] {
        &[]
    }

    /// Generate `batch_size` values
    fn generate(&mut self, batch_size: usize) -> Vec<Value>;

    /// Generate values steered by arguments sent from a brain
    fn generate_from_parameters(&mut self, _batch_size: usize, _args: &[Value]) -> Vec<Value> {
        Vec::new()
    }

    /// Route a generation request to the right entry point
    fn handle_request(&mut self, request: &GenerateRequest) -> Vec<Value> {
        if request.args.is_empty() {
            self.generate(request.batch_size)
        } else {
            self.generate_from_parameters(request.batch_size, &request.args)
        }
    }

    fn check_integrity(&mut self) -> IntegrityChecks {
        let mut check = IntegrityChecks::new();
        check.insert("name".to_string(), !self.name().is_empty());
        check.insert("description".to_string(), !self.description().is_empty());
        check.insert(
            "generate".to_string(),
            self.generate(INTEGRITY_BATCH_SIZE).len() == INTEGRITY_BATCH_SIZE,
        );
        check
    }
}

/// Judges a batch of correlated executions
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// One flag per record, in order; `true` marks an anomaly
    fn detect(&self, batch: &[FuzzRecord]) -> Vec<bool>;

    /// Human readable explanation of one verdict
    fn info(&self, record: &FuzzRecord, result: bool) -> String;

    /// Run detection and attach a verdict with its explanation to each record
    ///
    /// Records the detector returned no flag for keep `detection: None`.
    fn launch_detection(&self, batch: Vec<FuzzRecord>) -> Vec<FuzzRecord> {
        let flags = self.detect(&batch);
        batch
            .into_iter()
            .enumerate()
            .map(|(i, mut record)| {
                if let Some(&result) = flags.get(i) {
                    let info = self.info(&record, result);
                    record.detection = Some(DetectionVerdict { result, info });
                }
                record
            })
            .collect()
    }

    fn check_integrity(&self) -> IntegrityChecks {
        let sample = integrity_sample();
        let mut check = IntegrityChecks::new();
        check.insert("name".to_string(), !self.name().is_empty());
        check.insert("description".to_string(), !self.description().is_empty());
        check.insert("detect".to_string(), !self.detect(&sample).is_empty());
        check.insert(
            "template".to_string(),
            !self.info(&sample[1], false).is_empty(),
        );
        check
    }
}

/// Turns per-argument generator output into argument tuples
pub trait Adapter: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Generator module ids this brain can drive; `"*"` accepts every generator
    fn compatible_generators(&self) -> &[&str];

    fn accepts(&self, generator: &str) -> bool {
        self.compatible_generators()
            .iter()
            .any(|g| *g == "*" || *g == generator)
    }

    /// Requests to send to the generators for the next batch
    ///
    /// # Arguments
    ///
    /// * `generator_ids` - Argument positions that have a generator attached
    /// * `batch_size` - Values requested per generator
    /// * `previous_batch` - Detected records of the previous run on the same target
    fn handle_generation(
        &mut self,
        generator_ids: &[usize],
        batch_size: usize,
        previous_batch: Option<&[FuzzRecord]>,
    ) -> Vec<GenerateRequest>;

    /// Assemble generator replies into argument tuples
    fn assemble(&mut self, generated: Vec<GeneratedBatch>) -> Vec<Vec<Value>>;

    fn check_integrity(&self) -> IntegrityChecks {
        let mut check = IntegrityChecks::new();
        check.insert("name".to_string(), !self.name().is_empty());
        check.insert("description".to_string(), !self.description().is_empty());
        check.insert(
            "genModulesCompatible".to_string(),
            !self.compatible_generators().is_empty(),
        );
        check
    }
}

/// Synthetic records used by the detector smoke test: one fuzzed call and
/// one baseline snapshot
fn integrity_sample() -> Vec<FuzzRecord> {
    vec![
        FuzzRecord {
            uuid: "{1}".to_string(),
            args: Some(vec![json!("a"), json!("b")]),
            response: ExecutionResponse {
                html: Some("<html></htm>".to_string()),
                call_stack: Some(Vec::new()),
                value: json!("winter is coming"),
                error: None,
            },
            detection: None,
        },
        FuzzRecord {
            uuid: "{2}".to_string(),
            args: None,
            response: ExecutionResponse {
                html: Some("<html>test</htm>".to_string()),
                call_stack: Some(Vec::new()),
                value: Value::Null,
                error: None,
            },
            detection: None,
        },
    ]
}

type GeneratorFactory = Arc<dyn Fn(u64) -> Box<dyn Generator> + Send + Sync>;
type DetectorFactory = Arc<dyn Fn() -> Box<dyn Detector> + Send + Sync>;
type AdapterFactory = Arc<dyn Fn() -> Box<dyn Adapter> + Send + Sync>;

/// Plugin constructors by module id
///
/// Every request for a plugin builds a fresh instance, so no state leaks
/// between fuzz runs.
#[derive(Clone)]
pub struct PluginCatalog {
    seed: u64,
    generators: BTreeMap<String, GeneratorFactory>,
    detectors: BTreeMap<String, DetectorFactory>,
    brains: BTreeMap<String, AdapterFactory>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("seed", &self.seed)
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("detectors", &self.detectors.keys().collect::<Vec<_>>())
            .field("brains", &self.brains.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginCatalog {
    pub fn empty(seed: u64) -> Self {
        PluginCatalog {
            seed,
            generators: BTreeMap::new(),
            detectors: BTreeMap::new(),
            brains: BTreeMap::new(),
        }
    }

    /// Catalog holding the bundled plugins
    pub fn builtin(seed: u64) -> Self {
        let mut catalog = PluginCatalog::empty(seed);
        catalog.register_generator(generation::SPECIAL_CHAR_MODULE, |seed| {
            Box::new(SpecialCharGenerator::new(seed))
        });
        catalog.register_generator(generation::HTML_MODULE, |seed| {
            Box::new(HtmlGenerator::new(seed))
        });
        catalog.register_detector(detection::SPECIAL_CHAR_DETECTION_MODULE, || {
            Box::new(DifferenceDetector)
        });
        catalog.register_brain(brain::NO_BRAIN_MODULE, || Box::new(NoBrain));
        catalog
    }

    pub fn register_generator<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(u64) -> Box<dyn Generator> + Send + Sync + 'static,
    {
        self.generators.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_detector<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Detector> + Send + Sync + 'static,
    {
        self.detectors.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_brain<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Adapter> + Send + Sync + 'static,
    {
        self.brains.insert(id.to_string(), Arc::new(factory));
    }

    /// Build a generator for argument position `slot`
    ///
    /// Each slot gets its own seed so two positions using the same module do
    /// not produce identical columns.
    pub fn generator(&self, id: &str, slot: usize) -> Result<Box<dyn Generator>> {
        let factory = self
            .generators
            .get(id)
            .with_context(|| format!("unknown generation module: {}", id))?;
        Ok(factory(self.seed.wrapping_add(slot as u64)))
    }

    pub fn detector(&self, id: &str) -> Result<Box<dyn Detector>> {
        let factory = self
            .detectors
            .get(id)
            .with_context(|| format!("unknown detection module: {}", id))?;
        Ok(factory())
    }

    pub fn brain(&self, id: &str) -> Result<Box<dyn Adapter>> {
        let factory = self
            .brains
            .get(id)
            .with_context(|| format!("unknown brain module: {}", id))?;
        Ok(factory())
    }

    pub fn generator_ids(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    pub fn detector_ids(&self) -> impl Iterator<Item = &str> {
        self.detectors.keys().map(String::as_str)
    }

    pub fn brain_ids(&self) -> impl Iterator<Item = &str> {
        self.brains.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Generator for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn description(&self) -> &str {
            ""
        }

        fn generate(&mut self, _batch_size: usize) -> Vec<Value> {
            Vec::new()
        }
    }

    #[test]
    fn test_generator_integrity_flags_missing_capabilities() {
        let check = Silent.check_integrity();
        assert_eq!(check["name"], true);
        assert_eq!(check["description"], false);
        assert_eq!(check["generate"], false);
    }

    #[test]
    fn test_builtin_plugins_pass_integrity() {
        let catalog = PluginCatalog::builtin(0);
        for id in catalog.generator_ids() {
            let checks = catalog.generator(id, 0).unwrap().check_integrity();
            assert!(checks.values().all(|ok| *ok), "{} failed {:?}", id, checks);
        }
        for id in catalog.detector_ids() {
            let checks = catalog.detector(id).unwrap().check_integrity();
            assert!(checks.values().all(|ok| *ok), "{} failed {:?}", id, checks);
        }
        for id in catalog.brain_ids() {
            let checks = catalog.brain(id).unwrap().check_integrity();
            assert!(checks.values().all(|ok| *ok), "{} failed {:?}", id, checks);
        }
    }

    #[test]
    fn test_builtin_module_ids() {
        let catalog = PluginCatalog::builtin(0);
        assert_eq!(
            catalog.generator_ids().collect::<Vec<_>>(),
            vec!["HTMLGenModule", "specialCharGenModule"]
        );
        assert_eq!(
            catalog.detector_ids().collect::<Vec<_>>(),
            vec!["specialCharDetecModule"]
        );
        assert_eq!(catalog.brain_ids().collect::<Vec<_>>(), vec!["noBrainModule"]);
    }

    #[test]
    fn test_unknown_module_is_an_error() {
        let catalog = PluginCatalog::builtin(0);
        match catalog.generator("missingGenModule", 0) {
            Ok(_) => panic!("missingGenModule should not resolve"),
            Err(err) => assert!(err.to_string().contains("missingGenModule")),
        }
    }

    #[test]
    fn test_parameters_route_to_generate_from_parameters() {
        let mut generator = Silent;
        let request = GenerateRequest {
            id: 0,
            batch_size: 2,
            args: vec![json!(1)],
        };
        assert!(generator.handle_request(&request).is_empty());
    }
}
