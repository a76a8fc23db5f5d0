//! Fuzzing dispatcher
//!
//! The dispatcher drives one fuzz run through
//! `Idle -> Initializing -> AwaitingBrainBatch -> Fuzzing -> AwaitingDetection -> Idle`:
//!
//! 1. start the brain with the generation map and the detector
//! 2. ask the brain for a batch, append the baseline tuple, tag every tuple
//!    with a fresh id and load the batch into the injector
//! 3. run the tuples one at a time, each in a fresh execution context
//! 4. hand every correlated result to the detector
//!
//! Exactly one tuple is in flight at any time. The injector's queue and
//! `active` flag are shared with the interception layer, and only the
//! dispatcher mutates them.

use crate::config::{DEFAULT_BRAIN, DEFAULT_TUPLE_TIMEOUT_MS};
use crate::context::{ExecutionContextFactory, ExecutionReport};
use crate::injector::{InterceptionHandle, ScriptInjector};
use crate::model::ModelHandler;
use crate::plugins::PluginCatalog;
use crate::protocol::{
    FuzzRecord, GenerationMap, GenerationRequest, PluginRequest, ResponseBody, Tuple,
};
use crate::tree::FunctionTree;
use crate::worker::{self, WorkerHandle};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Default deadline for one reply of the brain or the detector
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Initializing { brain: String },
    AwaitingBrainBatch,
    Fuzzing { cursor: usize, total: usize },
    AwaitingDetection,
}

/// Parameters of one fuzz run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzRequest {
    /// Canonical path of the function to fuzz
    pub target: String,
    /// Generator module per argument position
    pub generators: GenerationMap,
    pub detector: String,
    pub brain: String,
    pub batch_size: usize,
    /// Argument source text for each enclosing function, outermost first
    pub dependency_args: Vec<Vec<String>>,
}

impl FuzzRequest {
    pub fn new(target: impl Into<String>, generators: GenerationMap, detector: impl Into<String>) -> Self {
        FuzzRequest {
            target: target.into(),
            generators,
            detector: detector.into(),
            brain: DEFAULT_BRAIN.to_string(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            dependency_args: Vec::new(),
        }
    }
}

/// Correlated and judged results of one run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct FuzzOutcome {
    pub target: String,
    pub records: Vec<FuzzRecord>,
}

impl FuzzOutcome {
    /// Records the detector flagged
    pub fn flagged(&self) -> impl Iterator<Item = &FuzzRecord> {
        self.records
            .iter()
            .filter(|r| r.detection.as_ref().is_some_and(|d| d.result))
    }

    pub fn baseline(&self) -> Option<&FuzzRecord> {
        self.records.iter().find(|r| r.args.is_none())
    }
}

pub struct Dispatcher {
    catalog: Arc<PluginCatalog>,
    injector: ScriptInjector,
    factory: Arc<dyn ExecutionContextFactory>,
    tuple_timeout: Duration,
    stage_timeout: Duration,
    state: DispatchState,
    model: ModelHandler,
    brain: Option<WorkerHandle>,
    detector: Option<WorkerHandle>,
    previous_batches: HashMap<String, Vec<FuzzRecord>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("catalog", &self.catalog)
            .field("injector", &self.injector)
            .field("tuple_timeout", &self.tuple_timeout)
            .field("stage_timeout", &self.stage_timeout)
            .field("state", &self.state)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(catalog: PluginCatalog, factory: Arc<dyn ExecutionContextFactory>) -> Self {
        Dispatcher {
            catalog: Arc::new(catalog),
            injector: ScriptInjector::new(),
            factory,
            tuple_timeout: Duration::from_millis(DEFAULT_TUPLE_TIMEOUT_MS),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            state: DispatchState::Idle,
            model: ModelHandler::new(),
            brain: None,
            detector: None,
            previous_batches: HashMap::new(),
        }
    }

    pub fn with_tuple_timeout(mut self, timeout: Duration) -> Self {
        self.tuple_timeout = timeout;
        self
    }

    /// Deadline for each reply of the brain and detector stages
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn model(&self) -> &ModelHandler {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ModelHandler {
        &mut self.model
    }

    /// Capability handed to a network interception layer
    pub fn interception(&self) -> InterceptionHandle {
        self.injector.interception()
    }

    /// Results of the last completed run on `target`
    pub fn previous_batch(&self, target: &str) -> Option<&[FuzzRecord]> {
        self.previous_batches.get(target).map(Vec::as_slice)
    }

    /// Release the workers of the previous run and reset the injector
    pub fn release(&mut self) {
        if let Some(brain) = self.brain.take() {
            brain.terminate();
        }
        if let Some(detector) = self.detector.take() {
            detector.terminate();
        }
        self.injector.clear();
        self.state = DispatchState::Idle;
    }

    /// Run one complete fuzz session on `request.target`
    ///
    /// Fails only when no harness can be built for the target or when a
    /// stage worker cannot be started or stops answering. Faults of single
    /// executions are recorded in their tuple's result.
    pub async fn dispatch(&mut self, tree: &FunctionTree, request: FuzzRequest) -> Result<FuzzOutcome> {
        self.release();
        self.model.update_fuzzing_progress(0.0);
        self.injector
            .select_target(tree, &request.target, &request.dependency_args)?;
        info!(target = %request.target, brain = %request.brain, detector = %request.detector, "fuzz run started");

        let outcome = self.run(&request).await;
        if outcome.is_err() {
            self.release();
        }
        self.state = DispatchState::Idle;
        outcome
    }

    async fn run(&mut self, request: &FuzzRequest) -> Result<FuzzOutcome> {
        self.state = DispatchState::Initializing {
            brain: request.brain.clone(),
        };
        let adapter = self.catalog.brain(&request.brain)?;
        let brain = self
            .brain
            .insert(worker::spawn_brain(&request.brain, adapter, Arc::clone(&self.catalog)));
        brain.post(PluginRequest::InitializeBrain(request.generators.clone()))?;
        let started = match brain.result_within(self.stage_timeout).await? {
            ResponseBody::InitializationMark(started) => started,
            other => bail!("brain {} answered {} to initializeBrain", request.brain, other.class()),
        };
        if started != request.generators {
            warn!(requested = ?request.generators, started = ?started, "some generators could not be started");
            if started.is_empty() {
                bail!("no generator could be started for {}", request.target);
            }
        }

        let detector = self.catalog.detector(&request.detector)?;
        self.detector = Some(worker::spawn_detector(&request.detector, detector));

        self.state = DispatchState::AwaitingBrainBatch;
        brain.post(PluginRequest::HandleGeneration(GenerationRequest {
            batch_size: request.batch_size,
            previous_batch: self.previous_batches.get(&request.target).cloned(),
        }))?;
        let generated = match brain.result_within(self.stage_timeout).await? {
            ResponseBody::BrainModResponse(tuples) => tuples,
            other => bail!("brain {} answered {} to handleGeneration", request.brain, other.class()),
        };

        let batch: Vec<Tuple> = generated
            .into_iter()
            .map(Tuple::new)
            .chain(std::iter::once(Tuple::baseline()))
            .collect();
        self.injector.load_batch(&batch);
        debug!(tuples = batch.len(), "batch loaded");

        let total = batch.len();
        let mut records = Vec::with_capacity(total);
        for (cursor, tuple) in batch.iter().enumerate() {
            self.state = DispatchState::Fuzzing { cursor, total };
            let report = self.execute(tuple).await;
            records.push(FuzzRecord {
                uuid: tuple.uuid.clone(),
                args: tuple.args.clone(),
                response: report.into_response(),
                detection: None,
            });
            // Detection counts as the last step
            self.model
                .update_fuzzing_progress(((cursor + 1) * 100) as f64 / (total + 1) as f64);
        }
        self.previous_batches
            .insert(request.target.clone(), records.clone());

        self.state = DispatchState::AwaitingDetection;
        let records = self.detect(records).await?;
        self.model.update_fuzzing_data(records.clone());
        self.model.update_fuzzing_progress(100.0);

        let flagged = records
            .iter()
            .filter(|r| r.detection.as_ref().is_some_and(|d| d.result))
            .count();
        info!(target = %request.target, executions = total, flagged, "fuzz run finished");
        Ok(FuzzOutcome {
            target: request.target.clone(),
            records,
        })
    }

    /// Run one tuple in a fresh context and wait for its report
    async fn execute(&self, tuple: &Tuple) -> ExecutionReport {
        let (reports, mut incoming) = mpsc::unbounded_channel();
        self.injector.activate();

        let report = match self.factory.launch(self.injector.interception(), reports).await {
            Ok(context) => {
                let awaited = tokio::time::timeout(self.tuple_timeout, async {
                    while let Some(report) = incoming.recv().await {
                        if report.unique_id == tuple.uuid {
                            return Some(report);
                        }
                        trace!(unique_id = %report.unique_id, "ignoring uncorrelated report");
                    }
                    None
                })
                .await;
                context.teardown().await;
                match awaited {
                    Ok(Some(report)) => report,
                    Ok(None) => {
                        warn!(uuid = %tuple.uuid, "execution context closed without reporting");
                        ExecutionReport::timed_out(&tuple.uuid)
                    }
                    Err(_) => {
                        warn!(uuid = %tuple.uuid, timeout = ?self.tuple_timeout, "tuple timed out");
                        ExecutionReport::timed_out(&tuple.uuid)
                    }
                }
            }
            Err(error) => {
                warn!(uuid = %tuple.uuid, "execution context failed to start: {:#}", error);
                ExecutionReport::timed_out(&tuple.uuid)
            }
        };

        self.injector.deactivate();
        self.injector.settle(&tuple.uuid);
        report
    }

    /// Merge the detector's verdicts into the records
    ///
    /// A detector that answers with something else leaves the records
    /// unjudged.
    async fn detect(&mut self, mut records: Vec<FuzzRecord>) -> Result<Vec<FuzzRecord>> {
        let Some(detector) = self.detector.as_mut() else {
            bail!("no detection stage running");
        };
        detector.post(PluginRequest::Detect(records.clone()))?;
        match detector.result_within(self.stage_timeout).await? {
            ResponseBody::DetectModResponse(judged) => {
                for verdict in judged {
                    if let Some(record) = records.iter_mut().find(|r| r.uuid == verdict.uuid) {
                        record.detection = verdict.detection;
                    }
                }
            }
            other => warn!(module = detector.module(), class = other.class(), "unexpected detection reply"),
        }
        Ok(records)
    }
}
