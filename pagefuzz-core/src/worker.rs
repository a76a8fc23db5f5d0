//! Isolated plugin workers
//!
//! Every plugin instance lives in its own tokio task and is reached only
//! through a pair of channels carrying [`PluginRequest`] and
//! [`PluginResponse`] values. Dropping the [`WorkerHandle`] terminates the
//! task.

use crate::plugins::{Adapter, Detector, Generator, PluginCatalog};
use crate::protocol::{
    Characteristics, GeneratedBatch, IntegrityReport, PluginRequest, PluginResponse, ResponseBody,
};
use anyhow::{bail, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

type Outbound = mpsc::UnboundedSender<PluginResponse>;

/// Channel endpoint of one running plugin
#[derive(Debug)]
pub struct WorkerHandle {
    module: String,
    requests: mpsc::UnboundedSender<PluginRequest>,
    responses: mpsc::UnboundedReceiver<PluginResponse>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn start<F, Fut>(module: &str, run: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedReceiver<PluginRequest>, Outbound) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(request_rx, response_tx));
        WorkerHandle {
            module: module.to_string(),
            requests: request_tx,
            responses: response_rx,
            task,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn post(&self, request: PluginRequest) -> Result<()> {
        let command = request.command();
        if self.requests.send(request).is_err() {
            bail!("worker {} is gone, cannot send {}", self.module, command);
        }
        Ok(())
    }

    /// Next raw message, debug records included
    pub async fn recv(&mut self) -> Option<PluginResponse> {
        self.responses.recv().await
    }

    /// Next result message; debug records are logged and skipped
    pub async fn next_result(&mut self) -> Result<ResponseBody> {
        loop {
            match self.responses.recv().await {
                Some(response) if response.debug => log_debug(&self.module, &response),
                Some(response) => return Ok(response.body),
                None => bail!("worker {} stopped before replying", self.module),
            }
        }
    }

    /// Like [`WorkerHandle::next_result`], bounded by `deadline`
    pub async fn result_within(&mut self, deadline: Duration) -> Result<ResponseBody> {
        match tokio::time::timeout(deadline, self.next_result()).await {
            Ok(result) => result,
            Err(_) => bail!("worker {} did not reply within {:?}", self.module, deadline),
        }
    }

    /// Stop the worker task
    pub fn terminate(self) {
        drop(self);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn log_debug(module: &str, response: &PluginResponse) {
    if let ResponseBody::Debug(message) = &response.body {
        debug!(module, header = %message.header, content = %message.content, "worker debug");
    }
}

fn integrity_response(module: &str, name: &str, description: &str, check: crate::plugins::IntegrityChecks) -> PluginResponse {
    PluginResponse::result(ResponseBody::IntegrityCheck(IntegrityReport {
        file_name: module.to_string(),
        check,
        caract: Characteristics {
            name: name.to_string(),
            description: description.to_string(),
        },
    }))
}

fn unsupported(module: &str, request: &PluginRequest) -> PluginResponse {
    PluginResponse::debug(
        format!("{}: unsupported command", module),
        json!(request.command()),
    )
}

pub fn spawn_generator(module: &str, generator: Box<dyn Generator>) -> WorkerHandle {
    let name = module.to_string();
    WorkerHandle::start(module, move |mut requests, outbound| async move {
        let mut generator = generator;
        while let Some(request) = requests.recv().await {
            let response = match &request {
                PluginRequest::CheckIntegrity(file) => {
                    let check = generator.check_integrity();
                    integrity_response(file, generator.name(), generator.description(), check)
                }
                PluginRequest::Generate(generate) => {
                    let _ = outbound.send(PluginResponse::debug(
                        format!("{}: generate", name),
                        json!({"id": generate.id, "batchSize": generate.batch_size}),
                    ));
                    PluginResponse::result(ResponseBody::GenModResponse(GeneratedBatch {
                        id: generate.id,
                        batch: generator.handle_request(generate),
                    }))
                }
                other => unsupported(&name, other),
            };
            if outbound.send(response).is_err() {
                break;
            }
        }
    })
}

pub fn spawn_detector(module: &str, detector: Box<dyn Detector>) -> WorkerHandle {
    let name = module.to_string();
    WorkerHandle::start(module, move |mut requests, outbound| async move {
        while let Some(request) = requests.recv().await {
            let response = match request {
                PluginRequest::CheckIntegrity(file) => {
                    let check = detector.check_integrity();
                    integrity_response(&file, detector.name(), detector.description(), check)
                }
                PluginRequest::Detect(batch) => PluginResponse::result(
                    ResponseBody::DetectModResponse(detector.launch_detection(batch)),
                ),
                other => unsupported(&name, &other),
            };
            if outbound.send(response).is_err() {
                break;
            }
        }
    })
}

/// Spawn a brain that owns its own generator workers
///
/// Generators are created on `initializeBrain`, one per argument position,
/// and released after the brain has answered a `handleGeneration` request.
/// Their debug records are relayed through the brain.
pub fn spawn_brain(module: &str, adapter: Box<dyn Adapter>, catalog: Arc<PluginCatalog>) -> WorkerHandle {
    let name = module.to_string();
    WorkerHandle::start(module, move |mut requests, outbound| async move {
        let mut adapter = adapter;
        let mut generators: Vec<(usize, WorkerHandle)> = Vec::new();
        while let Some(request) = requests.recv().await {
            let response = match request {
                PluginRequest::CheckIntegrity(file) => {
                    let check = adapter.check_integrity();
                    integrity_response(&file, adapter.name(), adapter.description(), check)
                }
                PluginRequest::InitializeBrain(map) => {
                    generators.clear();
                    let mut started = map.clone();
                    for (slot, generator_module) in &map {
                        let created = if adapter.accepts(generator_module) {
                            catalog.generator(generator_module, *slot)
                        } else {
                            Err(anyhow::anyhow!(
                                "{} is not compatible with {}",
                                generator_module,
                                name
                            ))
                        };
                        match created {
                            Ok(generator) => {
                                generators.push((*slot, spawn_generator(generator_module, generator)))
                            }
                            Err(error) => {
                                started.remove(slot);
                                let _ = outbound.send(PluginResponse::debug(
                                    format!("{}: generator rejected", name),
                                    json!(format!("{:#}", error)),
                                ));
                            }
                        }
                    }
                    PluginResponse::result(ResponseBody::InitializationMark(started))
                }
                PluginRequest::HandleGeneration(generation) => {
                    let ids: Vec<usize> = generators.iter().map(|(slot, _)| *slot).collect();
                    let plan = adapter.handle_generation(
                        &ids,
                        generation.batch_size,
                        generation.previous_batch.as_deref(),
                    );
                    let mut waiting = Vec::new();
                    for generate in plan {
                        let slot = generate.id;
                        if let Some((_, handle)) = generators.iter().find(|(s, _)| *s == slot) {
                            if handle.post(PluginRequest::Generate(generate)).is_ok() {
                                waiting.push(slot);
                            }
                        }
                    }
                    let generated = collect_generated(&mut generators, &waiting, &outbound).await;
                    if generated.len() != waiting.len() {
                        let _ = outbound.send(PluginResponse::debug(
                            format!("{}: missing generator replies", name),
                            json!({"expected": waiting, "received": generated.len()}),
                        ));
                    }
                    // Generators are stateless between runs
                    generators.clear();
                    PluginResponse::result(ResponseBody::BrainModResponse(adapter.assemble(generated)))
                }
                other => unsupported(&name, &other),
            };
            if outbound.send(response).is_err() {
                break;
            }
        }
    })
}

/// Wait for one batch from each generator in `waiting`, relaying their
/// debug records
async fn collect_generated(
    generators: &mut [(usize, WorkerHandle)],
    waiting: &[usize],
    outbound: &Outbound,
) -> Vec<GeneratedBatch> {
    let mut generated = Vec::new();
    for (_, handle) in generators
        .iter_mut()
        .filter(|(slot, _)| waiting.contains(slot))
    {
        while let Some(response) = handle.recv().await {
            if response.debug {
                let _ = outbound.send(response);
                continue;
            }
            if let ResponseBody::GenModResponse(batch) = response.body {
                generated.push(batch);
                break;
            }
        }
    }
    generated
}
