//! Isolated execution contexts
//!
//! One context runs the page for exactly one tuple. It fetches the page's
//! scripts through an [`InterceptionHandle`], so the harness for the tuple in
//! flight gets spliced in, and reports back [`ExecutionReport`] values on a
//! channel. The dispatcher tears the context down once the tuple has reported
//! or timed out.

use crate::config::RunnerConfig;
use crate::injector::{InterceptionHandle, ResponseChunk};
use crate::protocol::ExecutionResponse;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Error text recorded for a tuple that never reported
pub const TIMEOUT_ERROR: &str = "timeout";

/// Report posted by the harness from inside the page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub unique_id: String,
    #[serde(default)]
    pub returned_value: Value,
    #[serde(rename = "serializedDOM", default)]
    pub serialized_dom: Option<String>,
    #[serde(default)]
    pub call_stack: Option<Vec<Value>>,
    /// `false` on success, the thrown error's text otherwise
    #[serde(default, deserialize_with = "error_field")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Flag(bool),
    Message(String),
}

fn error_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<ErrorField>::deserialize(deserializer)? {
            None | Some(ErrorField::Flag(false)) => None,
            Some(ErrorField::Flag(true)) => Some("error".to_string()),
            Some(ErrorField::Message(message)) => Some(message),
        },
    )
}

impl ExecutionReport {
    pub fn timed_out(uuid: &str) -> Self {
        ExecutionReport {
            unique_id: uuid.to_string(),
            error: Some(TIMEOUT_ERROR.to_string()),
            ..Default::default()
        }
    }

    pub fn into_response(self) -> ExecutionResponse {
        ExecutionResponse {
            html: self.serialized_dom,
            call_stack: self.call_stack,
            value: self.returned_value,
            error: self.error,
        }
    }
}

/// Report as posted by the harness: `{debug, class, payload}`
#[derive(Debug, Deserialize)]
struct PostedMessage {
    #[serde(default)]
    class: Option<String>,
    payload: ExecutionReport,
}

/// Parse one line of context output
///
/// Accepts either the harness envelope or a bare report.
pub fn parse_report_line(line: &str) -> Option<ExecutionReport> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Ok(message) = serde_json::from_str::<PostedMessage>(line) {
        trace!(class = ?message.class, "posted message");
        return Some(message.payload);
    }
    serde_json::from_str::<ExecutionReport>(line).ok()
}

/// A running execution context
#[async_trait]
pub trait ExecutionContext: Send {
    /// Release every resource held by the context
    async fn teardown(self: Box<Self>);
}

/// Creates one fresh execution context per tuple
#[async_trait]
pub trait ExecutionContextFactory: Send + Sync {
    /// Load the page in a new context
    ///
    /// Every script the context fetches must pass through `interception`.
    /// Reports go to `reports`; unrelated or duplicate reports are allowed
    /// and ignored by the caller.
    async fn launch(
        &self,
        interception: InterceptionHandle,
        reports: mpsc::UnboundedSender<ExecutionReport>,
    ) -> Result<Box<dyn ExecutionContext>>;
}

/// One resource served to the context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResource {
    pub uri: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl PageResource {
    pub fn script(uri: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        PageResource {
            uri: uri.into(),
            content_type: "application/javascript".to_string(),
            body: body.into(),
        }
    }

    /// Body after streaming it through the interception layer in chunks
    pub fn intercepted(&self, interception: &InterceptionHandle, chunk_size: usize) -> Vec<u8> {
        let chunk_size = chunk_size.max(1);
        if self.body.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.body.len());
        for (i, piece) in self.body.chunks(chunk_size).enumerate() {
            let offset = i * chunk_size;
            let chunk = ResponseChunk {
                uri: &self.uri,
                content_type: &self.content_type,
                offset,
                data: piece,
                last: offset + piece.len() == self.body.len(),
            };
            out.extend_from_slice(&interception.intercept(&chunk));
        }
        out
    }
}

/// Resource line written to the runner's stdin
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServedResource<'a> {
    uri: &'a str,
    content_type: &'a str,
    body: String,
}

/// Runs each tuple in a fresh child process
///
/// The runner receives one JSON line per page resource on stdin
/// (`{uri, contentType, body}`), stdin is then closed. It must print every
/// message the page posts as a JSON line on stdout.
#[derive(Debug, Clone)]
pub struct ProcessContextFactory {
    resources: Arc<Vec<PageResource>>,
    runner: RunnerConfig,
    chunk_size: usize,
}

impl ProcessContextFactory {
    pub fn new(resources: Vec<PageResource>, runner: RunnerConfig, chunk_size: usize) -> Self {
        ProcessContextFactory {
            resources: Arc::new(resources),
            runner,
            chunk_size,
        }
    }
}

struct ProcessContext {
    child: Child,
    reader: JoinHandle<()>,
}

#[async_trait]
impl ExecutionContext for ProcessContext {
    async fn teardown(mut self: Box<Self>) {
        if let Err(error) = self.child.kill().await {
            debug!("runner already gone: {}", error);
        }
        self.reader.abort();
    }
}

#[async_trait]
impl ExecutionContextFactory for ProcessContextFactory {
    async fn launch(
        &self,
        interception: InterceptionHandle,
        reports: mpsc::UnboundedSender<ExecutionReport>,
    ) -> Result<Box<dyn ExecutionContext>> {
        let mut child = Command::new(&self.runner.program)
            .args(&self.runner.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start runner {}", self.runner.program))?;

        let stdout = child.stdout.take().context("runner stdout not captured")?;
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_report_line(&line) {
                        Some(report) => {
                            if reports.send(report).is_err() {
                                break;
                            }
                        }
                        None => trace!(line = %line, "runner output ignored"),
                    },
                    Ok(None) => break,
                    Err(error) => {
                        warn!("failed to read runner output: {}", error);
                        break;
                    }
                }
            }
        });

        let mut stdin = child.stdin.take().context("runner stdin not captured")?;
        for resource in self.resources.iter() {
            let body = resource.intercepted(&interception, self.chunk_size);
            let served = ServedResource {
                uri: &resource.uri,
                content_type: &resource.content_type,
                body: String::from_utf8_lossy(&body).into_owned(),
            };
            let mut line = serde_json::to_vec(&served)?;
            line.push(b'\n');
            stdin
                .write_all(&line)
                .await
                .with_context(|| format!("failed to serve {} to runner", resource.uri))?;
        }
        stdin.shutdown().await.context("failed to close runner stdin")?;
        drop(stdin);

        debug!(program = %self.runner.program, resources = self.resources.len(), "execution context launched");
        Ok(Box::new(ProcessContext { child, reader }))
    }
}
