//! Worker module message contract
//!
//! Generation, detection and adaptation ("brain") plugins all speak the same
//! request/response shape. Requests are `{command, payload}`; responses are
//! `{debug, class, payload}`. A response with `debug: true` is a log record
//! and never carries a result.
//!
//! The `intializationMark` class name keeps its historical spelling so that
//! existing plugins stay wire compatible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Generator module assigned to each argument position of the target function
pub type GenerationMap = BTreeMap<usize, String>;

/// One argument tuple of a batch plus its correlation identifier
///
/// `args: None` marks the baseline tuple, which only snapshots the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub uuid: String,
    pub args: Option<Vec<Value>>,
}

impl Tuple {
    pub fn new(args: Vec<Value>) -> Self {
        Tuple {
            uuid: uuid::Uuid::new_v4().to_string(),
            args: Some(args),
        }
    }

    pub fn baseline() -> Self {
        Tuple {
            uuid: uuid::Uuid::new_v4().to_string(),
            args: None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.args.is_none()
    }
}

/// What one execution of the target left behind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    #[serde(rename = "HTML", default)]
    pub html: Option<String>,
    #[serde(default)]
    pub call_stack: Option<Vec<Value>>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    /// `true` when the detector flags the execution as anomalous
    pub result: bool,
    pub info: String,
}

/// Correlated result of one tuple, as sent to detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzRecord {
    pub uuid: String,
    pub args: Option<Vec<Value>>,
    pub response: ExecutionResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub id: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub batch_size: usize,
    #[serde(default)]
    pub previous_batch: Option<Vec<FuzzRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "camelCase")]
pub enum PluginRequest {
    /// Payload is the module id being checked
    CheckIntegrity(String),
    Generate(GenerateRequest),
    Detect(Vec<FuzzRecord>),
    HandleGeneration(GenerationRequest),
    InitializeBrain(GenerationMap),
}

impl PluginRequest {
    pub fn command(&self) -> &'static str {
        match self {
            PluginRequest::CheckIntegrity(_) => "checkIntegrity",
            PluginRequest::Generate(_) => "generate",
            PluginRequest::Detect(_) => "detect",
            PluginRequest::HandleGeneration(_) => "handleGeneration",
            PluginRequest::InitializeBrain(_) => "initializeBrain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristics {
    pub name: String,
    pub description: String,
}

/// Self-declared capability probe of a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub file_name: String,
    /// Named capability checks; every one must hold for registration
    pub check: BTreeMap<String, bool>,
    pub caract: Characteristics,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        !self.check.is_empty() && self.check.values().all(|ok| *ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedBatch {
    pub id: usize,
    pub batch: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugMessage {
    pub header: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "payload")]
pub enum ResponseBody {
    #[serde(rename = "integrityCheck")]
    IntegrityCheck(IntegrityReport),
    #[serde(rename = "genModResponse")]
    GenModResponse(GeneratedBatch),
    #[serde(rename = "detectModResponse")]
    DetectModResponse(Vec<FuzzRecord>),
    #[serde(rename = "brainModResponse")]
    BrainModResponse(Vec<Vec<Value>>),
    #[serde(rename = "intializationMark")]
    InitializationMark(GenerationMap),
    #[serde(rename = "debug")]
    Debug(DebugMessage),
}

impl ResponseBody {
    pub fn class(&self) -> &'static str {
        match self {
            ResponseBody::IntegrityCheck(_) => "integrityCheck",
            ResponseBody::GenModResponse(_) => "genModResponse",
            ResponseBody::DetectModResponse(_) => "detectModResponse",
            ResponseBody::BrainModResponse(_) => "brainModResponse",
            ResponseBody::InitializationMark(_) => "intializationMark",
            ResponseBody::Debug(_) => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub debug: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl PluginResponse {
    pub fn result(body: ResponseBody) -> Self {
        PluginResponse { debug: false, body }
    }

    pub fn debug(header: impl Into<String>, content: Value) -> Self {
        PluginResponse {
            debug: true,
            body: ResponseBody::Debug(DebugMessage {
                header: header.into(),
                content,
            }),
        }
    }

    pub fn class(&self) -> &'static str {
        self.body.class()
    }
}
