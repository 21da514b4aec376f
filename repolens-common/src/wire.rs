//! WebSocket wire protocol between the daemon and client.
//!
//! Every frame is a JSON text message of the shape
//! `{"event": "<kebab-case-name>", "data": {...}}` with camelCase payload
//! fields. Clients register interest per analysis id; the daemon only routes
//! events for registered analyses to that socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::progress::ProgressUpdate;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    RegisterAnalysis(AnalysisRef),
    UnregisterAnalysis(AnalysisRef),
}

/// Frames sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    AnalysisProgress(AnalysisProgressEvent),
    AnalysisComplete(AnalysisCompleteEvent),
    AnalysisError(AnalysisErrorEvent),
    BatchAnalysisProgress(BatchProgressEvent),
    BatchAnalysisComplete(BatchCompleteEvent),
}

impl ServerMessage {
    /// The analysis this frame belongs to; `None` for batch-level frames.
    #[must_use]
    pub fn analysis_id(&self) -> Option<&str> {
        match self {
            Self::AnalysisProgress(e) => Some(&e.analysis_id),
            Self::AnalysisComplete(e) => Some(&e.analysis_id),
            Self::AnalysisError(e) => Some(&e.analysis_id),
            Self::BatchAnalysisProgress(e) => Some(&e.batch_id),
            Self::BatchAnalysisComplete(e) => Some(&e.batch_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRef {
    pub analysis_id: String,
}

impl AnalysisRef {
    pub fn new(analysis_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisProgressEvent {
    pub analysis_id: String,
    #[serde(flatten)]
    pub update: ProgressUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCompleteEvent {
    pub analysis_id: String,
    /// Opaque analysis result; the daemon owns its shape.
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisErrorEvent {
    pub analysis_id: String,
    pub message: String,
}

/// Progress for one repository within a batch. Registration is keyed by the
/// batch id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressEvent {
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Repositories finished so far.
    pub completed: u32,
    pub total: u32,
    /// Repositories that finished with an error. Absent means zero.
    #[serde(default)]
    pub failed: u32,
    #[serde(flatten)]
    pub update: ProgressUpdate,
}

/// Batch completion carries the FULL per-repository result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompleteEvent {
    pub batch_id: String,
    pub repositories: Vec<Value>,
}

/// Encode a frame for the socket. Serialization of these types cannot fail.
pub fn encode<T: Serialize>(message: &T) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to encode wire frame");
        String::from("{}")
    })
}

pub fn decode_client(text: &str) -> Result<ClientMessage, WireError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_server(text: &str) -> Result<ServerMessage, WireError> {
    Ok(serde_json::from_str(text)?)
}
