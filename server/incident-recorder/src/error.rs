//! Structured error types for the incident recorder.

use thiserror::Error;

/// Failures raised while assembling or storing an incident.
///
/// These never escape `IncidentRecorder::record_incident`; they are logged
/// there and turned into "no incident".
#[derive(Debug, Error)]
pub enum RecorderError {
  #[error("causal chain is empty")]
  EmptyChain,

  #[error("class hierarchy cycle through {0}")]
  HierarchyCycle(String),

  #[error("store: {0}")]
  Store(#[from] StoreError),
}

/// Failure reported by a fingerprinter or context data provider.
#[derive(Debug, Error)]
pub enum ExtensionError {
  #[error("{plugin} failed: {reason}")]
  Failed { plugin: String, reason: String },

  #[error("{plugin} panicked")]
  Panicked { plugin: String },
}

impl ExtensionError {
  pub fn failed(plugin: &str, reason: impl Into<String>) -> Self {
    Self::Failed {
      plugin: plugin.to_string(),
      reason: reason.into(),
    }
  }
}

/// Failure of an `IncidentStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("rejected: {0}")]
  Rejected(String),
}

/// Errors of the JSON-lines front end (inbound validation).
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("parse: {0}")]
  Parse(String),

  #[error("record: {0}")]
  Record(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn parse(msg: impl Into<String>) -> Self {
    Self::Parse(msg.into())
  }

  pub fn record(msg: impl Into<String>) -> Self {
    Self::Record(msg.into())
  }
}
