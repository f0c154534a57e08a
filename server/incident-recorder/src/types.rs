//! Core types for the incident recorder (records, projections, JSON contracts).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::fingerprint;
use crate::frame::Frame;
use crate::throwable::ErrorRecord;

/// Free-form key/value data attached to incidents.
pub type ContextMap = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Categorizes an incident's effects on the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
  /// Happened while adapting to another, already recorded incident.
  Secondary,
  /// Intentionally ignored; functionality is not affected.
  Ignore,
  /// No longer mattered at the time it happened (e.g. target deleted concurrently).
  Obsolete,
  /// Background process hit a permanent but harmless error.
  VisibleInfo,
  /// Operation is retried right away.
  RetryNow,
  RetrySoon,
  /// Operation is retried in hours or days.
  RetryLater,
  /// Application switches to a different approach or parameters.
  Adapt,
  /// Functionality may be affected, operation continues.
  Warn,
  /// Harmless problem led to a negative API response.
  ApiInfo,
  ApiFailure,
  /// Background process hit a permanent error the user is told about.
  VisibleFailure,
  /// Internal failure with unknown recoverability (e.g. a thread dying).
  InternalFailure,
  /// Application crashes or shuts down.
  Fatal,
}

impl Severity {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
      "secondary" => Some(Self::Secondary),
      "ignore" => Some(Self::Ignore),
      "obsolete" => Some(Self::Obsolete),
      "visible_info" => Some(Self::VisibleInfo),
      "retry_now" => Some(Self::RetryNow),
      "retry_soon" => Some(Self::RetrySoon),
      "retry_later" => Some(Self::RetryLater),
      "adapt" => Some(Self::Adapt),
      "warn" | "warning" => Some(Self::Warn),
      "api_info" => Some(Self::ApiInfo),
      "api_failure" => Some(Self::ApiFailure),
      "visible_failure" => Some(Self::VisibleFailure),
      "internal_failure" | "error" => Some(Self::InternalFailure),
      "fatal" | "critical" => Some(Self::Fatal),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Fingerprint data + incident
// ---------------------------------------------------------------------------

/// Everything that makes two incidents "the same". Never includes messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintData {
  /// Class of the root cause, even when its frames were unusable.
  pub throwable_class_name: String,
  /// Topmost eligible in-app frame. Absent e.g. for purely asynchronous chains.
  pub location: Option<Frame>,
  /// Root cause's throw site plus all frames passing the relevance filter.
  pub relevant_frames: Vec<Frame>,
  /// Data supplied by fingerprinters and fingerprint-capable errors.
  pub extra_data: BTreeMap<String, Value>,
}

impl FingerprintData {
  /// Fixed-width uppercase hex id, stable across runs.
  pub fn fingerprint(&self) -> String {
    fingerprint::fingerprint_id(self)
  }
}

/// Per-chain-element summary, same order as the causal chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrowableDetail {
  pub frame: Option<Frame>,
  pub throwable_class_name: String,
  pub message: Option<String>,
}

impl ThrowableDetail {
  pub fn from_error(error: &ErrorRecord) -> Self {
    Self {
      frame: error.stack().first().cloned(),
      throwable_class_name: error.class_name().to_string(),
      message: error.message().map(str::to_string),
    }
  }
}

impl fmt::Display for ThrowableDetail {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} at ", self.throwable_class_name)?;
    match &self.frame {
      Some(frame) => write!(f, "{}", frame)?,
      None => write!(f, "[?]")?,
    }
    match &self.message {
      Some(message) => write!(f, ": {}", message),
      None => Ok(()),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
  pub id: Uuid,
  pub timestamp: DateTime<Utc>,
  pub fingerprint_data: FingerprintData,
  pub severity: Severity,
  pub context_data: ContextMap,
  pub throwable_details: Vec<ThrowableDetail>,
  pub application_build_info: String,
}

impl Incident {
  pub fn fingerprint(&self) -> String {
    self.fingerprint_data.fingerprint()
  }
}

/// Flattened, string-only projection of `FingerprintData` for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorableFingerprint {
  pub id: String,
  pub name: String,
  pub location: Option<String>,
  /// One frame per line, relevant-frame order.
  pub frames: String,
  /// One `key = value` per line, sorted by key.
  pub extra_data: String,
}

impl StorableFingerprint {
  pub fn from_incident(incident: &Incident) -> Self {
    let data = &incident.fingerprint_data;
    Self {
      id: incident.fingerprint(),
      name: data.throwable_class_name.clone(),
      location: data.location.as_ref().map(Frame::to_string),
      frames: data
        .relevant_frames
        .iter()
        .map(Frame::to_string)
        .collect::<Vec<_>>()
        .join("\n"),
      extra_data: data
        .extra_data
        .iter()
        .map(|(key, value)| format!("{} = {}", key, render_value(value)))
        .collect::<Vec<_>>()
        .join("\n"),
    }
  }
}

/// Strings render bare, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the binary reads)
// ---------------------------------------------------------------------------

/// One inbound line: an error chain plus the severity to record it with.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundIncident {
  pub severity: String,
  pub error: InboundError,
}

/// Outermost error first; `cause` nests towards the root cause.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundError {
  pub class: String,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub stacktrace: Vec<InboundFrame>,
  #[serde(default)]
  pub cause: Option<Box<InboundError>>,
  #[serde(default)]
  pub fingerprint_data: BTreeMap<String, Value>,
  #[serde(default)]
  pub extra_frames: Vec<InboundFrame>,
  #[serde(default)]
  pub context_data: ContextMap,
  /// Data attached to this instance after construction.
  #[serde(default)]
  pub attached: ContextMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
  /// Full `module::Type::method` path.
  pub function: String,
  #[serde(default)]
  pub file: Option<String>,
  #[serde(default)]
  pub line: Option<u32>,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract: what the binary emits)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StoredLine<'a> {
  pub incident: &'a Incident,
  pub fingerprint: &'a StorableFingerprint,
}

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
