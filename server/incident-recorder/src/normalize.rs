//! Turn inbound JSON error chains into `ErrorRecord` chains.

use std::sync::Arc;

use crate::error::EngineError;
use crate::frame::Frame;
use crate::throwable::ErrorRecord;
use crate::types::*;

/// A validated inbound line, ready for `IncidentRecorder::record_incident`.
#[derive(Debug)]
pub struct NormalizedIncident {
  pub severity: Severity,
  /// Outermost error of the chain.
  pub error: Arc<ErrorRecord>,
  /// Per-instance data to attach before recording, root cause first.
  pub attached: Vec<(Arc<ErrorRecord>, ContextMap)>,
}

pub fn normalize(raw: &InboundIncident) -> Result<NormalizedIncident, EngineError> {
  let severity = Severity::from_str_loose(&raw.severity)
    .ok_or_else(|| EngineError::validation("severity", "unknown severity"))?;

  let mut attached = Vec::new();
  let error = build_error(&raw.error, "error", &mut attached)?;

  Ok(NormalizedIncident {
    severity,
    error,
    attached,
  })
}

/// Causes are built first so each record can own its cause.
fn build_error(
  raw: &InboundError,
  path: &str,
  attached: &mut Vec<(Arc<ErrorRecord>, ContextMap)>,
) -> Result<Arc<ErrorRecord>, EngineError> {
  if raw.class.trim().is_empty() {
    return Err(EngineError::validation(&format!("{}.class", path), "must not be empty"));
  }

  let cause = match &raw.cause {
    Some(cause) => Some(build_error(cause, &format!("{}.cause", path), attached)?),
    None => None,
  };

  let mut builder = ErrorRecord::builder(raw.class.trim())
    .stack(convert_frames(&raw.stacktrace, &format!("{}.stacktrace", path))?);

  if let Some(message) = &raw.message {
    builder = builder.message(message.clone());
  }
  if let Some(cause) = cause {
    builder = builder.cause(cause);
  }
  for (key, value) in &raw.fingerprint_data {
    builder = builder.fingerprint_data(key.clone(), value.clone());
  }
  if !raw.extra_frames.is_empty() {
    builder = builder.extra_frames(convert_frames(&raw.extra_frames, &format!("{}.extra_frames", path))?);
  }
  for (key, value) in &raw.context_data {
    builder = builder.context_data(key.clone(), value.clone());
  }

  let record = builder.build();
  if !raw.attached.is_empty() {
    attached.push((Arc::clone(&record), raw.attached.clone()));
  }
  Ok(record)
}

fn convert_frames(raw: &[InboundFrame], path: &str) -> Result<Vec<Frame>, EngineError> {
  raw
    .iter()
    .enumerate()
    .map(|(i, f)| {
      let function = f.function.trim();
      if function.is_empty() {
        return Err(EngineError::validation(
          &format!("{}[{}].function", path, i),
          "must not be empty",
        ));
      }
      let mut frame = Frame::from_path(function);
      frame.file = f.file.as_deref().map(normalize_path);
      frame.line = f.line;
      Ok(frame)
    })
    .collect()
}

/// Normalize a file path for stable comparison:
/// - backslash -> forward slash
/// - collapse repeated slashes
/// - strip leading ./
fn normalize_path(p: &str) -> String {
  let s = p.replace('\\', "/");
  let mut out = String::with_capacity(s.len());
  let mut prev_slash = false;
  for ch in s.chars() {
    if ch == '/' {
      if !prev_slash {
        out.push('/');
      }
      prev_slash = true;
    } else {
      prev_slash = false;
      out.push(ch);
    }
  }
  match out.strip_prefix("./") {
    Some(rest) => rest.to_string(),
    None => out,
  }
}
