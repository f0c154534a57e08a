//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an InboundIncident. Output lines are either:
//! - `{"incident": .., "fingerprint": ..}` (written by the store)
//! - An ErrorOutput (when a line is invalid or could not be recorded)
//!
//! An optional first argument names a JSON file with the recorder config.
//! Logs go to stderr, filtered by RUST_LOG.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use incident_recorder::normalize::normalize;
use incident_recorder::types::ErrorOutput;
use incident_recorder::{
  EngineError, Extensions, InboundIncident, IncidentRecorder, JsonLinesStore, RecorderConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(io::stderr)
    .init();

  let config = match std::env::args().nth(1) {
    Some(path) => match RecorderConfig::from_json_file(Path::new(&path)) {
      Ok(config) => config,
      Err(e) => {
        error!(path = %path, error = %e, "could not load config");
        std::process::exit(2);
      }
    },
    None => RecorderConfig::default(),
  };
  info!(build = %config.application_build_info, roots = ?config.application_package_roots, "starting");

  let output = Arc::new(JsonLinesStore::new(io::BufWriter::new(io::stdout())));
  let recorder = IncidentRecorder::new(
    config,
    Extensions::none(),
    Box::new(Arc::clone(&output)),
  );

  let stdin = io::stdin();
  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        error!(error = %e, "read error");
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    if let Err(e) = process_line(&recorder, trimmed) {
      let err = match &e {
        EngineError::Validation { field, reason } => {
          ErrorOutput::new(reason.clone()).with_field(field.clone())
        }
        _ => ErrorOutput::new(e.to_string()),
      };
      if let Err(e) = output.write_line(&err) {
        error!(error = %e, "write failed");
      }
    }
  }

  if let Err(e) = output.flush() {
    error!(error = %e, "flush failed");
  }
}

fn process_line(recorder: &IncidentRecorder, line: &str) -> Result<(), EngineError> {
  let raw: InboundIncident =
    serde_json::from_str(line).map_err(|e| EngineError::parse(format!("json parse: {}", e)))?;
  let normalized = normalize(&raw)?;

  for (error, data) in &normalized.attached {
    let mut attacher = recorder.attach_to(error);
    for (key, value) in data {
      attacher = attacher.set(key.clone(), value.clone());
    }
  }

  if recorder
    .record_incident(&normalized.error, normalized.severity)
    .is_none()
  {
    return Err(EngineError::record("incident could not be recorded"));
  }
  Ok(())
}
