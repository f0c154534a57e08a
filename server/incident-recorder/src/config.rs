//! Recorder configuration with sane defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Construction-time settings; immutable once handed to the recorder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
  /// Opaque build identifier stamped on every incident.
  pub application_build_info: String,
  /// Module path roots considered "inside the application" (e.g. `myapp`).
  /// Order is irrelevant.
  pub application_package_roots: Vec<String>,
  /// Substrings marking generated/shim frames that never count as relevant.
  pub proxy_markers: Vec<String>,
  /// Idle time after which data attached to an error instance is dropped.
  pub attached_data_ttl_secs: u64,
}

impl Default for RecorderConfig {
  fn default() -> Self {
    Self {
      application_build_info: "unknown".into(),
      application_package_roots: Vec::new(),
      proxy_markers: vec!["$Proxy$".into(), "{{vtable.shim}}".into()],
      attached_data_ttl_secs: 300,
    }
  }
}

impl RecorderConfig {
  pub fn new(build_info: impl Into<String>, package_roots: &[&str]) -> Self {
    Self {
      application_build_info: build_info.into(),
      application_package_roots: package_roots.iter().map(|r| r.to_string()).collect(),
      ..Self::default()
    }
  }

  /// Load from a JSON file; missing fields fall back to defaults.
  pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)
      .map_err(|e| EngineError::parse(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&raw)?)
  }

  pub fn attached_data_ttl(&self) -> Duration {
    Duration::from_secs(self.attached_data_ttl_secs)
  }
}
