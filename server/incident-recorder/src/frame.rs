//! Stack frame value type and the relevance filter applied to frames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RecorderConfig;

/// Separator between module path segments, and between type and method.
pub const PATH_SEPARATOR: &str = "::";

/// One stack location. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
  pub declaring_type: String,
  pub method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub file: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub line: Option<u32>,
}

impl Frame {
  pub fn new(declaring_type: impl Into<String>, method: impl Into<String>) -> Self {
    Self {
      declaring_type: declaring_type.into(),
      method: method.into(),
      file: None,
      line: None,
    }
  }

  /// Split a full `a::b::Type::method` path at its last separator.
  ///
  /// A path without separator is treated as a free function with an empty
  /// declaring type.
  pub fn from_path(path: &str) -> Self {
    match path.rsplit_once(PATH_SEPARATOR) {
      Some((declaring_type, method)) => Self::new(declaring_type, method),
      None => Self::new("", path),
    }
  }

  pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
    self.file = Some(file.into());
    self.line = Some(line);
    self
  }

  /// Declaring type and method joined by `::`.
  pub fn location(&self) -> String {
    if self.declaring_type.is_empty() {
      return self.method.clone();
    }
    format!("{}{}{}", self.declaring_type, PATH_SEPARATOR, self.method)
  }
}

impl fmt::Display for Frame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (&self.file, self.line) {
      (Some(file), Some(line)) => write!(f, "{}({}:{})", self.location(), file, line),
      _ => write!(f, "{}(Unknown Source)", self.location()),
    }
  }
}

/// Decides whether a frame belongs to application code.
#[derive(Debug, Clone)]
pub struct FrameFilter {
  root_prefixes: Vec<String>,
  proxy_markers: Vec<String>,
}

impl FrameFilter {
  pub fn new(config: &RecorderConfig) -> Self {
    Self {
      root_prefixes: config
        .application_package_roots
        .iter()
        .map(|root| format!("{}{}", root, PATH_SEPARATOR))
        .collect(),
      proxy_markers: config.proxy_markers.clone(),
    }
  }

  /// Matched against the full `type::method` path, so crate-root functions
  /// and shim suffixes on the method segment are both seen.
  pub fn is_relevant(&self, frame: &Frame) -> bool {
    let location = frame.location();
    self.is_inside_application(&location) && !self.is_generated_proxy(&location)
  }

  fn is_inside_application(&self, location: &str) -> bool {
    self
      .root_prefixes
      .iter()
      .any(|prefix| location.starts_with(prefix.as_str()))
  }

  fn is_generated_proxy(&self, location: &str) -> bool {
    self
      .proxy_markers
      .iter()
      .any(|marker| location.contains(marker.as_str()))
  }
}
