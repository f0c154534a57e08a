//! Error input model: one node of a causal chain plus its optional capabilities.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::frame::Frame;
use crate::types::ContextMap;

static NEXT_ERROR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one error instance. Minted once per construction, never
/// derived from content, so structurally equal errors still differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorId(u64);

impl ErrorId {
  fn mint() -> Self {
    Self(NEXT_ERROR_ID.fetch_add(1, Ordering::Relaxed))
  }
}

/// Data an error reports about itself for fingerprinting.
#[derive(Debug, Clone, Default)]
pub struct FingerprintSupport {
  pub data: BTreeMap<String, Value>,
  pub frames: Vec<Frame>,
}

/// A recorded runtime error, shared as `Arc<ErrorRecord>`. Not `Clone`:
/// identity is tied to the allocation.
#[derive(Debug)]
pub struct ErrorRecord {
  id: ErrorId,
  class_name: String,
  message: Option<String>,
  stack: Vec<Frame>,
  cause: Option<Arc<ErrorRecord>>,
  fingerprint_support: Option<FingerprintSupport>,
  context_support: Option<ContextMap>,
}

impl ErrorRecord {
  pub fn builder(class_name: impl Into<String>) -> ErrorRecordBuilder {
    ErrorRecordBuilder {
      class_name: class_name.into(),
      message: None,
      stack: Vec::new(),
      cause: None,
      fingerprint_support: None,
      context_support: None,
    }
  }

  pub fn id(&self) -> ErrorId {
    self.id
  }

  pub fn class_name(&self) -> &str {
    &self.class_name
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }

  /// Innermost (throw site) first.
  pub fn stack(&self) -> &[Frame] {
    &self.stack
  }

  pub fn cause(&self) -> Option<&Arc<ErrorRecord>> {
    self.cause.as_ref()
  }

  pub fn fingerprint_support(&self) -> Option<&FingerprintSupport> {
    self.fingerprint_support.as_ref()
  }

  pub fn context_support(&self) -> Option<&ContextMap> {
    self.context_support.as_ref()
  }

  /// Root cause first, `outer` last.
  pub fn causal_chain(outer: &Arc<ErrorRecord>) -> Vec<Arc<ErrorRecord>> {
    let mut chain = vec![Arc::clone(outer)];
    let mut current = outer.cause.as_ref();
    while let Some(cause) = current {
      chain.push(Arc::clone(cause));
      current = cause.cause.as_ref();
    }
    chain.reverse();
    chain
  }
}

pub struct ErrorRecordBuilder {
  class_name: String,
  message: Option<String>,
  stack: Vec<Frame>,
  cause: Option<Arc<ErrorRecord>>,
  fingerprint_support: Option<FingerprintSupport>,
  context_support: Option<ContextMap>,
}

impl ErrorRecordBuilder {
  pub fn message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  /// Append a frame below the ones added so far (first call = throw site).
  pub fn frame(mut self, frame: Frame) -> Self {
    self.stack.push(frame);
    self
  }

  pub fn stack(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
    self.stack.extend(frames);
    self
  }

  pub fn cause(mut self, cause: Arc<ErrorRecord>) -> Self {
    self.cause = Some(cause);
    self
  }

  pub fn fingerprint_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self
      .fingerprint_support
      .get_or_insert_with(FingerprintSupport::default)
      .data
      .insert(key.into(), value.into());
    self
  }

  pub fn extra_frames(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
    self
      .fingerprint_support
      .get_or_insert_with(FingerprintSupport::default)
      .frames
      .extend(frames);
    self
  }

  pub fn context_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self
      .context_support
      .get_or_insert_with(ContextMap::new)
      .insert(key.into(), value.into());
    self
  }

  pub fn build(self) -> Arc<ErrorRecord> {
    Arc::new(ErrorRecord {
      id: ErrorId::mint(),
      class_name: self.class_name,
      message: self.message,
      stack: self.stack,
      cause: self.cause,
      fingerprint_support: self.fingerprint_support,
      context_support: self.context_support,
    })
  }
}
