//! Data attached to specific error instances after they were created.
//!
//! Entries are keyed by [`ErrorId`], never by content. Each entry keeps a weak
//! back-reference to its error so it can be dropped as soon as the error is,
//! and otherwise expires after an idle period. Both checks run lazily.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::throwable::{ErrorId, ErrorRecord};
use crate::types::ContextMap;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
  owner: Weak<ErrorRecord>,
  data: ContextMap,
  last_write: Instant,
}

impl Entry {
  fn is_live(&self, now: Instant, ttl: Duration) -> bool {
    self.owner.strong_count() > 0 && now.duration_since(self.last_write) <= ttl
  }
}

pub struct AttachedDataCache {
  ttl: Duration,
  entries: Mutex<HashMap<ErrorId, Entry>>,
}

impl Default for AttachedDataCache {
  fn default() -> Self {
    Self::new(DEFAULT_TTL)
  }
}

impl AttachedDataCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      ttl,
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// Create or merge the entry for `error` and restart its idle timer.
  pub fn attach(&self, error: &Arc<ErrorRecord>, key: impl Into<String>, value: Value) {
    let now = Instant::now();
    let mut entries = self.entries.lock();
    self.sweep(&mut entries, now);

    let entry = entries.entry(error.id()).or_insert_with(|| Entry {
      owner: Arc::downgrade(error),
      data: ContextMap::new(),
      last_write: now,
    });
    entry.data.insert(key.into(), value);
    entry.last_write = now;
  }

  pub fn read_all(&self, error: &ErrorRecord) -> Option<ContextMap> {
    let entries = self.entries.lock();
    entries
      .get(&error.id())
      .filter(|entry| entry.is_live(Instant::now(), self.ttl))
      .map(|entry| entry.data.clone())
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn sweep(&self, entries: &mut HashMap<ErrorId, Entry>, now: Instant) {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now, self.ttl));
    let removed = before - entries.len();
    if removed > 0 {
      debug!(removed, remaining = entries.len(), "swept attached error data");
    }
  }
}

/// Fluent setter returned by `IncidentRecorder::attach_to`.
pub struct Attacher<'a> {
  cache: &'a AttachedDataCache,
  error: Arc<ErrorRecord>,
}

impl<'a> Attacher<'a> {
  pub(crate) fn new(cache: &'a AttachedDataCache, error: &Arc<ErrorRecord>) -> Self {
    Self {
      cache,
      error: Arc::clone(error),
    }
  }

  pub fn set(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.cache.attach(&self.error, key, value.into());
    self
  }
}
