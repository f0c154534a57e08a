//! Storage collaborator seam. Persistence itself lives outside this crate.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{Incident, StorableFingerprint, StoredLine};

pub trait IncidentStore: Send + Sync {
  fn store(&self, incident: &Incident, fingerprint: &StorableFingerprint) -> Result<(), StoreError>;
}

/// Lets the host keep a handle on a store it hands to the recorder.
impl<S: IncidentStore + ?Sized> IncidentStore for Arc<S> {
  fn store(&self, incident: &Incident, fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
    (**self).store(incident, fingerprint)
  }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoOpStore;

impl IncidentStore for NoOpStore {
  fn store(&self, _incident: &Incident, _fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
    Ok(())
  }
}

/// Keeps every stored pair in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: Mutex<Vec<(Incident, StorableFingerprint)>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn records(&self) -> Vec<(Incident, StorableFingerprint)> {
    self.records.lock().clone()
  }

  pub fn last(&self) -> Option<(Incident, StorableFingerprint)> {
    self.records.lock().last().cloned()
  }

  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl IncidentStore for MemoryStore {
  fn store(&self, incident: &Incident, fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
    self.records.lock().push((incident.clone(), fingerprint.clone()));
    Ok(())
  }
}

/// Writes one `{"incident": .., "fingerprint": ..}` JSON object per line.
pub struct JsonLinesStore<W: Write + Send> {
  out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesStore<W> {
  pub fn new(out: W) -> Self {
    Self { out: Mutex::new(out) }
  }

  /// Write any serializable value as one line, interleaved in order with
  /// stored incidents.
  pub fn write_line<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
    let mut out = self.out.lock();
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
  }

  pub fn flush(&self) -> Result<(), StoreError> {
    self.out.lock().flush()?;
    Ok(())
  }

  pub fn into_inner(self) -> W {
    self.out.into_inner()
  }
}

impl<W: Write + Send> IncidentStore for JsonLinesStore<W> {
  fn store(&self, incident: &Incident, fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
    self.write_line(&StoredLine {
      incident,
      fingerprint,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{FingerprintData, Severity};
  use chrono::Utc;
  use std::collections::{BTreeMap, HashMap};
  use uuid::Uuid;

  fn incident() -> Incident {
    Incident {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      fingerprint_data: FingerprintData {
        throwable_class_name: "shop::Oops".into(),
        location: None,
        relevant_frames: Vec::new(),
        extra_data: BTreeMap::new(),
      },
      severity: Severity::Warn,
      context_data: HashMap::new(),
      throwable_details: Vec::new(),
      application_build_info: "1.0".into(),
    }
  }

  #[test]
  fn json_lines_store_writes_one_line_per_incident() {
    let store = JsonLinesStore::new(Vec::new());
    let incident = incident();
    let fp = StorableFingerprint::from_incident(&incident);
    store.store(&incident, &fp).unwrap();
    store.store(&incident, &fp).unwrap();

    let out = String::from_utf8(store.into_inner()).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed["incident"]["severity"], "WARN");
    assert_eq!(parsed["fingerprint"]["name"], "shop::Oops");
    assert_eq!(parsed["fingerprint"]["id"], incident.fingerprint());
  }

  #[test]
  fn extra_lines_interleave_with_incidents() {
    let store = JsonLinesStore::new(Vec::new());
    let incident = incident();
    store.write_line(&serde_json::json!({"error": true})).unwrap();
    store.store(&incident, &StorableFingerprint::from_incident(&incident)).unwrap();

    let out = String::from_utf8(store.into_inner()).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines[0], r#"{"error":true}"#);
    assert!(lines[1].starts_with(r#"{"incident":"#));
  }

  #[test]
  fn memory_store_keeps_order() {
    let store = MemoryStore::new();
    let first = incident();
    let second = incident();
    store.store(&first, &StorableFingerprint::from_incident(&first)).unwrap();
    store.store(&second, &StorableFingerprint::from_incident(&second)).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.last().unwrap().0.id, second.id);
  }
}
