//! Core recorder: turns an error chain into an `Incident` and hands it to the store.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::attached::{AttachedDataCache, Attacher};
use crate::caller_context;
use crate::catalog::{guarded, Extensions};
use crate::collector::FrameCollector;
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::fingerprint::FingerprintEngine;
use crate::frame::FrameFilter;
use crate::store::IncidentStore;
use crate::throwable::ErrorRecord;
use crate::types::*;

/// Entry point for recording incidents. Cheap to share across threads behind
/// an `Arc`; caller contexts are still read from the recording thread.
pub struct IncidentRecorder {
  config: RecorderConfig,
  filter: FrameFilter,
  extensions: Arc<Extensions>,
  attached: AttachedDataCache,
  store: Box<dyn IncidentStore>,
}

impl IncidentRecorder {
  /// `extensions` may be shared between recorders.
  pub fn new(
    config: RecorderConfig,
    extensions: impl Into<Arc<Extensions>>,
    store: Box<dyn IncidentStore>,
  ) -> Self {
    Self {
      filter: FrameFilter::new(&config),
      attached: AttachedDataCache::new(config.attached_data_ttl()),
      config,
      extensions: extensions.into(),
      store,
    }
  }

  pub fn config(&self) -> &RecorderConfig {
    &self.config
  }

  /// Merged caller-context data of the current thread.
  pub fn current_context_data(&self) -> ContextMap {
    caller_context::current_context_data()
  }

  /// Attach key/value data to this specific error instance.
  pub fn attach_to(&self, error: &Arc<ErrorRecord>) -> Attacher<'_> {
    Attacher::new(&self.attached, error)
  }

  /// Record an incident for `error`.
  ///
  /// Returns `None` if recording failed for any reason; failures are logged,
  /// never propagated to the caller.
  pub fn record_incident(&self, error: &Arc<ErrorRecord>, severity: Severity) -> Option<Incident> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_record(error, severity)));
    let failure = match outcome {
      Ok(Ok(incident)) => return Some(incident),
      Ok(Err(e)) => e.to_string(),
      Err(_) => "panicked".to_string(),
    };
    warn!(
      class = error.class_name(),
      message = error.message().unwrap_or_default(),
      failure = %failure,
      "could not record incident"
    );
    None
  }

  pub fn record_incident_and_get_id(&self, error: &Arc<ErrorRecord>, severity: Severity) -> Option<String> {
    self
      .record_incident(error, severity)
      .map(|incident| incident.id.to_string())
  }

  fn try_record(&self, error: &Arc<ErrorRecord>, severity: Severity) -> Result<Incident, RecorderError> {
    let incident = self.create_incident(error, severity)?;
    let fingerprint = StorableFingerprint::from_incident(&incident);
    self.store.store(&incident, &fingerprint)?;
    Ok(incident)
  }

  fn create_incident(&self, error: &Arc<ErrorRecord>, severity: Severity) -> Result<Incident, RecorderError> {
    let chain = ErrorRecord::causal_chain(error);

    let collector = FrameCollector::new(&self.filter, self.extensions.location_overrides());
    let fingerprint_data = FingerprintEngine::new(collector, &self.extensions).compute(&chain)?;

    Ok(Incident {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      fingerprint_data,
      severity,
      context_data: self.collect_context_data(&chain),
      throwable_details: chain.iter().map(|e| ThrowableDetail::from_error(e)).collect(),
      application_build_info: self.config.application_build_info.clone(),
    })
  }

  /// Lowest to highest precedence: caller scopes, then per chain element
  /// (root first) its own data, provider data and attached data.
  fn collect_context_data(&self, chain: &[Arc<ErrorRecord>]) -> ContextMap {
    let mut result = caller_context::current_context_data();

    for error in chain {
      if let Some(own) = error.context_support() {
        result.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
      }

      for provider in self.extensions.context_providers_for(error) {
        if let Some(data) = guarded(provider.plugin_name(), error, || provider.context_data(error)) {
          result.extend(data);
        }
      }

      if let Some(attached) = self.attached.read_all(error) {
        result.extend(attached);
      }
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::caller_context::Scope;
  use crate::catalog::{ContextDataProvider, Targeted};
  use crate::error::{ExtensionError, StoreError};
  use crate::frame::Frame;
  use crate::store::{MemoryStore, NoOpStore};

  struct FailingStore;

  impl IncidentStore for FailingStore {
    fn store(&self, _incident: &Incident, _fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
      Err(StoreError::Rejected("disk full".into()))
    }
  }

  struct PanickingStore;

  impl IncidentStore for PanickingStore {
    fn store(&self, _incident: &Incident, _fingerprint: &StorableFingerprint) -> Result<(), StoreError> {
      panic!("store bug")
    }
  }

  struct FailingProvider;

  impl Targeted for FailingProvider {
    fn target_class(&self) -> &str {
      "shop::Oops"
    }
  }

  impl ContextDataProvider for FailingProvider {
    fn context_data(&self, _error: &ErrorRecord) -> Result<ContextMap, ExtensionError> {
      Err(ExtensionError::failed("FailingProvider", "backend offline"))
    }
  }

  struct PanickingProvider;

  impl Targeted for PanickingProvider {
    fn target_class(&self) -> &str {
      "shop::Oops"
    }
  }

  impl ContextDataProvider for PanickingProvider {
    fn context_data(&self, _error: &ErrorRecord) -> Result<ContextMap, ExtensionError> {
      panic!("provider bug")
    }
  }

  struct TenantProvider;

  impl Targeted for TenantProvider {
    fn target_class(&self) -> &str {
      "shop::Oops"
    }
  }

  impl ContextDataProvider for TenantProvider {
    fn context_data(&self, _error: &ErrorRecord) -> Result<ContextMap, ExtensionError> {
      Ok(ContextMap::from([("tenant".to_string(), "acme".into())]))
    }
  }

  fn recorder() -> IncidentRecorder {
    IncidentRecorder::new(
      RecorderConfig::new("12345", &["shop"]),
      Extensions::none(),
      Box::new(NoOpStore),
    )
  }

  fn oops(message: &str) -> Arc<ErrorRecord> {
    ErrorRecord::builder("shop::Oops")
      .message(message)
      .frame(Frame::new("shop::api", "handle").at("api.rs", 10))
      .build()
  }

  #[test]
  fn recorder_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<IncidentRecorder>();
  }

  #[test]
  fn records_basic_incident() {
    let incident = recorder()
      .record_incident(&oops("Really cannot make 5 even"), Severity::InternalFailure)
      .unwrap();
    assert_eq!(incident.application_build_info, "12345");
    assert_eq!(incident.severity, Severity::InternalFailure);
    assert_eq!(incident.fingerprint_data.throwable_class_name, "shop::Oops");
    assert_eq!(incident.throwable_details.len(), 1);
    assert!(incident.context_data.is_empty());
  }

  #[test]
  fn each_recording_gets_a_fresh_id() {
    let r = recorder();
    let e = oops("x");
    let a = r.record_incident(&e, Severity::Warn).unwrap();
    let b = r.record_incident(&e, Severity::Warn).unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn record_and_get_id_matches_stored_incident() {
    let store = Arc::new(MemoryStore::new());
    let r = IncidentRecorder::new(
      RecorderConfig::new("1", &["shop"]),
      Extensions::none(),
      Box::new(Arc::clone(&store)),
    );
    let id = r.record_incident_and_get_id(&oops("x"), Severity::ApiFailure).unwrap();
    let (incident, fingerprint) = store.last().unwrap();
    assert_eq!(incident.id.to_string(), id);
    assert_eq!(fingerprint.id, incident.fingerprint());
  }

  #[test]
  fn store_failure_yields_no_incident() {
    let r = IncidentRecorder::new(RecorderConfig::default(), Extensions::none(), Box::new(FailingStore));
    assert!(r.record_incident(&oops("x"), Severity::Fatal).is_none());
    assert!(r.record_incident_and_get_id(&oops("x"), Severity::Fatal).is_none());
  }

  #[test]
  fn panicking_store_yields_no_incident() {
    let r = IncidentRecorder::new(RecorderConfig::default(), Extensions::none(), Box::new(PanickingStore));
    assert!(r.record_incident(&oops("x"), Severity::Fatal).is_none());
  }

  #[test]
  fn failing_providers_are_skipped() {
    let extensions = Extensions::builder()
      .context_provider(Arc::new(FailingProvider))
      .context_provider(Arc::new(PanickingProvider))
      .context_provider(Arc::new(TenantProvider))
      .build();
    let r = IncidentRecorder::new(RecorderConfig::new("1", &["shop"]), extensions, Box::new(NoOpStore));

    let incident = r.record_incident(&oops("x"), Severity::Warn).unwrap();
    assert_eq!(incident.context_data.len(), 1);
    assert_eq!(incident.context_data["tenant"], "acme");
  }

  #[test]
  fn stackless_error_still_recorded() {
    let error = ErrorRecord::builder("sync::BrokenBarrier").message("I'm lost!").build();
    let incident = recorder().record_incident(&error, Severity::Warn).unwrap();
    assert!(incident.fingerprint_data.location.is_none());
    assert_eq!(
      incident.throwable_details[0].to_string(),
      "sync::BrokenBarrier at [?]: I'm lost!"
    );
  }

  #[test]
  fn caller_scope_data_is_lowest_precedence() {
    let r = recorder();
    let error = ErrorRecord::builder("shop::Oops")
      .context_data("tenant", "from-error")
      .build();
    r.attach_to(&error).set("attempt", 3);

    let incident = Scope::new()
      .set("tenant", "from-scope")
      .set("request", "r-1")
      .invoke(|| r.record_incident(&error, Severity::Warn))
      .unwrap();

    assert_eq!(incident.context_data["tenant"], "from-error");
    assert_eq!(incident.context_data["request"], "r-1");
    assert_eq!(incident.context_data["attempt"], 3);
  }
}
