//! Incident recorder: stable fingerprints and context data for error chains.
//!
//! Records an error chain as an `Incident`: a fingerprint derived from the
//! root cause class, application frames and extension-supplied data, plus
//! context merged from caller scopes, the errors themselves, registered
//! providers and data attached to specific error instances.
//!
//! No DB, no network; incidents go to an `IncidentStore` supplied by the host.

pub mod attached;
pub mod caller_context;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod normalize;
pub mod store;
pub mod throwable;
pub mod types;

pub use caller_context::Scope;
pub use catalog::{ContextDataProvider, Extensions, Fingerprinter, Targeted};
pub use config::RecorderConfig;
pub use engine::IncidentRecorder;
pub use error::{EngineError, ExtensionError, RecorderError, StoreError};
pub use frame::Frame;
pub use store::{IncidentStore, JsonLinesStore, MemoryStore, NoOpStore};
pub use throwable::ErrorRecord;
pub use types::{Incident, InboundIncident, Severity, StorableFingerprint};
