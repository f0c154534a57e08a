//! Extension plugins and their dispatch by error class ancestry.
//!
//! Error classes are plain names. Their superclass/interface relationships are
//! declared up front in a [`ClassHierarchy`]; catalogs walk that table instead
//! of inspecting types at runtime.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExtensionError, RecorderError};
use crate::frame::Frame;
use crate::throwable::ErrorRecord;
use crate::types::ContextMap;

/// The generic error type every class implicitly derives from. Ancestry walks
/// stop here; plugins registered on it are never dispatched.
pub const ROOT_CLASS: &str = "std::error::Error";

// ---------------------------------------------------------------------------
// Class hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ClassInfo {
  superclass: Option<String>,
  interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
  classes: HashMap<String, ClassInfo>,
}

impl ClassHierarchy {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare the direct superclass and interfaces of `class`.
  ///
  /// Re-declaring a class replaces its previous entry. Declarations that
  /// would make the hierarchy cyclic are rejected and leave it unchanged.
  pub fn declare(
    &mut self,
    class: &str,
    superclass: Option<&str>,
    interfaces: &[&str],
  ) -> Result<(), RecorderError> {
    let info = ClassInfo {
      superclass: superclass.map(str::to_string),
      interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
    };
    let previous = self.classes.insert(class.to_string(), info);

    if self.reaches(class, class) {
      match previous {
        Some(previous) => self.classes.insert(class.to_string(), previous),
        None => self.classes.remove(class),
      };
      return Err(RecorderError::HierarchyCycle(class.to_string()));
    }
    Ok(())
  }

  fn parents<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a str> {
    self
      .classes
      .get(class)
      .into_iter()
      .flat_map(|info| info.superclass.iter().chain(info.interfaces.iter()))
      .map(String::as_str)
  }

  /// Whether `target` is a proper ancestor of `start`.
  fn reaches(&self, start: &str, target: &str) -> bool {
    let mut seen = HashSet::new();
    let mut pending: Vec<&str> = self.parents(start).collect();
    while let Some(class) = pending.pop() {
      if class == target {
        return true;
      }
      if seen.insert(class) {
        pending.extend(self.parents(class));
      }
    }
    false
  }
}

// ---------------------------------------------------------------------------
// Plugin traits
// ---------------------------------------------------------------------------

/// A plugin bound to exactly one error class.
pub trait Targeted {
  fn target_class(&self) -> &str;

  /// Name used in logs.
  fn plugin_name(&self) -> &str {
    std::any::type_name::<Self>()
  }
}

/// Enriches the data used for fingerprinting, e.g. to tell apart HTTP status
/// codes that surface as the same error at the same call site.
pub trait Fingerprinter: Targeted + Send + Sync {
  fn extract_data(&self, error: &ErrorRecord) -> Result<BTreeMap<String, Value>, ExtensionError>;

  fn extract_frames(&self, _error: &ErrorRecord) -> Result<Vec<Frame>, ExtensionError> {
    Ok(Vec::new())
  }
}

/// Supplies context data for errors of one class.
pub trait ContextDataProvider: Targeted + Send + Sync {
  fn context_data(&self, error: &ErrorRecord) -> Result<ContextMap, ExtensionError>;
}

/// Run one plugin call; failures and panics are logged and yield `None`.
pub(crate) fn guarded<T>(
  plugin: &str,
  error: &ErrorRecord,
  call: impl FnOnce() -> Result<T, ExtensionError>,
) -> Option<T> {
  let failure = match panic::catch_unwind(AssertUnwindSafe(call)) {
    Ok(Ok(value)) => return Some(value),
    Ok(Err(e)) => e,
    Err(_) => ExtensionError::Panicked {
      plugin: plugin.to_string(),
    },
  };
  warn!(
    plugin,
    class = error.class_name(),
    error = %failure,
    "extension failed, skipping its contribution"
  );
  None
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Plugins bucketed by target class.
pub struct ExtensionCatalog<P: ?Sized> {
  by_class: HashMap<String, Vec<Arc<P>>>,
}

impl<P: ?Sized> Default for ExtensionCatalog<P> {
  fn default() -> Self {
    Self {
      by_class: HashMap::new(),
    }
  }
}

impl<P: ?Sized + Targeted> ExtensionCatalog<P> {
  pub fn new(plugins: impl IntoIterator<Item = Arc<P>>) -> Self {
    let mut by_class: HashMap<String, Vec<Arc<P>>> = HashMap::new();
    for plugin in plugins {
      by_class
        .entry(plugin.target_class().to_string())
        .or_default()
        .push(plugin);
    }
    Self { by_class }
  }

  pub fn len(&self) -> usize {
    self.by_class.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Plugins applicable to `class`, most general first, exact class last.
  pub fn lookup(&self, class: &str, hierarchy: &ClassHierarchy) -> Vec<Arc<P>> {
    let mut result = Vec::new();
    if !self.is_empty() {
      self.collect(class, hierarchy, &mut result);
    }
    result
  }

  fn collect(&self, class: &str, hierarchy: &ClassHierarchy, result: &mut Vec<Arc<P>>) {
    if let Some(info) = hierarchy.classes.get(class) {
      if let Some(superclass) = info.superclass.as_deref().filter(|s| *s != ROOT_CLASS) {
        self.collect(superclass, hierarchy, result);
      }
      for interface in &info.interfaces {
        self.collect(interface, hierarchy, result);
      }
    }
    if let Some(plugins) = self.by_class.get(class) {
      result.extend(plugins.iter().cloned());
    }
  }
}

// ---------------------------------------------------------------------------
// Location overrides
// ---------------------------------------------------------------------------

/// Per-method opt-out from being reported as an incident's location.
#[derive(Debug, Clone, Default)]
pub struct LocationOverrides {
  eligibility: HashMap<String, HashMap<String, bool>>,
}

impl LocationOverrides {
  pub fn set(&mut self, declaring_type: &str, method: &str, eligible: bool) {
    self
      .eligibility
      .entry(declaring_type.to_string())
      .or_default()
      .insert(method.to_string(), eligible);
  }

  /// Methods without an entry are eligible.
  pub fn is_eligible(&self, frame: &Frame) -> bool {
    match self
      .eligibility
      .get(&frame.declaring_type)
      .and_then(|methods| methods.get(&frame.method))
    {
      Some(eligible) => *eligible,
      None => {
        debug!(location = %frame.location(), "no location metadata, treating as eligible");
        true
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Everything the embedding application registers at startup.
#[derive(Default)]
pub struct Extensions {
  hierarchy: ClassHierarchy,
  fingerprinters: ExtensionCatalog<dyn Fingerprinter>,
  context_providers: ExtensionCatalog<dyn ContextDataProvider>,
  location_overrides: LocationOverrides,
}

impl Extensions {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn builder() -> ExtensionsBuilder {
    ExtensionsBuilder::default()
  }

  pub fn hierarchy(&self) -> &ClassHierarchy {
    &self.hierarchy
  }

  pub fn fingerprinters_for(&self, error: &ErrorRecord) -> Vec<Arc<dyn Fingerprinter>> {
    self.fingerprinters.lookup(error.class_name(), &self.hierarchy)
  }

  pub fn context_providers_for(&self, error: &ErrorRecord) -> Vec<Arc<dyn ContextDataProvider>> {
    self.context_providers.lookup(error.class_name(), &self.hierarchy)
  }

  pub fn location_overrides(&self) -> &LocationOverrides {
    &self.location_overrides
  }
}

#[derive(Default)]
pub struct ExtensionsBuilder {
  hierarchy: ClassHierarchy,
  fingerprinters: Vec<Arc<dyn Fingerprinter>>,
  context_providers: Vec<Arc<dyn ContextDataProvider>>,
  location_overrides: LocationOverrides,
}

impl ExtensionsBuilder {
  pub fn declare_class(
    mut self,
    class: &str,
    superclass: Option<&str>,
    interfaces: &[&str],
  ) -> Result<Self, RecorderError> {
    self.hierarchy.declare(class, superclass, interfaces)?;
    Ok(self)
  }

  pub fn fingerprinter(mut self, plugin: Arc<dyn Fingerprinter>) -> Self {
    self.fingerprinters.push(plugin);
    self
  }

  pub fn context_provider(mut self, plugin: Arc<dyn ContextDataProvider>) -> Self {
    self.context_providers.push(plugin);
    self
  }

  /// Mark `declaring_type::method` as (in)eligible incident location.
  pub fn incident_location(mut self, declaring_type: &str, method: &str, eligible: bool) -> Self {
    self.location_overrides.set(declaring_type, method, eligible);
    self
  }

  pub fn build(self) -> Extensions {
    Extensions {
      hierarchy: self.hierarchy,
      fingerprinters: ExtensionCatalog::new(self.fingerprinters),
      context_providers: ExtensionCatalog::new(self.context_providers),
      location_overrides: self.location_overrides,
    }
  }
}
