//! Nested, thread-local caller contexts.
//!
//! Each [`Scope`] invocation registers a context on the current thread for the
//! duration of its body. Lifecycle per context:
//!
//! - body returns normally: the context is removed right away;
//! - body fails (`Err` or panic): the context is flagged but stays registered,
//!   so incidents recorded while unwinding still see its data. Flagged
//!   contexts are pruned the next time a scope is entered on the same thread.
//!
//! Contexts never cross threads.

use std::cell::RefCell;
use std::io;

use serde_json::Value;

use crate::types::ContextMap;

struct CallerContext {
  id: u64,
  data: ContextMap,
  failed: bool,
}

#[derive(Default)]
struct ActiveContexts {
  next_id: u64,
  /// Creation order.
  contexts: Vec<CallerContext>,
}

thread_local! {
  static ACTIVE: RefCell<ActiveContexts> = RefCell::new(ActiveContexts::default());
}

fn create_scope(initial: ContextMap) -> u64 {
  ACTIVE.with(|active| {
    let mut active = active.borrow_mut();
    active.contexts.retain(|c| !c.failed);
    active.next_id += 1;
    let id = active.next_id;
    active.contexts.push(CallerContext {
      id,
      data: initial,
      failed: false,
    });
    id
  })
}

fn finish_scope(id: u64, succeeded: bool) {
  // try_with: guards may drop during thread teardown.
  let _ = ACTIVE.try_with(|active| {
    let mut active = active.borrow_mut();
    if succeeded {
      active.contexts.retain(|c| c.id != id);
    } else if let Some(context) = active.contexts.iter_mut().find(|c| c.id == id) {
      context.failed = true;
    }
  });
}

/// Merged data of all registered contexts on this thread, later scopes
/// overriding earlier ones. Includes flagged (failed) contexts.
pub fn current_context_data() -> ContextMap {
  ACTIVE.with(|active| {
    let active = active.borrow();
    let mut result = ContextMap::new();
    for context in &active.contexts {
      result.extend(context.data.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    result
  })
}

/// Set a value on the innermost live context of this thread.
///
/// Returns `false` when no scope is active.
pub fn put(key: impl Into<String>, value: impl Into<Value>) -> bool {
  ACTIVE.with(|active| {
    let mut active = active.borrow_mut();
    match active.contexts.iter_mut().rev().find(|c| !c.failed) {
      Some(context) => {
        context.data.insert(key.into(), value.into());
        true
      }
      None => false,
    }
  })
}

/// Number of contexts (live or flagged) registered on this thread.
pub fn active_scope_count() -> usize {
  ACTIVE.with(|active| active.borrow().contexts.len())
}

/// Marks its context failed unless explicitly completed.
struct ScopeGuard {
  id: u64,
  completed: bool,
}

impl ScopeGuard {
  fn succeed(mut self) {
    self.completed = true;
    finish_scope(self.id, true);
  }
}

impl Drop for ScopeGuard {
  fn drop(&mut self) {
    if !self.completed {
      finish_scope(self.id, false);
    }
  }
}

/// Initial data for a caller context, then one of the `invoke*` methods to
/// run a body inside it.
#[derive(Debug, Default)]
#[must_use = "a scope does nothing until invoked"]
pub struct Scope {
  values: ContextMap,
}

impl Scope {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn set_all(mut self, values: ContextMap) -> Self {
    self.values.extend(values);
    self
  }

  /// Run `body`; only a panic counts as failure.
  pub fn invoke<T>(self, body: impl FnOnce() -> T) -> T {
    let guard = self.enter();
    let result = body();
    guard.succeed();
    result
  }

  /// Run `body`; an `Err` (or a panic) flags the context as failed. The
  /// result is returned unchanged.
  pub fn try_invoke<T, E>(self, body: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    let guard = self.enter();
    let result = body();
    if result.is_ok() {
      guard.succeed();
    }
    result
  }

  pub fn invoke_io<T>(self, body: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    self.try_invoke(body)
  }

  fn enter(self) -> ScopeGuard {
    ScopeGuard {
      id: create_scope(self.values),
      completed: false,
    }
  }
}
