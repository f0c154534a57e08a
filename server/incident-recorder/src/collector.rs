//! Derive the "relevant frames" of a causal chain and its primary location.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::LocationOverrides;
use crate::frame::{Frame, FrameFilter};
use crate::throwable::ErrorRecord;

pub struct FrameCollector<'a> {
  filter: &'a FrameFilter,
  overrides: &'a LocationOverrides,
}

impl<'a> FrameCollector<'a> {
  pub fn new(filter: &'a FrameFilter, overrides: &'a LocationOverrides) -> Self {
    Self { filter, overrides }
  }

  /// Throw-site frame (always) followed by the relevant remainder.
  pub fn frames_of(&self, error: &ErrorRecord) -> Vec<Frame> {
    let Some((top, rest)) = error.stack().split_first() else {
      return Vec::new();
    };
    let mut frames = vec![top.clone()];
    frames.extend(rest.iter().filter(|f| self.filter.is_relevant(f)).cloned());
    frames
  }

  fn relevant_only(&self, error: &ErrorRecord) -> Vec<Frame> {
    error
      .stack()
      .iter()
      .filter(|f| self.filter.is_relevant(f))
      .cloned()
      .collect()
  }

  /// `chain` is root cause first.
  pub fn collect_relevant_frames(&self, chain: &[Arc<ErrorRecord>]) -> Vec<Frame> {
    let Some((root, consequences)) = chain.split_first() else {
      return Vec::new();
    };
    let root_frames = self.frames_of(root);

    if consequences.is_empty() {
      return root_frames;
    }
    if root_frames.is_empty() {
      // Let the next error's throw site stand in for the missing one.
      return self.collect_relevant_frames(consequences);
    }
    self.stitch(root_frames, consequences)
  }

  /// Append a consequence's frames only when its entry frame differs from the
  /// previous one, i.e. when the cause was raised on another thread.
  fn stitch(&self, root_frames: Vec<Frame>, consequences: &[Arc<ErrorRecord>]) -> Vec<Frame> {
    let mut previous_entry = root_frames.last().cloned();
    let mut result = root_frames;

    for error in consequences {
      let current = self.relevant_only(error);
      let current_entry = current.last().cloned();

      if let Some(entry) = &current_entry {
        if previous_entry.as_ref() != Some(entry) {
          trace!(class = error.class_name(), entry = %entry, "entry frame changed, appending frames");
          result.extend(current);
        }
      }
      previous_entry = current_entry;
    }
    result
  }

  /// Append extension-supplied frames unless their entry frame is already
  /// part of `frames`.
  pub fn with_extra_frames(&self, mut frames: Vec<Frame>, extra: Vec<Frame>) -> Vec<Frame> {
    let entry = extra.iter().rev().find(|f| self.filter.is_relevant(f));
    match entry {
      Some(entry) if !frames.contains(entry) => {
        frames.extend(extra);
        frames
      }
      _ => frames,
    }
  }

  pub fn primary_location(&self, frames: &[Frame]) -> Option<Frame> {
    frames
      .iter()
      .find(|f| self.filter.is_relevant(f) && self.overrides.is_eligible(f))
      .cloned()
  }
}
