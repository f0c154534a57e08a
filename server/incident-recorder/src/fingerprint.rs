//! Stable fingerprint computation for grouping incidents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::catalog::{guarded, Extensions};
use crate::collector::FrameCollector;
use crate::error::RecorderError;
use crate::frame::Frame;
use crate::throwable::ErrorRecord;
use crate::types::FingerprintData;


/// Extra data and frames contributed by errors themselves and fingerprinters.
#[derive(Debug, Default)]
struct ExtraContents {
  data: BTreeMap<String, Value>,
  frames: Vec<Frame>,
}

pub struct FingerprintEngine<'a> {
  collector: FrameCollector<'a>,
  extensions: &'a Extensions,
}

impl<'a> FingerprintEngine<'a> {
  pub fn new(collector: FrameCollector<'a>, extensions: &'a Extensions) -> Self {
    Self {
      collector,
      extensions,
    }
  }

  /// `chain` is root cause first.
  pub fn compute(&self, chain: &[Arc<ErrorRecord>]) -> Result<FingerprintData, RecorderError> {
    let root = chain.first().ok_or(RecorderError::EmptyChain)?;

    let frames = self.collector.collect_relevant_frames(chain);
    let extra = self.collect_extra_contents(chain);
    let relevant_frames = self.collector.with_extra_frames(frames, extra.frames);
    let location = self.collector.primary_location(&relevant_frames);

    Ok(FingerprintData {
      throwable_class_name: root.class_name().to_string(),
      location,
      relevant_frames,
      extra_data: extra.data,
    })
  }

  /// Outer errors overwrite inner ones; within one error, more specific
  /// fingerprinters overwrite more general ones. The last non-empty frame
  /// contribution wins.
  fn collect_extra_contents(&self, chain: &[Arc<ErrorRecord>]) -> ExtraContents {
    let mut result = ExtraContents::default();

    for error in chain {
      if let Some(support) = error.fingerprint_support() {
        result
          .data
          .extend(support.data.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !support.frames.is_empty() {
          result.frames = support.frames.clone();
        }
      }

      for fingerprinter in self.extensions.fingerprinters_for(error) {
        let extracted = guarded(fingerprinter.plugin_name(), error, || {
          Ok((
            fingerprinter.extract_data(error)?,
            fingerprinter.extract_frames(error)?,
          ))
        });
        if let Some((data, frames)) = extracted {
          result.data.extend(data);
          if !frames.is_empty() {
            result.frames = frames;
          }
        }
      }
    }
    result
  }
}

/// 8 uppercase hex chars over class, location, frames and sorted extra data.
/// Messages never contribute.
///
/// Every field is length-prefixed and every optional field tagged, so no two
/// distinct inputs feed the hasher the same bytes.
pub fn fingerprint_id(data: &FingerprintData) -> String {
  let mut hasher = blake3::Hasher::new();
  hash_str(&mut hasher, &data.throwable_class_name);
  match &data.location {
    Some(frame) => {
      hasher.update(&[1]);
      hash_frame(&mut hasher, frame);
    }
    None => {
      hasher.update(&[0]);
    }
  }

  hash_len(&mut hasher, data.relevant_frames.len());
  for frame in &data.relevant_frames {
    hash_frame(&mut hasher, frame);
  }

  // BTreeMap iterates sorted by key.
  hash_len(&mut hasher, data.extra_data.len());
  for (key, value) in &data.extra_data {
    hash_str(&mut hasher, key);
    hash_str(&mut hasher, &value.to_string());
  }

  let hash = hasher.finalize();
  let bytes = hash.as_bytes();
  format!(
    "{:08X}",
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
  )
}

fn hash_len(hasher: &mut blake3::Hasher, len: usize) {
  hasher.update(&(len as u64).to_le_bytes());
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
  hash_len(hasher, s.len());
  hasher.update(s.as_bytes());
}

fn hash_frame(hasher: &mut blake3::Hasher, frame: &Frame) {
  hash_str(hasher, &frame.declaring_type);
  hash_str(hasher, &frame.method);
  match &frame.file {
    Some(file) => {
      hasher.update(&[1]);
      hash_str(hasher, file);
    }
    None => {
      hasher.update(&[0]);
    }
  }
  match frame.line {
    Some(line) => {
      hasher.update(&[1]);
      hasher.update(&line.to_le_bytes());
    }
    None => {
      hasher.update(&[0]);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{ExtensionsBuilder, Fingerprinter, Targeted};
  use crate::config::RecorderConfig;
  use crate::error::ExtensionError;
  use crate::frame::FrameFilter;
  use std::collections::HashSet;

  struct ResponseCodeFingerprinter;

  impl Targeted for ResponseCodeFingerprinter {
    fn target_class(&self) -> &str {
      "net::HttpRetryError"
    }
  }

  impl Fingerprinter for ResponseCodeFingerprinter {
    fn extract_data(&self, error: &ErrorRecord) -> Result<BTreeMap<String, Value>, ExtensionError> {
      // Response code is the last word of the message in these fixtures.
      let code = error
        .message()
        .and_then(|m| m.rsplit(' ').next())
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ExtensionError::failed("ResponseCodeFingerprinter", "no code"))?;
      Ok(BTreeMap::from([("responseCode".to_string(), Value::from(code))]))
    }
  }

  struct BrokenFingerprinter;

  impl Targeted for BrokenFingerprinter {
    fn target_class(&self) -> &str {
      "net::HttpRetryError"
    }
  }

  impl Fingerprinter for BrokenFingerprinter {
    fn extract_data(&self, _error: &ErrorRecord) -> Result<BTreeMap<String, Value>, ExtensionError> {
      panic!("fingerprinter bug")
    }
  }

  fn compute_with(extensions: &Extensions, error: &Arc<ErrorRecord>) -> FingerprintData {
    let filter = FrameFilter::new(&RecorderConfig::new("test", &["shop"]));
    let engine = FingerprintEngine::new(
      FrameCollector::new(&filter, extensions.location_overrides()),
      extensions,
    );
    engine.compute(&ErrorRecord::causal_chain(error)).unwrap()
  }

  fn compute(error: &Arc<ErrorRecord>) -> FingerprintData {
    compute_with(&Extensions::none(), error)
  }

  fn at_handler(class: &str) -> crate::throwable::ErrorRecordBuilder {
    ErrorRecord::builder(class)
      .frame(Frame::new("shop::api::Handler", "handle").at("handler.rs", 42))
      .frame(Frame::new("shop::main", "run").at("main.rs", 7))
  }

  fn distinct(data: &[FingerprintData]) -> usize {
    data.iter().map(FingerprintData::fingerprint).collect::<HashSet<_>>().len()
  }

  #[test]
  fn same_shape_same_fingerprint() {
    let a = compute(&at_handler("shop::Oops").build());
    let b = compute(&at_handler("shop::Oops").build());
    assert_eq!(a, b);
    assert_eq!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn fingerprint_is_8_uppercase_hex_chars() {
    let fp = compute(&at_handler("shop::Oops").build()).fingerprint();
    assert_eq!(fp.len(), 8);
    assert!(fp.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn message_is_ignored() {
    let data: Vec<_> = ["Not in Kansas anymore", "Spline count below 10%", "core 0X94F6 missing"]
      .iter()
      .map(|m| compute(&at_handler("shop::Oops").message(*m).build()))
      .collect();
    assert_eq!(distinct(&data), 1);
    assert!(data.windows(2).all(|w| w[0] == w[1]));
  }

  fn data_with_frames(frames: Vec<Frame>) -> FingerprintData {
    FingerprintData {
      throwable_class_name: "shop::Oops".into(),
      location: None,
      relevant_frames: frames,
      extra_data: BTreeMap::new(),
    }
  }

  #[test]
  fn missing_and_empty_file_differ() {
    let mut empty_file = Frame::new("shop::api", "handle");
    empty_file.file = Some(String::new());
    let a = data_with_frames(vec![Frame::new("shop::api", "handle")]);
    let b = data_with_frames(vec![empty_file]);
    assert_ne!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn field_boundaries_are_unambiguous() {
    let a = data_with_frames(vec![Frame::new("shop::a", "b"), Frame::new("shop::c", "d")]);
    let b = data_with_frames(vec![Frame::new("shop::a", "b(:)|shop::c::d")]);
    assert_ne!(a.fingerprint(), b.fingerprint());

    let mut split_key = data_with_frames(Vec::new());
    split_key.extra_data.insert("a".into(), Value::from("b=c"));
    let mut joined_key = data_with_frames(Vec::new());
    joined_key.extra_data.insert("a=b".into(), Value::from("c"));
    assert_ne!(split_key.fingerprint(), joined_key.fingerprint());
  }

  #[test]
  fn different_class_different_fingerprint() {
    let a = compute(&at_handler("shop::Oops").build());
    let b = compute(&at_handler("shop::Other").build());
    assert_ne!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn self_reported_data_differentiates() {
    let data: Vec<_> = [402, 503, 504]
      .iter()
      .map(|status| {
        compute(
          &at_handler("shop::BackendProblem")
            .message(format!("Got status {} for GET https://example.com", status))
            .fingerprint_data("status", *status)
            .build(),
        )
      })
      .collect();
    assert_eq!(distinct(&data), 3);
  }

  #[test]
  fn fingerprinter_differentiates_by_response_code() {
    let extensions = Extensions::builder()
      .fingerprinter(Arc::new(ResponseCodeFingerprinter))
      .build();
    let data: Vec<_> = [
      "Unavailable due to maintenance 503",
      "Outside office hours 503",
      "Disk full 507",
    ]
    .iter()
    .map(|m| compute_with(&extensions, &at_handler("net::HttpRetryError").message(*m).build()))
    .collect();
    assert_eq!(distinct(&data), 2);
    assert_eq!(data[2].extra_data["responseCode"], 507);
  }

  #[test]
  fn failing_fingerprinter_is_skipped() {
    let extensions = ExtensionsBuilder::default()
      .fingerprinter(Arc::new(BrokenFingerprinter))
      .fingerprinter(Arc::new(ResponseCodeFingerprinter))
      .build();
    let data = compute_with(
      &extensions,
      &at_handler("net::HttpRetryError").message("Disk full 507").build(),
    );
    assert_eq!(data.extra_data.len(), 1);
    assert_eq!(data.extra_data["responseCode"], 507);
  }

  #[test]
  fn outer_extra_data_wins() {
    let root = at_handler("shop::Inner").fingerprint_data("tier", "inner").build();
    let outer = at_handler("shop::Outer")
      .fingerprint_data("tier", "outer")
      .cause(root)
      .build();
    let data = compute(&outer);
    assert_eq!(data.extra_data["tier"], "outer");
    assert_eq!(data.throwable_class_name, "shop::Inner");
  }

  #[test]
  fn stackless_root_keeps_its_class_name() {
    let root = ErrorRecord::builder("shop::Lost").build();
    let outer = at_handler("shop::Wrapper").cause(root).build();
    let data = compute(&outer);
    assert_eq!(data.throwable_class_name, "shop::Lost");
    assert_eq!(data.relevant_frames.len(), 2);
  }

  #[test]
  fn no_location_when_nothing_in_app() {
    let error = ErrorRecord::builder("io::Error")
      .frame(Frame::from_path("std::fs::read"))
      .build();
    let data = compute(&error);
    assert!(data.location.is_none());
    assert_eq!(data.relevant_frames.len(), 1);
  }

  #[test]
  fn extra_frames_from_error_are_appended() {
    let error = at_handler("shop::Async")
      .extra_frames([Frame::new("shop::jobs::Queue", "submit")])
      .build();
    let data = compute(&error);
    assert_eq!(data.relevant_frames.len(), 3);
    assert_eq!(data.relevant_frames[2].location(), "shop::jobs::Queue::submit");
  }

  #[test]
  fn location_override_changes_fingerprint_not_frames() {
    let error = at_handler("shop::Oops").build();
    let plain = compute(&error);

    let extensions = Extensions::builder()
      .incident_location("shop::api::Handler", "handle", false)
      .build();
    let overridden = compute_with(&extensions, &error);

    assert_eq!(plain.relevant_frames, overridden.relevant_frames);
    assert_eq!(overridden.location.as_ref().unwrap().location(), "shop::main::run");
    assert_ne!(plain.fingerprint(), overridden.fingerprint());
  }
}
