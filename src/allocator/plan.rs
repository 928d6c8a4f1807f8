//! Pure allocation planning.
//!
//! Maps the counter object's previous contents (or its absence) to the next
//! build number, the bytes to persist and the variables reported to the
//! pipeline.  Nothing here touches the store.

use std::fmt;

use super::{AllocationError, CounterConfig};
use crate::pipeline::{OutputVariables, BUILD_NUMBER_VARIABLE, VERSION_VARIABLE};

/// Longest slice of a corrupt counter echoed back in the error.
const CORRUPT_PREVIEW_CHARS: usize = 64;

/// A build number as stored in the counter object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildNumber(u64);

impl BuildNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Parse stored counter contents: UTF-8 decimal digits, optionally
    /// surrounded by ASCII whitespace.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.trim_matches(|c: char| c.is_ascii_whitespace());
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse().ok().map(Self)
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of planning one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub previous: Option<BuildNumber>,
    pub build_number: BuildNumber,
    pub version: String,
}

impl Allocation {
    /// Bytes persisted as the new counter contents.
    pub fn counter_bytes(&self) -> Vec<u8> {
        self.build_number.to_bytes()
    }

    pub fn output_variables(&self) -> OutputVariables {
        OutputVariables::from([
            (BUILD_NUMBER_VARIABLE.to_string(), self.build_number.to_string()),
            (VERSION_VARIABLE.to_string(), self.version.clone()),
        ])
    }
}

/// Compute the next allocation from the previous counter contents.
///
/// An absent counter issues `start_build_number` itself.
pub fn plan(previous: Option<&[u8]>, counter: &CounterConfig) -> Result<Allocation, AllocationError> {
    let (previous, build_number) = match previous {
        None => (None, BuildNumber::new(counter.start_build_number)),
        Some(bytes) => {
            let previous = BuildNumber::parse(bytes).ok_or_else(|| AllocationError::CorruptCounter {
                bucket: counter.bucket.clone(),
                key: counter.key.clone(),
                contents: preview(bytes),
            })?;
            let next = previous.next().ok_or(AllocationError::CounterOverflow {
                previous: previous.get(),
            })?;
            (Some(previous), next)
        }
    };

    Ok(Allocation {
        previous,
        build_number,
        version: format!("{}{}", counter.version_prefix, build_number),
    })
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.char_indices().nth(CORRUPT_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(prefix: &str, start: u64) -> CounterConfig {
        CounterConfig {
            bucket: "builds".to_string(),
            key: "app/build-number".to_string(),
            version_prefix: prefix.to_string(),
            start_build_number: start,
        }
    }

    #[test]
    fn absent_counter_issues_start_number() {
        let allocation = plan(None, &counter("", 100)).unwrap();
        assert_eq!(allocation.previous, None);
        assert_eq!(allocation.build_number.to_string(), "100");
        assert_eq!(allocation.counter_bytes(), b"100".to_vec());
    }

    #[test]
    fn start_number_zero_is_issued_as_is() {
        let allocation = plan(None, &counter("", 0)).unwrap();
        assert_eq!(allocation.build_number.get(), 0);
    }

    #[test]
    fn existing_counter_is_incremented() {
        let allocation = plan(Some(b"41"), &counter("", 1)).unwrap();
        assert_eq!(allocation.previous, Some(BuildNumber::new(41)));
        assert_eq!(allocation.build_number.get(), 42);
        assert_eq!(allocation.counter_bytes(), b"42".to_vec());
    }

    #[test]
    fn start_number_is_ignored_once_counter_exists() {
        let allocation = plan(Some(b"7"), &counter("", 500)).unwrap();
        assert_eq!(allocation.build_number.get(), 8);
    }

    #[test]
    fn version_is_prefix_followed_by_build_number() {
        let allocation = plan(Some(b"41"), &counter("v1.0.", 1)).unwrap();
        assert_eq!(allocation.version, "v1.0.42");

        let allocation = plan(None, &counter("", 3)).unwrap();
        assert_eq!(allocation.version, "3");
    }

    #[test]
    fn output_variables_hold_exactly_build_number_and_version() {
        let allocation = plan(Some(b"41"), &counter("v1.0.", 1)).unwrap();
        let outputs = allocation.output_variables();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["buildNumber"], "42");
        assert_eq!(outputs["version"], "v1.0.42");
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let allocation = plan(Some(b" 41\n"), &counter("", 1)).unwrap();
        assert_eq!(allocation.build_number.get(), 42);
    }

    #[test]
    fn corrupt_contents_are_rejected() {
        let cases: [&[u8]; 7] = [b"", b"abc", b"4 1", b"+41", b"-1", b"41abc", b"\xff\xfe"];
        for contents in cases {
            let err = plan(Some(contents), &counter("", 1)).unwrap_err();
            assert!(
                matches!(err, AllocationError::CorruptCounter { .. }),
                "{contents:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn corrupt_error_names_the_object_and_previews_contents() {
        let long = "x".repeat(200);
        let err = plan(Some(long.as_bytes()), &counter("", 1)).unwrap_err();
        match err {
            AllocationError::CorruptCounter { bucket, key, contents } => {
                assert_eq!(bucket, "builds");
                assert_eq!(key, "app/build-number");
                assert_eq!(contents, format!("{}...", "x".repeat(64)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn counter_at_maximum_overflows() {
        let max = u64::MAX.to_string();
        let err = plan(Some(max.as_bytes()), &counter("", 1)).unwrap_err();
        assert!(matches!(err, AllocationError::CounterOverflow { previous } if previous == u64::MAX));
    }

    #[test]
    fn out_of_range_counter_is_corrupt() {
        let err = plan(Some(b"99999999999999999999999"), &counter("", 1)).unwrap_err();
        assert!(matches!(err, AllocationError::CorruptCounter { .. }));
    }
}
