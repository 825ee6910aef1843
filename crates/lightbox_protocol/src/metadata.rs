//! Metadata keys and the processing-state derivation.
//!
//! Processing state is never stored as its own field. It is reconstructed from
//! boolean flags on the object metadata every time it is needed:
//!
//! | `tagged` | `processed` | `relocated` | state       |
//! |----------|-------------|-------------|-------------|
//! | true     | true        | any         | `ANALYZED`  |
//! | any      | true        | any         | `RELOCATED` |
//! | any      | any         | true        | `RELOCATED` |
//! | other    |             |             | `NEW`       |

use crate::types::ProcessingState;
use std::collections::BTreeMap;

/// Object metadata. Ordered so sidecar files and logs are stable.
pub type Metadata = BTreeMap<String, String>;

pub const UID: &str = "uid";
pub const PUBLIC: &str = "public";
pub const PROCESSED: &str = "processed";
pub const RELOCATED: &str = "relocated";
pub const TAGGED: &str = "tagged";
pub const RELOCATED_TO: &str = "relocated_to";
pub const SOURCE_PATH: &str = "source_path";
pub const DECODE_ATTEMPTS: &str = "decode_attempts";

/// Keys carried from an inbox artifact onto its processed copy.
pub const CARRIED_KEYS: &[&str] = &[UID, PUBLIC];

pub fn bool_value(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// True if `key` is present and equals `"true"` (case-insensitive).
pub fn flag(metadata: &Metadata, key: &str) -> bool {
    metadata
        .get(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn decode_attempts(metadata: &Metadata) -> u32 {
    metadata
        .get(DECODE_ATTEMPTS)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

pub fn derive_state(metadata: &Metadata) -> ProcessingState {
    let processed = flag(metadata, PROCESSED);
    if processed && flag(metadata, TAGGED) {
        ProcessingState::Analyzed
    } else if processed || flag(metadata, RELOCATED) {
        ProcessingState::Relocated
    } else {
        ProcessingState::New
    }
}

/// Entries of `patch` whose value differs from `current` (or is missing there).
pub fn pending_changes(current: &Metadata, patch: &Metadata) -> Metadata {
    patch
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Build metadata from string pairs.
pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_state_table() {
        assert_eq!(derive_state(&Metadata::new()), ProcessingState::New);
        assert_eq!(
            derive_state(&from_pairs([("uid", "u1"), ("public", "true")])),
            ProcessingState::New
        );
        assert_eq!(
            derive_state(&from_pairs([("relocated", "true")])),
            ProcessingState::Relocated
        );
        assert_eq!(
            derive_state(&from_pairs([("processed", "true")])),
            ProcessingState::Relocated
        );
        // tagged without processed is not terminal
        assert_eq!(
            derive_state(&from_pairs([("relocated", "true"), ("tagged", "true")])),
            ProcessingState::Relocated
        );
        assert_eq!(
            derive_state(&from_pairs([("processed", "True"), ("tagged", "TRUE")])),
            ProcessingState::Analyzed
        );
    }

    #[test]
    fn test_flag_ignores_other_values() {
        let m = from_pairs([("processed", "yes"), ("tagged", " true ")]);
        assert!(!flag(&m, PROCESSED));
        assert!(flag(&m, TAGGED));
        assert!(!flag(&m, RELOCATED));
    }

    #[test]
    fn test_pending_changes_only_reports_differences() {
        let current = from_pairs([("uid", "u1"), ("tagged", "true")]);
        let patch = from_pairs([("uid", "u1"), ("tagged", "true"), ("processed", "true")]);
        let pending = pending_changes(&current, &patch);
        assert_eq!(pending, from_pairs([("processed", "true")]));
        assert!(pending_changes(&patch, &patch).is_empty());
    }

    #[test]
    fn test_decode_attempts_defaults_to_zero() {
        assert_eq!(decode_attempts(&Metadata::new()), 0);
        assert_eq!(decode_attempts(&from_pairs([("decode_attempts", "3")])), 3);
        assert_eq!(decode_attempts(&from_pairs([("decode_attempts", "x")])), 0);
    }
}
