//! Prerelease labels and their per-label counters.
//!
//! A version is either a release (sentinel label `release`, no counters) or a
//! prerelease: a label plus a counter that is monotonic per `(app, label)`.
//! Many labels may coexist under the same base version, each with its own
//! independent counter.

use crate::error::{Result, VerstampError};
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel label marking a released (non-prerelease) version.
pub const RELEASE_SENTINEL: &str = "release";

/// Release/prerelease discriminator of a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerelease {
    Release,
    Label(String),
}

impl Prerelease {
    /// Parse from the persisted label string, mapping the sentinel.
    pub fn parse(s: &str) -> Result<Self> {
        if s == RELEASE_SENTINEL {
            return Ok(Prerelease::Release);
        }
        validate_label(s)?;
        Ok(Prerelease::Label(s.to_string()))
    }

    /// The persisted form: the label, or the release sentinel.
    pub fn label(&self) -> &str {
        match self {
            Prerelease::Release => RELEASE_SENTINEL,
            Prerelease::Label(l) => l,
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, Prerelease::Release)
    }
}

impl fmt::Display for Prerelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Validate a prerelease label.
///
/// Labels are alphanumeric/underscore, start with a letter and must not end
/// with a digit: in a tag name the label is immediately followed by its
/// counter, so a trailing digit would make the encoding ambiguous. The
/// release sentinel is reserved.
pub fn validate_label(label: &str) -> Result<()> {
    if label == RELEASE_SENTINEL {
        return Err(VerstampError::version(format!(
            "Prerelease label '{}' is reserved",
            label
        )));
    }
    let mut chars = label.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !label.ends_with(|c: char| c.is_ascii_digit())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(VerstampError::version(format!(
            "Invalid prerelease label: '{}' - must start with a letter, \
             contain only [0-9A-Za-z_] and not end with a digit",
            label
        )))
    }
}

/// Next counter value for `label`.
///
/// Takes `max(local_counter, ledger_counter) + 1`; a label unseen by both
/// sides starts at 1. `ledger_counter` is the highest counter among ledger
/// tags for the same base version and label, injected by the caller.
pub fn advance_counter(
    label: &str,
    counters: &BTreeMap<String, u32>,
    ledger_counter: Option<u32>,
) -> u32 {
    let local = counters.get(label).copied().unwrap_or(0);
    local.max(ledger_counter.unwrap_or(0)) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sentinel() {
        assert_eq!(Prerelease::parse("release").unwrap(), Prerelease::Release);
        assert!(Prerelease::parse("release").unwrap().is_release());
    }

    #[test]
    fn test_parse_label() {
        let pr = Prerelease::parse("rc").unwrap();
        assert_eq!(pr, Prerelease::Label("rc".to_string()));
        assert_eq!(pr.label(), "rc");
        assert!(!pr.is_release());
    }

    #[test]
    fn test_validate_label_rejects_trailing_digit() {
        assert!(validate_label("rc1").is_err());
        assert!(validate_label("beta").is_ok());
        assert!(validate_label("oddfix_x").is_ok());
    }

    #[test]
    fn test_validate_label_rejects_bad_chars() {
        assert!(validate_label("").is_err());
        assert!(validate_label("1rc").is_err());
        assert!(validate_label("rc-x").is_err());
        assert!(validate_label("release").is_err());
    }

    #[test]
    fn test_advance_counter_new_label() {
        let counters = BTreeMap::new();
        assert_eq!(advance_counter("rc", &counters, None), 1);
    }

    #[test]
    fn test_advance_counter_local_only() {
        let mut counters = BTreeMap::new();
        counters.insert("rc".to_string(), 3);
        assert_eq!(advance_counter("rc", &counters, None), 4);
    }

    #[test]
    fn test_advance_counter_ledger_wins() {
        // Another clone already published rc5; the local counter is stale.
        let mut counters = BTreeMap::new();
        counters.insert("rc".to_string(), 2);
        assert_eq!(advance_counter("rc", &counters, Some(5)), 6);
    }

    #[test]
    fn test_advance_counter_labels_are_independent() {
        let mut counters = BTreeMap::new();
        counters.insert("rc".to_string(), 7);
        assert_eq!(advance_counter("beta", &counters, None), 1);
    }
}
