//! Ledger record payloads.
//!
//! A [VersionRecord] (or [RootAppRecord]) is serialized as JSON into the
//! annotated tag message and parsed back when the ledger is read. Records are
//! never edited after publish; add-metadata and release create new derived
//! records under new tags.

use crate::backend::VcsType;
use crate::domain::prerelease::RELEASE_SENTINEL;
use crate::domain::version::{ReleaseMode, VersionNumber};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one repository inside a stamped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetRecord {
    pub hash: String,
    pub vcs_type: VcsType,
    pub remote: String,
}

/// One stamped version of an app, as stored in its ledger tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub app_name: String,
    /// Full display version, e.g. `1.3.0-rc2` or `1.3.0+linux`.
    pub version: String,
    /// Base octets only, e.g. `1.3.0`.
    pub base_version: String,
    /// Prerelease label, or the release sentinel.
    pub prerelease: String,
    #[serde(default)]
    pub prerelease_counters: BTreeMap<String, u32>,
    #[serde(default)]
    pub release_mode: Option<ReleaseMode>,
    #[serde(default)]
    pub previous_version: Option<String>,
    /// Dependency path (`"."` for the app's own repository) to snapshot.
    pub changesets: BTreeMap<String, ChangesetRecord>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
    pub stamped_on_branch: String,
}

impl VersionRecord {
    pub fn is_release(&self) -> bool {
        self.prerelease == RELEASE_SENTINEL
    }

    pub fn version_number(&self) -> Result<VersionNumber> {
        VersionNumber::parse(&self.base_version)
    }

    /// The app's own changeset at stamp time, when recorded.
    pub fn self_changeset(&self) -> Option<&str> {
        self.changesets.get(".").map(|c| c.hash.as_str())
    }
}

/// The record family for apps grouped under a root prefix. `version` only
/// ever increases; `services` is a last-writer-wins snapshot merged on every
/// stamp of any grouped app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAppRecord {
    pub version: u64,
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

/// The envelope actually written into a tag message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<VersionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_app: Option<RootAppRecord>,
}

impl TagMessage {
    pub fn for_app(record: VersionRecord) -> TagMessage {
        TagMessage {
            app: Some(record),
            root_app: None,
        }
    }

    pub fn for_root(record: RootAppRecord) -> TagMessage {
        TagMessage {
            app: None,
            root_app: Some(record),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<TagMessage> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> VersionRecord {
        let mut changesets = BTreeMap::new();
        changesets.insert(
            ".".to_string(),
            ChangesetRecord {
                hash: "a".repeat(40),
                vcs_type: VcsType::Git,
                remote: "git@example.com:org/app.git".to_string(),
            },
        );
        VersionRecord {
            app_name: "svc".to_string(),
            version: "1.3.0-rc2".to_string(),
            base_version: "1.3.0".to_string(),
            prerelease: "rc".to_string(),
            prerelease_counters: BTreeMap::from([("rc".to_string(), 2)]),
            release_mode: Some(ReleaseMode::Minor),
            previous_version: Some("1.2.0".to_string()),
            changesets,
            info: BTreeMap::new(),
            stamped_on_branch: "main".to_string(),
        }
    }

    #[test]
    fn test_record_json_round_trip() {
        let message = TagMessage::for_app(sample_record());
        let json = message.to_json().unwrap();
        let parsed = TagMessage::from_json(&json).unwrap();
        assert_eq!(parsed, message);
        assert!(parsed.root_app.is_none());
    }

    #[test]
    fn test_record_is_release() {
        let mut record = sample_record();
        assert!(!record.is_release());
        record.prerelease = RELEASE_SENTINEL.to_string();
        assert!(record.is_release());
    }

    #[test]
    fn test_record_version_number() {
        let record = sample_record();
        assert_eq!(
            record.version_number().unwrap(),
            VersionNumber::new(1, 3, 0, 0)
        );
        assert_eq!(record.self_changeset(), Some("a".repeat(40).as_str()));
    }

    #[test]
    fn test_root_record_round_trip() {
        let message = TagMessage::for_root(RootAppRecord {
            version: 12,
            services: BTreeMap::from([("group/svc".to_string(), "1.3.0".to_string())]),
        });
        let json = message.to_json().unwrap();
        let parsed = TagMessage::from_json(&json).unwrap();
        assert_eq!(parsed, message);
        assert!(parsed.app.is_none());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(TagMessage::from_json("not json").is_err());
    }
}
