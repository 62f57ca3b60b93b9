//! The version ledger: records stored as annotated tags.
//!
//! Every stamped version is an immutable annotated tag whose name encodes the
//! version (see [crate::domain::tag]) and whose message carries the JSON
//! [TagMessage] payload. Tags are discovered by prefix listing in one of
//! three scopes: relative to the current position, relative to the current
//! branch, or across global history.
//!
//! Only tags created with the tool's own synthetic tagger identity are
//! authoritative; foreign tags that happen to collide with the grammar are
//! ignored. Buildmetadata tags are derived records and excluded from the
//! default walks.

use crate::backend::{TagEntry, TagScope, VersionControlBackend, STAMP_USER_NAME};
use crate::domain::record::{RootAppRecord, TagMessage, VersionRecord};
use crate::domain::tag::{self, RootTagName, TagName};
use crate::domain::version::{ReleaseMode, VersionNumber};
use crate::error::{Result, VerstampError};

/// Read/write access to one repository's ledger.
pub struct Ledger<'a> {
    backend: &'a dyn VersionControlBackend,
}

impl<'a> Ledger<'a> {
    pub fn new(backend: &'a dyn VersionControlBackend) -> Self {
        Ledger { backend }
    }

    fn authoritative(entry: &TagEntry) -> bool {
        entry.tagger.as_deref() == Some(STAMP_USER_NAME)
    }

    /// All authoritative version tags of `app` within `scope`, newest first,
    /// buildmetadata tags excluded.
    pub fn version_entries(
        &self,
        app: &str,
        scope: TagScope,
    ) -> Result<Vec<(TagName, TagEntry)>> {
        let prefix = format!("{}_", tag::encode_app_name(app));
        let mut entries = Vec::new();
        for entry in self.backend.list_tags(&prefix, scope)? {
            if !Self::authoritative(&entry) {
                continue;
            }
            let Ok(name) = TagName::parse(&entry.name) else {
                // Root tags and the moving index share the prefix namespace.
                continue;
            };
            if !name.matches_app(app) || name.buildmetadata.is_some() {
                continue;
            }
            entries.push((name, entry));
        }
        // Creation times have second resolution; ties are broken
        // semantically so a release outranks its prerelease brothers and
        // higher counters outrank lower ones.
        entries.sort_by(|(a_name, a_entry), (b_name, b_entry)| {
            let rank = |t: &TagName| match &t.prerelease {
                None => (1u8, u32::MAX),
                Some((_, n)) => (0u8, *n),
            };
            b_entry
                .created
                .cmp(&a_entry.created)
                .then_with(|| b_name.version.cmp(&a_name.version))
                .then_with(|| rank(b_name).cmp(&rank(a_name)))
        });
        Ok(entries)
    }

    /// Parse the record payload of an authoritative tag entry.
    fn parse_app_record(entry: &TagEntry) -> Result<VersionRecord> {
        let raw = entry.message.as_deref().ok_or_else(|| {
            VerstampError::format(format!("Ledger tag '{}' has no record payload", entry.name))
        })?;
        TagMessage::from_json(raw)?
            .app
            .ok_or_else(|| {
                VerstampError::format(format!(
                    "Ledger tag '{}' carries no app record",
                    entry.name
                ))
            })
    }

    /// The newest reachable version record for `app` in `scope`.
    pub fn first_reachable_record(
        &self,
        app: &str,
        scope: TagScope,
    ) -> Result<Option<(TagName, VersionRecord)>> {
        for (name, entry) in self.version_entries(app, scope)? {
            let record = Self::parse_app_record(&entry)?;
            return Ok(Some((name, record)));
        }
        Ok(None)
    }

    /// Look up a record by exact tag name; `None` for unknown or foreign tags.
    pub fn record_for_tag(&self, tag_name: &str) -> Result<Option<(TagEntry, TagMessage)>> {
        let Some(entry) = self.backend.tag_entry(tag_name)? else {
            return Ok(None);
        };
        if !Self::authoritative(&entry) {
            return Ok(None);
        }
        let raw = entry.message.clone().unwrap_or_default();
        let message = TagMessage::from_json(&raw)?;
        Ok(Some((entry, message)))
    }

    /// Look up the record of `app` at an exact version string
    /// (`1.2.3`, `1.2.3-rc2`, `1.2.3+meta`).
    pub fn record_for_version(
        &self,
        app: &str,
        version: &str,
    ) -> Result<Option<(TagName, VersionRecord)>> {
        let (number, prerelease, buildmetadata) = tag::parse_version_string(version)?;
        let mut name = TagName::for_app(app, number, prerelease);
        name.buildmetadata = buildmetadata;
        let tag_string = name.serialize();
        match self.record_for_tag(&tag_string)? {
            Some((_, message)) => Ok(message.app.map(|record| (name, record))),
            None => Ok(None),
        }
    }

    /// Other tags pointing at the same commit as `tag_name`.
    pub fn brother_tags(&self, tag_name: &str) -> Result<Vec<String>> {
        let Some(entry) = self.backend.tag_entry(tag_name)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .backend
            .tags_at(&entry.target)?
            .into_iter()
            .filter(|name| name != tag_name)
            .collect())
    }

    /// Highest value of the `mode` octet among tags sharing `next`'s coarser
    /// prefix. This is the cross-clone arbitration input of the version model.
    pub fn max_octet(
        &self,
        app: &str,
        next: &VersionNumber,
        mode: ReleaseMode,
    ) -> Result<Option<u32>> {
        let mut max = None;
        for (name, _) in self.version_entries(app, TagScope::Global)? {
            if !next.shares_prefix_above(&name.version, mode) {
                continue;
            }
            let value = name.version.octet(mode);
            max = Some(max.map_or(value, |m: u32| m.max(value)));
        }
        Ok(max)
    }

    /// Highest prerelease counter published for `(base, label)`.
    pub fn max_prerelease_counter(
        &self,
        app: &str,
        base: &VersionNumber,
        label: &str,
    ) -> Result<Option<u32>> {
        let mut max = None;
        for (name, _) in self.version_entries(app, TagScope::Global)? {
            if name.version != *base {
                continue;
            }
            let Some((tag_label, count)) = &name.prerelease else {
                continue;
            };
            if tag_label == label {
                max = Some(max.map_or(*count, |m: u32| m.max(*count)));
            }
        }
        Ok(max)
    }

    /// The highest-numbered root record of the root-app tag family.
    pub fn latest_root_record(
        &self,
        root_app: &str,
    ) -> Result<Option<(RootTagName, RootAppRecord)>> {
        let prefix = format!("{}_", tag::encode_app_name(root_app));
        let mut latest: Option<(RootTagName, TagEntry)> = None;
        for entry in self.backend.list_tags(&prefix, TagScope::Global)? {
            if !Self::authoritative(&entry) {
                continue;
            }
            let Ok(name) = RootTagName::parse(&entry.name) else {
                continue;
            };
            if name.root != tag::encode_app_name(root_app) {
                continue;
            }
            let newer = match &latest {
                Some((current, _)) => name.counter > current.counter,
                None => true,
            };
            if newer {
                latest = Some((name, entry));
            }
        }

        match latest {
            Some((name, entry)) => {
                let raw = entry.message.as_deref().unwrap_or_default();
                let record = TagMessage::from_json(raw)?.root_app.ok_or_else(|| {
                    VerstampError::format(format!(
                        "Root tag '{}' carries no root record",
                        entry.name
                    ))
                })?;
                Ok(Some((name, record)))
            }
            None => Ok(None),
        }
    }

    /// Fast path through the per-branch moving index tag.
    ///
    /// The index is never authoritative: it must name an existing record tag
    /// pointing at the same commit the index points at, otherwise `None` is
    /// returned and the caller falls back to the full scan.
    pub fn branch_index_record(
        &self,
        app: &str,
        branch: &str,
    ) -> Result<Option<(TagName, VersionRecord)>> {
        let index_name = tag::moving_tag_name(app, branch);
        let Some(index) = self.backend.tag_entry(&index_name)? else {
            return Ok(None);
        };
        let pointed = match index.message.as_deref() {
            Some(raw) => raw.trim().to_string(),
            None => return Ok(None),
        };
        let Ok(name) = TagName::parse(&pointed) else {
            return Ok(None);
        };
        let Some((entry, message)) = self.record_for_tag(&pointed)? else {
            return Ok(None);
        };
        if entry.target != index.target {
            return Ok(None);
        }
        Ok(message.app.map(|record| (name, record)))
    }
}
