//! Dependency state tracker.
//!
//! Computes, fresh on every invocation and never persisted: the status flags
//! of the working tree and of every configured dependency repository, the
//! candidate changeset map, and the "matched version": the ledger record
//! whose recorded changesets exactly equal the live ones. Violations are
//! accumulated across all offending dependencies so the user sees every
//! problem at once.

use crate::backend::{open_backend, TagScope, VersionControlBackend};
use crate::config::{AppConfig, DependencyPin};
use crate::domain::record::{ChangesetRecord, TagMessage, VersionRecord};
use crate::domain::tag::TagName;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::ui::Reporter;
use std::collections::BTreeMap;

/// Live status flags of one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoFlags {
    /// Uncommitted local modifications exist.
    pub pending: bool,
    /// Local commits missing from the remote tracking branch.
    pub outgoing: bool,
    /// The outgoing check was skipped because HEAD is detached.
    pub outgoing_skipped: bool,
    pub detached: bool,
    pub branch_error: Option<String>,
    pub tag_error: Option<String>,
    pub hash_error: Option<String>,
}

impl RepoFlags {
    pub fn is_dirty(&self) -> bool {
        self.pending
            || self.outgoing
            || self.branch_error.is_some()
            || self.tag_error.is_some()
            || self.hash_error.is_some()
    }

    /// Human-readable problem lines, one per violation.
    pub fn problems(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        if self.pending {
            out.push(format!("{}: uncommitted local changes", path));
        }
        if self.outgoing {
            out.push(format!("{}: unpushed local commits", path));
        }
        for err in [&self.branch_error, &self.tag_error, &self.hash_error]
            .into_iter()
            .flatten()
        {
            out.push(format!("{}: {}", path, err));
        }
        out
    }
}

/// The aggregate decision object every command consumes.
#[derive(Debug)]
pub struct StatusReport {
    pub self_flags: RepoFlags,
    pub dep_flags: BTreeMap<String, RepoFlags>,
    /// Configured dependency paths absent from disk.
    pub missing_deps: Vec<String>,
    /// Accumulated violation messages across every offending dependency.
    pub dirty_deps: Vec<String>,
    /// Candidate changeset map: `"."` plus every dependency that exists
    /// locally, with the remote recorded in its pin.
    pub changesets: BTreeMap<String, ChangesetRecord>,
    /// The ledger record exactly matching the live changesets, if any.
    pub matched: Option<(TagName, VersionRecord)>,
}

impl StatusReport {
    /// "Modified" means the working set sits on no previously stamped state.
    pub fn modified(&self) -> bool {
        self.matched.is_none()
    }

    pub fn repos_exist_locally(&self) -> bool {
        self.missing_deps.is_empty()
    }
}

pub struct Tracker<'a> {
    backend: &'a dyn VersionControlBackend,
    reporter: &'a Reporter,
}

impl<'a> Tracker<'a> {
    pub fn new(backend: &'a dyn VersionControlBackend, reporter: &'a Reporter) -> Self {
        Tracker { backend, reporter }
    }

    /// Compute the full status report for `app`.
    pub fn evaluate(&self, app: &str, config: &AppConfig) -> Result<StatusReport> {
        let self_flags = self.self_repo_flags()?;

        let mut changesets = BTreeMap::new();
        changesets.insert(
            ".".to_string(),
            ChangesetRecord {
                hash: self.backend.changeset(None)?,
                vcs_type: self.backend.vcs_type(),
                remote: self.backend.remote_url()?,
            },
        );

        let mut dep_flags = BTreeMap::new();
        let mut missing_deps = Vec::new();
        let mut dirty_deps = Vec::new();

        for (path, pin) in &config.deps {
            self.reporter.detail(&format!("checking dependency {}", path));
            let dep_root = self.backend.root().join(path);
            if !dep_root.exists() {
                missing_deps.push(path.clone());
                dirty_deps.push(format!("{}: no local clone at {}", path, dep_root.display()));
                continue;
            }

            let dep_backend = match open_backend(&dep_root) {
                Ok(backend) => backend,
                Err(e) => {
                    dirty_deps.push(format!("{}: cannot read repository status: {}", path, e));
                    continue;
                }
            };

            let flags = Self::dependency_flags(pin, dep_backend.as_ref())?;
            dirty_deps.extend(flags.problems(path));
            changesets.insert(
                path.clone(),
                ChangesetRecord {
                    hash: dep_backend.changeset(None)?,
                    vcs_type: pin.vcs_type,
                    remote: pin.remote.clone(),
                },
            );
            dep_flags.insert(path.clone(), flags);
        }

        let matched = self.find_matched(app, &changesets)?;

        Ok(StatusReport {
            self_flags,
            dep_flags,
            missing_deps,
            dirty_deps,
            changesets,
            matched,
        })
    }

    fn self_repo_flags(&self) -> Result<RepoFlags> {
        let detached = self.backend.is_detached_head()?;
        let pending = self.backend.has_pending_changes()?;
        // Outgoing is measured against the tracking branch, which does not
        // exist while detached; the skip is recorded rather than silent.
        let (outgoing, outgoing_skipped) = if detached {
            (false, true)
        } else {
            (self.backend.has_outgoing_changes()?, false)
        };
        Ok(RepoFlags {
            pending,
            outgoing,
            outgoing_skipped,
            detached,
            ..RepoFlags::default()
        })
    }

    fn dependency_flags(
        pin: &DependencyPin,
        dep: &dyn VersionControlBackend,
    ) -> Result<RepoFlags> {
        let detached = dep.is_detached_head()?;
        let pending = dep.has_pending_changes()?;
        let (outgoing, outgoing_skipped) = if detached {
            (false, true)
        } else {
            (dep.has_outgoing_changes()?, false)
        };

        let mut flags = RepoFlags {
            pending,
            outgoing,
            outgoing_skipped,
            detached,
            ..RepoFlags::default()
        };

        if let Some(wanted) = &pin.branch {
            match dep.active_branch() {
                Ok(actual) if &actual == wanted => {}
                Ok(actual) => {
                    flags.branch_error = Some(format!(
                        "pinned to branch '{}' but on '{}'",
                        wanted, actual
                    ));
                }
                Err(e) => {
                    flags.branch_error =
                        Some(format!("pinned to branch '{}' but {}", wanted, e));
                }
            }
        }
        if let Some(wanted) = &pin.tag {
            match dep.changeset(Some(wanted)) {
                Ok(resolved) => {
                    if resolved != dep.changeset(None)? {
                        flags.tag_error = Some(format!("not at pinned tag '{}'", wanted));
                    }
                }
                Err(e) => {
                    flags.tag_error = Some(format!("pinned tag '{}' unresolvable: {}", wanted, e));
                }
            }
        }
        if let Some(wanted) = &pin.hash {
            let current = dep.changeset(None)?;
            // Pins may use an abbreviated changeset.
            if !current.starts_with(wanted.as_str()) {
                flags.hash_error = Some(format!(
                    "pinned to {} but at {}",
                    wanted,
                    &current[..current.len().min(12)]
                ));
            }
        }
        Ok(flags)
    }

    /// Walk reachable ledger records newest first; the first whose changeset
    /// map equals the candidate key-for-key and hash-for-hash is the match.
    /// A release tag at the same commit masks a matched prerelease sibling.
    fn find_matched(
        &self,
        app: &str,
        candidate: &BTreeMap<String, ChangesetRecord>,
    ) -> Result<Option<(TagName, VersionRecord)>> {
        let ledger = Ledger::new(self.backend);
        for (name, entry) in ledger.version_entries(app, TagScope::Position)? {
            let Some(raw) = entry.message.as_deref() else {
                continue;
            };
            let Some(record) = TagMessage::from_json(raw)?.app else {
                continue;
            };
            if !changesets_match(candidate, &record.changesets) {
                continue;
            }

            if !record.is_release() {
                if let Some(found) = self.release_brother(app, &name, &entry.name)? {
                    return Ok(Some(found));
                }
            }
            return Ok(Some((name, record)));
        }
        Ok(None)
    }

    fn release_brother(
        &self,
        app: &str,
        matched: &TagName,
        matched_tag: &str,
    ) -> Result<Option<(TagName, VersionRecord)>> {
        let ledger = Ledger::new(self.backend);
        for brother in ledger.brother_tags(matched_tag)? {
            let Ok(name) = TagName::parse(&brother) else {
                continue;
            };
            if !name.matches_app(app)
                || !name.is_release()
                || name.buildmetadata.is_some()
                || name.version != matched.version
            {
                continue;
            }
            if let Some((_, message)) = ledger.record_for_tag(&brother)? {
                if let Some(record) = message.app {
                    return Ok(Some((name, record)));
                }
            }
        }
        Ok(None)
    }
}

fn changesets_match(
    a: &BTreeMap<String, ChangesetRecord>,
    b: &BTreeMap<String, ChangesetRecord>,
) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| other.hash == value.hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, VcsType};
    use crate::domain::RELEASE_SENTINEL;

    fn reporter() -> Reporter {
        Reporter::new(false)
    }

    fn record_with_changesets(
        app: &str,
        version: &str,
        prerelease: &str,
        changesets: BTreeMap<String, ChangesetRecord>,
    ) -> String {
        TagMessage::for_app(VersionRecord {
            app_name: app.to_string(),
            version: version.to_string(),
            base_version: version.split('-').next().unwrap_or(version).to_string(),
            prerelease: prerelease.to_string(),
            prerelease_counters: BTreeMap::new(),
            release_mode: None,
            previous_version: None,
            changesets,
            info: BTreeMap::new(),
            stamped_on_branch: "main".to_string(),
        })
        .to_json()
        .unwrap()
    }

    fn self_changeset(backend: &MockBackend) -> BTreeMap<String, ChangesetRecord> {
        BTreeMap::from([(
            ".".to_string(),
            ChangesetRecord {
                hash: backend.changeset(None).unwrap(),
                vcs_type: VcsType::Git,
                remote: "mock://origin".to_string(),
            },
        )])
    }

    #[test]
    fn test_clean_repo_with_matching_tag() {
        let backend = MockBackend::new();
        let message = record_with_changesets(
            "svc",
            "0.0.1",
            RELEASE_SENTINEL,
            self_changeset(&backend),
        );
        backend.create_tag("svc_0.0.1", &message, None, false).unwrap();

        let rep = reporter();
        let tracker = Tracker::new(&backend, &rep);
        let report = tracker.evaluate("svc", &AppConfig::default()).unwrap();

        assert!(!report.modified());
        assert_eq!(report.matched.as_ref().unwrap().1.version, "0.0.1");
        assert!(report.dirty_deps.is_empty());
        assert!(!report.self_flags.is_dirty());
    }

    #[test]
    fn test_unmatched_changeset_is_modified() {
        let backend = MockBackend::new();
        let message = record_with_changesets(
            "svc",
            "0.0.1",
            RELEASE_SENTINEL,
            self_changeset(&backend),
        );
        backend.create_tag("svc_0.0.1", &message, None, false).unwrap();
        backend.commit("drift", &[]).unwrap();

        let rep = reporter();
        let report = Tracker::new(&backend, &rep)
            .evaluate("svc", &AppConfig::default())
            .unwrap();
        assert!(report.modified());
    }

    #[test]
    fn test_release_masks_prerelease_brother() {
        let backend = MockBackend::new();
        let changesets = self_changeset(&backend);
        backend
            .create_tag(
                "svc_1.0.0-rc1",
                &record_with_changesets("svc", "1.0.0-rc1", "rc", changesets.clone()),
                None,
                false,
            )
            .unwrap();
        backend
            .create_tag(
                "svc_1.0.0",
                &record_with_changesets("svc", "1.0.0", RELEASE_SENTINEL, changesets),
                None,
                false,
            )
            .unwrap();

        let rep = reporter();
        let report = Tracker::new(&backend, &rep)
            .evaluate("svc", &AppConfig::default())
            .unwrap();
        let (name, record) = report.matched.unwrap();
        assert!(name.is_release());
        assert!(record.is_release());
    }

    #[test]
    fn test_pending_and_detached_flags() {
        let backend = MockBackend::new();
        backend.set_pending(true);
        backend.set_detached(true);

        let rep = reporter();
        let report = Tracker::new(&backend, &rep)
            .evaluate("svc", &AppConfig::default())
            .unwrap();
        assert!(report.self_flags.pending);
        assert!(report.self_flags.detached);
        // Outgoing is skipped, not asserted false silently.
        assert!(report.self_flags.outgoing_skipped);
        assert!(!report.self_flags.outgoing);
    }

    #[test]
    fn test_missing_dependency_is_accumulated() {
        let backend = MockBackend::new();
        let mut config = AppConfig::default();
        for path in ["../no-such-a", "../no-such-b"] {
            config.deps.insert(
                path.to_string(),
                DependencyPin {
                    vcs_type: VcsType::Git,
                    remote: "mock://dep".to_string(),
                    branch: None,
                    tag: None,
                    hash: None,
                },
            );
        }

        let rep = reporter();
        let report = Tracker::new(&backend, &rep).evaluate("svc", &config).unwrap();
        assert_eq!(report.missing_deps.len(), 2);
        // Both offenders reported together.
        assert_eq!(report.dirty_deps.len(), 2);
        assert!(!report.repos_exist_locally());
    }

    #[test]
    fn test_changesets_match_requires_exact_keys() {
        let a = BTreeMap::from([(
            ".".to_string(),
            ChangesetRecord {
                hash: "x".to_string(),
                vcs_type: VcsType::Git,
                remote: "r".to_string(),
            },
        )]);
        let mut b = a.clone();
        assert!(changesets_match(&a, &b));
        b.insert(
            "../extra".to_string(),
            ChangesetRecord {
                hash: "y".to_string(),
                vcs_type: VcsType::Git,
                remote: "r".to_string(),
            },
        );
        assert!(!changesets_match(&a, &b));
    }
}
