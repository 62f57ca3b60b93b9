//! The optimistic-concurrency stamping protocol.
//!
//! One stamp invocation runs the state machine
//!
//! ```text
//! ComputeCandidate -> Publish -> {SUCCESS, RACE_RETRY, FORMAT_FATAL, COMMIT_FATAL}
//! RACE_RETRY -> (pull, recompute against the updated ledger) -> ComputeCandidate
//! ```
//!
//! bounded at [MAX_STAMP_ATTEMPTS] attempts. Each iteration carries an
//! explicit [StampAttempt] value; there is no mutable state threaded across
//! retries. Cross-clone writers are arbitrated purely by the push: a rejected
//! ref means another stamper won, so local state is reverted, the remote
//! ledger pulled, and the candidate recomputed against the new maximum,
//! which guarantees the retried value is higher.

use crate::backend::{TagScope, VersionControlBackend};
use crate::config::{self, AppConfig, RootState, VersionState};
use crate::domain::prerelease::{self, Prerelease, RELEASE_SENTINEL};
use crate::domain::record::{RootAppRecord, TagMessage, VersionRecord};
use crate::domain::tag::{self, RootTagName, TagName};
use crate::domain::version::{ReleaseMode, VersionNumber};
use crate::error::{Result, VerstampError};
use crate::ledger::Ledger;
use crate::state::Tracker;
use crate::ui::Reporter;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bound on candidate/publish iterations per stamp invocation.
pub const MAX_STAMP_ATTEMPTS: u32 = 3;

/// Bound on post-push outgoing re-checks (workaround for backends whose push
/// can fail empty in partial-failure states).
const MAX_OUTGOING_CHECKS: u32 = 3;

/// Why a stamp aborted without retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The produced tag name fails the grammar: a template/config bug.
    Format,
    /// The local stamp commit could not be produced or verified.
    Commit,
}

/// Terminal result of one stamp invocation.
#[derive(Debug)]
pub enum StampOutcome {
    Success(VersionRecord),
    RaceExhausted,
    Fatal { kind: FatalKind, reason: String },
}

/// Parameters of one stamp invocation.
#[derive(Debug, Clone)]
pub struct StampRequest<'a> {
    pub app: &'a str,
    pub mode: ReleaseMode,
    /// Prerelease label; `None` stamps a release version.
    pub prerelease: Option<&'a str>,
    pub pull: bool,
    pub dry_run: bool,
}

/// One fully-computed candidate, passed by value through the attempt.
#[derive(Debug, Clone)]
pub struct StampAttempt {
    pub attempt: u32,
    pub version: VersionNumber,
    pub prerelease: Prerelease,
    pub counter: Option<u32>,
    pub counters: BTreeMap<String, u32>,
    pub record: VersionRecord,
    root_part: Option<(RootTagName, RootAppRecord)>,
}

enum Candidate {
    /// The working tree already sits exactly on a stamped state.
    AlreadyStamped(VersionRecord),
    Computed(Box<StampAttempt>),
}

pub struct Stamper<'a> {
    root: &'a Path,
    backend: &'a dyn VersionControlBackend,
    reporter: &'a Reporter,
}

impl<'a> Stamper<'a> {
    pub fn new(
        root: &'a Path,
        backend: &'a dyn VersionControlBackend,
        reporter: &'a Reporter,
    ) -> Self {
        Stamper {
            root,
            backend,
            reporter,
        }
    }

    /// Run the full stamping protocol.
    pub fn stamp(&self, req: &StampRequest<'_>) -> Result<StampOutcome> {
        let config = config::load_app_config(self.root, req.app)?;
        if req.pull {
            self.reporter.detail("pulling before stamp");
            self.backend.pull()?;
        }

        for attempt_no in 1..=MAX_STAMP_ATTEMPTS {
            let attempt = match self.compute_candidate(req, &config, attempt_no)? {
                Candidate::AlreadyStamped(record) => {
                    self.reporter.info(&format!(
                        "{} is already stamped as {}",
                        req.app, record.version
                    ));
                    return Ok(StampOutcome::Success(record));
                }
                Candidate::Computed(attempt) => attempt,
            };

            if req.dry_run {
                self.reporter.info(&format!(
                    "dry run: would stamp {} as {}",
                    req.app, attempt.record.version
                ));
                return Ok(StampOutcome::Success(attempt.record));
            }

            let prior = self.backend.changeset(None)?;

            let commit = match self.persist(req.app, &config, &attempt) {
                Ok(commit) => commit,
                Err(e) => {
                    self.revert(&prior, &[]);
                    return Ok(StampOutcome::Fatal {
                        kind: FatalKind::Commit,
                        reason: e.to_string(),
                    });
                }
            };
            // The commit must be observable before anything is tagged on it.
            if self.backend.changeset(None)? != commit {
                self.revert(&prior, &[]);
                return Ok(StampOutcome::Fatal {
                    kind: FatalKind::Commit,
                    reason: "stamp commit is not at HEAD after write".to_string(),
                });
            }

            let mut created_tags = Vec::new();
            match self.publish(req.app, &attempt, &commit, &mut created_tags) {
                Ok(record) => {
                    self.reporter
                        .info(&format!("stamped {} as {}", req.app, record.version));
                    return Ok(StampOutcome::Success(record));
                }
                Err(e) if e.is_race() => {
                    self.reporter
                        .warn(&format!("attempt {}: {}", attempt.attempt, e));
                    self.revert(&prior, &created_tags);
                    self.backend.pull()?;
                    continue;
                }
                Err(VerstampError::Format(reason)) => {
                    self.revert(&prior, &created_tags);
                    return Ok(StampOutcome::Fatal {
                        kind: FatalKind::Format,
                        reason,
                    });
                }
                Err(e) => {
                    self.revert(&prior, &created_tags);
                    return Err(e);
                }
            }
        }

        Ok(StampOutcome::RaceExhausted)
    }

    fn compute_candidate(
        &self,
        req: &StampRequest<'_>,
        config: &AppConfig,
        attempt_no: u32,
    ) -> Result<Candidate> {
        let tracker = Tracker::new(self.backend, self.reporter);
        let report = tracker.evaluate(req.app, config)?;

        // Idempotent re-stamp: the working tree sits exactly on a stamped
        // state. Uncommitted or dirty work disqualifies the match: edits
        // mean the tree is no longer that state.
        if report.matched.is_some()
            && !report.self_flags.pending
            && report.dirty_deps.is_empty()
            && report.repos_exist_locally()
        {
            let (_, record) = report.matched.expect("matched checked above");
            return Ok(Candidate::AlreadyStamped(record));
        }

        if report.self_flags.detached {
            return Err(VerstampError::precondition(
                "Cannot stamp from a detached HEAD",
            ));
        }
        if report.self_flags.pending {
            return Err(VerstampError::precondition(
                "Uncommitted changes in the working tree; commit or revert them first",
            ));
        }
        if !report.repos_exist_locally() {
            return Err(VerstampError::precondition(format!(
                "Missing local clones: {}",
                report.missing_deps.join(", ")
            )));
        }
        if !report.dirty_deps.is_empty() {
            return Err(VerstampError::Consistency(report.dirty_deps));
        }

        let state = config::load_version_state(self.root, req.app)?;
        let (current_base, current_pre, _) =
            tag::parse_version_string(&state.version_to_stamp_from)?;
        let ledger = Ledger::new(self.backend);

        let advance = |base: &VersionNumber| -> Result<VersionNumber> {
            let next_local = base.advance(req.mode, None);
            let ledger_max = ledger.max_octet(req.app, &next_local, req.mode)?;
            Ok(base.advance(req.mode, ledger_max))
        };

        let (version, prerelease_state, counter, counters) = match req.prerelease {
            Some(label) => {
                prerelease::validate_label(label)?;
                // An open prerelease cycle keeps its base; otherwise the
                // requested octet advances first.
                let base = if current_pre.is_some() {
                    current_base
                } else {
                    advance(&current_base)?
                };
                let ledger_count = ledger.max_prerelease_counter(req.app, &base, label)?;
                let count =
                    prerelease::advance_counter(label, &state.prerelease_count, ledger_count);
                let mut counters = state.prerelease_count.clone();
                counters.insert(label.to_string(), count);
                (
                    base,
                    Prerelease::Label(label.to_string()),
                    Some(count),
                    counters,
                )
            }
            None => {
                let version = if current_pre.is_some() {
                    // A release stamp closes the open prerelease cycle at its
                    // base, unless that base was already released elsewhere.
                    let base_taken = ledger
                        .record_for_version(req.app, &current_base.format(false))?
                        .is_some();
                    if base_taken {
                        advance(&current_base)?
                    } else {
                        current_base
                    }
                } else {
                    advance(&current_base)?
                };
                (version, Prerelease::Release, None, BTreeMap::new())
            }
        };

        let tag_name = TagName::for_app(
            req.app,
            version,
            counter.map(|n| (prerelease_state.label().to_string(), n)),
        );
        let previous_version = ledger
            .first_reachable_record(req.app, TagScope::Position)?
            .map(|(_, record)| record.version);

        let record = VersionRecord {
            app_name: req.app.to_string(),
            version: tag_name.version_string(),
            base_version: version.format(config.show_hotfix),
            prerelease: prerelease_state.label().to_string(),
            prerelease_counters: counters.clone(),
            release_mode: Some(req.mode),
            previous_version,
            changesets: report.changesets,
            info: config.extra_info.clone(),
            stamped_on_branch: self.backend.active_branch()?,
        };

        let root_part = self.compute_root_part(req.app, &record.version)?;

        Ok(Candidate::Computed(Box::new(StampAttempt {
            attempt: attempt_no,
            version,
            prerelease: prerelease_state,
            counter,
            counters,
            record,
            root_part,
        })))
    }

    /// Fold the root-app counter and services snapshot into the transaction.
    fn compute_root_part(
        &self,
        app: &str,
        display_version: &str,
    ) -> Result<Option<(RootTagName, RootAppRecord)>> {
        let Some(root_app) = config::root_app_of(app) else {
            return Ok(None);
        };
        let ledger = Ledger::new(self.backend);
        let (ledger_counter, mut services) = match ledger.latest_root_record(root_app)? {
            Some((name, record)) => (name.counter, record.services),
            None => (0, BTreeMap::new()),
        };
        let local_counter = config::load_root_state(self.root, root_app)?.version;
        // The root version only increases, whichever side is ahead.
        let next = ledger_counter.max(local_counter) + 1;
        services.insert(app.to_string(), display_version.to_string());
        Ok(Some((
            RootTagName::for_root(root_app, next),
            RootAppRecord {
                version: next,
                services,
            },
        )))
    }

    /// Write the version-state files (and any configured secondary version
    /// files) and produce the single stamp commit.
    fn persist(&self, app: &str, config: &AppConfig, attempt: &StampAttempt) -> Result<String> {
        let state = VersionState {
            version_to_stamp_from: attempt.record.version.clone(),
            prerelease: attempt.prerelease.label().to_string(),
            prerelease_count: attempt.counters.clone(),
        };
        let mut files: Vec<PathBuf> = Vec::new();
        let version_path = config::save_version_state(self.root, app, &state)?;
        files.push(config::relative_state_path(self.root, &version_path));

        for rel in &config.version_files {
            std::fs::write(
                self.root.join(rel),
                format!("{}\n", attempt.record.version),
            )?;
            files.push(PathBuf::from(rel));
        }

        if let Some((root_name, root_record)) = &attempt.root_part {
            let root_app = root_name.root.clone();
            let root_path = config::save_root_state(
                self.root,
                &root_app,
                &RootState {
                    version: root_record.version,
                },
            )?;
            files.push(config::relative_state_path(self.root, &root_path));
        }

        self.backend.commit(
            &format!("verstamp: stamp {} version {}", app, attempt.record.version),
            &files,
        )
    }

    /// Tag the stamp commit and push commit plus tags.
    fn publish(
        &self,
        app: &str,
        attempt: &StampAttempt,
        commit: &str,
        created_tags: &mut Vec<String>,
    ) -> Result<VersionRecord> {
        let tag_name = TagName::for_app(
            app,
            attempt.version,
            attempt
                .counter
                .map(|n| (attempt.prerelease.label().to_string(), n)),
        );
        let tag_string = tag_name.serialize();
        // Grammar round-trip check: a failure here is a template/config bug,
        // not a race, and aborts the whole stamp.
        match TagName::parse(&tag_string) {
            Ok(parsed) if parsed == tag_name => {}
            _ => {
                return Err(VerstampError::format(format!(
                    "Computed tag name '{}' fails grammar validation",
                    tag_string
                )));
            }
        }

        // The record in the tag message carries the stamp commit itself as
        // the self changeset, which is what makes re-stamps idempotent.
        let mut record = attempt.record.clone();
        if let Some(own) = record.changesets.get_mut(".") {
            own.hash = commit.to_string();
        }

        let message = TagMessage::for_app(record.clone()).to_json()?;
        self.backend.create_tag(&tag_string, &message, None, false)?;
        created_tags.push(tag_string.clone());

        let mut push_tags = vec![tag_string.clone()];
        if let Some((root_name, root_record)) = &attempt.root_part {
            let root_tag = root_name.serialize();
            let root_message = TagMessage::for_root(root_record.clone()).to_json()?;
            self.backend
                .create_tag(&root_tag, &root_message, None, false)?;
            created_tags.push(root_tag.clone());
            push_tags.push(root_tag);
        }

        let branch = self.backend.active_branch()?;
        let moving = tag::moving_tag_name(app, &branch);
        self.backend
            .create_tag(&moving, &tag_string, None, true)?;
        created_tags.push(moving.clone());
        let force_tags = vec![moving];

        self.backend.push(&push_tags, &force_tags)?;
        self.verify_pushed(&push_tags, &force_tags)?;
        Ok(record)
    }

    /// Post-push re-check: a push can fail empty in partial-failure backend
    /// states. Bounded re-push with a short jittered sleep, then fatal.
    fn verify_pushed(&self, tags: &[String], force_tags: &[String]) -> Result<()> {
        for check in 0..MAX_OUTGOING_CHECKS {
            if !self.backend.has_outgoing_changes()? {
                return Ok(());
            }
            self.reporter.warn(&format!(
                "unexpected outgoing changes after push (check {}); re-pushing",
                check + 1
            ));
            std::thread::sleep(std::time::Duration::from_millis(jitter_ms()));
            self.backend.push(tags, force_tags)?;
        }
        if self.backend.has_outgoing_changes()? {
            return Err(VerstampError::backend(
                "outgoing changes persist after repeated pushes",
            ));
        }
        Ok(())
    }

    /// Undo the local commit and any tags created during a failed attempt.
    fn revert(&self, prior: &str, created_tags: &[String]) {
        for tag in created_tags {
            if let Err(e) = self.backend.delete_tag(tag) {
                self.reporter
                    .warn(&format!("could not delete local tag {}: {}", tag, e));
            }
        }
        if let Err(e) = self.backend.reset_to(prior) {
            self.reporter
                .error(&format!("could not revert to {}: {}", prior, e));
        }
    }

    /// Promote an existing prerelease record to a release at the same commit.
    pub fn release(&self, app: &str, version: Option<&str>) -> Result<VersionRecord> {
        config::load_app_config(self.root, app)?;
        let ledger = Ledger::new(self.backend);

        let (name, record) = match version {
            Some(v) => ledger.record_for_version(app, v)?.ok_or_else(|| {
                VerstampError::precondition(format!("No stamped version '{}' for {}", v, app))
            })?,
            None => ledger
                .first_reachable_record(app, TagScope::Position)?
                .ok_or_else(|| {
                    VerstampError::precondition(format!("No stamped version reachable for {}", app))
                })?,
        };

        if name.buildmetadata.is_some() {
            return Err(VerstampError::precondition(
                "Buildmetadata versions cannot be released",
            ));
        }
        if name.is_release() {
            return Err(VerstampError::precondition(format!(
                "{} is already a release",
                record.version
            )));
        }

        let release_name = TagName::for_app(app, name.version, None);
        let release_tag = release_name.serialize();
        if self.backend.tag_entry(&release_tag)?.is_some() {
            return Err(VerstampError::precondition(format!(
                "{} already exists",
                release_tag
            )));
        }

        let source = self
            .backend
            .tag_entry(&name.serialize())?
            .ok_or_else(|| VerstampError::backend("Source tag disappeared during release"))?;

        let mut released = record;
        released.version = release_name.version_string();
        released.prerelease = RELEASE_SENTINEL.to_string();

        let message = TagMessage::for_app(released.clone()).to_json()?;
        self.backend
            .create_tag(&release_tag, &message, Some(&source.target), false)?;

        if let Err(e) = self.backend.push(&[release_tag.clone()], &[]) {
            let _ = self.backend.delete_tag(&release_tag);
            return Err(e);
        }
        self.reporter
            .info(&format!("released {} as {}", app, released.version));
        Ok(released)
    }

    /// Layer a buildmetadata record on an existing version. Idempotent for
    /// identical metadata; different content under the same metadata tag is
    /// a conflict. Dirty dependencies are tolerated.
    pub fn add_metadata(
        &self,
        app: &str,
        version: Option<&str>,
        metadata: &str,
    ) -> Result<VersionRecord> {
        config::load_app_config(self.root, app)?;
        let valid = Regex::new(r"^[0-9A-Za-z.-]+$").expect("metadata regex is valid");
        if !valid.is_match(metadata) {
            return Err(VerstampError::format(format!(
                "Invalid buildmetadata '{}': must match [0-9A-Za-z-.]+",
                metadata
            )));
        }

        let ledger = Ledger::new(self.backend);
        let (name, record) = match version {
            Some(v) => ledger.record_for_version(app, v)?.ok_or_else(|| {
                VerstampError::precondition(format!("No stamped version '{}' for {}", v, app))
            })?,
            None => ledger
                .first_reachable_record(app, TagScope::Position)?
                .ok_or_else(|| {
                    VerstampError::precondition(format!("No stamped version reachable for {}", app))
                })?,
        };
        if name.buildmetadata.is_some() {
            return Err(VerstampError::precondition(
                "Cannot layer buildmetadata on a buildmetadata version",
            ));
        }

        let mut derived_name = name.clone();
        derived_name.buildmetadata = Some(metadata.to_string());
        let derived_tag = derived_name.serialize();

        let source = self
            .backend
            .tag_entry(&name.serialize())?
            .ok_or_else(|| VerstampError::backend("Source tag disappeared during add"))?;

        let mut derived = record;
        derived.version = derived_name.version_string();

        if let Some(existing) = self.backend.tag_entry(&derived_tag)? {
            let same_target = existing.target == source.target;
            let same_record = existing
                .message
                .as_deref()
                .and_then(|raw| TagMessage::from_json(raw).ok())
                .and_then(|m| m.app)
                .is_some_and(|r| r.version == derived.version);
            if same_target && same_record {
                self.reporter
                    .info(&format!("{} already carries this metadata", derived.version));
                return Ok(derived);
            }
            return Err(VerstampError::Consistency(vec![format!(
                "{}: different metadata already recorded under this tag",
                derived_tag
            )]));
        }

        let message = TagMessage::for_app(derived.clone()).to_json()?;
        self.backend
            .create_tag(&derived_tag, &message, Some(&source.target), false)?;
        if let Err(e) = self.backend.push(&[derived_tag.clone()], &[]) {
            let _ = self.backend.delete_tag(&derived_tag);
            return Err(e);
        }
        self.reporter
            .info(&format!("added metadata: {} {}", app, derived.version));
        Ok(derived)
    }
}

fn jitter_ms() -> u64 {
    // Clock-derived jitter; good enough to de-synchronize racing retries.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    100 + u64::from(nanos % 300)
}
