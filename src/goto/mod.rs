//! The time-travel orchestrator.
//!
//! `goto` reconstructs the exact multi-repository state a ledger record
//! describes: phase 1 clones missing dependency repositories, phase 2 pulls
//! and checks out the recorded changesets; both phases run on a bounded
//! worker pool since each repository's I/O is independent. A failed
//! repository never short-circuits its siblings; every item produces a
//! [SyncOutcome] and the aggregated failures are raised once, at the end,
//! after everything that could succeed has.

use crate::backend::{clone_repository, open_backend, CheckoutTarget, VersionControlBackend};
use crate::config::{self, AppConfig, DependencyPin};
use crate::domain::record::VersionRecord;
use crate::domain::tag::{RootTagName, TagName};
use crate::error::{Result, VerstampError};
use crate::backend::{TagScope, VcsType};
use crate::ledger::Ledger;
use crate::ui::Reporter;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Cap on concurrently syncing repositories.
pub const MAX_SYNC_WORKERS: usize = 20;

/// Parameters of one goto invocation.
#[derive(Debug, Clone)]
pub struct GotoRequest<'a> {
    pub app: &'a str,
    /// Version to reconstruct; `None` sends every repo to its configured tip.
    pub version: Option<&'a str>,
    /// Interpret `app` as a root app and `version` as its integer counter.
    pub root: bool,
    /// Leave the self repository untouched.
    pub deps_only: bool,
    pub pull: bool,
}

/// Per-repository result record; the pool always drains fully.
#[derive(Debug)]
pub struct SyncOutcome {
    pub path: String,
    pub error: Option<String>,
}

/// What one dependency should end up on. `checkout: None` means "track the
/// default branch tip": the pull fast-forwards and nothing is switched.
#[derive(Debug, Clone)]
struct DepTarget {
    path: String,
    vcs_type: VcsType,
    remote: String,
    checkout: Option<CheckoutTarget>,
}

pub struct Goto<'a> {
    root: &'a Path,
    backend: &'a dyn VersionControlBackend,
    reporter: &'a Reporter,
}

impl<'a> Goto<'a> {
    pub fn new(
        root: &'a Path,
        backend: &'a dyn VersionControlBackend,
        reporter: &'a Reporter,
    ) -> Self {
        Goto {
            root,
            backend,
            reporter,
        }
    }

    /// Run the orchestrator; returns the human-readable destination.
    pub fn run(&self, req: &GotoRequest<'_>) -> Result<String> {
        // Root apps have no conf.toml of their own; the resolved record
        // drives everything there.
        let config = if req.root {
            AppConfig::default()
        } else {
            config::load_app_config(self.root, req.app)?
        };

        if req.pull {
            self.reporter.detail("pulling before goto");
            self.backend.pull()?;
        }

        let plan = self.resolve(req, &config)?;
        let mut failures = Vec::new();
        let mut failed_clones: Vec<String> = Vec::new();

        // Phase 1: clone what is missing, in parallel.
        let missing: Vec<&DepTarget> = plan
            .deps
            .iter()
            .filter(|t| !self.root.join(&t.path).exists())
            .collect();
        if !missing.is_empty() {
            self.reporter
                .info(&format!("cloning {} missing repositories", missing.len()));
            let outcomes = bounded_pool(missing.len())?.install(|| {
                missing
                    .par_iter()
                    .map(|target| self.clone_one(target))
                    .collect::<Vec<SyncOutcome>>()
            });
            for outcome in outcomes {
                if let Some(err) = outcome.error {
                    failures.push(format!("{}: {}", outcome.path, err));
                    failed_clones.push(outcome.path);
                }
            }
        }

        // Phase 2: pull and check out every dependency whose clone exists,
        // in parallel. Repos that failed phase 1 are already reported.
        let to_sync: Vec<&DepTarget> = plan
            .deps
            .iter()
            .filter(|t| !failed_clones.contains(&t.path))
            .collect();
        if !to_sync.is_empty() {
            let outcomes = bounded_pool(to_sync.len())?.install(|| {
                to_sync
                    .par_iter()
                    .map(|target| self.checkout_one(target))
                    .collect::<Vec<SyncOutcome>>()
            });
            for outcome in outcomes {
                if let Some(err) = outcome.error {
                    failures.push(format!("{}: {}", outcome.path, err));
                } else {
                    self.reporter.detail(&format!("{}: in sync", outcome.path));
                }
            }
        }

        // The self repository last, so aggregate reporting happens from a
        // predictable position.
        if !req.deps_only {
            if let Err(e) = self.move_self(&plan) {
                failures.push(format!(".: {}", e));
            }
        }

        if !failures.is_empty() {
            return Err(VerstampError::Partial(failures));
        }
        Ok(plan.summary)
    }

    fn resolve(&self, req: &GotoRequest<'_>, config: &AppConfig) -> Result<GotoPlan> {
        let ledger = Ledger::new(self.backend);

        if req.root {
            let record = self.resolve_root(req, &ledger)?;
            return Ok(plan_from_record(record));
        }

        match req.version {
            Some(version) => {
                let record = self.resolve_version(req.app, version, &ledger)?;
                Ok(plan_from_record(record))
            }
            None => {
                // No version: every dependency goes to its configured pin,
                // the self repo to its tracking branch tip.
                let deps = config
                    .deps
                    .iter()
                    .map(|(path, pin)| DepTarget {
                        path: path.clone(),
                        vcs_type: pin.vcs_type,
                        remote: pin.remote.clone(),
                        checkout: pin_target(pin),

                    })
                    .collect();
                let tip_version = ledger
                    .first_reachable_record(req.app, TagScope::Branch)?
                    .map(|(_, record)| record.version)
                    .unwrap_or_else(|| "unstamped".to_string());
                Ok(GotoPlan {
                    deps,
                    self_target: Some(SelfTarget::BranchTip),
                    summary: format!("at the tip of version {}", tip_version),
                })
            }
        }
    }

    /// Resolve `version` (optionally `+<partial-hash>` qualified) to its
    /// record. A full match including metadata wins over the unique-id
    /// reading of the `+` suffix.
    fn resolve_version(
        &self,
        app: &str,
        version: &str,
        ledger: &Ledger<'_>,
    ) -> Result<VersionRecord> {
        if let Some((_, record)) = ledger.record_for_version(app, version)? {
            return Ok(record);
        }
        if let Some((core, partial)) = version.split_once('+') {
            if let Some((_, record)) = ledger.record_for_version(app, core)? {
                let self_hash = record.self_changeset().unwrap_or_default();
                if !self_hash.starts_with(partial) {
                    return Err(VerstampError::precondition(format!(
                        "Version {} does not match unique id '{}'",
                        core, partial
                    )));
                }
                return Ok(record);
            }
        }
        Err(VerstampError::precondition(format!(
            "No stamped version '{}' for {}",
            version, app
        )))
    }

    fn resolve_root(&self, req: &GotoRequest<'_>, ledger: &Ledger<'_>) -> Result<VersionRecord> {
        let root_name = match req.version {
            Some(raw) => {
                let counter: u64 = raw.parse().map_err(|_| {
                    VerstampError::version(format!("Invalid root version: '{}'", raw))
                })?;
                let name = RootTagName::for_root(req.app, counter);
                if self.backend.tag_entry(&name.serialize())?.is_none() {
                    return Err(VerstampError::precondition(format!(
                        "No root version {} for {}",
                        counter, req.app
                    )));
                }
                name
            }
            None => {
                let (name, _) = ledger.latest_root_record(req.app)?.ok_or_else(|| {
                    VerstampError::precondition(format!("No root versions for {}", req.app))
                })?;
                name
            }
        };

        // The app record stamped in the same transaction is a brother tag of
        // the root tag; its changesets drive the reconstruction.
        for brother in ledger.brother_tags(&root_name.serialize())? {
            if TagName::parse(&brother).is_err() {
                continue;
            }
            if let Some((_, message)) = ledger.record_for_tag(&brother)? {
                if let Some(record) = message.app {
                    return Ok(record);
                }
            }
        }
        Err(VerstampError::precondition(format!(
            "Root version of {} has no app record at its commit",
            req.app
        )))
    }

    fn clone_one(&self, target: &DepTarget) -> SyncOutcome {
        let dest = self.root.join(&target.path);

        // A remote that is itself a local relative path already realized on
        // disk needs no clone.
        if !target.remote.contains("://") && !target.remote.contains('@') {
            let local_remote = self.root.join(&target.remote);
            if local_remote == dest && local_remote.exists() {
                self.reporter
                    .detail(&format!("{}: local remote already realized", target.path));
                return SyncOutcome {
                    path: target.path.clone(),
                    error: None,
                };
            }
        }

        match clone_repository(target.vcs_type, &target.remote, &dest) {
            Ok(()) => SyncOutcome {
                path: target.path.clone(),
                error: None,
            },
            Err(e) => SyncOutcome {
                path: target.path.clone(),
                error: Some(format!("clone failed: {}", e)),
            },
        }
    }

    fn checkout_one(&self, target: &DepTarget) -> SyncOutcome {
        let outcome = |error: Option<String>| SyncOutcome {
            path: target.path.clone(),
            error,
        };
        let dest = self.root.join(&target.path);
        let dep = match open_backend(&dest) {
            Ok(dep) => dep,
            Err(e) => return outcome(Some(e.to_string())),
        };

        // Pending or outgoing work means this repo is left untouched.
        match (dep.has_pending_changes(), dep.has_outgoing_changes()) {
            (Ok(false), Ok(false)) => {}
            (Ok(true), _) => {
                return outcome(Some("uncommitted local changes; left untouched".to_string()))
            }
            (_, Ok(true)) => {
                return outcome(Some("unpushed local commits; left untouched".to_string()))
            }
            (Err(e), _) | (_, Err(e)) => return outcome(Some(e.to_string())),
        }

        if let Err(e) = dep.pull() {
            return outcome(Some(format!("pull failed: {}", e)));
        }
        let checkout = match &target.checkout {
            Some(checkout) => checkout.clone(),
            // Unpinned dependencies go to the default branch tip.
            None => match dep.default_branch() {
                Ok(branch) => CheckoutTarget::Branch(branch),
                Err(e) => return outcome(Some(e.to_string())),
            },
        };
        if let Err(e) = dep.checkout(&checkout) {
            return outcome(Some(format!("checkout failed: {}", e)));
        }
        outcome(None)
    }

    fn move_self(&self, plan: &GotoPlan) -> Result<()> {
        let Some(target) = &plan.self_target else {
            return Ok(());
        };
        if self.backend.has_pending_changes()? {
            return Err(VerstampError::precondition(
                "uncommitted local changes; left untouched",
            ));
        }
        match target {
            SelfTarget::Revision(hash) => self
                .backend
                .checkout(&CheckoutTarget::Revision(hash.clone())),
            SelfTarget::BranchTip => {
                // A previous goto may have left HEAD detached.
                let branch = if self.backend.is_detached_head()? {
                    self.backend.default_branch()?
                } else {
                    self.backend.active_branch()?
                };
                self.backend.pull()?;
                self.backend.checkout(&CheckoutTarget::Branch(branch))
            }
        }
    }
}

#[derive(Debug)]
enum SelfTarget {
    Revision(String),
    BranchTip,
}

#[derive(Debug)]
struct GotoPlan {
    deps: Vec<DepTarget>,
    self_target: Option<SelfTarget>,
    summary: String,
}

fn pin_target(pin: &DependencyPin) -> Option<CheckoutTarget> {
    if let Some(hash) = &pin.hash {
        Some(CheckoutTarget::Revision(hash.clone()))
    } else if let Some(tag) = &pin.tag {
        Some(CheckoutTarget::Tag(tag.clone()))
    } else {
        pin.branch.clone().map(CheckoutTarget::Branch)
    }
}

fn plan_from_record(record: VersionRecord) -> GotoPlan {
    let self_hash = record.self_changeset().map(str::to_string);
    let deps = record
        .changesets
        .iter()
        .filter(|(path, _)| path.as_str() != ".")
        .map(|(path, snapshot)| DepTarget {
            path: path.clone(),
            vcs_type: snapshot.vcs_type,
            remote: snapshot.remote.clone(),
            checkout: Some(CheckoutTarget::Revision(snapshot.hash.clone())),
        })
        .collect();
    GotoPlan {
        deps,
        self_target: self_hash.map(SelfTarget::Revision),
        summary: format!("at version {}", record.version),
    }
}

fn bounded_pool(items: usize) -> Result<rayon::ThreadPool> {
    let threads = items.clamp(1, MAX_SYNC_WORKERS);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| VerstampError::backend(format!("Cannot build worker pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::domain::record::{ChangesetRecord, TagMessage};
    use crate::domain::RELEASE_SENTINEL;
    use std::collections::BTreeMap;

    fn record_with_dep(self_hash: &str, dep_hash: &str) -> VersionRecord {
        VersionRecord {
            app_name: "svc".to_string(),
            version: "0.0.1".to_string(),
            base_version: "0.0.1".to_string(),
            prerelease: RELEASE_SENTINEL.to_string(),
            prerelease_counters: BTreeMap::new(),
            release_mode: None,
            previous_version: None,
            changesets: BTreeMap::from([
                (
                    ".".to_string(),
                    ChangesetRecord {
                        hash: self_hash.to_string(),
                        vcs_type: VcsType::Git,
                        remote: "mock://origin".to_string(),
                    },
                ),
                (
                    "../lib-a".to_string(),
                    ChangesetRecord {
                        hash: dep_hash.to_string(),
                        vcs_type: VcsType::Git,
                        remote: "mock://lib-a".to_string(),
                    },
                ),
            ]),
            info: BTreeMap::new(),
            stamped_on_branch: "main".to_string(),
        }
    }

    #[test]
    fn test_plan_from_record_excludes_self() {
        let plan = plan_from_record(record_with_dep("a", "b"));
        assert_eq!(plan.deps.len(), 1);
        assert_eq!(plan.deps[0].path, "../lib-a");
        assert!(matches!(
            plan.deps[0].checkout,
            Some(CheckoutTarget::Revision(ref h)) if h == "b"
        ));
        assert!(matches!(plan.self_target, Some(SelfTarget::Revision(ref h)) if h == "a"));
    }

    #[test]
    fn test_pin_target_precedence() {
        let mut pin = DependencyPin {
            vcs_type: VcsType::Git,
            remote: "r".to_string(),
            branch: Some("main".to_string()),
            tag: None,
            hash: None,
        };
        assert!(matches!(pin_target(&pin), Some(CheckoutTarget::Branch(_))));
        pin.tag = Some("v1".to_string());
        assert!(matches!(pin_target(&pin), Some(CheckoutTarget::Tag(_))));
        pin.hash = Some("abc".to_string());
        assert!(matches!(pin_target(&pin), Some(CheckoutTarget::Revision(_))));
        let unpinned = DependencyPin {
            vcs_type: VcsType::Git,
            remote: "r".to_string(),
            branch: None,
            tag: None,
            hash: None,
        };
        assert!(pin_target(&unpinned).is_none());
    }

    #[test]
    fn test_resolve_version_with_unique_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_root(dir.path());
        let self_hash = backend.changeset(None).unwrap();
        let record = record_with_dep(&self_hash, &"b".repeat(40));
        backend
            .create_tag(
                "svc_0.0.1",
                &TagMessage::for_app(record).to_json().unwrap(),
                None,
                false,
            )
            .unwrap();

        let reporter = Reporter::new(false);
        let goto = Goto::new(dir.path(), &backend, &reporter);
        let ledger = Ledger::new(&backend);

        // Matching unique id passes; a wrong one is a precondition error.
        let ok = goto
            .resolve_version("svc", &format!("0.0.1+{}", &self_hash[..8]), &ledger)
            .unwrap();
        assert_eq!(ok.version, "0.0.1");
        assert!(goto
            .resolve_version("svc", "0.0.1+deadbeef", &ledger)
            .is_err());
        assert!(goto.resolve_version("svc", "9.9.9", &ledger).is_err());
    }
}
