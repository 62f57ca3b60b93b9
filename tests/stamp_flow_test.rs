//! End-to-end stamping flows against real git repositories.

mod common;

use common::*;
use verstamp::backend::{GitBackend, TagScope, VersionControlBackend};
use verstamp::commands::{self, Context};
use verstamp::domain::version::ReleaseMode;
use verstamp::ledger::Ledger;

fn stamp_args<'a>(app: &'a str, mode: ReleaseMode, prerelease: Option<&'a str>) -> commands::stamp::StampArgs<'a> {
    commands::stamp::StampArgs {
        app,
        mode,
        prerelease,
        pull: false,
        dry_run: false,
    }
}

fn tracked_workspace(base: &std::path::Path, app: &str) -> (std::path::PathBuf, std::path::PathBuf, Context) {
    let (work, origin) = repo_with_origin(base, "app");
    let ctx = Context::open(Some(&work), false).unwrap();
    commands::init::run(&ctx).unwrap();
    commands::init_app::run(&ctx, app, Some("0.0.0")).unwrap();
    (work, origin, ctx)
}

#[test]
fn init_is_one_time_only() {
    let tmp = tempfile::tempdir().unwrap();
    let (work, _origin) = repo_with_origin(tmp.path(), "app");
    let ctx = Context::open(Some(&work), false).unwrap();
    commands::init::run(&ctx).unwrap();
    assert!(commands::init::run(&ctx).is_err());
}

#[test]
fn stamp_patch_then_idempotent_restamp() {
    let tmp = tempfile::tempdir().unwrap();
    let (work, origin, ctx) = tracked_workspace(tmp.path(), "test_app");

    commands::stamp::run(&ctx, &stamp_args("test_app", ReleaseMode::Patch, None)).unwrap();

    let backend = GitBackend::open(&work).unwrap();
    let ledger = Ledger::new(&backend);
    let (name, record) = ledger
        .first_reachable_record("test_app", TagScope::Position)
        .unwrap()
        .unwrap();
    assert_eq!(record.version, "0.0.1");
    assert_eq!(name.serialize(), "test_app_0.0.1");
    // The record's self changeset is the stamp commit at HEAD.
    assert_eq!(record.self_changeset().unwrap(), head_of(&work));

    // Tag and branch arrived at the origin.
    let origin_repo = git2::Repository::open(&origin).unwrap();
    assert!(origin_repo
        .find_reference("refs/tags/test_app_0.0.1")
        .is_ok());

    // Re-stamping with no changes is idempotent.
    commands::stamp::run(&ctx, &stamp_args("test_app", ReleaseMode::Patch, None)).unwrap();
    let backend = GitBackend::open(&work).unwrap();
    let ledger = Ledger::new(&backend);
    assert!(ledger
        .record_for_version("test_app", "0.0.2")
        .unwrap()
        .is_none());
    assert_eq!(
        ledger
            .first_reachable_record("test_app", TagScope::Position)
            .unwrap()
            .unwrap()
            .1
            .version,
        "0.0.1"
    );
}

#[test]
fn prerelease_cycle_counts_up_then_releases() {
    let tmp = tempfile::tempdir().unwrap();
    let (work, _origin, ctx) = tracked_workspace(tmp.path(), "svc");

    commands::stamp::run(&ctx, &stamp_args("svc", ReleaseMode::Minor, Some("rc"))).unwrap();
    {
        let backend = GitBackend::open(&work).unwrap();
        let ledger = Ledger::new(&backend);
        let (_, record) = ledger
            .first_reachable_record("svc", TagScope::Position)
            .unwrap()
            .unwrap();
        assert_eq!(record.version, "0.1.0-rc1");
        assert_eq!(record.prerelease, "rc");
        assert_eq!(record.prerelease_counters["rc"], 1);
    }

    // An intervening commit bumps only the counter.
    commit_file(&work, "feature.txt", "work\n", "feature work");
    commands::stamp::run(&ctx, &stamp_args("svc", ReleaseMode::Minor, Some("rc"))).unwrap();
    {
        let backend = GitBackend::open(&work).unwrap();
        let ledger = Ledger::new(&backend);
        let (_, record) = ledger
            .first_reachable_record("svc", TagScope::Position)
            .unwrap()
            .unwrap();
        assert_eq!(record.version, "0.1.0-rc2");
    }

    commands::release::run(&ctx, "svc", Some("0.1.0-rc2")).unwrap();
    let backend = GitBackend::open(&work).unwrap();
    let ledger = Ledger::new(&backend);
    let (name, record) = ledger
        .first_reachable_record("svc", TagScope::Position)
        .unwrap()
        .unwrap();
    assert_eq!(record.version, "0.1.0");
    assert_eq!(record.prerelease, "release");
    // The release tag and the rc tag are brothers at the same commit.
    let brothers = ledger.brother_tags(&name.serialize()).unwrap();
    assert!(brothers.contains(&"svc_0.1.0-rc2".to_string()));
}

#[test]
fn buildmetadata_layers_on_existing_version() {
    let tmp = tempfile::tempdir().unwrap();
    let (work, _origin, ctx) = tracked_workspace(tmp.path(), "svc");
    commands::stamp::run(&ctx, &stamp_args("svc", ReleaseMode::Patch, None)).unwrap();

    commands::add::run(&ctx, "svc", "build.17", Some("0.0.1")).unwrap();
    // Idempotent for identical metadata.
    commands::add::run(&ctx, "svc", "build.17", Some("0.0.1")).unwrap();

    let backend = GitBackend::open(&work).unwrap();
    let entry = backend.tag_entry("svc_0.0.1+build.17").unwrap().unwrap();
    let base = backend.tag_entry("svc_0.0.1").unwrap().unwrap();
    // The derived record is a brother of its base, never a new commit.
    assert_eq!(entry.target, base.target);

    // Releasing a metadata version is refused.
    assert!(commands::release::run(&ctx, "svc", Some("0.0.1+build.17")).is_err());
}

#[test]
fn stamp_refuses_untracked_app() {
    let tmp = tempfile::tempdir().unwrap();
    let (work, _origin) = repo_with_origin(tmp.path(), "app");
    let ctx = Context::open(Some(&work), false).unwrap();
    commands::init::run(&ctx).unwrap();
    assert!(commands::stamp::run(&ctx, &stamp_args("ghost", ReleaseMode::Patch, None)).is_err());
}
