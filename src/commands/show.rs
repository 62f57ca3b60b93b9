//! `verstamp show`: display the stamped version of an app.

use crate::backend::TagScope;
use crate::commands::Context;
use crate::config;
use crate::domain::record::{TagMessage, VersionRecord};
use crate::domain::tag::{format_with_template, DEFAULT_TEMPLATE};
use crate::error::{Result, VerstampError};
use crate::ledger::Ledger;
use crate::state::Tracker;

#[derive(Debug, Default, Clone)]
pub struct ShowArgs<'a> {
    pub app: &'a str,
    pub verbose: bool,
    pub raw: bool,
    pub root: bool,
    pub from_file: bool,
    pub ignore_dirty: bool,
    pub unique: bool,
    pub type_only: bool,
}

pub fn run(ctx: &Context, args: &ShowArgs<'_>) -> Result<()> {
    ctx.require_tracked()?;

    if args.root {
        return show_root(ctx, args);
    }
    if args.from_file {
        let state = config::load_version_state(&ctx.root, args.app)?;
        if args.type_only {
            ctx.reporter.plain(version_type(&state.prerelease));
        } else {
            ctx.reporter.plain(&state.version_to_stamp_from);
        }
        return Ok(());
    }

    let record = resolve_record(ctx, args)?;

    if args.raw {
        ctx.reporter
            .plain(&TagMessage::for_app(record).to_json()?);
        return Ok(());
    }
    if args.type_only {
        ctx.reporter.plain(version_type(&record.prerelease));
        return Ok(());
    }
    if args.unique {
        let short: String = record
            .self_changeset()
            .unwrap_or_default()
            .chars()
            .take(8)
            .collect();
        ctx.reporter.plain(&format!("{}+{}", record.version, short));
        return Ok(());
    }
    if args.verbose {
        ctx.reporter.plain(&serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    ctx.reporter.plain(&display_version(ctx, &record)?);
    Ok(())
}

/// The matched record when the tree sits exactly on a stamp, otherwise the
/// newest reachable one (with a warning, unless dirtiness is ignored).
fn resolve_record(ctx: &Context, args: &ShowArgs<'_>) -> Result<VersionRecord> {
    let ledger = Ledger::new(ctx.backend.as_ref());
    if args.ignore_dirty {
        // Try the per-branch index first; fall back to the full scan.
        if let Ok(branch) = ctx.backend.active_branch() {
            if let Some((_, record)) = ledger.branch_index_record(args.app, &branch)? {
                return Ok(record);
            }
        }
        return ledger
            .first_reachable_record(args.app, TagScope::Position)?
            .map(|(_, record)| record)
            .ok_or_else(|| no_version(args.app));
    }

    let app_config = config::load_app_config(&ctx.root, args.app)?;
    let report = Tracker::new(ctx.backend.as_ref(), &ctx.reporter).evaluate(args.app, &app_config)?;
    if let Some((_, record)) = report.matched {
        return Ok(record);
    }

    for problem in &report.dirty_deps {
        ctx.reporter.warn(problem);
    }
    for problem in report.self_flags.problems(".") {
        ctx.reporter.warn(&problem);
    }
    ctx.reporter
        .warn("working tree does not exactly match any stamped version (modified)");

    ledger
        .first_reachable_record(args.app, TagScope::Position)?
        .map(|(_, record)| record)
        .ok_or_else(|| no_version(args.app))
}

fn show_root(ctx: &Context, args: &ShowArgs<'_>) -> Result<()> {
    let ledger = Ledger::new(ctx.backend.as_ref());
    let (_, record) = ledger
        .latest_root_record(args.app)?
        .ok_or_else(|| no_version(args.app))?;
    if args.raw || args.verbose {
        ctx.reporter
            .plain(&serde_json::to_string_pretty(&record)?);
    } else {
        ctx.reporter.plain(&record.version.to_string());
    }
    Ok(())
}

/// Render through the app's template, falling back to the default template
/// (with a warning) when the configured one is malformed.
fn display_version(ctx: &Context, record: &VersionRecord) -> Result<String> {
    let app_config = config::load_app_config(&ctx.root, &record.app_name)?;
    let number = record.version_number()?;
    let label = if record.is_release() {
        None
    } else {
        let count = record
            .prerelease_counters
            .get(&record.prerelease)
            .copied()
            .unwrap_or(1);
        Some((record.prerelease.as_str(), count))
    };

    match format_with_template(&app_config.template, &number, label) {
        Ok(rendered) => Ok(rendered),
        Err(e) => {
            ctx.reporter
                .warn(&format!("template invalid, using default: {}", e));
            format_with_template(DEFAULT_TEMPLATE, &number, label)
        }
    }
}

fn version_type(prerelease: &str) -> &'static str {
    if prerelease == crate::domain::RELEASE_SENTINEL {
        "release"
    } else {
        "prerelease"
    }
}

fn no_version(app: &str) -> VerstampError {
    VerstampError::precondition(format!("No stamped version reachable for {}", app))
}
