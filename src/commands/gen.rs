//! `verstamp gen`: render an output file from a version template.
//!
//! The template engine proper is out of scope; this is the narrow boundary
//! consumer performing plain placeholder substitution over the stamped
//! record.

use crate::backend::TagScope;
use crate::commands::Context;
use crate::config;
use crate::domain::record::VersionRecord;
use crate::error::{Result, VerstampError};
use crate::ledger::Ledger;
use crate::state::Tracker;
use std::fs;
use std::path::Path;

pub struct GenArgs<'a> {
    pub app: &'a str,
    pub template: &'a Path,
    pub output: &'a Path,
    pub version: Option<&'a str>,
    pub verify_version: bool,
}

pub fn run(ctx: &Context, args: &GenArgs<'_>) -> Result<()> {
    ctx.require_tracked()?;

    let app_config = config::load_app_config(&ctx.root, args.app)?;
    let report = Tracker::new(ctx.backend.as_ref(), &ctx.reporter).evaluate(args.app, &app_config)?;

    let ledger = Ledger::new(ctx.backend.as_ref());
    let record = match args.version {
        Some(version) => ledger
            .record_for_version(args.app, version)?
            .map(|(_, record)| record)
            .ok_or_else(|| {
                VerstampError::precondition(format!(
                    "No stamped version '{}' for {}",
                    version, args.app
                ))
            })?,
        None => match &report.matched {
            Some((_, record)) => record.clone(),
            None => ledger
                .first_reachable_record(args.app, TagScope::Position)?
                .map(|(_, record)| record)
                .ok_or_else(|| {
                    VerstampError::precondition(format!(
                        "No stamped version reachable for {}",
                        args.app
                    ))
                })?,
        },
    };

    if args.verify_version {
        match &report.matched {
            Some((_, matched)) if matched.version == record.version => {}
            _ => {
                return Err(VerstampError::Consistency(vec![format!(
                    "working tree is not exactly at version {}",
                    record.version
                )]));
            }
        }
    }

    let rendered = render(&fs::read_to_string(args.template)?, &record)?;
    fs::write(args.output, rendered)?;
    ctx.reporter
        .info(&format!("generated {}", args.output.display()));
    Ok(())
}

fn render(template: &str, record: &VersionRecord) -> Result<String> {
    Ok(template
        .replace("{version}", &record.version)
        .replace("{base_version}", &record.base_version)
        .replace("{prerelease}", &record.prerelease)
        .replace("{changesets}", &serde_json::to_string_pretty(&record.changesets)?))
}
