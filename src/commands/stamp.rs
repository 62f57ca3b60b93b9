//! `verstamp stamp`: compute and publish the next version.

use crate::commands::Context;
use crate::domain::version::ReleaseMode;
use crate::error::{Result, VerstampError};
use crate::stamp::{FatalKind, StampOutcome, StampRequest, Stamper};

pub struct StampArgs<'a> {
    pub app: &'a str,
    pub mode: ReleaseMode,
    pub prerelease: Option<&'a str>,
    pub pull: bool,
    pub dry_run: bool,
}

pub fn run(ctx: &Context, args: &StampArgs<'_>) -> Result<()> {
    ctx.require_tracked()?;
    let stamper = Stamper::new(&ctx.root, ctx.backend.as_ref(), &ctx.reporter);
    let outcome = stamper.stamp(&StampRequest {
        app: args.app,
        mode: args.mode,
        prerelease: args.prerelease,
        pull: args.pull,
        dry_run: args.dry_run,
    })?;

    match outcome {
        StampOutcome::Success(record) => {
            ctx.reporter.plain(&record.version);
            Ok(())
        }
        StampOutcome::RaceExhausted => Err(VerstampError::race(format!(
            "failed to stamp {}: lost the publish race on every attempt",
            args.app
        ))),
        StampOutcome::Fatal { kind, reason } => Err(match kind {
            FatalKind::Format => VerstampError::Format(reason),
            FatalKind::Commit => VerstampError::backend(reason),
        }),
    }
}
