//! `verstamp release`: promote a stamped prerelease to a release.

use crate::commands::Context;
use crate::error::Result;
use crate::stamp::Stamper;

pub fn run(ctx: &Context, app: &str, version: Option<&str>) -> Result<()> {
    ctx.require_tracked()?;
    let stamper = Stamper::new(&ctx.root, ctx.backend.as_ref(), &ctx.reporter);
    let record = stamper.release(app, version)?;
    ctx.reporter.plain(&record.version);
    Ok(())
}
