//! `verstamp add`: attach buildmetadata to an existing stamped version.

use crate::commands::Context;
use crate::error::Result;
use crate::stamp::Stamper;

pub fn run(ctx: &Context, app: &str, buildmetadata: &str, version: Option<&str>) -> Result<()> {
    ctx.require_tracked()?;
    let stamper = Stamper::new(&ctx.root, ctx.backend.as_ref(), &ctx.reporter);
    let record = stamper.add_metadata(app, version, buildmetadata)?;
    ctx.reporter.plain(&record.version);
    Ok(())
}
