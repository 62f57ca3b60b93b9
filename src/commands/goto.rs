//! `verstamp goto`: reconstruct the multi-repository state of a version.

use crate::commands::Context;
use crate::error::Result;
use crate::goto::{Goto, GotoRequest};

pub struct GotoArgs<'a> {
    pub app: &'a str,
    pub version: Option<&'a str>,
    pub root: bool,
    pub deps_only: bool,
    pub pull: bool,
}

pub fn run(ctx: &Context, args: &GotoArgs<'_>) -> Result<()> {
    ctx.require_tracked()?;
    let goto = Goto::new(&ctx.root, ctx.backend.as_ref(), &ctx.reporter);
    let summary = goto.run(&GotoRequest {
        app: args.app,
        version: args.version,
        root: args.root,
        deps_only: args.deps_only,
        pull: args.pull,
    })?;
    ctx.reporter.info(&format!("{}: {}", args.app, summary));
    Ok(())
}
