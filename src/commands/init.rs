//! `verstamp init`: one-time repository-level tracking bootstrap.

use crate::commands::Context;
use crate::config;
use crate::error::{Result, VerstampError};

pub fn run(ctx: &Context) -> Result<()> {
    if config::is_tracked(&ctx.root) {
        return Err(VerstampError::precondition(
            "Repository is already initialized",
        ));
    }

    let marker = config::write_repo_marker(&ctx.root)?;
    let files = vec![config::relative_state_path(&ctx.root, &marker)];
    ctx.backend.commit("verstamp: initialize tracking", &files)?;
    ctx.backend.push(&[], &[])?;

    ctx.reporter.info("initialized version tracking");
    Ok(())
}
