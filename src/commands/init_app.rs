//! `verstamp init-app`: start tracking one app.

use crate::commands::Context;
use crate::config::{self, AppConfig, RootState, VersionState};
use crate::domain::tag;
use crate::domain::version::VersionNumber;
use crate::error::{Result, VerstampError};

pub fn run(ctx: &Context, name: &str, starting_version: Option<&str>) -> Result<()> {
    ctx.require_tracked()?;
    tag::validate_app_name(name)?;
    if config::app_exists(&ctx.root, name) {
        return Err(VerstampError::precondition(format!(
            "App '{}' is already tracked",
            name
        )));
    }

    let version = starting_version.unwrap_or("0.0.0");
    VersionNumber::parse(version)?;

    let conf = config::save_app_config(&ctx.root, name, &AppConfig::default())?;
    let state = config::save_version_state(&ctx.root, name, &VersionState::new(version))?;
    let mut files = vec![
        config::relative_state_path(&ctx.root, &conf),
        config::relative_state_path(&ctx.root, &state),
    ];

    if let Some(root_app) = config::root_app_of(name) {
        if !config::app_dir(&ctx.root, root_app).join("root.toml").exists() {
            let root_file =
                config::save_root_state(&ctx.root, root_app, &RootState::default())?;
            files.push(config::relative_state_path(&ctx.root, &root_file));
        }
    }

    ctx.backend
        .commit(&format!("verstamp: track app {}", name), &files)?;
    ctx.backend.push(&[], &[])?;

    ctx.reporter
        .info(&format!("tracking {} from version {}", name, version));
    Ok(())
}
