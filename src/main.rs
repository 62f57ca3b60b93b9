use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use verstamp::commands::{self, Context};
use verstamp::domain::version::ReleaseMode;
use verstamp::ui::Reporter;

#[derive(Parser)]
#[command(
    name = "verstamp",
    version,
    about = "Stamp, publish and time-travel release versions stored as tags"
)]
struct Cli {
    /// Run as if verstamp was started in this directory
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Verbose progress output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One-time repository-level tracking bootstrap
    Init,

    /// Start tracking an app
    #[command(name = "init-app")]
    InitApp {
        name: String,
        /// Starting version (X.Y.Z or X.Y.Z.H)
        #[arg(short = 'v', long = "version")]
        version: Option<String>,
    },

    /// Compute and publish the next version of an app
    Stamp {
        name: String,
        /// Octet to advance: major, minor, patch or hotfix
        #[arg(short = 'r', long = "release-mode", default_value = "patch")]
        mode: String,
        /// Stamp a prerelease under this label instead of a release
        #[arg(long = "pr")]
        prerelease: Option<String>,
        /// Pull from the remote before computing
        #[arg(long)]
        pull: bool,
        /// Compute and print the candidate without publishing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Promote a stamped prerelease to a release
    Release {
        name: String,
        /// Version to promote (defaults to the newest reachable)
        #[arg(short = 'v', long = "version")]
        version: Option<String>,
    },

    /// Attach buildmetadata to a stamped version
    Add {
        name: String,
        /// Buildmetadata string ([0-9A-Za-z-.]+)
        #[arg(long = "bm")]
        buildmetadata: String,
        #[arg(short = 'v', long = "version")]
        version: Option<String>,
    },

    /// Show the stamped version of an app
    Show {
        name: String,
        /// Dump the full version record
        #[arg(long)]
        verbose: bool,
        /// Print the raw ledger tag message
        #[arg(long)]
        raw: bool,
        /// Show the root-app counter instead
        #[arg(long)]
        root: bool,
        /// Read the local version-state file instead of the ledger
        #[arg(long = "from-file")]
        from_file: bool,
        /// Skip the dirty-state evaluation
        #[arg(long = "ignore-dirty")]
        ignore_dirty: bool,
        /// Append the unique changeset suffix
        #[arg(long)]
        unique: bool,
        /// Print whether the version is a release or a prerelease
        #[arg(long = "type")]
        type_only: bool,
    },

    /// Reconstruct the exact multi-repository state of a stamped version
    Goto {
        name: String,
        /// Version to go to (defaults to every repo's configured tip)
        #[arg(short = 'v', long = "version")]
        version: Option<String>,
        /// Interpret NAME as a root app and VERSION as its counter
        #[arg(long)]
        root: bool,
        /// Only move dependency repositories, not this one
        #[arg(long = "deps-only")]
        deps_only: bool,
        /// Pull from the remote before resolving
        #[arg(long)]
        pull: bool,
    },

    /// Render an output file from a version template
    Gen {
        name: String,
        #[arg(short = 't', long)]
        template: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
        #[arg(short = 'v', long = "version")]
        version: Option<String>,
        /// Fail unless the working tree is exactly at the rendered version
        #[arg(long = "verify-version")]
        verify_version: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let reporter = Reporter::new(cli.debug);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::open(cli.cwd.as_deref(), cli.debug)?;

    match &cli.command {
        Command::Init => commands::init::run(&ctx)?,
        Command::InitApp { name, version } => {
            commands::init_app::run(&ctx, name, version.as_deref())?
        }
        Command::Stamp {
            name,
            mode,
            prerelease,
            pull,
            dry_run,
        } => {
            let mode: ReleaseMode = mode.parse()?;
            commands::stamp::run(
                &ctx,
                &commands::stamp::StampArgs {
                    app: name,
                    mode,
                    prerelease: prerelease.as_deref(),
                    pull: *pull,
                    dry_run: *dry_run,
                },
            )?
        }
        Command::Release { name, version } => {
            commands::release::run(&ctx, name, version.as_deref())?
        }
        Command::Add {
            name,
            buildmetadata,
            version,
        } => commands::add::run(&ctx, name, buildmetadata, version.as_deref())?,
        Command::Show {
            name,
            verbose,
            raw,
            root,
            from_file,
            ignore_dirty,
            unique,
            type_only,
        } => commands::show::run(
            &ctx,
            &commands::show::ShowArgs {
                app: name,
                verbose: *verbose,
                raw: *raw,
                root: *root,
                from_file: *from_file,
                ignore_dirty: *ignore_dirty,
                unique: *unique,
                type_only: *type_only,
            },
        )?,
        Command::Goto {
            name,
            version,
            root,
            deps_only,
            pull,
        } => commands::goto::run(
            &ctx,
            &commands::goto::GotoArgs {
                app: name,
                version: version.as_deref(),
                root: *root,
                deps_only: *deps_only,
                pull: *pull,
            },
        )?,
        Command::Gen {
            name,
            template,
            output,
            version,
            verify_version,
        } => commands::gen::run(
            &ctx,
            &commands::gen::GenArgs {
                app: name,
                template,
                output,
                version: version.as_deref(),
                verify_version: *verify_version,
            },
        )?,
    }
    Ok(())
}
