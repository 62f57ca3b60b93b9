//! CLI subcommand implementations.
//!
//! Every command operates through a [Context]: the discovered workspace
//! root, the backend for the self repository, the per-invocation reporter,
//! and the process lock held for the lifetime of the command.

pub mod add;
pub mod gen;
pub mod goto;
pub mod init;
pub mod init_app;
pub mod release;
pub mod show;
pub mod stamp;

use crate::backend::{open_backend, VersionControlBackend};
use crate::config;
use crate::error::{Result, VerstampError};
use crate::lockfile::ProcessLock;
use crate::ui::Reporter;
use std::path::{Path, PathBuf};

pub struct Context {
    pub root: PathBuf,
    pub backend: Box<dyn VersionControlBackend>,
    pub reporter: Reporter,
    _lock: ProcessLock,
}

impl Context {
    /// Discover the enclosing repository, take the process lock, and build
    /// the invocation context.
    pub fn open(cwd: Option<&Path>, verbose: bool) -> Result<Context> {
        let start = match cwd {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let backend = open_backend(&start)?;
        let root = backend.root().to_path_buf();
        let lock = ProcessLock::acquire(&root)?;
        Ok(Context {
            root,
            backend,
            reporter: Reporter::new(verbose),
            _lock: lock,
        })
    }

    /// Most commands require an initialized workspace.
    pub fn require_tracked(&self) -> Result<()> {
        if config::is_tracked(&self.root) {
            Ok(())
        } else {
            Err(VerstampError::precondition(
                "Repository is not tracked; run 'verstamp init' first",
            ))
        }
    }
}
