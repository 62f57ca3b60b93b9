pub mod backend;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod goto;
pub mod ledger;
pub mod lockfile;
pub mod stamp;
pub mod state;
pub mod ui;

pub use error::{Result, VerstampError};
