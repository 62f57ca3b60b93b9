//! Pure version-model types: no repository I/O lives here.

pub mod prerelease;
pub mod record;
pub mod tag;
pub mod version;

pub use prerelease::{Prerelease, RELEASE_SENTINEL};
pub use record::{ChangesetRecord, RootAppRecord, TagMessage, VersionRecord};
pub use tag::{RootTagName, TagName};
pub use version::{ReleaseMode, VersionNumber};
