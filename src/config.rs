//! On-disk layout and configuration of a tracked workspace.
//!
//! Everything verstamp persists outside the ledger lives under `.verstamp/`
//! at the repository root:
//!
//! ```text
//! .verstamp/verstamp.toml          repo-level tracking marker
//! .verstamp/<app>/conf.toml        dependency configuration, template, info
//! .verstamp/<app>/version.toml     persisted version-state file
//! .verstamp/<root>/root.toml       root-app counter
//! ```
//!
//! The process lock lives in the VCS metadata directory, not here, so status
//! checks never see it.
//!
//! All files are plain structured data read and written through serde;
//! nothing stored here is ever executed.

use crate::backend::VcsType;
use crate::domain::prerelease::RELEASE_SENTINEL;
use crate::domain::tag::DEFAULT_TEMPLATE;
use crate::error::{Result, VerstampError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the repository root holding all tracked state.
pub const STATE_DIR: &str = ".verstamp";

/// Repo-level marker file written by `init`.
pub const REPO_MARKER: &str = "verstamp.toml";

/// Name of the process lock file (kept out of the working tree, see
/// [crate::lockfile]).
pub const LOCK_FILE: &str = "verstamp.lock";

/// Current on-disk schema version.
const SCHEMA: u32 = 1;

/// Repo-level tracking marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMarker {
    pub schema: u32,
}

impl Default for RepoMarker {
    fn default() -> Self {
        RepoMarker { schema: SCHEMA }
    }
}

/// How one dependency repository is pinned.
///
/// At most one of `branch`/`tag`/`hash` may be set; none means "track the
/// default branch tip".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyPin {
    pub vcs_type: VcsType,
    pub remote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl DependencyPin {
    pub fn validate(&self, path: &str) -> Result<()> {
        let pins = [&self.branch, &self.tag, &self.hash]
            .iter()
            .filter(|p| p.is_some())
            .count();
        if pins > 1 {
            return Err(VerstampError::config(format!(
                "Dependency '{}' pins more than one of branch/tag/hash",
                path
            )));
        }
        Ok(())
    }
}

/// Per-app configuration (`conf.toml`), externally owned and user-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub show_hotfix: bool,
    /// Relative dependency path to pin.
    #[serde(default)]
    pub deps: BTreeMap<String, DependencyPin>,
    /// Additional files (relative to the repository root) that receive the
    /// bare version string as part of every stamp commit.
    #[serde(default)]
    pub version_files: Vec<String>,
    /// Free-form key/values copied into every stamped record.
    #[serde(default)]
    pub extra_info: BTreeMap<String, String>,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            template: default_template(),
            show_hotfix: false,
            deps: BTreeMap::new(),
            version_files: Vec::new(),
            extra_info: BTreeMap::new(),
        }
    }
}

/// The persisted version-state file (`version.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionState {
    pub version_to_stamp_from: String,
    #[serde(default = "default_prerelease")]
    pub prerelease: String,
    #[serde(default)]
    pub prerelease_count: BTreeMap<String, u32>,
}

fn default_prerelease() -> String {
    RELEASE_SENTINEL.to_string()
}

impl VersionState {
    pub fn new(version: &str) -> Self {
        VersionState {
            version_to_stamp_from: version.to_string(),
            prerelease: default_prerelease(),
            prerelease_count: BTreeMap::new(),
        }
    }
}

/// Root-app state (`root.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootState {
    pub version: u64,
}

/// Root-app prefix of a grouped app name (`group/svc` -> `group`).
pub fn root_app_of(app_name: &str) -> Option<&str> {
    match app_name.split_once('/') {
        Some((root, rest)) if !rest.is_empty() => Some(root),
        _ => None,
    }
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn is_tracked(root: &Path) -> bool {
    state_dir(root).join(REPO_MARKER).exists()
}

pub fn app_dir(root: &Path, app_name: &str) -> PathBuf {
    // Grouped app names map onto nested directories.
    let mut dir = state_dir(root);
    for segment in app_name.split('/') {
        dir.push(segment);
    }
    dir
}

pub fn app_exists(root: &Path, app_name: &str) -> bool {
    app_dir(root, app_name).join("conf.toml").exists()
}

/// Path of a state file relative to the repository root, for commits.
pub fn relative_state_path(root: &Path, absolute: &Path) -> PathBuf {
    absolute
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| absolute.to_path_buf())
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| {
        VerstampError::config(format!("Cannot read {} at {}: {}", what, path.display(), e))
    })?;
    Ok(toml::from_str(&raw)?)
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(value)?)?;
    Ok(())
}

pub fn write_repo_marker(root: &Path) -> Result<PathBuf> {
    let path = state_dir(root).join(REPO_MARKER);
    write_toml(&path, &RepoMarker::default())?;
    Ok(path)
}

pub fn load_app_config(root: &Path, app_name: &str) -> Result<AppConfig> {
    let path = app_dir(root, app_name).join("conf.toml");
    if !path.exists() {
        return Err(VerstampError::precondition(format!(
            "App '{}' is not tracked (no {})",
            app_name,
            path.display()
        )));
    }
    let config: AppConfig = read_toml(&path, "app config")?;
    for (dep_path, pin) in &config.deps {
        pin.validate(dep_path)?;
    }
    Ok(config)
}

pub fn save_app_config(root: &Path, app_name: &str, config: &AppConfig) -> Result<PathBuf> {
    let path = app_dir(root, app_name).join("conf.toml");
    write_toml(&path, config)?;
    Ok(path)
}

pub fn load_version_state(root: &Path, app_name: &str) -> Result<VersionState> {
    let path = app_dir(root, app_name).join("version.toml");
    read_toml(&path, "version state")
}

pub fn save_version_state(root: &Path, app_name: &str, state: &VersionState) -> Result<PathBuf> {
    let path = app_dir(root, app_name).join("version.toml");
    write_toml(&path, state)?;
    Ok(path)
}

pub fn load_root_state(root: &Path, root_app: &str) -> Result<RootState> {
    let path = app_dir(root, root_app).join("root.toml");
    if !path.exists() {
        return Ok(RootState::default());
    }
    read_toml(&path, "root state")
}

pub fn save_root_state(root: &Path, root_app: &str, state: &RootState) -> Result<PathBuf> {
    let path = app_dir(root, root_app).join("root.toml");
    write_toml(&path, state)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_app_of() {
        assert_eq!(root_app_of("group/svc"), Some("group"));
        assert_eq!(root_app_of("svc"), None);
        assert_eq!(root_app_of("group/"), None);
    }

    #[test]
    fn test_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_tracked(dir.path()));
        write_repo_marker(dir.path()).unwrap();
        assert!(is_tracked(dir.path()));
    }

    #[test]
    fn test_app_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.deps.insert(
            "../lib-a".to_string(),
            DependencyPin {
                vcs_type: VcsType::Git,
                remote: "git@example.com:org/lib-a.git".to_string(),
                branch: Some("main".to_string()),
                tag: None,
                hash: None,
            },
        );
        save_app_config(dir.path(), "group/svc", &config).unwrap();
        assert!(app_exists(dir.path(), "group/svc"));

        let loaded = load_app_config(dir.path(), "group/svc").unwrap();
        assert_eq!(loaded.template, DEFAULT_TEMPLATE);
        assert_eq!(loaded.deps.len(), 1);
        assert_eq!(
            loaded.deps["../lib-a"].branch.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn test_app_config_missing_is_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_app_config(dir.path(), "ghost").unwrap_err();
        assert!(matches!(err, VerstampError::Precondition(_)));
    }

    #[test]
    fn test_dependency_pin_single_pin_rule() {
        let pin = DependencyPin {
            vcs_type: VcsType::Git,
            remote: "r".to_string(),
            branch: Some("main".to_string()),
            tag: Some("v1".to_string()),
            hash: None,
        };
        assert!(pin.validate("../x").is_err());
    }

    #[test]
    fn test_version_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = VersionState::new("1.2.0");
        state.prerelease = "rc".to_string();
        state.prerelease_count.insert("rc".to_string(), 2);
        save_version_state(dir.path(), "svc", &state).unwrap();
        let loaded = load_version_state(dir.path(), "svc").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_root_state_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_root_state(dir.path(), "group").unwrap().version, 0);
        save_root_state(dir.path(), "group", &RootState { version: 4 }).unwrap();
        assert_eq!(load_root_state(dir.path(), "group").unwrap().version, 4);
    }

    #[test]
    fn test_relative_state_path() {
        let root = Path::new("/work/app");
        let abs = root.join(".verstamp/svc/version.toml");
        assert_eq!(
            relative_state_path(root, &abs),
            PathBuf::from(".verstamp/svc/version.toml")
        );
    }
}
