use thiserror::Error;

/// Unified error type for verstamp operations.
///
/// Variants follow the failure taxonomy of the tool: precondition failures
/// abort with no state change, consistency failures carry every offending
/// repository at once, race failures are recoverable by the stamping retry
/// loop, format failures are fatal and revert local state, and partial
/// failures aggregate per-repository outcomes of a multi-repo sync.
#[derive(Error, Debug)]
pub enum VerstampError {
    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Version parsing error: {0}")]
    Version(String),

    #[error("Tag format error: {0}")]
    Format(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Inconsistent repository state:\n  {}", .0.join("\n  "))]
    Consistency(Vec<String>),

    #[error("Lost the publish race: {0}")]
    Race(String),

    #[error("{} repositories failed:\n  {}", .0.len(), .0.join("\n  "))]
    Partial(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

/// Convenience type alias for Results in verstamp
pub type Result<T> = std::result::Result<T, VerstampError>;

impl VerstampError {
    /// Create a backend error with context
    pub fn backend(msg: impl Into<String>) -> Self {
        VerstampError::Backend(msg.into())
    }

    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        VerstampError::Config(msg.into())
    }

    /// Create a version error with context
    pub fn version(msg: impl Into<String>) -> Self {
        VerstampError::Version(msg.into())
    }

    /// Create a tag/template format error with context
    pub fn format(msg: impl Into<String>) -> Self {
        VerstampError::Format(msg.into())
    }

    /// Create a precondition error with context
    pub fn precondition(msg: impl Into<String>) -> Self {
        VerstampError::Precondition(msg.into())
    }

    /// Create a race error with context
    pub fn race(msg: impl Into<String>) -> Self {
        VerstampError::Race(msg.into())
    }

    /// True for errors the stamping protocol may recover from by retrying.
    pub fn is_race(&self) -> bool {
        matches!(self, VerstampError::Race(_))
    }
}

impl From<serde_json::Error> for VerstampError {
    fn from(err: serde_json::Error) -> Self {
        VerstampError::Serialize(err.to_string())
    }
}

impl From<toml::de::Error> for VerstampError {
    fn from(err: toml::de::Error) -> Self {
        VerstampError::Serialize(err.to_string())
    }
}

impl From<toml::ser::Error> for VerstampError {
    fn from(err: toml::ser::Error) -> Self {
        VerstampError::Serialize(err.to_string())
    }
}
