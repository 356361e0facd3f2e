use thiserror::Error;

/// Discriminant of [`BootstrapError`], for callers that branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    ContentNotFound,
    ListingFailure,
    ConfigRenderFailure,
    BindFailure,
    AssetCopyFailure,
    SpawnFailure,
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("storage read permission was denied")]
    PermissionDenied,

    #[error("{target} folder not found")]
    ContentNotFound { target: String },

    /// Only ever logged by the walker; a failed listing abandons one branch.
    #[error("failed to list {path}: {message}")]
    ListingFailure { path: String, message: String },

    #[error("failed to render server config: {0}")]
    ConfigRenderFailure(String),

    #[error("failed to start HTTP service: {0}")]
    BindFailure(String),

    #[error("failed to prepare worker executable: {0}")]
    AssetCopyFailure(String),

    #[error("failed to spawn worker process: {0}")]
    SpawnFailure(String),

    #[error("service is already running")]
    AlreadyRunning,
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::PermissionDenied => ErrorKind::PermissionDenied,
            BootstrapError::ContentNotFound { .. } => ErrorKind::ContentNotFound,
            BootstrapError::ListingFailure { .. } => ErrorKind::ListingFailure,
            BootstrapError::ConfigRenderFailure(_) => ErrorKind::ConfigRenderFailure,
            BootstrapError::BindFailure(_) => ErrorKind::BindFailure,
            BootstrapError::AssetCopyFailure(_) => ErrorKind::AssetCopyFailure,
            BootstrapError::SpawnFailure(_) => ErrorKind::SpawnFailure,
            BootstrapError::AlreadyRunning => ErrorKind::AlreadyRunning,
        }
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
