//! Error types for `folio-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`. The action engine never
//! lets one of these escape: it turns them into a single
//! [`EngineEvent::Error`](crate::event::EngineEvent::Error) per failed action.

use std::path::PathBuf;

/// Unified error type for all core operations.
///
/// Each variant captures just enough context for the caller to display
/// a meaningful message or take corrective action.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A path or URL is malformed, unsupported, or not browsable.
    #[error("{0}")]
    Validation(String),

    /// The item exists but credentials are needed to read it.
    ///
    /// Not a failure: the caller is expected to ask for credentials and retry.
    #[error("authentication required for {url} (user {user})")]
    AuthenticationRequired { user: String, url: String },

    /// The target path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// The process lacks permission to access the path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A directory was expected but the path points to a file.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A file or directory name is invalid (empty, contains path separators, etc.).
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A rename crossed a device or backend boundary.
    #[error("cannot rename across devices: {0}")]
    CrossDevice(PathBuf),

    /// Not enough free space at the destination.
    #[error("no space left on device: {0}")]
    NoSpace(PathBuf),

    /// The requested paste would collide with its own source.
    #[error("{0}")]
    Conflict(String),

    /// The user cancelled an operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The backend does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A network share operation failed.
    #[error("remote error: {0}")]
    Remote(String),

    /// Failed to parse a TOML configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// An I/O error that doesn't fit a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Classifies an I/O error raised while touching `path`.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => return CoreError::NotFound(path),
            std::io::ErrorKind::PermissionDenied => return CoreError::PermissionDenied(path),
            _ => {}
        }
        #[cfg(unix)]
        match err.raw_os_error() {
            Some(libc::EXDEV) => return CoreError::CrossDevice(path),
            Some(libc::ENOSPC) => return CoreError::NoSpace(path),
            Some(libc::ENOTDIR) => return CoreError::NotADirectory(path),
            _ => {}
        }
        CoreError::Io(err)
    }

    /// Short title shown next to the message in `error(title, message)` events.
    pub fn title(&self) -> &'static str {
        match self {
            CoreError::Validation(_) | CoreError::InvalidName(_) => "Invalid path",
            CoreError::AuthenticationRequired { .. } => "Authentication required",
            CoreError::NotFound(_) => "File or Directory does not exist",
            CoreError::PermissionDenied(_) => "Permission denied",
            CoreError::NotADirectory(_) => "Not a directory",
            CoreError::CrossDevice(_) => "Could not move",
            CoreError::NoSpace(_) => "There is no space to copy",
            CoreError::Conflict(_) => "Cannot paste",
            CoreError::Cancelled => "Cancelled",
            CoreError::Unsupported(_) => "Operation not supported",
            CoreError::Remote(_) => "Network error",
            CoreError::ConfigParse(_) => "Configuration error",
            CoreError::Io(_) => "Input/output error",
        }
    }

    /// Returns `true` when the error only asks for credentials.
    pub fn is_authentication_required(&self) -> bool {
        matches!(self, CoreError::AuthenticationRequired { .. })
    }
}

/// Convenience alias used throughout `folio-core`.
pub type CoreResult<T> = Result<T, CoreError>;
