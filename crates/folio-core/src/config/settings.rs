//! Engine and listing configuration loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::nav::sort::{SortBy, SortOrder};

/// Top-level configuration.
///
/// All fields have defaults so folio works without a config file.
/// Call [`Config::load`] to read from a TOML path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub trash: TrashConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Loads configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the file does not exist.
    /// - [`CoreError::PermissionDenied`] if the file is not readable.
    /// - [`CoreError::ConfigParse`] if the TOML is malformed.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => CoreError::PermissionDenied(path.to_path_buf()),
            _ => CoreError::Io(e),
        })?;
        toml::from_str(&content).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }

    /// Loads `path` if given, otherwise the default location if it exists,
    /// otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> CoreResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `$HOME/.config/folio/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.toml"))
    }
}

/// `$HOME/.config/folio`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("folio"))
}

/// Action engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Units processed between two progress notifications.
    #[serde(default = "default_step_files")]
    pub step_files: usize,
    /// Bytes copied per unit of work for large files.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Files at or below this size are copied in a single unit.
    #[serde(default = "default_chunk_size_u64")]
    pub small_file_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_files: default_step_files(),
            chunk_size: default_chunk_size(),
            small_file_size: default_chunk_size_u64(),
        }
    }
}

/// Directory listing preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub show_hidden: bool,
    #[serde(default = "default_true")]
    pub show_directories: bool,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_true")]
    pub watch_external_changes: bool,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            show_hidden: false,
            show_directories: true,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            watch_external_changes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrashConfig {
    /// Overrides the XDG trash directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl TrashConfig {
    /// Configured root, else `$XDG_DATA_HOME/Trash`, else `$HOME/.local/share/Trash`.
    pub fn resolve_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.root {
            return Some(root.clone());
        }
        if let Some(data) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(data).join("Trash"));
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local").join("share").join("Trash"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Whether credentials entered without an explicit choice are saved.
    #[serde(default)]
    pub persist_by_default: bool,
}

impl AuthConfig {
    pub fn resolve_store_path(&self) -> Option<PathBuf> {
        self.store_path
            .clone()
            .or_else(|| config_dir().map(|d| d.join("authentication.conf")))
    }
}

fn default_true() -> bool {
    true
}

fn default_step_files() -> usize {
    10
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_chunk_size_u64() -> u64 {
    default_chunk_size() as u64
}

fn default_batch_size() -> usize {
    50
}

fn default_debounce_ms() -> u64 {
    900
}
