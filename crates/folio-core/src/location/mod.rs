//! Storage backends and the registry that maps paths/URLs onto them.
//!
//! Every backend implements [`Storage`], a single capability interface the
//! action engine and the listing model use without caring which kind of
//! storage sits underneath. The closed set of backends is the [`Backend`]
//! enum; a [`Location`] pairs one backend with the item currently browsed.

pub mod auth;
pub mod disk;
pub mod memory_share;
pub mod registry;
pub mod share;
pub mod trash;

use std::fmt;
use std::iter::Peekable;

use crate::error::{CoreError, CoreResult};
use crate::fs::{paths, ItemInfo};
use crate::nav::reconcile::Reconciliation;

pub use auth::{AuthEntry, AuthStore};
pub use disk::DiskStorage;
pub use memory_share::InMemoryShare;
pub use registry::{CleanUrl, LocationRegistry};
pub use share::{ShareClient, ShareEntry, ShareKind, ShareStat, ShareStorage};
pub use trash::TrashStorage;

/// The three kinds of storage a path can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    LocalDisk,
    TrashDisk,
    NetworkShare,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalDisk => write!(f, "local disk"),
            Self::TrashDisk => write!(f, "trash"),
            Self::NetworkShare => write!(f, "network share"),
        }
    }
}

/// Which entries a directory iterator yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirFilter {
    pub hidden: bool,
    pub dirs: bool,
    pub files: bool,
}

impl DirFilter {
    /// Everything, including hidden entries.
    pub fn all() -> Self {
        Self {
            hidden: true,
            dirs: true,
            files: true,
        }
    }

    pub fn accepts(&self, item: &ItemInfo) -> bool {
        if !self.hidden && item.is_hidden() {
            return false;
        }
        if item.is_browsable() {
            self.dirs
        } else {
            self.files
        }
    }
}

impl Default for DirFilter {
    fn default() -> Self {
        Self {
            hidden: false,
            dirs: true,
            files: true,
        }
    }
}

/// How an [`ItemFile`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate, then write.
    Write,
}

/// A file handle on one backend.
pub trait ItemFile: Send {
    fn path(&self) -> &str;
    fn open(&mut self, mode: OpenMode) -> CoreResult<()>;
    fn is_open(&self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>;
    fn write(&mut self, data: &[u8]) -> CoreResult<usize>;
    fn close(&mut self);
    /// Renames this entry to `new_path` on the same backend.
    fn rename(&mut self, new_path: &str) -> CoreResult<()>;
    /// Removes this entry. Symlinks are removed, never their targets.
    fn remove(&mut self) -> CoreResult<()>;
    /// Creates a symbolic link at this path pointing to `target`.
    fn link(&self, target: &str) -> CoreResult<()>;
    fn permissions(&self) -> CoreResult<u32>;
    fn set_permissions(&mut self, mode: u32) -> CoreResult<()>;
    fn size(&self) -> CoreResult<u64>;
}

/// A directory handle on one backend.
pub trait ItemDir: Send {
    fn path(&self) -> &str;
    fn exists(&self) -> bool;
    /// Creates this directory; its parent must exist.
    fn mkdir(&self) -> CoreResult<()>;
    /// Creates this directory and any missing parents.
    fn mkpath(&self) -> CoreResult<()>;
    /// Removes this directory, which must be empty.
    fn rmdir(&self) -> CoreResult<()>;
}

/// The entries a backend walk produces, stopping at the first error.
pub type DirEntries = Box<dyn Iterator<Item = CoreResult<ItemInfo>> + Send>;

/// A lazy, finite, non-restartable sequence of directory entries.
///
/// Recursive iteration is a pre-order walk that never follows symlinks.
/// The sequence ends at the first entry that cannot be read; that error is
/// kept and surfaces through [`DirIterator::take_error`] or
/// [`DirIterator::into_items`].
pub struct DirIterator {
    path: String,
    inner: Peekable<DirEntries>,
    current: Option<ItemInfo>,
    error: Option<CoreError>,
}

impl DirIterator {
    pub fn new(path: impl Into<String>, inner: DirEntries) -> Self {
        Self {
            path: path.into(),
            inner: inner.peekable(),
            current: None,
            error: None,
        }
    }

    /// The directory being iterated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_next(&mut self) -> bool {
        self.error.is_none() && matches!(self.inner.peek(), Some(Ok(_)))
    }

    /// The entry returned by the last call to `next`.
    pub fn file_info(&self) -> Option<&ItemInfo> {
        self.current.as_ref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.current.as_ref().map(|i| i.name())
    }

    pub fn file_path(&self) -> Option<&str> {
        self.current.as_ref().map(|i| i.path())
    }

    /// The error that ended the walk early, if any.
    pub fn take_error(&mut self) -> Option<CoreError> {
        self.error.take()
    }

    /// Drains the walk, failing if any entry could not be read.
    pub fn into_items(mut self) -> CoreResult<Vec<ItemInfo>> {
        let items: Vec<ItemInfo> = self.by_ref().collect();
        match self.error {
            Some(e) => Err(e),
            None => Ok(items),
        }
    }

    /// The raw entries, for backends that wrap another backend's walk.
    pub fn into_entries(self) -> DirEntries {
        Box::new(self.inner)
    }
}

impl Iterator for DirIterator {
    type Item = ItemInfo;

    fn next(&mut self) -> Option<ItemInfo> {
        if self.error.is_some() {
            return None;
        }
        self.current = match self.inner.next() {
            Some(Ok(item)) => Some(item),
            Some(Err(e)) => {
                self.error = Some(e);
                None
            }
            None => None,
        };
        self.current.clone()
    }
}

impl fmt::Debug for DirIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirIterator")
            .field("path", &self.path)
            .field("current", &self.current.as_ref().map(|i| i.path()))
            .finish()
    }
}

/// Capability interface every backend implements.
pub trait Storage: Send + Sync + fmt::Debug {
    fn kind(&self) -> LocationKind;

    /// Stats `path_or_url`. Missing entries yield an item whose `exists()`
    /// is false; entries behind a credential wall yield an item flagged
    /// `needs_authentication()`.
    fn new_item_info(&self, path_or_url: &str) -> CoreResult<ItemInfo>;

    fn new_dir_iterator(
        &self,
        path: &str,
        filter: DirFilter,
        recursive: bool,
    ) -> CoreResult<DirIterator>;

    fn new_file(&self, path: &str) -> Box<dyn ItemFile>;

    fn new_dir(&self, path: &str) -> Box<dyn ItemDir>;

    /// `true` if `required` bytes fit below `path`. Backends that cannot
    /// tell answer `true`.
    fn is_there_disk_space(&self, _path: &str, _required: u64) -> bool {
        true
    }

    fn url_belongs_to_location(&self, url: &str) -> bool;

    /// Lists `path` again and diffs it against `previous`.
    ///
    /// Returns `Ok(None)` on backends that do not support it.
    fn fetch_external_changes(
        &self,
        _path: &str,
        _previous: &[ItemInfo],
        _filter: DirFilter,
    ) -> CoreResult<Option<Reconciliation>> {
        Ok(None)
    }

    /// Applies credentials for later calls. No-op on local backends.
    fn set_authentication(&self, _user: &str, _password: &str) {}

    /// The user the backend currently authenticates as.
    fn current_user(&self) -> String {
        default_user()
    }

    /// `true` for backends whose calls go over the network.
    fn is_remote(&self) -> bool {
        false
    }
}

/// The name of the user running this process.
pub fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// The closed set of backends a path can resolve to.
///
/// Cloning is cheap: every variant shares its state behind `Arc`s.
#[derive(Debug, Clone)]
pub enum Backend {
    LocalDisk(DiskStorage),
    TrashDisk(TrashStorage),
    NetworkShare(ShareStorage),
}

impl Backend {
    pub fn storage(&self) -> &(dyn Storage + 'static) {
        match self {
            Backend::LocalDisk(s) => s,
            Backend::TrashDisk(s) => s,
            Backend::NetworkShare(s) => s,
        }
    }

    pub fn kind(&self) -> LocationKind {
        self.storage().kind()
    }

    pub fn as_trash(&self) -> Option<&TrashStorage> {
        match self {
            Backend::TrashDisk(t) => Some(t),
            _ => None,
        }
    }
}

impl std::ops::Deref for Backend {
    type Target = dyn Storage;

    fn deref(&self) -> &Self::Target {
        self.storage()
    }
}

/// A backend together with the item currently browsed on it.
#[derive(Debug, Clone)]
pub struct Location {
    backend: Backend,
    info: ItemInfo,
}

impl Location {
    pub fn new(backend: Backend, info: ItemInfo) -> Self {
        Self { backend, info }
    }

    pub fn kind(&self) -> LocationKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn info(&self) -> &ItemInfo {
        &self.info
    }

    /// The user-facing URL of the current item.
    pub fn url_path(&self) -> &str {
        self.info.url()
    }

    pub fn is_root(&self) -> bool {
        self.info.is_root()
    }

    pub fn is_writable(&self) -> bool {
        self.info.is_writable()
    }

    pub fn is_readable(&self) -> bool {
        self.info.is_content_readable()
    }

    /// Re-stats the current item.
    pub fn refresh_info(&mut self) -> CoreResult<()> {
        self.info = self.backend.new_item_info(self.info.url())?;
        Ok(())
    }

    /// Replaces the current item with its parent without listing anything.
    ///
    /// Returns `false` at a root.
    pub fn become_parent(&mut self) -> bool {
        let Some(parent) = paths::parent(self.info.url()) else {
            return false;
        };
        match self.backend.new_item_info(&parent) {
            Ok(info) if info.is_valid() => {
                self.info = info;
                true
            }
            _ => false,
        }
    }
}
