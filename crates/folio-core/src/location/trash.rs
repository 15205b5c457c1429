//! XDG trash backend.
//!
//! Content lives in `<root>/files/<name>`, provenance in
//! `<root>/info/<name>.trashinfo`. Items are addressed either by their
//! `trash:///name` URL or by their local path below `files/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::fs::ini::Ini;
use crate::fs::{paths, ItemInfo};
use crate::location::disk::DiskStorage;
use crate::location::{DirFilter, DirIterator, ItemDir, ItemFile, LocationKind, Storage};
use crate::nav::reconcile::{reconcile, Reconciliation};

pub const TRASH_ROOT_URL: &str = "trash:///";
const TRASH_SCHEME: &str = "trash://";
const INFO_GROUP: &str = "Trash Info";
const INFO_SUFFIX: &str = ".trashinfo";

#[derive(Debug, Clone)]
pub struct TrashStorage {
    root: Arc<PathBuf>,
    disk: DiskStorage,
}

impl TrashStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
            disk: DiskStorage::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    /// Creates `files/` and `info/` if missing.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for dir in [self.files_dir(), self.info_dir()] {
            fs::create_dir_all(&dir).map_err(|e| CoreError::from_io(e, &dir))?;
        }
        Ok(())
    }

    fn files_dir_string(&self) -> String {
        paths::remove_extra_slashes(&self.files_dir().to_string_lossy())
    }

    /// Maps a `trash:///` URL onto its local path. Local paths pass through.
    pub fn to_local(&self, path_or_url: &str) -> String {
        match path_or_url.strip_prefix(TRASH_SCHEME) {
            Some(rest) => {
                let files = self.files_dir_string();
                let rest = paths::remove_extra_slashes(rest);
                if rest == "/" || rest.is_empty() {
                    files
                } else {
                    paths::join(&files, &rest)
                }
            }
            None => DiskStorage::local_path(path_or_url),
        }
    }

    /// Maps a local path below `files/` onto its `trash:///` URL.
    pub fn to_url(&self, local: &str) -> String {
        let files = self.files_dir_string();
        if paths::is_inside(local, &files) {
            paths::rebase(local, &files, TRASH_ROOT_URL)
        } else {
            local.to_string()
        }
    }

    /// `true` for the URL or local path of the trash root itself.
    pub fn is_trash_root(&self, path_or_url: &str) -> bool {
        self.to_local(path_or_url) == self.files_dir_string()
    }

    /// `true` if `path_or_url` is a direct child of the trash root.
    pub fn is_top_level(&self, path_or_url: &str) -> bool {
        paths::parent(&self.to_local(path_or_url)).as_deref() == Some(self.files_dir_string().as_str())
    }

    fn info_file(&self, name: &str) -> PathBuf {
        self.info_dir().join(format!("{name}{INFO_SUFFIX}"))
    }

    /// The `.trashinfo` of `trashed`. Only top-level items have one.
    fn info_path(&self, trashed: &str) -> Option<PathBuf> {
        if !self.is_top_level(trashed) {
            return None;
        }
        Some(self.info_file(paths::file_name(trashed)))
    }

    /// `(source, <root>/files/<unique name>)` for moving `item` into the trash.
    ///
    /// A name already used in `files/` or `info/` gets a `.2`, `.3`, ... suffix.
    pub fn move_pair(&self, item: &ItemInfo) -> (String, String) {
        let files = self.files_dir();
        let name = item.name();
        let mut candidate = name.to_string();
        let mut counter = 1;
        while files.join(&candidate).symlink_metadata().is_ok() || self.info_file(&candidate).exists() {
            counter += 1;
            candidate = format!("{name}.{counter}");
        }
        let dest = paths::join(&self.files_dir_string(), &candidate);
        (item.path().to_string(), dest)
    }

    /// `(<root>/files/<name>, original path)` for restoring `item`.
    pub fn restore_pair(&self, item: &ItemInfo) -> CoreResult<(String, String)> {
        let local = self.to_local(item.path());
        let origin = self
            .origin_of(&local)
            .ok_or_else(|| CoreError::Validation(format!("no trash info for {}", item.name())))?;
        Ok((local, origin))
    }

    /// Reads `Path=` from the item's `.trashinfo`. `None` below the top level.
    pub fn origin_of(&self, trashed: &str) -> Option<String> {
        let text = fs::read_to_string(self.info_path(trashed)?).ok()?;
        Ini::parse(&text)
            .get(INFO_GROUP, "Path")
            .map(str::to_string)
    }

    /// Writes `<root>/info/<name>.trashinfo` for an item now stored at `trashed`.
    pub fn write_info(&self, trashed: &str, original: &str) -> CoreResult<()> {
        let path = self
            .info_path(trashed)
            .ok_or_else(|| CoreError::Validation(format!("{trashed} is not directly in the trash")))?;
        self.ensure_dirs()?;
        let mut ini = Ini::new();
        ini.set(INFO_GROUP, "Path", original);
        ini.set(
            INFO_GROUP,
            "DeletionDate",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        );
        fs::write(&path, ini.to_string()).map_err(|e| CoreError::from_io(e, &path))?;
        debug!(info = %path.display(), original, "wrote trash info");
        Ok(())
    }

    /// Deletes the `.trashinfo` of `trashed`. Missing files are not an error.
    ///
    /// Entries below the top level own no info file, so nothing is touched.
    pub fn remove_info(&self, trashed: &str) -> CoreResult<()> {
        let Some(path) = self.info_path(trashed) else {
            debug!(trashed, "nested trash entry has no trash info");
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::from_io(e, path)),
        }
    }

    /// Attaches the trash URL and, for top-level entries, their origin.
    fn decorate(&self, item: ItemInfo) -> ItemInfo {
        let url = self.to_url(item.path());
        let origin = if self.is_top_level(item.path()) {
            self.origin_of(item.path())
        } else {
            None
        };
        item.with_url(url).with_trash_origin(origin)
    }
}

impl Storage for TrashStorage {
    fn kind(&self) -> LocationKind {
        LocationKind::TrashDisk
    }

    fn new_item_info(&self, path_or_url: &str) -> CoreResult<ItemInfo> {
        if let Err(e) = self.ensure_dirs() {
            warn!(root = %self.root.display(), error = %e, "cannot create trash directories");
        }
        let local = self.to_local(path_or_url);
        Ok(self.decorate(ItemInfo::local(&local)))
    }

    fn new_dir_iterator(
        &self,
        path: &str,
        filter: DirFilter,
        recursive: bool,
    ) -> CoreResult<DirIterator> {
        let local = self.to_local(path);
        let inner = self.disk.new_dir_iterator(&local, filter, recursive)?.into_entries();
        let this = self.clone();
        Ok(DirIterator::new(
            self.to_url(&local),
            Box::new(inner.map(move |entry| entry.map(|item| this.decorate(item)))),
        ))
    }

    fn new_file(&self, path: &str) -> Box<dyn ItemFile> {
        self.disk.new_file(&self.to_local(path))
    }

    fn new_dir(&self, path: &str) -> Box<dyn ItemDir> {
        self.disk.new_dir(&self.to_local(path))
    }

    fn is_there_disk_space(&self, path: &str, required: u64) -> bool {
        self.disk.is_there_disk_space(&self.to_local(path), required)
    }

    fn url_belongs_to_location(&self, url: &str) -> bool {
        url.starts_with(TRASH_SCHEME)
    }

    fn fetch_external_changes(
        &self,
        path: &str,
        previous: &[ItemInfo],
        filter: DirFilter,
    ) -> CoreResult<Option<Reconciliation>> {
        let current = self.new_dir_iterator(path, filter, false)?.into_items()?;
        Ok(Some(reconcile(previous, current)))
    }
}
