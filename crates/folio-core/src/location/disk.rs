//! Local POSIX filesystem backend.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::fs::{paths, ItemInfo};
use crate::location::{DirFilter, DirIterator, ItemDir, ItemFile, LocationKind, OpenMode, Storage};
use crate::nav::reconcile::{reconcile, Reconciliation};

const FILE_SCHEME: &str = "file://";

/// Storage over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct DiskStorage;

impl DiskStorage {
    pub fn new() -> Self {
        Self
    }

    /// Turns `file:///a` or `/a//b/` into a clean local path.
    pub fn local_path(path_or_url: &str) -> String {
        let path = path_or_url.strip_prefix(FILE_SCHEME).unwrap_or(path_or_url);
        paths::remove_extra_slashes(path)
    }

    /// Lists `path` (non-recursive) into a vector.
    pub fn list(&self, path: &str, filter: DirFilter) -> CoreResult<Vec<ItemInfo>> {
        self.new_dir_iterator(path, filter, false)?.into_items()
    }
}

impl Storage for DiskStorage {
    fn kind(&self) -> LocationKind {
        LocationKind::LocalDisk
    }

    fn new_item_info(&self, path_or_url: &str) -> CoreResult<ItemInfo> {
        Ok(ItemInfo::local(Self::local_path(path_or_url)))
    }

    fn new_dir_iterator(
        &self,
        path: &str,
        filter: DirFilter,
        recursive: bool,
    ) -> CoreResult<DirIterator> {
        let local = Self::local_path(path);
        let root = Path::new(&local);
        let meta = fs::metadata(root).map_err(|e| CoreError::from_io(e, root))?;
        if !meta.is_dir() {
            return Err(CoreError::NotADirectory(root.to_path_buf()));
        }
        fs::read_dir(root).map_err(|e| CoreError::from_io(e, root))?;
        let walk = WalkDir::new(root)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => {
                    let item = ItemInfo::local(entry.path());
                    filter.accepts(&item).then_some(Ok(item))
                }
                Err(e) => Some(Err(walk_error(e))),
            });
        Ok(DirIterator::new(local, Box::new(walk)))
    }

    fn new_file(&self, path: &str) -> Box<dyn ItemFile> {
        Box::new(DiskFile::new(Self::local_path(path)))
    }

    fn new_dir(&self, path: &str) -> Box<dyn ItemDir> {
        Box::new(DiskDir {
            path: Self::local_path(path),
        })
    }

    fn is_there_disk_space(&self, path: &str, required: u64) -> bool {
        available_space(Path::new(&Self::local_path(path))).map_or(true, |free| free > required)
    }

    fn url_belongs_to_location(&self, url: &str) -> bool {
        url.starts_with(FILE_SCHEME) || url.starts_with('/')
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

fn walk_error(err: walkdir::Error) -> CoreError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    match err.into_io_error() {
        Some(io) => CoreError::from_io(io, path),
        None => CoreError::Io(std::io::Error::other(format!(
            "filesystem loop at {}",
            path.display()
        ))),
    }
}

pub(crate) struct DiskFile {
    path: String,
    file: Option<File>,
}

impl DiskFile {
    pub(crate) fn new(path: String) -> Self {
        Self { path, file: None }
    }

    fn io_err(&self, e: std::io::Error) -> CoreError {
        CoreError::from_io(e, &self.path)
    }

    fn handle(&mut self) -> CoreResult<&mut File> {
        let path = PathBuf::from(&self.path);
        self.file
            .as_mut()
            .ok_or_else(|| CoreError::Validation(format!("file not open: {}", path.display())))
    }
}

impl ItemFile for DiskFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self, mode: OpenMode) -> CoreResult<()> {
        let file = match mode {
            OpenMode::Read => File::open(&self.path),
            OpenMode::Write => File::create(&self.path),
        }
        .map_err(|e| self.io_err(e))?;
        self.file = Some(file);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        let path = self.path.clone();
        self.handle()?
            .read(buf)
            .map_err(|e| CoreError::from_io(e, path))
    }

    fn write(&mut self, data: &[u8]) -> CoreResult<usize> {
        let path = self.path.clone();
        let file = self.handle()?;
        file.write_all(data).map_err(|e| CoreError::from_io(e, path))?;
        Ok(data.len())
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(path = %self.path, error = %e, "flush on close failed");
            }
        }
    }

    fn rename(&mut self, new_path: &str) -> CoreResult<()> {
        let new_path = DiskStorage::local_path(new_path);
        fs::rename(&self.path, &new_path).map_err(|e| self.io_err(e))?;
        self.path = new_path;
        Ok(())
    }

    fn remove(&mut self) -> CoreResult<()> {
        self.close();
        fs::remove_file(&self.path).map_err(|e| self.io_err(e))
    }

    fn link(&self, target: &str) -> CoreResult<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, &self.path).map_err(|e| self.io_err(e))
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(CoreError::Unsupported("symbolic links".into()))
        }
    }

    fn permissions(&self) -> CoreResult<u32> {
        let meta = fs::symlink_metadata(&self.path).map_err(|e| self.io_err(e))?;
        Ok(ItemInfo::from_metadata(Path::new(&self.path), &meta).permissions())
    }

    fn set_permissions(&mut self, mode: u32) -> CoreResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))
                .map_err(|e| self.io_err(e))
        }
        #[cfg(not(unix))]
        {
            let mut perms = fs::metadata(&self.path).map_err(|e| self.io_err(e))?.permissions();
            perms.set_readonly(mode & 0o200 == 0);
            fs::set_permissions(&self.path, perms).map_err(|e| self.io_err(e))
        }
    }

    fn size(&self) -> CoreResult<u64> {
        fs::symlink_metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| self.io_err(e))
    }
}

struct DiskDir {
    path: String,
}

impl ItemDir for DiskDir {
    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok_and(|m| m.is_dir())
    }

    fn mkdir(&self) -> CoreResult<()> {
        fs::create_dir(&self.path).map_err(|e| CoreError::from_io(e, &self.path))
    }

    fn mkpath(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.path).map_err(|e| CoreError::from_io(e, &self.path))
    }

    fn rmdir(&self) -> CoreResult<()> {
        fs::remove_dir(&self.path).map_err(|e| CoreError::from_io(e, &self.path))
    }
}

/// Free bytes on the filesystem holding `path`, walking up to the nearest
/// existing ancestor first.
#[cfg(unix)]
fn available_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let existing = path.ancestors().find(|p| p.exists())?;
    let c_path = CString::new(existing.as_os_str().as_bytes()).ok()?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        warn!(path = %existing.display(), "statvfs failed, assuming space is available");
        return None;
    }
    // SAFETY: statvfs returned 0, so the struct is initialised.
    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn available_space(_path: &Path) -> Option<u64> {
    None
}
