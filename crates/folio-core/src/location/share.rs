//! Network share backend.
//!
//! [`ShareStorage`] adapts any [`ShareClient`] to the [`Storage`] interface.
//! The client speaks the wire protocol; this module only deals with URL
//! shapes (`smb://workgroup`, `smb://host/share/dir`), credentials and
//! the mapping of remote entries onto [`ItemInfo`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::fs::{paths, ItemInfo, RemoteFields};
use crate::location::{
    DirFilter, DirIterator, ItemDir, ItemFile, LocationKind, OpenMode, Storage,
};

pub const SMB_ROOT_URL: &str = "smb://";
const CIFS_SCHEME: &str = "cifs://";

/// What a remote URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    Workgroup,
    Host,
    Share,
    Dir,
    File,
}

impl ShareKind {
    pub fn is_browsable(self) -> bool {
        self != ShareKind::File
    }
}

/// Remote metadata returned by [`ShareClient::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareStat {
    pub kind: ShareKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub mode: u32,
}

/// One child returned by [`ShareClient::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub url: String,
    pub stat: ShareStat,
}

/// Blocking protocol client for one share network.
///
/// Calls that hit an entry the current credentials cannot open return
/// [`CoreError::AuthenticationRequired`]; missing entries return
/// [`CoreError::NotFound`].
pub trait ShareClient: Send + Sync + fmt::Debug {
    fn set_credentials(&self, user: &str, password: &str);
    fn user(&self) -> String;
    fn stat(&self, url: &str) -> CoreResult<ShareStat>;
    fn list(&self, url: &str) -> CoreResult<Vec<ShareEntry>>;
    fn read_at(&self, url: &str, offset: u64, buf: &mut [u8]) -> CoreResult<usize>;
    fn write_at(&self, url: &str, offset: u64, data: &[u8]) -> CoreResult<usize>;
    /// Creates an empty file or truncates an existing one.
    fn create(&self, url: &str) -> CoreResult<()>;
    fn mkdir(&self, url: &str) -> CoreResult<()>;
    fn rmdir(&self, url: &str) -> CoreResult<()>;
    fn unlink(&self, url: &str) -> CoreResult<()>;
    fn rename(&self, from: &str, to: &str) -> CoreResult<()>;
    fn set_mode(&self, url: &str, mode: u32) -> CoreResult<()>;
}

/// `cifs://` becomes `smb://`; extra slashes are removed.
pub fn normalize_share_url(url: &str) -> String {
    let url = match url.strip_prefix(CIFS_SCHEME) {
        Some(rest) => format!("{SMB_ROOT_URL}{rest}"),
        None => url.to_string(),
    };
    paths::remove_extra_slashes(&url)
}

/// The URL credentials for `url` are keyed by.
///
/// `smb://host/share` for anything at or below a share, the URL itself for
/// hosts and workgroups, `None` for the network root.
pub fn authentication_path(url: &str) -> Option<String> {
    let url = normalize_share_url(url);
    let (scheme, rest) = paths::split_scheme(&url)?;
    let mut parts = rest.split('/').filter(|p| !p.is_empty());
    let host = parts.next()?;
    Some(match parts.next() {
        Some(share) => format!("{scheme}://{host}/{share}"),
        None => format!("{scheme}://{host}"),
    })
}

pub(crate) fn not_found(url: &str) -> CoreError {
    CoreError::NotFound(PathBuf::from(url))
}

#[derive(Debug, Clone)]
pub struct ShareStorage {
    client: Arc<dyn ShareClient>,
}

impl ShareStorage {
    pub fn new(client: Arc<dyn ShareClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ShareClient> {
        &self.client
    }

    fn item_from_stat(url: &str, stat: &ShareStat) -> ItemInfo {
        ItemInfo::remote(
            url,
            RemoteFields {
                size: stat.size,
                modified: stat.modified,
                permissions: stat.mode,
                is_dir: stat.kind == ShareKind::Dir,
                is_host: stat.kind == ShareKind::Host,
                is_workgroup: stat.kind == ShareKind::Workgroup,
                is_share: stat.kind == ShareKind::Share,
                authentication_path: authentication_path(url),
                ..Default::default()
            },
        )
    }
}

impl Storage for ShareStorage {
    fn kind(&self) -> LocationKind {
        LocationKind::NetworkShare
    }

    fn new_item_info(&self, path_or_url: &str) -> CoreResult<ItemInfo> {
        let url = normalize_share_url(path_or_url);
        if paths::is_root(&url) {
            return Ok(ItemInfo::url_root(SMB_ROOT_URL));
        }
        match self.client.stat(&url) {
            Ok(stat) => Ok(Self::item_from_stat(&url, &stat)),
            Err(CoreError::AuthenticationRequired { url: auth_url, .. }) => {
                trace!(url = %url, "share needs authentication");
                let fields = RemoteFields {
                    is_dir: true,
                    ..Default::default()
                };
                Ok(ItemInfo::remote(&url, fields).with_needs_authentication(auth_url))
            }
            Err(CoreError::NotFound(_)) => Ok(ItemInfo::missing(&url)),
            Err(e) => Err(e),
        }
    }

    fn new_dir_iterator(
        &self,
        path: &str,
        filter: DirFilter,
        recursive: bool,
    ) -> CoreResult<DirIterator> {
        let url = normalize_share_url(path);
        let first = self.client.list(&url)?;
        let walk = ShareWalk {
            client: Arc::clone(&self.client),
            stack: vec![first.into_iter()],
            filter,
            recursive,
        };
        Ok(DirIterator::new(url, Box::new(walk)))
    }

    fn new_file(&self, path: &str) -> Box<dyn ItemFile> {
        Box::new(ShareFile {
            client: Arc::clone(&self.client),
            url: normalize_share_url(path),
            offset: 0,
            mode: None,
        })
    }

    fn new_dir(&self, path: &str) -> Box<dyn ItemDir> {
        Box::new(ShareDir {
            client: Arc::clone(&self.client),
            url: normalize_share_url(path),
        })
    }

    fn url_belongs_to_location(&self, url: &str) -> bool {
        url.starts_with(SMB_ROOT_URL) || url.starts_with(CIFS_SCHEME)
    }

    fn set_authentication(&self, user: &str, password: &str) {
        self.client.set_credentials(user, password);
    }

    fn current_user(&self) -> String {
        self.client.user()
    }

    fn is_remote(&self) -> bool {
        true
    }
}

struct ShareWalk {
    client: Arc<dyn ShareClient>,
    stack: Vec<std::vec::IntoIter<ShareEntry>>,
    filter: DirFilter,
    recursive: bool,
}

impl Iterator for ShareWalk {
    type Item = CoreResult<ItemInfo>;

    fn next(&mut self) -> Option<CoreResult<ItemInfo>> {
        loop {
            let top = self.stack.last_mut()?;
            let Some(entry) = top.next() else {
                self.stack.pop();
                continue;
            };
            if self.recursive && entry.stat.kind.is_browsable() {
                match self.client.list(&entry.url) {
                    Ok(children) => self.stack.push(children.into_iter()),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
            }
            let item = ShareStorage::item_from_stat(&entry.url, &entry.stat);
            if self.filter.accepts(&item) {
                return Some(Ok(item));
            }
        }
    }
}

struct ShareFile {
    client: Arc<dyn ShareClient>,
    url: String,
    offset: u64,
    mode: Option<OpenMode>,
}

impl ShareFile {
    fn require_mode(&self, wanted: OpenMode) -> CoreResult<()> {
        if self.mode == Some(wanted) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!("file not open for {wanted:?}: {}", self.url)))
        }
    }
}

impl ItemFile for ShareFile {
    fn path(&self) -> &str {
        &self.url
    }

    fn open(&mut self, mode: OpenMode) -> CoreResult<()> {
        match mode {
            OpenMode::Read => {
                let stat = self.client.stat(&self.url)?;
                if stat.kind != ShareKind::File {
                    return Err(CoreError::Validation(format!("not a file: {}", self.url)));
                }
            }
            OpenMode::Write => self.client.create(&self.url)?,
        }
        self.offset = 0;
        self.mode = Some(mode);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.require_mode(OpenMode::Read)?;
        let n = self.client.read_at(&self.url, self.offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> CoreResult<usize> {
        self.require_mode(OpenMode::Write)?;
        let n = self.client.write_at(&self.url, self.offset, data)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn close(&mut self) {
        self.mode = None;
        self.offset = 0;
    }

    fn rename(&mut self, new_path: &str) -> CoreResult<()> {
        let target = normalize_share_url(new_path);
        if !target.starts_with(SMB_ROOT_URL) {
            return Err(CoreError::CrossDevice(PathBuf::from(new_path)));
        }
        self.client.rename(&self.url, &target)?;
        self.url = target;
        Ok(())
    }

    fn remove(&mut self) -> CoreResult<()> {
        self.close();
        self.client.unlink(&self.url)
    }

    fn link(&self, _target: &str) -> CoreResult<()> {
        Err(CoreError::Unsupported(format!("symbolic links on {}", self.url)))
    }

    fn permissions(&self) -> CoreResult<u32> {
        Ok(self.client.stat(&self.url)?.mode)
    }

    fn set_permissions(&mut self, mode: u32) -> CoreResult<()> {
        self.client.set_mode(&self.url, mode)
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.client.stat(&self.url)?.size)
    }
}

struct ShareDir {
    client: Arc<dyn ShareClient>,
    url: String,
}

impl ItemDir for ShareDir {
    fn path(&self) -> &str {
        &self.url
    }

    fn exists(&self) -> bool {
        self.client
            .stat(&self.url)
            .is_ok_and(|s| s.kind.is_browsable())
    }

    fn mkdir(&self) -> CoreResult<()> {
        self.client.mkdir(&self.url)
    }

    fn mkpath(&self) -> CoreResult<()> {
        let mut missing = Vec::new();
        let mut current = Some(self.url.clone());
        while let Some(url) = current {
            match self.client.stat(&url) {
                Ok(stat) if stat.kind.is_browsable() => break,
                Ok(_) => return Err(CoreError::NotADirectory(PathBuf::from(url))),
                Err(CoreError::NotFound(_)) => {
                    current = paths::parent(&url);
                    missing.push(url);
                }
                Err(e) => return Err(e),
            }
        }
        for url in missing.iter().rev() {
            self.client.mkdir(url)?;
        }
        Ok(())
    }

    fn rmdir(&self) -> CoreResult<()> {
        self.client.rmdir(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::memory_share::InMemoryShare;

    fn storage() -> (Arc<InMemoryShare>, ShareStorage) {
        let share = Arc::new(InMemoryShare::new());
        share.add_workgroup("WORKGROUP");
        share.add_share("host", "public", None);
        share.add_share("host", "private", Some(("alice", "secret")));
        share.put_file("smb://host/public/readme.txt", b"hello").unwrap();
        share.put_dir("smb://host/public/docs").unwrap();
        share.put_file("smb://host/public/docs/a.txt", b"a").unwrap();
        share.put_file("smb://host/private/key", b"k").unwrap();
        let client: Arc<dyn ShareClient> = share.clone();
        (share, ShareStorage::new(client))
    }

    #[test]
    fn url_normalisation_and_auth_path() {
        assert_eq!(normalize_share_url("cifs://host//share/"), "smb://host/share");
        assert_eq!(authentication_path("smb://host/share/a/b").as_deref(), Some("smb://host/share"));
        assert_eq!(authentication_path("smb://host").as_deref(), Some("smb://host"));
        assert_eq!(authentication_path("smb://"), None);
    }

    #[test]
    fn root_lists_hosts_and_workgroups() {
        let (_share, storage) = storage();
        let root = storage.new_item_info("smb://").unwrap();
        assert!(root.is_root());

        let items: Vec<ItemInfo> = storage
            .new_dir_iterator("smb://", DirFilter::all(), false)
            .unwrap()
            .collect();
        assert!(items.iter().any(|i| i.is_host() && i.name() == "host"));
        assert!(items.iter().any(|i| i.is_workgroup() && i.name() == "WORKGROUP"));
    }

    #[test]
    fn stat_maps_kinds() {
        let (_share, storage) = storage();
        let share = storage.new_item_info("smb://host/public").unwrap();
        assert!(share.is_share());
        assert!(share.is_browsable());
        assert_eq!(share.authentication_path(), Some("smb://host/public"));

        let file = storage.new_item_info("cifs://host/public/readme.txt").unwrap();
        assert!(file.is_file());
        assert_eq!(file.size(), 5);
        assert_eq!(file.url(), "smb://host/public/readme.txt");

        let missing = storage.new_item_info("smb://host/public/nope").unwrap();
        assert!(!missing.exists());
    }

    #[test]
    fn protected_share_flags_authentication() {
        let (_share, storage) = storage();
        let item = storage.new_item_info("smb://host/private/key").unwrap();
        assert!(item.needs_authentication());
        assert_eq!(item.authentication_path(), Some("smb://host/private"));

        storage.set_authentication("alice", "secret");
        assert_eq!(storage.current_user(), "alice");
        let item = storage.new_item_info("smb://host/private/key").unwrap();
        assert!(!item.needs_authentication());
        assert!(item.is_file());
    }

    #[test]
    fn recursive_iteration_walks_share() {
        let (_share, storage) = storage();
        let names: Vec<String> = storage
            .new_dir_iterator("smb://host/public", DirFilter::all(), true)
            .unwrap()
            .map(|i| i.url().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        let pos = |u: &str| names.iter().position(|n| n == u).unwrap();
        assert!(pos("smb://host/public/docs") < pos("smb://host/public/docs/a.txt"));
    }

    #[test]
    fn recursive_walk_fails_at_a_locked_share() {
        let (_share, storage) = storage();
        let walk = storage
            .new_dir_iterator("smb://host", DirFilter::all(), true)
            .unwrap()
            .into_items();
        assert!(walk.is_err());

        storage.set_authentication("alice", "secret");
        let items = storage
            .new_dir_iterator("smb://host", DirFilter::all(), true)
            .unwrap()
            .into_items()
            .unwrap();
        assert!(items.iter().any(|i| i.url() == "smb://host/private/key"));
    }

    #[test]
    fn file_handle_round_trip() {
        let (share, storage) = storage();
        let mut file = storage.new_file("smb://host/public/new.bin");
        file.open(OpenMode::Write).unwrap();
        file.write(b"abc").unwrap();
        file.write(b"def").unwrap();
        file.close();
        assert_eq!(share.contents("smb://host/public/new.bin").unwrap(), b"abcdef");
        assert_eq!(file.size().unwrap(), 6);

        let mut buf = [0u8; 4];
        file.open(OpenMode::Read).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
        file.close();

        assert!(file.link("x").is_err());
        assert!(matches!(file.rename("/tmp/x"), Err(CoreError::CrossDevice(_))));
        file.rename("smb://host/public/moved.bin").unwrap();
        assert!(share.contents("smb://host/public/moved.bin").is_some());
        file.remove().unwrap();
        assert!(share.contents("smb://host/public/moved.bin").is_none());
    }

    #[test]
    fn dir_handle_mkpath() {
        let (_share, storage) = storage();
        let dir = storage.new_dir("smb://host/public/x/y/z");
        assert!(!dir.exists());
        dir.mkpath().unwrap();
        assert!(dir.exists());
        dir.rmdir().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn disk_space_is_optimistic() {
        let (_share, storage) = storage();
        assert!(storage.is_there_disk_space("smb://host/public", u64::MAX));
        assert!(storage
            .fetch_external_changes("smb://host/public", &[], DirFilter::all())
            .unwrap()
            .is_none());
        assert!(storage.is_remote());
    }
}
