//! Item metadata snapshot.

use std::path::Path;
use std::time::SystemTime;

use unicode_normalization::UnicodeNormalization;

use crate::fs::paths;

/// Immutable snapshot of one storage entry's metadata.
///
/// `ItemInfo` is created by a backend on listing or stat and is never
/// updated in place: re-fetch to observe changes. The `with_*` methods
/// consume the value and return a modified copy.
///
/// `path` is what the backend uses for I/O (a local path or a share URL);
/// `url` is what a user sees and navigates to. They differ only for trash
/// items, whose `url` is `trash:///name` while `path` points into the
/// trash `files/` directory.
///
/// # Examples
///
/// ```no_run
/// use folio_core::ItemInfo;
///
/// let item = ItemInfo::local("Cargo.toml");
/// assert!(item.exists());
/// assert_eq!(item.name(), "Cargo.toml");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemInfo {
    path: String,
    url: String,
    name: String,
    size: u64,
    created: Option<SystemTime>,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
    permissions: u32,
    exists: bool,
    is_dir: bool,
    is_file: bool,
    is_symlink: bool,
    is_root: bool,
    is_readable: bool,
    is_writable: bool,
    is_executable: bool,
    is_remote: bool,
    is_host: bool,
    is_workgroup: bool,
    is_share: bool,
    needs_authentication: bool,
    authentication_path: Option<String>,
    symlink_target: Option<String>,
    trash_origin: Option<String>,
    selected: bool,
    mime_type: Option<String>,
}

/// Raw fields a network backend reports for one remote entry.
#[derive(Debug, Clone, Default)]
pub struct RemoteFields {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub permissions: u32,
    pub is_dir: bool,
    pub is_host: bool,
    pub is_workgroup: bool,
    pub is_share: bool,
    pub needs_authentication: bool,
    pub authentication_path: Option<String>,
}

impl ItemInfo {
    /// Stats a local path without following a final symlink.
    ///
    /// A missing path yields an item whose [`exists`](Self::exists) is `false`.
    pub fn local(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::symlink_metadata(path) {
            Ok(metadata) => Self::from_metadata(path, &metadata),
            Err(_) => Self::missing(path.to_string_lossy().as_ref()),
        }
    }

    /// Creates an item from a local path and its (symlink) metadata.
    pub fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> Self {
        let path_str = paths::remove_extra_slashes(&path.to_string_lossy());
        let name = nfc_name(paths::file_name(&path_str));
        let is_symlink = metadata.file_type().is_symlink();
        let is_dir = metadata.is_dir();
        let (readable, writable, executable) = access_flags(path);
        let symlink_target = if is_symlink {
            std::fs::read_link(path)
                .ok()
                .map(|t| t.to_string_lossy().into_owned())
        } else {
            None
        };

        Self {
            url: path_str.clone(),
            is_root: paths::is_root(&path_str),
            mime_type: Some(guess_mime(&name, is_dir)),
            path: path_str,
            name,
            size: if is_dir { 0 } else { metadata.len() },
            created: metadata.created().ok(),
            modified: metadata.modified().ok(),
            accessed: metadata.accessed().ok(),
            permissions: mode_bits(metadata),
            exists: true,
            is_dir,
            is_file: metadata.is_file(),
            is_symlink,
            is_readable: readable,
            is_writable: writable,
            is_executable: executable,
            symlink_target,
            ..Default::default()
        }
    }

    /// Creates an item describing a path that does not exist.
    pub fn missing(path: &str) -> Self {
        let path = paths::remove_extra_slashes(path);
        Self {
            name: nfc_name(paths::file_name(&path)),
            url: path.clone(),
            path,
            ..Default::default()
        }
    }

    /// Creates the always-browsable root item of a URL scheme (`smb://`).
    pub fn url_root(url: &str) -> Self {
        Self {
            path: url.to_string(),
            url: url.to_string(),
            exists: true,
            is_dir: true,
            is_root: true,
            is_readable: true,
            is_executable: true,
            is_remote: true,
            mime_type: Some(guess_mime("", true)),
            ..Default::default()
        }
    }

    /// Creates an item for a remote entry reported by a network backend.
    pub fn remote(url: &str, fields: RemoteFields) -> Self {
        let url = paths::remove_extra_slashes(url);
        let name = nfc_name(paths::file_name(&url));
        let browsable_kind = fields.is_dir || fields.is_host || fields.is_share || fields.is_workgroup;
        Self {
            mime_type: Some(guess_mime(&name, browsable_kind)),
            path: url.clone(),
            is_root: paths::is_root(&url),
            url,
            name,
            size: if browsable_kind { 0 } else { fields.size },
            created: fields.created,
            modified: fields.modified,
            accessed: fields.accessed,
            permissions: fields.permissions,
            exists: true,
            is_dir: browsable_kind,
            is_file: !browsable_kind,
            is_readable: !fields.needs_authentication,
            is_writable: fields.permissions & 0o200 != 0,
            is_executable: browsable_kind || fields.permissions & 0o100 != 0,
            is_remote: true,
            is_host: fields.is_host,
            is_workgroup: fields.is_workgroup,
            is_share: fields.is_share,
            needs_authentication: fields.needs_authentication,
            authentication_path: fields.authentication_path,
            ..Default::default()
        }
    }

    /// Returns a copy whose user-facing URL is `url`.
    pub fn with_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            is_root: paths::is_root(&url),
            url,
            ..self
        }
    }

    /// Returns a copy carrying the original location of a trashed item.
    pub fn with_trash_origin(self, origin: Option<String>) -> Self {
        Self {
            trash_origin: origin,
            ..self
        }
    }

    /// Returns a copy with the selection flag set to `selected`.
    pub fn with_selection(self, selected: bool) -> Self {
        Self { selected, ..self }
    }

    /// Returns a copy flagged as needing credentials for `auth_path`.
    pub fn with_needs_authentication(self, auth_path: impl Into<String>) -> Self {
        Self {
            needs_authentication: true,
            is_readable: false,
            authentication_path: Some(auth_path.into()),
            ..self
        }
    }

    /// Backend path used for I/O.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// User-facing URL (equal to [`path`](Self::path) except for trash items).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The last component of the path (empty for roots).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes. Always `0` for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created(&self) -> Option<SystemTime> {
        self.created
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn accessed(&self) -> Option<SystemTime> {
        self.accessed
    }

    /// Unix permission bits (`0o777` mask plus special bits).
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// `true` for an existing item or a URL root.
    pub fn is_valid(&self) -> bool {
        self.exists || self.is_root
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_readable(&self) -> bool {
        self.is_readable
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn is_executable(&self) -> bool {
        self.is_executable
    }

    /// Readable, and for directories also traversable.
    pub fn is_content_readable(&self) -> bool {
        if self.is_dir {
            self.is_readable && self.is_executable
        } else {
            self.is_readable
        }
    }

    /// Something that can be entered like a directory.
    pub fn is_browsable(&self) -> bool {
        self.is_dir || self.is_host || self.is_share || self.is_workgroup
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_workgroup(&self) -> bool {
        self.is_workgroup
    }

    pub fn is_share(&self) -> bool {
        self.is_share
    }

    pub fn needs_authentication(&self) -> bool {
        self.needs_authentication
    }

    /// Minimal URL prefix the credentials for this item are stored under.
    pub fn authentication_path(&self) -> Option<&str> {
        self.authentication_path.as_deref()
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.symlink_target.as_deref()
    }

    /// Original absolute path of an item living in the trash.
    pub fn trash_origin(&self) -> Option<&str> {
        self.trash_origin.as_deref()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// `true` if the name starts with `.`.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Parent URL, `None` at a root.
    pub fn parent_url(&self) -> Option<String> {
        paths::parent(&self.url)
    }

    /// `true` when both snapshots describe the same storage entry.
    pub fn same_item(&self, other: &ItemInfo) -> bool {
        self.path == other.path
    }

    /// `true` when size, modification time or permissions differ.
    pub fn differs_from(&self, other: &ItemInfo) -> bool {
        self.size != other.size
            || self.modified != other.modified
            || self.permissions != other.permissions
    }
}

fn nfc_name(name: &str) -> String {
    name.nfc().collect()
}

fn guess_mime(name: &str, is_dir: bool) -> String {
    if is_dir {
        return "inode/directory".to_string();
    }
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn access_flags(path: &Path) -> (bool, bool, bool) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return (false, false, false);
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the calls.
    unsafe {
        (
            libc::access(c_path.as_ptr(), libc::R_OK) == 0,
            libc::access(c_path.as_ptr(), libc::W_OK) == 0,
            libc::access(c_path.as_ptr(), libc::X_OK) == 0,
        )
    }
}

#[cfg(not(unix))]
fn access_flags(path: &Path) -> (bool, bool, bool) {
    match std::fs::metadata(path) {
        Ok(m) => (true, !m.permissions().readonly(), m.is_dir()),
        Err(_) => (false, false, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn item_from_regular_file() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("test.txt");
        fs::write(&file_path, "hello").unwrap();

        let item = ItemInfo::local(&file_path);

        assert_eq!(item.name(), "test.txt");
        assert_eq!(item.size(), 5);
        assert!(item.exists());
        assert!(item.is_file());
        assert!(!item.is_dir());
        assert!(!item.is_hidden());
        assert!(item.is_readable());
        assert!(item.modified().is_some());
        assert_eq!(item.path(), file_path.to_string_lossy());
        assert_eq!(item.url(), item.path());
        assert_eq!(item.mime_type(), Some("text/plain"));
    }

    #[test]
    fn item_from_directory() {
        let tmp = TempDir::new().unwrap();
        let dir_path = tmp.path().join("subdir");
        fs::create_dir(&dir_path).unwrap();
        fs::write(dir_path.join("a.txt"), "data").unwrap();

        let item = ItemInfo::local(&dir_path);

        assert!(item.is_dir());
        assert!(item.is_browsable());
        assert!(item.is_content_readable());
        assert_eq!(item.size(), 0, "directory size should always be 0");
        assert_eq!(item.mime_type(), Some("inode/directory"));
    }

    #[test]
    fn missing_item_is_invalid() {
        let item = ItemInfo::local("/definitely/not/here.txt");
        assert!(!item.exists());
        assert!(!item.is_valid());
        assert_eq!(item.name(), "here.txt");
    }

    #[test]
    fn hidden_detection() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join(".hidden");
        fs::write(&file_path, "secret").unwrap();
        assert!(ItemInfo::local(&file_path).is_hidden());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_not_followed() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("target_dir");
        fs::create_dir(&target).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let item = ItemInfo::local(&link);

        assert!(item.is_symlink());
        assert!(!item.is_dir());
        assert_eq!(item.symlink_target(), Some(target.to_string_lossy().as_ref()));
    }

    #[cfg(unix)]
    #[test]
    fn permission_bits_are_captured() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("script.sh");
        fs::write(&file_path, "#!/bin/sh").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o750)).unwrap();

        assert_eq!(ItemInfo::local(&file_path).permissions(), 0o750);
    }

    #[test]
    fn remote_share_is_browsable() {
        let item = ItemInfo::remote(
            "smb://host/share",
            RemoteFields {
                is_share: true,
                authentication_path: Some("smb://host/share".into()),
                ..Default::default()
            },
        );
        assert!(item.is_remote());
        assert!(item.is_share());
        assert!(item.is_browsable());
        assert_eq!(item.name(), "share");
        assert_eq!(item.authentication_path(), Some("smb://host/share"));
    }

    #[test]
    fn with_methods_return_new_values() {
        let item = ItemInfo::missing("/tmp/x");
        let selected = item.clone().with_selection(true);
        assert!(!item.is_selected());
        assert!(selected.is_selected());

        let auth = item.with_needs_authentication("smb://h/s");
        assert!(auth.needs_authentication());
        assert!(!auth.is_readable());
    }

    #[test]
    fn url_root_is_valid_and_browsable() {
        let root = ItemInfo::url_root("smb://");
        assert!(root.is_valid());
        assert!(root.is_root());
        assert!(root.is_browsable());
        assert_eq!(root.parent_url(), None);
    }

    #[test]
    fn differs_from_detects_size_change() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("f");
        fs::write(&file_path, "a").unwrap();
        let before = ItemInfo::local(&file_path);
        fs::write(&file_path, "abc").unwrap();
        let after = ItemInfo::local(&file_path);
        assert!(after.differs_from(&before));
        assert!(after.same_item(&before));
    }
}
