//! In-process [`ShareClient`] with hosts, workgroups, shares and
//! per-share credentials.
//!
//! Used by tests and the CLI `--demo-share` switch in place of a real
//! network client.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::{CoreError, CoreResult};
use crate::fs::paths;
use crate::location::default_user;
use crate::location::share::{
    authentication_path, normalize_share_url, not_found, ShareClient, ShareEntry, ShareKind,
    ShareStat, SMB_ROOT_URL,
};

#[derive(Debug, Clone)]
struct Node {
    kind: ShareKind,
    data: Vec<u8>,
    mode: u32,
    modified: SystemTime,
}

impl Node {
    fn new(kind: ShareKind) -> Self {
        Self {
            kind,
            data: Vec::new(),
            mode: if kind == ShareKind::File { 0o644 } else { 0o755 },
            modified: SystemTime::now(),
        }
    }

    fn stat(&self) -> ShareStat {
        ShareStat {
            kind: self.kind,
            size: self.data.len() as u64,
            modified: Some(self.modified),
            mode: self.mode,
        }
    }
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,
    credentials: HashMap<String, (String, String)>,
    user: String,
    password: String,
}

#[derive(Debug)]
pub struct InMemoryShare {
    state: Mutex<State>,
}

impl Default for InMemoryShare {
    fn default() -> Self {
        Self::new()
    }
}

fn io_error(kind: std::io::ErrorKind, what: &str, url: &str) -> CoreError {
    CoreError::Io(std::io::Error::new(kind, format!("{what}: {url}")))
}

impl State {
    /// Checks the current credentials against the share `url` lives in.
    fn check_access(&self, url: &str) -> CoreResult<()> {
        let Some(auth_path) = authentication_path(url) else {
            return Ok(());
        };
        match self.credentials.get(&auth_path) {
            Some((user, password)) if *user != self.user || *password != self.password => {
                Err(CoreError::AuthenticationRequired {
                    user: self.user.clone(),
                    url: auth_path,
                })
            }
            _ => Ok(()),
        }
    }

    fn kind_of(&self, url: &str) -> Option<ShareKind> {
        if paths::is_root(url) {
            return Some(ShareKind::Workgroup);
        }
        self.nodes.get(url).map(|n| n.kind)
    }

    /// The parent must be a share or a directory to hold files/dirs.
    fn check_container(&self, url: &str) -> CoreResult<()> {
        let parent = paths::parent(url).ok_or_else(|| not_found(url))?;
        match self.kind_of(&parent) {
            Some(ShareKind::Share | ShareKind::Dir) => Ok(()),
            Some(_) => Err(CoreError::PermissionDenied(parent.into())),
            None => Err(not_found(&parent)),
        }
    }

    fn file_mut(&mut self, url: &str) -> CoreResult<&mut Node> {
        match self.nodes.get_mut(url) {
            Some(node) if node.kind == ShareKind::File => Ok(node),
            Some(_) => Err(CoreError::Validation(format!("not a file: {url}"))),
            None => Err(not_found(url)),
        }
    }

    fn has_children(&self, url: &str) -> bool {
        let prefix = format!("{url}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

impl InMemoryShare {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                nodes: BTreeMap::new(),
                credentials: HashMap::new(),
                user: default_user(),
                password: String::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_workgroup(&self, name: &str) {
        self.lock()
            .nodes
            .insert(format!("{SMB_ROOT_URL}{name}"), Node::new(ShareKind::Workgroup));
    }

    pub fn add_host(&self, host: &str) {
        self.lock()
            .nodes
            .entry(format!("{SMB_ROOT_URL}{host}"))
            .or_insert_with(|| Node::new(ShareKind::Host));
    }

    /// Adds `smb://host/share`, optionally protected by `(user, password)`.
    pub fn add_share(&self, host: &str, share: &str, credentials: Option<(&str, &str)>) {
        self.add_host(host);
        let url = format!("{SMB_ROOT_URL}{host}/{share}");
        let mut state = self.lock();
        if let Some((user, password)) = credentials {
            state
                .credentials
                .insert(url.clone(), (user.to_string(), password.to_string()));
        }
        state.nodes.insert(url, Node::new(ShareKind::Share));
    }

    /// Creates or replaces a file, ignoring credentials.
    pub fn put_file(&self, url: &str, data: &[u8]) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_container(&url)?;
        let mut node = Node::new(ShareKind::File);
        node.data = data.to_vec();
        state.nodes.insert(url, node);
        Ok(())
    }

    /// Creates a directory, ignoring credentials.
    pub fn put_dir(&self, url: &str) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_container(&url)?;
        state.nodes.insert(url, Node::new(ShareKind::Dir));
        Ok(())
    }

    /// File contents, ignoring credentials.
    pub fn contents(&self, url: &str) -> Option<Vec<u8>> {
        let url = normalize_share_url(url);
        self.lock()
            .nodes
            .get(&url)
            .filter(|n| n.kind == ShareKind::File)
            .map(|n| n.data.clone())
    }
}

impl ShareClient for InMemoryShare {
    fn set_credentials(&self, user: &str, password: &str) {
        let mut state = self.lock();
        state.user = user.to_string();
        state.password = password.to_string();
    }

    fn user(&self) -> String {
        self.lock().user.clone()
    }

    fn stat(&self, url: &str) -> CoreResult<ShareStat> {
        let url = normalize_share_url(url);
        let state = self.lock();
        if paths::is_root(&url) {
            return Ok(Node::new(ShareKind::Workgroup).stat());
        }
        state.check_access(&url)?;
        state.nodes.get(&url).map(Node::stat).ok_or_else(|| not_found(&url))
    }

    fn list(&self, url: &str) -> CoreResult<Vec<ShareEntry>> {
        let url = normalize_share_url(url);
        let state = self.lock();
        state.check_access(&url)?;
        match state.kind_of(&url) {
            Some(ShareKind::File) => {
                return Err(CoreError::NotADirectory(url.into()));
            }
            Some(_) => {}
            None => return Err(not_found(&url)),
        }
        let parent = if paths::is_root(&url) {
            SMB_ROOT_URL.to_string()
        } else {
            url.clone()
        };
        Ok(state
            .nodes
            .iter()
            .filter(|(key, _)| paths::parent(key).as_deref() == Some(parent.as_str()))
            .map(|(key, node)| ShareEntry {
                url: key.clone(),
                stat: node.stat(),
            })
            .collect())
    }

    fn read_at(&self, url: &str, offset: u64, buf: &mut [u8]) -> CoreResult<usize> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        let node = state.file_mut(&url)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(node.data.len());
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, url: &str, offset: u64, data: &[u8]) -> CoreResult<usize> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        let node = state.file_mut(&url)?;
        let start = usize::try_from(offset)
            .map_err(|_| io_error(std::io::ErrorKind::InvalidInput, "offset too large", &url))?;
        if node.data.len() < start + data.len() {
            node.data.resize(start + data.len(), 0);
        }
        node.data[start..start + data.len()].copy_from_slice(data);
        node.modified = SystemTime::now();
        Ok(data.len())
    }

    fn create(&self, url: &str) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        state.check_container(&url)?;
        match state.kind_of(&url) {
            Some(ShareKind::File) => {
                let node = state.file_mut(&url)?;
                node.data.clear();
                node.modified = SystemTime::now();
            }
            Some(_) => return Err(io_error(std::io::ErrorKind::AlreadyExists, "is a directory", &url)),
            None => {
                state.nodes.insert(url, Node::new(ShareKind::File));
            }
        }
        Ok(())
    }

    fn mkdir(&self, url: &str) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        state.check_container(&url)?;
        if state.nodes.contains_key(&url) {
            return Err(io_error(std::io::ErrorKind::AlreadyExists, "already exists", &url));
        }
        state.nodes.insert(url, Node::new(ShareKind::Dir));
        Ok(())
    }

    fn rmdir(&self, url: &str) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        match state.kind_of(&url) {
            Some(ShareKind::Dir) => {}
            Some(_) => return Err(CoreError::NotADirectory(url.into())),
            None => return Err(not_found(&url)),
        }
        if state.has_children(&url) {
            return Err(io_error(std::io::ErrorKind::Other, "directory not empty", &url));
        }
        state.nodes.remove(&url);
        Ok(())
    }

    fn unlink(&self, url: &str) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        state.file_mut(&url)?;
        state.nodes.remove(&url);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> CoreResult<()> {
        let from = normalize_share_url(from);
        let to = normalize_share_url(to);
        let mut state = self.lock();
        state.check_access(&from)?;
        state.check_access(&to)?;
        match state.kind_of(&from) {
            Some(ShareKind::File | ShareKind::Dir) => {}
            Some(_) => return Err(CoreError::PermissionDenied(from.into())),
            None => return Err(not_found(&from)),
        }
        state.check_container(&to)?;
        if state.nodes.contains_key(&to) {
            return Err(io_error(std::io::ErrorKind::AlreadyExists, "already exists", &to));
        }
        if paths::is_inside(&to, &from) {
            return Err(CoreError::Validation(format!("cannot move {from} into itself")));
        }
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|k| paths::is_inside(k, &from))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = state.nodes.remove(&key) {
                state.nodes.insert(paths::rebase(&key, &from, &to), node);
            }
        }
        Ok(())
    }

    fn set_mode(&self, url: &str, mode: u32) -> CoreResult<()> {
        let url = normalize_share_url(url);
        let mut state = self.lock();
        state.check_access(&url)?;
        let node = state.nodes.get_mut(&url).ok_or_else(|| not_found(&url))?;
        node.mode = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share() -> InMemoryShare {
        let share = InMemoryShare::new();
        share.add_share("nas", "media", None);
        share.add_share("nas", "vault", Some(("bob", "pw")));
        share.put_dir("smb://nas/media/music").unwrap();
        share.put_file("smb://nas/media/music/song.ogg", b"la la").unwrap();
        share
    }

    #[test]
    fn files_cannot_live_on_a_host() {
        let share = share();
        assert!(matches!(
            share.put_file("smb://nas/loose.txt", b"x"),
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(share.put_file("smb://nowhere/s/x", b"x").is_err());
    }

    #[test]
    fn list_host_shows_shares() {
        let share = share();
        let entries = share.list("smb://nas").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.stat.kind == ShareKind::Share));
    }

    #[test]
    fn vault_requires_matching_credentials() {
        let share = share();
        let err = share.list("smb://nas/vault").unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationRequired { ref url, .. } if url == "smb://nas/vault"));

        share.set_credentials("bob", "wrong");
        assert!(share.stat("smb://nas/vault").is_err());

        share.set_credentials("bob", "pw");
        assert!(share.list("smb://nas/vault").unwrap().is_empty());
    }

    #[test]
    fn rename_moves_subtree() {
        let share = share();
        share.rename("smb://nas/media/music", "smb://nas/media/tunes").unwrap();
        assert!(share.contents("smb://nas/media/tunes/song.ogg").is_some());
        assert!(share.stat("smb://nas/media/music").is_err());
        assert!(share
            .rename("smb://nas/media/tunes", "smb://nas/media/tunes/inner")
            .is_err());
    }

    #[test]
    fn rmdir_requires_empty() {
        let share = share();
        assert!(share.rmdir("smb://nas/media/music").is_err());
        share.unlink("smb://nas/media/music/song.ogg").unwrap();
        share.rmdir("smb://nas/media/music").unwrap();
        assert!(share.rmdir("smb://nas/media").is_err());
    }

    #[test]
    fn sparse_write_and_read_past_end() {
        let share = share();
        share.create("smb://nas/media/f").unwrap();
        share.write_at("smb://nas/media/f", 2, b"xy").unwrap();
        assert_eq!(share.contents("smb://nas/media/f").unwrap(), vec![0, 0, b'x', b'y']);
        let mut buf = [0u8; 8];
        assert_eq!(share.read_at("smb://nas/media/f", 10, &mut buf).unwrap(), 0);
    }
}
