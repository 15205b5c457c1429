//! Credential cache for network shares.
//!
//! Entries are keyed by the minimal URL that needs credentials (usually
//! `smb://host/share`). Lookups fall back to the host-only URL. Entries
//! stored with `persist` are written to an INI file whose passwords are
//! obfuscated, which keeps them from casual view and nothing more: this
//! is not a security boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::fs::ini::Ini;
use crate::fs::paths;

const SEPARATOR_REPLACEMENT: char = '}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    pub user: String,
    pub password: String,
    pub persist: bool,
}

#[derive(Debug, Default)]
pub struct AuthStore {
    entries: Mutex<HashMap<String, AuthEntry>>,
    store_path: Option<PathBuf>,
}

impl AuthStore {
    /// A cache that never touches the disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store at `path`, loading saved entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let mut entries = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let ini = Ini::parse(&text);
                for group in ini.groups() {
                    let (Some(user), Some(password)) = (ini.get(group, "user"), ini.get(group, "password"))
                    else {
                        continue;
                    };
                    let Some(password) = deobfuscate(password) else {
                        warn!(group, "skipping unreadable stored password");
                        continue;
                    };
                    entries.insert(
                        group.replace(SEPARATOR_REPLACEMENT, "/"),
                        AuthEntry {
                            user: user.to_string(),
                            password,
                            persist: true,
                        },
                    );
                }
                debug!(path = %path.display(), count = entries.len(), "loaded stored credentials");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::from_io(e, &path)),
        }
        Ok(Self {
            entries: Mutex::new(entries),
            store_path: Some(path),
        })
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AuthEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Credentials for `url`, trying the exact key, then the host-only URL.
    pub fn get(&self, url: &str) -> Option<AuthEntry> {
        let key = paths::remove_extra_slashes(url);
        let entries = self.lock();
        if let Some(entry) = entries.get(&key) {
            return Some(entry.clone());
        }
        host_only(&key).and_then(|host| entries.get(&host).cloned())
    }

    /// Caches credentials for `url`; with `persist` also writes the store file.
    pub fn store(&self, url: &str, user: &str, password: &str, persist: bool) -> CoreResult<()> {
        let key = paths::remove_extra_slashes(url);
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(
                key.clone(),
                AuthEntry {
                    user: user.to_string(),
                    password: password.to_string(),
                    persist,
                },
            );
            entries.clone()
        };
        debug!(url = %key, user, persist, "stored credentials");
        if persist {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    pub fn remove(&self, url: &str) -> CoreResult<bool> {
        let key = paths::remove_extra_slashes(url);
        let (removed, snapshot) = {
            let mut entries = self.lock();
            let removed = entries.remove(&key);
            (removed, entries.clone())
        };
        if removed.as_ref().is_some_and(|e| e.persist) {
            self.save(&snapshot)?;
        }
        Ok(removed.is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn save(&self, entries: &HashMap<String, AuthEntry>) -> CoreResult<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let mut keys: Vec<&String> = entries.iter().filter(|(_, e)| e.persist).map(|(k, _)| k).collect();
        keys.sort();
        let mut ini = Ini::new();
        for key in keys {
            let entry = &entries[key];
            let group = key.replace('/', &SEPARATOR_REPLACEMENT.to_string());
            ini.set(&group, "user", entry.user.as_str());
            ini.set(&group, "password", obfuscate(&entry.password));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::from_io(e, parent))?;
        }
        std::fs::write(path, ini.to_string()).map_err(|e| CoreError::from_io(e, path))
    }
}

/// `scheme://host` for any URL with a host.
fn host_only(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let candidate = format!("{}://{}", parsed.scheme(), host);
    (candidate != url).then_some(candidate)
}

/// Shifts each byte by its position and hex-encodes the result.
pub fn obfuscate(plain: &str) -> String {
    let shifted: Vec<u8> = plain
        .bytes()
        .enumerate()
        .map(|(i, b)| b.wrapping_sub(31).wrapping_add(i as u8))
        .collect();
    hex::encode(shifted)
}

/// Inverse of [`obfuscate`]. `None` if `encoded` is not valid.
pub fn deobfuscate(encoded: &str) -> Option<String> {
    let bytes = hex::decode(encoded).ok()?;
    let plain: Vec<u8> = bytes
        .into_iter()
        .enumerate()
        .map(|(i, b)| b.wrapping_sub(i as u8).wrapping_add(31))
        .collect();
    String::from_utf8(plain).ok()
}
