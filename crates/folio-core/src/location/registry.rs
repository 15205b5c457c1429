//! Resolution of path/URL strings onto backends, and the "current" location.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::fs::{paths, ItemInfo};
use crate::location::auth::AuthStore;
use crate::location::disk::DiskStorage;
use crate::location::share::{normalize_share_url, ShareClient, ShareStorage};
use crate::location::trash::TrashStorage;
use crate::location::{default_user, Backend, Location, LocationKind};

/// A URL with any embedded `user:password@` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanUrl {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl CleanUrl {
    pub fn parse(raw: &str) -> Self {
        let unchanged = || Self {
            url: raw.to_string(),
            user: None,
            password: None,
        };
        if paths::split_scheme(raw).is_none() {
            return unchanged();
        }
        let Ok(mut parsed) = url::Url::parse(raw) else {
            return unchanged();
        };
        if parsed.username().is_empty() && parsed.password().is_none() {
            return unchanged();
        }
        let user = Some(parsed.username().to_string()).filter(|u| !u.is_empty());
        let password = parsed.password().map(str::to_string);
        if parsed.set_username("").is_err() || parsed.set_password(None).is_err() {
            return unchanged();
        }
        Self {
            url: parsed.to_string(),
            user,
            password,
        }
    }

    pub fn has_authentication(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    current: Option<Location>,
    last_url_needs_authentication: bool,
}

/// Maps any path or URL onto exactly one backend and tracks the location
/// currently browsed.
#[derive(Debug)]
pub struct LocationRegistry {
    disk: Backend,
    trash: Backend,
    share: Backend,
    trash_storage: TrashStorage,
    auth: Arc<AuthStore>,
    state: Mutex<RegistryState>,
}

impl LocationRegistry {
    pub fn new(
        trash_root: impl Into<PathBuf>,
        share_client: Arc<dyn ShareClient>,
        auth: Arc<AuthStore>,
    ) -> Self {
        let trash_storage = TrashStorage::new(trash_root);
        Self {
            disk: Backend::LocalDisk(DiskStorage::new()),
            trash: Backend::TrashDisk(trash_storage.clone()),
            trash_storage,
            share: Backend::NetworkShare(ShareStorage::new(share_client)),
            auth,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn backend(&self, kind: LocationKind) -> &Backend {
        match kind {
            LocationKind::LocalDisk => &self.disk,
            LocationKind::TrashDisk => &self.trash,
            LocationKind::NetworkShare => &self.share,
        }
    }

    pub fn trash(&self) -> &TrashStorage {
        &self.trash_storage
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    /// Resolves `url` to its backend and normalised path.
    ///
    /// URLs are matched against each backend's scheme; bare absolute
    /// paths are local; relative paths resolve against the current
    /// location and inherit its backend.
    pub fn parse(&self, url: &str) -> CoreResult<(Backend, String)> {
        if url.contains(paths::URL_INDICATOR) {
            let backend = [&self.disk, &self.trash, &self.share]
                .into_iter()
                .find(|b| b.url_belongs_to_location(url))
                .ok_or_else(|| CoreError::Validation(format!("unsupported URL: {url}")))?;
            let path = match backend.kind() {
                LocationKind::LocalDisk => DiskStorage::local_path(url),
                LocationKind::TrashDisk => paths::remove_extra_slashes(url),
                LocationKind::NetworkShare => normalize_share_url(url),
            };
            return Ok((backend.clone(), path));
        }
        if paths::is_absolute(url) {
            return Ok((self.disk.clone(), paths::remove_extra_slashes(url)));
        }
        let current = self
            .current()
            .ok_or_else(|| CoreError::Validation(format!("relative path without a location: {url}")))?;
        let resolved = resolve_relative(current.url_path(), url);
        Ok((current.backend().clone(), resolved))
    }

    /// The backend owning `path`.
    pub fn backend_for(&self, path: &str) -> CoreResult<Backend> {
        self.parse(path).map(|(backend, _)| backend)
    }

    /// Stats `path` through its owning backend.
    pub fn item_info(&self, path: &str) -> CoreResult<ItemInfo> {
        let (backend, path) = self.parse(path)?;
        backend.new_item_info(&path)
    }

    /// The item at `url` if it is valid, or flagged as needing credentials.
    pub fn validate_url_path(&self, url: &str) -> Option<ItemInfo> {
        let item = self.item_info(url).ok()?;
        (item.is_valid() || item.needs_authentication()).then_some(item)
    }

    /// A browsable, readable location for `url`, without switching to it.
    pub fn resolve(&self, url: &str) -> Option<Location> {
        let (backend, path) = self.parse(url).ok()?;
        let info = backend.new_item_info(&path).ok()?;
        (info.is_valid() && info.is_browsable() && info.is_content_readable())
            .then(|| Location::new(backend, info))
    }

    /// Validates `url` and makes it the current location.
    ///
    /// Credentials passed in (or embedded in the URL) are applied before the
    /// first attempt on remote backends. On an authentication failure any
    /// stored credentials are retried once before
    /// [`CoreError::AuthenticationRequired`] is returned. Successful explicit
    /// credentials are cached, and written to disk when `save` is set.
    pub fn set_new_path(
        &self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
        save: bool,
    ) -> CoreResult<ItemInfo> {
        let clean = CleanUrl::parse(url);
        let user = user.map(str::to_string).or(clean.user.clone());
        let password = password.map(str::to_string).or(clean.password.clone()).unwrap_or_default();

        let (backend, path) = self.parse(&clean.url)?;
        if backend.is_remote() {
            match &user {
                Some(user) => backend.set_authentication(user, &password),
                None => backend.set_authentication(&default_user(), ""),
            }
        }

        let mut item = backend.new_item_info(&path)?;
        if item.needs_authentication() {
            let auth_path = item.authentication_path().unwrap_or(&path).to_string();
            if let Some(stored) = self.auth.get(&auth_path) {
                let already_tried = user.as_deref() == Some(stored.user.as_str()) && password == stored.password;
                if !already_tried {
                    debug!(url = %auth_path, user = %stored.user, "retrying with stored credentials");
                    backend.set_authentication(&stored.user, &stored.password);
                    item = backend.new_item_info(&path)?;
                }
            }
            if item.needs_authentication() {
                self.lock().last_url_needs_authentication = true;
                warn!(url = %auth_path, "authentication required");
                return Err(CoreError::AuthenticationRequired {
                    user: backend.current_user(),
                    url: auth_path,
                });
            }
        }
        self.lock().last_url_needs_authentication = false;

        if !item.is_valid() {
            return Err(CoreError::NotFound(PathBuf::from(&path)));
        }
        if !item.is_browsable() {
            return Err(CoreError::NotADirectory(PathBuf::from(&path)));
        }
        if !item.is_content_readable() {
            return Err(CoreError::PermissionDenied(PathBuf::from(&path)));
        }

        if backend.is_remote() {
            if let (Some(user), Some(auth_path)) = (&user, item.authentication_path()) {
                self.auth.store(auth_path, user, &password, save)?;
            }
        }

        info!(url = %item.url(), kind = %backend.kind(), "location changed");
        self.lock().current = Some(Location::new(backend, item.clone()));
        Ok(item)
    }

    /// `true` if the last [`set_new_path`](Self::set_new_path) stopped at a
    /// credential prompt.
    pub fn last_url_needs_authentication(&self) -> bool {
        self.lock().last_url_needs_authentication
    }

    pub fn current(&self) -> Option<Location> {
        self.lock().current.clone()
    }

    pub fn current_url(&self) -> Option<String> {
        self.lock().current.as_ref().map(|l| l.url_path().to_string())
    }

    pub fn current_kind(&self) -> Option<LocationKind> {
        self.lock().current.as_ref().map(Location::kind)
    }

    /// `true` when the current location is the trash root.
    pub fn is_browsing_trash_root(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|l| l.kind() == LocationKind::TrashDisk && l.is_root())
    }

    /// Moves the current location to its parent without listing.
    pub fn become_parent(&self) -> Option<ItemInfo> {
        let mut location = self.current()?;
        if !location.become_parent() {
            return None;
        }
        let info = location.info().clone();
        self.lock().current = Some(location);
        Some(info)
    }

    /// Re-stats the current location.
    pub fn refresh_current(&self) -> CoreResult<Option<ItemInfo>> {
        let Some(mut location) = self.current() else {
            return Ok(None);
        };
        location.refresh_info()?;
        let info = location.info().clone();
        self.lock().current = Some(location);
        Ok(Some(info))
    }
}

/// Joins `relative` onto `base`, honouring `.` and `..`.
fn resolve_relative(base: &str, relative: &str) -> String {
    let mut current = base.to_string();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if let Some(parent) = paths::parent(&current) {
                    current = parent;
                }
            }
            name => current = paths::join(&current, name),
        }
    }
    current
}
