//! Shared services handed to every listing model and engine.
//!
//! Nothing here is process-global: a frontend builds one [`Services`] and
//! clones it into each window. The worker thread stops and the caches are
//! dropped when the last clone goes away.

use std::sync::Arc;

use tracing::debug;

use crate::action::RemoveNotifier;
use crate::config::Config;
use crate::error::CoreResult;
use crate::location::{AuthStore, InMemoryShare, LocationRegistry, ShareClient};
use crate::nav::worker::IoWorker;

#[derive(Debug, Clone)]
pub struct Services {
    pub worker: Arc<IoWorker>,
    pub auth: Arc<AuthStore>,
    pub removals: Arc<RemoveNotifier>,
    pub config: Arc<Config>,
    /// Client every network-share location talks through.
    pub share: Arc<dyn ShareClient>,
}

impl Services {
    /// Builds services from `config`, opening the credential store it names.
    ///
    /// Without a real network client, shares resolve against an empty
    /// [`InMemoryShare`]; use [`with_share`](Self::with_share) to plug one in.
    pub fn new(config: Config) -> CoreResult<Self> {
        let auth = match config.auth.resolve_store_path() {
            Some(path) => AuthStore::open(path)?,
            None => AuthStore::in_memory(),
        };
        Ok(Self {
            worker: Arc::new(IoWorker::new()?),
            auth: Arc::new(auth),
            removals: Arc::new(RemoveNotifier::new()),
            config: Arc::new(config),
            share: Arc::new(InMemoryShare::new()),
        })
    }

    /// Services that never touch the user's credential store.
    pub fn in_memory(config: Config) -> CoreResult<Self> {
        Ok(Self {
            worker: Arc::new(IoWorker::new()?),
            auth: Arc::new(AuthStore::in_memory()),
            removals: Arc::new(RemoveNotifier::new()),
            config: Arc::new(config),
            share: Arc::new(InMemoryShare::new()),
        })
    }

    pub fn with_share(mut self, share: Arc<dyn ShareClient>) -> Self {
        self.share = share;
        self
    }

    /// A fresh registry over these services, with no current location.
    pub fn registry(&self) -> CoreResult<LocationRegistry> {
        let trash_root = self.config.trash.resolve_root().ok_or_else(|| {
            crate::error::CoreError::Validation("cannot determine the trash directory".into())
        })?;
        debug!(trash = %trash_root.display(), "creating location registry");
        Ok(LocationRegistry::new(
            trash_root,
            Arc::clone(&self.share),
            Arc::clone(&self.auth),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrashConfig;
    use tempfile::TempDir;

    #[test]
    fn clones_share_the_same_state() {
        let services = Services::in_memory(Config::default()).unwrap();
        let other = services.clone();
        assert!(Arc::ptr_eq(&services.auth, &other.auth));
        assert!(Arc::ptr_eq(&services.removals, &other.removals));
        assert!(Arc::ptr_eq(&services.worker, &other.worker));
    }

    #[test]
    fn registry_uses_configured_trash_root() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            trash: TrashConfig {
                root: Some(tmp.path().join("bin")),
            },
            ..Config::default()
        };
        let services = Services::in_memory(config).unwrap();
        let registry = services.registry().unwrap();
        assert_eq!(registry.trash().root(), tmp.path().join("bin"));
    }
}
