//! Change notifications for the directory being browsed.
//!
//! Native notifications arrive in bursts. [`Debouncer`] collapses a burst on
//! one path into a single reconciliation request: the first raw event stops
//! watching the path and arms a timer, later events restart the timer, and
//! when the timer finally runs out the path is watched again and reported
//! exactly once. [`ExternalWatcher`] feeds it from [`notify`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{CoreError, CoreResult};

/// Something paths can be (un)subscribed on.
pub trait WatchTarget: Send + 'static {
    fn watch(&mut self, path: &Path) -> CoreResult<()>;
    fn unwatch(&mut self, path: &Path) -> CoreResult<()>;
}

#[derive(Debug)]
struct DebounceState<W> {
    target: W,
    delay: Duration,
    /// Paths with an armed timer and the generation that timer carries.
    armed: HashMap<PathBuf, u64>,
    next_generation: u64,
}

/// Turns bursts of raw notifications into one request per path.
///
/// Clones share the same timers and target.
#[derive(Debug)]
pub struct Debouncer<W> {
    state: Arc<Mutex<DebounceState<W>>>,
    fired: mpsc::UnboundedSender<PathBuf>,
    runtime: Handle,
}

impl<W> Clone for Debouncer<W> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            fired: self.fired.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<W: WatchTarget> Debouncer<W> {
    /// A debouncer whose timers run on `runtime`, and the stream of paths
    /// whose burst ended.
    pub fn new(
        target: W,
        delay: Duration,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let state = DebounceState {
            target,
            delay,
            armed: HashMap::new(),
            next_generation: 0,
        };
        let debouncer = Self {
            state: Arc::new(Mutex::new(state)),
            fired,
            runtime,
        };
        (debouncer, rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DebounceState<W>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    pub fn delay(&self) -> Duration {
        self.lock().delay
    }

    /// Starts watching `path`.
    pub fn watch(&self, path: &Path) -> CoreResult<()> {
        self.lock().target.watch(path)
    }

    /// Stops watching `path` and forgets any armed timer for it.
    pub fn unwatch(&self, path: &Path) -> CoreResult<()> {
        let mut state = self.lock();
        if state.armed.remove(path).is_some() {
            // Already unwatched when the timer was armed.
            return Ok(());
        }
        state.target.unwatch(path)
    }

    /// Records a raw notification for `path`.
    pub fn notify(&self, path: &Path) {
        let (generation, delay) = {
            let mut state = self.lock();
            if !state.armed.contains_key(path) {
                if let Err(e) = state.target.unwatch(path) {
                    warn!(path = %path.display(), error = %e, "cannot pause watch");
                }
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            state.armed.insert(path.to_path_buf(), generation);
            (generation, state.delay)
        };
        trace!(path = %path.display(), generation, "debounce timer armed");

        let this = self.clone();
        let path = path.to_path_buf();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.expire(path, generation);
        });
    }

    fn expire(&self, path: PathBuf, generation: u64) {
        {
            let mut state = self.lock();
            if state.armed.get(&path) != Some(&generation) {
                return;
            }
            state.armed.remove(&path);
            if let Err(e) = state.target.watch(&path) {
                warn!(path = %path.display(), error = %e, "cannot resume watch");
            }
        }
        debug!(path = %path.display(), "external changes settled");
        let _ = self.fired.send(path);
    }

    /// `true` while a timer is armed for `path`.
    pub fn is_armed(&self, path: &Path) -> bool {
        self.lock().armed.contains_key(path)
    }
}

/// [`WatchTarget`] over the platform's native watcher.
pub struct NativeTarget {
    watcher: RecommendedWatcher,
}

impl std::fmt::Debug for NativeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTarget").finish_non_exhaustive()
    }
}

impl WatchTarget for NativeTarget {
    fn watch(&mut self, path: &Path) -> CoreResult<()> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| CoreError::Unsupported(format!("cannot watch {}: {e}", path.display())))
    }

    fn unwatch(&mut self, path: &Path) -> CoreResult<()> {
        self.watcher
            .unwatch(path)
            .map_err(|e| CoreError::Unsupported(format!("cannot unwatch {}: {e}", path.display())))
    }
}

/// Watches one directory at a time and reports when it settled after
/// changing.
#[derive(Debug)]
pub struct ExternalWatcher {
    debouncer: Debouncer<NativeTarget>,
    current: Arc<Mutex<Option<PathBuf>>>,
    forward: JoinHandle<()>,
}

impl ExternalWatcher {
    /// Needs to be called from inside a tokio runtime, which runs the timers.
    pub fn new(debounce: Duration) -> CoreResult<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::Unsupported("watching needs a tokio runtime".into()))?;

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) if event.kind.is_access() => {}
                Ok(_) => {
                    let _ = raw_tx.send(());
                }
                Err(e) => warn!(error = %e, "watch error"),
            }
        })
        .map_err(|e| CoreError::Unsupported(format!("cannot create watcher: {e}")))?;

        let (debouncer, fired) = Debouncer::new(NativeTarget { watcher }, debounce, runtime.clone());
        let current: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));

        let forward_debouncer = debouncer.clone();
        let forward_current = Arc::clone(&current);
        let forward = runtime.spawn(async move {
            while raw_rx.recv().await.is_some() {
                let path = forward_current
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone();
                if let Some(path) = path {
                    forward_debouncer.notify(&path);
                }
            }
        });

        Ok((
            Self {
                debouncer,
                current,
                forward,
            },
            fired,
        ))
    }

    /// Replaces the watched directory. `None` stops watching.
    pub fn set_current_path(&self, path: Option<&Path>) -> CoreResult<()> {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *current, path.map(Path::to_path_buf))
        };
        if let Some(previous) = previous {
            if let Err(e) = self.debouncer.unwatch(&previous) {
                debug!(path = %previous.display(), error = %e, "unwatch failed");
            }
        }
        if let Some(path) = path {
            self.debouncer.watch(path)?;
        }
        Ok(())
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_debounce(&self, ms: u64) {
        self.debouncer.set_delay(Duration::from_millis(ms));
    }
}

impl Drop for ExternalWatcher {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Watch(PathBuf),
        Unwatch(PathBuf),
    }

    #[derive(Debug, Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    impl WatchTarget for Recorder {
        fn watch(&mut self, path: &Path) -> CoreResult<()> {
            self.0.lock().unwrap().push(Call::Watch(path.to_path_buf()));
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> CoreResult<()> {
            self.0.lock().unwrap().push(Call::Unwatch(path.to_path_buf()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_yields_one_reconciliation_after_the_last_event() {
        let recorder = Recorder::default();
        let (debouncer, mut fired) =
            Debouncer::new(recorder.clone(), Duration::from_millis(900), Handle::current());
        let dir = PathBuf::from("/watched");

        debouncer.notify(&dir);
        sleep(Duration::from_millis(100)).await;
        debouncer.notify(&dir);
        sleep(Duration::from_millis(100)).await;
        debouncer.notify(&dir);
        let third = Instant::now();

        assert_eq!(fired.recv().await.unwrap(), dir);
        let waited = third.elapsed();
        assert!(waited >= Duration::from_millis(900), "fired after {waited:?}");
        assert!(waited < Duration::from_millis(910), "fired after {waited:?}");

        sleep(Duration::from_secs(3)).await;
        assert!(fired.try_recv().is_err());
        assert_eq!(
            recorder.calls(),
            vec![Call::Unwatch(dir.clone()), Call::Watch(dir.clone())]
        );
        assert!(!debouncer.is_armed(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (debouncer, mut fired) =
            Debouncer::new(Recorder::default(), Duration::from_millis(900), Handle::current());
        let dir = PathBuf::from("/watched");

        debouncer.notify(&dir);
        assert_eq!(fired.recv().await.unwrap(), dir);
        debouncer.notify(&dir);
        assert_eq!(fired.recv().await.unwrap(), dir);
    }

    #[tokio::test(start_paused = true)]
    async fn unwatch_drops_armed_timer() {
        let recorder = Recorder::default();
        let (debouncer, mut fired) =
            Debouncer::new(recorder.clone(), Duration::from_millis(900), Handle::current());
        let dir = PathBuf::from("/watched");

        debouncer.notify(&dir);
        debouncer.unwatch(&dir).unwrap();
        sleep(Duration::from_secs(2)).await;

        assert!(fired.try_recv().is_err());
        assert_eq!(recorder.calls(), vec![Call::Unwatch(dir)]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_can_be_changed() {
        let (debouncer, mut fired) =
            Debouncer::new(Recorder::default(), Duration::from_millis(900), Handle::current());
        debouncer.set_delay(Duration::from_millis(50));
        let start = Instant::now();

        debouncer.notify(Path::new("/d"));
        fired.recv().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(60));
    }

    #[tokio::test]
    async fn native_watcher_switches_directories() {
        let tmp1 = tempfile::TempDir::new().unwrap();
        let tmp2 = tempfile::TempDir::new().unwrap();
        let (watcher, _fired) = ExternalWatcher::new(Duration::from_millis(50)).unwrap();

        watcher.set_current_path(Some(tmp1.path())).unwrap();
        watcher.set_current_path(Some(tmp2.path())).unwrap();
        assert_eq!(watcher.current_path().as_deref(), Some(tmp2.path()));
        watcher.set_current_path(None).unwrap();
        assert!(watcher.current_path().is_none());
    }

    #[test]
    fn native_watcher_needs_a_runtime() {
        assert!(ExternalWatcher::new(Duration::from_millis(50)).is_err());
    }
}
