//! The rows of the directory being browsed.
//!
//! [`DirectoryListingModel`] lists the current location on the shared
//! [`IoWorker`](crate::nav::worker::IoWorker) in fixed-size batches and
//! inserts each row at its sorted position. Everything that mutates the rows
//! happens in [`poll`](DirectoryListingModel::poll), on the caller's thread:
//! listing batches, events of the model's own [`ActionEngine`], removals by
//! other engines and reconciliations after external changes.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::action::ActionEngine;
use crate::error::{CoreError, CoreResult};
use crate::event::{EngineEvent, EngineEvents};
use crate::fs::{paths, ItemInfo};
use crate::location::trash::TRASH_ROOT_URL;
use crate::location::{Backend, DirFilter, Location, LocationKind, LocationRegistry, OpenMode, Storage};
use crate::nav::filter::{CompiledFilter, ListingFilter};
use crate::nav::history::History;
use crate::nav::reconcile::Reconciliation;
use crate::nav::sort::{compare_names, SortKey};
use crate::services::Services;
use crate::watch::ExternalWatcher;

const IDLE_POLL: Duration = Duration::from_millis(5);
const TRASH_ONLY_RESTORE_OR_REMOVE: &str = "items in the trash can only be restored or removed";

/// How many rows may be selected at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    Single,
    #[default]
    Multi,
}

/// Results sent back from worker jobs. Each carries the generation of the
/// listing it belongs to.
#[derive(Debug)]
enum ListingMessage {
    Batch {
        generation: u64,
        items: Vec<ItemInfo>,
    },
    Finished {
        generation: u64,
        result: CoreResult<()>,
    },
    External {
        generation: u64,
        result: CoreResult<Option<Reconciliation>>,
    },
}

/// Sorted, filtered rows of the current location plus the engine acting on
/// them.
#[derive(Debug)]
pub struct DirectoryListingModel {
    services: Services,
    registry: Arc<LocationRegistry>,
    engine: ActionEngine,
    events: EngineEvents,
    rows: Vec<ItemInfo>,
    /// Listed entries the current filter hides.
    filtered_out: Vec<ItemInfo>,
    sort: SortKey,
    filter: ListingFilter,
    matcher: CompiledFilter,
    selection_mode: SelectionMode,
    history: History,
    /// Backend path of the listed directory.
    dir_path: Option<String>,
    generation: u64,
    fetching: bool,
    checking: bool,
    tx: UnboundedSender<ListingMessage>,
    rx: UnboundedReceiver<ListingMessage>,
    watcher: Option<ExternalWatcher>,
    settled: Option<UnboundedReceiver<PathBuf>>,
    pending: Vec<EngineEvent>,
}

impl DirectoryListingModel {
    /// A model with its own registry over `services`.
    pub fn new(services: Services) -> CoreResult<Self> {
        let registry = Arc::new(services.registry()?);
        Ok(Self::with_registry(services, registry))
    }

    /// A model browsing through `registry`.
    ///
    /// External change watching is only set up when called from inside a
    /// tokio runtime and enabled in the listing configuration.
    pub fn with_registry(services: Services, registry: Arc<LocationRegistry>) -> Self {
        let (engine, events) = ActionEngine::new(Arc::clone(&registry), &services);
        let listing = &services.config.listing;
        let sort = SortKey::new(listing.sort_by, listing.sort_order);
        let filter = ListingFilter {
            show_hidden: listing.show_hidden,
            show_directories: listing.show_directories,
            name_patterns: Vec::new(),
        };
        let matcher = filter.compile().unwrap_or_default();

        let (watcher, settled) = if listing.watch_external_changes {
            let debounce = Duration::from_millis(services.config.watcher.debounce_ms);
            match ExternalWatcher::new(debounce) {
                Ok((watcher, settled)) => (Some(watcher), Some(settled)),
                Err(e) => {
                    debug!(error = %e, "external change watching disabled");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let (tx, rx) = unbounded_channel();
        Self {
            services,
            registry,
            engine,
            events,
            rows: Vec::new(),
            filtered_out: Vec::new(),
            sort,
            filter,
            matcher,
            selection_mode: SelectionMode::default(),
            history: History::new(),
            dir_path: None,
            generation: 0,
            fetching: false,
            checking: false,
            tx,
            rx,
            watcher,
            settled,
            pending: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &ActionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ActionEngine {
        &mut self.engine
    }

    pub fn current_url(&self) -> Option<String> {
        self.registry.current_url()
    }

    pub fn rows(&self) -> &[ItemInfo] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&ItemInfo> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `true` while a listing of the current location is still arriving.
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort
    }

    pub fn filter(&self) -> &ListingFilter {
        &self.filter
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| w.current_path().is_some())
    }

    /// Row index of `path`.
    ///
    /// Binary search when rows are in name-ascending order, a linear scan
    /// otherwise.
    pub fn row_of(&self, path: &str) -> Option<usize> {
        if !self.sort.is_name_ascending() {
            return self.rows.iter().position(|r| r.path() == path);
        }
        let name = paths::file_name(path);
        let split = self.rows.partition_point(ItemInfo::is_browsable);
        let (dirs, files) = self.rows.split_at(split);
        let found = dirs
            .binary_search_by(|r| compare_names(r.name(), name))
            .ok()
            .or_else(|| {
                files
                    .binary_search_by(|r| compare_names(r.name(), name))
                    .ok()
                    .map(|i| i + split)
            })?;
        (self.rows[found].path() == path).then_some(found)
    }

    /// Reorders the rows already fetched. Nothing is listed again.
    pub fn set_sort(&mut self, sort: SortKey) {
        if sort == self.sort {
            return;
        }
        self.sort = sort;
        self.rows.sort_by(|a, b| sort.compare(a, b));
    }

    /// Changes which rows are shown. The entries already fetched are split
    /// again between shown and hidden; nothing is listed again.
    pub fn set_filter(&mut self, filter: ListingFilter) -> CoreResult<()> {
        if filter == self.filter {
            return Ok(());
        }
        let matcher = filter.compile()?;
        self.filter = filter;
        self.matcher = matcher;
        let fetched: Vec<ItemInfo> = self.rows.drain(..).chain(self.filtered_out.drain(..)).collect();
        for item in fetched {
            if self.matcher.accepts(&item) {
                self.rows.push(item);
            } else {
                self.filtered_out.push(item.with_selection(false));
            }
        }
        let sort = self.sort;
        self.rows.sort_by(|a, b| sort.compare(a, b));
        debug!(shown = self.rows.len(), hidden = self.filtered_out.len(), "filter applied");
        Ok(())
    }

    /// Makes `url` the current location and starts listing it.
    pub fn set_path(&mut self, url: &str) -> CoreResult<()> {
        self.set_path_with_credentials(url, None, None, false)
    }

    /// Like [`set_path`](Self::set_path), trying `user`/`password` first.
    ///
    /// A [`NeedsAuthentication`](EngineEvent::NeedsAuthentication) event is
    /// queued for the next [`poll`](Self::poll) when credentials are missing.
    pub fn set_path_with_credentials(
        &mut self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
        save: bool,
    ) -> CoreResult<()> {
        let previous = self.registry.current_url();
        if let Err(err) = self.registry.set_new_path(url, user, password, save) {
            if let CoreError::AuthenticationRequired { user, url } = &err {
                self.pending.push(EngineEvent::NeedsAuthentication {
                    user: user.clone(),
                    url: url.clone(),
                });
            }
            return Err(err);
        }
        if let Some(previous) = previous.filter(|p| Some(p) != self.registry.current_url().as_ref()) {
            self.history = self.history.push(previous);
        }
        self.start_fetch();
        Ok(())
    }

    /// Moves to the parent without listing it first. `false` at a root.
    pub fn cd_up(&mut self) -> bool {
        let previous = self.registry.current_url();
        if self.registry.become_parent().is_none() {
            return false;
        }
        if let Some(previous) = previous {
            self.history = self.history.push(previous);
        }
        self.start_fetch();
        true
    }

    /// Returns to the previous location. `Ok(false)` when there is none.
    pub fn go_back(&mut self) -> CoreResult<bool> {
        let Some(current) = self.registry.current_url() else {
            return Ok(false);
        };
        let Some((history, url)) = self.history.go_back(&current) else {
            return Ok(false);
        };
        self.registry.set_new_path(&url, None, None, false)?;
        self.history = history;
        self.start_fetch();
        Ok(true)
    }

    pub fn go_forward(&mut self) -> CoreResult<bool> {
        let Some(current) = self.registry.current_url() else {
            return Ok(false);
        };
        let Some((history, url)) = self.history.go_forward(&current) else {
            return Ok(false);
        };
        self.registry.set_new_path(&url, None, None, false)?;
        self.history = history;
        self.start_fetch();
        Ok(true)
    }

    pub fn can_go_back(&self) -> bool {
        self.history.can_go_back()
    }

    /// Re-stats the current location and lists it again.
    pub fn refresh(&mut self) -> CoreResult<()> {
        if self.registry.refresh_current()?.is_some() {
            self.start_fetch();
        }
        Ok(())
    }

    pub fn go_trash(&mut self) -> CoreResult<()> {
        self.set_path(TRASH_ROOT_URL)
    }

    pub fn go_home(&mut self) -> CoreResult<()> {
        let home = std::env::var("HOME")
            .map_err(|_| CoreError::Validation("HOME is not set".into()))?;
        self.set_path(&home)
    }

    fn start_fetch(&mut self) {
        let Some(location) = self.registry.current() else {
            return;
        };
        self.generation += 1;
        self.rows.clear();
        self.filtered_out.clear();
        self.fetching = true;
        self.checking = false;
        self.dir_path = Some(location.info().path().to_string());
        self.update_watch(&location);

        let generation = self.generation;
        let backend = location.backend().clone();
        let url = location.url_path().to_string();
        let batch_size = self.services.config.listing.batch_size.max(1);
        let tx = self.tx.clone();
        debug!(url = %url, generation, "listing");
        self.services.worker.submit(move || {
            let result = list_in_batches(&backend, &url, batch_size, |items| {
                tx.send(ListingMessage::Batch { generation, items }).is_ok()
            });
            let _ = tx.send(ListingMessage::Finished { generation, result });
        });
    }

    fn update_watch(&mut self, location: &Location) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        let path = match location.kind() {
            LocationKind::LocalDisk | LocationKind::TrashDisk => Some(PathBuf::from(location.info().path())),
            LocationKind::NetworkShare => None,
        };
        if let Err(e) = watcher.set_current_path(path.as_deref()) {
            warn!(url = location.url_path(), error = %e, "cannot watch location");
        }
    }

    /// Diffs the current location against the rows on the worker thread.
    ///
    /// Ignored while a listing or another check is in flight. Returns
    /// whether a check was started.
    pub fn check_external_changes(&mut self) -> bool {
        if self.fetching || self.checking {
            debug!("external change ignored while listing");
            return false;
        }
        let Some(location) = self.registry.current() else {
            return false;
        };
        self.checking = true;
        let generation = self.generation;
        let backend = location.backend().clone();
        let url = location.url_path().to_string();
        let snapshot: Vec<ItemInfo> = self.rows.iter().chain(&self.filtered_out).cloned().collect();
        let tx = self.tx.clone();
        self.services.worker.submit(move || {
            let result = backend.fetch_external_changes(&url, &snapshot, DirFilter::all());
            let _ = tx.send(ListingMessage::External { generation, result });
        });
        true
    }

    /// Applies everything that arrived since the last call and returns the
    /// events the frontend should see.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let mut out = std::mem::take(&mut self.pending);
        while let Ok(message) = self.rx.try_recv() {
            self.apply_message(message, &mut out);
        }
        for event in self.events.drain() {
            self.apply_engine_event(&event);
            out.push(event);
        }
        self.poll_watcher();
        out
    }

    /// Polls until no listing or check is in flight, blocking on the worker
    /// for at most `timeout`.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut out = self.poll();
        while self.fetching || self.checking {
            match self.rx.try_recv() {
                Ok(message) => self.apply_message(message, &mut out),
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        warn!("timed out waiting for the listing");
                        break;
                    }
                    std::thread::sleep(IDLE_POLL);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out.extend(self.poll());
        out
    }

    /// Runs every queued action to the end and applies its events.
    pub fn run_actions_until_idle(&mut self) -> Vec<EngineEvent> {
        self.engine.run_until_idle();
        self.poll()
    }

    fn poll_watcher(&mut self) {
        let Some(settled) = &mut self.settled else {
            return;
        };
        let mut due = false;
        while let Ok(path) = settled.try_recv() {
            due |= self.dir_path.as_deref().map(PathBuf::from) == Some(path);
        }
        if due {
            self.check_external_changes();
        }
    }

    fn apply_message(&mut self, message: ListingMessage, out: &mut Vec<EngineEvent>) {
        match message {
            ListingMessage::Batch { generation, items } if generation == self.generation => {
                for item in items {
                    if self.matcher.accepts(&item) {
                        self.insert_sorted(item);
                    } else {
                        self.filtered_out.push(item);
                    }
                }
            }
            ListingMessage::Finished { generation, result } if generation == self.generation => {
                self.fetching = false;
                match result {
                    Ok(()) => info!(rows = self.rows.len(), "listing finished"),
                    Err(CoreError::AuthenticationRequired { user, url }) => {
                        out.push(EngineEvent::NeedsAuthentication { user, url });
                    }
                    Err(err) => {
                        warn!(error = %err, "listing failed");
                        out.push(EngineEvent::Error {
                            title: err.title().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            ListingMessage::External { generation, result } if generation == self.generation => {
                self.checking = false;
                match result {
                    Ok(Some(changes)) => self.apply_reconciliation(changes, out),
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "external change check failed"),
                }
            }
            stale => debug!(message = ?stale, "discarding stale listing result"),
        }
    }

    fn apply_reconciliation(&mut self, changes: Reconciliation, out: &mut Vec<EngineEvent>) {
        debug!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            changed = changes.changed.len(),
            "external changes"
        );
        for item in changes.removed {
            if self.remove_row(item.path()) {
                out.push(EngineEvent::Removed(item));
            }
        }
        for item in changes.added.into_iter().chain(changes.changed) {
            if let Some(event) = self.upsert(item) {
                out.push(event);
            }
        }
    }

    fn apply_engine_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Added(item) | EngineEvent::Changed(item) => {
                if self.belongs_here(item) {
                    self.upsert(item.clone());
                }
            }
            EngineEvent::Removed(item) => {
                self.remove_row(item.path());
            }
            _ => {}
        }
    }

    fn belongs_here(&self, item: &ItemInfo) -> bool {
        self.dir_path.is_some() && paths::parent(item.path()) == self.dir_path
    }

    /// Inserts or replaces the row for `item`, keeping its selection.
    ///
    /// Entries the filter rejects are kept aside so a later filter change
    /// can show them without listing again.
    fn upsert(&mut self, item: ItemInfo) -> Option<EngineEvent> {
        self.filtered_out.retain(|hidden| hidden.path() != item.path());
        let shown = self.row_of(item.path()).map(|index| self.rows.remove(index));
        if !self.matcher.accepts(&item) {
            self.filtered_out.push(item.clone());
            return shown.map(|_| EngineEvent::Removed(item));
        }
        match shown {
            Some(previous) => {
                let item = item.with_selection(previous.is_selected());
                self.insert_sorted(item.clone());
                Some(EngineEvent::Changed(item))
            }
            None => {
                self.insert_sorted(item.clone());
                Some(EngineEvent::Added(item))
            }
        }
    }

    fn remove_row(&mut self, path: &str) -> bool {
        self.filtered_out.retain(|hidden| hidden.path() != path);
        match self.row_of(path) {
            Some(index) => {
                self.rows.remove(index);
                true
            }
            None => false,
        }
    }

    fn insert_sorted(&mut self, item: ItemInfo) {
        let sort = self.sort;
        let index = self
            .rows
            .partition_point(|row| sort.compare(row, &item) == Ordering::Less);
        self.rows.insert(index, item);
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.selection_mode
    }

    /// Switching modes keeps the current selection.
    pub fn set_selection_mode(&mut self, mode: SelectionMode) {
        self.selection_mode = mode;
    }

    /// Selecting a row in [`SelectionMode::Single`] deselects every other row.
    pub fn set_selected(&mut self, index: usize, selected: bool) -> bool {
        if index >= self.rows.len() {
            return false;
        }
        if selected && self.selection_mode == SelectionMode::Single {
            self.clear_selection();
        }
        let row = &mut self.rows[index];
        *row = std::mem::take(row).with_selection(selected);
        true
    }

    pub fn toggle_selected(&mut self, index: usize) -> bool {
        let Some(selected) = self.rows.get(index).map(ItemInfo::is_selected) else {
            return false;
        };
        self.set_selected(index, !selected)
    }

    pub fn select_all(&mut self) {
        for row in &mut self.rows {
            *row = std::mem::take(row).with_selection(true);
        }
    }

    pub fn selected_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_selected()).count()
    }

    pub fn selected_names(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| r.is_selected())
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn clear_selection(&mut self) {
        for row in &mut self.rows {
            *row = std::mem::take(row).with_selection(false);
        }
    }

    pub fn selected_indexes(&self) -> Vec<usize> {
        (0..self.rows.len())
            .filter(|&i| self.rows[i].is_selected())
            .collect()
    }

    pub fn selected_paths(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| r.is_selected())
            .map(|r| r.path().to_string())
            .collect()
    }

    fn paths_of(&self, indexes: &[usize]) -> Vec<String> {
        indexes
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .map(|r| r.path().to_string())
            .collect()
    }

    fn in_trash(&self) -> bool {
        self.registry.current_kind() == Some(LocationKind::TrashDisk)
    }

    /// Queues `err` for the next [`poll`](Self::poll).
    fn report(&mut self, title: &str, err: &CoreError) {
        warn!(error = %err, "{title}");
        self.pending.push(EngineEvent::Error {
            title: title.to_string(),
            message: err.to_string(),
        });
    }

    /// Deletes the rows at `indexes`, dropping trash metadata when browsing
    /// the trash. Inside the trash only the root's rows can be removed.
    pub fn remove_index(&mut self, indexes: &[usize]) {
        let paths = self.paths_of(indexes);
        if paths.is_empty() {
            return;
        }
        if self.in_trash() {
            if !self.registry.is_browsing_trash_root() {
                let err = CoreError::Validation("items can only be removed from the trash root".into());
                self.report(err.title(), &err);
                return;
            }
            self.engine.remove_from_trash(paths);
        } else {
            self.engine.remove(paths);
        }
    }

    pub fn copy_index(&mut self, indexes: &[usize]) {
        if self.refuse_in_trash() {
            return;
        }
        let paths = self.paths_of(indexes);
        self.engine.copy(paths);
    }

    pub fn cut_index(&mut self, indexes: &[usize]) {
        if self.refuse_in_trash() {
            return;
        }
        let paths = self.paths_of(indexes);
        self.engine.cut(paths);
    }

    /// Trashed items keep their provenance only while they stay in the
    /// trash, so they never reach the clipboard.
    fn refuse_in_trash(&mut self) -> bool {
        if !self.in_trash() {
            return false;
        }
        let err = CoreError::Validation(TRASH_ONLY_RESTORE_OR_REMOVE.into());
        self.report(err.title(), &err);
        true
    }

    /// Renames the row at `index` in place, keeping its selection.
    pub fn rename(&mut self, index: usize, new_name: &str) -> CoreResult<()> {
        let result = self.try_rename(index, new_name);
        if let Err(err) = &result {
            self.report("Rename error", err);
        }
        result
    }

    fn try_rename(&mut self, index: usize, new_name: &str) -> CoreResult<()> {
        let item = self
            .rows
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::Validation(format!("no row {index}")))?;
        check_new_name(new_name)?;
        let backend = self.writable_backend()?;
        let parent = paths::parent(item.path()).ok_or_else(|| CoreError::InvalidName(item.name().to_string()))?;
        let target = paths::join(&parent, new_name);
        if backend.new_item_info(&target)?.exists() {
            return Err(CoreError::Conflict(format!("{new_name} already exists")));
        }
        backend.new_file(item.path()).rename(&target)?;
        info!(from = item.path(), to = %target, "renamed");

        let renamed = backend.new_item_info(&target)?.with_selection(item.is_selected());
        self.remove_row(item.path());
        self.upsert(renamed.clone());
        self.pending.push(EngineEvent::Removed(item));
        self.pending.push(EngineEvent::Added(renamed));
        Ok(())
    }

    /// Creates the directory `name` in the current location.
    pub fn mkdir(&mut self, name: &str) -> CoreResult<()> {
        let result = self.try_mkdir(name);
        if let Err(err) = &result {
            self.report("Error creating new folder", err);
        }
        result
    }

    fn try_mkdir(&mut self, name: &str) -> CoreResult<()> {
        check_new_name(name)?;
        let (backend, target) = self.new_entry_target(name)?;
        if backend.new_item_info(&target)?.exists() {
            return Err(CoreError::Conflict(format!("{name} already exists")));
        }
        backend.new_dir(&target).mkdir()?;
        debug!(path = %target, "created directory");
        let item = backend.new_item_info(&target)?;
        self.add_created(item);
        Ok(())
    }

    /// Creates the empty file `name` in the current location. An existing
    /// entry is left untouched.
    pub fn touch(&mut self, name: &str) -> CoreResult<()> {
        let result = self.try_touch(name);
        if let Err(err) = &result {
            self.report("Touch file error", err);
        }
        result
    }

    fn try_touch(&mut self, name: &str) -> CoreResult<()> {
        check_new_name(name)?;
        let (backend, target) = self.new_entry_target(name)?;
        let existing = backend.new_item_info(&target)?;
        if existing.exists() {
            self.upsert(existing);
            return Ok(());
        }
        let mut file = backend.new_file(&target);
        file.open(OpenMode::Write)?;
        file.close();
        debug!(path = %target, "created file");
        let item = backend.new_item_info(&target)?;
        self.add_created(item);
        Ok(())
    }

    fn add_created(&mut self, item: ItemInfo) {
        self.upsert(item.clone());
        self.pending.push(EngineEvent::Added(item));
    }

    /// The backend of the current location, refusing the trash.
    fn writable_backend(&self) -> CoreResult<Backend> {
        let location = self
            .registry
            .current()
            .ok_or_else(|| CoreError::Validation("no current location".into()))?;
        if location.kind() == LocationKind::TrashDisk {
            return Err(CoreError::Validation(TRASH_ONLY_RESTORE_OR_REMOVE.into()));
        }
        Ok(location.backend().clone())
    }

    fn new_entry_target(&self, name: &str) -> CoreResult<(Backend, String)> {
        let backend = self.writable_backend()?;
        let dir = self
            .dir_path
            .clone()
            .ok_or_else(|| CoreError::Validation("no current location".into()))?;
        Ok((backend, paths::join(&dir, name)))
    }

    /// Pastes the clipboard into the current location.
    pub fn paste(&mut self) {
        self.engine.paste();
    }

    pub fn move_indexes_to_trash(&mut self, indexes: &[usize]) {
        if self.in_trash() {
            debug!("rows are already in the trash");
            return;
        }
        let trash = self.registry.trash();
        let pairs: Vec<(String, String)> = indexes
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .map(|item| trash.move_pair(item))
            .collect();
        if !pairs.is_empty() {
            self.engine.move_to_trash(pairs);
        }
    }

    pub fn restore_indexes_from_trash(&mut self, indexes: &[usize]) {
        if !self.in_trash() {
            return;
        }
        let items: Vec<ItemInfo> = indexes
            .iter()
            .filter_map(|&i| self.rows.get(i).cloned())
            .collect();
        self.restore_items(&items);
    }

    /// Deletes everything in the trash. Only at the trash root.
    pub fn empty_trash(&mut self) -> CoreResult<bool> {
        if !self.registry.is_browsing_trash_root() {
            return Ok(false);
        }
        let paths: Vec<String> = self
            .trash_contents()?
            .iter()
            .map(|item| item.path().to_string())
            .collect();
        info!(items = paths.len(), "emptying trash");
        if !paths.is_empty() {
            self.engine.remove_from_trash(paths);
        }
        Ok(true)
    }

    /// Restores everything in the trash. Only at the trash root.
    pub fn restore_trash(&mut self) -> CoreResult<bool> {
        if !self.registry.is_browsing_trash_root() {
            return Ok(false);
        }
        let items = self.trash_contents()?;
        self.restore_items(&items);
        Ok(true)
    }

    fn trash_contents(&self) -> CoreResult<Vec<ItemInfo>> {
        let trash = self.registry.trash();
        trash
            .new_dir_iterator(TRASH_ROOT_URL, DirFilter::all(), false)?
            .into_items()
    }

    fn restore_items(&mut self, items: &[ItemInfo]) {
        let trash = self.registry.trash();
        let mut pairs = Vec::with_capacity(items.len());
        for item in items {
            match trash.restore_pair(item) {
                Ok(pair) => pairs.push(pair),
                Err(err) => {
                    warn!(item = item.path(), error = %err, "cannot restore");
                    self.pending.push(EngineEvent::Error {
                        title: "Cannot restore".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        if !pairs.is_empty() {
            self.engine.restore_from_trash(pairs);
        }
    }
}

/// Lists `url` through `backend`, handing rows to `send` in batches of
/// `batch_size`. Stops early once `send` returns `false`.
fn list_in_batches(
    backend: &Backend,
    url: &str,
    batch_size: usize,
    mut send: impl FnMut(Vec<ItemInfo>) -> bool,
) -> CoreResult<()> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut entries = backend.new_dir_iterator(url, DirFilter::all(), false)?;
    for item in entries.by_ref() {
        batch.push(item);
        if batch.len() == batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if !send(full) {
                return Ok(());
            }
        }
    }
    if !batch.is_empty() {
        send(batch);
    }
    match entries.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// A name for a new entry: non-empty, a single path component.
fn check_new_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ListingConfig, TrashConfig};
    use crate::location::InMemoryShare;
    use crate::nav::sort::{SortBy, SortOrder};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    struct Fixture {
        tmp: TempDir,
        model: DirectoryListingModel,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_share(Arc::new(InMemoryShare::new()))
        }

        fn with_share(share: Arc<InMemoryShare>) -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir(tmp.path().join("home")).unwrap();
            let config = Config {
                listing: ListingConfig {
                    batch_size: 7,
                    ..ListingConfig::default()
                },
                trash: TrashConfig {
                    root: Some(tmp.path().join("Trash")),
                },
                ..Config::default()
            };
            let services = Services::in_memory(config).unwrap().with_share(share);
            let model = DirectoryListingModel::new(services).unwrap();
            Self { tmp, model }
        }

        fn home(&self) -> PathBuf {
            self.tmp.path().join("home")
        }

        fn open_home(&mut self) {
            let home = s(&self.home());
            self.model.set_path(&home).unwrap();
            self.model.wait_idle(WAIT);
        }
    }

    fn s(p: &Path) -> String {
        p.to_string_lossy().into_owned()
    }

    fn names(model: &DirectoryListingModel) -> Vec<&str> {
        model.rows().iter().map(|r| r.name()).collect()
    }

    #[test]
    fn lists_in_batches_in_sorted_order() {
        let mut fx = Fixture::new();
        for i in 0..30 {
            fs::write(fx.home().join(format!("file{i:02}.txt")), "x").unwrap();
        }
        fs::create_dir(fx.home().join("zeta")).unwrap();
        fs::create_dir(fx.home().join("alpha")).unwrap();
        fx.open_home();

        assert!(!fx.model.is_fetching());
        assert_eq!(fx.model.len(), 32);
        assert_eq!(&names(&fx.model)[..3], &["alpha", "zeta", "file00.txt"]);
        let sort = fx.model.sort_key();
        assert!(fx
            .model
            .rows()
            .windows(2)
            .all(|w| sort.compare(&w[0], &w[1]) == Ordering::Less));
    }

    #[test]
    fn batching_splits_listing() {
        let tmp = TempDir::new().unwrap();
        for i in 0..16 {
            fs::write(tmp.path().join(format!("{i}")), "").unwrap();
        }
        let backend = Backend::LocalDisk(crate::location::DiskStorage::new());
        let mut sizes = Vec::new();
        list_in_batches(&backend, &s(tmp.path()), 5, |batch| {
            sizes.push(batch.len());
            true
        })
        .unwrap();
        assert_eq!(sizes, vec![5, 5, 5, 1]);
    }

    #[test]
    fn set_sort_reorders_without_listing_again() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("small"), "1").unwrap();
        fs::write(fx.home().join("big"), "1234567890").unwrap();
        fs::write(fx.home().join("medium"), "12345").unwrap();
        fx.open_home();
        assert_eq!(names(&fx.model), vec!["big", "medium", "small"]);

        fs::write(fx.home().join("late"), "").unwrap();
        fx.model.set_sort(SortKey::new(SortBy::Size, SortOrder::Descending));
        assert!(!fx.model.is_fetching());
        assert_eq!(names(&fx.model), vec!["big", "medium", "small"]);

        fx.model.set_sort(SortKey::new(SortBy::Size, SortOrder::Ascending));
        assert_eq!(names(&fx.model), vec!["small", "medium", "big"]);
    }

    #[test]
    fn row_lookup_matches_position_for_any_order() {
        let mut fx = Fixture::new();
        for name in ["b.txt", "A.txt", "c.txt"] {
            fs::write(fx.home().join(name), name).unwrap();
        }
        fs::create_dir(fx.home().join("dir")).unwrap();
        fx.open_home();

        for sort in [
            SortKey::default(),
            SortKey::new(SortBy::Name, SortOrder::Descending),
            SortKey::new(SortBy::Size, SortOrder::Ascending),
        ] {
            fx.model.set_sort(sort);
            for (index, row) in fx.model.rows().iter().enumerate() {
                assert_eq!(fx.model.row_of(row.path()), Some(index));
            }
            assert_eq!(fx.model.row_of(&s(&fx.home().join("nope"))), None);
        }
    }

    #[test]
    fn hidden_rows_follow_the_filter() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join(".secret"), "").unwrap();
        fs::write(fx.home().join("shown"), "").unwrap();
        fx.open_home();
        assert_eq!(names(&fx.model), vec!["shown"]);

        fs::write(fx.home().join(".late"), "").unwrap();
        fx.model
            .set_filter(ListingFilter {
                show_hidden: true,
                ..ListingFilter::default()
            })
            .unwrap();
        assert!(!fx.model.is_fetching());
        assert_eq!(names(&fx.model), vec![".secret", "shown"]);

        fx.model.set_filter(ListingFilter::default()).unwrap();
        assert_eq!(names(&fx.model), vec!["shown"]);
    }

    #[test]
    fn name_patterns_split_rows_without_listing_again() {
        let mut fx = Fixture::new();
        for name in ["a.jpg", "b.txt", "C.JPG"] {
            fs::write(fx.home().join(name), "").unwrap();
        }
        fs::create_dir(fx.home().join("photos")).unwrap();
        fx.open_home();

        fx.model
            .set_filter(ListingFilter {
                name_patterns: vec!["*.jpg".into()],
                ..ListingFilter::default()
            })
            .unwrap();
        assert!(!fx.model.is_fetching());
        assert_eq!(names(&fx.model), vec!["photos", "a.jpg", "C.JPG"]);

        fs::write(fx.home().join("b.txt"), "changed").unwrap();
        fs::write(fx.home().join("d.jpg"), "").unwrap();
        assert!(fx.model.check_external_changes());
        let events = fx.model.wait_idle(WAIT);
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Added(i) if i.name() == "d.jpg")));
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::Added(i) if i.name() == "b.txt")));

        let bad = ListingFilter {
            name_patterns: vec!["[a-".into()],
            ..ListingFilter::default()
        };
        assert!(fx.model.set_filter(bad).is_err());
        assert_eq!(names(&fx.model), vec!["photos", "a.jpg", "C.JPG", "d.jpg"]);

        fx.model.set_filter(ListingFilter::default()).unwrap();
        assert_eq!(names(&fx.model), vec!["photos", "a.jpg", "b.txt", "C.JPG", "d.jpg"]);
    }

    #[test]
    fn results_of_a_previous_location_are_discarded() {
        let mut fx = Fixture::new();
        let other = fx.tmp.path().join("other");
        fs::create_dir(&other).unwrap();
        fs::write(other.join("theirs"), "").unwrap();
        fs::write(fx.home().join("mine"), "").unwrap();

        fx.model.set_path(&s(&fx.home())).unwrap();
        fx.model.set_path(&s(&other)).unwrap();
        fx.model.wait_idle(WAIT);
        assert_eq!(names(&fx.model), vec!["theirs"]);
    }

    #[test]
    fn external_changes_are_reconciled_once() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("kept"), "1").unwrap();
        fs::write(fx.home().join("edited"), "1").unwrap();
        fs::write(fx.home().join("gone"), "1").unwrap();
        fx.open_home();
        let edited = fx.model.row_of(&s(&fx.home().join("edited"))).unwrap();
        assert!(fx.model.set_selected(edited, true));

        fs::write(fx.home().join("new"), "1").unwrap();
        fs::write(fx.home().join("edited"), "12345").unwrap();
        fs::remove_file(fx.home().join("gone")).unwrap();

        assert!(fx.model.check_external_changes());
        let events = fx.model.wait_idle(WAIT);
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Added(i) if i.name() == "new")));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Removed(i) if i.name() == "gone")));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Changed(i) if i.name() == "edited")));
        assert_eq!(names(&fx.model), vec!["edited", "kept", "new"]);
        assert_eq!(fx.model.selected_paths(), vec![s(&fx.home().join("edited"))]);

        assert!(fx.model.check_external_changes());
        assert!(fx.model.wait_idle(WAIT).is_empty());
    }

    #[test]
    fn external_check_is_ignored_while_listing() {
        let mut fx = Fixture::new();
        fx.model.set_path(&s(&fx.home())).unwrap();
        assert!(fx.model.is_fetching());
        assert!(!fx.model.check_external_changes());
        fx.model.wait_idle(WAIT);
        assert!(fx.model.check_external_changes());
        fx.model.wait_idle(WAIT);
    }

    #[test]
    fn navigation_up_and_back() {
        let mut fx = Fixture::new();
        fs::create_dir(fx.home().join("sub")).unwrap();
        fx.open_home();
        fx.model.set_path(&s(&fx.home().join("sub"))).unwrap();
        fx.model.wait_idle(WAIT);

        assert!(fx.model.cd_up());
        fx.model.wait_idle(WAIT);
        assert_eq!(fx.model.current_url().as_deref(), Some(s(&fx.home()).as_str()));
        assert_eq!(names(&fx.model), vec!["sub"]);

        assert!(fx.model.go_back().unwrap());
        fx.model.wait_idle(WAIT);
        assert_eq!(
            fx.model.current_url().as_deref(),
            Some(s(&fx.home().join("sub")).as_str())
        );
        assert!(fx.model.is_empty());
    }

    #[test]
    fn pasted_copy_appears_as_a_row() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("a.txt"), "abc").unwrap();
        fx.open_home();

        fx.model.copy_index(&[0]);
        fx.model.paste();
        let events = fx.model.run_actions_until_idle();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Added(_))));
        assert_eq!(names(&fx.model), vec!["a (copy 1).txt", "a.txt"]);
    }

    #[test]
    fn removed_rows_disappear() {
        let mut fx = Fixture::new();
        fs::create_dir_all(fx.home().join("d/e")).unwrap();
        fs::write(fx.home().join("d/e/f"), "x").unwrap();
        fs::write(fx.home().join("keep"), "x").unwrap();
        fx.open_home();

        fx.model.remove_index(&[0]);
        fx.model.run_actions_until_idle();
        assert_eq!(names(&fx.model), vec!["keep"]);
        assert!(!fx.home().join("d").exists());
    }

    #[test]
    fn trash_round_trip_through_rows() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("a.txt"), "a").unwrap();
        fs::write(fx.home().join("b.txt"), "b").unwrap();
        fx.open_home();

        fx.model.move_indexes_to_trash(&[0, 1]);
        fx.model.run_actions_until_idle();
        assert!(fx.model.is_empty());

        fx.model.go_trash().unwrap();
        fx.model.wait_idle(WAIT);
        assert_eq!(names(&fx.model), vec!["a.txt", "b.txt"]);
        let origin = s(&fx.home().join("a.txt"));
        assert_eq!(fx.model.row(0).unwrap().trash_origin(), Some(origin.as_str()));

        fx.model.restore_indexes_from_trash(&[0]);
        fx.model.run_actions_until_idle();
        assert_eq!(names(&fx.model), vec!["b.txt"]);
        assert_eq!(fs::read_to_string(fx.home().join("a.txt")).unwrap(), "a");

        assert!(fx.model.empty_trash().unwrap());
        fx.model.run_actions_until_idle();
        assert!(fx.model.is_empty());
        let trash = fx.tmp.path().join("Trash");
        assert_eq!(fs::read_dir(trash.join("files")).unwrap().count(), 0);
        assert_eq!(fs::read_dir(trash.join("info")).unwrap().count(), 0);
    }

    #[test]
    fn restore_trash_only_at_trash_root() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("a.txt"), "a").unwrap();
        fx.open_home();
        assert!(!fx.model.restore_trash().unwrap());
        assert!(!fx.model.empty_trash().unwrap());

        fx.model.move_indexes_to_trash(&[0]);
        fx.model.run_actions_until_idle();
        fx.model.go_trash().unwrap();
        fx.model.wait_idle(WAIT);
        assert!(fx.model.restore_trash().unwrap());
        fx.model.run_actions_until_idle();
        assert!(fx.home().join("a.txt").exists());
        assert!(fx.model.is_empty());
    }

    #[test]
    fn trash_subdirectory_rows_cannot_be_removed() {
        let mut fx = Fixture::new();
        fs::create_dir(fx.home().join("d")).unwrap();
        fs::write(fx.home().join("d/a.txt"), "nested").unwrap();
        fs::write(fx.home().join("a.txt"), "top").unwrap();
        fx.open_home();
        fx.model.move_indexes_to_trash(&[0, 1]);
        fx.model.run_actions_until_idle();

        fx.model.set_path("trash:///d").unwrap();
        fx.model.wait_idle(WAIT);
        assert_eq!(names(&fx.model), vec!["a.txt"]);
        fx.model.remove_index(&[0]);
        let events = fx.model.run_actions_until_idle();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Error { .. })));

        let trash = fx.tmp.path().join("Trash");
        assert!(trash.join("files/d/a.txt").exists());
        assert!(trash.join("info/a.txt.trashinfo").exists());
        assert!(trash.join("info/d.trashinfo").exists());
    }

    #[test]
    fn trash_rows_never_reach_the_clipboard() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("a.txt"), "a").unwrap();
        fx.open_home();
        fx.model.move_indexes_to_trash(&[0]);
        fx.model.run_actions_until_idle();
        fx.model.go_trash().unwrap();
        fx.model.wait_idle(WAIT);

        fx.model.cut_index(&[0]);
        fx.model.copy_index(&[0]);
        let errors = fx
            .model
            .poll()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Error { .. }))
            .count();
        assert_eq!(errors, 2);

        fx.open_home();
        fx.model.paste();
        fx.model.run_actions_until_idle();
        assert!(fx.model.is_empty());
        let trash = fx.tmp.path().join("Trash");
        assert!(trash.join("files/a.txt").exists());
        assert!(trash.join("info/a.txt.trashinfo").exists());
    }

    #[test]
    fn rename_keeps_selection_and_reports_both_paths() {
        let mut fx = Fixture::new();
        fs::write(fx.home().join("a.txt"), "a").unwrap();
        fs::write(fx.home().join("taken"), "t").unwrap();
        fx.open_home();
        assert!(fx.model.set_selected(0, true));

        fx.model.rename(0, "z.txt").unwrap();
        let events = fx.model.poll();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Removed(i) if i.name() == "a.txt")));
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Added(i) if i.name() == "z.txt")));
        assert_eq!(names(&fx.model), vec!["taken", "z.txt"]);
        assert_eq!(fx.model.selected_names(), vec!["z.txt"]);
        assert_eq!(fs::read_to_string(fx.home().join("z.txt")).unwrap(), "a");

        assert!(matches!(fx.model.rename(1, "taken"), Err(CoreError::Conflict(_))));
        assert!(matches!(fx.model.rename(1, "x/y"), Err(CoreError::InvalidName(_))));
        assert!(matches!(fx.model.rename(1, ""), Err(CoreError::InvalidName(_))));
        assert!(fx.model.rename(9, "w").is_err());
        let errors = fx
            .model
            .poll()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Error { title, .. } if title == "Rename error"))
            .count();
        assert_eq!(errors, 4);
        assert!(fx.home().join("z.txt").exists());
    }

    #[test]
    fn mkdir_and_touch_add_rows() {
        let mut fx = Fixture::new();
        fx.open_home();

        fx.model.mkdir("docs").unwrap();
        fx.model.touch("notes.txt").unwrap();
        let events = fx.model.poll();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::Added(_)))
                .count(),
            2
        );
        assert_eq!(names(&fx.model), vec!["docs", "notes.txt"]);
        assert!(fx.home().join("docs").is_dir());
        assert_eq!(fs::read(fx.home().join("notes.txt")).unwrap().len(), 0);

        fs::write(fx.home().join("notes.txt"), "kept").unwrap();
        fx.model.touch("notes.txt").unwrap();
        assert_eq!(fs::read_to_string(fx.home().join("notes.txt")).unwrap(), "kept");
        assert_eq!(fx.model.len(), 2);

        assert!(matches!(fx.model.mkdir("docs"), Err(CoreError::Conflict(_))));
        assert!(fx.model.mkdir("..").is_err());
        assert!(fx.model.touch("a/b").is_err());

        fx.model.go_trash().unwrap();
        fx.model.wait_idle(WAIT);
        assert!(fx.model.mkdir("inside").is_err());
        assert!(!fx.tmp.path().join("Trash/files/inside").exists());
    }

    #[test]
    fn single_selection_mode_keeps_one_row() {
        let mut fx = Fixture::new();
        for name in ["a", "b", "c"] {
            fs::write(fx.home().join(name), "").unwrap();
        }
        fx.open_home();
        assert_eq!(fx.model.selection_mode(), SelectionMode::Multi);

        fx.model.select_all();
        assert_eq!(fx.model.selected_count(), 3);
        assert!(fx.model.toggle_selected(1));
        assert_eq!(fx.model.selected_names(), vec!["a", "c"]);
        assert_eq!(fx.model.selected_indexes(), vec![0, 2]);

        fx.model.set_selection_mode(SelectionMode::Single);
        assert_eq!(fx.model.selected_count(), 2);
        assert!(fx.model.set_selected(1, true));
        assert_eq!(fx.model.selected_names(), vec!["b"]);
        assert!(fx.model.toggle_selected(2));
        assert_eq!(fx.model.selected_names(), vec!["c"]);
        assert!(fx.model.toggle_selected(2));
        assert_eq!(fx.model.selected_count(), 0);
        assert!(!fx.model.toggle_selected(7));
    }

    #[test]
    fn protected_share_asks_for_credentials() {
        let share = Arc::new(InMemoryShare::new());
        share.add_share("nas", "vault", Some(("bob", "pw")));
        let mut fx = Fixture::with_share(share);

        let err = fx.model.set_path("smb://nas/vault").unwrap_err();
        assert!(err.is_authentication_required());
        let events = fx.model.poll();
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::NeedsAuthentication { url, .. }] if url == "smb://nas/vault"
        ));

        fx.model
            .set_path_with_credentials("smb://nas/vault", Some("bob"), Some("pw"), false)
            .unwrap();
        fx.model.wait_idle(WAIT);
        assert!(fx.model.is_empty());
        assert!(!fx.model.is_watching());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watched_directory_reconciles_after_settling() {
        let mut fx = Fixture::new();
        fx.model.set_path(&s(&fx.home())).unwrap();
        fx.model.wait_idle(WAIT);
        assert!(fx.model.is_watching());

        fs::write(fx.home().join("appeared"), "x").unwrap();
        let deadline = Instant::now() + WAIT;
        while fx.model.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.model.wait_idle(WAIT);
        }
        assert_eq!(names(&fx.model), vec!["appeared"]);
    }
}
