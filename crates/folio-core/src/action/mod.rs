//! The file-operation engine.
//!
//! [`ActionEngine`] turns remove/copy/cut/paste/trash requests into queued
//! [`Action`]s and works through them one bounded unit at a time: one
//! removal, one small file, one directory, one rename or one chunk of a
//! large file per [`pump`](ActionEngine::pump). Between units the caller
//! regains control, which is what makes an action observable and
//! cancellable. Results stream out as [`EngineEvent`]s.
//!
//! Every path goes through the [`LocationRegistry`], so the same code copies
//! between local disk, the trash and a network share.

pub mod clipboard;
pub mod conflict;
pub mod notifier;
pub mod progress;
pub mod types;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::event::{EngineEvent, EngineEvents};
use crate::fs::{paths, ItemInfo};
use crate::location::{Backend, DirFilter, LocationKind, LocationRegistry, OpenMode};
use crate::services::Services;

pub use clipboard::{Clipboard, ClipboardOp};
pub use notifier::{Removal, RemoveNotifier};
pub use types::{Action, ActionEntry, ActionKind, Step};

use types::{ChunkCopy, Request, TrashInfoOp};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Cancels the running action from anywhere, including other threads.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ActionEngine {
    id: u64,
    registry: Arc<LocationRegistry>,
    config: EngineConfig,
    removals: Arc<RemoveNotifier>,
    events: mpsc::UnboundedSender<EngineEvent>,
    queue: VecDeque<Action>,
    current: Option<Action>,
    clipboard: Clipboard,
    cancel: Arc<AtomicBool>,
    next_action_id: u64,
}

impl ActionEngine {
    /// An engine sharing `services`, and the stream of its events.
    pub fn new(registry: Arc<LocationRegistry>, services: &Services) -> (Self, EngineEvents) {
        Self::with_config(
            registry,
            services.config.engine.clone(),
            Arc::clone(&services.removals),
        )
    }

    pub fn with_config(
        registry: Arc<LocationRegistry>,
        config: EngineConfig,
        removals: Arc<RemoveNotifier>,
    ) -> (Self, EngineEvents) {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(id, rx, removals.subscribe());
        let engine = Self {
            id,
            registry,
            config,
            removals,
            events: tx,
            queue: VecDeque::new(),
            current: None,
            clipboard: Clipboard::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            next_action_id: 1,
        };
        (engine, events)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    /// Queues a recursive removal of every path.
    pub fn remove<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = types::requests(paths.into_iter().map(Into::into));
        self.enqueue(ActionKind::Remove, requests, TrashInfoOp::None);
    }

    /// Like [`remove`](Self::remove), also deleting each item's `.trashinfo`.
    pub fn remove_from_trash<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = types::requests(paths.into_iter().map(Into::into));
        self.enqueue(ActionKind::Remove, requests, TrashInfoOp::Remove);
    }

    /// Moves each `(source, destination)` pair into the trash.
    ///
    /// Pairs come from [`TrashStorage::move_pair`](crate::location::TrashStorage::move_pair).
    pub fn move_to_trash(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        self.enqueue(
            ActionKind::MoveToTrash,
            types::pair_requests(pairs),
            TrashInfoOp::Write,
        );
    }

    /// Moves each `(trashed, original)` pair back out of the trash.
    ///
    /// Pairs come from [`TrashStorage::restore_pair`](crate::location::TrashStorage::restore_pair).
    pub fn restore_from_trash(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        self.enqueue(
            ActionKind::RestoreFromTrash,
            types::pair_requests(pairs),
            TrashInfoOp::Remove,
        );
    }

    pub fn copy<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clipboard
            .store(ClipboardOp::Copy, paths.into_iter().map(Into::into));
        self.emit(EngineEvent::ClipboardChanged);
    }

    pub fn cut<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clipboard
            .store(ClipboardOp::Cut, paths.into_iter().map(Into::into));
        self.emit(EngineEvent::ClipboardChanged);
    }

    pub fn clear_clipboard(&mut self) {
        self.clipboard.clear();
        self.emit(EngineEvent::ClipboardChanged);
    }

    pub fn mark_clipboard_modified_externally(&mut self) {
        self.clipboard.mark_modified_externally();
    }

    /// Queues the clipboard contents for pasting into the current location.
    ///
    /// A cut is cleared from the clipboard once its paste succeeded.
    pub fn paste(&mut self) {
        if !self.clipboard.has_items() {
            debug!("paste with an empty clipboard");
            return;
        }
        let Some(target) = self.registry.current_url() else {
            self.emit_error(&CoreError::Validation(
                "there is no current location to paste into".into(),
            ));
            return;
        };
        let kind = match self.clipboard.op() {
            ClipboardOp::Cut => ActionKind::Move,
            _ => ActionKind::Copy,
        };
        let requests = types::requests(self.clipboard.paths().to_vec());
        let mut action = self.new_action(kind, requests);
        action.origin = self.clipboard.origin().map(str::to_string);
        action.target = Some(target);
        action.clipboard_tag = self.clipboard.op();
        self.push(action);
    }

    /// Asks the running action, or the next queued one, to stop after its
    /// current unit.
    pub fn cancel(&self) {
        if self.is_busy() {
            info!(running = ?self.current.as_ref().map(|a| a.id), queued = self.queue.len(), "cancel requested");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Number of actions waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runs one step of the current action. `false` once there is nothing left.
    pub fn pump(&mut self) -> bool {
        let mut action = match self.current.take() {
            Some(action) => action,
            None => match self.queue.pop_front() {
                Some(action) => {
                    debug!(id = action.id, kind = %action.kind, "starting action");
                    action
                }
                None => {
                    self.cancel.store(false, Ordering::SeqCst);
                    return false;
                }
            },
        };

        let result = match action.step {
            Step::Expand => self.expand(&mut action),
            Step::Process => self.process(&mut action),
            Step::CopyChunk => self.copy_chunk(&mut action),
            Step::Advance => self.advance(&mut action),
            Step::Done => Ok(()),
        };
        if let Err(err) = result {
            self.fail(&mut action, err);
        }

        if action.is_done() {
            self.finish(action);
        } else {
            self.current = Some(action);
        }
        self.is_busy()
    }

    /// Pumps until every queued action is done.
    pub fn run_until_idle(&mut self) {
        while self.pump() {}
    }

    /// Pumps until idle, yielding to the runtime between units.
    pub async fn run(&mut self) {
        while self.pump() {
            tokio::task::yield_now().await;
        }
    }

    fn expand(&mut self, action: &mut Action) -> CoreResult<()> {
        match action.kind {
            ActionKind::Copy | ActionKind::Move => self.prepare_paste_target(action)?,
            ActionKind::MoveToTrash | ActionKind::RestoreFromTrash => {
                self.registry.trash().ensure_dirs()?;
                action.target_backend = Some(self.registry.backend(LocationKind::LocalDisk).clone());
            }
            _ => {}
        }

        for request in std::mem::take(&mut action.requests) {
            let Some(entry) = self.expand_request(action, request)? else {
                continue;
            };
            action.progress.total_items += entry.items.len() as u64;
            if action.kind.is_copy() {
                action.progress.total_bytes += entry.bytes();
            }
            action.entries.push(entry);
        }

        if action.kind.is_copy() {
            self.check_disk_space(action)?;
        }
        debug!(
            id = action.id,
            kind = %action.kind,
            entries = action.entries.len(),
            items = action.progress.total_items,
            bytes = action.progress.total_bytes,
            "expanded action"
        );
        action.step = if action.entries.is_empty() {
            Step::Done
        } else {
            Step::Process
        };
        Ok(())
    }

    fn prepare_paste_target(&self, action: &mut Action) -> CoreResult<()> {
        let target = action
            .target
            .clone()
            .ok_or_else(|| CoreError::Validation("nothing to paste into".into()))?;
        let (backend, target) = self.registry.parse(&target)?;
        if backend.kind() == LocationKind::TrashDisk {
            return Err(CoreError::Validation("cannot paste into the trash".into()));
        }
        let info = backend.new_item_info(&target)?;
        if info.needs_authentication() {
            return Err(authentication_required(&backend, &info));
        }
        if !info.is_valid() {
            return Err(CoreError::NotFound(PathBuf::from(&target)));
        }
        if !info.is_browsable() {
            return Err(CoreError::NotADirectory(PathBuf::from(&target)));
        }
        action.target = Some(target);
        action.target_backend = Some(backend);
        Ok(())
    }

    /// Stats and flattens one requested path. Missing paths are reported
    /// and skipped.
    fn expand_request(&self, action: &Action, request: Request) -> CoreResult<Option<ActionEntry>> {
        let (backend, source) = self.registry.parse(&request.source)?;
        let item = backend.new_item_info(&source)?;
        if item.needs_authentication() {
            return Err(authentication_required(&backend, &item));
        }
        if !item.exists() {
            warn!(path = %source, "source does not exist, skipping");
            self.emit_error(&CoreError::NotFound(PathBuf::from(&source)));
            return Ok(None);
        }

        let mut items = Vec::new();
        if item.is_dir() && !item.is_symlink() {
            items = backend
                .new_dir_iterator(item.path(), DirFilter::all(), true)?
                .into_items()?;
            items.reverse();
        }
        items.push(item.clone());
        let mut entry = ActionEntry::new(item, backend, items);

        match action.kind {
            ActionKind::Copy | ActionKind::Move => self.place_in_target(action, &mut entry)?,
            ActionKind::MoveToTrash | ActionKind::RestoreFromTrash => {
                let destination = request.destination.ok_or_else(|| {
                    CoreError::Validation(format!("no destination for {}", entry.item.path()))
                })?;
                let destination = self.registry.trash().to_local(&destination);
                if action.kind == ActionKind::RestoreFromTrash
                    && ItemInfo::local(&destination).exists()
                {
                    return Err(CoreError::Conflict(format!(
                        "cannot restore, {destination} already exists"
                    )));
                }
                entry.destination = Some(destination);
            }
            _ => {}
        }
        Ok(Some(entry))
    }

    /// Computes the destination of a pasted entry and applies the conflict rules
    /// that can be decided before anything is touched.
    fn place_in_target(&self, action: &Action, entry: &mut ActionEntry) -> CoreResult<()> {
        let (Some(target), Some(target_backend)) =
            (action.target.as_deref(), action.target_backend.as_ref())
        else {
            return Err(CoreError::Validation("nothing to paste into".into()));
        };
        if entry.backend.kind() == LocationKind::TrashDisk {
            return Err(CoreError::Validation(
                "items in the trash can only be restored or removed".into(),
            ));
        }
        let source = entry.item.path().to_string();
        let source_is_dir = entry.item.is_dir() && !entry.item.is_symlink();
        let same_backend = target_backend.kind() == entry.backend.kind();

        if source_is_dir && same_backend && paths::is_inside(target, &source) {
            return Err(CoreError::Conflict(format!(
                "cannot paste {} into itself",
                entry.item.name()
            )));
        }

        let mut name = paths::file_name(&source).to_string();
        let same_dir = same_backend && paths::parent(&source).as_deref() == Some(target);
        if same_dir {
            if action.kind == ActionKind::Move {
                return Err(CoreError::Conflict(format!("{name} is already in {target}")));
            }
            name = conflict::auto_rename(target_backend.storage(), target, &name, source_is_dir);
            entry.new_name = Some(name.clone());
        }

        let destination = paths::join(target, &name);
        if action.kind == ActionKind::Copy {
            let existing = target_backend.new_item_info(&destination)?;
            if existing.exists() {
                let existing_is_dir = existing.is_dir() && !existing.is_symlink();
                if existing_is_dir != source_is_dir {
                    return Err(CoreError::Conflict(format!(
                        "{destination} already exists and is not the same kind of item"
                    )));
                }
                entry.already_exists = existing_is_dir;
            }
        }
        entry.destination = Some(destination);
        Ok(())
    }

    fn check_disk_space(&self, action: &Action) -> CoreResult<()> {
        let Some(backend) = &action.target_backend else {
            return Ok(());
        };
        let target = action
            .target
            .clone()
            .or_else(|| {
                action
                    .entries
                    .first()
                    .and_then(|e| e.destination.as_deref())
                    .and_then(paths::parent)
            })
            .unwrap_or_default();
        if backend.is_there_disk_space(&target, action.progress.total_bytes) {
            Ok(())
        } else {
            Err(CoreError::NoSpace(PathBuf::from(target)))
        }
    }

    fn process(&mut self, action: &mut Action) -> CoreResult<()> {
        if self.take_cancel() {
            if action.kind == ActionKind::CrossDeviceMoveRemove {
                info!(id = action.id, "copy already complete, still removing the sources");
            } else {
                self.cancel_action(action);
                return Ok(());
            }
        }
        if action.current().is_none() {
            action.step = Step::Done;
            return Ok(());
        }
        match action.kind {
            ActionKind::Remove | ActionKind::CrossDeviceMoveRemove => self.remove_unit(action),
            ActionKind::Copy | ActionKind::CrossDeviceMoveCopy => self.copy_unit(action),
            ActionKind::Move | ActionKind::MoveToTrash | ActionKind::RestoreFromTrash => {
                self.move_unit(action)
            }
        }
    }

    fn remove_unit(&mut self, action: &mut Action) -> CoreResult<()> {
        if action.kind == ActionKind::CrossDeviceMoveRemove
            && action.current().is_some_and(|e| e.curr == 0)
        {
            verify_copy(action)?;
        }
        let Some((backend, item)) = action
            .current()
            .and_then(|e| Some((e.backend.clone(), e.next_remove_item()?.clone())))
        else {
            action.step = Step::Advance;
            return Ok(());
        };

        if item.is_dir() && !item.is_symlink() {
            backend.new_dir(item.path()).rmdir()?;
        } else {
            backend.new_file(item.path()).remove()?;
        }
        trace!(path = item.path(), "removed");
        complete_unit(action);
        Ok(())
    }

    fn copy_unit(&mut self, action: &mut Action) -> CoreResult<()> {
        let Some(entry) = action.current() else {
            return Ok(());
        };
        let Some(source) = entry.next_copy_item().cloned() else {
            action.step = Step::Advance;
            return Ok(());
        };
        let dest = entry
            .target_of(source.path())
            .ok_or_else(|| CoreError::Validation(format!("no destination for {}", source.path())))?;
        let first_unit = entry.curr == 0;
        let merge = entry.already_exists;
        let src_backend = entry.backend.clone();
        let dst_backend = target_backend(action)?;

        if first_unit && !merge {
            self.clear_destination(action, &dst_backend, &dest)?;
        }

        if source.is_symlink() {
            let link_target = source
                .symlink_target()
                .ok_or_else(|| CoreError::Validation(format!("cannot read link {}", source.path())))?;
            dst_backend.new_file(&dest).link(link_target)?;
        } else if source.is_dir() {
            let dir = dst_backend.new_dir(&dest);
            if !dir.exists() {
                dir.mkdir()?;
            }
        } else {
            let mut reader = src_backend.new_file(source.path());
            reader.open(OpenMode::Read)?;
            let mut writer = dst_backend.new_file(&dest);
            writer.open(OpenMode::Write)?;
            action.copy = Some(ChunkCopy {
                source: reader,
                dest: writer,
                mode: source.permissions(),
                buf: vec![0; self.config.chunk_size.max(1)],
            });
            if source.size() > self.config.small_file_size {
                trace!(path = source.path(), size = source.size(), "copying in chunks");
                action.step = Step::CopyChunk;
                return Ok(());
            }
            while copy_one_chunk(action)? {}
            finish_file_copy(action)?;
        }
        trace!(from = source.path(), to = %dest, "copied");
        complete_unit(action);
        Ok(())
    }

    fn copy_chunk(&mut self, action: &mut Action) -> CoreResult<()> {
        if self.take_cancel() {
            self.cancel_action(action);
            return Ok(());
        }
        if copy_one_chunk(action)? {
            if action.progress.tick(self.config.step_files) {
                self.emit_progress(action);
            }
            return Ok(());
        }
        finish_file_copy(action)?;
        complete_unit(action);
        Ok(())
    }

    fn move_unit(&mut self, action: &mut Action) -> CoreResult<()> {
        let Some(entry) = action.current() else {
            return Ok(());
        };
        let item = entry.item.clone();
        let src_backend = entry.backend.clone();
        let dest = entry
            .destination
            .clone()
            .ok_or_else(|| CoreError::Validation(format!("no destination for {}", item.path())))?;
        let dst_backend = target_backend(action)?;

        if src_backend.is_remote() != dst_backend.is_remote() {
            return self.switch_to_cross_device(action);
        }
        match action.kind {
            ActionKind::Move => self.clear_destination(action, &dst_backend, &dest)?,
            ActionKind::RestoreFromTrash => {
                if let Some(parent) = paths::parent(&dest) {
                    dst_backend.new_dir(&parent).mkpath()?;
                }
            }
            _ => {}
        }

        match src_backend.new_file(item.path()).rename(&dest) {
            Ok(()) => {
                trace!(from = item.path(), to = %dest, "renamed");
                let units = action.current().map_or(0, |e| e.items.len());
                if let Some(entry) = action.current_mut() {
                    entry.curr = units;
                }
                action.progress.current_item += units as u64;
                action.step = Step::Advance;
                Ok(())
            }
            Err(CoreError::CrossDevice(_)) => self.switch_to_cross_device(action),
            Err(err) => Err(err),
        }
    }

    fn advance(&mut self, action: &mut Action) -> CoreResult<()> {
        let due = action.progress.tick(self.config.step_files);
        let entry_done = action.current().map_or(true, ActionEntry::is_finished);
        if entry_done {
            self.finish_entry(action)?;
            action.current_entry += 1;
        }
        if entry_done || due {
            self.emit_progress(action);
        }
        action.step = if action.current_entry < action.entries.len() {
            Step::Process
        } else {
            Step::Done
        };
        Ok(())
    }

    /// Trash bookkeeping and events once the whole entry is through.
    fn finish_entry(&mut self, action: &mut Action) -> CoreResult<()> {
        let Some(entry) = action.current() else {
            return Ok(());
        };
        let item = entry.item.clone();
        let destination = entry.destination.clone();
        let merged = entry.already_exists;

        if action.kind != ActionKind::CrossDeviceMoveRemove {
            match (action.trash_info, destination.as_deref()) {
                (TrashInfoOp::Write, Some(dest)) => self.registry.trash().write_info(dest, item.path())?,
                (TrashInfoOp::Remove, _) => self.registry.trash().remove_info(item.path())?,
                _ => {}
            }
        }

        if action.kind.is_remove() || action.kind.is_rename() {
            self.emit_removed(item);
        }
        let Some(dest) = destination.filter(|_| !action.kind.is_remove()) else {
            return Ok(());
        };
        let placed = if action.kind == ActionKind::MoveToTrash {
            self.registry.backend(LocationKind::TrashDisk).new_item_info(&dest)?
        } else {
            target_backend(action)?.new_item_info(&dest)?
        };
        if merged {
            self.emit(EngineEvent::Changed(placed));
        } else {
            self.emit(EngineEvent::Added(placed));
        }
        Ok(())
    }

    fn finish(&mut self, mut action: Action) {
        // A request that arrived after the last unit has nothing left to stop.
        self.cancel.store(false, Ordering::SeqCst);
        if action.progress.total_items > 0 && !action.progress.reported_complete() {
            self.emit(EngineEvent::Progress {
                current: action.progress.current_item,
                total: action.progress.total_items,
                percent: 100,
            });
        }
        let succeeded = !action.failed && !action.cancelled;
        if succeeded && action.clipboard_tag == ClipboardOp::Cut && self.clipboard.has_cut() {
            self.clipboard.clear();
            self.emit(EngineEvent::ClipboardChanged);
        }
        info!(
            id = action.id,
            kind = %action.kind,
            entries = action.entries.len(),
            items = action.progress.current_item,
            failed = action.failed,
            cancelled = action.cancelled,
            "action finished"
        );
        if let Some(aux) = action.aux.take() {
            self.queue.push_front(*aux);
        }
    }

    /// Gets an existing item out of the way of `dest`. Files are deleted;
    /// directories are renamed to a hidden sibling and removed by a deferred
    /// action.
    fn clear_destination(&mut self, action: &mut Action, backend: &Backend, dest: &str) -> CoreResult<()> {
        let existing = backend.new_item_info(dest)?;
        if !existing.exists() {
            return Ok(());
        }
        if existing.is_dir() && !existing.is_symlink() {
            let parent = paths::parent(dest).unwrap_or_else(|| "/".to_string());
            let staging = paths::join(
                &parent,
                &format!(".{}.folio-{}-{}", paths::file_name(dest), self.id, action.id),
            );
            backend.new_file(dest).rename(&staging)?;
            debug!(path = dest, staging = %staging, "staged existing directory for removal");
            let mut remover = self.new_action(ActionKind::Remove, types::requests([staging]));
            remover.origin = Some(parent);
            action.push_aux(remover);
        } else {
            backend.new_file(dest).remove()?;
            trace!(path = dest, "removed existing destination");
        }
        self.emit_removed(existing);
        Ok(())
    }

    /// Turns the rest of a move into copy, then verified delete.
    fn switch_to_cross_device(&mut self, action: &mut Action) -> CoreResult<()> {
        info!(id = action.id, "rename crossed a device boundary, copying instead");
        action.entries.drain(..action.current_entry);
        action.current_entry = 0;
        for entry in &mut action.entries {
            entry.curr = 0;
            entry.already_exists = false;
        }

        let mut remover = self.new_action(ActionKind::CrossDeviceMoveRemove, Vec::new());
        remover.origin = action.origin.clone();
        remover.target = action.target.clone();
        remover.target_backend = action.target_backend.clone();
        remover.entries = action.entries.clone();
        remover.progress.total_items = remover.entries.iter().map(|e| e.items.len() as u64).sum();
        remover.step = Step::Process;
        remover.aux = action.aux.take();
        action.aux = Some(Box::new(remover));

        action.kind = ActionKind::CrossDeviceMoveCopy;
        action.progress.total_bytes = action.entries.iter().map(ActionEntry::bytes).sum();
        action.progress.bytes_written = 0;
        self.check_disk_space(action)
    }

    /// After a cross-device copy stopped early: delete only the sources whose
    /// copy completed, and remove the partial copy of the current entry.
    fn rollback_cross_device(&mut self, action: &mut Action) {
        let completed = action.current_entry;
        let partial = action
            .current()
            .filter(|e| e.curr > 0)
            .and_then(|e| e.destination.clone());

        if let Some(remover) = action
            .aux
            .as_mut()
            .filter(|a| a.kind == ActionKind::CrossDeviceMoveRemove)
        {
            remover.entries.truncate(completed);
            remover.progress.total_items = remover.entries.iter().map(|e| e.items.len() as u64).sum();
            if remover.entries.is_empty() {
                let rest = remover.aux.take();
                action.aux = rest;
            }
        }

        if let Some(dest) = partial {
            warn!(path = %dest, "removing partial copy");
            let cleanup = self.new_action(ActionKind::Remove, types::requests([dest]));
            action.push_aux(cleanup);
        }
    }

    fn cancel_action(&mut self, action: &mut Action) {
        info!(id = action.id, kind = %action.kind, "action cancelled");
        discard_partial_copy(action);
        action.cancelled = true;
        if action.kind == ActionKind::CrossDeviceMoveCopy {
            self.rollback_cross_device(action);
        }
        action.step = Step::Done;
    }

    fn fail(&mut self, action: &mut Action, err: CoreError) {
        match &err {
            CoreError::Cancelled => return self.cancel_action(action),
            CoreError::AuthenticationRequired { user, url } => {
                info!(url = %url, "action needs authentication");
                self.emit(EngineEvent::NeedsAuthentication {
                    user: user.clone(),
                    url: url.clone(),
                });
            }
            _ => {
                warn!(id = action.id, kind = %action.kind, error = %err, "action failed");
                self.emit_error(&err);
            }
        }
        discard_partial_copy(action);
        action.failed = true;
        if action.kind == ActionKind::CrossDeviceMoveCopy {
            self.rollback_cross_device(action);
        }
        action.step = Step::Done;
    }

    fn new_action(&mut self, kind: ActionKind, requests: Vec<Request>) -> Action {
        let id = self.next_action_id;
        self.next_action_id += 1;
        Action::new(id, kind, requests)
    }

    fn enqueue(&mut self, kind: ActionKind, requests: Vec<Request>, trash_info: TrashInfoOp) {
        if requests.is_empty() {
            return;
        }
        let mut action = self.new_action(kind, requests);
        action.trash_info = trash_info;
        self.push(action);
    }

    fn push(&mut self, action: Action) {
        debug!(id = action.id, kind = %action.kind, queued = self.queue.len(), "queued action");
        self.queue.push_back(action);
    }

    /// Consumes a pending cancel request; each request stops one action.
    fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn emit_error(&self, err: &CoreError) {
        self.emit(EngineEvent::Error {
            title: err.title().to_string(),
            message: err.to_string(),
        });
    }

    fn emit_removed(&self, item: ItemInfo) {
        self.emit(EngineEvent::Removed(item.clone()));
        self.removals.notify(self.id, item);
    }

    fn emit_progress(&self, action: &mut Action) {
        let percent = action.progress.percent(action.kind.is_copy());
        self.emit(EngineEvent::Progress {
            current: action.progress.current_item,
            total: action.progress.total_items,
            percent,
        });
        action.progress.reported(percent);
    }
}

fn authentication_required(backend: &Backend, item: &ItemInfo) -> CoreError {
    CoreError::AuthenticationRequired {
        user: backend.current_user(),
        url: item.authentication_path().unwrap_or(item.url()).to_string(),
    }
}

fn target_backend(action: &Action) -> CoreResult<Backend> {
    action
        .target_backend
        .clone()
        .ok_or_else(|| CoreError::Validation("action has no destination".into()))
}

fn complete_unit(action: &mut Action) {
    if let Some(entry) = action.current_mut() {
        entry.curr += 1;
    }
    action.progress.current_item += 1;
    action.step = Step::Advance;
}

/// Copies one chunk of the open file copy. `false` at end of file.
fn copy_one_chunk(action: &mut Action) -> CoreResult<bool> {
    let Some(chunk) = action.copy.as_mut() else {
        return Ok(false);
    };
    let n = chunk.source.read(&mut chunk.buf)?;
    if n == 0 {
        return Ok(false);
    }
    let mut written = 0;
    while written < n {
        let w = chunk.dest.write(&chunk.buf[written..n])?;
        if w == 0 {
            return Err(CoreError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        written += w;
    }
    action.progress.bytes_written += n as u64;
    Ok(true)
}

fn finish_file_copy(action: &mut Action) -> CoreResult<()> {
    let Some(mut chunk) = action.copy.take() else {
        return Ok(());
    };
    chunk.source.close();
    chunk.dest.close();
    if chunk.mode != 0 {
        chunk.dest.set_permissions(chunk.mode)?;
    }
    Ok(())
}

/// Drops a file copy that did not finish, deleting what was written.
fn discard_partial_copy(action: &mut Action) {
    let Some(mut chunk) = action.copy.take() else {
        return;
    };
    chunk.source.close();
    match chunk.dest.remove() {
        Ok(()) => debug!(path = chunk.dest.path(), "discarded partial copy"),
        Err(err) => warn!(path = chunk.dest.path(), error = %err, "cannot discard partial copy"),
    }
}

/// Refuses to delete a source whose copy is missing or has a different size.
fn verify_copy(action: &Action) -> CoreResult<()> {
    let (Some(entry), Some(backend)) = (action.current(), action.target_backend.as_ref()) else {
        return Ok(());
    };
    let Some(dest) = entry.destination.as_deref() else {
        return Ok(());
    };
    let copy = backend.new_item_info(dest)?;
    let intact = copy.exists() && (entry.item.is_dir() || copy.size() == entry.item.size());
    if intact {
        Ok(())
    } else {
        Err(CoreError::Io(std::io::Error::other(format!(
            "copy of {} could not be verified, source kept",
            entry.item.path()
        ))))
    }
}
