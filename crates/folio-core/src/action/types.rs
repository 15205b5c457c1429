//! Data the action engine works through.

use std::fmt;

use crate::action::clipboard::ClipboardOp;
use crate::action::progress::Progress;
use crate::fs::{paths, ItemInfo};
use crate::location::{Backend, ItemFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Remove,
    Copy,
    Move,
    /// The copy half of a move that crossed a device boundary.
    CrossDeviceMoveCopy,
    /// Deletes sources once their copies are verified.
    CrossDeviceMoveRemove,
    MoveToTrash,
    RestoreFromTrash,
}

impl ActionKind {
    /// Kinds that write file contents and therefore count bytes.
    pub fn is_copy(self) -> bool {
        matches!(self, ActionKind::Copy | ActionKind::CrossDeviceMoveCopy)
    }

    pub fn is_remove(self) -> bool {
        matches!(self, ActionKind::Remove | ActionKind::CrossDeviceMoveRemove)
    }

    /// Kinds that try a rename per top-level item.
    pub fn is_rename(self) -> bool {
        matches!(
            self,
            ActionKind::Move | ActionKind::MoveToTrash | ActionKind::RestoreFromTrash
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Remove => "remove",
            ActionKind::Copy => "copy",
            ActionKind::Move => "move",
            ActionKind::CrossDeviceMoveCopy => "cross-device copy",
            ActionKind::CrossDeviceMoveRemove => "cross-device remove",
            ActionKind::MoveToTrash => "move to trash",
            ActionKind::RestoreFromTrash => "restore from trash",
        };
        f.write_str(name)
    }
}

/// Where an action is in its lifecycle. Each `pump` runs one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Expand,
    Process,
    CopyChunk,
    Advance,
    Done,
}

/// Bookkeeping of the trash metadata that follows an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashInfoOp {
    #[default]
    None,
    /// Write `.trashinfo` once the item sits in `files/`.
    Write,
    /// Delete `.trashinfo` once the item left `files/`.
    Remove,
}

/// A path to expand, with its destination when the caller fixed one.
#[derive(Debug, Clone)]
pub struct Request {
    pub source: String,
    pub destination: Option<String>,
}

/// One top-level source and its flattened descendants.
#[derive(Debug, Clone)]
pub struct ActionEntry {
    pub item: ItemInfo,
    pub backend: Backend,
    /// Post-order: children before their parent, `item` last.
    pub items: Vec<ItemInfo>,
    /// Units of this entry already completed.
    pub curr: usize,
    pub destination: Option<String>,
    pub already_exists: bool,
    pub new_name: Option<String>,
}

impl ActionEntry {
    pub fn new(item: ItemInfo, backend: Backend, items: Vec<ItemInfo>) -> Self {
        Self {
            item,
            backend,
            items,
            curr: 0,
            destination: None,
            already_exists: false,
            new_name: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.curr >= self.items.len()
    }

    /// The item copies handle next: the reverse of post-order, parents first.
    pub fn next_copy_item(&self) -> Option<&ItemInfo> {
        let len = self.items.len();
        (self.curr < len).then(|| &self.items[len - 1 - self.curr])
    }

    /// The item removals handle next, in post-order.
    pub fn next_remove_item(&self) -> Option<&ItemInfo> {
        self.items.get(self.curr)
    }

    /// Where `source`, somewhere below this entry, lands at the destination.
    pub fn target_of(&self, source: &str) -> Option<String> {
        let destination = self.destination.as_deref()?;
        Some(paths::rebase(source, self.item.path(), destination))
    }

    /// Bytes a copy of this entry writes.
    pub fn bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|i| !i.is_dir() && !i.is_symlink())
            .map(ItemInfo::size)
            .sum()
    }
}

/// A large file being copied one chunk per step.
pub struct ChunkCopy {
    pub source: Box<dyn ItemFile>,
    pub dest: Box<dyn ItemFile>,
    pub mode: u32,
    pub buf: Vec<u8>,
}

impl fmt::Debug for ChunkCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCopy")
            .field("source", &self.source.path())
            .field("dest", &self.dest.path())
            .finish()
    }
}

/// One user-level operation.
#[derive(Debug)]
pub struct Action {
    pub id: u64,
    pub kind: ActionKind,
    /// Directory the sources come from, when they share one.
    pub origin: Option<String>,
    /// Destination directory for pastes.
    pub target: Option<String>,
    pub target_backend: Option<Backend>,
    pub clipboard_tag: ClipboardOp,
    pub trash_info: TrashInfoOp,
    pub requests: Vec<Request>,
    pub entries: Vec<ActionEntry>,
    pub current_entry: usize,
    pub progress: Progress,
    pub step: Step,
    pub copy: Option<ChunkCopy>,
    /// Runs after this action is done, whatever its outcome.
    pub aux: Option<Box<Action>>,
    pub failed: bool,
    pub cancelled: bool,
}

impl Action {
    pub fn new(id: u64, kind: ActionKind, requests: Vec<Request>) -> Self {
        Self {
            id,
            kind,
            origin: None,
            target: None,
            target_backend: None,
            clipboard_tag: ClipboardOp::None,
            trash_info: TrashInfoOp::None,
            requests,
            entries: Vec::new(),
            current_entry: 0,
            progress: Progress::default(),
            step: Step::Expand,
            copy: None,
            aux: None,
            failed: false,
            cancelled: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Appends `aux` at the end of the chain.
    pub fn push_aux(&mut self, aux: Action) {
        match &mut self.aux {
            Some(next) => next.push_aux(aux),
            None => self.aux = Some(Box::new(aux)),
        }
    }

    pub fn current(&self) -> Option<&ActionEntry> {
        self.entries.get(self.current_entry)
    }

    pub fn current_mut(&mut self) -> Option<&mut ActionEntry> {
        self.entries.get_mut(self.current_entry)
    }
}

/// Paths taken from plain source strings.
pub fn requests(sources: impl IntoIterator<Item = String>) -> Vec<Request> {
    sources
        .into_iter()
        .map(|source| Request {
            source,
            destination: None,
        })
        .collect()
}

/// Paths taken from `(source, destination)` pairs.
pub fn pair_requests(pairs: impl IntoIterator<Item = (String, String)>) -> Vec<Request> {
    pairs
        .into_iter()
        .map(|(source, destination)| Request {
            source,
            destination: Some(destination),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::DiskStorage;

    fn entry() -> ActionEntry {
        let items = vec![
            ItemInfo::missing("/src/d/a"),
            ItemInfo::missing("/src/d/sub/b"),
            ItemInfo::missing("/src/d/sub"),
            ItemInfo::missing("/src/d"),
        ];
        let mut entry = ActionEntry::new(
            ItemInfo::missing("/src/d"),
            Backend::LocalDisk(DiskStorage::new()),
            items,
        );
        entry.destination = Some("/dst/d".into());
        entry
    }

    #[test]
    fn copy_walks_parents_first_and_remove_leaves_first() {
        let mut entry = entry();
        assert_eq!(entry.next_copy_item().unwrap().path(), "/src/d");
        assert_eq!(entry.next_remove_item().unwrap().path(), "/src/d/a");
        entry.curr = 3;
        assert_eq!(entry.next_copy_item().unwrap().path(), "/src/d/a");
        assert_eq!(entry.next_remove_item().unwrap().path(), "/src/d");
        entry.curr = 4;
        assert!(entry.is_finished());
        assert!(entry.next_copy_item().is_none());
    }

    #[test]
    fn target_rebases_descendants() {
        let entry = entry();
        assert_eq!(entry.target_of("/src/d").as_deref(), Some("/dst/d"));
        assert_eq!(entry.target_of("/src/d/sub/b").as_deref(), Some("/dst/d/sub/b"));
    }

    #[test]
    fn aux_chain_appends_at_end() {
        let mut action = Action::new(1, ActionKind::Move, Vec::new());
        action.push_aux(Action::new(2, ActionKind::Remove, Vec::new()));
        action.push_aux(Action::new(3, ActionKind::Remove, Vec::new()));
        let first = action.aux.as_ref().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(first.aux.as_ref().unwrap().id, 3);
    }
}
