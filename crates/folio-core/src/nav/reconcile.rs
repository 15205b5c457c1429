//! Diffing a fresh directory listing against the previous snapshot.

use std::collections::HashMap;

use crate::fs::ItemInfo;

/// Out-of-band changes found between two listings of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<ItemInfo>,
    pub removed: Vec<ItemInfo>,
    pub changed: Vec<ItemInfo>,
    /// Number of entries in the fresh listing.
    pub count: usize,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Walks `current` while consuming a path-keyed map of `previous`.
///
/// Entries missing from the map are added, entries whose size, mtime or
/// permissions differ are changed, and whatever is left in the map at the
/// end was removed.
pub fn reconcile(previous: &[ItemInfo], current: impl IntoIterator<Item = ItemInfo>) -> Reconciliation {
    let mut remaining: HashMap<&str, &ItemInfo> =
        previous.iter().map(|item| (item.path(), item)).collect();
    let mut result = Reconciliation::default();

    for item in current {
        result.count += 1;
        match remaining.remove(item.path()) {
            Some(old) if old.differs_from(&item) => result.changed.push(item),
            Some(_) => {}
            None => result.added.push(item),
        }
    }

    // Keep the removal order stable by walking the snapshot again.
    result.removed = previous
        .iter()
        .filter(|item| remaining.contains_key(item.path()))
        .cloned()
        .collect();

    tracing::trace!(
        added = result.added.len(),
        removed = result.removed.len(),
        changed = result.changed.len(),
        "reconciled listing"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn listing(dir: &std::path::Path) -> Vec<ItemInfo> {
        let mut items: Vec<ItemInfo> = fs::read_dir(dir)
            .unwrap()
            .map(|e| ItemInfo::local(e.unwrap().path()))
            .collect();
        items.sort_by(|a, b| a.path().cmp(b.path()));
        items
    }

    #[test]
    fn detects_added_removed_and_changed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep"), "1").unwrap();
        fs::write(tmp.path().join("grow"), "1").unwrap();
        fs::write(tmp.path().join("gone"), "1").unwrap();
        let before = listing(tmp.path());

        fs::remove_file(tmp.path().join("gone")).unwrap();
        fs::write(tmp.path().join("grow"), "12345").unwrap();
        fs::write(tmp.path().join("new"), "1").unwrap();

        let diff = reconcile(&before, listing(tmp.path()));

        assert_eq!(diff.count, 3);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].name(), "new");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].name(), "gone");
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].name(), "grow");
    }

    #[test]
    fn second_pass_without_changes_is_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "1").unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();
        let first = listing(tmp.path());

        fs::write(tmp.path().join("b"), "2").unwrap();
        let second = listing(tmp.path());
        let diff = reconcile(&first, second.clone());
        assert_eq!(diff.added.len(), 1);

        let again = reconcile(&second, listing(tmp.path()));
        assert!(again.is_empty());
        assert_eq!(again.count, 3);
    }

    #[test]
    fn empty_previous_means_everything_is_added() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), "1").unwrap();
        let diff = reconcile(&[], listing(tmp.path()));
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
    }
}
