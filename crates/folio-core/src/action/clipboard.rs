//! The engine's record of a pending copy or cut.

use crate::fs::paths;

/// What a paste does with the stored paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipboardOp {
    #[default]
    None,
    Copy,
    Cut,
}

#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    op: ClipboardOp,
    origin: Option<String>,
    paths: Vec<String>,
    modified_externally: bool,
}

impl Clipboard {
    /// Replaces the contents. The origin is the parent of the first path.
    ///
    /// Storing an empty list clears the clipboard.
    pub fn store(&mut self, op: ClipboardOp, paths: impl IntoIterator<Item = String>) {
        let mut stored: Vec<String> = Vec::new();
        for path in paths {
            let path = paths::remove_extra_slashes(&path);
            if !stored.contains(&path) {
                stored.push(path);
            }
        }
        if stored.is_empty() || op == ClipboardOp::None {
            self.clear();
            return;
        }
        self.origin = paths::parent(&stored[0]);
        self.op = op;
        self.paths = stored;
        self.modified_externally = false;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn op(&self) -> ClipboardOp {
        self.op
    }

    /// The directory the stored paths were taken from.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn stored_count(&self) -> usize {
        self.paths.len()
    }

    pub fn has_items(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn has_cut(&self) -> bool {
        self.op == ClipboardOp::Cut && self.has_items()
    }

    /// Records that another component replaced the system clipboard.
    pub fn mark_modified_externally(&mut self) {
        self.modified_externally = true;
    }

    pub fn is_modified_externally(&self) -> bool {
        self.modified_externally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_sets_origin_and_dedups() {
        let mut clip = Clipboard::default();
        clip.store(
            ClipboardOp::Cut,
            ["/a/b/x".to_string(), "/a/b//x/".to_string(), "/a/b/y".to_string()],
        );
        assert_eq!(clip.op(), ClipboardOp::Cut);
        assert_eq!(clip.origin(), Some("/a/b"));
        assert_eq!(clip.stored_count(), 2);
        assert!(clip.has_cut());
    }

    #[test]
    fn empty_store_clears() {
        let mut clip = Clipboard::default();
        clip.store(ClipboardOp::Copy, ["/a/x".to_string()]);
        clip.mark_modified_externally();
        assert!(clip.is_modified_externally());

        clip.store(ClipboardOp::Copy, Vec::new());
        assert!(!clip.has_items());
        assert_eq!(clip.op(), ClipboardOp::None);
        assert!(clip.origin().is_none());
        assert!(!clip.is_modified_externally());
    }
}
