//! Row visibility filters for directory listings.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{CoreError, CoreResult};
use crate::fs::ItemInfo;

/// Which entries a listing shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    pub show_hidden: bool,
    pub show_directories: bool,
    /// Shell globs matched case-insensitively against file names. Empty
    /// means "everything". Directories are never filtered by name.
    pub name_patterns: Vec<String>,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            show_hidden: false,
            show_directories: true,
            name_patterns: Vec::new(),
        }
    }
}

impl ListingFilter {
    /// Builds the matcher for this filter, rejecting malformed patterns.
    pub fn compile(&self) -> CoreResult<CompiledFilter> {
        let names = if self.name_patterns.is_empty() {
            None
        } else {
            let mut set = GlobSetBuilder::new();
            for pattern in &self.name_patterns {
                let glob = GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| CoreError::Validation(format!("invalid name pattern {pattern}: {e}")))?;
                set.add(glob);
            }
            let set = set
                .build()
                .map_err(|e| CoreError::Validation(format!("invalid name patterns: {e}")))?;
            Some(set)
        };
        Ok(CompiledFilter {
            show_hidden: self.show_hidden,
            show_directories: self.show_directories,
            names,
        })
    }
}

/// A [`ListingFilter`] with its name patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    show_hidden: bool,
    show_directories: bool,
    names: Option<GlobSet>,
}

impl Default for CompiledFilter {
    fn default() -> Self {
        Self {
            show_hidden: false,
            show_directories: true,
            names: None,
        }
    }
}

impl CompiledFilter {
    pub fn accepts(&self, item: &ItemInfo) -> bool {
        if !self.show_hidden && item.is_hidden() {
            return false;
        }
        if item.is_browsable() {
            return self.show_directories;
        }
        self.names
            .as_ref()
            .map_or(true, |set| set.is_match(item.name()))
    }

    /// Returns only the entries accepted by this filter.
    pub fn apply(&self, items: Vec<ItemInfo>) -> Vec<ItemInfo> {
        items.into_iter().filter(|i| self.accepts(i)).collect()
    }
}
