//! Ordering of listing rows.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::fs::ItemInfo;

/// The key rows are compared by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Alphabetical, case-insensitive.
    #[default]
    Name,
    /// Last-modified time.
    Date,
    /// Size in bytes.
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// A complete row ordering: directories first, then `by` in `order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortKey {
    pub by: SortBy,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(by: SortBy, order: SortOrder) -> Self {
        Self { by, order }
    }

    /// `true` when rows are in plain name order, which allows binary search.
    pub fn is_name_ascending(&self) -> bool {
        self.by == SortBy::Name && self.order == SortOrder::Ascending
    }

    /// Compares two rows. Directories precede files whatever the key.
    pub fn compare(&self, a: &ItemInfo, b: &ItemInfo) -> Ordering {
        let dir_cmp = b.is_browsable().cmp(&a.is_browsable());
        if dir_cmp != Ordering::Equal {
            return dir_cmp;
        }
        let ord = match self.by {
            SortBy::Name => compare_names(a.name(), b.name()),
            SortBy::Date => a
                .modified()
                .cmp(&b.modified())
                .then_with(|| compare_names(a.name(), b.name())),
            SortBy::Size => a
                .size()
                .cmp(&b.size())
                .then_with(|| compare_names(a.name(), b.name())),
        };
        match self.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

/// Case-insensitive comparison of NFC-normalised names, falling back to
/// the raw strings so that distinct names never compare equal.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let fold = |s: &str| s.nfc().flat_map(char::to_lowercase).collect::<String>();
    fold(a).cmp(&fold(b)).then_with(|| a.cmp(b))
}

/// Sorts `items` in place with `key`.
pub fn sort_items(items: &mut [ItemInfo], key: SortKey) {
    items.sort_by(|a, b| key.compare(a, b));
}
