//! Storage-independent building blocks: item snapshots, path strings and
//! the small INI format used for on-disk records.

pub mod ini;
pub mod item;
pub mod paths;

pub use item::{ItemInfo, RemoteFields};
