//! folio core library: UI-agnostic file operations over pluggable storage.
//!
//! `folio-core` resolves paths and URLs onto storage backends (local disk,
//! the XDG trash and network shares), runs copy/move/remove/trash actions
//! as cancellable step-by-step work with progress, and keeps a sorted
//! listing of the directory being browsed in sync with both. It never talks
//! to a UI directly; frontends such as `folio-cli` consume [`EngineEvent`]s.
//!
//! # Modules
//!
//! - [`action`]: The action engine, clipboard and cross-engine removal broadcast.
//! - [`location`]: Storage backends, credentials and the [`LocationRegistry`].
//! - [`nav`]: Directory listing model, sorting, filtering, history and the I/O worker.
//! - [`watch`]: Debounced external change notifications.
//! - [`fs`]: Item snapshots ([`ItemInfo`]) and path string helpers.
//! - [`services`]: The shared [`Services`] context.
//! - [`config`]: TOML-based settings.
//! - [`event`]: Events sent from the core to frontends.
//! - [`error`]: Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod location;
pub mod nav;
pub mod services;
pub mod watch;

pub use action::{ActionEngine, CancelHandle, Clipboard, ClipboardOp, RemoveNotifier};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use event::{EngineEvent, EngineEvents};
pub use fs::ItemInfo;
pub use location::{Backend, DirFilter, InMemoryShare, LocationKind, LocationRegistry, ShareClient, Storage, TrashStorage};
pub use nav::filter::{CompiledFilter, ListingFilter};
pub use nav::model::{DirectoryListingModel, SelectionMode};
pub use nav::sort::{SortBy, SortKey, SortOrder};
pub use services::Services;
pub use watch::{Debouncer, ExternalWatcher, WatchTarget};
