//! Configuration management for folio.
//!
//! Engine, listing, watcher, trash and authentication preferences live in
//! one TOML file ([`settings::Config`]) loaded at startup.

pub mod settings;

pub use settings::{AuthConfig, Config, EngineConfig, ListingConfig, TrashConfig, WatcherConfig};
