//! marks core library
//!
//! This crate keeps a personal bookmark list in sync between the local
//! view, other running instances on the same device and the backend's push
//! feed.
//!
//! # Architecture
//!
//! - **Remote store**: owner-scoped rows plus a change feed (hosted backend
//!   or a local SQLite table)
//! - **Synchronizer**: the in-memory list, merging local mutations, pushed
//!   events and cross-instance signals
//! - **Notifier**: best-effort "something changed" signal between instances
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let session = TokenSession::from_config(&config);
//! let store = open_store(&config, session.access_token())?;
//! let sync = Synchronizer::from_session(&session, store, notifier::from_config(&config))
//!     .ok_or(...)?;
//!
//! let handle = spawn_sync_task(sync);
//! handle.synchronizer.create("https://example.com", "Example").await;
//! ```
//!
//! # Modules
//!
//! - `synchronizer`: the bookmark list and its background driver
//! - `remote`: store trait and adapters
//! - `notifier`: cross-instance signals
//! - `session`: resolving the signed-in user
//! - `models`: bookmark and user types
//! - `config`: application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod remote;
pub mod session;
pub mod synchronizer;

pub use config::{Backend, Config};
pub use error::{StoreError, StoreResult};
pub use models::{Bookmark, NewBookmark, User, ValidationError};
pub use notifier::{CrossTabNotifier, Delivery, Listener};
pub use remote::{open_store, ChangeFeed, PushEvent, RemoteStore};
pub use session::{SessionProvider, StaticSession, TokenSession};
pub use synchronizer::{
    spawn_sync_task, BookmarkSet, CreateOutcome, DeleteOutcome, LoadOutcome, Notice, Snapshot,
    SyncCommand, SyncHandle, Synchronizer,
};
