//! Remote bookmark store
//!
//! The synchronizer talks to its backend through the [`RemoteStore`] trait:
//! owner-scoped query, insert and delete, plus a change feed of row level
//! events filtered by owner.
//!
//! ## Adapters
//!
//! - [`SupabaseStore`]: hosted backend (REST API + realtime websocket feed)
//! - [`SqliteStore`]: local SQLite table, change feed within one process

mod local;
mod message;
mod realtime;
mod supabase;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{Backend, Config};
use crate::error::{StoreError, StoreResult};
use crate::models::{Bookmark, NewBookmark};

pub use local::SqliteStore;
pub use realtime::RealtimeConfig;
pub use supabase::SupabaseStore;

/// Capacity of a change feed buffer
pub(crate) const FEED_CAPACITY: usize = 256;

/// Row level event pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A row was inserted
    Inserted(Bookmark),
    /// A row was deleted
    ///
    /// The owner is only known when the backend ships the full old row.
    Deleted { id: Uuid, user_id: Option<Uuid> },
    /// The feed (re)joined and may have missed events
    Resync,
}

/// Live subscription to a store's change feed
///
/// Dropping the feed (or calling [`ChangeFeed::unsubscribe`]) releases the
/// subscription on the producer side.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::Receiver<PushEvent>,
}

impl ChangeFeed {
    /// Create a feed and the sender that produces into it
    pub fn channel() -> (mpsc::Sender<PushEvent>, Self) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        (tx, Self { rx })
    }

    /// Wait for the next event; `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Take an already buffered event without waiting
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }

    /// Release the subscription
    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

/// Owner-scoped bookmark storage with a change feed
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All bookmarks of `owner`, newest first
    async fn query(&self, owner: Uuid) -> StoreResult<Vec<Bookmark>>;

    /// Store a new bookmark for `owner` and return the stored row
    async fn insert(&self, owner: Uuid, draft: &NewBookmark) -> StoreResult<Bookmark>;

    /// Delete bookmark `id` of `owner`
    ///
    /// Adapters may report [`StoreError::NotFound`]; callers treat it as success.
    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<()>;

    /// Subscribe to insert/delete events for `owner`
    async fn subscribe(&self, owner: Uuid) -> StoreResult<ChangeFeed>;
}

/// Open the store selected by the configuration
pub fn open_store(
    config: &Config,
    access_token: Option<&str>,
) -> StoreResult<Arc<dyn RemoteStore>> {
    match config.backend {
        Backend::Local => Ok(Arc::new(SqliteStore::open(&config.sqlite_path())?)),
        Backend::Supabase => {
            let url = config.supabase_url.as_deref().ok_or_else(|| {
                StoreError::Config("supabase_url is not set".to_string())
            })?;
            let key = config.supabase_key.as_deref().ok_or_else(|| {
                StoreError::Config("supabase_key is not set".to_string())
            })?;
            let token = access_token.ok_or_else(|| {
                StoreError::Config("no access token; run `marks login --token ...`".to_string())
            })?;
            Ok(Arc::new(SupabaseStore::new(url, key, token)?))
        }
    }
}
