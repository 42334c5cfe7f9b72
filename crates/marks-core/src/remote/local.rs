//! Local SQLite bookmark store
//!
//! Offline stand-in for the hosted backend: one `bookmarks` table with the
//! same columns, ids and timestamps assigned on insert. The change feed only
//! reaches subscribers in the same process; other processes learn about
//! changes through the cross-tab notifier.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChangeFeed, PushEvent, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{Bookmark, NewBookmark};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bookmarks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Owner scoped listing, newest first
        CREATE INDEX IF NOT EXISTS idx_bookmarks_user_created
            ON bookmarks(user_id, created_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Bookmark store backed by a SQLite file
pub struct SqliteStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<(Uuid, mpsc::Sender<PushEvent>)>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver an event to the owner's subscribers, dropping closed feeds
    fn publish(&self, owner: Uuid, event: PushEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(sub_owner, tx)| {
            if tx.is_closed() {
                return false;
            }
            if *sub_owner != owner {
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Change feed full, dropping event for {}", owner);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }
}

fn row_to_bookmark(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let created_at: String = row.get(4)?;

    Ok(Bookmark {
        id: parse_uuid(0, &id)?,
        user_id: parse_uuid(1, &user_id)?,
        url: row.get(2)?,
        title: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc),
    })
}

fn parse_uuid(column: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn query(&self, owner: Uuid) -> StoreResult<Vec<Bookmark>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, url, title, created_at FROM bookmarks
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![owner.to_string()], row_to_bookmark)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn insert(&self, owner: Uuid, draft: &NewBookmark) -> StoreResult<Bookmark> {
        let bookmark = Bookmark {
            id: Uuid::new_v4(),
            user_id: owner,
            url: draft.url().to_string(),
            title: draft.title().to_string(),
            created_at: Utc::now(),
        };

        self.lock_conn().execute(
            "INSERT INTO bookmarks (id, user_id, url, title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                bookmark.id.to_string(),
                bookmark.user_id.to_string(),
                bookmark.url,
                bookmark.title,
                bookmark
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        debug!("Inserted bookmark {}", bookmark.id);
        self.publish(owner, PushEvent::Inserted(bookmark.clone()));
        Ok(bookmark)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<()> {
        let removed = self.lock_conn().execute(
            "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string()],
        )?;

        if removed == 0 {
            return Err(StoreError::NotFound);
        }

        debug!("Deleted bookmark {}", id);
        self.publish(
            owner,
            PushEvent::Deleted {
                id,
                user_id: Some(owner),
            },
        );
        Ok(())
    }

    async fn subscribe(&self, owner: Uuid) -> StoreResult<ChangeFeed> {
        let (tx, feed) = ChangeFeed::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((owner, tx));
        Ok(feed)
    }
}
