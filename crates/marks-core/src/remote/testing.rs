//! Scripted in-memory store for tests
//!
//! Calls can be held on a gate to force interleavings, and the next call of
//! each kind can be made to fail. Query results are read when the call
//! starts, so a held query returns the rows as they were at that moment.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::{ChangeFeed, PushEvent, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{Bookmark, NewBookmark};

/// Releases a held call when dropped or fired
pub(crate) struct Gate(Option<oneshot::Sender<()>>);

impl Gate {
    pub fn release(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct Script {
    query_gates: VecDeque<oneshot::Receiver<()>>,
    insert_gates: VecDeque<oneshot::Receiver<()>>,
    insert_reply_gates: VecDeque<oneshot::Receiver<()>>,
    delete_gates: VecDeque<oneshot::Receiver<()>>,
    fail_query: bool,
    fail_insert: bool,
    fail_delete: bool,
}

#[derive(Default)]
pub(crate) struct FakeStore {
    rows: Mutex<Vec<Bookmark>>,
    script: Mutex<Script>,
    feeds: Mutex<Vec<mpsc::Sender<PushEvent>>>,
    fail_subscribe: AtomicBool,
    queries: AtomicUsize,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
    clock: AtomicUsize,
}

fn injected() -> StoreError {
    StoreError::Http {
        status: 500,
        message: "injected failure".to_string(),
    }
}

async fn wait(gate: Option<oneshot::Receiver<()>>) {
    if let Some(rx) = gate {
        let _ = rx.await;
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bookmark with a created_at later than every earlier one
    pub fn make_row(&self, owner: Uuid, url: &str, title: &str) -> Bookmark {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        Bookmark {
            id: Uuid::new_v4(),
            user_id: owner,
            url: url.to_string(),
            title: title.to_string(),
            created_at: Utc::now() + Duration::seconds(tick),
        }
    }

    /// Put a row directly into the table, bypassing the feed
    pub fn seed(&self, owner: Uuid, url: &str, title: &str) -> Bookmark {
        let row = self.make_row(owner, url, title);
        self.rows.lock().unwrap().push(row.clone());
        row
    }

    /// Remove a row directly, bypassing the feed
    pub fn remove_row(&self, id: Uuid) {
        self.rows.lock().unwrap().retain(|b| b.id != id);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Deliver an event to every live feed, whatever its owner
    pub fn push(&self, event: PushEvent) {
        let feeds = self.feeds.lock().unwrap();
        for tx in feeds.iter() {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn live_feeds(&self) -> usize {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|tx| !tx.is_closed());
        feeds.len()
    }

    pub fn hold_next_query(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().query_gates.push_back(rx);
        Gate(Some(tx))
    }

    pub fn hold_next_insert(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().insert_gates.push_back(rx);
        Gate(Some(tx))
    }

    /// Hold the reply of the next insert after its row is stored and pushed
    pub fn hold_next_insert_reply(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().insert_reply_gates.push_back(rx);
        Gate(Some(tx))
    }

    pub fn hold_next_delete(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().delete_gates.push_back(rx);
        Gate(Some(tx))
    }

    pub fn fail_next_query(&self) {
        self.script.lock().unwrap().fail_query = true;
    }

    pub fn fail_next_insert(&self) {
        self.script.lock().unwrap().fail_insert = true;
    }

    pub fn fail_next_delete(&self) {
        self.script.lock().unwrap().fail_delete = true;
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn query(&self, owner: Uuid) -> StoreResult<Vec<Bookmark>> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let (gate, fail) = {
            let mut script = self.script.lock().unwrap();
            let fail = std::mem::take(&mut script.fail_query);
            (script.query_gates.pop_front(), fail)
        };

        let mut rows: Vec<Bookmark> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.is_owned_by(owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        wait(gate).await;

        if fail {
            return Err(injected());
        }
        Ok(rows)
    }

    async fn insert(&self, owner: Uuid, draft: &NewBookmark) -> StoreResult<Bookmark> {
        self.inserts.fetch_add(1, Ordering::SeqCst);

        let (gate, reply_gate, fail) = {
            let mut script = self.script.lock().unwrap();
            let fail = std::mem::take(&mut script.fail_insert);
            (
                script.insert_gates.pop_front(),
                script.insert_reply_gates.pop_front(),
                fail,
            )
        };
        wait(gate).await;

        if fail {
            return Err(injected());
        }

        let row = self.make_row(owner, draft.url(), draft.title());
        self.rows.lock().unwrap().push(row.clone());
        self.push(PushEvent::Inserted(row.clone()));
        wait(reply_gate).await;
        Ok(row)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);

        let (gate, fail) = {
            let mut script = self.script.lock().unwrap();
            let fail = std::mem::take(&mut script.fail_delete);
            (script.delete_gates.pop_front(), fail)
        };
        wait(gate).await;

        if fail {
            return Err(injected());
        }

        let removed = {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|b| !(b.id == id && b.is_owned_by(owner)));
            before != rows.len()
        };

        if !removed {
            return Err(StoreError::NotFound);
        }
        self.push(PushEvent::Deleted { id, user_id: None });
        Ok(())
    }

    async fn subscribe(&self, _owner: Uuid) -> StoreResult<ChangeFeed> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Realtime("injected subscribe failure".to_string()));
        }
        let (tx, feed) = ChangeFeed::channel();
        self.feeds.lock().unwrap().push(tx);
        Ok(feed)
    }
}
