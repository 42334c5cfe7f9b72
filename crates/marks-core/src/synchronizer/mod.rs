//! Bookmark synchronizer
//!
//! Keeps one user's bookmark list consistent across local mutations, the
//! store's push feed and signals from other instances on the device.
//!
//! # Model
//!
//! The visible list is an authoritative base set minus the ids that have a
//! delete in flight. The base set is replaced wholesale by full fetches and
//! patched by deltas (confirmed creates and deletes, pushed events).
//!
//! Fetches can overlap and finish in any order, so each one takes a ticket
//! when it is issued. A result older than the last applied fetch is dropped.
//! Deltas that land while fetches are in flight are journaled with the
//! ticket clock and replayed onto any result issued before them, so a slow
//! read never erases a newer change.
//!
//! Every state transition happens under a short lock with no await inside;
//! store calls are the only suspension points.

mod set;
mod task;

pub use set::BookmarkSet;
pub use task::{spawn_sync_task, SyncCommand, SyncHandle};

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Bookmark, NewBookmark, User, ValidationError};
use crate::notifier::{CrossTabNotifier, Delivery};
use crate::remote::{PushEvent, RemoteStore};
use crate::session::SessionProvider;

/// Cross-instance topic for bookmark changes
pub const TOPIC: &str = "bookmarks-sync";

/// What the list currently looks like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Bookmarks, newest first
    pub bookmarks: Vec<Bookmark>,
    /// True until the first fetch has finished
    pub loading: bool,
}

/// Problems worth showing to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoadFailed(String),
    CreateFailed(String),
    DeleteFailed(String),
    /// The push feed could not be subscribed; the list only updates on refresh
    FeedUnavailable(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LoadFailed(e) => write!(f, "Failed to load bookmarks: {}", e),
            Notice::CreateFailed(e) => write!(f, "Failed to add bookmark: {}", e),
            Notice::DeleteFailed(e) => write!(f, "Failed to delete bookmark: {}", e),
            Notice::FeedUnavailable(e) => write!(f, "Live updates unavailable: {}", e),
        }
    }
}

/// Result of a full fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The fetched rows replaced the list
    Applied,
    /// A newer fetch was applied first; this result was dropped
    Stale,
    /// The fetch failed; the previous list stays
    Failed(String),
    /// The synchronizer was closed
    Closed,
}

/// Result of a create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Bookmark),
    /// Refused before any I/O
    Invalid(ValidationError),
    /// Another create is still pending
    Busy,
    Failed(String),
    Closed,
}

/// Result of a delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The id is not in the list; nothing was sent
    Unknown,
    /// The store refused; the list was re-fetched
    Failed(String),
    Closed,
}

#[derive(Debug, Clone)]
enum Delta {
    Insert(Bookmark),
    Remove(Uuid),
}

impl Delta {
    fn apply(&self, set: &mut BookmarkSet) -> bool {
        match self {
            Delta::Insert(bookmark) => set.insert(bookmark.clone()),
            Delta::Remove(id) => set.remove(*id),
        }
    }
}

#[derive(Debug)]
struct State {
    base: BookmarkSet,
    pending_deletes: HashSet<Uuid>,
    loading: bool,
    /// Ticket of the most recently issued fetch
    issued: u64,
    /// Ticket of the most recently applied fetch
    applied: u64,
    in_flight: usize,
    /// Deltas stamped with `issued` at the time they were applied
    journal: Vec<(u64, Delta)>,
    creating: bool,
    closed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            base: BookmarkSet::new(),
            pending_deletes: HashSet::new(),
            loading: true,
            issued: 0,
            applied: 0,
            in_flight: 0,
            journal: Vec::new(),
            creating: false,
            closed: false,
        }
    }

    fn is_visible(&self, id: Uuid) -> bool {
        self.base.contains(id) && !self.pending_deletes.contains(&id)
    }

    fn view(&self) -> Snapshot {
        Snapshot {
            bookmarks: self
                .base
                .iter()
                .filter(|b| !self.pending_deletes.contains(&b.id))
                .cloned()
                .collect(),
            loading: self.loading,
        }
    }

    fn apply_delta(&mut self, delta: Delta) -> bool {
        let changed = delta.apply(&mut self.base);
        if self.in_flight > 0 {
            self.journal.push((self.issued, delta));
        }
        changed
    }
}

struct Shared {
    owner: User,
    store: Arc<dyn RemoteStore>,
    notifier: Arc<dyn CrossTabNotifier>,
    state: Mutex<State>,
    snapshot_tx: watch::Sender<Snapshot>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Mutex<Option<mpsc::UnboundedReceiver<Notice>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &State) {
        self.snapshot_tx.send_replace(state.view());
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }
}

/// Counts a fetch as in flight until dropped
struct FetchGuard<'a> {
    shared: &'a Shared,
    ticket: u64,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            state.journal.clear();
        } else {
            let applied = state.applied;
            state.journal.retain(|(stamp, _)| *stamp > applied);
        }
    }
}

/// Holds the single create slot until dropped
struct CreateGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().creating = false;
    }
}

/// Handle to one user's synchronized bookmark list
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Synchronizer {
    shared: Arc<Shared>,
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("owner", &self.shared.owner.id)
            .finish()
    }
}

impl Synchronizer {
    /// Create a synchronizer for `owner`; the list starts empty and loading
    pub fn new(
        owner: User,
        store: Arc<dyn RemoteStore>,
        notifier: Arc<dyn CrossTabNotifier>,
    ) -> Self {
        let state = State::new();
        let (snapshot_tx, _) = watch::channel(state.view());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                owner,
                store,
                notifier,
                state: Mutex::new(state),
                snapshot_tx,
                notice_tx,
                notice_rx: Mutex::new(Some(notice_rx)),
            }),
        }
    }

    /// Create a synchronizer for the signed-in user, if there is one
    pub fn from_session(
        session: &dyn SessionProvider,
        store: Arc<dyn RemoteStore>,
        notifier: Arc<dyn CrossTabNotifier>,
    ) -> Option<Self> {
        let owner = session.current_user()?;
        Some(Self::new(owner, store, notifier))
    }

    pub fn owner(&self) -> &User {
        &self.shared.owner
    }

    /// Current list
    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().view()
    }

    /// Watch the list; a new value is published on every change
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Take the notice receiver (can only be called once)
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.shared
            .notice_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Initial load; same as [`Synchronizer::refresh`]
    pub async fn load(&self) -> LoadOutcome {
        self.refresh().await
    }

    /// Fetch every bookmark of the owner and replace the list
    pub async fn refresh(&self) -> LoadOutcome {
        let guard = match self.begin_fetch() {
            Some(guard) => guard,
            None => return LoadOutcome::Closed,
        };

        let result = self.shared.store.query(self.shared.owner.id).await;
        let outcome = self.finish_fetch(guard.ticket, result);
        drop(guard);
        outcome
    }

    fn begin_fetch(&self) -> Option<FetchGuard<'_>> {
        let mut state = self.shared.lock();
        if state.closed {
            return None;
        }
        state.issued += 1;
        state.in_flight += 1;
        debug!("Fetch {} issued", state.issued);
        Some(FetchGuard {
            shared: &self.shared,
            ticket: state.issued,
        })
    }

    fn finish_fetch(
        &self,
        ticket: u64,
        result: crate::error::StoreResult<Vec<Bookmark>>,
    ) -> LoadOutcome {
        let mut state = self.shared.lock();
        if state.closed {
            return LoadOutcome::Closed;
        }

        match result {
            Ok(rows) => {
                if ticket <= state.applied {
                    debug!(
                        "Dropping fetch {} (fetch {} already applied)",
                        ticket, state.applied
                    );
                    return LoadOutcome::Stale;
                }

                let owner = self.shared.owner.id;
                let rows = rows.into_iter().filter(|b| b.is_owned_by(owner)).collect();
                let mut set = BookmarkSet::from_rows(rows);
                for (stamp, delta) in &state.journal {
                    if *stamp >= ticket {
                        delta.apply(&mut set);
                    }
                }

                debug!("Fetch {} applied with {} bookmarks", ticket, set.len());
                state.base = set;
                state.applied = ticket;
                state.loading = false;
                self.shared.publish(&state);
                LoadOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to load bookmarks: {}", e);
                let message = e.describe();
                state.loading = false;
                self.shared.publish(&state);
                self.shared.notify(Notice::LoadFailed(message.clone()));
                LoadOutcome::Failed(message)
            }
        }
    }

    /// Store a new bookmark
    ///
    /// Blank input is refused without touching the store. Only one create
    /// may be pending at a time.
    pub async fn create(&self, url: &str, title: &str) -> CreateOutcome {
        let draft = match NewBookmark::new(url, title) {
            Ok(draft) => draft,
            Err(e) => return CreateOutcome::Invalid(e),
        };

        let result = {
            let _slot = match self.claim_create() {
                Ok(slot) => slot,
                Err(outcome) => return outcome,
            };
            self.shared.store.insert(self.shared.owner.id, &draft).await
        };

        let bookmark = match result {
            Ok(bookmark) => bookmark,
            Err(e) => {
                if self.is_closed() {
                    return CreateOutcome::Closed;
                }
                warn!("Failed to create bookmark: {}", e);
                let message = e.describe();
                self.shared.notify(Notice::CreateFailed(message.clone()));
                return CreateOutcome::Failed(message);
            }
        };

        if !self.apply_confirmed(Delta::Insert(bookmark.clone())) {
            return CreateOutcome::Closed;
        }
        info!("Created bookmark {}", bookmark.id);

        self.signal_others();
        self.refresh().await;
        CreateOutcome::Created(bookmark)
    }

    fn claim_create(&self) -> Result<CreateGuard<'_>, CreateOutcome> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(CreateOutcome::Closed);
        }
        if state.creating {
            debug!("Create refused, another one is pending");
            return Err(CreateOutcome::Busy);
        }
        state.creating = true;
        Ok(CreateGuard {
            shared: &self.shared,
        })
    }

    /// Delete a bookmark
    ///
    /// The row disappears from the list at once. If the store refuses, the
    /// list is re-fetched.
    pub async fn delete(&self, id: Uuid) -> DeleteOutcome {
        if let Err(outcome) = self.begin_delete(id) {
            return outcome;
        }

        let result = match self.shared.store.delete(self.shared.owner.id, id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        };

        match result {
            Ok(()) => {
                if !self.finish_delete(id, true) {
                    return DeleteOutcome::Closed;
                }
                info!("Deleted bookmark {}", id);
                self.signal_others();
                DeleteOutcome::Deleted
            }
            Err(e) => {
                if !self.finish_delete(id, false) {
                    return DeleteOutcome::Closed;
                }
                warn!("Failed to delete bookmark {}: {}", id, e);
                let message = e.describe();
                self.shared.notify(Notice::DeleteFailed(message.clone()));
                self.refresh().await;
                DeleteOutcome::Failed(message)
            }
        }
    }

    fn begin_delete(&self, id: Uuid) -> Result<(), DeleteOutcome> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(DeleteOutcome::Closed);
        }
        if !state.is_visible(id) {
            return Err(DeleteOutcome::Unknown);
        }
        state.pending_deletes.insert(id);
        self.shared.publish(&state);
        Ok(())
    }

    /// Settle a pending delete; returns false when closed
    fn finish_delete(&self, id: Uuid, confirmed: bool) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        state.pending_deletes.remove(&id);
        if confirmed {
            state.apply_delta(Delta::Remove(id));
        }
        self.shared.publish(&state);
        true
    }

    /// Apply a confirmed change; returns false when closed
    fn apply_confirmed(&self, delta: Delta) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        if state.apply_delta(delta) {
            self.shared.publish(&state);
        }
        true
    }

    /// Apply an event from the push feed
    ///
    /// Returns whether the list changed. Events for other owners are ignored.
    pub async fn apply_push(&self, event: PushEvent) -> bool {
        let owner = self.shared.owner.id;
        let delta = match event {
            PushEvent::Inserted(bookmark) => {
                if !bookmark.is_owned_by(owner) {
                    debug!("Ignoring insert of {} for another owner", bookmark.id);
                    return false;
                }
                Delta::Insert(bookmark)
            }
            PushEvent::Deleted { id, user_id } => {
                if user_id.is_some_and(|user| user != owner) {
                    debug!("Ignoring delete of {} for another owner", id);
                    return false;
                }
                Delta::Remove(id)
            }
            PushEvent::Resync => {
                info!("Change feed resynced, refreshing");
                return self.refresh().await == LoadOutcome::Applied;
            }
        };

        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        let changed = state.apply_delta(delta);
        if changed {
            self.shared.publish(&state);
        }
        changed
    }

    /// Another instance changed something; re-fetch
    pub async fn apply_cross_tab_signal(&self) -> LoadOutcome {
        debug!("Cross-tab signal received");
        self.refresh().await
    }

    fn signal_others(&self) {
        if self.shared.notifier.send(TOPIC) == Delivery::Unsupported {
            debug!("Cross-tab notification unavailable");
        }
    }

    /// Report that the push feed could not be opened
    pub(crate) fn report(&self, notice: Notice) {
        self.shared.notify(notice);
    }

    pub(crate) fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.shared.store
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn CrossTabNotifier> {
        &self.shared.notifier
    }

    /// Stop accepting work; results still in flight are discarded
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if !state.closed {
            state.closed = true;
            debug!("Synchronizer for {} closed", self.shared.owner.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{Disabled, LocalHub};
    use crate::remote::testing::FakeStore;
    use crate::session::StaticSession;

    struct Fixture {
        store: Arc<FakeStore>,
        owner: Uuid,
        sync: Synchronizer,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(Disabled))
    }

    fn fixture_with(notifier: Arc<dyn CrossTabNotifier>) -> Fixture {
        let store = Arc::new(FakeStore::new());
        let owner = Uuid::new_v4();
        let sync = Synchronizer::new(User::new(owner), store.clone(), notifier);
        Fixture { store, owner, sync }
    }

    fn titles(sync: &Synchronizer) -> Vec<String> {
        sync.snapshot()
            .bookmarks
            .into_iter()
            .map(|b| b.title)
            .collect()
    }

    /// Let spawned tasks run until `cond` holds
    async fn until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_from_session_requires_user() {
        let store: Arc<dyn RemoteStore> = Arc::new(FakeStore::new());
        let none =
            Synchronizer::from_session(&StaticSession(None), store.clone(), Arc::new(Disabled));
        assert!(none.is_none());

        let user = User::new(Uuid::new_v4());
        let session = StaticSession(Some(user.clone()));
        let some = Synchronizer::from_session(&session, store, Arc::new(Disabled));
        assert_eq!(some.unwrap().owner(), &user);
    }

    #[tokio::test]
    async fn test_initial_load() {
        let f = fixture();
        f.store.seed(f.owner, "https://a.com", "A");
        f.store.seed(f.owner, "https://b.com", "B");
        f.store.seed(Uuid::new_v4(), "https://other.com", "Other");

        assert!(f.sync.snapshot().loading);
        assert_eq!(f.sync.load().await, LoadOutcome::Applied);

        let snapshot = f.sync.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(titles(&f.sync), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_failed_first_load_clears_loading() {
        let f = fixture();
        let mut notices = f.sync.take_notices().unwrap();
        f.store.seed(f.owner, "https://a.com", "A");
        f.store.fail_next_query();

        assert!(matches!(f.sync.load().await, LoadOutcome::Failed(_)));

        let snapshot = f.sync.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.bookmarks.is_empty());
        // Notices carry the recovery hint of the failure
        match notices.try_recv() {
            Ok(Notice::LoadFailed(message)) => assert!(message.contains("Try again")),
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let f = fixture();
        f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        f.store.fail_next_query();
        assert!(matches!(f.sync.refresh().await, LoadOutcome::Failed(_)));
        assert_eq!(titles(&f.sync), vec!["A"]);
    }

    #[tokio::test]
    async fn test_duplicate_push_insert_is_idempotent() {
        let f = fixture();
        f.sync.load().await;
        let row = f.store.make_row(f.owner, "https://a.com", "A");

        assert!(f.sync.apply_push(PushEvent::Inserted(row.clone())).await);
        assert!(!f.sync.apply_push(PushEvent::Inserted(row)).await);
        assert_eq!(f.sync.snapshot().bookmarks.len(), 1);
    }

    #[tokio::test]
    async fn test_push_insert_lands_in_front() {
        let f = fixture();
        f.store.seed(f.owner, "https://old.com", "Old");
        f.sync.load().await;

        let row = f.store.make_row(f.owner, "https://new.com", "New");
        f.sync.apply_push(PushEvent::Inserted(row)).await;
        assert_eq!(titles(&f.sync), vec!["New", "Old"]);
    }

    #[tokio::test]
    async fn test_push_delete_of_absent_id_is_noop() {
        let f = fixture();
        f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;
        let before = f.sync.snapshot();

        let changed = f
            .sync
            .apply_push(PushEvent::Deleted {
                id: Uuid::new_v4(),
                user_id: Some(f.owner),
            })
            .await;

        assert!(!changed);
        assert_eq!(f.sync.snapshot(), before);
    }

    #[tokio::test]
    async fn test_foreign_owner_events_are_ignored() {
        let f = fixture();
        let mine = f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        let stranger = Uuid::new_v4();
        let foreign = f.store.make_row(stranger, "https://x.com", "X");
        assert!(!f.sync.apply_push(PushEvent::Inserted(foreign)).await);
        assert!(
            !f.sync
                .apply_push(PushEvent::Deleted {
                    id: mine.id,
                    user_id: Some(stranger),
                })
                .await
        );

        assert_eq!(titles(&f.sync), vec!["A"]);
    }

    #[tokio::test]
    async fn test_delete_event_without_owner_applies_by_id() {
        let f = fixture();
        let row = f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        assert!(
            f.sync
                .apply_push(PushEvent::Deleted {
                    id: row.id,
                    user_id: None,
                })
                .await
        );
        assert!(f.sync.snapshot().bookmarks.is_empty());
    }

    #[tokio::test]
    async fn test_resync_event_refreshes() {
        let f = fixture();
        f.sync.load().await;
        f.store.seed(f.owner, "https://missed.com", "Missed");

        assert!(f.sync.apply_push(PushEvent::Resync).await);
        assert_eq!(f.store.query_calls(), 2);
        assert_eq!(titles(&f.sync), vec!["Missed"]);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_input_without_io() {
        let f = fixture();
        f.sync.load().await;

        assert_eq!(
            f.sync.create("   ", "Title").await,
            CreateOutcome::Invalid(ValidationError::EmptyUrl)
        );
        assert_eq!(
            f.sync.create("https://a.com", "").await,
            CreateOutcome::Invalid(ValidationError::EmptyTitle)
        );

        assert_eq!(f.store.insert_calls(), 0);
        assert_eq!(f.store.query_calls(), 1);
        assert!(f.sync.snapshot().bookmarks.is_empty());
    }

    #[tokio::test]
    async fn test_create_adds_and_notifies_other_instances() {
        let hub = LocalHub::new();
        let mut other = hub.peer().listen(TOPIC).unwrap();
        let f = fixture_with(Arc::new(hub));
        f.store.seed(f.owner, "https://old.com", "Old");
        f.sync.load().await;

        let outcome = f.sync.create(" https://new.com ", "New").await;
        let created = match outcome {
            CreateOutcome::Created(b) => b,
            other => panic!("Expected Created, got {:?}", other),
        };

        assert_eq!(created.url, "https://new.com");
        assert_eq!(titles(&f.sync), vec!["New", "Old"]);
        assert_eq!(other.drain(), 1);
        // Confirming refresh
        assert_eq!(f.store.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_create_then_push_echo_yields_one_entry() {
        let f = fixture();
        f.sync.load().await;

        let created = match f.sync.create("https://a.com", "A").await {
            CreateOutcome::Created(b) => b,
            other => panic!("Expected Created, got {:?}", other),
        };
        f.sync.apply_push(PushEvent::Inserted(created)).await;

        assert_eq!(f.sync.snapshot().bookmarks.len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_reports_and_keeps_state() {
        let f = fixture();
        let mut notices = f.sync.take_notices().unwrap();
        f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;
        let before = f.sync.snapshot();

        f.store.fail_next_insert();
        assert!(matches!(
            f.sync.create("https://b.com", "B").await,
            CreateOutcome::Failed(_)
        ));

        assert_eq!(f.sync.snapshot(), before);
        assert!(matches!(notices.try_recv(), Ok(Notice::CreateFailed(_))));

        // The slot is free again
        assert!(matches!(
            f.sync.create("https://b.com", "B").await,
            CreateOutcome::Created(_)
        ));
    }

    #[tokio::test]
    async fn test_overlapping_create_is_busy() {
        let f = fixture();
        f.sync.load().await;

        let gate = f.store.hold_next_insert();
        let sync = f.sync.clone();
        let first = tokio::spawn(async move { sync.create("https://a.com", "A").await });
        until(|| f.store.insert_calls() == 1).await;

        assert_eq!(f.sync.create("https://b.com", "B").await, CreateOutcome::Busy);
        assert_eq!(f.store.insert_calls(), 1);

        gate.release();
        assert!(matches!(first.await.unwrap(), CreateOutcome::Created(_)));
        assert_eq!(titles(&f.sync), vec!["A"]);
    }

    #[tokio::test]
    async fn test_delete_removes_and_notifies() {
        let hub = LocalHub::new();
        let mut other = hub.peer().listen(TOPIC).unwrap();
        let f = fixture_with(Arc::new(hub));
        let row = f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        assert_eq!(f.sync.delete(row.id).await, DeleteOutcome::Deleted);
        assert!(f.sync.snapshot().bookmarks.is_empty());
        assert_eq!(f.store.row_count(), 0);
        assert_eq!(other.drain(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_noop() {
        let f = fixture();
        f.sync.load().await;

        assert_eq!(f.sync.delete(Uuid::new_v4()).await, DeleteOutcome::Unknown);
        assert_eq!(f.store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_not_found_counts_as_success() {
        let f = fixture();
        let row = f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;
        f.store.remove_row(row.id);

        assert_eq!(f.sync.delete(row.id).await, DeleteOutcome::Deleted);
        assert!(f.sync.snapshot().bookmarks.is_empty());
    }

    #[tokio::test]
    async fn test_delete_hides_row_while_in_flight() {
        let f = fixture();
        let row = f.store.seed(f.owner, "https://a.com", "A");
        f.store.seed(f.owner, "https://b.com", "B");
        f.sync.load().await;

        let gate = f.store.hold_next_delete();
        let sync = f.sync.clone();
        let pending = tokio::spawn(async move { sync.delete(row.id).await });
        until(|| f.store.delete_calls() == 1).await;

        assert_eq!(titles(&f.sync), vec!["B"]);

        // A refresh that still sees the row keeps it hidden
        f.sync.refresh().await;
        assert_eq!(titles(&f.sync), vec!["B"]);

        // Deleting it again while pending does nothing
        assert_eq!(f.sync.delete(row.id).await, DeleteOutcome::Unknown);

        gate.release();
        assert_eq!(pending.await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(titles(&f.sync), vec!["B"]);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_row() {
        let f = fixture();
        let mut notices = f.sync.take_notices().unwrap();
        f.store.seed(f.owner, "https://a.com", "A");
        let row = f.store.seed(f.owner, "https://b.com", "B");
        f.sync.load().await;

        f.store.fail_next_delete();
        assert!(matches!(
            f.sync.delete(row.id).await,
            DeleteOutcome::Failed(_)
        ));

        assert_eq!(titles(&f.sync), vec!["B", "A"]);
        assert!(matches!(notices.try_recv(), Ok(Notice::DeleteFailed(_))));
        // Reconciling fetch
        assert_eq!(f.store.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let f = fixture();
        f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        // The slow fetch reads the table before B exists
        let gate = f.store.hold_next_query();
        let sync = f.sync.clone();
        let slow = tokio::spawn(async move { sync.refresh().await });
        until(|| f.store.query_calls() == 2).await;

        f.store.seed(f.owner, "https://b.com", "B");
        assert_eq!(f.sync.refresh().await, LoadOutcome::Applied);
        assert_eq!(titles(&f.sync), vec!["B", "A"]);

        gate.release();
        assert_eq!(slow.await.unwrap(), LoadOutcome::Stale);
        assert_eq!(titles(&f.sync), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_push_during_fetch_survives_older_read() {
        let f = fixture();
        let gone = f.store.seed(f.owner, "https://gone.com", "Gone");
        f.sync.load().await;

        // Fetch reads Gone and not New
        let gate = f.store.hold_next_query();
        let sync = f.sync.clone();
        let slow = tokio::spawn(async move { sync.refresh().await });
        until(|| f.store.query_calls() == 2).await;

        let new = f.store.seed(f.owner, "https://new.com", "New");
        f.store.remove_row(gone.id);
        f.sync.apply_push(PushEvent::Inserted(new)).await;
        f.sync
            .apply_push(PushEvent::Deleted {
                id: gone.id,
                user_id: None,
            })
            .await;

        gate.release();
        assert_eq!(slow.await.unwrap(), LoadOutcome::Applied);
        assert_eq!(titles(&f.sync), vec!["New"]);
    }

    #[tokio::test]
    async fn test_cross_tab_signal_refreshes() {
        let f = fixture();
        f.sync.load().await;
        f.store.seed(f.owner, "https://elsewhere.com", "Elsewhere");

        assert_eq!(f.sync.apply_cross_tab_signal().await, LoadOutcome::Applied);
        assert_eq!(titles(&f.sync), vec!["Elsewhere"]);
    }

    #[tokio::test]
    async fn test_close_discards_late_results() {
        let f = fixture();
        f.store.seed(f.owner, "https://a.com", "A");
        let snapshots = f.sync.subscribe_snapshot();

        let gate = f.store.hold_next_query();
        let sync = f.sync.clone();
        let pending = tokio::spawn(async move { sync.load().await });
        until(|| f.store.query_calls() == 1).await;

        f.sync.close();
        gate.release();

        assert_eq!(pending.await.unwrap(), LoadOutcome::Closed);
        assert!(f.sync.snapshot().bookmarks.is_empty());
        assert!(!snapshots.has_changed().unwrap());

        assert_eq!(f.sync.refresh().await, LoadOutcome::Closed);
        assert_eq!(f.sync.create("https://b.com", "B").await, CreateOutcome::Closed);
        assert_eq!(f.store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_watch_follows_changes() {
        let f = fixture();
        let mut snapshots = f.sync.subscribe_snapshot();
        assert!(snapshots.borrow().loading);

        f.store.seed(f.owner, "https://a.com", "A");
        f.sync.load().await;

        assert!(snapshots.has_changed().unwrap());
        let latest = snapshots.borrow_and_update().clone();
        assert!(!latest.loading);
        assert_eq!(latest.bookmarks.len(), 1);
    }

    #[tokio::test]
    async fn test_instances_converge() {
        let hub = LocalHub::new();
        let store = Arc::new(FakeStore::new());
        let owner = User::new(Uuid::new_v4());
        let a = Synchronizer::new(owner.clone(), store.clone(), Arc::new(hub.clone()));
        let b = Synchronizer::new(owner.clone(), store.clone(), Arc::new(hub.peer()));
        let mut b_signals = b.notifier().listen(TOPIC).unwrap();

        a.load().await;
        b.load().await;

        let first = match a.create("https://one.com", "One").await {
            CreateOutcome::Created(row) => row,
            other => panic!("Expected Created, got {:?}", other),
        };
        b.create("https://two.com", "Two").await;
        a.delete(first.id).await;

        // B learns through the signal, A through its own confirmed changes
        assert!(b_signals.drain() > 0);
        b.apply_cross_tab_signal().await;
        a.refresh().await;

        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(titles(&a), vec!["Two"]);
    }
}
