//! Background driver for a synchronizer
//!
//! Owns the push feed subscription and the cross-tab listener for the
//! lifetime of a session and feeds their events into the [`Synchronizer`].

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Notice, Snapshot, Synchronizer, TOPIC};
use crate::notifier::Listener;
use crate::remote::{ChangeFeed, PushEvent};

/// Commands sent to the sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Re-fetch the full list
    Refresh,
    /// Release subscriptions and stop
    Shutdown,
}

/// Handle to control a running sync task
pub struct SyncHandle {
    /// Send commands to the sync task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// The synchronizer the task drives; use it for create/delete
    pub synchronizer: Synchronizer,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Watch the bookmark list
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.synchronizer.subscribe_snapshot()
    }

    /// Ask for a full refresh
    pub async fn refresh(&self) {
        let _ = self.command_tx.send(SyncCommand::Refresh).await;
    }

    /// Stop the task and wait for it to release everything
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Sync task ended abnormally: {}", e);
        }
    }
}

/// Spawn the driver task for `synchronizer`
///
/// The task subscribes to the push feed and the cross-tab topic, performs
/// the initial load, then applies events until shut down. Dropping every
/// command sender also stops it.
pub fn spawn_sync_task(synchronizer: Synchronizer) -> SyncHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(sync_task_loop(synchronizer.clone(), command_rx));

    SyncHandle {
        command_tx,
        synchronizer,
        task,
    }
}

/// One wake-up of the task loop
enum Step {
    Command(Option<SyncCommand>),
    Push(Option<PushEvent>),
    Signal(Option<()>),
}

async fn next_push(feed: &mut Option<ChangeFeed>) -> Option<PushEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_signal(listener: &mut Option<Listener>) -> Option<()> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn sync_task_loop(sync: Synchronizer, mut command_rx: mpsc::Receiver<SyncCommand>) {
    let owner = sync.owner().id;

    let mut feed = match sync.store().subscribe(owner).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            warn!("Failed to subscribe to change feed: {}", e);
            sync.report(Notice::FeedUnavailable(e.to_string()));
            None
        }
    };

    let mut listener = sync.notifier().listen(TOPIC);
    if listener.is_none() {
        debug!("Cross-tab signals unavailable");
    }

    sync.load().await;
    info!("Sync task running for {}", owner);

    loop {
        let step = tokio::select! {
            cmd = command_rx.recv() => Step::Command(cmd),
            event = next_push(&mut feed) => Step::Push(event),
            signal = next_signal(&mut listener) => Step::Signal(signal),
        };

        match step {
            Step::Command(Some(SyncCommand::Refresh)) => {
                sync.refresh().await;
            }
            Step::Command(Some(SyncCommand::Shutdown)) | Step::Command(None) => break,
            Step::Push(Some(event)) => {
                sync.apply_push(event).await;
            }
            Step::Push(None) => {
                warn!("Change feed ended");
                sync.report(Notice::FeedUnavailable("change feed closed".to_string()));
                feed = None;
            }
            Step::Signal(Some(())) => {
                if let Some(listener) = listener.as_mut() {
                    let coalesced = listener.drain();
                    if coalesced > 0 {
                        debug!("Coalesced {} queued signals", coalesced);
                    }
                }
                sync.apply_cross_tab_signal().await;
            }
            Step::Signal(None) => {
                debug!("Cross-tab listener closed");
                listener = None;
            }
        }
    }

    sync.close();
    if let Some(feed) = feed {
        feed.unsubscribe();
    }
    if let Some(listener) = listener {
        listener.close();
    }
    info!("Sync task for {} stopped", owner);
}
