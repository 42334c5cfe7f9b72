//! Cross-instance change notification
//!
//! Best-effort fan-out of a "changed" signal to other running instances of
//! the same user on the same device. Signals carry no data; receivers
//! re-fetch from the store. Nothing here is authoritative and every failure
//! degrades to "no signal".

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;

/// Buffered signals per listener; extra signals are coalesced away
const LISTENER_CAPACITY: usize = 16;

/// Result of posting a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was handed to the primitive
    Sent,
    /// No notification primitive on this platform or configuration
    Unsupported,
}

/// Same-device broadcast of change signals
pub trait CrossTabNotifier: Send + Sync {
    /// Post one "changed" signal on `topic`
    fn send(&self, topic: &str) -> Delivery;

    /// Start listening on `topic`; `None` when unsupported
    ///
    /// Signals posted by this same notifier are not delivered back to it.
    fn listen(&self, topic: &str) -> Option<Listener>;
}

/// Receiving end of a topic subscription
pub struct Listener {
    rx: mpsc::Receiver<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl Listener {
    fn new(rx: mpsc::Receiver<()>, watcher: Option<RecommendedWatcher>) -> Self {
        Self {
            rx,
            _watcher: watcher,
        }
    }

    /// Wait for the next signal; `None` once the source is gone
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Discard signals that are already queued, returning how many
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    /// Stop listening
    pub fn close(mut self) {
        self.rx.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("watching", &self._watcher.is_some())
            .finish()
    }
}

/// Notifier for when cross-instance signalling is off
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl CrossTabNotifier for Disabled {
    fn send(&self, _topic: &str) -> Delivery {
        Delivery::Unsupported
    }

    fn listen(&self, _topic: &str) -> Option<Listener> {
        None
    }
}

/// Notifier backed by a directory shared by all instances on the device
///
/// A topic is the file `<dir>/<topic>.signal`. Sending rewrites it with a
/// fresh nonce; listeners watch the directory for changes to that file.
#[derive(Debug)]
pub struct SignalDir {
    dir: PathBuf,
    origin: Uuid,
    seq: AtomicU64,
}

impl SignalDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            origin: Uuid::new_v4(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn topic_path(&self, topic: &str) -> PathBuf {
        let name: String = topic
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.signal", name))
    }
}

impl CrossTabNotifier for SignalDir {
    fn send(&self, topic: &str) -> Delivery {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            debug!("Signal directory unavailable: {}", e);
            return Delivery::Unsupported;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let nonce = format!("{}:{}", self.origin, seq);
        match fs::write(self.topic_path(topic), nonce) {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                debug!("Failed to post signal on {}: {}", topic, e);
                Delivery::Unsupported
            }
        }
    }

    fn listen(&self, topic: &str) -> Option<Listener> {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            debug!("Signal directory unavailable: {}", e);
            return None;
        }

        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let target = self.topic_path(topic);
        let origin = self.origin.to_string();

        let watch_target = target.clone();
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == watch_target.file_name()) {
                        return;
                    }
                    // Skip our own posts; an unreadable file still counts as a signal
                    if let Ok(content) = fs::read_to_string(&watch_target) {
                        if content.starts_with(&origin) {
                            return;
                        }
                    }
                    let _ = tx.try_send(());
                }
                Err(e) => warn!("Signal watch error: {:?}", e),
            }
        });

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                debug!("File watching unavailable: {}", e);
                return None;
            }
        };

        if let Err(e) = watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            debug!("Cannot watch {}: {}", self.dir.display(), e);
            return None;
        }

        debug!("Listening for signals on {}", target.display());
        Some(Listener::new(rx, Some(watcher)))
    }
}

type Registry = HashMap<String, Vec<(Uuid, mpsc::Sender<()>)>>;

/// In-process notifier shared by several instances in one program
///
/// Each clone made with [`LocalHub::peer`] is a separate instance: it hears
/// every other peer's signals but not its own.
#[derive(Debug, Clone)]
pub struct LocalHub {
    registry: Arc<Mutex<Registry>>,
    origin: Uuid,
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            origin: Uuid::new_v4(),
        }
    }

    /// Another instance attached to the same hub
    pub fn peer(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            origin: Uuid::new_v4(),
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossTabNotifier for LocalHub {
    fn send(&self, topic: &str) -> Delivery {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(listeners) = registry.get_mut(topic) {
            listeners.retain(|(_, tx)| !tx.is_closed());
            for (origin, tx) in listeners.iter() {
                if *origin != self.origin {
                    let _ = tx.try_send(());
                }
            }
        }
        Delivery::Sent
    }

    fn listen(&self, topic: &str) -> Option<Listener> {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push((self.origin, tx));
        Some(Listener::new(rx, None))
    }
}

/// Pick the notifier the configuration asks for
pub fn from_config(config: &Config) -> Arc<dyn CrossTabNotifier> {
    if config.cross_tab {
        Arc::new(SignalDir::new(config.signal_dir()))
    } else {
        Arc::new(Disabled)
    }
}
