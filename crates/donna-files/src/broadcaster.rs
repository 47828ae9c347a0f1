//! Reference-counted file watcher with async fan-out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use donna_protocol::{FileChangeEvent, FileWatchMessage};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::filter::{PathFilter, translate_event};

pub type SubscriberId = u64;

/// A live subscription. Call [`FileWatchBroadcaster::unsubscribe`] when done.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<FileWatchMessage>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message for this subscriber. `None` once the subscriber was pruned.
    pub async fn recv(&mut self) -> Option<FileWatchMessage> {
        self.receiver.recv().await
    }
}

/// Subscriber senders, shared with the fan-out task.
#[derive(Debug, Default)]
struct Subscribers {
    senders: Mutex<HashMap<SubscriberId, mpsc::Sender<FileWatchMessage>>>,
}

impl Subscribers {
    fn insert(&self, id: SubscriberId, sender: mpsc::Sender<FileWatchMessage>) {
        self.lock().insert(id, sender);
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Offer a message to every subscriber without waiting on any of them.
    ///
    /// A full queue drops the message for that subscriber only; a closed queue
    /// prunes the subscriber. Returns how many subscribers accepted it.
    fn broadcast(&self, message: &FileWatchMessage) -> usize {
        let mut delivered = 0;
        self.lock()
            .retain(|id, sender| match sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "File watch subscriber is lagging, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "Pruning disconnected file watch subscriber");
                    false
                }
            });
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<FileWatchMessage>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The notify watcher and the task draining its queue.
struct RunningWatcher {
    _watcher: RecommendedWatcher,
    fanout: JoinHandle<()>,
}

impl Drop for RunningWatcher {
    fn drop(&mut self) {
        self.fanout.abort();
    }
}

/// The running watcher, if any. Its lock serializes subscribe/unsubscribe
/// together with start/stop.
type WatcherSlot = tokio::sync::Mutex<Option<RunningWatcher>>;

/// One shared watch over a directory tree, started by the first subscriber and
/// stopped by the last.
pub struct FileWatchBroadcaster {
    root: PathBuf,
    filter: PathFilter,
    buffer: usize,
    next_id: AtomicU64,
    subscribers: Arc<Subscribers>,
    running: Arc<WatcherSlot>,
}

impl FileWatchBroadcaster {
    pub fn new(root: impl Into<PathBuf>, config: &WatchConfig) -> Self {
        let root = root.into();
        // notify reports paths under the canonical root
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        let filter = PathFilter::new(root.clone(), &config.extensions);

        Self {
            root,
            filter,
            buffer: config.subscriber_buffer.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Arc::new(Subscribers::default()),
            running: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a subscriber, starting the watcher if it is the first one.
    ///
    /// The new subscriber's queue starts with a `connected` acknowledgement.
    pub async fn subscribe(&self) -> Result<Subscription, WatchError> {
        let mut running = self.running.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        let ack = FileWatchMessage::Connected {
            watching: self.root.display().to_string(),
        };
        if sender.try_send(ack).is_err() {
            debug!(subscriber = id, "Could not queue connected acknowledgement");
        }
        self.subscribers.insert(id, sender);

        if running.is_none() {
            match self.start() {
                Ok(watcher) => {
                    info!("Started file watcher on {}", self.root.display());
                    *running = Some(watcher);
                }
                Err(err) => {
                    self.subscribers.remove(id);
                    return Err(err);
                }
            }
        }

        debug!(
            subscriber = id,
            subscribers = self.subscribers.len(),
            "File watch subscriber added"
        );
        Ok(Subscription { id, receiver })
    }

    /// Remove a subscriber, stopping the watcher once nobody is left. Idempotent.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut running = self.running.lock().await;

        if self.subscribers.remove(id) {
            debug!(subscriber = id, "File watch subscriber removed");
        }

        if self.subscribers.is_empty() && running.take().is_some() {
            info!("Stopped file watcher on {}", self.root.display());
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn start(&self) -> Result<RunningWatcher, WatchError> {
        if !self.root.is_dir() {
            return Err(WatchError::RootMissing(self.root.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel::<FileChangeEvent>();
        let filter = self.filter.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for change in translate_event(&filter, &event) {
                        if tx.send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => warn!("File watcher error: {err}"),
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let fanout = tokio::spawn(fan_out(
            rx,
            Arc::clone(&self.subscribers),
            Arc::downgrade(&self.running),
        ));

        Ok(RunningWatcher {
            _watcher: watcher,
            fanout,
        })
    }
}

async fn fan_out(
    mut rx: mpsc::UnboundedReceiver<FileChangeEvent>,
    subscribers: Arc<Subscribers>,
    slot: Weak<WatcherSlot>,
) {
    while let Some(change) = rx.recv().await {
        debug!(kind = ?change.kind, path = %change.path, "Broadcasting file change");
        let before = subscribers.len();
        subscribers.broadcast(&FileWatchMessage::from(change));

        // Pruning removed the last subscriber; nobody is left to unsubscribe.
        if before > 0 && subscribers.is_empty() {
            if let Some(slot) = slot.upgrade() {
                tokio::spawn(stop_if_idle(slot, Arc::clone(&subscribers)));
            }
        }
    }
}

/// Stop the watcher unless a subscriber arrived in the meantime.
///
/// Runs outside the fan-out task, which is aborted when the watcher drops.
async fn stop_if_idle(slot: Arc<WatcherSlot>, subscribers: Arc<Subscribers>) {
    let mut running = slot.lock().await;
    if subscribers.is_empty() && running.take().is_some() {
        info!("Stopped file watcher after its last subscriber went away");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(path: &str) -> FileWatchMessage {
        FileWatchMessage::FileChanged {
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_subscribers() {
        let subscribers = Subscribers::default();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        subscribers.insert(1, tx_a);
        subscribers.insert(2, tx_b);
        drop(rx_b);

        assert_eq!(subscribers.broadcast(&message("a.md")), 1);
        assert_eq!(subscribers.len(), 1);
        assert_eq!(rx_a.recv().await, Some(message("a.md")));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_block_others() {
        let subscribers = Subscribers::default();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        subscribers.insert(1, slow_tx);
        subscribers.insert(2, fast_tx);

        assert_eq!(subscribers.broadcast(&message("one.md")), 2);
        assert_eq!(subscribers.broadcast(&message("two.md")), 1);

        // Lagging subscriber keeps its slot but misses the overflow.
        assert_eq!(subscribers.len(), 2);
        assert_eq!(slow_rx.recv().await, Some(message("one.md")));
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await, Some(message("one.md")));
        assert_eq!(fast_rx.recv().await, Some(message("two.md")));
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_root_fails_cleanly() {
        let broadcaster =
            FileWatchBroadcaster::new("/definitely/not/here/donna", &WatchConfig::default());
        let result = broadcaster.subscribe().await;
        assert!(matches!(result, Err(WatchError::RootMissing(_))));
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(!broadcaster.is_running().await);
    }
}
