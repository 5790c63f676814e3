//! In-process replication of session updates between replicas.
//!
//! ```text
//!  session A ── on_change ─┐                      ┌─► replica B task ─► apply_remote_update
//!                          ├─► ArticleChannel ────┤
//!  session B ── on_change ─┘   (tokio broadcast)  └─► replica A task ─► (own origin, skipped)
//! ```
//!
//! Each article gets its own channel. Every replica publishes the yrs update
//! of each local mutation and applies everyone else's. Replicas that fall more
//! than `capacity` updates behind lose the overflow and log a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use folio_core::session::{DocumentSession, ListenerId};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Updates buffered per replica before it starts lagging (default: 256)
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// A yrs update tagged with the replica that produced it.
#[derive(Debug, Clone)]
pub struct RemoteUpdate {
    pub origin: Uuid,
    pub payload: Arc<Vec<u8>>,
}

/// Statistics for monitoring replication health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub updates_published: u64,
    pub updates_applied: u64,
    pub updates_lagged: u64,
    pub apply_failures: u64,
    pub active_replicas: usize,
}

#[derive(Default)]
struct AtomicChannelStats {
    updates_published: AtomicU64,
    updates_applied: AtomicU64,
    updates_lagged: AtomicU64,
    apply_failures: AtomicU64,
}

/// Fan-out channel for a single article.
pub struct ArticleChannel {
    article_id: Uuid,
    sender: broadcast::Sender<RemoteUpdate>,
    /// Joined replicas: origin → session id. Never held across an await.
    replicas: Mutex<HashMap<Uuid, String>>,
    capacity: usize,
    stats: Arc<AtomicChannelStats>,
}

impl ArticleChannel {
    pub fn new(article_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            article_id,
            sender,
            replicas: Mutex::new(HashMap::new()),
            capacity,
            stats: Arc::new(AtomicChannelStats::default()),
        }
    }

    /// Publish an update. Returns the number of receivers it reached.
    pub fn publish(&self, update: RemoteUpdate) -> usize {
        publish(&self.sender, &self.stats, update)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RemoteUpdate> {
        self.sender.subscribe()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas().len()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            updates_published: self.stats.updates_published.load(Ordering::Relaxed),
            updates_applied: self.stats.updates_applied.load(Ordering::Relaxed),
            updates_lagged: self.stats.updates_lagged.load(Ordering::Relaxed),
            apply_failures: self.stats.apply_failures.load(Ordering::Relaxed),
            active_replicas: self.replica_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn replicas(&self) -> MutexGuard<'_, HashMap<Uuid, String>> {
        self.replicas.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn publish(
    sender: &broadcast::Sender<RemoteUpdate>,
    stats: &AtomicChannelStats,
    update: RemoteUpdate,
) -> usize {
    // no receivers is not an error here
    let count = sender.send(update).unwrap_or(0);
    stats.updates_published.fetch_add(1, Ordering::Relaxed);
    count
}

/// Maps article ids to channels and wires sessions into them.
pub struct ReplicationHub {
    channels: RwLock<HashMap<Uuid, Arc<ArticleChannel>>>,
    config: HubConfig,
}

impl ReplicationHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the channel for an article.
    pub async fn channel(&self, article_id: Uuid) -> Arc<ArticleChannel> {
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(&article_id) {
                return channel.clone();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(article_id)
            .or_insert_with(|| Arc::new(ArticleChannel::new(article_id, self.config.capacity)))
            .clone()
    }

    /// Connect a session: publish its local updates, apply everyone else's.
    ///
    /// The session should already hold the shared state (hydrated from the
    /// latest snapshot or synced from a peer) before joining.
    pub async fn join(&self, session: Arc<DocumentSession>) -> Replica {
        let origin = Uuid::new_v4();
        let channel = self.channel(session.article_id()).await;
        channel
            .replicas()
            .insert(origin, session.session_id().to_string());

        let mut receiver = channel.subscribe();
        let sender = channel.sender.clone();
        let stats = Arc::clone(&channel.stats);
        let listener = session.on_change(move |change| {
            publish(
                &sender,
                &stats,
                RemoteUpdate {
                    origin,
                    payload: Arc::clone(&change.update),
                },
            );
        });

        let task_session = Arc::clone(&session);
        let task_stats = Arc::clone(&channel.stats);
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(update) if update.origin == origin => {}
                    Ok(update) => match task_session.apply_remote_update(&update.payload) {
                        Ok(()) => {
                            task_stats.updates_applied.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            task_stats.apply_failures.fetch_add(1, Ordering::Relaxed);
                            log::warn!("Replica {origin} failed to apply update: {e}");
                        }
                    },
                    Err(RecvError::Lagged(missed)) => {
                        task_stats.updates_lagged.fetch_add(missed, Ordering::Relaxed);
                        log::warn!("Replica {origin} lagged behind by {missed} updates");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        log::info!(
            "Session {} joined article {} as replica {origin}",
            session.session_id(),
            session.article_id()
        );

        Replica {
            origin,
            session,
            channel,
            listener,
            task,
        }
    }

    /// Drop the channel of an article nobody is replicating anymore.
    pub async fn remove_if_empty(&self, article_id: &Uuid) -> bool {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(article_id) {
            if channel.replica_count() == 0 {
                channels.remove(article_id);
                return true;
            }
        }
        false
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for ReplicationHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// A session's membership in an article channel. Dropping it disconnects:
/// the listener is removed, the apply task aborted and the replica
/// unregistered before `drop` returns.
pub struct Replica {
    origin: Uuid,
    session: Arc<DocumentSession>,
    channel: Arc<ArticleChannel>,
    listener: ListenerId,
    task: JoinHandle<()>,
}

impl Replica {
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn session(&self) -> &Arc<DocumentSession> {
        &self.session
    }

    pub fn channel(&self) -> &Arc<ArticleChannel> {
        &self.channel
    }

    /// Disconnect from the channel.
    pub fn leave(self) {
        log::info!(
            "Replica {} left article {}",
            self.origin,
            self.channel.article_id
        );
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        self.session.remove_listener(self.listener);
        self.task.abort();
        self.channel.replicas().remove(&self.origin);
    }
}
