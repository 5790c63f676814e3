//! Debounced persistence of a live session into the version log.
//!
//! ```text
//! DocumentSession ── on_change ──► signal channel ──► worker task
//!                                                        │ (re)arm deadline
//!                                   flush / shutdown ──► │
//!                                                        ▼
//!                                  encode_snapshot ─► VersionStore::append
//! ```
//!
//! Every change signal pushes the deadline `debounce` into the future, so a
//! burst of edits ends in a single append. Hydration does not signal, so
//! loading a snapshot never creates a version.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use folio_core::session::{DocumentSession, ListenerId, SessionError};

use crate::storage::{AppendOutcome, StoreError, VersionStore};

/// Persister configuration.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Quiet period after the last change before appending (default: 1s)
    pub debounce: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
        }
    }
}

impl PersistConfig {
    /// Short debounce for tests.
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(50),
        }
    }
}

/// Persister statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Append attempts (debounced or forced)
    pub flushes: u64,
    pub versions_created: u64,
    /// Appends that matched the head snapshot
    pub duplicates_skipped: u64,
    pub failures: u64,
}

#[derive(Default)]
struct AtomicPersistStats {
    flushes: AtomicU64,
    versions_created: AtomicU64,
    duplicates_skipped: AtomicU64,
    failures: AtomicU64,
}

impl AtomicPersistStats {
    fn snapshot(&self) -> PersistStats {
        PersistStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            versions_created: self.versions_created.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("persister task has stopped")]
    Closed,
}

type FlushResult = Result<Option<AppendOutcome>, PersistError>;

enum Command {
    Flush(oneshot::Sender<FlushResult>),
    Shutdown(oneshot::Sender<FlushResult>),
}

/// Handle to a running persister task.
///
/// Dropping the handle detaches the listener; the task then persists any
/// pending change and exits on its own. Use [`Persister::shutdown`] to wait
/// for that final append and see its result.
pub struct Persister {
    session: Arc<DocumentSession>,
    listener: ListenerId,
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<AtomicPersistStats>,
    task: Option<JoinHandle<()>>,
}

impl Persister {
    /// Attach a persister to `session`. Must be called inside a tokio runtime.
    pub fn spawn(
        session: Arc<DocumentSession>,
        store: Arc<VersionStore>,
        author_id: Uuid,
        config: PersistConfig,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let listener = session.on_change(move |_| {
            // receiver gone means the worker already stopped
            let _ = signal_tx.send(());
        });

        let stats = Arc::new(AtomicPersistStats::default());
        let worker = Worker {
            session: Arc::clone(&session),
            store,
            author_id,
            config,
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(worker.run(signal_rx, command_rx));

        log::debug!("Persister attached to article {}", session.article_id());

        Self {
            session,
            listener,
            commands: command_tx,
            stats,
            task: Some(task),
        }
    }

    /// Append pending changes now. `Ok(None)` when nothing was pending.
    /// Changes whose earlier append failed are still pending.
    pub async fn flush(&self) -> FlushResult {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(ack_tx))
            .map_err(|_| PersistError::Closed)?;
        ack_rx.await.map_err(|_| PersistError::Closed)?
    }

    /// Flush pending changes, detach from the session and stop the task.
    pub async fn shutdown(mut self) -> FlushResult {
        // signals queued before this point are drained by the worker
        self.session.remove_listener(self.listener);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(ack_tx))
            .map_err(|_| PersistError::Closed)?;
        let result = ack_rx.await.map_err(|_| PersistError::Closed)?;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Persister task ended abnormally: {e}");
            }
        }
        result
    }

    pub fn stats(&self) -> PersistStats {
        self.stats.snapshot()
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.session.remove_listener(self.listener);
    }
}

struct Worker {
    session: Arc<DocumentSession>,
    store: Arc<VersionStore>,
    author_id: Uuid,
    config: PersistConfig,
    stats: Arc<AtomicPersistStats>,
}

impl Worker {
    async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<()>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut deadline: Option<Instant> = None;
        // set by every signal, cleared only by a successful append
        let mut dirty = false;
        // the listener owns the only sender; once it is removed only commands matter
        let mut signals_open = true;

        loop {
            tokio::select! {
                signal = signals.recv(), if signals_open => match signal {
                    Some(()) => {
                        dirty = true;
                        deadline = Some(Instant::now() + self.config.debounce);
                    }
                    None => signals_open = false,
                },

                command = commands.recv() => {
                    deadline = None;
                    dirty |= Self::drain(&mut signals);
                    match command {
                        Some(Command::Flush(ack)) => {
                            let _ = ack.send(self.persist_if(&mut dirty));
                        }
                        Some(Command::Shutdown(ack)) => {
                            let _ = ack.send(self.persist_if(&mut dirty));
                            break;
                        }
                        // handle dropped without shutdown
                        None => {
                            let _ = self.persist_if(&mut dirty);
                            break;
                        }
                    }
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let _ = self.persist_if(&mut dirty);
                }
            }
        }

        log::debug!("Persister for article {} stopped", self.session.article_id());
    }

    /// Consume queued signals; true if there were any.
    fn drain(signals: &mut mpsc::UnboundedReceiver<()>) -> bool {
        let mut any = false;
        while signals.try_recv().is_ok() {
            any = true;
        }
        any
    }

    fn persist_if(&self, dirty: &mut bool) -> FlushResult {
        if !*dirty {
            return Ok(None);
        }
        let outcome = self.persist()?;
        *dirty = false;
        Ok(Some(outcome))
    }

    fn persist(&self) -> Result<AppendOutcome, PersistError> {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        let article_id = self.session.article_id();

        let result = self
            .session
            .encode_snapshot()
            .map_err(PersistError::from)
            .and_then(|snapshot| {
                self.store
                    .append(article_id, &snapshot, self.session.session_id(), self.author_id)
                    .map_err(PersistError::from)
            });

        match &result {
            Ok(outcome) if outcome.created => {
                self.stats.versions_created.fetch_add(1, Ordering::Relaxed);
            }
            Ok(outcome) => {
                self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Article {article_id} unchanged since v{}", outcome.version);
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to persist article {article_id}: {e}");
            }
        }
        result
    }
}
