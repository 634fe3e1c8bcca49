mod mutations;
mod queries;
#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::config::SchedulingPolicy;
use crate::journal::Journal;
use crate::model::*;
use crate::notify::{collection_of, NotifyHub};
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::store::InMemoryStore;
use crate::validator::EngineError;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while one flush is running are
/// written together and share a single fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut journal, other);
                continue;
            }
        };
        let mut batch: Vec<Pending> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut journal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<Pending>) {
    metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| journal.append_buffered(event));
    // Flush even after a failed append so stale bytes never reach the next batch.
    let flushed = journal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            commit_batch(journal, vec![(event, response)])
        }
    }
}

// ── Locking ──────────────────────────────────────────────

/// Serialization domains for the write path. Anything a rule reads is
/// keyed by the collection or the client it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum LockKey {
    Collection(Ulid),
    Client(Ulid),
}

impl LockKey {
    fn for_proposal(proposal: &ProposedAppointment) -> [LockKey; 2] {
        [
            LockKey::Collection(proposal.collection_id),
            LockKey::Client(proposal.client_id),
        ]
    }
}

/// One held key. Releasing the last holder of a key drops its table entry,
/// so the table only ever contains keys that are locked or awaited.
pub(crate) struct KeyGuard<'a> {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<LockKey, Arc<Mutex<()>>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc; the table's own copy is the last one.
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Validate-then-commit front end over the in-memory store and the journal.
pub struct Scheduler {
    pub(super) store: InMemoryStore,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: SchedulingPolicy,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    /// Writers hold it shared between journaling and applying; compaction
    /// holds it exclusively so its snapshot matches the journal.
    pub(super) compaction: RwLock<()>,
}

impl Scheduler {
    /// Replay the journal at `path` and start the writer task. Needs a
    /// running tokio runtime.
    pub fn open(
        path: &Path,
        policy: SchedulingPolicy,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (journal, events) = Journal::open(path)?;
        let store = InMemoryStore::from_events(&events);
        tracing::info!(
            path = %path.display(),
            records = events.len(),
            appointments = store.appointment_count(),
            "journal replayed"
        );
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        Ok(Self {
            store,
            journal_tx,
            notify,
            policy,
            locks: DashMap::new(),
            compaction: RwLock::new(()),
        })
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Acquire every key once, in sorted order, so two writers can never
    /// wait on each other.
    pub(super) async fn lock_all(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
    ) -> Vec<KeyGuard<'_>> {
        let keys: BTreeSet<LockKey> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self
                .locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(KeyGuard {
                key,
                guard: Some(mutex.lock_owned().await),
                locks: &self.locks,
            });
        }
        guards
    }

    pub(super) async fn lock_proposal(&self, proposal: &ProposedAppointment) -> Vec<KeyGuard<'_>> {
        self.lock_all(LockKey::for_proposal(proposal)).await
    }

    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Journal, apply, notify. The event is applied only once it is durable.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        {
            let _shared = self.compaction.read().await;
            self.journal_append(&event).await?;
            self.store.apply_event(&event);
        }
        if let Some(collection_id) = collection_of(&event) {
            self.notify.send(collection_id, &event);
        }
        Ok(())
    }
}
