//! Per-session FIFO write queue
//!
//! Every store write for a session id goes through that id's queue and is
//! applied by a single worker task, one at a time, in submission order. A
//! write does not start until the previous write for the same id has
//! settled. Different ids get different workers and never wait on each
//! other.
//!
//! Callers enqueue full snapshots, so the last settled save always holds
//! the newest state even if an earlier one failed.
//!
//! A worker retires once a delete for its id has gone through and nothing
//! is queued behind it; a later write for the same id starts a new one.

use super::events::OrchestratorEvent;
use crate::session::{Message, SaveReceipt};
use crate::storage::{SessionStore, StoreError, StoreResult};
use crate::telemetry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

type Workers = Arc<Mutex<Option<HashMap<String, mpsc::UnboundedSender<SaveJob>>>>>;

enum SaveJob {
    Save {
        title: String,
        messages: Vec<Message>,
        ack: oneshot::Sender<StoreResult<SaveReceipt>>,
    },
    Delete {
        ack: oneshot::Sender<StoreResult<()>>,
    },
    Barrier {
        ack: oneshot::Sender<()>,
    },
}

/// Settlement of one queued write
///
/// Dropping a ticket does not cancel the write.
#[derive(Debug)]
pub struct Ticket<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Ticket<T> {
    fn closed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(StoreError::io("Save queue is closed")));
        Self { rx }
    }

    /// Wait until the write has been applied or has failed
    pub async fn settled(self) -> StoreResult<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(StoreError::io("Save worker stopped")))
    }
}

/// Write queues for every session id, created on demand
pub struct SaveQueue {
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<OrchestratorEvent>,
    workers: Workers,
}

impl SaveQueue {
    pub fn new(store: Arc<dyn SessionStore>, events: broadcast::Sender<OrchestratorEvent>) -> Self {
        Self {
            store,
            events,
            workers: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    /// Queue a full overwrite of `id`
    pub fn enqueue_save(&self, id: &str, title: String, messages: Vec<Message>) -> Ticket<SaveReceipt> {
        let (ack, rx) = oneshot::channel();
        if self.submit(id, SaveJob::Save { title, messages, ack }) {
            Ticket { rx }
        } else {
            Ticket::closed()
        }
    }

    /// Queue removal of `id`, ordered after every write already queued for it
    pub fn enqueue_delete(&self, id: &str) -> Ticket<()> {
        let (ack, rx) = oneshot::channel();
        if self.submit(id, SaveJob::Delete { ack }) {
            Ticket { rx }
        } else {
            Ticket::closed()
        }
    }

    /// Wait for every write queued so far, on every id, to settle
    pub async fn flush(&self) {
        let mut barriers = Vec::new();
        {
            let workers = self.lock_workers();
            if let Some(workers) = workers.as_ref() {
                for sender in workers.values() {
                    let (ack, rx) = oneshot::channel();
                    if sender.send(SaveJob::Barrier { ack }).is_ok() {
                        barriers.push(rx);
                    }
                }
            }
        }
        for barrier in barriers {
            let _ = barrier.await;
        }
    }

    /// Stop accepting writes; queued writes still drain
    pub fn close(&self) {
        self.lock_workers().take();
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.lock_workers().as_ref().map_or(0, HashMap::len)
    }

    fn lock_workers(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<HashMap<String, mpsc::UnboundedSender<SaveJob>>>> {
        lock_workers(&self.workers)
    }

    fn submit(&self, id: &str, job: SaveJob) -> bool {
        let mut workers = self.lock_workers();
        let Some(workers) = workers.as_mut() else {
            tracing::warn!(session_id = %id, "Dropping write submitted after close");
            return false;
        };

        let sender = workers.entry(id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                id.to_string(),
                Arc::clone(&self.store),
                self.events.clone(),
                Arc::clone(&self.workers),
                rx,
            ));
            tx
        });

        sender.send(job).is_ok()
    }
}

fn lock_workers(
    workers: &Workers,
) -> std::sync::MutexGuard<'_, Option<HashMap<String, mpsc::UnboundedSender<SaveJob>>>> {
    workers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop `id`'s worker entry if its queue is empty
///
/// Returns the next job instead when one is already queued. Runs under the
/// workers lock, which `submit` also holds while sending.
fn retire(
    id: &str,
    workers: &Workers,
    jobs: &mut mpsc::UnboundedReceiver<SaveJob>,
) -> Option<SaveJob> {
    let mut workers = lock_workers(workers);
    match jobs.try_recv() {
        Ok(job) => Some(job),
        Err(TryRecvError::Empty) => {
            if let Some(workers) = workers.as_mut() {
                workers.remove(id);
            }
            None
        }
        Err(TryRecvError::Disconnected) => None,
    }
}

async fn run_worker(
    id: String,
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<OrchestratorEvent>,
    workers: Workers,
    mut jobs: mpsc::UnboundedReceiver<SaveJob>,
) {
    tracing::debug!(session_id = %id, "Save worker started");

    let mut pending = None;
    loop {
        let job = match pending.take() {
            Some(job) => job,
            None => match jobs.recv().await {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            SaveJob::Save {
                title,
                messages,
                ack,
            } => {
                let start = Instant::now();
                let result = store.save(&id, &title, &messages).await;
                telemetry::record_store_write("save", result.is_ok(), start.elapsed());
                report(&id, "save", &result, &events);
                let _ = ack.send(result);
            }
            SaveJob::Delete { ack } => {
                let start = Instant::now();
                let result = store.delete(&id).await;
                telemetry::record_store_write("delete", result.is_ok(), start.elapsed());
                // Deleting something already gone is the caller's answer, not a failure
                if !matches!(result, Err(StoreError::NotFound(_))) {
                    report(&id, "delete", &result, &events);
                }

                let gone = matches!(result, Ok(()) | Err(StoreError::NotFound(_)));
                let retired = gone && {
                    pending = retire(&id, &workers, &mut jobs);
                    pending.is_none()
                };
                let _ = ack.send(result);
                if retired {
                    tracing::debug!(session_id = %id, "Save worker retired after delete");
                    return;
                }
            }
            SaveJob::Barrier { ack } => {
                let _ = ack.send(());
            }
        }
    }

    tracing::debug!(session_id = %id, "Save worker stopped");
}

fn report<T>(
    id: &str,
    operation: &str,
    result: &StoreResult<T>,
    events: &broadcast::Sender<OrchestratorEvent>,
) {
    match result {
        Ok(_) => {
            tracing::debug!(session_id = %id, operation, "Store write applied");
            let _ = events.send(OrchestratorEvent::SessionsChanged);
        }
        Err(e) => {
            tracing::warn!(session_id = %id, operation, error = %e, "Store write failed");
            let _ = events.send(OrchestratorEvent::SaveFailed {
                session_id: id.to_string(),
                reason: e.to_string(),
            });
        }
    }
}
