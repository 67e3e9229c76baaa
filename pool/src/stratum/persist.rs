//! Background persistence of worker rows.
//!
//! The coordinator's registries are the source of truth for the protocol;
//! the store is updated behind them by a single task, in the order the
//! coordinator queued the writes, so a slow store never holds up a response.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::store::PoolStore;
use crate::workers::{Worker, WorkerUpdate};

enum WorkerWrite {
    Upsert(Worker),
    Update(String, WorkerUpdate),
    Remove(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct WorkerWriter {
    tx: mpsc::UnboundedSender<WorkerWrite>,
}

impl WorkerWriter {
    /// Starts the writer task on the current runtime. Without one, writes
    /// are dropped with a warning.
    pub fn spawn(store: Arc<dyn PoolStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run(store, rx));
            }
            Err(_) => tracing::warn!("No Tokio runtime, worker rows will not be persisted"),
        }
        Self { tx }
    }

    pub fn upsert(&self, worker: Worker) {
        self.send(WorkerWrite::Upsert(worker));
    }

    pub fn update(&self, id: &str, update: WorkerUpdate) {
        self.send(WorkerWrite::Update(id.to_string(), update));
    }

    pub fn remove(&self, id: &str) {
        self.send(WorkerWrite::Remove(id.to_string()));
    }

    /// Resolves once every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(WorkerWrite::Flush(done));
        let _ = wait.await;
    }

    fn send(&self, write: WorkerWrite) {
        if self.tx.send(write).is_err() {
            tracing::warn!("Worker writer stopped, dropping store write");
        }
    }
}

async fn run(store: Arc<dyn PoolStore>, mut rx: mpsc::UnboundedReceiver<WorkerWrite>) {
    while let Some(write) = rx.recv().await {
        let res = match write {
            WorkerWrite::Upsert(worker) => store
                .upsert_worker(&worker)
                .await
                .map_err(|e| (worker.id, e)),
            WorkerWrite::Update(id, update) => store.update_worker(&id, &update).await.map_err(|e| (id, e)),
            WorkerWrite::Remove(id) => store.remove_worker(&id).await.map_err(|e| (id, e)),
            WorkerWrite::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err((id, e)) = res {
            tracing::warn!("Failed to persist worker {}: {}", id, e);
        }
    }
}
