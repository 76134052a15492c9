//! Implementaciones en memoria de los stores y de la cola.
//!
//! La api las usa como backend por defecto y los tests las usan como fakes.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::notice::{blob_uri, Delivery, DispatchNotice, ReceiptHandle};
use crate::store::{BlobStore, StoreError, TaskStore, WorkQueue};
use crate::task::{TaskRecord, TaskUpdate, UpdateOutcome};

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Unavailable(format!("lock envenenado: {}", what)))
}

/* ---------------- tareas ---------------- */

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut records = lock(&self.records, "tasks")?;
        records.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let records = lock(&self.records, "tasks")?;
        Ok(records.get(task_id).cloned())
    }

    async fn update(
        &self,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        // lectura y escritura bajo el mismo lock: atomicidad por clave
        let mut records = lock(&self.records, "tasks")?;
        let Some(record) = records.get_mut(task_id) else {
            return Ok(UpdateOutcome::Missing);
        };

        match record.apply(update) {
            Ok(()) => Ok(UpdateOutcome::Applied(record.clone())),
            Err(e) => {
                debug!(task_id, error = %e, "update rechazado");
                Ok(UpdateOutcome::Rejected(record.clone()))
            }
        }
    }
}

/* ---------------- blobs ---------------- */

struct StoredBlob {
    bytes: Vec<u8>,
    stored_at: SystemTime,
}

pub struct InMemoryBlobStore {
    bucket: String,
    blobs: Mutex<HashMap<String, StoredBlob>>,
    // None = los blobs no expiran
    retention: Option<Duration>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blobs: Mutex::new(HashMap::new()),
            retention: None,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Borra los blobs más viejos que la retención configurada.
    /// Devuelve cuántos se borraron.
    pub fn purge_expired(&self, now: SystemTime) -> Result<usize, StoreError> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };

        let mut blobs = lock(&self.blobs, "blobs")?;
        let before = blobs.len();
        blobs.retain(|_, blob| {
            now.duration_since(blob.stored_at)
                .map(|age| age < retention)
                .unwrap_or(true)
        });
        Ok(before - blobs.len())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        let mut blobs = lock(&self.blobs, "blobs")?;
        blobs.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                stored_at: SystemTime::now(),
            },
        );
        Ok(self.location(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = lock(&self.blobs, "blobs")?;
        blobs
            .get(key)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", key)))
    }

    fn location(&self, key: &str) -> String {
        blob_uri(&self.bucket, key)
    }
}

/* ---------------- cola ---------------- */

#[derive(Debug, Clone)]
struct Queued {
    notice: DispatchNotice,
    receive_count: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    queued: Queued,
    received_at: SystemTime,
}

#[derive(Default)]
struct QueueInner {
    // mensajes visibles, listos para entregar
    visible: VecDeque<Queued>,
    // entregados pero todavía sin ack
    in_flight: HashMap<ReceiptHandle, InFlight>,
    dead_letters: Vec<DispatchNotice>,
}

/// Cola con semántica at-least-once: un mensaje entregado y no confirmado
/// dentro de `visibility_timeout` vuelve a la cola. Tras `max_receive_count`
/// entregas sin ack pasa a la lista de dead letters.
pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    visibility_timeout: Duration,
    max_receive_count: u32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            visibility_timeout,
            max_receive_count: max_receive_count.max(1),
        }
    }

    /// Revisa los mensajes en vuelo cuya ventana de visibilidad ya venció:
    /// los reencola, o los manda a dead letters si agotaron las entregas.
    /// Devuelve los notices que pasaron a dead letters en esta pasada.
    pub fn requeue_expired(&self, now: SystemTime) -> Result<Vec<DispatchNotice>, StoreError> {
        let mut inner = lock(&self.inner, "queue")?;

        let expired: Vec<ReceiptHandle> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| {
                now.duration_since(f.received_at)
                    .map(|elapsed| elapsed >= self.visibility_timeout)
                    .unwrap_or(false)
            })
            .map(|(receipt, _)| receipt.clone())
            .collect();

        let mut dead = Vec::new();
        for receipt in expired {
            let Some(f) = inner.in_flight.remove(&receipt) else {
                continue;
            };

            if f.queued.receive_count >= self.max_receive_count {
                warn!(
                    task_id = %f.queued.notice.task_id,
                    receive_count = f.queued.receive_count,
                    "mensaje agotó sus entregas, pasa a dead letters"
                );
                inner.dead_letters.push(f.queued.notice.clone());
                dead.push(f.queued.notice);
            } else {
                debug!(
                    task_id = %f.queued.notice.task_id,
                    receive_count = f.queued.receive_count,
                    "visibilidad vencida, reencolando"
                );
                inner.visible.push_back(f.queued);
            }
        }

        Ok(dead)
    }

    /// Saca todos los dead letters acumulados.
    pub fn drain_dead_letters(&self) -> Result<Vec<DispatchNotice>, StoreError> {
        let mut inner = lock(&self.inner, "queue")?;
        Ok(std::mem::take(&mut inner.dead_letters))
    }

    /// Devuelve un notice a dead letters, por ejemplo si no se pudo marcar su tarea.
    pub fn restore_dead_letter(&self, notice: DispatchNotice) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner, "queue")?;
        inner.dead_letters.push(notice);
        Ok(())
    }

    pub fn visible_len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.inner, "queue")?.visible.len())
    }

    pub fn in_flight_len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.inner, "queue")?.in_flight.len())
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn publish(&self, notice: &DispatchNotice) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner, "queue")?;
        inner.visible.push_back(Queued {
            notice: notice.clone(),
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, StoreError> {
        let mut inner = lock(&self.inner, "queue")?;
        let Some(mut queued) = inner.visible.pop_front() else {
            return Ok(None);
        };

        queued.receive_count += 1;
        let receipt = uuid::Uuid::new_v4().to_string();
        let delivery = Delivery {
            receipt: receipt.clone(),
            notice: queued.notice.clone(),
            receive_count: queued.receive_count,
        };
        inner.in_flight.insert(
            receipt,
            InFlight {
                queued,
                received_at: SystemTime::now(),
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&self, receipt: &str) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner, "queue")?;
        match inner.in_flight.remove(receipt) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("receipt {}", receipt))),
        }
    }
}
