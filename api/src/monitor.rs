use std::time::{Duration, SystemTime};

use common::{fail_dead_lettered, Outcome, StoreError};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub dead_lettered: usize,
    pub failed_tasks: usize,
    pub purged_blobs: usize,
}

/// Loop en segundo plano:
/// - reencola mensajes cuya ventana de visibilidad venció
/// - pasa a ERROR las tareas cuyos mensajes agotaron las entregas
/// - purga blobs vencidos
pub async fn run_monitor(state: AppState, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        match sweep_once(&state, SystemTime::now()).await {
            Ok(report) if report != SweepReport::default() => {
                info!(
                    dead_lettered = report.dead_lettered,
                    failed_tasks = report.failed_tasks,
                    purged_blobs = report.purged_blobs,
                    "pasada del monitor"
                );
            }
            Ok(_) => {}
            Err(e) => warn!("error en la pasada del monitor: {:?}", e),
        }
    }
}

pub async fn sweep_once(state: &AppState, now: SystemTime) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();

    report.dead_lettered = state.queue.requeue_expired(now)?.len();

    for notice in state.queue.drain_dead_letters()? {
        match fail_dead_lettered(state.tasks.as_ref(), &notice).await {
            Ok(Outcome::Failed(_)) => report.failed_tasks += 1,
            Ok(_) => {}
            Err(e) => {
                // vuelve a dead letters para reintentar en la próxima pasada
                warn!(
                    task_id = %notice.task_id,
                    error = %e,
                    "no se pudo marcar la tarea como ERROR"
                );
                state.queue.restore_dead_letter(notice)?;
            }
        }
    }

    if let Some(blobs) = &state.expiring_blobs {
        report.purged_blobs = blobs.purge_expired(now)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use common::{
        memory::{InMemoryBlobStore, InMemoryQueue, InMemoryTaskStore},
        TaskRecord, TaskStatus, TaskStore, TaskUpdate, UpdateOutcome, WorkQueue,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Store de tareas que falla el primer `update` y después se recupera.
    struct FlakyTasks {
        inner: InMemoryTaskStore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl TaskStore for FlakyTasks {
        async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
            self.inner.put(record).await
        }

        async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
            self.inner.get(task_id).await
        }

        async fn update(
            &self,
            task_id: &str,
            update: &TaskUpdate,
        ) -> Result<UpdateOutcome, StoreError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("store caído".into()));
            }
            self.inner.update(task_id, update).await
        }
    }

    #[tokio::test]
    async fn mensaje_sin_ack_se_reentrega_y_despues_marca_error() {
        let config = Config::default();
        let timeout = config.visibility_timeout;
        let state = AppState::in_memory(&config);

        let record = state.submission.submit(b"x".to_vec()).await.unwrap();

        // primera entrega, el worker "se cae" y nunca confirma
        let first = state.queue.receive().await.unwrap().unwrap();
        let t1 = SystemTime::now() + timeout + Duration::from_secs(1);
        let report = sweep_once(&state, t1).await.unwrap();
        assert_eq!(report.dead_lettered, 0);

        let second = state.queue.receive().await.unwrap().unwrap();
        assert_eq!(second.notice, first.notice);
        assert_eq!(second.receive_count, 2);

        let t2 = SystemTime::now() + timeout * 2 + Duration::from_secs(1);
        let report = sweep_once(&state, t2).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.failed_tasks, 1);

        let stored = state.status.get(&record.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
        assert_eq!(stored.message.as_deref(), Some("failed to process task"));
    }

    #[tokio::test]
    async fn monitor_purga_blobs_vencidos() {
        let config = Config::default();
        let state = AppState::in_memory(&config);
        state.submission.submit(b"x".to_vec()).await.unwrap();

        let later = SystemTime::now() + config.blob_retention + Duration::from_secs(1);
        let report = sweep_once(&state, later).await.unwrap();
        assert_eq!(report.purged_blobs, 1);
    }

    #[tokio::test]
    async fn dead_letter_se_conserva_si_falla_el_marcado() {
        let timeout = Duration::from_secs(30);
        let blobs = Arc::new(InMemoryBlobStore::new("images"));
        let state = AppState::new(
            Arc::new(FlakyTasks {
                inner: InMemoryTaskStore::new(),
                fail_next: AtomicBool::new(true),
            }),
            blobs.clone(),
            Arc::new(InMemoryQueue::new(timeout, 1)),
            Some(blobs),
        );

        let record = state.submission.submit(b"x".to_vec()).await.unwrap();
        state.queue.receive().await.unwrap().unwrap();

        let later = SystemTime::now() + timeout + Duration::from_secs(1);
        let report = sweep_once(&state, later).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.failed_tasks, 0);

        // el store se recuperó: la pasada siguiente termina el trabajo
        let report = sweep_once(&state, later).await.unwrap();
        assert_eq!(report.failed_tasks, 1);

        let stored = state.status.get(&record.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
        assert_eq!(stored.message.as_deref(), Some("failed to process task"));
        assert!(state.queue.drain_dead_letters().unwrap().is_empty());
    }
}
