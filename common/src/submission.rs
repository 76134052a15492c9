use std::sync::Arc;

use tracing::{info, warn};

use crate::notice::DispatchNotice;
use crate::store::{BlobStore, StoreError, TaskStore, WorkQueue};
use crate::task::TaskRecord;

/// Cada paso del alta falla con su propia variante. No hay rollback: si falla
/// algo después de escribir el registro, la tarea queda PENDING para siempre.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("no se pudo escribir el registro de la tarea {task_id}: {source}")]
    RecordWrite {
        task_id: String,
        #[source]
        source: StoreError,
    },

    #[error("no se pudo subir el blob de la tarea {task_id}: {source}")]
    BlobUpload {
        task_id: String,
        #[source]
        source: StoreError,
    },

    #[error("no se pudo publicar el notice de la tarea {task_id}: {source}")]
    Publish {
        task_id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Clone)]
pub struct SubmissionService {
    tasks: Arc<dyn TaskStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn WorkQueue>,
}

impl SubmissionService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            tasks,
            blobs,
            queue,
        }
    }

    /// Da de alta una tarea: registro PENDING, blob y notice, en ese orden.
    /// El formato del payload no se valida acá, lo hace el worker.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<TaskRecord, SubmitError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let record = TaskRecord::pending(task_id.clone());
        let size = payload.len();

        // 1) registro: tiene que existir antes de que salga el notice
        self.tasks
            .put(&record)
            .await
            .map_err(|source| SubmitError::RecordWrite {
                task_id: task_id.clone(),
                source,
            })?;

        // 2) blob
        let s3_uri = match self.blobs.put(&task_id, payload).await {
            Ok(uri) => uri,
            Err(source) => {
                warn!(
                    %task_id,
                    error = %source,
                    "falló la subida del blob, la tarea queda huérfana en PENDING"
                );
                return Err(SubmitError::BlobUpload { task_id, source });
            }
        };

        // 3) notice
        let notice = DispatchNotice {
            task_id: task_id.clone(),
            s3_uri,
        };
        if let Err(source) = self.queue.publish(&notice).await {
            warn!(
                %task_id,
                error = %source,
                "falló la publicación, la tarea queda huérfana en PENDING"
            );
            return Err(SubmitError::Publish { task_id, source });
        }

        info!(%task_id, bytes = size, s3_uri = %notice.s3_uri, "tarea creada");
        Ok(record)
    }
}
