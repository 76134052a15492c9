//! Lógica del worker: lleva una tarea desde PENDING hasta DONE o ERROR.
//!
//! La cola entrega at-least-once, así que `process` puede correr varias
//! veces (incluso en paralelo) para el mismo notice. La corrección depende
//! de que `TaskStore::update` nunca pise un estado terminal; además, antes
//! de clasificar se revisa si la tarea ya terminó para no repetir cómputo.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classify::{rank, Classifier, DecodeError, Decoder, TOP_K};
use crate::notice::DispatchNotice;
use crate::store::{BlobStore, StoreError, TaskStore};
use crate::task::{Label, TaskStatus, TaskUpdate, UpdateOutcome};

pub const INVALID_FILE_FORMAT: &str = "invalid file format";
pub const BLOB_NOT_FOUND: &str = "blob not found";
pub const DEAD_LETTER_MESSAGE: &str = "failed to process task";

/// Qué pasó con un notice. Cualquier `Outcome` implica que el mensaje
/// se puede confirmar en la cola.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Se escribió DONE con este ranking
    Completed(Vec<Label>),
    /// Se escribió ERROR con este mensaje
    Failed(String),
    /// La tarea ya estaba (o quedó, por otra entrega) en un estado terminal
    Skipped(TaskStatus),
    /// No hay registro para ese taskId
    Missing,
}

/// Errores de infraestructura: el mensaje no se confirma y la cola lo reentrega.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("la clasificación se abortó: {0}")]
    Aborted(String),
}

pub struct TaskProcessor {
    tasks: Arc<dyn TaskStore>,
    blobs: Arc<dyn BlobStore>,
    decoder: Arc<dyn Decoder>,
    classifier: Arc<dyn Classifier>,
    top_k: usize,
}

impl TaskProcessor {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        decoder: Arc<dyn Decoder>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            tasks,
            blobs,
            decoder,
            classifier,
            top_k: TOP_K,
        }
    }

    pub async fn process(&self, notice: &DispatchNotice) -> Result<Outcome, ProcessError> {
        let task_id = notice.task_id.as_str();

        match self.tasks.get(task_id).await? {
            None => {
                warn!(task_id, "notice para una tarea que no existe");
                return Ok(Outcome::Missing);
            }
            Some(record) if record.status.is_terminal() => {
                info!(
                    task_id,
                    status = %record.status,
                    "tarea ya terminada, se ignora la reentrega"
                );
                return Ok(Outcome::Skipped(record.status));
            }
            Some(_) => {}
        }

        // PENDING -> DOING
        match self.tasks.update(task_id, &TaskUpdate::doing()).await? {
            UpdateOutcome::Applied(_) => {}
            UpdateOutcome::Rejected(current) => return Ok(Outcome::Skipped(current.status)),
            UpdateOutcome::Missing => return Ok(Outcome::Missing),
        }

        let key = match notice.blob_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(task_id, error = %e, "notice con ubicación de blob inválida");
                return Ok(write_error(self.tasks.as_ref(), task_id, BLOB_NOT_FOUND).await?);
            }
        };

        let bytes = match self.blobs.get(&key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                warn!(task_id, key = %key, "blob inexistente");
                return Ok(write_error(self.tasks.as_ref(), task_id, BLOB_NOT_FOUND).await?);
            }
            Err(e) => return Err(e.into()),
        };

        // decodificar y clasificar es CPU puro: fuera del runtime async
        let decoder = self.decoder.clone();
        let classifier = self.classifier.clone();
        let top_k = self.top_k;
        let classified = tokio::task::spawn_blocking(move || {
            let image = decoder.decode(&bytes)?;
            Ok::<_, DecodeError>(classifier.classify(&image, top_k))
        })
        .await
        .map_err(|e| ProcessError::Aborted(e.to_string()))?;

        let labels = match classified {
            Ok(labels) => rank(labels, top_k),
            Err(e) => {
                debug!(task_id, error = %e, "payload no decodificable");
                return Ok(write_error(self.tasks.as_ref(), task_id, INVALID_FILE_FORMAT).await?);
            }
        };

        match self
            .tasks
            .update(task_id, &TaskUpdate::done(labels.clone()))
            .await?
        {
            UpdateOutcome::Applied(_) => {
                info!(task_id, top = ?labels.first().map(|l| &l.label), "tarea clasificada");
                Ok(Outcome::Completed(labels))
            }
            UpdateOutcome::Rejected(current) => {
                info!(task_id, status = %current.status, "otra entrega terminó primero");
                Ok(Outcome::Skipped(current.status))
            }
            UpdateOutcome::Missing => Ok(Outcome::Missing),
        }
    }
}

/// Un notice que agotó sus entregas deja la tarea en ERROR, salvo que
/// ya esté terminada.
pub async fn fail_dead_lettered(
    tasks: &dyn TaskStore,
    notice: &DispatchNotice,
) -> Result<Outcome, StoreError> {
    warn!(task_id = %notice.task_id, "procesando dead letter");
    write_error(tasks, &notice.task_id, DEAD_LETTER_MESSAGE).await
}

async fn write_error(
    tasks: &dyn TaskStore,
    task_id: &str,
    message: &str,
) -> Result<Outcome, StoreError> {
    match tasks.update(task_id, &TaskUpdate::error(message)).await? {
        UpdateOutcome::Applied(_) => {
            info!(task_id, message, "tarea marcada como ERROR");
            Ok(Outcome::Failed(message.to_string()))
        }
        UpdateOutcome::Rejected(current) => Ok(Outcome::Skipped(current.status)),
        UpdateOutcome::Missing => Ok(Outcome::Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ImageDecoder, PaletteClassifier};
    use crate::memory::{InMemoryBlobStore, InMemoryQueue, InMemoryTaskStore};
    use crate::notice::blob_uri;
    use crate::store::WorkQueue;
    use crate::submission::SubmissionService;
    use crate::task::TaskRecord;
    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        blobs: Arc<InMemoryBlobStore>,
        queue: Arc<InMemoryQueue>,
        submission: SubmissionService,
        processor: TaskProcessor,
    }

    fn fixture() -> Fixture {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new("images"));
        let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30), 2));
        let submission = SubmissionService::new(tasks.clone(), blobs.clone(), queue.clone());
        let processor = TaskProcessor::new(
            tasks.clone(),
            blobs.clone(),
            Arc::new(ImageDecoder),
            Arc::new(PaletteClassifier::default()),
        );
        Fixture {
            tasks,
            blobs,
            queue,
            submission,
            processor,
        }
    }

    fn jpeg_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb([40, 170, 60]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    async fn submit_and_receive(f: &Fixture, payload: Vec<u8>) -> DispatchNotice {
        let record = f.submission.submit(payload).await.unwrap();
        let delivery = f.queue.receive().await.unwrap().unwrap();
        assert_eq!(delivery.notice.task_id, record.task_id);
        delivery.notice
    }

    #[tokio::test]
    async fn imagen_valida_termina_en_done_con_cinco_etiquetas() {
        let f = fixture();
        let notice = submit_and_receive(&f, jpeg_bytes()).await;

        let outcome = f.processor.process(&notice).await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(ref l) if l.len() == TOP_K));

        let record = f.tasks.get(&notice.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.message, None);

        let result = record.result.unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(result[0].label, "green");
        for pair in result.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(result.iter().all(|l| (0.0..=1.0).contains(&l.confidence)));
    }

    #[tokio::test]
    async fn basura_termina_en_error_invalid_file_format() {
        let f = fixture();
        let notice = submit_and_receive(&f, b"\x00\x01 no soy una imagen".to_vec()).await;

        let outcome = f.processor.process(&notice).await.unwrap();
        assert_eq!(outcome, Outcome::Failed(INVALID_FILE_FORMAT.to_string()));

        let record = f.tasks.get(&notice.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.message.as_deref(), Some("invalid file format"));
        assert_eq!(record.result, None);
    }

    #[tokio::test]
    async fn reentregas_no_cambian_un_registro_terminal() {
        let f = fixture();
        let notice = submit_and_receive(&f, jpeg_bytes()).await;
        f.processor.process(&notice).await.unwrap();
        let before = f.tasks.get(&notice.task_id).await.unwrap().unwrap();

        for _ in 0..3 {
            let outcome = f.processor.process(&notice).await.unwrap();
            assert_eq!(outcome, Outcome::Skipped(TaskStatus::Done));
        }

        let after = f.tasks.get(&notice.task_id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reentrega_de_error_sigue_en_error() {
        let f = fixture();
        let notice = submit_and_receive(&f, b"basura".to_vec()).await;
        f.processor.process(&notice).await.unwrap();

        // aunque ahora el blob fuera válido, el registro terminal no se toca
        f.blobs.put(&notice.task_id, jpeg_bytes()).await.unwrap();
        let outcome = f.processor.process(&notice).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(TaskStatus::Error));

        let record = f.tasks.get(&notice.task_id).await.unwrap().unwrap();
        assert_eq!(record.message.as_deref(), Some(INVALID_FILE_FORMAT));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dos_entregas_concurrentes_dejan_un_solo_resultado() {
        let f = fixture();
        let notice = submit_and_receive(&f, jpeg_bytes()).await;

        let (a, b) = tokio::join!(f.processor.process(&notice), f.processor.process(&notice));
        let outcomes = [a.unwrap(), b.unwrap()];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        assert!(outcomes
            .iter()
            .any(|o| *o == Outcome::Skipped(TaskStatus::Done)));

        let record = f.tasks.get(&notice.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.result.unwrap().len(), TOP_K);
    }

    #[tokio::test]
    async fn tarea_en_doing_por_una_entrega_caida_se_completa() {
        let f = fixture();
        let notice = submit_and_receive(&f, jpeg_bytes()).await;
        f.tasks
            .update(&notice.task_id, &TaskUpdate::doing())
            .await
            .unwrap();

        let outcome = f.processor.process(&notice).await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(_)));
    }

    #[tokio::test]
    async fn notice_de_tarea_inexistente() {
        let f = fixture();
        let notice = DispatchNotice {
            task_id: "fantasma".into(),
            s3_uri: blob_uri("images", "fantasma"),
        };

        assert_eq!(f.processor.process(&notice).await.unwrap(), Outcome::Missing);
        assert!(f.tasks.get("fantasma").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blob_faltante_termina_en_error() {
        let f = fixture();
        f.tasks.put(&TaskRecord::pending("t1".into())).await.unwrap();
        let notice = DispatchNotice {
            task_id: "t1".into(),
            s3_uri: blob_uri("images", "t1"),
        };

        let outcome = f.processor.process(&notice).await.unwrap();
        assert_eq!(outcome, Outcome::Failed(BLOB_NOT_FOUND.to_string()));
    }

    struct UnavailableBlobs;

    #[async_trait]
    impl BlobStore for UnavailableBlobs {
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("s3 caído".into()))
        }

        async fn get(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Unavailable("s3 caído".into()))
        }

        fn location(&self, key: &str) -> String {
            blob_uri("images", key)
        }
    }

    #[tokio::test]
    async fn blob_store_caido_devuelve_error_para_reintentar() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        tasks.put(&TaskRecord::pending("t1".into())).await.unwrap();
        let processor = TaskProcessor::new(
            tasks.clone(),
            Arc::new(UnavailableBlobs),
            Arc::new(ImageDecoder),
            Arc::new(PaletteClassifier::default()),
        );
        let notice = DispatchNotice {
            task_id: "t1".into(),
            s3_uri: blob_uri("images", "t1"),
        };

        let err = processor.process(&notice).await.unwrap_err();
        assert!(matches!(err, ProcessError::Store(StoreError::Unavailable(_))));

        // queda en DOING hasta la reentrega o el dead letter
        let record = tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Doing);
    }

    #[tokio::test]
    async fn dead_letter_marca_error_solo_si_no_es_terminal() {
        let f = fixture();
        let pending = submit_and_receive(&f, jpeg_bytes()).await;

        let outcome = fail_dead_lettered(f.tasks.as_ref(), &pending).await.unwrap();
        assert_eq!(outcome, Outcome::Failed(DEAD_LETTER_MESSAGE.to_string()));
        let record = f.tasks.get(&pending.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Error);

        let done = submit_and_receive(&f, jpeg_bytes()).await;
        f.processor.process(&done).await.unwrap();
        let outcome = fail_dead_lettered(f.tasks.as_ref(), &done).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(TaskStatus::Done));
    }
}
