//! Backend en disco: un archivo JSON por tarea y un archivo por blob.
//! Sirve para que las tareas sobrevivan a un reinicio de la api.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::notice::blob_uri;
use crate::store::{BlobStore, StoreError, TaskStore};
use crate::task::{TaskRecord, TaskUpdate, UpdateOutcome};

/// Sólo se aceptan claves "simples" como nombre de archivo (uuid, etc.).
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Escribe primero a un temporal y después renombra, para no dejar
/// archivos a medio escribir.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub struct FsTaskStore {
    dir: PathBuf,
    // serializa los read-modify-write de update dentro del proceso
    write_lock: Mutex<()>,
}

impl FsTaskStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    async fn read(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        if !is_safe_key(task_id) {
            return Ok(None);
        }

        match fs::read(self.path_for(task_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path_for(&record.task_id), &bytes).await
    }
}

#[async_trait]
impl TaskStore for FsTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
        if !is_safe_key(&record.task_id) {
            return Err(StoreError::Unavailable(format!(
                "taskId no válido como nombre de archivo: {}",
                record.task_id
            )));
        }
        let _guard = self.write_lock.lock().await;
        self.write(record).await
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.read(task_id).await
    }

    async fn update(
        &self,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut record) = self.read(task_id).await? else {
            return Ok(UpdateOutcome::Missing);
        };

        if record.apply(update).is_err() {
            return Ok(UpdateOutcome::Rejected(record));
        }

        self.write(&record).await?;
        Ok(UpdateOutcome::Applied(record))
    }
}

pub struct FsBlobStore {
    bucket: String,
    dir: PathBuf,
}

impl FsBlobStore {
    pub async fn open(
        bucket: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            bucket: bucket.into(),
            dir,
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        if !is_safe_key(key) {
            return Err(StoreError::Unavailable(format!(
                "clave no válida como nombre de archivo: {}",
                key
            )));
        }
        write_atomic(&self.dir.join(key), &bytes).await?;
        Ok(self.location(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if !is_safe_key(key) {
            return Err(StoreError::NotFound(format!("blob {}", key)));
        }

        match fs::read(self.dir.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self, key: &str) -> String {
        blob_uri(&self.bucket, key)
    }
}
