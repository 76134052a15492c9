//! Interfaces mínimas hacia los servicios externos: registro de tareas,
//! almacenamiento de blobs y cola de trabajo.
//!
//! El resto del crate sólo depende de estos traits, así que en tests se
//! usan las implementaciones en memoria y en producción las que hablan
//! con el servicio real (disco local o la API vía HTTP).

use async_trait::async_trait;

use crate::notice::{Delivery, DispatchNotice};
use crate::task::{TaskRecord, TaskUpdate, UpdateOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no existe: {0}")]
    NotFound(String),

    #[error("servicio no disponible: {0}")]
    Unavailable(String),

    #[error("error de serialización: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("operación no soportada: {0}")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserta o reemplaza el registro completo.
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError>;

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Actualización parcial, atómica por clave. Un registro terminal nunca se modifica.
    async fn update(&self, task_id: &str, update: &TaskUpdate)
        -> Result<UpdateOutcome, StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Guarda los bytes y devuelve la uri del blob.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StoreError>;

    /// `StoreError::NotFound` si la clave no existe.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn location(&self, key: &str) -> String;
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish(&self, notice: &DispatchNotice) -> Result<(), StoreError>;

    /// Siguiente mensaje visible, si hay. Queda en vuelo hasta el ack.
    async fn receive(&self) -> Result<Option<Delivery>, StoreError>;

    async fn ack(&self, receipt: &str) -> Result<(), StoreError>;
}
