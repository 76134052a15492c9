pub mod classify;
pub mod fs;
pub mod memory;
pub mod notice;
pub mod processor;
pub mod status;
pub mod store;
pub mod submission;
pub mod task;

pub use classify::{Classifier, DecodeError, Decoder, ImageDecoder, PaletteClassifier, TOP_K};
pub use notice::{Delivery, DispatchNotice, ReceiptHandle};
pub use processor::{fail_dead_lettered, Outcome, ProcessError, TaskProcessor};
pub use status::StatusService;
pub use store::{BlobStore, StoreError, TaskStore, WorkQueue};
pub use submission::{SubmissionService, SubmitError};
pub use task::{Label, TaskId, TaskRecord, TaskStatus, TaskUpdate, UpdateOutcome};

/* --------- Mensajes entre worker y api --------- */

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveRequest {
    /// Sólo para logs: quién está pidiendo trabajo
    pub consumer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub receipt: ReceiptHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Applied,
    Rejected,
}

/// Respuesta de PATCH /api/v1/tasks/:id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskResponse {
    pub outcome: UpdateStatus,
    pub task: TaskRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
