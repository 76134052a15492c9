use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Doing,
    Done,
    Error,
}

impl TaskStatus {
    /// DONE y ERROR son terminales: ninguna transición posterior es válida.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Transiciones monótonas:
    /// PENDING -> DOING -> {DONE, ERROR}, PENDING -> ERROR, DOING -> DOING (reentrega).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Doing) | (Pending, Error) | (Doing, Doing) | (Doing, Done) | (Doing, Error)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Doing => "DOING",
            TaskStatus::Done => "DONE",
            TaskStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Una etiqueta del ranking de clasificación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub label: String,
    /// Entre 0.0 y 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,

    /// Sólo presente cuando status == DONE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Label>>,

    /// Sólo presente cuando status == ERROR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn pending(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Pending,
            result: None,
            message: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Aplica una actualización parcial respetando las transiciones válidas.
    /// Si la transición no es válida el registro queda intacto.
    pub fn apply(&mut self, update: &TaskUpdate) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(update.status) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: update.status,
            });
        }

        // result sólo con DONE, message sólo con ERROR
        let (result, message) = match update.status {
            TaskStatus::Done => match &update.result {
                Some(labels) => (Some(labels.clone()), None),
                None => return Err(TransitionError::Incomplete(TaskStatus::Done, "result")),
            },
            TaskStatus::Error => match &update.message {
                Some(message) => (None, Some(message.clone())),
                None => return Err(TransitionError::Incomplete(TaskStatus::Error, "message")),
            },
            TaskStatus::Pending | TaskStatus::Doing => (None, None),
        };

        self.status = update.status;
        self.result = result;
        self.message = message;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Campos parciales que el worker escribe sobre un registro existente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Label>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskUpdate {
    pub fn doing() -> Self {
        Self {
            status: TaskStatus::Doing,
            result: None,
            message: None,
        }
    }

    pub fn done(result: Vec<Label>) -> Self {
        Self {
            status: TaskStatus::Done,
            result: Some(result),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            result: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("transición inválida {from} -> {to}")]
    Invalid { from: TaskStatus, to: TaskStatus },
    #[error("{0} sin {1}")]
    Incomplete(TaskStatus, &'static str),
}

/// Resultado de `TaskStore::update`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(TaskRecord),
    /// El registro ya estaba en un estado que no admite la transición; se devuelve tal cual.
    Rejected(TaskRecord),
    Missing,
}
