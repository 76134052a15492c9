use std::sync::Arc;

use crate::store::{StoreError, TaskStore};
use crate::task::TaskRecord;

/// Lectura pura del registro de una tarea.
#[derive(Clone)]
pub struct StatusService {
    tasks: Arc<dyn TaskStore>,
}

impl StatusService {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    /// `Ok(None)` si el id no existe o está mal formado; no es un error.
    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Ok(None);
        }
        self.tasks.get(task_id).await
    }
}
