//! Adaptadores HTTP: el worker ve los stores y la cola a través de la api.

use async_trait::async_trait;
use common::{
    notice::blob_uri, AckRequest, BlobStore, Delivery, DispatchNotice, ReceiveRequest,
    ReceiveResponse, StoreError, TaskRecord, TaskStore, TaskUpdate, UpdateOutcome, UpdateStatus,
    UpdateTaskResponse, WorkQueue,
};
use reqwest::{Client, Response, StatusCode};

fn unavailable(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Cualquier status no exitoso que no sea 404 se trata como caída del servicio.
fn check(resp: Response) -> Result<Response, StoreError> {
    resp.error_for_status().map_err(unavailable)
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    consumer: String,
    bucket: String,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        consumer: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            consumer: consumer.into(),
            bucket: bucket.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TaskStore for ApiClient {
    async fn put(&self, _record: &TaskRecord) -> Result<(), StoreError> {
        // las tareas sólo se crean con POST /api/v1/tasks
        Err(StoreError::Unsupported("el worker no crea tareas"))
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/tasks/{}", task_id)))
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = check(resp)?.json().await.map_err(unavailable)?;
        Ok(Some(record))
    }

    async fn update(
        &self,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let resp = self
            .client
            .patch(self.url(&format!("/api/v1/tasks/{}", task_id)))
            .json(update)
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(UpdateOutcome::Missing);
        }
        let body: UpdateTaskResponse = check(resp)?.json().await.map_err(unavailable)?;
        Ok(match body.outcome {
            UpdateStatus::Applied => UpdateOutcome::Applied(body.task),
            UpdateStatus::Rejected => UpdateOutcome::Rejected(body.task),
        })
    }
}

#[async_trait]
impl BlobStore for ApiClient {
    async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<String, StoreError> {
        Err(StoreError::Unsupported("el worker sólo lee blobs"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/blobs/{}", key)))
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!("blob {}", key)));
        }
        let bytes = check(resp)?.bytes().await.map_err(unavailable)?;
        Ok(bytes.to_vec())
    }

    fn location(&self, key: &str) -> String {
        blob_uri(&self.bucket, key)
    }
}

#[async_trait]
impl WorkQueue for ApiClient {
    async fn publish(&self, _notice: &DispatchNotice) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("el worker no publica notices"))
    }

    async fn receive(&self) -> Result<Option<Delivery>, StoreError> {
        let resp = self
            .client
            .post(self.url("/api/v1/queue/receive"))
            .json(&ReceiveRequest {
                consumer: self.consumer.clone(),
            })
            .send()
            .await
            .map_err(unavailable)?;

        let body: ReceiveResponse = check(resp)?.json().await.map_err(unavailable)?;
        Ok(body.delivery)
    }

    async fn ack(&self, receipt: &str) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.url("/api/v1/queue/ack"))
            .json(&AckRequest {
                receipt: receipt.to_string(),
            })
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!("receipt {}", receipt)));
        }
        check(resp)?;
        Ok(())
    }
}
