// api/src/state.rs

use std::sync::Arc;

use anyhow::{Context, Result};
use common::{
    fs::{FsBlobStore, FsTaskStore},
    memory::{InMemoryBlobStore, InMemoryQueue, InMemoryTaskStore},
    BlobStore, Classifier, Decoder, ImageDecoder, PaletteClassifier, StatusService,
    SubmissionService, TaskStore,
};
use tracing::info;

use crate::config::Config;

/// Handles a los servicios externos, construidos una vez al arrancar.
#[derive(Clone)]
pub struct AppState {
    pub submission: SubmissionService,
    pub status: StatusService,
    pub tasks: Arc<dyn TaskStore>,
    pub blobs: Arc<dyn BlobStore>,
    // la cola vive en este proceso; el worker la consume vía HTTP
    pub queue: Arc<InMemoryQueue>,
    // sólo el backend en memoria tiene ciclo de vida de blobs
    pub expiring_blobs: Option<Arc<InMemoryBlobStore>>,
    pub decoder: Arc<dyn Decoder>,
    pub classifier: Arc<dyn Classifier>,
}

impl AppState {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<InMemoryQueue>,
        expiring_blobs: Option<Arc<InMemoryBlobStore>>,
    ) -> Self {
        Self {
            submission: SubmissionService::new(tasks.clone(), blobs.clone(), queue.clone()),
            status: StatusService::new(tasks.clone()),
            tasks,
            blobs,
            queue,
            expiring_blobs,
            decoder: Arc::new(ImageDecoder),
            classifier: Arc::new(PaletteClassifier::default()),
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        let blobs = Arc::new(
            InMemoryBlobStore::new(config.blob_bucket.clone())
                .with_retention(config.blob_retention),
        );
        let queue = Arc::new(InMemoryQueue::new(
            config.visibility_timeout,
            config.max_receive_count,
        ));
        Self::new(
            Arc::new(InMemoryTaskStore::new()),
            blobs.clone(),
            queue,
            Some(blobs),
        )
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let Some(dir) = &config.data_dir else {
            info!("usando stores en memoria");
            return Ok(Self::in_memory(config));
        };

        info!("usando stores en disco bajo {}", dir.display());
        let tasks = FsTaskStore::open(dir.join("tasks"))
            .await
            .context("no se pudo abrir el store de tareas")?;
        let blobs = FsBlobStore::open(config.blob_bucket.clone(), dir.join("blobs"))
            .await
            .context("no se pudo abrir el store de blobs")?;
        let queue = Arc::new(InMemoryQueue::new(
            config.visibility_timeout,
            config.max_receive_count,
        ));

        Ok(Self::new(Arc::new(tasks), Arc::new(blobs), queue, None))
    }
}
