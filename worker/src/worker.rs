use anyhow::{Context, Result};
use common::{Delivery, ImageDecoder, Outcome, PaletteClassifier, TaskProcessor, WorkQueue};
use reqwest::Client;
use std::future::{self, Future};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::remote::ApiClient;

/// Corre el worker hasta recibir ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("no se pudo escuchar ctrl-c: {}", e);
            future::pending::<()>().await;
        }
    })
    .await
}

/// Loop principal del worker.
/// - Pide notices a la api mientras tenga "slots" libres.
/// - Procesa cada notice en paralelo (hasta `concurrency`).
/// - Confirma el mensaje sólo si el procesamiento no tuvo errores de infraestructura.
/// - Al completarse `shutdown` deja de pedir notices y espera las entregas en curso.
pub async fn run_until(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    let permits = u32::try_from(config.concurrency)
        .with_context(|| format!("concurrency demasiado grande: {}", config.concurrency))?;

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let consumer = format!("{}-{}", hostname, std::process::id());

    let api = Arc::new(ApiClient::new(
        Client::new(),
        config.api_url.clone(),
        consumer.clone(),
        config.blob_bucket.clone(),
    ));
    let processor = Arc::new(TaskProcessor::new(
        api.clone(),
        api.clone(),
        Arc::new(ImageDecoder),
        Arc::new(PaletteClassifier::default()),
    ));

    info!(
        "worker {} arrancando con concurrency={} contra {}",
        consumer, config.concurrency, config.api_url
    );

    let sem = Arc::new(Semaphore::new(config.concurrency));
    tokio::pin!(shutdown);

    loop {
        // --------- Control de concurrencia local ---------
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = sem.clone().acquire_owned() => permit?,
        };

        let received = tokio::select! {
            _ = &mut shutdown => break,
            received = api.receive() => received,
        };

        let delivery = match received {
            Ok(Some(d)) => d,
            other => {
                if let Err(e) = other {
                    warn!("error pidiendo notices a la api: {}", e);
                }
                // No hay notices: devolvemos el permiso y dormimos
                drop(permit);
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = sleep(config.poll_interval) => {}
                }
                continue;
            }
        };

        info!(
            "tengo notice para la tarea {} (entrega #{})",
            delivery.notice.task_id, delivery.receive_count
        );

        let api_cloned = api.clone();
        let processor_cloned = processor.clone();
        tokio::spawn(async move {
            handle_delivery(&processor_cloned, api_cloned.as_ref(), delivery).await;
            // liberar el "slot" de concurrencia al terminar
            drop(permit);
        });
    }

    // esperar a que terminen las entregas en curso
    info!("apagando worker, esperando tareas en curso...");
    let _all = sem.acquire_many(permits).await?;
    info!("worker detenido");
    Ok(())
}

/// Procesa una entrega y la confirma. Devuelve true si hubo ack.
///
/// Si el procesamiento falla por infraestructura no se confirma: al vencer
/// la ventana de visibilidad la cola la vuelve a entregar.
pub async fn handle_delivery(
    processor: &TaskProcessor,
    queue: &dyn WorkQueue,
    delivery: Delivery,
) -> bool {
    let task_id = delivery.notice.task_id.clone();

    match processor.process(&delivery.notice).await {
        Ok(outcome) => {
            match &outcome {
                Outcome::Completed(labels) => info!(
                    "tarea {} DONE ({} etiquetas)",
                    task_id,
                    labels.len()
                ),
                Outcome::Failed(message) => info!("tarea {} ERROR: {}", task_id, message),
                Outcome::Skipped(status) => {
                    info!("tarea {} ya estaba en {}, nada que hacer", task_id, status)
                }
                Outcome::Missing => warn!("tarea {} no existe, se descarta el notice", task_id),
            }

            if let Err(e) = queue.ack(&delivery.receipt).await {
                warn!("no se pudo confirmar el notice de la tarea {}: {}", task_id, e);
                return false;
            }
            true
        }
        Err(e) => {
            warn!(
                "error procesando tarea {}: {} (sin ack, se reintentará)",
                task_id, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        memory::{InMemoryBlobStore, InMemoryQueue, InMemoryTaskStore},
        notice::blob_uri,
        BlobStore, StoreError, SubmissionService, TaskStatus, TaskStore,
    };
    use std::time::Duration;

    struct DownBlobs;

    #[async_trait]
    impl BlobStore for DownBlobs {
        async fn put(&self, key: &str, _bytes: Vec<u8>) -> Result<String, StoreError> {
            Ok(blob_uri("images", key))
        }

        async fn get(&self, _key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Unavailable("timeout".into()))
        }

        fn location(&self, key: &str) -> String {
            blob_uri("images", key)
        }
    }

    fn processor(tasks: Arc<InMemoryTaskStore>, blobs: Arc<dyn BlobStore>) -> TaskProcessor {
        TaskProcessor::new(
            tasks,
            blobs,
            Arc::new(ImageDecoder),
            Arc::new(PaletteClassifier::default()),
        )
    }

    #[tokio::test]
    async fn entrega_procesada_se_confirma() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new("images"));
        let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30), 2));
        let submission = SubmissionService::new(tasks.clone(), blobs.clone(), queue.clone());

        let record = submission.submit(b"no soy imagen".to_vec()).await.unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();

        let processor = processor(tasks.clone(), blobs);
        let acked = handle_delivery(&processor, queue.as_ref(), delivery).await;
        assert!(acked);
        assert_eq!(queue.in_flight_len().unwrap(), 0);

        let stored = tasks.get(&record.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn error_de_infraestructura_no_confirma() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30), 2));
        let submission = SubmissionService::new(tasks.clone(), Arc::new(DownBlobs), queue.clone());

        submission.submit(vec![1, 2, 3]).await.unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();

        let acked = handle_delivery(
            &processor(tasks.clone(), Arc::new(DownBlobs)),
            queue.as_ref(),
            delivery,
        )
        .await;
        assert!(!acked);
        assert_eq!(queue.in_flight_len().unwrap(), 1);
    }

    fn config_sin_api(concurrency: usize) -> Config {
        Config {
            // nadie escucha en el puerto 1: cada receive falla y el loop duerme
            api_url: "http://127.0.0.1:1".into(),
            concurrency,
            poll_interval: Duration::from_millis(300),
            blob_bucket: "images".into(),
        }
    }

    #[tokio::test]
    async fn shutdown_corta_el_loop_aunque_este_esperando() {
        let shutdown = sleep(Duration::from_millis(700));
        let out =
            tokio::time::timeout(Duration::from_secs(5), run_until(config_sin_api(2), shutdown))
                .await;

        assert!(matches!(out, Ok(Ok(()))), "run_until no terminó: {:?}", out);
    }

    #[cfg(target_pointer_width = "64")]
    #[tokio::test]
    async fn concurrency_fuera_de_rango_es_error() {
        let shutdown = future::ready(());
        let out = run_until(config_sin_api(u32::MAX as usize + 1), shutdown).await;
        assert!(out.is_err());
    }
}
