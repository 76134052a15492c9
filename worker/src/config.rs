use std::{env, time::Duration};

use anyhow::{Context, Result};

const DEFAULT_WORKER_CONCURRENCY: usize = 2;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// URL base de la api, ej: http://api:8080
    pub api_url: String,
    pub concurrency: usize,
    /// Espera entre pedidos cuando la cola está vacía
    pub poll_interval: Duration,
    pub blob_bucket: String,
}

impl Config {
    /// - En Docker usaremos: API_URL=http://api:8080
    /// - Si no está definida, usa http://localhost:8080 (para pruebas locales)
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

        let concurrency = match env::var("WORKER_CONCURRENCY") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("WORKER_CONCURRENCY inválido: {:?}", raw))?,
            Err(_) => DEFAULT_WORKER_CONCURRENCY,
        }
        .max(1);

        let poll_ms = match env::var("POLL_INTERVAL_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("POLL_INTERVAL_MS inválido: {:?}", raw))?,
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };

        let blob_bucket = env::var("BLOB_BUCKET").unwrap_or_else(|_| "images".to_string());

        Ok(Self {
            api_url,
            concurrency,
            poll_interval: Duration::from_millis(poll_ms),
            blob_bucket,
        })
    }
}
