use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

/// Configuración de la api, leída de variables de entorno.
///
/// | Variable                  | Default    |
/// |---------------------------|------------|
/// | `HOST`                    | `0.0.0.0`  |
/// | `PORT`                    | `8080`     |
/// | `BLOB_BUCKET`             | `images`   |
/// | `DATA_DIR`                | (memoria)  |
/// | `VISIBILITY_TIMEOUT_SECS` | `180`      |
/// | `MAX_RECEIVE_COUNT`       | `2`        |
/// | `SWEEP_INTERVAL_SECS`     | `5`        |
/// | `BLOB_RETENTION_SECS`     | `86400`    |
/// | `MAX_BODY_BYTES`          | `10485760` |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub blob_bucket: String,
    /// Si está definido, tareas y blobs se guardan en disco bajo este directorio
    pub data_dir: Option<PathBuf>,
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
    pub sweep_interval: Duration,
    pub blob_retention: Duration,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            blob_bucket: "images".to_string(),
            data_dir: None,
            visibility_timeout: Duration::from_secs(180),
            max_receive_count: 2,
            sweep_interval: Duration::from_secs(5),
            blob_retention: Duration::from_secs(24 * 60 * 60),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} tiene un valor inválido: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        Ok(Self {
            host: env::var("HOST").unwrap_or(d.host),
            port: env_or("PORT", d.port)?,
            blob_bucket: env::var("BLOB_BUCKET").unwrap_or(d.blob_bucket),
            data_dir: env::var("DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            visibility_timeout: Duration::from_secs(env_or(
                "VISIBILITY_TIMEOUT_SECS",
                d.visibility_timeout.as_secs(),
            )?),
            max_receive_count: env_or("MAX_RECEIVE_COUNT", d.max_receive_count)?,
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )?),
            blob_retention: Duration::from_secs(env_or(
                "BLOB_RETENTION_SECS",
                d.blob_retention.as_secs(),
            )?),
            max_body_bytes: env_or("MAX_BODY_BYTES", d.max_body_bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_usa_default_si_no_hay_variable() {
        let v: u32 = env_or("API_TEST_VARIABLE_QUE_NO_EXISTE", 7).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn env_or_falla_con_valor_invalido() {
        env::set_var("API_TEST_PORT_INVALIDO", "no-es-un-numero");
        let r: Result<u16> = env_or("API_TEST_PORT_INVALIDO", 8080);
        assert!(r.is_err());
        env::remove_var("API_TEST_PORT_INVALIDO");
    }
}
