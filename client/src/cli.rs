use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use common::{CreateTaskResponse, ErrorBody, TaskRecord};
use reqwest::{Client, Response};
use std::{env, path::PathBuf, time::Duration};

/// Igual que en el worker:
/// - En Docker: API_URL=http://api:8080
/// - Local: default http://localhost:8080
fn api_base_url() -> String {
    env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con la api de clasificación")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sube una imagen y crea una tarea de clasificación
    Submit {
        #[arg(value_name = "ARCHIVO")]
        file: PathBuf,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Espera hasta que la tarea termine (DONE o ERROR)
    Wait {
        #[arg(value_name = "TASK_ID")]
        id: String,

        /// Intervalo entre consultas
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Cantidad máxima de consultas antes de rendirse
        #[arg(long, default_value_t = 120)]
        max_polls: u32,
    },
    /// Clasifica una imagen de forma sincrónica, sin crear tarea
    Classify {
        #[arg(value_name = "ARCHIVO")]
        file: PathBuf,
    },
}

fn read_base64(file: &PathBuf) -> Result<String> {
    let bytes =
        std::fs::read(file).with_context(|| format!("no se pudo leer {}", file.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Mensaje de error de la api, o el status si el body no es el esperado.
async fn api_error(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => format!("{} ({})", body.message, status),
        Err(_) => format!("status {}", status),
    }
}

async fn fetch_task(client: &Client, base_url: &str, id: &str) -> Result<TaskRecord> {
    let url = format!("{}/api/v1/tasks/{}", base_url, id);
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        bail!("{}", api_error(resp).await);
    }
    Ok(resp.json().await?)
}

fn print_task(task: &TaskRecord) {
    println!("Tarea:");
    println!("  id: {}", task.task_id);
    println!("  estado: {}", task.status);
    println!("  submitted_at: {}", task.submitted_at);
    println!("  updated_at: {}", task.updated_at);
    if let Some(ref message) = task.message {
        println!("  mensaje: {}", message);
    }
    if let Some(ref result) = task.result {
        println!("  resultado:");
        for l in result {
            println!("    - {:<20} {:.4}", l.label, l.confidence);
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = api_base_url();

    match cli.command {
        Commands::Submit { file } => {
            let url = format!("{}/api/v1/tasks", base_url);
            let body = read_base64(&file)?;

            let resp = client.post(&url).body(body).send().await?;
            if !resp.status().is_success() {
                bail!("no se pudo crear la tarea: {}", api_error(resp).await);
            }

            let created: CreateTaskResponse = resp.json().await?;
            println!("Tarea creada:");
            println!("  id: {}", created.task_id);
            println!("  estado: {}", created.status);
        }

        Commands::Status { id } => {
            let task = fetch_task(&client, &base_url, &id).await?;
            print_task(&task);
        }

        Commands::Wait {
            id,
            interval_ms,
            max_polls,
        } => {
            for _ in 0..max_polls.max(1) {
                let task = fetch_task(&client, &base_url, &id).await?;
                if task.status.is_terminal() {
                    print_task(&task);
                    return Ok(());
                }
                println!("  {} ... {}", task.task_id, task.status);
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
            bail!("la tarea {} no terminó después de {} consultas", id, max_polls);
        }

        Commands::Classify { file } => {
            let url = format!("{}/api/v1/classify", base_url);
            let body = read_base64(&file)?;

            let resp = client.post(&url).body(body).send().await?;
            if !resp.status().is_success() {
                bail!("no se pudo clasificar: {}", api_error(resp).await);
            }

            let pairs: Vec<(String, f64)> = resp.json().await?;
            println!("Clasificación de {}:", file.display());
            for (label, confidence) in pairs {
                println!("  - {:<20} {:.4}", label, confidence);
            }
        }
    }

    Ok(())
}
