use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{
    AckRequest, AckResponse, BlobStore, CreateTaskResponse, ReceiveRequest, ReceiveResponse,
    TaskRecord, TaskStore, TaskUpdate, UpdateOutcome, UpdateStatus, UpdateTaskResponse, WorkQueue,
    TOP_K,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks", post(create_task))
        .route("/api/v1/tasks/:task_id", get(get_task).patch(update_task))
        .route("/api/v1/classify", post(classify))
        .route("/api/v1/queue/receive", post(receive_notice))
        .route("/api/v1/queue/ack", post(ack_notice))
        .route("/api/v1/blobs/:key", get(get_blob))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- helpers ---------------- */

/// El body llega en base64, salvo que el content-type diga que son bytes crudos.
fn decode_payload(headers: &HeaderMap, body: &[u8]) -> ApiResult<Vec<u8>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/octet-stream") || content_type.starts_with("image/")
    {
        return Ok(body.to_vec());
    }

    // se ignoran saltos de línea y espacios (base64 "envuelto")
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(&compact)
        .map_err(|_| ApiError::UndecodableBody)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Alta de tarea: registro PENDING + blob + notice. La imagen se valida después, en el worker.
async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let payload = decode_payload(&headers, &body)?;
    let record = state.submission.submit(payload).await?;

    let response = CreateTaskResponse {
        task_id: record.task_id.clone(),
        status: record.status,
    };

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, record.task_id)],
        Json(response),
    ))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    match state.status.get(&task_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::TaskNotFound(task_id)),
    }
}

// Clasificación sincrónica: no crea tarea ni toca los stores
async fn classify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Vec<(String, f64)>>> {
    let payload = decode_payload(&headers, &body)?;

    let decoder = state.decoder.clone();
    let classifier = state.classifier.clone();
    let labels = tokio::task::spawn_blocking(move || {
        decoder
            .decode(&payload)
            .map(|img| classifier.classify(&img, TOP_K))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("clasificación abortada: {}", e)))?
    .map_err(|_| ApiError::UndecodableImage)?;

    let pairs = common::classify::rank(labels, TOP_K)
        .into_iter()
        .map(|l| (l.label, l.confidence))
        .collect();

    Ok(Json(pairs))
}

/* ---------------- endpoints para el worker ---------------- */

// Entrega el siguiente notice visible (si hay); queda en vuelo hasta el ack
async fn receive_notice(
    State(state): State<AppState>,
    Json(req): Json<ReceiveRequest>,
) -> ApiResult<Json<ReceiveResponse>> {
    let delivery = state.queue.receive().await?;

    match &delivery {
        Some(d) => info!(
            consumer = %req.consumer,
            task_id = %d.notice.task_id,
            receive_count = d.receive_count,
            "entregando notice"
        ),
        None => debug!(consumer = %req.consumer, "cola vacía"),
    }

    Ok(Json(ReceiveResponse { delivery }))
}

async fn ack_notice(
    State(state): State<AppState>,
    Json(req): Json<AckRequest>,
) -> ApiResult<Json<AckResponse>> {
    state.queue.ack(&req.receipt).await?;
    Ok(Json(AckResponse { ok: true }))
}

async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.blobs.get(&key).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

// Actualización parcial del worker; nunca pisa un estado terminal
async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(update): Json<TaskUpdate>,
) -> ApiResult<Json<UpdateTaskResponse>> {
    let response = match state.tasks.update(&task_id, &update).await? {
        UpdateOutcome::Applied(task) => UpdateTaskResponse {
            outcome: UpdateStatus::Applied,
            task,
        },
        UpdateOutcome::Rejected(task) => UpdateTaskResponse {
            outcome: UpdateStatus::Rejected,
            task,
        },
        UpdateOutcome::Missing => return Err(ApiError::TaskNotFound(task_id)),
    };

    Ok(Json(response))
}
