use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};
use url::Url;

use crate::{
    app_state::{AppState, Status},
    checkpoint::Checkpoint,
    error::ExplorerError,
    ingest::{self, IngestOptions},
    neo4j_client,
    runner::RunConfig,
    state::{AnswerRecord, InputState},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SelectDirPayload {
    path: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
    /// Hilo a usar; si falta se genera uno nuevo.
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ResumePayload {
    /// Límite de pasos para la reanudación; por defecto el de la configuración.
    #[serde(default)]
    recursion_limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    answer: String,
    analysis: String,
    citations: BTreeMap<String, String>,
    previous_actions: Vec<String>,
    thread_id: String,
}

impl AnswerResponse {
    fn new(record: AnswerRecord, thread_id: String) -> Self {
        Self {
            answer: record.answer,
            analysis: record.analysis,
            citations: record.citations,
            previous_actions: record.previous_actions,
            thread_id,
        }
    }
}

/// Resumen de una sesión para el listado.
#[derive(Serialize)]
pub struct SessionSummary {
    thread_id: String,
    question: String,
    next: Option<String>,
    steps: usize,
    finished: bool,
    updated_at: String,
}

impl From<Checkpoint> for SessionSummary {
    fn from(cp: Checkpoint) -> Self {
        Self {
            finished: cp.is_finished(),
            thread_id: cp.thread_id,
            question: cp.state.question,
            next: cp.next.map(|s| s.to_string()),
            steps: cp.steps,
            updated_at: cp.updated_at.to_rfc3339(),
        }
    }
}

/// Error de una sesión de exploración traducido a HTTP.
pub struct ApiError {
    err: ExplorerError,
    thread_id: Option<String>,
}

fn status_for(err: &ExplorerError) -> StatusCode {
    match err {
        ExplorerError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        ExplorerError::StepLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExplorerError::OracleParse(_) => StatusCode::BAD_GATEWAY,
        ExplorerError::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ExplorerError::GraphQuery(_)
        | ExplorerError::EmptyQueueUnderflow { .. }
        | ExplorerError::Checkpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.err);
        let body = json!({
            "error": self.err.to_string(),
            "kind": self.err.kind(),
            "thread_id": self.thread_id,
        });
        (status, Json(body)).into_response()
    }
}

type JsonError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: &str) -> JsonError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message, "kind": "invalid_request"})),
    )
}

/// Un panic en otra petición no debe bloquear el estado compartido.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask_handler))
        .route("/api/sessions", get(list_sessions_handler))
        .route(
            "/api/sessions/:thread_id",
            get(session_handler).delete(delete_session_handler),
        )
        .route("/api/sessions/:thread_id/resume", post(resume_handler))
        .route("/api/select-directory", post(select_directory_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers de exploración ---

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<AnswerResponse>, Response> {
    if payload.question.trim().is_empty() {
        return Err(bad_request("La pregunta no puede estar vacía.").into_response());
    }

    let mut cfg = RunConfig::new(state.config.recursion_limit);
    if let Some(thread_id) = payload.thread_id.filter(|t| !t.trim().is_empty()) {
        cfg = cfg.with_thread_id(thread_id);
    }

    let input = InputState {
        question: payload.question,
    };
    match state.runner.run(input, &cfg).await {
        Ok(record) => Ok(Json(AnswerResponse::new(record, cfg.thread_id))),
        Err(err) => Err(ApiError {
            err,
            thread_id: Some(cfg.thread_id),
        }
        .into_response()),
    }
}

#[axum::debug_handler]
async fn resume_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    payload: Option<Json<ResumePayload>>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let limit = payload
        .and_then(|Json(p)| p.recursion_limit)
        .unwrap_or(state.config.recursion_limit);

    match state.runner.resume(&thread_id, limit).await {
        Ok(record) => Ok(Json(AnswerResponse::new(record, thread_id))),
        Err(err) => Err(ApiError {
            err,
            thread_id: Some(thread_id),
        }),
    }
}

#[axum::debug_handler]
async fn session_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Checkpoint>, ApiError> {
    match state.runner.checkpoint(&thread_id) {
        Ok(Some(checkpoint)) => Ok(Json(checkpoint)),
        Ok(None) => Err(ApiError {
            err: ExplorerError::SessionNotFound {
                thread_id: thread_id.clone(),
            },
            thread_id: Some(thread_id),
        }),
        Err(err) => Err(ApiError {
            err,
            thread_id: Some(thread_id),
        }),
    }
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.runner.forget(&thread_id).map_err(|err| ApiError {
        err,
        thread_id: Some(thread_id),
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn list_sessions_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sessions = state
        .runner
        .recent_sessions(50)
        .map_err(|err| ApiError {
            err,
            thread_id: None,
        })?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

// --- Handlers de ingesta ---

#[axum::debug_handler]
async fn select_directory_handler(
    State(state): State<AppState>,
    Json(payload): Json<SelectDirPayload>,
) -> Result<impl IntoResponse, JsonError> {
    let path = PathBuf::from(&payload.path);
    if !path.is_dir() {
        return Err(bad_request("La ruta proporcionada no es un directorio válido."));
    }

    *lock(&state.current_dir) = Some(path);
    Ok((StatusCode::OK, Json(json!({ "message": "Directorio fijado para la ingesta." }))))
}

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, JsonError> {
    let root_dir = match lock(&state.current_dir).clone() {
        Some(dir) => dir,
        None => return Err(bad_request("Primero debe seleccionar un directorio.")),
    };

    {
        let mut status = lock(&state.status);
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": "Ya hay una indexación en curso.", "kind": "busy"})),
            ));
        }
        status.is_busy = true;
        status.message = "Iniciando indexación...".to_string();
        status.progress = 0.0;
    }

    let opts = IngestOptions {
        chunk_max_chars: state.config.chunk_max_chars,
        similarity_threshold: state.config.key_element_similarity_threshold,
    };

    spawn(async move {
        let result = ingest::ingest_directory(
            &state.graph,
            &state.llm_manager,
            &root_dir,
            state.status.clone(),
            &opts,
        )
        .await;

        let mut status = lock(&state.status);
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(summary) => {
                info!("Indexación completada. {summary}");
                status.message = format!("¡Indexación completada! {}", summary);
            }
            Err(err) => {
                status.message = format!("Error en la indexación: {}", err);
                error!("Error de ingesta: {}", err);
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(lock(&state.status).clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    if let Err(e) = state.graph.run(query("RETURN 1")).await {
        error!("Error en el health check de Neo4j: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let counts = neo4j_client::graph_counts(&state.graph).await.map_err(|e| {
        error!("Error contando nodos del grafo: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let counts: BTreeMap<String, i64> = counts.into_iter().collect();

    Ok(Json(json!({ "status": "ok", "browser_url": browser_url, "counts": counts })))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = lock(&state.shutdown_sender).take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
