//! HTTP API over the RAG pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rag/query` | Answer a question over the user's documents |
//! | `POST` | `/rag/answer` | Grounded answer over caller-supplied passages |
//! | `GET`  | `/rag/health` | Component health (never an error status) |
//! | `GET`  | `/rag/database/status` | Store counts and a recommendation (`?user_id=` optional) |
//! | `GET`  | `/rag/model/info` | Generation and embedding model details |
//! | `POST` | `/rag/queries/{id}/feedback` | Attach a rating and/or comment to a recorded query |
//! | `POST` | `/documents` | Ingest a text document (JSON) |
//! | `POST` | `/documents/upload` | Ingest a file (multipart: `user_id`, `title`, `file`) |
//! | `GET`  | `/documents?user_id=` | List a user's documents |
//! | `DELETE` | `/documents/{id}?user_id=` | Delete one document and its chunks |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `storage_error` (500), `embedding_error` (502), `generation_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use docent_core::error::RagError;
use docent_core::models::{DocumentSummary, QueryFeedback};
use docent_core::pipeline::{HealthReport, IngestReport, QueryRequest, QueryResponse, RagPipeline};
use docent_core::store::DatabaseStatus;

use crate::config::Config;
use crate::ingest::{self, MAX_UPLOAD_BYTES};
use crate::service;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: RagPipeline,
    /// Budget for a single query or answer request.
    pub request_timeout: Duration,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = service::build_pipeline(config).await?;
    let state = AppState {
        pipeline,
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "docent server listening");
    println!("Docent server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/rag/query", post(handle_query))
        .route("/rag/answer", post(handle_answer))
        .route("/rag/health", get(handle_health))
        .route("/rag/database/status", get(handle_database_status))
        .route("/rag/model/info", get(handle_model_info))
        .route("/rag/queries/{id}/feedback", post(handle_feedback))
        .route("/documents", post(handle_create_document).get(handle_list_documents))
        .route(
            "/documents/upload",
            post(handle_upload_document)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024)),
        )
        .route("/documents/{id}", delete(handle_delete_document))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::Embedding(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Run `fut` within the request budget. On expiry the future is dropped,
/// cancelling any in-flight backend call.
async fn with_timeout<T>(
    budget: Duration,
    fut: impl Future<Output = docent_core::Result<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => {
            warn!(budget_secs = budget.as_secs(), "request timed out");
            Err(timeout_error(format!(
                "request exceeded {} seconds",
                budget.as_secs()
            )))
        }
    }
}

fn require_user(user_id: Option<String>) -> Result<String, AppError> {
    user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| bad_request("user_id is required"))
}

// ============ /rag ============

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = payload?;
    let response = with_timeout(state.request_timeout, state.pipeline.process_query(&request)).await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
    context: Vec<String>,
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct AnswerResponse {
    answer: String,
}

async fn handle_answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(request) = payload?;
    let answer = with_timeout(
        state.request_timeout,
        state
            .pipeline
            .answer_with_context(&request.question, &request.context, request.temperature),
    )
    .await?;
    Ok(Json(AnswerResponse { answer }))
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.pipeline.health().await)
}

#[derive(Deserialize)]
struct UserParams {
    user_id: Option<String>,
}

#[derive(Serialize)]
struct DatabaseStatusResponse {
    #[serde(flatten)]
    status: DatabaseStatus,
    recommendation: String,
}

async fn handle_database_status(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Json<DatabaseStatusResponse> {
    let user_id = params.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty());
    let status = match state.pipeline.database_status(user_id).await {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "database status check failed");
            DatabaseStatus::unavailable(e.to_string())
        }
    };
    let recommendation = status.recommendation();
    Json(DatabaseStatusResponse {
        status,
        recommendation,
    })
}

async fn handle_model_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let embedder = state.pipeline.embedder();
    Json(serde_json::json!({
        "generation": state.pipeline.generator().model_info(),
        "embedding": {
            "model": embedder.model_name(),
            "dimension": embedder.dims(),
            "loaded": embedder.is_loaded(),
        },
    }))
}

#[derive(Deserialize)]
struct FeedbackRequest {
    user_id: Option<String>,
    confidence_score: Option<i64>,
    feedback: Option<String>,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let user_id = require_user(request.user_id)?;
    let confidence_score = request
        .confidence_score
        .map(u8::try_from)
        .transpose()
        .map_err(|_| bad_request("confidence_score must be between 1 and 10"))?;
    let updated = state
        .pipeline
        .attach_feedback(
            &id,
            &user_id,
            QueryFeedback {
                confidence_score,
                feedback: request.feedback,
            },
        )
        .await?;
    if !updated {
        return Err(not_found(format!("query not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "query_id": id, "updated": true })))
}

// ============ /documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    user_id: Option<String>,
    title: String,
    content: String,
}

async fn handle_create_document(
    State(state): State<AppState>,
    payload: Result<Json<CreateDocumentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestReport>), AppError> {
    let Json(request) = payload?;
    let user_id = require_user(request.user_id)?;
    let report =
        ingest::ingest_text(&state.pipeline, &user_id, &request.title, &request.content).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn handle_upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>), AppError> {
    let mut user_id = None;
    let mut title = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "user_id" => user_id = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?),
            "title" => title = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?),
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| bad_request("file part has no file name"))?;
                let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                file = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let user_id = require_user(user_id)?;
    let (file_name, bytes) = file.ok_or_else(|| bad_request("missing file part"))?;
    let report =
        ingest::ingest_file_bytes(&state.pipeline, &user_id, title.as_deref(), &file_name, &bytes)
            .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let Query(params) = params?;
    let user_id = require_user(params.user_id)?;
    let documents = state.pipeline.store().list_documents(&user_id).await?;
    Ok(Json(DocumentListResponse { documents }))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Result<StatusCode, AppError> {
    let Query(params) = params?;
    let user_id = require_user(params.user_id)?;
    if !state.pipeline.store().delete_document(&id, &user_id).await? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
