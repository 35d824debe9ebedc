//! HTTP front end for the question-answering pipeline.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service description and endpoint list |
//! | `GET`  | `/health` | Liveness check |
//! | `GET`  | `/warmup` | Full ingest when the index is still empty |
//! | `POST` | `/ask` | Answer `{"text": "..."}` from the indexed documents |
//! | `POST` | `/update` | Incremental ingest of the documents folder |
//!
//! Errors are returned as `{"error": {"code": "...", "message": "..."}}`.
//! Every response carries an `x-process-time` header in seconds.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docqa_core::{
    FolderSource, IndexError, IngestError, IngestMode, IngestionReport, QaError, VectorIndex,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::Pipeline;

const PROCESS_TIME: &str = "x-process-time";

/// State shared by every handler. Requests touching the pipeline are
/// serialized through the mutex.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Mutex<Pipeline>>,
    source: Arc<FolderSource>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, source: FolderSource) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            source: Arc::new(source),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/warmup", get(handle_warmup))
        .route("/ask", post(handle_ask))
        .route("/update", post(handle_update))
        .layer(middleware::from_fn(process_time))
        .layer(cors)
        .with_state(state)
}

/// Serve until ctrl-c, then close the index once in-flight requests finish.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let pipeline = Arc::clone(&state.pipeline);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "docqa server listening");
    println!("Serving on http://{bind}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => pipeline.into_inner().into_index().close()?,
        Err(_) => warn!("pipeline still shared at shutdown, index left to close on drop"),
    }
    info!("docqa server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "cannot listen for ctrl-c, serving until killed");
        std::future::pending::<()>().await;
    }
}

async fn process_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = started.elapsed().as_secs_f64();
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed:.6}")) {
        response.headers_mut().insert(PROCESS_TIME, value);
    }
    response
}

fn seconds_since(started: Instant) -> String {
    format!("{:.2} seconds", started.elapsed().as_secs_f64())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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

impl From<IndexError> for AppError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Schema { .. } => Self::new(
                StatusCode::CONFLICT,
                "index_mismatch",
                format!("{error}; run `docqa rebuild` after changing the embedding model"),
            ),
            IndexError::InvalidQuery(_) => {
                Self::new(StatusCode::BAD_REQUEST, "bad_request", error.to_string())
            }
            _ => {
                error!(%error, "index failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "index_error", error.to_string())
            }
        }
    }
}

impl From<QaError> for AppError {
    fn from(error: QaError) -> Self {
        match error {
            QaError::EmptyQuestion => {
                Self::new(StatusCode::BAD_REQUEST, "bad_request", error.to_string())
            }
            QaError::Index(error) => error.into(),
            error if error.is_timeout() => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", error.to_string())
            }
            QaError::Service(error) => {
                warn!(%error, "upstream service failed");
                Self::new(StatusCode::BAD_GATEWAY, "upstream_error", error.to_string())
            }
        }
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::SourceMissing(_) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", error.to_string())
            }
            IngestError::Index(error) => error.into(),
            _ => {
                error!(%error, "ingest failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ingest_error", error.to_string())
            }
        }
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "docqa document question answering",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/ask": "POST - Ask a question",
            "/update": "POST - Update documents",
            "/health": "GET - Health check",
            "/warmup": "GET - Warmup",
        }
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

// ============ GET /warmup ============

#[derive(Serialize)]
struct WarmupResponse {
    status: &'static str,
    message: String,
    ready: bool,
}

async fn handle_warmup(State(state): State<AppState>) -> Json<WarmupResponse> {
    let mut pipeline = state.pipeline.lock().await;
    let response = match warm_up(&mut pipeline, &state.source).await {
        Ok(response) => response,
        Err(error) => {
            error!(%error, "warmup failed");
            WarmupResponse {
                status: "error",
                message: error.to_string(),
                ready: false,
            }
        }
    };
    Json(response)
}

async fn warm_up(
    pipeline: &mut Pipeline,
    source: &FolderSource,
) -> Result<WarmupResponse, IngestError> {
    let stored = pipeline.index().len()?;
    if stored > 0 {
        return Ok(WarmupResponse {
            status: "already_ready",
            message: format!("Index already holds {stored} document chunks"),
            ready: true,
        });
    }

    info!("warmup requested on an empty index, indexing documents");
    let report = pipeline.ingest(source, IngestMode::Full).await?;
    if pipeline.index().is_empty()? {
        return Ok(WarmupResponse {
            status: "no_documents",
            message: "No documents found in the documents folder".to_string(),
            ready: false,
        });
    }
    Ok(WarmupResponse {
        status: "warmup_complete",
        message: format!("Processed {} document chunks", report.chunks_embedded),
        ready: true,
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    text: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    grounded: bool,
    processing_time: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let started = Instant::now();
    if request.text.trim().is_empty() {
        return Err(QaError::EmptyQuestion.into());
    }

    let mut pipeline = state.pipeline.lock().await;
    if pipeline.index().is_empty()? {
        info!("index is empty, indexing documents before answering");
        pipeline.ingest(state.source.as_ref(), IngestMode::Full).await?;
        if pipeline.index().is_empty()? {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                "No documents found in the documents folder.",
            ));
        }
    }

    let outcome = pipeline.ask(&request.text).await?;
    let processing_time = seconds_since(started);
    info!(%processing_time, "question processed");

    Ok(Json(AskResponse {
        answer: outcome.answer.to_string(),
        grounded: outcome.answer.is_grounded(),
        processing_time,
    }))
}

// ============ POST /update ============

#[derive(Serialize)]
struct UpdateResponse {
    message: String,
    indexed: usize,
    unchanged: usize,
    empty: usize,
    removed: usize,
    failed: usize,
    processing_time: String,
}

impl UpdateResponse {
    fn from_report(report: &IngestionReport, processing_time: String) -> Self {
        Self {
            message: format!("Updated with {} document chunks.", report.chunks_embedded),
            indexed: report.indexed,
            unchanged: report.unchanged,
            empty: report.empty,
            removed: report.removed,
            failed: report.failed_count(),
            processing_time,
        }
    }
}

async fn handle_update(State(state): State<AppState>) -> Result<Json<UpdateResponse>, AppError> {
    let started = Instant::now();
    let report = {
        let mut pipeline = state.pipeline.lock().await;
        pipeline
            .ingest(state.source.as_ref(), IngestMode::Incremental)
            .await?
    };
    let processing_time = seconds_since(started);
    info!(%processing_time, indexed = report.indexed, "documents updated");

    Ok(Json(UpdateResponse::from_report(&report, processing_time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use docqa_core::{
        CharacterNgramEmbedder, CompletionRequest, CompletionService, Embedder, PipelineOptions,
        QaPipeline, ServiceError, SqliteVectorIndex,
    };
    use std::fs;
    use std::path::Path;
    use tower::ServiceExt;

    struct CannedCompletion;

    #[async_trait]
    impl CompletionService for CannedCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
            if request.user.contains("Tuesday") {
                Ok("The meeting is on Tuesday.".to_string())
            } else {
                Ok("I could not find that in the documents.".to_string())
            }
        }
    }

    struct SlowCompletion;

    #[async_trait]
    impl CompletionService for SlowCompletion {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            Err(ServiceError::Timeout {
                service: "chat completion",
                seconds: 30,
            })
        }
    }

    fn state_for(docs: &Path, completion: Box<dyn CompletionService>) -> AppState {
        let embedder: Box<dyn Embedder> = Box::new(CharacterNgramEmbedder::default());
        let index = SqliteVectorIndex::open_in_memory().unwrap();
        let pipeline = QaPipeline::new(index, embedder, completion, PipelineOptions::default());
        AppState::new(pipeline, FolderSource::new(docs))
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn ask(text: &str) -> Request<Body> {
        Request::post("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "text": text }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy_with_process_time() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let elapsed = response.headers().get(PROCESS_TIME).unwrap();
        assert!(elapsed.to_str().unwrap().parse::<f64>().unwrap() >= 0.0);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn ask_indexes_an_empty_store_before_answering() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("meeting.txt"),
            "The budget meeting is on Tuesday at noon.",
        )
        .unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));

        let (status, body) = send(&state, ask("When is the budget meeting?")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "The meeting is on Tuesday.");
        assert_eq!(body["grounded"], true);
        assert!(body["processing_time"].as_str().unwrap().ends_with(" seconds"));
        assert!(!state.pipeline.lock().await.index().is_empty().unwrap());
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));

        let (status, body) = send(&state, ask("   ")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn ask_without_documents_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));

        let (status, body) = send(&state, ask("Anything there?")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn completion_timeouts_map_to_gateway_timeout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "Quarterly notes about hiring.").unwrap();
        let state = state_for(dir.path(), Box::new(SlowCompletion));

        let (status, body) = send(&state, ask("What about hiring?")).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "timeout");
    }

    #[tokio::test]
    async fn update_runs_an_incremental_ingest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "Alpha document text.").unwrap();
        fs::write(dir.path().join("b.txt"), "Beta document text.").unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));
        let update = || Request::post("/update").body(Body::empty()).unwrap();

        let (status, first) = send(&state, update()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["indexed"], 2);
        assert_eq!(first["message"], "Updated with 2 document chunks.");

        fs::remove_file(dir.path().join("b.txt")).unwrap();
        let (_, second) = send(&state, update()).await;
        assert_eq!(second["indexed"], 0);
        assert_eq!(second["unchanged"], 1);
        assert_eq!(second["removed"], 0);
        assert_eq!(
            state.pipeline.lock().await.index().document_ids().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn warmup_reports_missing_documents_then_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), Box::new(CannedCompletion));
        let warmup = || Request::get("/warmup").body(Body::empty()).unwrap();

        let (_, empty) = send(&state, warmup()).await;
        assert_eq!(empty["status"], "no_documents");
        assert_eq!(empty["ready"], false);

        fs::write(dir.path().join("a.txt"), "Alpha document text.").unwrap();
        let (_, warmed) = send(&state, warmup()).await;
        assert_eq!(warmed["status"], "warmup_complete");
        assert_eq!(warmed["ready"], true);

        let (_, again) = send(&state, warmup()).await;
        assert_eq!(again["status"], "already_ready");
    }

    #[tokio::test]
    async fn a_missing_documents_folder_fails_warmup_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(&dir.path().join("absent"), Box::new(CannedCompletion));

        let (status, body) = send(
            &state,
            Request::get("/warmup").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["ready"], false);
    }
}
