// HTTP surface for the audit service - session registry, chat pipeline and
// de-identification exposed over JSON with a {success, data, error} envelope

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ForensicConfig;
use crate::registry::SessionRegistry;
use crate::scrubber::ScrubEngine;
use crate::session::SessionError;
use crate::types::{ApiResponse, DocumentCategory, InsuranceDocument, InsuranceState};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub scrubber: Arc<ScrubEngine>,
    pub config: Arc<ForensicConfig>,
}

pub async fn run_http_server(state: AppState, port: u16) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Root route - API info
        .route("/", get(root))
        .route("/api/health", get(health))
        // Session registry
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:session_id", delete(delete_session))
        // Chat pipeline
        .route("/api/chat/:session_id/chat", post(chat))
        .route("/api/chat/:session_id/messages", get(get_messages))
        // Documents
        .route("/api/chat/:session_id/documents", post(upload_document))
        .route(
            "/api/chat/:session_id/documents/:document_id",
            delete(delete_document),
        )
        // Context sync and rate lookup
        .route("/api/chat/:session_id/context", post(sync_context))
        .route("/api/chat/:session_id/cpt-lookup", post(cpt_lookup))
        // De-identification
        .route("/api/chat/:session_id/scrub", post(scrub))
        .route("/api/chat/:session_id/scrub/test", get(scrub_test))
        .fallback(not_found)
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind HTTP server to port {}: {}", port, e);
            tracing::error!("Try setting NAVIGATOR_HTTP_PORT to a different port");
            return;
        }
    };
    tracing::info!("HTTP server listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("HTTP server error: {}", e);
    }
}

// Root route - shows API info and available endpoints
async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Claim Navigator API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/api/health",
            "sessions": "/api/sessions",
            "chat": "POST /api/chat/:session_id/chat",
            "documents": "POST /api/chat/:session_id/documents",
            "scrub": "POST /api/chat/:session_id/scrub"
        },
        "docs": "Use /api/health to check server status"
    }))
}

async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({ "status": "healthy" })))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ApiResponse::<()>::err("Not Found"))).into_response()
}

// Session registry
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list().await;
    (StatusCode::OK, Json(ApiResponse::ok(sessions))).into_response()
}

#[derive(Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    first_message: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let info = state
        .registry
        .create(req.session_id, req.title, req.first_message)
        .await;
    (StatusCode::OK, Json(ApiResponse::ok(info))).into_response()
}

async fn delete_session(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
) -> impl IntoResponse {
    if state.registry.delete(&session_id).await {
        (
            StatusCode::OK,
            Json(ApiResponse::ok(serde_json::json!({ "deleted": true }))),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err("Session not found")),
        )
            .into_response()
    }
}

// Chat pipeline
#[derive(serde::Deserialize)]
struct ChatRequest {
    message: Option<String>,
    model: Option<String>,
}

async fn chat(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let message = req.message.unwrap_or_default();
    if message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err("Message required")),
        )
            .into_response();
    }

    let handle = state.registry.ensure(&session_id).await;
    match handle.process_message(message, req.model).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(SessionError::Completion(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Failed to process message")),
        )
            .into_response(),
        Err(SessionError::ChannelClosed) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

async fn get_messages(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
) -> impl IntoResponse {
    let handle = state.registry.ensure(&session_id).await;
    match handle.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

// Documents
#[derive(serde::Deserialize)]
struct UploadDocumentRequest {
    title: String,
    #[serde(rename = "type")]
    category: DocumentCategory,
    #[serde(default)]
    content: String,
}

async fn upload_document(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Json(req): Json<UploadDocumentRequest>,
) -> impl IntoResponse {
    let handle = state.registry.ensure(&session_id).await;
    if handle
        .upload_document(req.title, req.category, req.content)
        .await
        .is_err()
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response();
    }
    match handle.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

async fn delete_document(
    State(state): State<AppState>,
    axum::extract::Path((session_id, document_id)): axum::extract::Path<(String, String)>,
) -> impl IntoResponse {
    let handle = state.registry.ensure(&session_id).await;
    if handle.delete_document(document_id).await.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response();
    }
    match handle.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

// Context sync and rate lookup
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextSyncRequest {
    #[serde(default)]
    insurance_state: Option<InsuranceState>,
    #[serde(default)]
    documents: Option<Vec<InsuranceDocument>>,
}

async fn sync_context(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Json(req): Json<ContextSyncRequest>,
) -> impl IntoResponse {
    let handle = state.registry.ensure(&session_id).await;
    match handle.sync_context(req.insurance_state, req.documents).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

#[derive(serde::Deserialize)]
struct CptLookupRequest {
    code: String,
    #[serde(default)]
    state: Option<String>,
}

async fn cpt_lookup(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Json(req): Json<CptLookupRequest>,
) -> impl IntoResponse {
    let handle = state.registry.ensure(&session_id).await;
    match handle.lookup_rate(req.code, req.state).await {
        // A miss is an empty result, not an error.
        Ok(quote) => (StatusCode::OK, Json(ApiResponse::ok(quote))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

// De-identification
#[derive(serde::Deserialize)]
struct ScrubRequest {
    text: Option<String>,
}

async fn scrub(
    State(state): State<AppState>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Json(req): Json<ScrubRequest>,
) -> impl IntoResponse {
    let text = req.text.unwrap_or_default();
    if text.is_empty() || text.chars().count() > state.config.scrub_max_len {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err("Text required")),
        )
            .into_response();
    }

    let handle = state.registry.ensure(&session_id).await;
    match handle.scrub(text).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::ok(outcome))).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::err("Internal Server Error")),
        )
            .into_response(),
    }
}

async fn scrub_test(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ApiResponse::ok(state.scrubber.run_self_test())),
    )
        .into_response()
}
