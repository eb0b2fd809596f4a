//! Presence HTTP API.
//!
//! Endpoints:
//! - GET  /                     liveness message
//! - POST /login                multipart `file`; check in on match
//! - POST /logout               multipart `file`; check out on match
//! - POST /register_new_user    multipart `file` + `text` (identity)
//! - GET  /get_attendance_logs  zip of every per-day CSV file
//! - GET  /status               version, enrolled count, comparison rule
//! - GET  /users                enrolled identities, sorted
//!
//! `/register_new_user` reports its outcome in the body as
//! `registration_status`, mirroring the HTTP status code.

use std::future::Future;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use presence_core::{EmbeddingStore, Identity, IdentityError, MatchResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::attendance::{AttendanceLog, Direction, EXPORT_FILE_NAME};
use crate::engine::{EngineError, EngineHandle};

const WELCOME_MESSAGE: &str = "Welcome to the Face Attendance App!";

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: Arc<EmbeddingStore>,
    pub attendance: Arc<AttendanceLog>,
}

/// Build the router with every endpoint, CORS, and request tracing.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/register_new_user", post(register_handler))
        .route("/get_attendance_logs", get(attendance_logs_handler))
        .route("/status", get(status_handler))
        .route("/users", get(users_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Presence HTTP API listening on http://{}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchResponse {
    pub user: String,
    pub match_status: bool,
}

impl From<&MatchResult> for MatchResponse {
    fn from(result: &MatchResult) -> Self {
        Self {
            user: result.user().to_string(),
            match_status: result.is_match(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub registration_status: u16,
}

/// Standard HTTP error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("missing form field {0:?}")]
    MissingField(&'static str),
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] presence_core::StoreError),
    #[error("write attendance log: {0}")]
    Attendance(#[source] std::io::Error),
    #[error("export attendance logs: {0}")]
    Export(#[from] crate::attendance::ExportError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Multipart(e) => e.status(),
            ApiError::MissingField(_) | ApiError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::Decode(_) => StatusCode::BAD_REQUEST,
                EngineError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Embed(_) | EngineError::Store(_) | EngineError::Spawn(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Store(_)
            | ApiError::Attendance(_)
            | ApiError::Export(_)
            | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self, "request rejected");
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// Registration failures keep the `registration_status` body shape.
pub struct RegistrationError(pub ApiError);

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        self.0.log();
        let status = self.0.status();
        let body = serde_json::json!({
            "registration_status": status.as_u16(),
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Inner (directly testable) logic
// ============================================================================

/// Fields of an upload form. Unknown fields are ignored.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<Vec<u8>>,
    pub text: Option<String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => form.file = Some(field.bytes().await?.to_vec()),
                "text" => form.text = Some(field.text().await?),
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn image(&mut self) -> Result<Vec<u8>, ApiError> {
        self.file.take().ok_or(ApiError::MissingField("file"))
    }
}

/// Recognize the uploaded face and, on a match, record the attendance event.
pub async fn check_inner(
    state: &AppState,
    image: Vec<u8>,
    direction: Direction,
) -> Result<MatchResponse, ApiError> {
    let result = state.engine.recognize(image).await?;
    if let MatchResult::Matched(identity) = &result {
        state
            .attendance
            .record(identity, direction, Local::now())
            .await
            .map_err(ApiError::Attendance)?;
    }
    Ok(MatchResponse::from(&result))
}

/// Validate the identity and enroll the uploaded face under it.
pub async fn register_inner(
    state: &AppState,
    name: &str,
    image: Vec<u8>,
) -> Result<RegistrationResponse, ApiError> {
    let identity = Identity::parse(name)?;
    state.engine.enroll(identity, image).await?;
    Ok(RegistrationResponse {
        registration_status: StatusCode::OK.as_u16(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": WELCOME_MESSAGE }))
}

async fn login_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MatchResponse>, ApiError> {
    check(state, multipart, Direction::In).await
}

async fn logout_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MatchResponse>, ApiError> {
    check(state, multipart, Direction::Out).await
}

async fn check(
    state: AppState,
    multipart: Multipart,
    direction: Direction,
) -> Result<Json<MatchResponse>, ApiError> {
    let span = tracing::info_span!(
        "check",
        request_id = %Uuid::new_v4(),
        direction = direction.as_str()
    );
    async move {
        let image = UploadForm::read(multipart).await?.image()?;
        check_inner(&state, image, direction).await.map(Json)
    }
    .instrument(span)
    .await
}

async fn register_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RegistrationResponse>, RegistrationError> {
    let span = tracing::info_span!("register", request_id = %Uuid::new_v4());
    async move {
        let mut form = UploadForm::read(multipart).await?;
        let image = form.image()?;
        let name = form.text.take().ok_or(ApiError::MissingField("text"))?;
        register_inner(&state, &name, image).await
    }
    .instrument(span)
    .await
    .map(Json)
    .map_err(RegistrationError)
}

async fn attendance_logs_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let attendance = state.attendance.clone();
    let archive = tokio::task::spawn_blocking(move || attendance.export_zip()).await??;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILE_NAME}\""),
            ),
        ],
        archive,
    )
        .into_response())
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    let enrolled = tokio::task::spawn_blocking(move || store.len()).await??;

    Ok(Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "enrolled": enrolled,
        "comparison": state.engine.comparison(),
    })))
}

async fn users_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    let users = tokio::task::spawn_blocking(move || store.identities()).await??;
    Ok(Json(serde_json::json!({ "users": users })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_statuses() {
        let status = |e: EngineError| ApiError::Engine(e).status();
        assert_eq!(status(EngineError::NoFaceDetected), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(EngineError::ChannelClosed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(EngineError::Decode(presence_core::FrameError::Empty)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(EngineError::Store(presence_core::StoreError::EmptyEmbedding)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_error_statuses() {
        assert_eq!(ApiError::MissingField("file").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InvalidIdentity(IdentityError::Empty).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_match_response_wire_shape() {
        let body = serde_json::to_value(MatchResponse::from(&MatchResult::NoPersonsFound)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "user": "no_persons_found", "match_status": false })
        );
    }
}
