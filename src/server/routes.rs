//! HTTP routes.
//!
//! Handlers translate between JSON/multipart bodies and the exchange and file
//! services. Every error becomes one fixed status and a generic `detail`
//! message; the underlying error text only reaches the audit trail.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::audit::{AuditEvent, AuditEventType, RequestContext};
use crate::error::Error;
use crate::exchange::{CompleteRequest, InitResponse};
use crate::files::UploadReceipt;
use crate::server::AppState;

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// User id recorded when a file request names none.
const ANONYMOUS_USER: &str = "anonymous";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .files
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_report))
        .route("/api/key-exchange/init", post(init_key_exchange))
        .route("/api/key-exchange/complete", post(complete_key_exchange))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files/download/:filename", get(download_file))
        .route("/api/files/list", get(list_files))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Failure returned by a handler.
#[derive(Debug)]
pub enum ApiError {
    /// A service error
    Service(Error),
    /// Too many init requests from one client
    RateLimited(Duration),
    /// Multipart body could not be read
    Multipart(MultipartError),
    /// Required form field absent
    MissingField(&'static str),
    /// JSON body or query string could not be decoded
    Rejected,
    /// Blocking task died
    Internal,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Service(e)
    }
}

impl ApiError {
    /// Status code and client-facing message.
    pub fn status_and_detail(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Service(e) => match e {
                Error::NotFound => (StatusCode::NOT_FOUND, "Session not found"),
                Error::Expired => (StatusCode::CONFLICT, "Session expired"),
                Error::AlreadyCompleted => {
                    (StatusCode::CONFLICT, "Key exchange already completed")
                }
                Error::InvalidPeerKey(_) => (StatusCode::BAD_REQUEST, "Invalid public key"),
                Error::Encoding(_) => (StatusCode::BAD_REQUEST, "Malformed public key"),
                Error::Generation(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Key exchange initialization failed",
                ),
                Error::Capacity(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Too many pending key exchanges",
                ),
                Error::ChannelNotFound => (
                    StatusCode::NOT_FOUND,
                    "No secure channel for this session",
                ),
                Error::FileNotFound(_) => (StatusCode::NOT_FOUND, "File not found"),
                Error::InvalidFileName(_) => (StatusCode::BAD_REQUEST, "Invalid file name"),
                Error::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
                Error::Crypto(_) => (
                    StatusCode::FORBIDDEN,
                    "File cannot be opened with this session",
                ),
                Error::Buffer { .. }
                | Error::Storage(_)
                | Error::Config(_)
                | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            },
            ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "Too many requests"),
            ApiError::Multipart(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "File too large")
            }
            ApiError::Multipart(_) => (StatusCode::BAD_REQUEST, "Malformed upload"),
            ApiError::MissingField(_) => (StatusCode::BAD_REQUEST, "Missing form field"),
            ApiError::Rejected => (StatusCode::BAD_REQUEST, "Malformed request"),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        let mut response = (status, Json(json!({ "detail": detail }))).into_response();

        if let ApiError::RateLimited(retry_after) = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

fn client_ip(connect: &Option<ConnectInfo<SocketAddr>>) -> IpAddr {
    connect
        .as_ref()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn context(connect: &Option<ConnectInfo<SocketAddr>>, user_id: Option<String>) -> RequestContext {
    let mut ctx = RequestContext::anonymous();
    if let Some(ConnectInfo(addr)) = connect {
        ctx = ctx.with_ip(addr.ip());
    }
    ctx.with_user(user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string()))
}

/// Audit an undecodable request; the extractor's text stays server-side.
fn rejected(
    state: &AppState,
    ctx: &RequestContext,
    event_type: AuditEventType,
    reason: String,
) -> ApiError {
    state.audit.record(
        AuditEvent::new(event_type, ctx, false)
            .with_details(format!("malformed request: {}", reason)),
    );
    ApiError::Rejected
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to SecureFileXchange API" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_report(State(state): State<AppState>) -> String {
    state.metrics.format_report(
        state.exchange.store().count(),
        state.exchange.channels().count(),
    )
}

async fn init_key_exchange(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> Result<(StatusCode, Json<InitResponse>), ApiError> {
    state.metrics.increment_requests();

    if !state.rate_limiter.check(&client_ip(&connect)) {
        state.metrics.increment_rate_limited();
        tracing::debug!("Rate limited key exchange init");
        return Err(ApiError::RateLimited(state.rate_limiter.retry_after()));
    }

    if let Some(report) = state.exchange.reclaim_capacity() {
        state.metrics.add_expired(report.expired_sessions as u64);
    }

    let ctx = context(&connect, None);
    match state.exchange.init(&ctx).await {
        Ok(response) => {
            state.metrics.increment_initiated();
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            if matches!(e, Error::Generation(_)) {
                state.metrics.increment_generation_failures();
            }
            Err(e.into())
        }
    }
}

async fn complete_key_exchange(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.increment_requests();
    let ctx = context(&connect, None);

    let Json(request) = payload.map_err(|rejection| {
        state.metrics.increment_failed();
        rejected(
            &state,
            &ctx,
            AuditEventType::KeyExchangeCompleteFailure,
            rejection.body_text(),
        )
    })?;

    // Modular exponentiation over a 2048-bit modulus stays off the async workers
    let exchange = Arc::clone(&state.exchange);
    let result = tokio::task::spawn_blocking(move || exchange.complete(&ctx, &request))
        .await
        .map_err(|e| {
            tracing::error!("Key exchange completion task failed: {}", e);
            ApiError::Internal
        })?;

    match result {
        Ok(()) => {
            state.metrics.increment_completed();
            Ok(Json(json!({
                "status": "success",
                "message": "Key exchange completed successfully",
            })))
        }
        Err(e) => {
            state.metrics.increment_failed();
            Err(e.into())
        }
    }
}

async fn upload_file(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, ApiError> {
    state.metrics.increment_requests();

    let mut file = None;
    let mut session_id = None;
    let mut user_id = None;

    while let Some(field) = multipart.next_field().await.map_err(ApiError::Multipart)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let data = field.bytes().await.map_err(ApiError::Multipart)?;
                file = Some((filename, data));
            }
            Some("session_id") => {
                session_id = Some(field.text().await.map_err(ApiError::Multipart)?);
            }
            Some("user_id") => {
                user_id = Some(field.text().await.map_err(ApiError::Multipart)?);
            }
            _ => {}
        }
    }

    let (filename, data) = file.ok_or(ApiError::MissingField("file"))?;
    let session_id = session_id.ok_or(ApiError::MissingField("session_id"))?;
    let ctx = context(&connect, user_id);

    let receipt = state
        .files
        .upload(&ctx, &session_id, &filename, &data)
        .await?;
    state.metrics.record_upload(data.len() as u64);
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    session_id: String,
    user_id: Option<String>,
}

async fn download_file(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Path(filename): Path<String>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    state.metrics.increment_requests();
    let Query(query) = query.map_err(|rejection| {
        let ctx = context(&connect, None);
        rejected(&state, &ctx, AuditEventType::FileDownload, rejection.body_text())
    })?;
    let ctx = context(&connect, query.user_id);

    let bytes = state
        .files
        .download(&ctx, &query.session_id, &filename)
        .await?;
    state.metrics.record_download(bytes.len() as u64);

    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: Option<String>,
}

async fn list_files(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.increment_requests();
    let Query(query) = query.map_err(|rejection| {
        let ctx = context(&connect, None);
        rejected(&state, &ctx, AuditEventType::FileList, rejection.body_text())
    })?;
    let ctx = context(&connect, query.user_id);

    let files = state.files.list(&ctx).await?;
    Ok(Json(json!({ "files": files })))
}
