//! Paydesk HTTP REST API
//!
//! Axum server exposing the conversation/ticket store over HTTP.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET    /health                         — health check with DB status
//! - GET    /version                        — server version info
//! - GET    /messages?session=              — conversation, oldest first
//! - POST   /messages                       — append a chat turn
//! - PATCH  /messages/read                  — mark a party's messages read
//! - GET    /messages/unread-count          — opposite-party unread count
//! - GET    /tickets?status=                — staff ticket board
//! - POST   /tickets                        — create a top-up request
//! - PATCH  /tickets/{id}                   — staff status/manager update
//! - DELETE /tickets/{id}                   — staff ticket delete
//! - DELETE /conversations/{session}        — staff conversation purge
//! - PATCH  /conversations/{session}/block  — staff block/unblock
//! - POST   /media                          — multipart upload
//! - GET    /media/{name}                   — serve a stored file
//!
//! Staff routes require the `X-Admin-Token` header to match the configured
//! token. This is a shared static secret, not real authentication.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use paydesk_core::api::{
    CreateTicketRequest, PartyQuery, SendMessageRequest, SetBlockedRequest, TicketsQuery,
    UpdateTicketRequest,
};
use paydesk_core::error::{PaydeskError, StoreError};
use paydesk_core::media::{content_type_for, MediaPayload};
use paydesk_core::models::ticket::TicketStatus;
use paydesk_core::PaydeskConfig;

use crate::store::PgStore;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: PgStore,
    pub config: PaydeskConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/messages", get(messages_list_handler).post(messages_create_handler))
        .route("/messages/read", patch(messages_read_handler))
        .route("/messages/unread-count", get(unread_count_handler))
        .route("/tickets", get(tickets_list_handler).post(tickets_create_handler))
        .route(
            "/tickets/:id",
            patch(ticket_update_handler).delete(ticket_delete_handler),
        )
        .route("/conversations/:session", delete(conversation_delete_handler))
        .route("/conversations/:session/block", patch(block_handler))
        .route("/media", post(media_upload_handler))
        .route("/media/:name", get(media_get_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    store: PgStore,
    config: PaydeskConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { store, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Paydesk HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map a store failure onto the wire taxonomy.
pub fn error_response(e: &PaydeskError) -> (StatusCode, serde_json::Value) {
    let status = match e {
        PaydeskError::Store(StoreError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
        PaydeskError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        PaydeskError::Store(StoreError::PayloadTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
        PaydeskError::Store(StoreError::UnsupportedType(_)) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        PaydeskError::Store(StoreError::Transport(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        serde_json::json!({ "error": e.to_string(), "status": "error" }),
    )
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": msg, "status": "error" }),
    )
}

// ============================================================================
// Staff gate
// ============================================================================

/// Shared-token check for staff routes. An empty configured token locks the
/// staff surface entirely.
pub fn staff_authorized(headers: &HeaderMap, config: &PaydeskConfig) -> bool {
    if config.admin.token.is_empty() {
        return false;
    }
    headers
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .map(|token| token == config.admin.token)
        .unwrap_or(false)
}

fn unauthorized() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::UNAUTHORIZED,
        serde_json::json!({ "error": "staff token required", "status": "error" }),
    )
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(store: &PgStore) -> (StatusCode, serde_json::Value) {
    match paydesk_core::db::health_check(store.pool()).await {
        Ok(version) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "paydesk/1",
    })
}

pub async fn messages_list_inner(
    store: &PgStore,
    session: &str,
) -> (StatusCode, serde_json::Value) {
    if session.trim().is_empty() {
        return bad_request("session is required");
    }
    match store.list_messages(session).await {
        Ok(messages) => (StatusCode::OK, serde_json::json!({ "messages": messages })),
        Err(e) => error_response(&e),
    }
}

pub async fn messages_create_inner(
    store: &PgStore,
    req: SendMessageRequest,
) -> (StatusCode, serde_json::Value) {
    if req.session.trim().is_empty() {
        return bad_request("session is required");
    }
    if req.message.trim().is_empty() && req.image_url.is_none() {
        return bad_request("message or image required");
    }
    match store.send_message(&req).await {
        Ok(message) => (
            StatusCode::CREATED,
            serde_json::to_value(message).unwrap_or_default(),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn messages_read_inner(
    store: &PgStore,
    query: &PartyQuery,
) -> (StatusCode, serde_json::Value) {
    match store.mark_read(&query.session, query.as_staff).await {
        Ok(()) => (StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => error_response(&e),
    }
}

pub async fn unread_count_inner(
    store: &PgStore,
    query: &PartyQuery,
) -> (StatusCode, serde_json::Value) {
    match store.unread_count(&query.session, query.as_staff).await {
        Ok(count) => (StatusCode::OK, serde_json::json!({ "count": count })),
        Err(e) => error_response(&e),
    }
}

pub async fn tickets_list_inner(
    store: &PgStore,
    filter: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let status = match filter {
        Some(raw) => match TicketStatus::parse(raw) {
            Ok(status) => Some(status),
            Err(e) => return bad_request(&e),
        },
        None => None,
    };
    match store.list_tickets(status.as_ref()).await {
        Ok(tickets) => (StatusCode::OK, serde_json::json!({ "tickets": tickets })),
        Err(e) => error_response(&e),
    }
}

pub async fn tickets_create_inner(
    store: &PgStore,
    req: CreateTicketRequest,
) -> (StatusCode, serde_json::Value) {
    if req.session.trim().is_empty() || req.amount.trim().is_empty() {
        return bad_request("session and amount are required");
    }
    match store
        .create_ticket(&req.session, &req.amount, req.name.as_deref())
        .await
    {
        Ok(ticket) => (
            StatusCode::CREATED,
            serde_json::to_value(ticket).unwrap_or_default(),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn ticket_update_inner(
    store: &PgStore,
    id: i64,
    req: UpdateTicketRequest,
) -> (StatusCode, serde_json::Value) {
    if req.status.is_none() && req.manager.is_none() {
        return bad_request("no fields to update");
    }

    let mut updated = None;
    if let Some(status) = &req.status {
        match store.update_ticket_status(id, status).await {
            Ok(ticket) => updated = Some(ticket),
            Err(e) => return error_response(&e),
        }
    }
    if let Some(manager) = &req.manager {
        match store.update_ticket_manager(id, manager.as_deref()).await {
            Ok(ticket) => updated = Some(ticket),
            Err(e) => return error_response(&e),
        }
    }

    match updated {
        Some(ticket) => (
            StatusCode::OK,
            serde_json::to_value(ticket).unwrap_or_default(),
        ),
        None => bad_request("no fields to update"),
    }
}

pub async fn ticket_delete_inner(store: &PgStore, id: i64) -> (StatusCode, serde_json::Value) {
    match store.delete_ticket(id).await {
        Ok(()) => (StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => error_response(&e),
    }
}

pub async fn conversation_delete_inner(
    store: &PgStore,
    session: &str,
) -> (StatusCode, serde_json::Value) {
    match store.delete_conversation(session).await {
        Ok(()) => (StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => error_response(&e),
    }
}

pub async fn block_inner(
    store: &PgStore,
    session: &str,
    blocked: bool,
) -> (StatusCode, serde_json::Value) {
    match store.set_blocked(session, blocked).await {
        Ok(()) => (StatusCode::NO_CONTENT, serde_json::json!({})),
        Err(e) => error_response(&e),
    }
}

/// Inner media upload — validates, writes under the media dir, returns the
/// public URL. Validation failures never touch the disk.
pub async fn media_upload_inner(
    config: &PaydeskConfig,
    file_name: &str,
    bytes: Vec<u8>,
) -> (StatusCode, serde_json::Value) {
    let payload = match MediaPayload::from_file_name(file_name, bytes) {
        Ok(payload) => payload,
        Err(e) => return error_response(&PaydeskError::Store(e)),
    };

    let ext = payload
        .file_name
        .rsplit('.')
        .next()
        .unwrap_or("bin")
        .to_ascii_lowercase();
    let stored_name = format!("{}.{}", Uuid::new_v4(), ext);
    let dir = media_dir(config);

    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        return error_response(&PaydeskError::Io(e));
    }
    if let Err(e) = tokio::fs::write(dir.join(&stored_name), &payload.bytes).await {
        return error_response(&PaydeskError::Io(e));
    }

    let url = format!(
        "{}/media/{}",
        config.http.public_base_url.trim_end_matches('/'),
        stored_name
    );
    (StatusCode::CREATED, serde_json::json!({ "url": url }))
}

fn media_dir(config: &PaydeskConfig) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&config.media.dir).into_owned())
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.store).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn messages_list_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<paydesk_core::api::SessionQuery>,
) -> impl IntoResponse {
    let (status, body) = messages_list_inner(&state.store, &query.session).await;
    (status, Json(body))
}

pub async fn messages_create_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    // Staff-authored sends carry the staff token; customers need none.
    if req.is_admin && !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = messages_create_inner(&state.store, req).await;
    (status, Json(body))
}

pub async fn messages_read_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<PartyQuery>,
) -> impl IntoResponse {
    let (status, body) = messages_read_inner(&state.store, &query).await;
    (status, Json(body))
}

pub async fn unread_count_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<PartyQuery>,
) -> impl IntoResponse {
    let (status, body) = unread_count_inner(&state.store, &query).await;
    (status, Json(body))
}

pub async fn tickets_list_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(query): Query<TicketsQuery>,
) -> impl IntoResponse {
    if !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = tickets_list_inner(&state.store, query.status.as_deref()).await;
    (status, Json(body))
}

pub async fn tickets_create_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<CreateTicketRequest>,
) -> impl IntoResponse {
    let (status, body) = tickets_create_inner(&state.store, req).await;
    (status, Json(body))
}

pub async fn ticket_update_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<UpdateTicketRequest>,
) -> impl IntoResponse {
    if !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = ticket_update_inner(&state.store, id, req).await;
    (status, Json(body))
}

pub async fn ticket_delete_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = ticket_delete_inner(&state.store, id).await;
    (status, Json(body))
}

pub async fn conversation_delete_handler(
    State(state): State<Arc<HttpState>>,
    Path(session): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = conversation_delete_inner(&state.store, &session).await;
    (status, Json(body))
}

pub async fn block_handler(
    State(state): State<Arc<HttpState>>,
    Path(session): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SetBlockedRequest>,
) -> impl IntoResponse {
    if !staff_authorized(&headers, &state.config) {
        let (status, body) = unauthorized();
        return (status, Json(body));
    }
    let (status, body) = block_inner(&state.store, &session, req.blocked).await;
    (status, Json(body))
}

pub async fn media_upload_handler(
    State(state): State<Arc<HttpState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.bin").to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                let (status, body) = bad_request(&format!("multipart read failed: {}", e));
                return (status, Json(body));
            }
        };
        let (status, body) = media_upload_inner(&state.config, &file_name, bytes).await;
        return (status, Json(body));
    }
    let (status, body) = bad_request("multipart field 'file' required");
    (status, Json(body))
}

pub async fn media_get_handler(
    State(state): State<Arc<HttpState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    // Stored names are uuid.ext; anything else is not ours to serve.
    if name.contains('/') || name.contains("..") {
        return (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new());
    }
    let path = media_dir(&state.config).join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = content_type_for(&name).parse() {
                headers.insert(axum::http::header::CONTENT_TYPE, value);
            }
            (StatusCode::OK, headers, bytes)
        }
        Err(_) => (StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new()),
    }
}

// ============================================================================
// Unit Tests — pure pieces; DB-backed paths live in tests/http_integration.rs
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use paydesk_core::config::{
        AdminConfig, DatabaseConfig, HttpConfig, MediaConfig, NotifyConfig, ServiceConfig,
    };

    fn test_config(token: &str) -> PaydeskConfig {
        PaydeskConfig {
            service: ServiceConfig {
                log_level: "info".to_string(),
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/paydesk".to_string(),
                max_connections: 5,
            },
            http: HttpConfig::default(),
            admin: AdminConfig {
                token: token.to_string(),
            },
            notify: NotifyConfig::default(),
            media: MediaConfig {
                // One directory per test, so parallel tests cannot interfere.
                dir: std::env::temp_dir()
                    .join(format!("paydesk-http-test-media-{}", Uuid::new_v4()))
                    .to_string_lossy()
                    .into_owned(),
            },
        }
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "paydesk/1");
    }

    #[test]
    fn test_error_response_mapping() {
        let cases = [
            (
                StoreError::RateLimited("limit".to_string()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                StoreError::NotFound("ticket 1".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                StoreError::PayloadTooLarge("big".to_string()),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                StoreError::UnsupportedType("exe".to_string()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                StoreError::Transport("down".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            let (status, body) = error_response(&PaydeskError::Store(err));
            assert_eq!(status, expected);
            assert_eq!(body["status"], "error");
            assert!(body["error"].is_string());
        }
    }

    #[test]
    fn test_staff_token_matching() {
        let config = test_config("sekrit");

        let mut headers = HeaderMap::new();
        assert!(!staff_authorized(&headers, &config), "missing header");

        headers.insert("X-Admin-Token", "wrong".parse().unwrap());
        assert!(!staff_authorized(&headers, &config), "wrong token");

        headers.insert("X-Admin-Token", "sekrit".parse().unwrap());
        assert!(staff_authorized(&headers, &config));
    }

    #[test]
    fn test_empty_configured_token_locks_staff_routes() {
        let config = test_config("");
        let mut headers = HeaderMap::new();
        headers.insert("X-Admin-Token", "".parse().unwrap());
        assert!(!staff_authorized(&headers, &config));
    }

    #[tokio::test]
    async fn test_media_upload_inner_rejects_unsupported_type() {
        let config = test_config("t");
        let (status, body) = media_upload_inner(&config, "malware.exe", vec![1, 2, 3]).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_media_upload_inner_rejects_oversized_before_write() {
        let config = test_config("t");
        let dir = media_dir(&config);
        tokio::fs::remove_dir_all(&dir).await.ok();

        let oversized = vec![0u8; paydesk_core::media::IMAGE_MAX_BYTES + 1];
        let (status, _) = media_upload_inner(&config, "big.png", oversized).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(
            tokio::fs::metadata(&dir).await.is_err(),
            "nothing may be written for an invalid upload"
        );
    }

    #[tokio::test]
    async fn test_media_upload_inner_stores_and_returns_url() {
        let config = test_config("t");
        let (status, body) = media_upload_inner(&config, "receipt.pdf", vec![1, 2, 3]).await;
        assert_eq!(status, StatusCode::CREATED);
        let url = body["url"].as_str().unwrap();
        assert!(url.contains("/media/"));
        assert!(url.ends_with(".pdf"));

        let name = url.rsplit('/').next().unwrap();
        let stored = tokio::fs::read(media_dir(&config).join(name)).await.unwrap();
        assert_eq!(stored, vec![1, 2, 3]);
        tokio::fs::remove_dir_all(media_dir(&config)).await.ok();
    }
}
