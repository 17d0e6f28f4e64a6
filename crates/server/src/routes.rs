//! HTTP API routes
//!
//! Link management, redemption, the orchestrated issue flow and the access
//! admin surface. Handlers answer with plain JSON status bodies.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use peerlink_common::config::ServiceConfig;
use peerlink_common::{now_epoch_ms, Database, Error};
use peerlink_ledger::{AccessLedger, LinkLedger, RedeemOutcome};
use peerlink_panel::{wgconfig, CreatePeerOptions, PanelClient};

/// Shared handler state
pub struct AppState {
    pub config: ServiceConfig,
    pub links: LinkLedger,
    pub access: AccessLedger,
    pub panel: PanelClient,
}

impl AppState {
    pub fn new(config: ServiceConfig, db: Database) -> peerlink_common::Result<Self> {
        let links = LinkLedger::new(db.clone(), config.links.link_domain.clone());
        links.init_schema()?;

        let access = AccessLedger::new(
            db,
            config.auth.mode,
            config.auth.admin_ids.clone(),
            config.auth.allowed_user_ids.clone(),
        );
        access.init_schema()?;

        let panel = PanelClient::new(config.panel.clone())?;

        Ok(Self {
            config,
            links,
            access,
            panel,
        })
    }

    fn normalize_options(&self) -> wgconfig::NormalizeOptions {
        wgconfig::NormalizeOptions {
            endpoint: self.config.panel.endpoint.clone(),
            allowed_ips: Some(self.config.panel.endpoint_allowed_ip.clone()),
            dns: Some(self.config.panel.dns.clone()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Links
        .route("/api/links", post(create_link_handler).get(list_links_handler))
        .route(
            "/api/links/:id",
            get(get_link_handler).delete(delete_link_handler),
        )
        // Redemption
        .route("/download/:id", get(download_handler))
        // Orchestrated issue flow
        .route("/api/issue", post(issue_handler))
        // Access admin surface
        .route(
            "/api/access/requests",
            post(request_access_handler).get(pending_requests_handler),
        )
        .route("/api/access/approve", post(approve_handler))
        .route("/api/access/reject", post(reject_handler))
        .route("/api/access/revoke", post(revoke_handler))
        .route("/api/access/stats", get(stats_handler))
        .with_state(state)
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateLinkRequest {
    peer_id: String,
    expiry_hours: Option<i64>,
    max_usage: Option<i64>,
    user_id: Option<i64>,
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListLinksQuery {
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IssueRequest {
    user_id: i64,
    name: Option<String>,
    expiry_hours: Option<i64>,
    max_usage: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccessRequestBody {
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    user_id: i64,
    admin_id: i64,
    notes: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(e: Error) -> Response {
    warn!("Request failed: {}", e);
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "peerlink",
        "version": peerlink_common::VERSION,
        "timestamp": now_epoch_ms(),
    }))
}

async fn create_link_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLinkRequest>,
) -> Response {
    let peer_id = req.peer_id.trim();
    if peer_id.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "peer_id is required");
    }

    if state.panel.get_peer_by_id(peer_id).await.is_none() {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("peer {} not found on the panel", peer_id),
        );
    }

    let expiry_hours = req
        .expiry_hours
        .unwrap_or(state.config.links.default_expiry_hours);
    let max_usage = req.max_usage.unwrap_or(state.config.links.default_max_usage);

    match state.links.create_link(
        peer_id,
        expiry_hours,
        max_usage,
        req.user_id,
        req.created_by.as_deref(),
    ) {
        Ok(link) => (StatusCode::CREATED, Json(link)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_links_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLinksQuery>,
) -> Response {
    match state.links.list_active(query.user_id) {
        Ok(links) => Json(json!({ "links": links })).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_link_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let link = match state.links.get_link(&id) {
        Ok(Some(link)) => link,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "link not found"),
        Err(e) => return internal_error(e),
    };

    if !link.is_active {
        return error_body(StatusCode::NOT_FOUND, "link not found");
    }
    if now_epoch_ms() > link.expires_at {
        let _ = state.links.deactivate_link(&id);
        return error_body(StatusCode::GONE, "link expired");
    }
    if link.usage_count >= link.max_usage_count {
        let _ = state.links.deactivate_link(&id);
        return error_body(StatusCode::GONE, "link quota exhausted");
    }

    Json(link).into_response()
}

async fn delete_link_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.links.deactivate_link(&id) {
        Ok(true) => Json(json!({ "deactivated": true })).into_response(),
        Ok(false) => error_body(StatusCode::NOT_FOUND, "link not found"),
        Err(e) => internal_error(e),
    }
}

/// Redeem a link and serve the peer's configuration.
///
/// The upstream fetch happens before the use is counted, so a transient
/// panel failure leaves the quota unspent. Serving is still gated on the
/// atomic redeem outcome, which settles racing redemptions.
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let link = match state.links.get_link(&id) {
        Ok(Some(link)) => link,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "link not found"),
        Err(e) => return internal_error(e),
    };

    if !link.is_active {
        return error_body(StatusCode::NOT_FOUND, "link not found");
    }
    if now_epoch_ms() > link.expires_at {
        let _ = state.links.deactivate_link(&id);
        return error_body(StatusCode::GONE, "link expired");
    }
    if link.usage_count >= link.max_usage_count {
        let _ = state.links.deactivate_link(&id);
        return error_body(StatusCode::GONE, "link quota exhausted");
    }

    let raw = match state.panel.download_peer_config(&link.peer_id).await {
        Some(raw) => raw,
        None => {
            return error_body(
                StatusCode::BAD_GATEWAY,
                "configuration unavailable from the panel",
            )
        }
    };

    let Some(config) = wgconfig::normalize(&raw, &state.normalize_options()) else {
        warn!("Panel returned non-client config for peer {}", link.peer_id);
        return error_body(
            StatusCode::BAD_GATEWAY,
            "configuration unavailable from the panel",
        );
    };

    let outcome = match state
        .links
        .redeem(&id, client_ip(&headers).as_deref(), user_agent(&headers).as_deref())
    {
        Ok(outcome) => outcome,
        Err(e) => return internal_error(e),
    };

    let link = match outcome {
        RedeemOutcome::Redeemed(link) => link,
        RedeemOutcome::NotFound => return error_body(StatusCode::NOT_FOUND, "link not found"),
        RedeemOutcome::Expired => return error_body(StatusCode::GONE, "link expired"),
        RedeemOutcome::UsageExceeded => {
            return error_body(StatusCode::GONE, "link quota exhausted")
        }
    };

    info!("Link {} redeemed for peer {}", link.id, link.peer_id);

    let filename = format!("{}.conf", state.config.panel.config_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        config,
    )
        .into_response()
}

/// Full issue flow: access gate, peer creation, config retrieval,
/// normalization, link minting.
async fn issue_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueRequest>,
) -> Response {
    match state.access.can_get_config(req.user_id) {
        Ok(true) => {}
        Ok(false) => return error_body(StatusCode::FORBIDDEN, "access denied"),
        Err(e) => return internal_error(e),
    }

    let name = req
        .name
        .clone()
        .unwrap_or_else(|| format!("User_{}", req.user_id));

    let Some(peer) = state
        .panel
        .create_peer(CreatePeerOptions {
            name: Some(name),
            ..Default::default()
        })
        .await
    else {
        return error_body(StatusCode::BAD_GATEWAY, "peer creation failed");
    };

    let raw = if peer.config.trim().is_empty() {
        match state.panel.download_peer_config(&peer.id).await {
            Some(raw) => raw,
            None => {
                return error_body(
                    StatusCode::BAD_GATEWAY,
                    "configuration unavailable from the panel",
                )
            }
        }
    } else {
        peer.config.clone()
    };

    let Some(config) = wgconfig::normalize(&raw, &state.normalize_options()) else {
        warn!("Panel returned non-client config for peer {}", peer.id);
        return error_body(
            StatusCode::BAD_GATEWAY,
            "configuration unavailable from the panel",
        );
    };

    let link = match state.links.create_link(
        &peer.id,
        req.expiry_hours
            .unwrap_or(state.config.links.default_expiry_hours),
        req.max_usage.unwrap_or(state.config.links.default_max_usage),
        Some(req.user_id),
        Some("issue"),
    ) {
        Ok(link) => link,
        Err(e) => return internal_error(e),
    };

    info!("Issued peer {} with link {} to user {}", peer.id, link.id, req.user_id);

    (
        StatusCode::CREATED,
        Json(json!({ "peer": peer, "link": link, "config": config })),
    )
        .into_response()
}

// ============================================================================
// Access admin handlers
// ============================================================================

async fn request_access_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccessRequestBody>,
) -> Response {
    match state.access.request_access(
        req.user_id,
        req.username.as_deref(),
        req.first_name.as_deref(),
        req.last_name.as_deref(),
    ) {
        Ok(request) => (StatusCode::CREATED, Json(request)).into_response(),
        Err(Error::AlreadyApproved) => {
            error_body(StatusCode::CONFLICT, "user is already approved")
        }
        Err(Error::RequestAlreadyPending) => {
            error_body(StatusCode::CONFLICT, "request already pending")
        }
        Err(e) => internal_error(e),
    }
}

async fn pending_requests_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.access.get_pending_requests() {
        Ok(requests) => Json(json!({ "requests": requests })).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    if !state.access.is_admin(req.admin_id) {
        return error_body(StatusCode::FORBIDDEN, "admin access required");
    }
    match state
        .access
        .approve_user(req.user_id, req.admin_id, req.notes.as_deref())
    {
        Ok(true) => Json(json!({ "approved": true })).into_response(),
        Ok(false) => error_body(StatusCode::CONFLICT, "no pending request for user"),
        Err(e) => internal_error(e),
    }
}

async fn reject_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    if !state.access.is_admin(req.admin_id) {
        return error_body(StatusCode::FORBIDDEN, "admin access required");
    }
    match state
        .access
        .reject_user(req.user_id, req.admin_id, req.notes.as_deref())
    {
        Ok(true) => Json(json!({ "rejected": true })).into_response(),
        Ok(false) => error_body(StatusCode::NOT_FOUND, "no request for user"),
        Err(e) => internal_error(e),
    }
}

async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    if !state.access.is_admin(req.admin_id) {
        return error_body(StatusCode::FORBIDDEN, "admin access required");
    }
    match state.access.revoke_access(req.user_id, req.admin_id) {
        Ok(true) => Json(json!({ "revoked": true })).into_response(),
        Ok(false) => error_body(StatusCode::NOT_FOUND, "user has no grant"),
        Err(e) => internal_error(e),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.access.get_auth_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}
