//! HTTP receiver for Messenger webhooks.
//!
//! Serves the subscription handshake and the signed event callback. Bodies
//! are acknowledged once authenticated and the envelope parses; each
//! messaging item is then decoded and handled on its own task, so a malformed
//! item only loses itself.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::events::WebhookPayload;
use crate::incoming::IncomingProcessor;

type HmacSha256 = Hmac<Sha256>;

/// Max webhook payload size: 1 MB.
const WEBHOOK_MAX_BODY: usize = 1_048_576;

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

#[derive(Clone)]
pub struct WebhookState {
    processor: Arc<IncomingProcessor>,
    verify_token: Arc<str>,
    app_secret: Arc<str>,
}

impl WebhookState {
    pub fn new(processor: Arc<IncomingProcessor>, verify_token: &str, app_secret: &str) -> Self {
        Self {
            processor,
            verify_token: Arc::from(verify_token),
            app_secret: Arc::from(app_secret),
        }
    }
}

/// Build the webhook router with the callback mounted at `path`.
pub fn build_router(path: &str, state: WebhookState) -> Router {
    Router::new()
        .route(path, get(verify_handler).post(events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// GET <path>: subscription verification handshake.
async fn verify_handler(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    let token_ok = match token {
        Some(token) if !state.verify_token.is_empty() => {
            bool::from(token.as_bytes().ct_eq(state.verify_token.as_bytes()))
        }
        _ => false,
    };

    if mode == Some("subscribe") && token_ok {
        info!("webhook subscription verified");
        (StatusCode::OK, challenge).into_response()
    } else {
        warn!("webhook verification failed: mode={:?}", mode);
        StatusCode::FORBIDDEN.into_response()
    }
}

/// POST <path>: signed event delivery.
async fn events_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.len() > WEBHOOK_MAX_BODY {
        warn!("webhook payload too large ({} bytes)", body.len());
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    if !state.app_secret.is_empty() {
        let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
            warn!("webhook: missing {} header", SIGNATURE_HEADER);
            return StatusCode::FORBIDDEN.into_response();
        };
        if !validate_signature(&state.app_secret, signature, &body) {
            warn!("webhook: invalid signature");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("webhook: malformed body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if payload.object != "page" {
        debug!("webhook: ignoring object={}", payload.object);
        return StatusCode::NOT_FOUND.into_response();
    }

    tokio::spawn(state.processor.clone().process_payload(payload));

    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

/// Check an `X-Hub-Signature-256` value against the HMAC-SHA256 of `body`.
pub(crate) fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let Some(sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

/// Bind and serve the webhook. The returned handle completes when the server
/// stops.
pub async fn start(
    host: &str,
    port: u16,
    path: &str,
    state: WebhookState,
) -> Result<tokio::task::JoinHandle<()>> {
    if state.app_secret.is_empty() {
        warn!("webhook appSecret is empty, event signatures will NOT be checked");
    }

    let app = build_router(path, state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("webhook listening on http://{}{}", addr, path);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("webhook server error: {}", e);
        }
    });

    Ok(handle)
}
