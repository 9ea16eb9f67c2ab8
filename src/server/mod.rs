//! HTTP surface: Telegram webhook, raw-object intake, downloads, health.

mod download;
pub mod webhook;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::SecretString;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::capability::LinkSigner;
use crate::notify::Messenger;
use crate::pipeline::{PipelineCoordinator, RawObjectEvent, RawObjectOutcome};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<PipelineCoordinator>,
    /// Used for command replies and callback acknowledgements.
    pub messenger: Arc<dyn Messenger>,
    /// Checks download links.
    pub signer: LinkSigner,
    pub mail_domain: String,
    /// When set, webhook calls must carry it in
    /// `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: Option<SecretString>,
}

/// Build the Axum router with every relay route.
pub fn relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(webhook::telegram_webhook))
        .route("/events/raw-object", post(raw_object_event))
        .route("/email/{address_id}/{message_id}", get(download::download_email))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "inbox-relay"
    }))
}

// ── Raw-object intake ───────────────────────────────────────────────────

/// Trigger A. Infrastructure faults answer 503 so the sender retries.
async fn raw_object_event(
    State(state): State<AppState>,
    Json(event): Json<RawObjectEvent>,
) -> impl IntoResponse {
    match state.coordinator.handle_raw_object(&event).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome_body(&outcome))),
        Err(e) => {
            error!(raw_ref = %event.raw_ref, error = %e, "Raw object intake failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

fn outcome_body(outcome: &RawObjectOutcome) -> serde_json::Value {
    match outcome {
        RawObjectOutcome::Recorded { message_id } => {
            json!({"status": "recorded", "message_id": message_id})
        }
        RawObjectOutcome::Duplicate { message_id } => {
            json!({"status": "duplicate", "message_id": message_id})
        }
        RawObjectOutcome::UnknownAddress { address_id } => {
            json!({"status": "unknown_address", "address_id": address_id})
        }
        RawObjectOutcome::Unparseable(e) => {
            json!({"status": "unparseable", "reason": e.to_string()})
        }
    }
}
