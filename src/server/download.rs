//! Signed download of the original message.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::capability::{LinkClaims, parse_expiry};
use crate::error::CapabilityError;

#[derive(Deserialize)]
pub(super) struct LinkQuery {
    owner: String,
    exp: String,
    sig: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

pub(super) async fn download_email(
    State(state): State<AppState>,
    Path((address_id, message_id)): Path<(String, String)>,
    Query(query): Query<LinkQuery>,
) -> Response {
    let expires_at = match parse_expiry(&query.exp) {
        Ok(exp) => exp,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid link"),
    };
    let claims = LinkClaims {
        owner_id: query.owner,
        address_id,
        message_id,
        expires_at,
    };

    match state.signer.verify(&claims, &query.sig, Utc::now()) {
        Ok(()) => {}
        Err(CapabilityError::Expired) => {
            return error_response(StatusCode::GONE, "Download link expired");
        }
        Err(e) => {
            warn!(message_id = %claims.message_id, error = %e, "Rejected download link");
            return error_response(StatusCode::FORBIDDEN, "Invalid download link");
        }
    }

    // A valid signature still has to match what is stored.
    let db = state.coordinator.db();
    let record = match db.get_record(&claims.message_id).await {
        Ok(Some(record))
            if record.address_id == claims.address_id && record.owner_id == claims.owner_id =>
        {
            record
        }
        Ok(_) => return error_response(StatusCode::NOT_FOUND, "Email not found"),
        Err(e) => {
            warn!(message_id = %claims.message_id, error = %e, "Record lookup failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable");
        }
    };

    let raw = match state.coordinator.raw_source().load(&record.raw_object_ref).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(message_id = %record.message_id, error = %e, "Raw object unavailable");
            return error_response(StatusCode::NOT_FOUND, "Original email no longer available");
        }
    };

    info!(message_id = %record.message_id, owner_id = %record.owner_id, "Serving original email");
    let disposition = format!("attachment; filename=\"{}.eml\"", record.message_id);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "message/rfc822".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        raw,
    )
        .into_response()
}
