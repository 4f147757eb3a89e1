use axum::extract::Extension;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::ApiError;
use crate::session::{Identity, PendingCredential, SessionManager, SessionStatus};

pub async fn health(Extension(session): Extension<SessionManager>) -> Json<Value> {
    let status = session.status().await.status;
    Json(json!({ "status": "ok", "whatsapp": status }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub status: SessionStatus,
    pub qr: Option<String>,
    pub pairing_code: Option<String>,
    pub info: Option<Identity>,
    pub updated_at: DateTime<Utc>,
    pub last_disconnect_reason: Option<String>,
}

pub async fn status(Extension(session): Extension<SessionManager>) -> Json<StatusBody> {
    let snapshot = session.status().await;
    let (qr, pairing_code) = match snapshot.pending {
        Some(PendingCredential::Qr(qr)) => (Some(qr), None),
        Some(PendingCredential::PairingCode(code)) => (None, Some(code)),
        None => (None, None),
    };
    Json(StatusBody {
        status: snapshot.status,
        qr,
        pairing_code,
        info: snapshot.identity,
        updated_at: snapshot.updated_at,
        last_disconnect_reason: snapshot.last_disconnect_reason,
    })
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    phone: Option<String>,
}

pub async fn pair(
    Extension(session): Extension<SessionManager>,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let phone = body
        .ok()
        .and_then(|Json(req)| req.phone)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Phone number required".to_string()))?;

    let code = session.request_pairing_code(&phone).await?;
    Ok(Json(json!({ "success": true, "code": code })))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    phone: Option<String>,
    message: Option<String>,
}

pub async fn send(
    Extension(session): Extension<SessionManager>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Some((phone, message)) = body
        .ok()
        .and_then(|Json(req)| req.phone.zip(req.message))
        .filter(|(phone, _)| !phone.trim().is_empty())
    else {
        return Err(ApiError::BadRequest("Phone and message required".to_string()));
    };

    session.send_message(&phone, &message).await?;
    info!("📤 Sent message to {}", phone);
    Ok(Json(json!({ "success": true })))
}

pub async fn logout(
    Extension(session): Extension<SessionManager>,
) -> Result<Json<Value>, ApiError> {
    session.logout().await?;
    Ok(Json(json!({ "success": true })))
}
