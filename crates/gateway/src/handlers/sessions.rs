//! Session handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::require_admin_of;
use crate::AppState;
use attendance_common::{
    auth::AuthContext,
    db::models::Session,
    errors::Result,
};
use attendance_engine::{AdHocSession, QrCodec, SessionAttendance};

/// QR payload response
#[derive(Serialize)]
pub struct QrResponse {
    pub payload: String,
    pub deep_link: String,
}

impl QrResponse {
    pub fn new(payload: String) -> Self {
        Self {
            deep_link: QrCodec::deep_link(&payload),
            payload,
        }
    }
}

/// Create an ad-hoc session in the caller's organization
pub async fn create_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<AdHocSession>,
) -> Result<(StatusCode, Json<Session>)> {
    auth.require_admin()?;
    let session = state.engine.sessions().create(auth.organization_id, request).await?;

    tracing::info!(
        session_id = %session.id,
        organization_id = %auth.organization_id,
        "Session created"
    );

    Ok((StatusCode::CREATED, Json(session)))
}

/// Get session state
pub async fn get_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>> {
    let session = state.engine.sessions().get(session_id).await?;
    auth.require_organization(session.organization_id)?;
    Ok(Json(session))
}

/// Session state with its attendee list, for live dashboards
pub async fn get_attendance(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionAttendance>> {
    let attendance = state.engine.reports().session_attendance(session_id).await?;
    require_admin_of(&auth, attendance.session.organization_id)?;
    Ok(Json(attendance))
}

/// Close a session now
pub async fn close_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>> {
    let session = state.engine.sessions().get(session_id).await?;
    require_admin_of(&auth, session.organization_id)?;
    let session = state.engine.sessions().close(session_id).await?;
    Ok(Json(session))
}

/// Open sessions of the caller's organization, most recent first
pub async fn active_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<Session>>> {
    let sessions = state.engine.sessions().active_for(auth.organization_id).await?;
    Ok(Json(sessions))
}

/// QR code contents for a session
pub async fn session_qr(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<QrResponse>> {
    let session = state.engine.sessions().get(session_id).await?;
    require_admin_of(&auth, session.organization_id)?;
    let payload = state.engine.qr_payload_for_session(session_id).await?;
    Ok(Json(QrResponse::new(payload)))
}
