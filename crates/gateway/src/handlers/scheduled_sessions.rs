//! Scheduled session (template) handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::require_admin_of;
use super::sessions::QrResponse;
use crate::AppState;
use attendance_common::{
    auth::AuthContext,
    db::models::{ScheduledSession, Session},
    errors::Result,
};
use attendance_engine::ScheduleDefinition;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    /// Defaults to today
    pub date: Option<NaiveDate>,
}

/// Load a template the caller administers
async fn owned(state: &AppState, auth: &AuthContext, id: Uuid) -> Result<ScheduledSession> {
    let template = state.engine.schedules().get(id).await?;
    require_admin_of(auth, template.organization_id)?;
    Ok(template)
}

pub async fn create_scheduled_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(definition): Json<ScheduleDefinition>,
) -> Result<(StatusCode, Json<ScheduledSession>)> {
    auth.require_admin()?;
    let template = state.engine.schedules().create(auth.organization_id, definition).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_scheduled_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ScheduledSession>>> {
    let templates = state
        .engine
        .schedules()
        .list(auth.organization_id, query.active_only)
        .await?;
    Ok(Json(templates))
}

pub async fn get_scheduled_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledSession>> {
    let template = state.engine.schedules().get(id).await?;
    auth.require_organization(template.organization_id)?;
    Ok(Json(template))
}

pub async fn update_scheduled_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(definition): Json<ScheduleDefinition>,
) -> Result<Json<ScheduledSession>> {
    owned(&state, &auth, id).await?;
    let template = state.engine.schedules().update(id, definition).await?;
    Ok(Json(template))
}

/// Soft delete: existing instances stay, no new ones are expanded
pub async fn deactivate_scheduled_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledSession>> {
    owned(&state, &auth, id).await?;
    let template = state.engine.schedules().deactivate(id).await?;
    Ok(Json(template))
}

/// Today's concrete session, created on first use
pub async fn today_instance(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>> {
    let template = state.engine.schedules().get(id).await?;
    auth.require_organization(template.organization_id)?;
    let today = state.engine.schedules().today();
    let session = state.engine.schedules().ensure_instance_for(&template, today).await?;
    Ok(Json(session))
}

/// QR code contents for one day of a template
pub async fn scheduled_session_qr(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Query(query): Query<QrQuery>,
) -> Result<Json<QrResponse>> {
    owned(&state, &auth, id).await?;
    let payload = state.engine.qr_payload_for_template(id, query.date).await?;
    Ok(Json(QrResponse::new(payload)))
}
