//! Reporting handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require_admin_of;
use crate::AppState;
use attendance_common::{
    auth::{AuthContext, Role},
    db::models::Subscriber,
    errors::Result,
};
use attendance_engine::{HistoryEntry, SessionStats};

/// Half-open window `[start, end)`, RFC 3339
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Serialize)]
pub struct AbsenteesResponse {
    pub session_id: Uuid,
    pub count: usize,
    pub absentees: Vec<Subscriber>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub subscriber_id: Uuid,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub entries: Vec<HistoryEntry>,
}

/// Roster members with no record in the session
pub async fn session_absentees(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AbsenteesResponse>> {
    let session = state.engine.sessions().get(session_id).await?;
    require_admin_of(&auth, session.organization_id)?;

    let absentees = state.engine.reports().absentees(session_id).await?;
    Ok(Json(AbsenteesResponse {
        session_id,
        count: absentees.len(),
        absentees,
    }))
}

/// Live counters for a session
pub async fn session_stats(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionStats>> {
    let session = state.engine.sessions().get(session_id).await?;
    require_admin_of(&auth, session.organization_id)?;
    let stats = state.engine.reports().session_stats(session_id).await?;
    Ok(Json(stats))
}

/// A subscriber's attendance between two instants. Members may read their
/// own history.
pub async fn subscriber_attendance(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscriber_id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<HistoryResponse>> {
    let subscriber = state.engine.directory().subscriber(subscriber_id).await?;
    if !(auth.role == Role::Subscriber && auth.subject_id == subscriber_id) {
        require_admin_of(&auth, subscriber.organization_id)?;
    }

    let entries = state
        .engine
        .reports()
        .subscriber_history(subscriber_id, range.start, range.end)
        .await?;

    Ok(Json(HistoryResponse {
        subscriber_id,
        start: range.start,
        end: range.end,
        entries,
    }))
}
