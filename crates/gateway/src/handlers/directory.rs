//! Organization and roster handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::require_admin_of;
use crate::AppState;
use attendance_common::{
    auth::{AuthContext, Role},
    db::models::{Organization, Subscriber},
    errors::{AppError, Result},
};
use attendance_engine::{NewOrganization, NewSubscriber};

/// Platform operators only
pub async fn create_organization(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<NewOrganization>,
) -> Result<(StatusCode, Json<Organization>)> {
    if auth.role != Role::SuperAdmin {
        return Err(AppError::Forbidden {
            message: "Only platform administrators can create organizations".to_string(),
        });
    }
    let organization = state.engine.directory().create_organization(request).await?;
    tracing::info!(organization_id = %organization.id, "Organization created");
    Ok((StatusCode::CREATED, Json(organization)))
}

pub async fn get_organization(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<Organization>> {
    auth.require_organization(organization_id)?;
    let organization = state.engine.directory().organization(organization_id).await?;
    Ok(Json(organization))
}

pub async fn add_subscriber(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(organization_id): Path<Uuid>,
    Json(request): Json<NewSubscriber>,
) -> Result<(StatusCode, Json<Subscriber>)> {
    require_admin_of(&auth, organization_id)?;
    let subscriber = state.engine.directory().add_subscriber(organization_id, request).await?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}

pub async fn list_subscribers(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<Vec<Subscriber>>> {
    require_admin_of(&auth, organization_id)?;
    let roster = state.engine.directory().roster(organization_id).await?;
    Ok(Json(roster))
}

/// Members may read their own profile
pub async fn get_subscriber(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(subscriber_id): Path<Uuid>,
) -> Result<Json<Subscriber>> {
    let subscriber = state.engine.directory().subscriber(subscriber_id).await?;
    if !(auth.role == Role::Subscriber && auth.subject_id == subscriber_id) {
        require_admin_of(&auth, subscriber.organization_id)?;
    }
    Ok(Json(subscriber))
}
