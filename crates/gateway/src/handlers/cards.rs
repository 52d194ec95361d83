//! NFC card administration
//!
//! Thin wrappers over the card registry. UIDs in paths may use any
//! separator style; they are normalized before lookup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::require_admin_of;
use crate::AppState;
use attendance_common::{
    auth::AuthContext,
    db::{models::NfcCard, CardStatistics},
    errors::Result,
};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterCardRequest {
    #[validate(length(min = 1, max = 64))]
    pub card_uid: String,

    /// Assign straight away
    pub subscriber_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AssignCardRequest {
    pub subscriber_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ActivateCardRequest {
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCardsQuery {
    #[serde(default)]
    pub unassigned: bool,
}

#[derive(Serialize)]
pub struct DeleteAllResponse {
    pub deleted: u64,
}

/// Load a card the caller administers
async fn owned(state: &AppState, auth: &AuthContext, card_uid: &str) -> Result<NfcCard> {
    let card = state.engine.cards().get(card_uid).await?;
    require_admin_of(auth, card.organization_id)?;
    Ok(card)
}

pub async fn register_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<RegisterCardRequest>,
) -> Result<(StatusCode, Json<NfcCard>)> {
    auth.require_admin()?;
    request.validate()?;

    let cards = state.engine.cards();
    let mut card = cards.register(auth.organization_id, &request.card_uid).await?;
    if let Some(subscriber_id) = request.subscriber_id {
        card = cards.assign(&card.card_uid, subscriber_id).await?;
    }
    Ok((StatusCode::CREATED, Json(card)))
}

pub async fn list_cards(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListCardsQuery>,
) -> Result<Json<Vec<NfcCard>>> {
    require_admin_of(&auth, auth.organization_id)?;
    let cards = state.engine.cards().list(auth.organization_id, query.unassigned).await?;
    Ok(Json(cards))
}

pub async fn card_statistics(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<CardStatistics>> {
    require_admin_of(&auth, auth.organization_id)?;
    let stats = state.engine.cards().statistics(auth.organization_id).await?;
    Ok(Json(stats))
}

pub async fn get_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(card_uid): Path<String>,
) -> Result<Json<NfcCard>> {
    Ok(Json(owned(&state, &auth, &card_uid).await?))
}

pub async fn assign_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(card_uid): Path<String>,
    Json(request): Json<AssignCardRequest>,
) -> Result<Json<NfcCard>> {
    owned(&state, &auth, &card_uid).await?;
    let card = state.engine.cards().assign(&card_uid, request.subscriber_id).await?;
    Ok(Json(card))
}

pub async fn unassign_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(card_uid): Path<String>,
) -> Result<Json<NfcCard>> {
    owned(&state, &auth, &card_uid).await?;
    let card = state.engine.cards().unassign(&card_uid).await?;
    Ok(Json(card))
}

pub async fn activate_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(card_uid): Path<String>,
    Json(request): Json<ActivateCardRequest>,
) -> Result<Json<NfcCard>> {
    owned(&state, &auth, &card_uid).await?;
    let card = state.engine.cards().set_active(&card_uid, request.active).await?;
    Ok(Json(card))
}

pub async fn delete_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(card_uid): Path<String>,
) -> Result<StatusCode> {
    owned(&state, &auth, &card_uid).await?;
    state.engine.cards().delete(&card_uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove every card of the caller's organization
pub async fn delete_all_cards(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DeleteAllResponse>> {
    require_admin_of(&auth, auth.organization_id)?;
    let deleted = state.engine.cards().delete_all(auth.organization_id).await?;
    tracing::warn!(
        organization_id = %auth.organization_id,
        request_id = %auth.request_id,
        deleted,
        "Deleted all cards"
    );
    Ok(Json(DeleteAllResponse { deleted }))
}
