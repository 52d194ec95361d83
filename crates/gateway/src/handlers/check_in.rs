//! Check-in endpoint
//!
//! Every client (card readers, the member app, proximity detectors and the
//! admin "simulate tap" tool) posts here; the toggle itself lives in the
//! engine.

use axum::{extract::State, Json};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use attendance_common::{
    auth::{AuthContext, Role},
    db::models::CheckInMethod,
    errors::{AppError, Result},
};
use attendance_engine::{CheckInAction, CheckInOutcome, CheckInRequest, Credential, Target};

/// Check-in request body
#[derive(Debug, Deserialize)]
pub struct CheckInBody {
    pub channel: CheckInMethod,

    /// Omitted by members checking in for themselves
    #[serde(default)]
    pub credential: Option<Credential>,

    #[serde(default = "default_target")]
    pub target: Target,
}

fn default_target() -> Target {
    Target::Active
}

/// What the client shows after the tap
#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub action: CheckInAction,
    pub session_id: Uuid,
    pub session_name: String,
    pub subscriber_id: Uuid,
    pub subscriber_name: String,
    pub record_id: Uuid,
    pub timestamp: DateTime<FixedOffset>,
    pub debounced: bool,
}

impl From<CheckInOutcome> for CheckInResponse {
    fn from(outcome: CheckInOutcome) -> Self {
        Self {
            action: outcome.action,
            session_id: outcome.session_id,
            session_name: outcome.session_name,
            subscriber_id: outcome.subscriber_id,
            subscriber_name: outcome.subscriber_name,
            record_id: outcome.record.id,
            timestamp: outcome.timestamp,
            debounced: outcome.debounced,
        }
    }
}

/// Decide whose tap this is from the body and the caller's token.
///
/// Members only ever act as themselves. Admins (and reader devices holding
/// an admin token) may present a card or name a subscriber, but only within
/// their own organization.
async fn credential_for(state: &AppState, auth: &AuthContext, body: Option<Credential>) -> Result<Credential> {
    match (auth.role, body) {
        (Role::Subscriber, None) => Ok(Credential::Subscriber { subscriber_id: auth.subject_id }),
        (Role::Subscriber, Some(Credential::Subscriber { subscriber_id })) if subscriber_id == auth.subject_id => {
            Ok(Credential::Subscriber { subscriber_id })
        }
        (Role::Subscriber, Some(Credential::Card { card_uid })) => {
            // phone-emulated card: must be the member's own
            let card = state.engine.cards().get(&card_uid).await?;
            if card.subscriber_id != Some(auth.subject_id) {
                return Err(AppError::Forbidden {
                    message: "This card belongs to someone else".to_string(),
                });
            }
            Ok(Credential::Card { card_uid })
        }
        (Role::Subscriber, Some(_)) => Err(AppError::Forbidden {
            message: "Members can only check in for themselves".to_string(),
        }),
        (_, None) => Err(AppError::Validation {
            message: "Administrators must present a card or a subscriber".to_string(),
            field: Some("credential".to_string()),
        }),
        (_, Some(Credential::Card { card_uid })) => {
            let card = state.engine.cards().get(&card_uid).await?;
            auth.require_organization(card.organization_id)?;
            Ok(Credential::Card { card_uid })
        }
        (_, Some(Credential::Subscriber { subscriber_id })) => {
            let subscriber = state.engine.directory().subscriber(subscriber_id).await?;
            auth.require_organization(subscriber.organization_id)?;
            Ok(Credential::Subscriber { subscriber_id })
        }
    }
}

/// Resolve a tap, scan or proximity event
pub async fn check_in(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<CheckInBody>,
) -> Result<Json<CheckInResponse>> {
    let credential = credential_for(&state, &auth, body.credential).await?;

    let outcome = state
        .engine
        .resolve(CheckInRequest {
            channel: body.channel,
            credential,
            target: body.target,
        })
        .await?;

    tracing::info!(
        request_id = %auth.request_id,
        session_id = %outcome.session_id,
        action = outcome.action.as_str(),
        debounced = outcome.debounced,
        "Check-in resolved"
    );

    Ok(Json(outcome.into()))
}
