//! Check-in resolution
//!
//! Every tap, scan or proximity event goes through [`Resolver::resolve`],
//! which decides whether it is a check-in or a check-out:
//!
//! 1. identity: card lookup or the authenticated subscriber
//! 2. session: explicit id, today's instance of a template, a signed QR
//!    payload, or the organization's current open session
//! 3. policy: same organization, session open, channel allowed
//! 4. debounce: a repeat of the same `(subscriber, session, channel)` inside
//!    the window returns the earlier result untouched
//! 5. toggle: no open record means check-in, an open record means check-out
//!
//! The toggle relies on the store's atomic insert. When two resolutions for
//! the same pair race, the loser sees the winner's open record and checks it
//! out.

use crate::debounce::{DebounceKey, Debouncer};
use crate::ledger::Ledger;
use crate::qr::{QrCodec, QrTarget};
use crate::registry::CardRegistry;
use crate::schedule::Schedules;
use crate::sessions::Sessions;
use attendance_common::clock::Clock;
use attendance_common::db::models::{AttendanceRecord, CheckInMethod, Session, Subscriber};
use attendance_common::db::{AttendanceStore, CheckInInsert};
use attendance_common::errors::{AppError, Result};
use attendance_common::metrics;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Who is tapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Physical or phone-emulated card UID
    Card { card_uid: String },
    /// Identity already established by authentication
    Subscriber { subscriber_id: Uuid },
}

/// Where the tap is going
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Session { session_id: Uuid },
    /// Today's instance of a recurring template
    Scheduled { scheduled_session_id: Uuid },
    /// Raw payload or deep link scanned from a QR code
    Qr { payload: String },
    /// Most recently started open session of the subscriber's organization
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub channel: CheckInMethod,
    pub credential: Credential,
    pub target: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInAction {
    CheckIn,
    CheckOut,
}

impl CheckInAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInAction::CheckIn => "CHECK_IN",
            CheckInAction::CheckOut => "CHECK_OUT",
        }
    }
}

/// What the caller renders after a tap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInOutcome {
    pub action: CheckInAction,
    pub record: AttendanceRecord,
    pub session_id: Uuid,
    pub session_name: String,
    pub subscriber_id: Uuid,
    pub subscriber_name: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Answered from the debounce window without touching the ledger
    pub debounced: bool,
}

/// Reject channel/credential/target combinations that cannot come from a
/// real reader
pub fn check_pairing(request: &CheckInRequest) -> Result<()> {
    let invalid = |message: &str| AppError::Validation {
        message: message.to_string(),
        field: Some("credential".to_string()),
    };

    match (request.channel, &request.credential) {
        (CheckInMethod::Nfc, Credential::Subscriber { .. }) => {
            return Err(invalid("NFC check-ins need a card"));
        }
        (CheckInMethod::Qr | CheckInMethod::Wifi | CheckInMethod::Bluetooth, Credential::Card { .. }) => {
            return Err(invalid("This channel identifies the signed-in subscriber, not a card"));
        }
        _ => {}
    }

    match (request.channel, &request.target) {
        (CheckInMethod::Qr, Target::Qr { .. }) => Ok(()),
        (CheckInMethod::Qr, _) => Err(AppError::Validation {
            message: "QR check-ins must carry the scanned payload".to_string(),
            field: Some("target".to_string()),
        }),
        (_, Target::Qr { .. }) => Err(AppError::Validation {
            message: "A QR payload can only be used on the QR channel".to_string(),
            field: Some("target".to_string()),
        }),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    schedules: Schedules,
    sessions: Sessions,
    cards: CardRegistry,
    ledger: Ledger,
    qr: QrCodec,
    debouncer: Debouncer<CheckInOutcome>,
    allow_reentry: bool,
}

impl Resolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        schedules: Schedules,
        sessions: Sessions,
        cards: CardRegistry,
        ledger: Ledger,
        qr: QrCodec,
        debouncer: Debouncer<CheckInOutcome>,
        allow_reentry: bool,
    ) -> Self {
        Self {
            store,
            clock,
            schedules,
            sessions,
            cards,
            ledger,
            qr,
            debouncer,
            allow_reentry,
        }
    }

    /// Resolve one tap into a check-in or check-out
    #[instrument(skip_all, fields(channel = %request.channel))]
    pub async fn resolve(&self, request: CheckInRequest) -> Result<CheckInOutcome> {
        let started = Instant::now();
        let channel = request.channel;

        match self.resolve_inner(request).await {
            Ok(outcome) => {
                if !outcome.debounced {
                    metrics::record_check_in(
                        channel.as_str(),
                        outcome.action.as_str(),
                        started.elapsed().as_secs_f64(),
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_check_in_failure(channel.as_str(), e.code().as_label());
                if e.is_server_error() {
                    warn!(error = %e, "Check-in failed");
                } else {
                    debug!(error = %e, "Check-in rejected");
                }
                Err(e)
            }
        }
    }

    async fn resolve_inner(&self, request: CheckInRequest) -> Result<CheckInOutcome> {
        check_pairing(&request)?;
        let channel = request.channel;

        let subscriber = self.identify(&request.credential).await?;
        let session = self.locate(&request.target, &subscriber).await?;

        if session.organization_id != subscriber.organization_id {
            return Err(AppError::OrganizationMismatch);
        }
        if !session.is_open() {
            return Err(AppError::SessionClosed { id: session.id.to_string() });
        }
        if !self.sessions.is_channel_allowed(&session, channel) {
            return Err(AppError::MethodNotAllowed { method: channel.display_name().to_string() });
        }

        let key = DebounceKey {
            subscriber_id: subscriber.id,
            session_id: session.id,
            channel,
        };
        let mut slot = self.debouncer.slot(key, self.clock.now()).await;

        // Read the time after the slot is ours; a queued duplicate must be
        // measured from when it actually runs
        let now = self.clock.now();
        if let Some(previous) = slot.recall(now) {
            metrics::record_debounced(channel.as_str());
            debug!(session_id = %session.id, subscriber_id = %subscriber.id, "Debounced repeat tap");
            return Ok(CheckInOutcome { debounced: true, ..previous });
        }

        let (action, record) = self.toggle(&subscriber, &session, channel, now).await?;
        info!(
            session_id = %session.id,
            subscriber_id = %subscriber.id,
            action = action.as_str(),
            "Attendance recorded"
        );

        let outcome = CheckInOutcome {
            action,
            record,
            session_id: session.id,
            session_name: session.name.clone(),
            subscriber_id: subscriber.id,
            subscriber_name: subscriber.full_name(),
            timestamp: now,
            debounced: false,
        };
        slot.remember(now, outcome.clone());
        Ok(outcome)
    }

    async fn identify(&self, credential: &Credential) -> Result<Subscriber> {
        let subscriber_id = match credential {
            Credential::Card { card_uid } => self.cards.resolve(card_uid).await?,
            Credential::Subscriber { subscriber_id } => *subscriber_id,
        };
        self.store
            .find_subscriber(subscriber_id)
            .await?
            .ok_or_else(|| AppError::SubscriberNotFound { id: subscriber_id.to_string() })
    }

    async fn locate(&self, target: &Target, subscriber: &Subscriber) -> Result<Session> {
        match target {
            Target::Session { session_id } => self.sessions.get(*session_id).await,
            Target::Scheduled { scheduled_session_id } => {
                self.expand_today(*scheduled_session_id, subscriber).await
            }
            Target::Qr { payload } => {
                let decoded = self.qr.decode(payload, self.schedules.today())?;
                if decoded.organization_id != subscriber.organization_id {
                    return Err(AppError::OrganizationMismatch);
                }
                match decoded.target {
                    QrTarget::Session { session_id } => self.sessions.get(session_id).await,
                    QrTarget::Scheduled { scheduled_session_id, .. } => {
                        self.expand_today(scheduled_session_id, subscriber).await
                    }
                }
            }
            Target::Active => self.sessions.current_for(subscriber.organization_id).await,
        }
    }

    async fn expand_today(&self, scheduled_session_id: Uuid, subscriber: &Subscriber) -> Result<Session> {
        let template = self.schedules.get(scheduled_session_id).await?;
        // checked before expanding so a foreign template never gets an instance
        if template.organization_id != subscriber.organization_id {
            return Err(AppError::OrganizationMismatch);
        }
        self.schedules.ensure_instance_for(&template, self.schedules.today()).await
    }

    async fn toggle(
        &self,
        subscriber: &Subscriber,
        session: &Session,
        channel: CheckInMethod,
        now: DateTime<FixedOffset>,
    ) -> Result<(CheckInAction, AttendanceRecord)> {
        if let Some(open) = self.ledger.find_open_record(subscriber.id, session.id).await? {
            let record = self.ledger.settle_check_out(open.id, now, channel).await?;
            return Ok((CheckInAction::CheckOut, record));
        }

        if !self.allow_reentry {
            if let Some(previous) = self.ledger.latest_record(subscriber.id, session.id).await? {
                if !previous.is_open() {
                    return Err(AppError::AttendanceCompleted { session_id: session.id.to_string() });
                }
            }
        }

        match self.ledger.try_check_in(subscriber.id, session, channel, now).await? {
            CheckInInsert::Inserted(record) => Ok((CheckInAction::CheckIn, record)),
            CheckInInsert::Conflict(winner) => {
                debug!(record_id = %winner.id, "Lost check-in race, checking out the winner");
                let record = self.ledger.settle_check_out(winner.id, now, channel).await?;
                Ok((CheckInAction::CheckOut, record))
            }
        }
    }
}
