//! Attendance Engine
//!
//! Session lifecycle and check-in resolution on top of an
//! [`AttendanceStore`]:
//! - Schedule expansion into per-day sessions
//! - Card registry and identity resolution
//! - Toggle semantics with duplicate-tap suppression
//! - Signed QR payloads
//! - Attendance reports

pub mod debounce;
pub mod directory;
pub mod ledger;
pub mod qr;
pub mod registry;
pub mod reports;
pub mod resolver;
pub mod schedule;
pub mod sessions;

pub use debounce::{DebounceKey, Debouncer};
pub use directory::{Directory, NewOrganization, NewSubscriber};
pub use ledger::Ledger;
pub use qr::{DecodedQr, QrCodec, QrTarget};
pub use registry::CardRegistry;
pub use reports::{AttendeeEntry, HistoryEntry, Reports, SessionAttendance, SessionStats};
pub use resolver::{CheckInAction, CheckInOutcome, CheckInRequest, Credential, Resolver, Target};
pub use schedule::{ScheduleDefinition, Schedules};
pub use sessions::{AdHocSession, Sessions};

use attendance_common::clock::Clock;
use attendance_common::config::AttendanceConfig;
use attendance_common::db::models::CheckInMethod;
use attendance_common::db::AttendanceStore;
use attendance_common::errors::{AppError, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

fn qr_not_allowed() -> AppError {
    AppError::MethodNotAllowed { method: CheckInMethod::Qr.display_name().to_string() }
}

/// Result of one sweeper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_closed: usize,
    pub debounce_entries: usize,
}

/// Every engine component wired to one store and one clock
#[derive(Clone)]
pub struct AttendanceEngine {
    clock: Arc<dyn Clock>,
    directory: Directory,
    schedules: Schedules,
    sessions: Sessions,
    cards: CardRegistry,
    ledger: Ledger,
    reports: Reports,
    qr: QrCodec,
    debouncer: Debouncer<CheckInOutcome>,
    resolver: Resolver,
}

impl AttendanceEngine {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>, config: &AttendanceConfig) -> Self {
        let directory = Directory::new(store.clone(), clock.clone());
        let schedules = Schedules::new(store.clone(), clock.clone(), config.utc_offset());
        let sessions = Sessions::new(store.clone(), clock.clone());
        let cards = CardRegistry::new(store.clone(), clock.clone());
        let ledger = Ledger::new(store.clone());
        let reports = Reports::new(store.clone(), sessions.clone(), ledger.clone());
        let qr = QrCodec::new(config.qr_secret.clone());
        let debouncer = Debouncer::new(config.debounce_window());

        let resolver = Resolver::new(
            store,
            clock.clone(),
            schedules.clone(),
            sessions.clone(),
            cards.clone(),
            ledger.clone(),
            qr.clone(),
            debouncer.clone(),
            config.allow_reentry,
        );

        info!(
            debounce_secs = config.debounce_secs,
            allow_reentry = config.allow_reentry,
            "Attendance engine initialized"
        );

        Self {
            clock,
            directory,
            schedules,
            sessions,
            cards,
            ledger,
            reports,
            qr,
            debouncer,
            resolver,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn schedules(&self) -> &Schedules {
        &self.schedules
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn cards(&self) -> &CardRegistry {
        &self.cards
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn reports(&self) -> &Reports {
        &self.reports
    }

    pub fn qr(&self) -> &QrCodec {
        &self.qr
    }

    /// Resolve one tap
    pub async fn resolve(&self, request: CheckInRequest) -> Result<CheckInOutcome> {
        self.resolver.resolve(request).await
    }

    /// Close overdue sessions and drop stale debounce slots
    pub async fn sweep(&self) -> Result<SweepReport> {
        let closed = self.sessions.close_expired().await?;
        let remaining = self.debouncer.prune(self.clock.now());
        Ok(SweepReport {
            sessions_closed: closed.len(),
            debounce_entries: remaining,
        })
    }

    /// Payload for a concrete session's QR code
    pub async fn qr_payload_for_session(&self, session_id: Uuid) -> Result<String> {
        let session = self.sessions.get(session_id).await?;
        if !session.allows(CheckInMethod::Qr) {
            return Err(qr_not_allowed());
        }
        Ok(self.qr.encode(
            session.organization_id,
            QrTarget::Session { session_id: session.id },
        ))
    }

    /// Payload for a template's QR code on one day, today when `date` is
    /// omitted
    pub async fn qr_payload_for_template(
        &self,
        scheduled_session_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<String> {
        let template = self.schedules.get(scheduled_session_id).await?;
        let date = date.unwrap_or_else(|| self.schedules.today());
        if !template.allowed_methods.contains(CheckInMethod::Qr) {
            return Err(qr_not_allowed());
        }
        if !template.runs_on(date) {
            return Err(AppError::NotScheduledOnDate { date: date.to_string() });
        }
        Ok(self.qr.encode(
            template.organization_id,
            QrTarget::Scheduled { scheduled_session_id, date },
        ))
    }
}
