//! Store boundary used by the attendance engine
//!
//! Everything the engine persists goes through [`AttendanceStore`]. Apart
//! from plain keyed lookups, the trait exposes the handful of atomic
//! primitives the engine relies on for correctness under concurrent
//! requests:
//!
//! - [`AttendanceStore::insert_session_for_date`]: create-if-absent keyed on
//!   `(scheduled_session_id, scheduled_date)`
//! - [`AttendanceStore::insert_check_in`]: insert unless an open record for
//!   the same `(subscriber_id, session_id)` exists
//! - [`AttendanceStore::close_session`] / [`AttendanceStore::close_record`]:
//!   conditional single-row terminal updates
//! - [`AttendanceStore::assign_card`]: both card uniqueness checks and the
//!   update in one unit
//!
//! Implementations must never answer these from a cache.

use crate::db::models::*;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of an atomic check-in insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInInsert {
    /// The row was written
    Inserted(AttendanceRecord),
    /// Another open record for the pair already existed and is returned
    Conflict(AttendanceRecord),
}

/// Card inventory counters for one organization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStatistics {
    pub total: u64,
    pub assigned: u64,
    pub unassigned: u64,
    pub active: u64,
    pub inactive: u64,
}

impl CardStatistics {
    pub fn from_cards<'a>(cards: impl IntoIterator<Item = &'a NfcCard>) -> Self {
        let mut stats = Self::default();
        for card in cards {
            stats.total += 1;
            if card.is_assigned() {
                stats.assigned += 1;
            } else {
                stats.unassigned += 1;
            }
            if card.is_active {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
        }
        stats
    }
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    // ------------------------------------------------------------------
    // Organizations and subscribers
    // ------------------------------------------------------------------

    async fn insert_organization(&self, organization: Organization) -> Result<Organization>;

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>>;

    async fn insert_subscriber(&self, subscriber: Subscriber) -> Result<Subscriber>;

    async fn find_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>>;

    /// Full roster of an organization
    async fn list_subscribers(&self, organization_id: Uuid) -> Result<Vec<Subscriber>>;

    // ------------------------------------------------------------------
    // Scheduled sessions
    // ------------------------------------------------------------------

    async fn insert_scheduled_session(&self, template: ScheduledSession) -> Result<ScheduledSession>;

    /// Replace a template, `None` when it does not exist
    async fn update_scheduled_session(
        &self,
        template: ScheduledSession,
    ) -> Result<Option<ScheduledSession>>;

    async fn find_scheduled_session(&self, id: Uuid) -> Result<Option<ScheduledSession>>;

    async fn list_scheduled_sessions(
        &self,
        organization_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<ScheduledSession>>;

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Insert an ad-hoc session
    async fn insert_session(&self, session: Session) -> Result<Session>;

    /// Insert a derived session unless one already exists for its
    /// `(scheduled_session_id, scheduled_date)`; returns whichever row won
    async fn insert_session_for_date(&self, session: Session) -> Result<Session>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn find_session_for_date(
        &self,
        scheduled_session_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Session>>;

    /// Open sessions of an organization, most recently started first
    async fn list_open_sessions(&self, organization_id: Uuid) -> Result<Vec<Session>>;

    /// Open sessions whose planned end is at or before `now`
    async fn list_overdue_sessions(&self, now: DateTime<FixedOffset>) -> Result<Vec<Session>>;

    /// Set `end_time` if still open. `None` when missing or already closed.
    async fn close_session(&self, id: Uuid, at: DateTime<FixedOffset>) -> Result<Option<Session>>;

    // ------------------------------------------------------------------
    // Attendance records
    // ------------------------------------------------------------------

    async fn insert_check_in(&self, record: AttendanceRecord) -> Result<CheckInInsert>;

    async fn find_open_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>>;

    /// Most recent record for the pair, open or closed
    async fn find_latest_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>>;

    async fn find_record(&self, id: Uuid) -> Result<Option<AttendanceRecord>>;

    /// Set the check-out columns if still open. `None` when missing or
    /// already checked out.
    async fn close_record(
        &self,
        id: Uuid,
        at: DateTime<FixedOffset>,
        method: CheckInMethod,
    ) -> Result<Option<AttendanceRecord>>;

    /// Records of a session ordered by check-in time
    async fn records_for_session(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>>;

    /// Records of a subscriber with check-in inside `[from, to)`, oldest first
    async fn records_for_subscriber(
        &self,
        subscriber_id: Uuid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>>;

    // ------------------------------------------------------------------
    // NFC cards
    // ------------------------------------------------------------------

    /// Fails with `CardAlreadyRegistered` when the UID exists anywhere
    async fn insert_card(&self, card: NfcCard) -> Result<NfcCard>;

    async fn find_card(&self, card_uid: &str) -> Result<Option<NfcCard>>;

    async fn list_cards(&self, organization_id: Uuid, unassigned_only: bool) -> Result<Vec<NfcCard>>;

    /// Bind a card to a subscriber.
    ///
    /// Fails with `CardNotFound`, `CardAlreadyAssigned` (bound to someone
    /// else) or `SubscriberAlreadyHasCard` (subscriber holds another active
    /// card). Nothing is written when a check fails. Re-assigning a card to
    /// its current holder is a no-op.
    async fn assign_card(
        &self,
        card_uid: &str,
        subscriber_id: Uuid,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard>;

    /// Clear the binding; no-op when already unassigned
    async fn unassign_card(&self, card_uid: &str, at: DateTime<FixedOffset>) -> Result<NfcCard>;

    /// Toggle `is_active`. Activating fails with `SubscriberAlreadyHasCard`
    /// when the holder already has another active card.
    async fn set_card_active(
        &self,
        card_uid: &str,
        active: bool,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard>;

    async fn delete_card(&self, card_uid: &str) -> Result<bool>;

    /// Delete every card of an organization, returning how many went
    async fn delete_cards(&self, organization_id: Uuid) -> Result<u64>;
}
