//! Attendance ledger
//!
//! Append-only log of check-ins. A record is written on check-in and
//! mutated once, on check-out. The store keeps at most one open record per
//! `(subscriber, session)`; [`Ledger::try_check_in`] surfaces a lost race
//! instead of failing so the resolver can decide what to do with it.

use attendance_common::db::models::{AttendanceRecord, CheckInMethod, Session, Subscriber};
use attendance_common::db::{AttendanceStore, CheckInInsert};
use attendance_common::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn AttendanceStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    /// The record that decides between check-in and check-out
    pub async fn find_open_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        self.store.find_open_record(subscriber_id, session_id).await
    }

    /// Latest record for the pair, open or closed
    pub async fn latest_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        self.store.find_latest_record(subscriber_id, session_id).await
    }

    /// Atomic insert that reports the winning record on conflict
    pub async fn try_check_in(
        &self,
        subscriber_id: Uuid,
        session: &Session,
        method: CheckInMethod,
        at: DateTime<FixedOffset>,
    ) -> Result<CheckInInsert> {
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            organization_id: session.organization_id,
            subscriber_id,
            session_id: session.id,
            check_in_time: at,
            check_out_time: None,
            check_in_method: method,
            check_out_method: None,
        };
        let outcome = self.store.insert_check_in(record).await?;
        if let CheckInInsert::Conflict(existing) = &outcome {
            debug!(record_id = %existing.id, "Open record already present");
        }
        Ok(outcome)
    }

    /// Open a record. Fails with `AlreadyCheckedIn` when one is open.
    pub async fn record_check_in(
        &self,
        subscriber_id: Uuid,
        session: &Session,
        method: CheckInMethod,
        at: DateTime<FixedOffset>,
    ) -> Result<AttendanceRecord> {
        match self.try_check_in(subscriber_id, session, method, at).await? {
            CheckInInsert::Inserted(record) => Ok(record),
            CheckInInsert::Conflict(existing) => Err(AppError::AlreadyCheckedIn {
                record_id: existing.id.to_string(),
            }),
        }
    }

    /// Close a record. Fails with `AlreadyCheckedOut` on the second call.
    pub async fn record_check_out(
        &self,
        record_id: Uuid,
        at: DateTime<FixedOffset>,
        method: CheckInMethod,
    ) -> Result<AttendanceRecord> {
        match self.store.close_record(record_id, at, method).await? {
            Some(record) => Ok(record),
            None => match self.store.find_record(record_id).await? {
                Some(_) => Err(AppError::AlreadyCheckedOut { record_id: record_id.to_string() }),
                None => Err(AppError::RecordNotFound { id: record_id.to_string() }),
            },
        }
    }

    /// Close a record on behalf of a concurrent caller. When another caller
    /// closed it first, their closed record is returned unchanged.
    pub async fn settle_check_out(
        &self,
        record_id: Uuid,
        at: DateTime<FixedOffset>,
        method: CheckInMethod,
    ) -> Result<AttendanceRecord> {
        if let Some(record) = self.store.close_record(record_id, at, method).await? {
            return Ok(record);
        }
        let record = self
            .store
            .find_record(record_id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound { id: record_id.to_string() })?;
        debug!(%record_id, "Check-out already applied by a concurrent call");
        Ok(record)
    }

    /// Records of a subscriber checked in inside `[from, to)`
    pub async fn history_for(
        &self,
        subscriber_id: Uuid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>> {
        if from >= to {
            return Err(AppError::Validation {
                message: "Range start must be before its end".to_string(),
                field: Some("start".to_string()),
            });
        }
        self.store.records_for_subscriber(subscriber_id, from, to).await
    }

    /// Every record of a session, oldest check-in first
    pub async fn attendees_of(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        self.store.records_for_session(session_id).await
    }

    /// Roster members with no record in the session
    pub async fn absentees_of(&self, session_id: Uuid, roster: Vec<Subscriber>) -> Result<Vec<Subscriber>> {
        let attendees = self.attendees_of(session_id).await?;
        Ok(absentees(roster, &attendees))
    }
}

/// Set difference between a roster and the subscribers seen in `records`
pub fn absentees(roster: Vec<Subscriber>, records: &[AttendanceRecord]) -> Vec<Subscriber> {
    let present: HashSet<Uuid> = records.iter().map(|r| r.subscriber_id).collect();
    roster.into_iter().filter(|s| !present.contains(&s.id)).collect()
}
