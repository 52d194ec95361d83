//! Read-only views over sessions and the ledger
//!
//! Nothing here writes. Durations are `check_out - check_in`; an open record
//! reports no duration and is flagged as ongoing.

use crate::ledger::{absentees, Ledger};
use crate::sessions::Sessions;
use attendance_common::db::models::{AttendanceRecord, CheckInMethod, Session, Subscriber};
use attendance_common::db::AttendanceStore;
use attendance_common::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub record_id: Uuid,
    pub session_id: Uuid,
    pub session_name: String,
    pub check_in_time: DateTime<FixedOffset>,
    pub check_out_time: Option<DateTime<FixedOffset>>,
    pub check_in_method: CheckInMethod,
    pub check_out_method: Option<CheckInMethod>,
    /// Whole seconds, `None` while ongoing
    pub duration_secs: Option<i64>,
    pub ongoing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeEntry {
    pub record_id: Uuid,
    pub subscriber_id: Uuid,
    pub subscriber_name: String,
    pub check_in_time: DateTime<FixedOffset>,
    pub check_out_time: Option<DateTime<FixedOffset>>,
    pub check_in_method: CheckInMethod,
    pub check_out_method: Option<CheckInMethod>,
    pub duration_secs: Option<i64>,
}

/// Live dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_records: u64,
    pub checked_in: u64,
    pub checked_out: u64,
    pub unique_attendees: u64,
}

impl SessionStats {
    pub fn from_records(records: &[AttendanceRecord]) -> Self {
        let open = records.iter().filter(|r| r.is_open()).count() as u64;
        let unique: HashSet<Uuid> = records.iter().map(|r| r.subscriber_id).collect();
        Self {
            total_records: records.len() as u64,
            checked_in: open,
            checked_out: records.len() as u64 - open,
            unique_attendees: unique.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttendance {
    pub session: Session,
    pub stats: SessionStats,
    pub attendees: Vec<AttendeeEntry>,
}

fn duration_secs(record: &AttendanceRecord) -> Option<i64> {
    record.duration().map(|d| d.num_seconds())
}

#[derive(Clone)]
pub struct Reports {
    store: Arc<dyn AttendanceStore>,
    sessions: Sessions,
    ledger: Ledger,
}

impl Reports {
    pub fn new(store: Arc<dyn AttendanceStore>, sessions: Sessions, ledger: Ledger) -> Self {
        Self { store, sessions, ledger }
    }

    /// Organization roster minus everyone with a record in the session
    pub async fn absentees(&self, session_id: Uuid) -> Result<Vec<Subscriber>> {
        let session = self.sessions.get(session_id).await?;
        let roster = self.store.list_subscribers(session.organization_id).await?;
        let records = self.ledger.attendees_of(session_id).await?;
        Ok(absentees(roster, &records))
    }

    pub async fn subscriber_history(
        &self,
        subscriber_id: Uuid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<HistoryEntry>> {
        if self.store.find_subscriber(subscriber_id).await?.is_none() {
            return Err(AppError::SubscriberNotFound { id: subscriber_id.to_string() });
        }
        let records = self.ledger.history_for(subscriber_id, from, to).await?;

        let mut names: HashMap<Uuid, String> = HashMap::new();
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if !names.contains_key(&record.session_id) {
                let name = self
                    .store
                    .find_session(record.session_id)
                    .await?
                    .map(|s| s.name)
                    .unwrap_or_default();
                names.insert(record.session_id, name);
            }
            entries.push(HistoryEntry {
                record_id: record.id,
                session_id: record.session_id,
                session_name: names.get(&record.session_id).cloned().unwrap_or_default(),
                check_in_time: record.check_in_time,
                check_out_time: record.check_out_time,
                check_in_method: record.check_in_method,
                check_out_method: record.check_out_method,
                duration_secs: duration_secs(&record),
                ongoing: record.is_open(),
            });
        }
        Ok(entries)
    }

    pub async fn session_stats(&self, session_id: Uuid) -> Result<SessionStats> {
        self.sessions.get(session_id).await?;
        let records = self.ledger.attendees_of(session_id).await?;
        Ok(SessionStats::from_records(&records))
    }

    /// Session state with every record and the attendee's name
    pub async fn session_attendance(&self, session_id: Uuid) -> Result<SessionAttendance> {
        let session = self.sessions.get(session_id).await?;
        let records = self.ledger.attendees_of(session_id).await?;
        let names: HashMap<Uuid, String> = self
            .store
            .list_subscribers(session.organization_id)
            .await?
            .into_iter()
            .map(|s| (s.id, s.full_name()))
            .collect();

        let attendees = records
            .iter()
            .map(|r| AttendeeEntry {
                record_id: r.id,
                subscriber_id: r.subscriber_id,
                subscriber_name: names.get(&r.subscriber_id).cloned().unwrap_or_default(),
                check_in_time: r.check_in_time,
                check_out_time: r.check_out_time,
                check_in_method: r.check_in_method,
                check_out_method: r.check_out_method,
                duration_secs: duration_secs(r),
            })
            .collect();

        Ok(SessionAttendance {
            stats: SessionStats::from_records(&records),
            session,
            attendees,
        })
    }
}
