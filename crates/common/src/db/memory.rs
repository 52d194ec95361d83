//! In-process store
//!
//! All tables live behind one `RwLock`; every mutation holds the write guard
//! for its whole check-then-write, which gives the same atomicity the
//! Postgres constraints give [`super::Repository`].

use crate::db::models::*;
use crate::db::store::{AttendanceStore, CheckInInsert};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    organizations: HashMap<Uuid, Organization>,
    subscribers: HashMap<Uuid, Subscriber>,
    scheduled_sessions: HashMap<Uuid, ScheduledSession>,
    sessions: HashMap<Uuid, Session>,
    /// `(scheduled_session_id, scheduled_date)` -> session id
    sessions_by_date: HashMap<(Uuid, NaiveDate), Uuid>,
    records: HashMap<Uuid, AttendanceRecord>,
    /// `(subscriber_id, session_id)` -> open record id
    open_records: HashMap<(Uuid, Uuid), Uuid>,
    cards: HashMap<String, NfcCard>,
}

impl Tables {
    fn active_card_of(&self, subscriber_id: Uuid, except_uid: &str) -> Option<&NfcCard> {
        self.cards.values().find(|c| {
            c.subscriber_id == Some(subscriber_id) && c.is_active && c.card_uid != except_uid
        })
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn card_not_found(card_uid: &str) -> AppError {
    AppError::CardNotFound { card_uid: card_uid.to_string() }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    // ========================================================================
    // Organizations and subscribers
    // ========================================================================

    async fn insert_organization(&self, organization: Organization) -> Result<Organization> {
        let mut t = self.tables.write().await;
        if t.organizations.values().any(|o| o.entity_id == organization.entity_id) {
            return Err(AppError::Conflict {
                message: format!("Organization {} already exists", organization.entity_id),
            });
        }
        t.organizations.insert(organization.id, organization.clone());
        Ok(organization)
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.tables.read().await.organizations.get(&id).cloned())
    }

    async fn insert_subscriber(&self, subscriber: Subscriber) -> Result<Subscriber> {
        let mut t = self.tables.write().await;
        t.subscribers.insert(subscriber.id, subscriber.clone());
        Ok(subscriber)
    }

    async fn find_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>> {
        Ok(self.tables.read().await.subscribers.get(&id).cloned())
    }

    async fn list_subscribers(&self, organization_id: Uuid) -> Result<Vec<Subscriber>> {
        let t = self.tables.read().await;
        let mut roster: Vec<_> = t
            .subscribers
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        roster.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
        Ok(roster)
    }

    // ========================================================================
    // Scheduled sessions
    // ========================================================================

    async fn insert_scheduled_session(&self, template: ScheduledSession) -> Result<ScheduledSession> {
        let mut t = self.tables.write().await;
        t.scheduled_sessions.insert(template.id, template.clone());
        Ok(template)
    }

    async fn update_scheduled_session(
        &self,
        template: ScheduledSession,
    ) -> Result<Option<ScheduledSession>> {
        let mut t = self.tables.write().await;
        match t.scheduled_sessions.get_mut(&template.id) {
            Some(existing) => {
                *existing = template.clone();
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }

    async fn find_scheduled_session(&self, id: Uuid) -> Result<Option<ScheduledSession>> {
        Ok(self.tables.read().await.scheduled_sessions.get(&id).cloned())
    }

    async fn list_scheduled_sessions(
        &self,
        organization_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<ScheduledSession>> {
        let t = self.tables.read().await;
        let mut templates: Vec<_> = t
            .scheduled_sessions
            .values()
            .filter(|s| s.organization_id == organization_id && (!active_only || s.active))
            .cloned()
            .collect();
        templates.sort_by_key(|s| (s.start_time, s.created_at));
        Ok(templates)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    async fn insert_session(&self, session: Session) -> Result<Session> {
        let mut t = self.tables.write().await;
        t.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn insert_session_for_date(&self, session: Session) -> Result<Session> {
        let (Some(template_id), Some(date)) = (session.scheduled_session_id, session.scheduled_date)
        else {
            return Err(AppError::Internal {
                message: "derived session is missing its template or date".to_string(),
            });
        };

        let mut t = self.tables.write().await;
        if let Some(existing) = t
            .sessions_by_date
            .get(&(template_id, date))
            .and_then(|id| t.sessions.get(id))
        {
            return Ok(existing.clone());
        }
        t.sessions_by_date.insert((template_id, date), session.id);
        t.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn find_session_for_date(
        &self,
        scheduled_session_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Session>> {
        let t = self.tables.read().await;
        Ok(t.sessions_by_date
            .get(&(scheduled_session_id, date))
            .and_then(|id| t.sessions.get(id))
            .cloned())
    }

    async fn list_open_sessions(&self, organization_id: Uuid) -> Result<Vec<Session>> {
        let t = self.tables.read().await;
        let mut open: Vec<_> = t
            .sessions
            .values()
            .filter(|s| s.organization_id == organization_id && s.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(open)
    }

    async fn list_overdue_sessions(&self, now: DateTime<FixedOffset>) -> Result<Vec<Session>> {
        let t = self.tables.read().await;
        Ok(t.sessions.values().filter(|s| s.is_overdue(now)).cloned().collect())
    }

    async fn close_session(&self, id: Uuid, at: DateTime<FixedOffset>) -> Result<Option<Session>> {
        let mut t = self.tables.write().await;
        match t.sessions.get_mut(&id) {
            Some(session) if session.is_open() => {
                session.end_time = Some(at);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Attendance records
    // ========================================================================

    async fn insert_check_in(&self, record: AttendanceRecord) -> Result<CheckInInsert> {
        let key = (record.subscriber_id, record.session_id);
        let mut t = self.tables.write().await;
        if let Some(existing) = t.open_records.get(&key).and_then(|id| t.records.get(id)) {
            return Ok(CheckInInsert::Conflict(existing.clone()));
        }
        t.open_records.insert(key, record.id);
        t.records.insert(record.id, record.clone());
        Ok(CheckInInsert::Inserted(record))
    }

    async fn find_open_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        let t = self.tables.read().await;
        Ok(t.open_records
            .get(&(subscriber_id, session_id))
            .and_then(|id| t.records.get(id))
            .cloned())
    }

    async fn find_latest_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        let t = self.tables.read().await;
        Ok(t.records
            .values()
            .filter(|r| r.subscriber_id == subscriber_id && r.session_id == session_id)
            .max_by_key(|r| r.check_in_time)
            .cloned())
    }

    async fn find_record(&self, id: Uuid) -> Result<Option<AttendanceRecord>> {
        Ok(self.tables.read().await.records.get(&id).cloned())
    }

    async fn close_record(
        &self,
        id: Uuid,
        at: DateTime<FixedOffset>,
        method: CheckInMethod,
    ) -> Result<Option<AttendanceRecord>> {
        let mut t = self.tables.write().await;
        let closed = match t.records.get_mut(&id) {
            Some(record) if record.is_open() => {
                record.check_out_time = Some(at);
                record.check_out_method = Some(method);
                record.clone()
            }
            _ => return Ok(None),
        };
        t.open_records.remove(&(closed.subscriber_id, closed.session_id));
        Ok(Some(closed))
    }

    async fn records_for_session(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        let t = self.tables.read().await;
        let mut records: Vec<_> = t
            .records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.check_in_time);
        Ok(records)
    }

    async fn records_for_subscriber(
        &self,
        subscriber_id: Uuid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>> {
        let t = self.tables.read().await;
        let mut records: Vec<_> = t
            .records
            .values()
            .filter(|r| {
                r.subscriber_id == subscriber_id && r.check_in_time >= from && r.check_in_time < to
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.check_in_time);
        Ok(records)
    }

    // ========================================================================
    // NFC cards
    // ========================================================================

    async fn insert_card(&self, card: NfcCard) -> Result<NfcCard> {
        let mut t = self.tables.write().await;
        if t.cards.contains_key(&card.card_uid) {
            return Err(AppError::CardAlreadyRegistered { card_uid: card.card_uid });
        }
        t.cards.insert(card.card_uid.clone(), card.clone());
        Ok(card)
    }

    async fn find_card(&self, card_uid: &str) -> Result<Option<NfcCard>> {
        Ok(self.tables.read().await.cards.get(card_uid).cloned())
    }

    async fn list_cards(&self, organization_id: Uuid, unassigned_only: bool) -> Result<Vec<NfcCard>> {
        let t = self.tables.read().await;
        let mut cards: Vec<_> = t
            .cards
            .values()
            .filter(|c| c.organization_id == organization_id && (!unassigned_only || !c.is_assigned()))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.card_uid.cmp(&b.card_uid));
        Ok(cards)
    }

    async fn assign_card(
        &self,
        card_uid: &str,
        subscriber_id: Uuid,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard> {
        let mut t = self.tables.write().await;
        let card = t.cards.get(card_uid).ok_or_else(|| card_not_found(card_uid))?;

        match card.subscriber_id {
            Some(holder) if holder == subscriber_id => return Ok(card.clone()),
            Some(_) => {
                return Err(AppError::CardAlreadyAssigned { card_uid: card_uid.to_string() })
            }
            None => {}
        }
        if t.active_card_of(subscriber_id, card_uid).is_some() {
            return Err(AppError::SubscriberAlreadyHasCard {
                subscriber_id: subscriber_id.to_string(),
            });
        }

        let card = t.cards.get_mut(card_uid).ok_or_else(|| card_not_found(card_uid))?;
        card.subscriber_id = Some(subscriber_id);
        card.updated_at = at;
        Ok(card.clone())
    }

    async fn unassign_card(&self, card_uid: &str, at: DateTime<FixedOffset>) -> Result<NfcCard> {
        let mut t = self.tables.write().await;
        let card = t.cards.get_mut(card_uid).ok_or_else(|| card_not_found(card_uid))?;
        if card.subscriber_id.take().is_some() {
            card.updated_at = at;
        }
        Ok(card.clone())
    }

    async fn set_card_active(
        &self,
        card_uid: &str,
        active: bool,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard> {
        let mut t = self.tables.write().await;
        let card = t.cards.get(card_uid).ok_or_else(|| card_not_found(card_uid))?;
        if active && !card.is_active {
            if let Some(holder) = card.subscriber_id {
                if t.active_card_of(holder, card_uid).is_some() {
                    return Err(AppError::SubscriberAlreadyHasCard {
                        subscriber_id: holder.to_string(),
                    });
                }
            }
        }

        let card = t.cards.get_mut(card_uid).ok_or_else(|| card_not_found(card_uid))?;
        card.is_active = active;
        card.updated_at = at;
        Ok(card.clone())
    }

    async fn delete_card(&self, card_uid: &str) -> Result<bool> {
        Ok(self.tables.write().await.cards.remove(card_uid).is_some())
    }

    async fn delete_cards(&self, organization_id: Uuid) -> Result<u64> {
        let mut t = self.tables.write().await;
        let before = t.cards.len();
        t.cards.retain(|_, c| c.organization_id != organization_id);
        Ok((before - t.cards.len()) as u64)
    }
}
