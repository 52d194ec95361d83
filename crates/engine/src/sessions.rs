//! Session store
//!
//! Which sessions are open and which channels they accept. Closing is a
//! one-way transition guarded by the store's conditional update, so a manual
//! close racing the expiry sweeper yields exactly one transition.

use attendance_common::clock::Clock;
use attendance_common::db::models::{CheckInMethod, MethodSet, Session};
use attendance_common::db::AttendanceStore;
use attendance_common::errors::{AppError, Result};
use attendance_common::metrics;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Whether `channel` may be used to check into `session`
pub fn is_channel_allowed(session: &Session, channel: CheckInMethod) -> bool {
    session.allows(channel)
}

/// Admin-created session not derived from a schedule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdHocSession {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Defaults to now
    pub start_time: Option<DateTime<FixedOffset>>,

    /// Planned close; the sweeper ends the session once it passes
    pub planned_end: Option<DateTime<FixedOffset>>,

    pub allowed_methods: MethodSet,
}

#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
}

impl Sessions {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get(&self, id: Uuid) -> Result<Session> {
        self.store
            .find_session(id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })
    }

    /// The session, provided it still accepts check-ins
    pub async fn open(&self, id: Uuid) -> Result<Session> {
        let session = self.get(id).await?;
        if !session.is_open() {
            return Err(AppError::SessionClosed { id: id.to_string() });
        }
        Ok(session)
    }

    /// End a session now. Calling it twice is an error.
    #[instrument(skip(self))]
    pub async fn close(&self, id: Uuid) -> Result<Session> {
        match self.store.close_session(id, self.clock.now()).await? {
            Some(session) => {
                metrics::record_session_closed("manual");
                info!(session_id = %id, "Session closed");
                Ok(session)
            }
            None => match self.store.find_session(id).await? {
                Some(_) => Err(AppError::AlreadyClosed { id: id.to_string() }),
                None => Err(AppError::SessionNotFound { id: id.to_string() }),
            },
        }
    }

    pub fn is_channel_allowed(&self, session: &Session, channel: CheckInMethod) -> bool {
        is_channel_allowed(session, channel)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, organization_id: Uuid, request: AdHocSession) -> Result<Session> {
        request.validate()?;
        if request.allowed_methods.is_empty() {
            return Err(AppError::Validation {
                message: "A session needs at least one check-in method".to_string(),
                field: Some("allowed_methods".to_string()),
            });
        }
        if self.store.find_organization(organization_id).await?.is_none() {
            return Err(AppError::OrganizationNotFound { id: organization_id.to_string() });
        }

        let now = self.clock.now();
        let start = request.start_time.unwrap_or(now);
        if let Some(end) = request.planned_end {
            if end <= start {
                return Err(AppError::Validation {
                    message: "Planned end must be after the start".to_string(),
                    field: Some("planned_end".to_string()),
                });
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            organization_id,
            scheduled_session_id: None,
            scheduled_date: None,
            name: request.name,
            description: request.description,
            start_time: start,
            scheduled_end: request.planned_end,
            end_time: None,
            allowed_methods: request.allowed_methods,
            created_at: now,
        };
        let session = self.store.insert_session(session).await?;
        info!(session_id = %session.id, "Created ad-hoc session");
        Ok(session)
    }

    /// Open sessions of an organization, most recently started first
    pub async fn active_for(&self, organization_id: Uuid) -> Result<Vec<Session>> {
        self.store.list_open_sessions(organization_id).await
    }

    /// The session a target-less check-in lands in
    pub async fn current_for(&self, organization_id: Uuid) -> Result<Session> {
        self.active_for(organization_id)
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NoActiveSession)
    }

    /// Close every open session whose planned end has passed. The recorded
    /// end is the planned one, not the sweep time.
    pub async fn close_expired(&self) -> Result<Vec<Session>> {
        let now = self.clock.now();
        let overdue = self.store.list_overdue_sessions(now).await?;

        let mut closed = Vec::with_capacity(overdue.len());
        for session in overdue {
            let end = session.scheduled_end.unwrap_or(now);
            match self.store.close_session(session.id, end).await {
                Ok(Some(session)) => {
                    metrics::record_session_closed("expired");
                    info!(session_id = %session.id, "Closed expired session");
                    closed.push(session);
                }
                // closed by someone else in the meantime
                Ok(None) => {}
                Err(e) => warn!(session_id = %session.id, error = %e, "Failed to close expired session"),
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_common::clock::ManualClock;
    use attendance_common::db::models::Organization;
    use attendance_common::db::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    async fn setup() -> (Sessions, Arc<ManualClock>, Uuid) {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap().fixed_offset();
        let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let org = Uuid::new_v4();
        store
            .insert_organization(Organization {
                id: org,
                name: "Acme".into(),
                entity_id: "ACME".into(),
                created_at: start,
            })
            .await
            .unwrap();
        (Sessions::new(store, clock.clone()), clock, org)
    }

    fn request(planned_end: Option<DateTime<FixedOffset>>) -> AdHocSession {
        AdHocSession {
            name: "Workshop".into(),
            description: Some("Room 2".into()),
            start_time: None,
            planned_end,
            allowed_methods: [CheckInMethod::Qr, CheckInMethod::Wifi].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let (sessions, _, org) = setup().await;
        let session = sessions.create(org, request(None)).await.unwrap();

        let closed = assert_ok!(sessions.close(session.id).await);
        assert!(closed.end_time.is_some());

        let err = assert_err!(sessions.close(session.id).await);
        assert!(matches!(err, AppError::AlreadyClosed { .. }));

        let err = assert_err!(sessions.open(session.id).await);
        assert!(matches!(err, AppError::SessionClosed { .. }));

        let err = assert_err!(sessions.close(Uuid::new_v4()).await);
        assert!(matches!(err, AppError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_channel_predicate() {
        let (sessions, _, org) = setup().await;
        let session = sessions.create(org, request(None)).await.unwrap();
        assert!(sessions.is_channel_allowed(&session, CheckInMethod::Wifi));
        assert!(!sessions.is_channel_allowed(&session, CheckInMethod::Nfc));
    }

    #[tokio::test]
    async fn test_close_expired_uses_planned_end() {
        let (sessions, clock, org) = setup().await;
        let planned = clock.now() + Duration::minutes(30);
        let timed = sessions.create(org, request(Some(planned))).await.unwrap();
        let open_ended = sessions.create(org, request(None)).await.unwrap();

        assert!(sessions.close_expired().await.unwrap().is_empty());

        clock.advance(Duration::hours(1));
        let closed = sessions.close_expired().await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, timed.id);
        assert_eq!(closed[0].end_time, Some(planned));

        assert!(sessions.open(open_ended.id).await.is_ok());
        assert!(sessions.close_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_current_for_picks_latest_open() {
        let (sessions, clock, org) = setup().await;
        assert!(matches!(sessions.current_for(org).await, Err(AppError::NoActiveSession)));

        let first = sessions.create(org, request(None)).await.unwrap();
        clock.advance(Duration::minutes(5));
        let second = sessions.create(org, request(None)).await.unwrap();

        assert_eq!(sessions.current_for(org).await.unwrap().id, second.id);
        sessions.close(second.id).await.unwrap();
        assert_eq!(sessions.current_for(org).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_planned_end_must_follow_start() {
        let (sessions, clock, org) = setup().await;
        let err = sessions
            .create(org, request(Some(clock.now() - Duration::minutes(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
