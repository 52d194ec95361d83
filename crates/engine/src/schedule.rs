//! Schedule expansion
//!
//! Turns a recurring [`ScheduledSession`] into the concrete [`Session`] for
//! one calendar day. Expansion is idempotent per `(template, date)`: the
//! store's create-if-absent primitive picks a single winner when several
//! callers expand the same day at once, and every caller gets that row back.
//!
//! Also owns template maintenance (create, update, deactivate).

use attendance_common::clock::Clock;
use attendance_common::db::models::{DaySet, MethodSet, ScheduledSession, Session};
use attendance_common::db::AttendanceStore;
use attendance_common::errors::{AppError, Result};
use attendance_common::metrics;
use chrono::{FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

fn default_true() -> bool {
    true
}

/// Editable fields of a template
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScheduleDefinition {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Wall-clock start, e.g. `"09:00"`
    pub start_time: NaiveTime,

    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,

    pub days_of_week: DaySet,

    pub allowed_methods: MethodSet,

    #[serde(default = "default_true")]
    pub active: bool,
}

impl ScheduleDefinition {
    /// Field validation plus the non-empty set rule for active templates
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.active && self.days_of_week.is_empty() {
            return Err(AppError::Validation {
                message: "An active schedule needs at least one day".to_string(),
                field: Some("days_of_week".to_string()),
            });
        }
        if self.active && self.allowed_methods.is_empty() {
            return Err(AppError::Validation {
                message: "An active schedule needs at least one check-in method".to_string(),
                field: Some("allowed_methods".to_string()),
            });
        }
        Ok(())
    }
}

/// Schedule expander and template maintenance
#[derive(Clone)]
pub struct Schedules {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl Schedules {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self { store, clock, offset }
    }

    /// Current calendar day in the organization's wall clock
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }

    /// Concrete session of `template` on `date`, created on first use
    #[instrument(skip_all, fields(scheduled_session_id = %template.id, date = %date))]
    pub async fn ensure_instance_for(
        &self,
        template: &ScheduledSession,
        date: NaiveDate,
    ) -> Result<Session> {
        if !template.runs_on(date) {
            return Err(AppError::NotScheduledOnDate { date: date.to_string() });
        }

        if let Some(existing) = self.store.find_session_for_date(template.id, date).await? {
            return Ok(existing);
        }

        // Instances that already exist stay reachable after deactivation
        if !template.active {
            return Err(AppError::ScheduleInactive { id: template.id.to_string() });
        }

        let start = template.start_at(date, self.offset);
        let candidate = Session {
            id: Uuid::new_v4(),
            organization_id: template.organization_id,
            scheduled_session_id: Some(template.id),
            scheduled_date: Some(date),
            name: template.name.clone(),
            description: template.description.clone(),
            start_time: start,
            scheduled_end: Some(start + template.duration()),
            end_time: None,
            allowed_methods: template.allowed_methods.clone(),
            created_at: self.clock.now(),
        };
        let candidate_id = candidate.id;

        let session = self.store.insert_session_for_date(candidate).await?;
        if session.id == candidate_id {
            metrics::record_session_expanded();
            info!(session_id = %session.id, "Expanded scheduled session");
        } else {
            debug!(session_id = %session.id, "Reused instance created concurrently");
        }
        Ok(session)
    }

    /// Today's instance of a template
    pub async fn ensure_instance_today(&self, scheduled_session_id: Uuid) -> Result<Session> {
        let template = self.get(scheduled_session_id).await?;
        self.ensure_instance_for(&template, self.today()).await
    }

    // ========================================================================
    // Template maintenance
    // ========================================================================

    pub async fn get(&self, id: Uuid) -> Result<ScheduledSession> {
        self.store
            .find_scheduled_session(id)
            .await?
            .ok_or_else(|| AppError::ScheduledSessionNotFound { id: id.to_string() })
    }

    pub async fn list(&self, organization_id: Uuid, active_only: bool) -> Result<Vec<ScheduledSession>> {
        self.store.list_scheduled_sessions(organization_id, active_only).await
    }

    #[instrument(skip(self, definition), fields(name = %definition.name))]
    pub async fn create(
        &self,
        organization_id: Uuid,
        definition: ScheduleDefinition,
    ) -> Result<ScheduledSession> {
        definition.check()?;
        if self.store.find_organization(organization_id).await?.is_none() {
            return Err(AppError::OrganizationNotFound { id: organization_id.to_string() });
        }

        let now = self.clock.now();
        let template = ScheduledSession {
            id: Uuid::new_v4(),
            organization_id,
            name: definition.name,
            description: definition.description,
            start_time: definition.start_time,
            duration_minutes: definition.duration_minutes,
            days_of_week: definition.days_of_week,
            allowed_methods: definition.allowed_methods,
            active: definition.active,
            created_at: now,
            updated_at: now,
        };
        let template = self.store.insert_scheduled_session(template).await?;
        info!(scheduled_session_id = %template.id, "Created scheduled session");
        Ok(template)
    }

    /// Replace the editable fields. Sessions already expanded keep the
    /// values they were created with.
    pub async fn update(&self, id: Uuid, definition: ScheduleDefinition) -> Result<ScheduledSession> {
        definition.check()?;
        let current = self.get(id).await?;

        let updated = ScheduledSession {
            name: definition.name,
            description: definition.description,
            start_time: definition.start_time,
            duration_minutes: definition.duration_minutes,
            days_of_week: definition.days_of_week,
            allowed_methods: definition.allowed_methods,
            active: definition.active,
            updated_at: self.clock.now(),
            ..current
        };
        self.store
            .update_scheduled_session(updated)
            .await?
            .ok_or_else(|| AppError::ScheduledSessionNotFound { id: id.to_string() })
    }

    /// Soft delete
    pub async fn deactivate(&self, id: Uuid) -> Result<ScheduledSession> {
        let current = self.get(id).await?;
        if !current.active {
            return Ok(current);
        }
        let updated = ScheduledSession {
            active: false,
            updated_at: self.clock.now(),
            ..current
        };
        self.store
            .update_scheduled_session(updated)
            .await?
            .ok_or_else(|| AppError::ScheduledSessionNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_common::clock::ManualClock;
    use attendance_common::db::models::{CheckInMethod, DayOfWeek, Organization};
    use attendance_common::db::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn monday_morning() -> chrono::DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap().fixed_offset()
    }

    async fn setup() -> (Schedules, Uuid) {
        let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let org = Organization {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            entity_id: "ACME".into(),
            created_at: monday_morning(),
        };
        store.insert_organization(org.clone()).await.unwrap();
        let offset = FixedOffset::east_opt(0).unwrap();
        (Schedules::new(store, clock, offset), org.id)
    }

    fn definition() -> ScheduleDefinition {
        ScheduleDefinition {
            name: "Standup".into(),
            description: None,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_minutes: 60,
            days_of_week: [DayOfWeek::Monday].into_iter().collect(),
            allowed_methods: [CheckInMethod::Nfc].into_iter().collect(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_expands_monday_template() {
        let (schedules, org) = setup().await;
        let template = schedules.create(org, definition()).await.unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let session = schedules.ensure_instance_for(&template, monday).await.unwrap();
        assert_eq!(session.start_time, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        assert_eq!(
            session.scheduled_end,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap().fixed_offset())
        );
        assert!(session.end_time.is_none());
        assert!(session.allows(CheckInMethod::Nfc));

        let again = schedules.ensure_instance_for(&template, monday).await.unwrap();
        assert_eq!(again.id, session.id);
    }

    #[tokio::test]
    async fn test_rejects_unscheduled_day() {
        let (schedules, org) = setup().await;
        let template = schedules.create(org, definition()).await.unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let err = schedules.ensure_instance_for(&template, tuesday).await.unwrap_err();
        assert!(matches!(err, AppError::NotScheduledOnDate { .. }));
    }

    #[tokio::test]
    async fn test_active_template_needs_days_and_methods() {
        let (schedules, org) = setup().await;

        let mut no_days = definition();
        no_days.days_of_week = DaySet::default();
        let err = schedules.create(org, no_days).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "days_of_week"));

        let mut inactive = definition();
        inactive.allowed_methods = MethodSet::default();
        inactive.active = false;
        assert!(schedules.create(org, inactive).await.is_ok());

        let mut zero = definition();
        zero.duration_minutes = 0;
        assert!(schedules.create(org, zero).await.is_err());
    }

    #[tokio::test]
    async fn test_deactivated_template_stops_expanding() {
        let (schedules, org) = setup().await;
        let template = schedules.create(org, definition()).await.unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let existing = schedules.ensure_instance_for(&template, monday).await.unwrap();

        let template = schedules.deactivate(template.id).await.unwrap();
        assert!(!template.active);

        // the instance created before deactivation is still served
        let same = schedules.ensure_instance_for(&template, monday).await.unwrap();
        assert_eq!(same.id, existing.id);

        let next_monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let err = schedules.ensure_instance_for(&template, next_monday).await.unwrap_err();
        assert!(matches!(err, AppError::ScheduleInactive { .. }));
    }

    #[tokio::test]
    async fn test_today_follows_offset() {
        let store: Arc<dyn AttendanceStore> = Arc::new(MemoryStore::new());
        // 23:30 UTC on Sunday is already Monday at +01:00
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap().fixed_offset(),
        ));
        let schedules = Schedules::new(store, clock, FixedOffset::east_opt(3600).unwrap());
        assert_eq!(schedules.today(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }
}
