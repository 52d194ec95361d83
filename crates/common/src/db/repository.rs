//! Repository pattern for database operations
//!
//! Postgres implementation of [`AttendanceStore`]. Plain lookups go through
//! the entity API; the atomic primitives are single statements guarded by
//! the unique indexes in `schema.sql`, or a short transaction with row locks
//! for card assignment.

use crate::db::models::*;
use crate::db::store::{AttendanceStore, CheckInInsert};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, SqlErr, Statement, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

/// How often a check-in insert is retried when the conflicting open record
/// closes before it can be read back
const CHECK_IN_ATTEMPTS: usize = 3;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn postgres(sql: &str, values: Vec<sea_orm::Value>) -> Statement {
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[async_trait]
impl AttendanceStore for Repository {
    // ========================================================================
    // Organization and Subscriber Operations
    // ========================================================================

    async fn insert_organization(&self, organization: Organization) -> Result<Organization> {
        let entity_id = organization.entity_id.clone();
        organization
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict {
                        message: format!("Organization {} already exists", entity_id),
                    }
                } else {
                    e.into()
                }
            })
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        OrganizationEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_subscriber(&self, subscriber: Subscriber) -> Result<Subscriber> {
        subscriber
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>> {
        SubscriberEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_subscribers(&self, organization_id: Uuid) -> Result<Vec<Subscriber>> {
        SubscriberEntity::find()
            .filter(SubscriberColumn::OrganizationId.eq(organization_id))
            .order_by_asc(SubscriberColumn::LastName)
            .order_by_asc(SubscriberColumn::FirstName)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Scheduled Session Operations
    // ========================================================================

    async fn insert_scheduled_session(&self, template: ScheduledSession) -> Result<ScheduledSession> {
        template
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_scheduled_session(
        &self,
        template: ScheduledSession,
    ) -> Result<Option<ScheduledSession>> {
        match template
            .into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
        {
            Ok(updated) => Ok(Some(updated)),
            Err(DbErr::RecordNotUpdated) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_scheduled_session(&self, id: Uuid) -> Result<Option<ScheduledSession>> {
        ScheduledSessionEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_scheduled_sessions(
        &self,
        organization_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<ScheduledSession>> {
        let mut query = ScheduledSessionEntity::find()
            .filter(ScheduledSessionColumn::OrganizationId.eq(organization_id));
        if active_only {
            query = query.filter(ScheduledSessionColumn::Active.eq(true));
        }
        query
            .order_by_asc(ScheduledSessionColumn::StartTime)
            .order_by_asc(ScheduledSessionColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    async fn insert_session(&self, session: Session) -> Result<Session> {
        session
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_session_for_date(&self, session: Session) -> Result<Session> {
        let (Some(template_id), Some(date)) = (session.scheduled_session_id, session.scheduled_date)
        else {
            return Err(AppError::Internal {
                message: "derived session is missing its template or date".to_string(),
            });
        };

        let stmt = postgres(
            r#"
            INSERT INTO sessions (
                id, organization_id, scheduled_session_id, scheduled_date, name,
                description, start_time, scheduled_end, end_time, allowed_methods, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $10)
            ON CONFLICT (scheduled_session_id, scheduled_date) DO NOTHING
            RETURNING *
            "#,
            vec![
                session.id.into(),
                session.organization_id.into(),
                template_id.into(),
                date.into(),
                session.name.clone().into(),
                session.description.clone().into(),
                session.start_time.into(),
                session.scheduled_end.into(),
                serde_json::to_value(&session.allowed_methods)?.into(),
                session.created_at.into(),
            ],
        );

        if let Some(inserted) = SessionEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
        {
            return Ok(inserted);
        }

        debug!(%template_id, %date, "Session already expanded by another caller");
        SessionEntity::find()
            .filter(SessionColumn::ScheduledSessionId.eq(template_id))
            .filter(SessionColumn::ScheduledDate.eq(date))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("session for {} on {} vanished after conflict", template_id, date),
            })
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        // Primary only: a lagging replica would still report a closed session as open
        SessionEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_session_for_date(
        &self,
        scheduled_session_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<Session>> {
        SessionEntity::find()
            .filter(SessionColumn::ScheduledSessionId.eq(scheduled_session_id))
            .filter(SessionColumn::ScheduledDate.eq(date))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_open_sessions(&self, organization_id: Uuid) -> Result<Vec<Session>> {
        // Primary: a session closed a moment ago must not be offered again
        SessionEntity::find()
            .filter(SessionColumn::OrganizationId.eq(organization_id))
            .filter(SessionColumn::EndTime.is_null())
            .order_by_desc(SessionColumn::StartTime)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_overdue_sessions(&self, now: DateTime<FixedOffset>) -> Result<Vec<Session>> {
        SessionEntity::find()
            .filter(SessionColumn::EndTime.is_null())
            .filter(SessionColumn::ScheduledEnd.lte(now))
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn close_session(&self, id: Uuid, at: DateTime<FixedOffset>) -> Result<Option<Session>> {
        let stmt = postgres(
            "UPDATE sessions SET end_time = $2 WHERE id = $1 AND end_time IS NULL RETURNING *",
            vec![id.into(), at.into()],
        );
        SessionEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Attendance Record Operations
    // ========================================================================

    async fn insert_check_in(&self, record: AttendanceRecord) -> Result<CheckInInsert> {
        for _ in 0..CHECK_IN_ATTEMPTS {
            let stmt = postgres(
                r#"
                INSERT INTO attendance_records (
                    id, organization_id, subscriber_id, session_id,
                    check_in_time, check_out_time, check_in_method, check_out_method
                )
                VALUES ($1, $2, $3, $4, $5, NULL, $6, NULL)
                ON CONFLICT (subscriber_id, session_id) WHERE check_out_time IS NULL DO NOTHING
                RETURNING *
                "#,
                vec![
                    record.id.into(),
                    record.organization_id.into(),
                    record.subscriber_id.into(),
                    record.session_id.into(),
                    record.check_in_time.into(),
                    record.check_in_method.as_str().into(),
                ],
            );

            if let Some(inserted) = AttendanceRecordEntity::find()
                .from_raw_sql(stmt)
                .one(self.write_conn())
                .await?
            {
                return Ok(CheckInInsert::Inserted(inserted));
            }

            // Read from the primary; the winner's row may not be replicated yet
            let open = AttendanceRecordEntity::find()
                .filter(AttendanceRecordColumn::SubscriberId.eq(record.subscriber_id))
                .filter(AttendanceRecordColumn::SessionId.eq(record.session_id))
                .filter(AttendanceRecordColumn::CheckOutTime.is_null())
                .one(self.write_conn())
                .await?;
            if let Some(open) = open {
                return Ok(CheckInInsert::Conflict(open));
            }
        }

        Err(AppError::Conflict {
            message: format!(
                "check-in for subscriber {} in session {} kept conflicting",
                record.subscriber_id, record.session_id
            ),
        })
    }

    async fn find_open_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        AttendanceRecordEntity::find()
            .filter(AttendanceRecordColumn::SubscriberId.eq(subscriber_id))
            .filter(AttendanceRecordColumn::SessionId.eq(session_id))
            .filter(AttendanceRecordColumn::CheckOutTime.is_null())
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_latest_record(
        &self,
        subscriber_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<AttendanceRecord>> {
        AttendanceRecordEntity::find()
            .filter(AttendanceRecordColumn::SubscriberId.eq(subscriber_id))
            .filter(AttendanceRecordColumn::SessionId.eq(session_id))
            .order_by_desc(AttendanceRecordColumn::CheckInTime)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_record(&self, id: Uuid) -> Result<Option<AttendanceRecord>> {
        AttendanceRecordEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn close_record(
        &self,
        id: Uuid,
        at: DateTime<FixedOffset>,
        method: CheckInMethod,
    ) -> Result<Option<AttendanceRecord>> {
        let stmt = postgres(
            r#"
            UPDATE attendance_records
            SET check_out_time = $2, check_out_method = $3
            WHERE id = $1 AND check_out_time IS NULL
            RETURNING *
            "#,
            vec![id.into(), at.into(), method.as_str().into()],
        );
        AttendanceRecordEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn records_for_session(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        AttendanceRecordEntity::find()
            .filter(AttendanceRecordColumn::SessionId.eq(session_id))
            .order_by_asc(AttendanceRecordColumn::CheckInTime)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn records_for_subscriber(
        &self,
        subscriber_id: Uuid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<AttendanceRecord>> {
        AttendanceRecordEntity::find()
            .filter(AttendanceRecordColumn::SubscriberId.eq(subscriber_id))
            .filter(AttendanceRecordColumn::CheckInTime.gte(from))
            .filter(AttendanceRecordColumn::CheckInTime.lt(to))
            .order_by_asc(AttendanceRecordColumn::CheckInTime)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // NFC Card Operations
    // ========================================================================

    async fn insert_card(&self, card: NfcCard) -> Result<NfcCard> {
        let card_uid = card.card_uid.clone();
        card.into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::CardAlreadyRegistered { card_uid }
                } else {
                    e.into()
                }
            })
    }

    async fn find_card(&self, card_uid: &str) -> Result<Option<NfcCard>> {
        NfcCardEntity::find()
            .filter(NfcCardColumn::CardUid.eq(card_uid))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_cards(&self, organization_id: Uuid, unassigned_only: bool) -> Result<Vec<NfcCard>> {
        let mut query = NfcCardEntity::find().filter(NfcCardColumn::OrganizationId.eq(organization_id));
        if unassigned_only {
            query = query.filter(NfcCardColumn::SubscriberId.is_null());
        }
        query
            .order_by_asc(NfcCardColumn::CardUid)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn assign_card(
        &self,
        card_uid: &str,
        subscriber_id: Uuid,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard> {
        let txn = self.write_conn().begin().await?;

        let card = NfcCardEntity::find()
            .from_raw_sql(postgres(
                "SELECT * FROM nfc_cards WHERE card_uid = $1 FOR UPDATE",
                vec![card_uid.into()],
            ))
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::CardNotFound { card_uid: card_uid.to_string() })?;

        match card.subscriber_id {
            Some(holder) if holder == subscriber_id => return Ok(card),
            Some(_) => {
                return Err(AppError::CardAlreadyAssigned { card_uid: card_uid.to_string() })
            }
            None => {}
        }

        let already_holds = NfcCardEntity::find()
            .filter(NfcCardColumn::SubscriberId.eq(subscriber_id))
            .filter(NfcCardColumn::IsActive.eq(true))
            .filter(NfcCardColumn::CardUid.ne(card_uid))
            .one(&txn)
            .await?;
        if already_holds.is_some() {
            return Err(AppError::SubscriberAlreadyHasCard {
                subscriber_id: subscriber_id.to_string(),
            });
        }

        let mut active = card.into_active_model();
        active.subscriber_id = Set(Some(subscriber_id));
        active.updated_at = Set(at);
        let updated = active.update(&txn).await.map_err(|e| {
            // Lost a race against another assignment to the same subscriber
            if is_unique_violation(&e) {
                AppError::SubscriberAlreadyHasCard { subscriber_id: subscriber_id.to_string() }
            } else {
                e.into()
            }
        })?;

        txn.commit().await?;
        Ok(updated)
    }

    async fn unassign_card(&self, card_uid: &str, at: DateTime<FixedOffset>) -> Result<NfcCard> {
        let stmt = postgres(
            r#"
            UPDATE nfc_cards
            SET subscriber_id = NULL,
                updated_at = CASE WHEN subscriber_id IS NULL THEN updated_at ELSE $2 END
            WHERE card_uid = $1
            RETURNING *
            "#,
            vec![card_uid.into(), at.into()],
        );
        NfcCardEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::CardNotFound { card_uid: card_uid.to_string() })
    }

    async fn set_card_active(
        &self,
        card_uid: &str,
        active: bool,
        at: DateTime<FixedOffset>,
    ) -> Result<NfcCard> {
        let card = self
            .find_card(card_uid)
            .await?
            .ok_or_else(|| AppError::CardNotFound { card_uid: card_uid.to_string() })?;
        let holder = card.subscriber_id;

        let mut model = card.into_active_model();
        model.is_active = Set(active);
        model.updated_at = Set(at);
        model.update(self.write_conn()).await.map_err(|e| match holder {
            Some(holder) if is_unique_violation(&e) => {
                AppError::SubscriberAlreadyHasCard { subscriber_id: holder.to_string() }
            }
            _ => e.into(),
        })
    }

    async fn delete_card(&self, card_uid: &str) -> Result<bool> {
        let result = NfcCardEntity::delete_many()
            .filter(NfcCardColumn::CardUid.eq(card_uid))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn delete_cards(&self, organization_id: Uuid) -> Result<u64> {
        let result = NfcCardEntity::delete_many()
            .filter(NfcCardColumn::OrganizationId.eq(organization_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn at(hour: u32) -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap().fixed_offset()
    }

    fn session(id: Uuid, end_time: Option<DateTime<FixedOffset>>) -> Session {
        Session {
            id,
            organization_id: Uuid::new_v4(),
            scheduled_session_id: None,
            scheduled_date: None,
            name: "Morning".into(),
            description: None,
            start_time: at(9),
            scheduled_end: None,
            end_time,
            allowed_methods: [CheckInMethod::Nfc].into_iter().collect(),
            created_at: at(8),
        }
    }

    fn record(id: Uuid, check_out_time: Option<DateTime<FixedOffset>>) -> AttendanceRecord {
        AttendanceRecord {
            id,
            organization_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            check_in_time: at(9),
            check_out_time,
            check_in_method: CheckInMethod::Nfc,
            check_out_method: check_out_time.map(|_| CheckInMethod::Nfc),
        }
    }

    #[tokio::test]
    async fn test_session_state_read_from_primary() {
        let id = Uuid::new_v4();
        let primary = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session(id, Some(at(10)))]])
            .into_connection();
        // replica has not seen the close yet
        let replica = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session(id, None)]])
            .into_connection();
        let repo = Repository::new(DbPool { primary, replica: Some(replica) });

        let found = repo.find_session(id).await.unwrap().unwrap();
        assert!(!found.is_open());
    }

    #[tokio::test]
    async fn test_record_read_from_primary() {
        let id = Uuid::new_v4();
        let primary = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(id, Some(at(10)))]])
            .into_connection();
        let replica = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<AttendanceRecord>::new()])
            .into_connection();
        let repo = Repository::new(DbPool { primary, replica: Some(replica) });

        let found = repo.find_record(id).await.unwrap().unwrap();
        assert!(!found.is_open());
    }
}
