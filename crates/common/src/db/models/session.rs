//! Session entity
//!
//! A concrete attendance window. `end_time` stays `NULL` while the session
//! is open and is written exactly once when it closes.

use super::types::{CheckInMethod, MethodSet};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    /// Template this instance was expanded from, `None` for ad-hoc sessions
    #[sea_orm(nullable)]
    pub scheduled_session_id: Option<Uuid>,

    /// Calendar day of the expansion
    #[sea_orm(nullable)]
    pub scheduled_date: Option<Date>,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub start_time: DateTimeWithTimeZone,

    /// Planned close time; the sweeper closes the session once it passes
    #[sea_orm(nullable)]
    pub scheduled_end: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub end_time: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "JsonBinary")]
    pub allowed_methods: MethodSet,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn allows(&self, method: CheckInMethod) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Open and past its planned end
    pub fn is_overdue(&self, now: DateTimeWithTimeZone) -> bool {
        self.is_open() && self.scheduled_end.is_some_and(|end| end <= now)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id"
    )]
    Organization,

    #[sea_orm(
        belongs_to = "super::scheduled_session::Entity",
        from = "Column::ScheduledSessionId",
        to = "super::scheduled_session::Column::Id"
    )]
    ScheduledSession,

    #[sea_orm(has_many = "super::attendance_record::Entity")]
    AttendanceRecords,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl Related<super::scheduled_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledSession.def()
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AttendanceRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
