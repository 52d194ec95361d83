//! Scheduled session entity
//!
//! A recurring template. Concrete [`super::Session`] rows are generated from
//! it one calendar day at a time.

use super::types::{DayOfWeek, DaySet, MethodSet};
use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduled_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Wall-clock start in the organization's offset
    pub start_time: Time,

    pub duration_minutes: i32,

    #[sea_orm(column_type = "JsonBinary")]
    pub days_of_week: DaySet,

    #[sea_orm(column_type = "JsonBinary")]
    pub allowed_methods: MethodSet,

    pub active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the template produces an instance on `date`
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        self.days_of_week.contains(DayOfWeek::of(date))
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes as i64)
    }

    /// Absolute start of the instance on `date`
    ///
    /// Falls back to reading the wall time as UTC when it does not exist in
    /// `offset`, which cannot happen for a fixed offset.
    pub fn start_at(&self, date: NaiveDate, offset: FixedOffset) -> DateTimeWithTimeZone {
        let local = date.and_time(self.start_time);
        offset
            .from_local_datetime(&local)
            .single()
            .unwrap_or_else(|| Utc.from_utc_datetime(&local).fixed_offset())
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

    #[sea_orm(has_many = "super::session::Entity")]
    Sessions,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
