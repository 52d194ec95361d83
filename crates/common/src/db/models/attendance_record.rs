//! Attendance record entity
//!
//! One ledger row per check-in. The check-out columns are filled at most
//! once and rows are never deleted.

use super::types::CheckInMethod;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub organization_id: Uuid,

    pub subscriber_id: Uuid,

    pub session_id: Uuid,

    pub check_in_time: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub check_out_time: Option<DateTimeWithTimeZone>,

    pub check_in_method: CheckInMethod,

    #[sea_orm(nullable)]
    pub check_out_method: Option<CheckInMethod>,
}

impl Model {
    /// Subscriber is still in the session
    pub fn is_open(&self) -> bool {
        self.check_out_time.is_none()
    }

    /// Time spent, `None` while ongoing
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.check_out_time.map(|out| out - self.check_in_time)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::SessionId",
        to = "super::session::Column::Id"
    )]
    Session,

    #[sea_orm(
        belongs_to = "super::subscriber::Entity",
        from = "Column::SubscriberId",
        to = "super::subscriber::Column::Id"
    )]
    Subscriber,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::subscriber::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriber.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
