//! SeaORM entity models
//!
//! Database entities for the attendance engine

mod organization;
mod subscriber;
mod scheduled_session;
mod session;
mod attendance_record;
mod nfc_card;
mod types;

pub use types::{CheckInMethod, DayOfWeek, DaySet, MethodSet};

pub use organization::{
    Entity as OrganizationEntity,
    Model as Organization,
    ActiveModel as OrganizationActiveModel,
    Column as OrganizationColumn,
};

pub use subscriber::{
    Entity as SubscriberEntity,
    Model as Subscriber,
    ActiveModel as SubscriberActiveModel,
    Column as SubscriberColumn,
};

pub use scheduled_session::{
    Entity as ScheduledSessionEntity,
    Model as ScheduledSession,
    ActiveModel as ScheduledSessionActiveModel,
    Column as ScheduledSessionColumn,
};

pub use session::{
    Entity as SessionEntity,
    Model as Session,
    ActiveModel as SessionActiveModel,
    Column as SessionColumn,
};

pub use attendance_record::{
    Entity as AttendanceRecordEntity,
    Model as AttendanceRecord,
    ActiveModel as AttendanceRecordActiveModel,
    Column as AttendanceRecordColumn,
};

pub use nfc_card::{
    normalize_uid,
    Entity as NfcCardEntity,
    Model as NfcCard,
    ActiveModel as NfcCardActiveModel,
    Column as NfcCardColumn,
};
