//! Value types shared by several entities

use chrono::{Datelike, NaiveDate, Weekday};
use sea_orm::entity::prelude::*;
#[allow(unused_imports)]
use sea_orm::sea_query::StringLen;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Physical channel a check-in arrives through
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInMethod {
    #[sea_orm(string_value = "NFC")]
    Nfc,
    #[sea_orm(string_value = "QR")]
    Qr,
    #[sea_orm(string_value = "BLUETOOTH")]
    Bluetooth,
    #[sea_orm(string_value = "WIFI")]
    Wifi,
    #[sea_orm(string_value = "MOBILE_NFC")]
    MobileNfc,
}

impl CheckInMethod {
    /// Wire name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInMethod::Nfc => "NFC",
            CheckInMethod::Qr => "QR",
            CheckInMethod::Bluetooth => "BLUETOOTH",
            CheckInMethod::Wifi => "WIFI",
            CheckInMethod::MobileNfc => "MOBILE_NFC",
        }
    }

    /// Label shown to people
    pub fn display_name(&self) -> &'static str {
        match self {
            CheckInMethod::Nfc => "NFC Card",
            CheckInMethod::Qr => "QR Code",
            CheckInMethod::Bluetooth => "Bluetooth",
            CheckInMethod::Wifi => "WiFi",
            CheckInMethod::MobileNfc => "Mobile NFC",
        }
    }
}

impl fmt::Display for CheckInMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of week as stored in schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn of(date: NaiveDate) -> Self {
        Self::from(date.weekday())
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Set of allowed check-in methods, stored as JSONB
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct MethodSet(pub BTreeSet<CheckInMethod>);

impl MethodSet {
    pub fn contains(&self, method: CheckInMethod) -> bool {
        self.0.contains(&method)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckInMethod> {
        self.0.iter()
    }
}

impl FromIterator<CheckInMethod> for MethodSet {
    fn from_iter<I: IntoIterator<Item = CheckInMethod>>(iter: I) -> Self {
        MethodSet(iter.into_iter().collect())
    }
}

/// Set of weekdays a schedule runs on, stored as JSONB
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct DaySet(pub BTreeSet<DayOfWeek>);

impl DaySet {
    pub fn contains(&self, day: DayOfWeek) -> bool {
        self.0.contains(&day)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<DayOfWeek> for DaySet {
    fn from_iter<I: IntoIterator<Item = DayOfWeek>>(iter: I) -> Self {
        DaySet(iter.into_iter().collect())
    }
}
