use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TripType {
    #[default]
    #[serde(rename = "personal")]
    Personal,
    #[serde(rename = "group")]
    Group,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Personal => "personal",
            TripType::Group => "group",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub trip_id: i64,
    pub user_id: i64,
    pub location_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trip_type: String,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn trip_type(&self) -> TripType {
        match self.trip_type.as_str() {
            "group" => TripType::Group,
            _ => TripType::Personal,
        }
    }

    pub fn is_group(&self) -> bool {
        self.trip_type() == TripType::Group
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripLink {
    pub link_id: i64,
    pub group_trip_id: i64,
    pub personal_trip_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}
