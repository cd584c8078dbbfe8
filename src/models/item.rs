use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub item_id: i64,
    pub trip_id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub is_checked: bool,
    pub created_at: DateTime<Utc>,
}

/// Row shape for bulk checklist inserts, produced by the template generator
/// and by the AI-suggestion picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub trip_id: i64,
    pub item_name: String,
    pub quantity: i64,
    pub is_checked: bool,
}
