use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-user row in `user_setting`. Created at registration; the AI counter
/// is reset daily by an external job, not by this application.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSetting {
    pub user_id: i64,
    pub name: Option<String>,
    pub email: String,
    pub hide_completed: bool,
    pub ai_suggestion_counts: i64,
}

impl UserSetting {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}
