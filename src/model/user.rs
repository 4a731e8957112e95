use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: i64,
    #[serde(default)]
    pub alpaca_api_key: String,
    /// Accepted on write, never echoed back.
    #[serde(default, skip_serializing)]
    pub alpaca_secret_key: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub notifications_email: bool,
    #[serde(default)]
    pub notifications_push: bool,
}

fn default_theme() -> String {
    "dark".to_string()
}

impl UserSettings {
    pub fn defaults_for(user_id: i64) -> Self {
        Self {
            user_id,
            theme: default_theme(),
            ..Self::default()
        }
    }
}
