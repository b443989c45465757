//! Device sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum!(DeviceType {
    Ios => "ios",
    Android => "android",
    Web => "web",
    MobileWeb => "mobile_web",
    Desktop => "desktop",
    Unknown => "unknown",
});

pub mod revoke_reason {
    pub const USER_ACTION: &str = "user_action";
    pub const USER_REVOKE_ALL: &str = "user_revoke_all";
    pub const TOKENS_INVALIDATED: &str = "tokens_invalidated";
    pub const EXPIRED: &str = "expired";
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserSession {
    pub id: i64,
    pub customer_id: i64,
    pub session_key: String,
    pub refresh_jti: String,
    pub device_name: String,
    #[sqlx(try_from = "String")]
    pub device_type: DeviceType,
    pub device_id: String,
    pub app_version: String,
    pub os_version: String,
    pub ip_address: String,
    pub user_agent: String,
    pub location: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl UserSession {
    pub fn device_display(&self) -> String {
        if !self.device_name.trim().is_empty() {
            return self.device_name.clone();
        }
        match self.device_type {
            DeviceType::Unknown => "Unknown Device".to_string(),
            other => capitalize(other.as_str()),
        }
    }

    pub fn location_display(&self) -> String {
        if self.location.trim().is_empty() { "Unknown Location".to_string() } else { self.location.clone() }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }

    pub fn revoke(&mut self, reason: &str, now: DateTime<Utc>) {
        self.is_active = false;
        self.revoked_at = Some(now);
        self.revoked_reason = Some(reason.to_string());
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `device_info` block sent by the mobile apps at login.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfoInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub os_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: DeviceType,
    pub device_id: String,
    pub app_version: String,
    pub os_version: String,
    pub user_agent: String,
}

impl DeviceInfo {
    pub fn resolve(input: Option<DeviceInfoInput>, user_agent: &str) -> Self {
        let user_agent: String = user_agent.chars().take(500).collect();
        match input {
            Some(info) => Self {
                name: info.name,
                device_type: info.platform.trim().to_lowercase().parse().unwrap_or(DeviceType::Unknown),
                device_id: info.id,
                app_version: info.app_version,
                os_version: info.os_version,
                user_agent,
            },
            None if !user_agent.is_empty() => {
                let mobile = ["Mobile", "Android", "iPhone", "iPad"].iter().any(|m| user_agent.contains(m));
                Self {
                    name: "Web Browser".to_string(),
                    device_type: if mobile { DeviceType::MobileWeb } else { DeviceType::Web },
                    device_id: String::new(),
                    app_version: String::new(),
                    os_version: String::new(),
                    user_agent,
                }
            }
            None => Self {
                name: String::new(),
                device_type: DeviceType::Unknown,
                device_id: String::new(),
                app_version: String::new(),
                os_version: String::new(),
                user_agent,
            },
        }
    }
}
