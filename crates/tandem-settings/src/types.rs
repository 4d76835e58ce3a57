//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so a settings file only needs the keys it overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TandemSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub schedule: ScheduleSettings,
    pub notifications: NotificationSettings,
    pub logging: LoggingSettings,
}

impl TandemSettings {
    /// Reject combinations the services cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.rollover_hour_utc > 23 {
            return Err(SettingsError::InvalidValue(format!(
                "schedule.rolloverHourUtc must be 0-23, got {}",
                self.schedule.rollover_hour_utc
            )));
        }
        if self.schedule.reminder_cooldown_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "schedule.reminderCooldownSecs must be positive".to_string(),
            ));
        }
        if self.schedule.dispatch_poll_ms == 0 || self.schedule.dispatch_batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "schedule.dispatchPollMs and dispatchBatchSize must be positive".to_string(),
            ));
        }
        if self.notifications.gateway == GatewayKind::Http
            && self.notifications.relay_url.is_none()
        {
            return Err(SettingsError::InvalidValue(
                "notifications.relayUrl is required for the http gateway".to_string(),
            ));
        }
        if self.server.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "server.jwtSecret must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP callable surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// HS256 secret used to verify client bearer tokens.
    pub jwt_secret: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9470,
            jwt_secret: "change-me".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file, relative to `~/.tandem` unless absolute.
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "database/tandem.db".to_string(),
        }
    }
}

/// Rollover, reminder and change-feed timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleSettings {
    pub rollover_hour_utc: u32,
    pub reminder_cooldown_secs: u64,
    pub dispatch_poll_ms: u64,
    pub dispatch_batch_size: u32,
    pub rollover_interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            rollover_hour_utc: 12,
            reminder_cooldown_secs: 4 * 60 * 60,
            dispatch_poll_ms: 500,
            dispatch_batch_size: 100,
            rollover_interval_secs: 300,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Log messages instead of delivering them.
    #[default]
    Log,
    /// POST to a push relay.
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub gateway: GatewayKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            gateway: GatewayKind::Log,
            relay_url: None,
            relay_token: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
    /// Per-target level overrides, e.g. `{"tandem_store": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}
