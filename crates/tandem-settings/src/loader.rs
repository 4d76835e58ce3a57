//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{GatewayKind, TandemSettings};

/// Base directory for settings and relative data paths (`~/.tandem`).
pub fn tandem_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tandem")
}

/// Default settings file (`~/.tandem/settings.json`).
pub fn settings_path() -> PathBuf {
    tandem_home().join("settings.json")
}

/// Resolve a configured path against `~/.tandem` unless it is absolute.
pub fn resolve_data_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        tandem_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TandemSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TandemSettings> {
    let defaults = serde_json::to_value(TandemSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TandemSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TANDEM_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_env_overrides(settings: &mut TandemSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("TANDEM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "TANDEM_PORT", |v| parse_u64_range(v, 1, 65_535)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read("TANDEM_JWT_SECRET") {
        settings.server.jwt_secret = v;
    }
    if let Some(v) = read("TANDEM_DATABASE") {
        settings.storage.database_path = v;
    }
    if let Some(v) = parsed(&read, "TANDEM_ROLLOVER_HOUR_UTC", |v| parse_u64_range(v, 0, 23)) {
        settings.schedule.rollover_hour_utc = v as u32;
    }
    if let Some(v) = parsed(&read, "TANDEM_REMINDER_COOLDOWN_SECS", |v| {
        parse_u64_range(v, 1, 604_800)
    }) {
        settings.schedule.reminder_cooldown_secs = v;
    }
    if let Some(v) = parsed(&read, "TANDEM_ROLLOVER_INTERVAL_SECS", |v| {
        parse_u64_range(v, 1, 86_400)
    }) {
        settings.schedule.rollover_interval_secs = v;
    }
    if let Some(v) = read("TANDEM_GATEWAY") {
        match v.as_str() {
            "log" => settings.notifications.gateway = GatewayKind::Log,
            "http" => settings.notifications.gateway = GatewayKind::Http,
            other => {
                tracing::warn!(key = "TANDEM_GATEWAY", value = %other, "unknown gateway, ignoring")
            }
        }
    }
    if let Some(v) = read("TANDEM_RELAY_URL") {
        settings.notifications.relay_url = Some(v);
    }
    if let Some(v) = read("TANDEM_RELAY_TOKEN") {
        settings.notifications.relay_token = Some(v);
    }
    if let Some(v) = read("TANDEM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "TANDEM_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = read(name)?;
    let value = parse(&raw);
    if value.is_none() {
        tracing::warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    value
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
