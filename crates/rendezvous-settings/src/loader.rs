//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RendezvousSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `RENDEZVOUS_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RendezvousSettings;

/// Resolve the default settings file path (`~/.rendezvous/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".rendezvous").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RendezvousSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Read and merge the settings file over defaults, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<RendezvousSettings> {
    let defaults = serde_json::to_value(RendezvousSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    // Wrong-typed fields only surface here, so blame the file.
    serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RendezvousSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty or invalid values are ignored with a warning, falling back to the
/// file/default value.
pub fn apply_overrides_from(
    settings: &mut RendezvousSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("RENDEZVOUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RENDEZVOUS_RELAY_PORT") {
        if let Some(port) = checked(parse_u16_range(&v, 0, 65535), "RENDEZVOUS_RELAY_PORT", &v) {
            settings.server.relay_port = port;
        }
    }
    if let Some(v) = read("RENDEZVOUS_STATUS_PORT") {
        if let Some(port) = checked(parse_u16_range(&v, 0, 65535), "RENDEZVOUS_STATUS_PORT", &v) {
            settings.server.status_port = port;
        }
    }
    if let Some(v) = read("RENDEZVOUS_SEND_QUEUE") {
        if let Some(n) = checked(parse_usize_range(&v, 1, 65_536), "RENDEZVOUS_SEND_QUEUE", &v) {
            settings.server.send_queue_capacity = n;
        }
    }
    if let Some(v) = read("RENDEZVOUS_MAX_MESSAGE_SIZE") {
        let parsed = parse_usize_range(&v, 1024, 64 * 1024 * 1024);
        if let Some(n) = checked(parsed, "RENDEZVOUS_MAX_MESSAGE_SIZE", &v) {
            settings.server.max_message_size = n;
        }
    }
    if let Some(v) = read("RENDEZVOUS_COLLISION_POLICY") {
        let parsed = serde_json::from_value(Value::String(v.to_lowercase())).ok();
        if let Some(policy) = checked(parsed, "RENDEZVOUS_COLLISION_POLICY", &v) {
            settings.server.collision_policy = policy;
        }
    }
    if let Some(v) = read("RENDEZVOUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RENDEZVOUS_LOG_FORMAT") {
        let parsed = serde_json::from_value(Value::String(v.to_lowercase())).ok();
        if let Some(format) = checked(parsed, "RENDEZVOUS_LOG_FORMAT", &v) {
            settings.logging.format = format;
        }
    }
}

fn checked<T>(parsed: Option<T>, key: &str, value: &str) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value, "invalid env var, ignoring");
    }
    parsed
}

/// Reject combinations the server cannot start with.
pub fn validate(settings: &RendezvousSettings) -> Result<()> {
    let server = &settings.server;
    if server.relay_port != 0 && server.relay_port == server.status_port {
        return Err(SettingsError::invalid(
            "statusPort",
            format!("must differ from relayPort (both {})", server.relay_port),
        ));
    }
    if server.send_queue_capacity == 0 {
        return Err(SettingsError::invalid("sendQueueCapacity", "must be at least 1"));
    }
    if server.max_message_size == 0 {
        return Err(SettingsError::invalid("maxMessageSize", "must be at least 1"));
    }
    if server.host.trim().is_empty() {
        return Err(SettingsError::invalid("host", "must not be empty"));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
