//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PULSE_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BusSource, PulseSettings};

/// Resolve the default settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default()).map_err(SettingsError::Defaults)?;

    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return serde_json::from_value(defaults).map_err(SettingsError::Defaults);
    }

    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let user: Value = serde_json::from_str(&content).map_err(parse_error)?;
    serde_json::from_value(deep_merge(defaults, user)).map_err(parse_error)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values are strictly parsed; invalid ones are ignored with a warning and the
/// file/default value stays in place. `PORT` is honored for compatibility with
/// PaaS-style launchers, and `PULSE_PORT` wins over it.
pub fn apply_overrides_from<F>(settings: &mut PulseSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64_in("PULSE_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64_in("PULSE_RETRY_HINT_MS", 0, 3_600_000) {
        settings.server.retry_hint_ms = v;
    }
    if let Some(v) = env.u64_in("PULSE_KEEP_ALIVE_SECS", 1, 3_600) {
        settings.server.keep_alive_secs = v;
    }
    if let Some(v) = env.u64_in("PULSE_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.server.session_queue_capacity = v as usize;
    }
    if let Some(v) = env.u64_in("PULSE_STALL_TIMEOUT_MS", 1, 3_600_000) {
        settings.server.stall_timeout_ms = v;
    }
    if let Some(v) = env.string("PULSE_WIRE_FORMAT") {
        match v.parse() {
            Ok(format) => settings.server.wire_format = format,
            Err(e) => tracing::warn!(key = "PULSE_WIRE_FORMAT", error = %e, "ignoring env var"),
        }
    }
    if let Some(v) = env.string("PULSE_CORS_ORIGINS") {
        settings.server.cors_origins = v
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = env.bool("PULSE_METRICS") {
        settings.server.metrics_enabled = v;
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("PULSE_SOURCE") {
        match BusSource::parse(&v) {
            Some(source) => settings.bus.source = source,
            None => tracing::warn!(key = "PULSE_SOURCE", value = %v, "invalid bus source, ignoring"),
        }
    }
    if let Some(v) = env.string("PULSE_BROKERS") {
        settings.bus.brokers = v;
    }
    if let Some(v) = env.string("PULSE_TOPIC") {
        settings.bus.topic = v;
    }
    if let Some(v) = env.string("PULSE_GROUP_ID") {
        settings.bus.group_id = v;
    }
    if let Some(v) = env.bool("PULSE_FROM_BEGINNING") {
        settings.bus.from_beginning = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PULSE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ───────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
