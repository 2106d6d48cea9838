//! Layered settings loading.
//!
//! The user file is merged over the serialized defaults before it is
//! deserialized, so a partial file only overrides the keys it names. Nested
//! objects merge key by key, arrays are taken whole, and a `null` leaves the
//! default in place. `QI_*` environment variables are applied last.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SdkSettings;

/// `~/.qisdk/settings.json`, falling back to the temp dir without `HOME`.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".qisdk")
        .join("settings.json")
}

/// Load from [`settings_path`], then apply environment overrides.
pub fn load_settings() -> Result<SdkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, then apply environment overrides and validate.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SdkSettings> {
    let mut settings = read_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<SdkSettings> {
    let defaults = serde_json::to_value(SdkSettings::default())?;

    if !path.exists() {
        debug!(?path, "no settings file, using defaults");
        return Ok(serde_json::from_value(defaults)?);
    }
    debug!(?path, "reading settings file");
    let user: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let merged = deep_merge(defaults, user);

    Ok(serde_json::from_value(merged)?)
}

/// Merge `overlay` into `base`, recursing into objects present in both.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_maps(base, overlay)),
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, merged);
    }
    base
}

/// Apply `QI_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, leaving the file/default value.
pub fn apply_overrides(settings: &mut SdkSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(val) = read("QI_SERVICE_TIMEOUT_MS") {
        match parse_u64_range(&val, 1, 600_000) {
            Some(v) => settings.service_timeout_ms = v,
            None => warn!(key = "QI_SERVICE_TIMEOUT_MS", value = %val, "invalid env var, ignoring"),
        }
    }
    if let Some(val) = read("QI_THREAD_POOL_SIZE") {
        match parse_u64_range(&val, 1, 256).and_then(|v| usize::try_from(v).ok()) {
            Some(v) => settings.thread_pool_size = v,
            None => warn!(key = "QI_THREAD_POOL_SIZE", value = %val, "invalid env var, ignoring"),
        }
    }
    if let Some(val) = read("QI_AUTO_LOG_FUTURES") {
        match parse_bool(&val) {
            Some(v) => settings.auto_log_future_errors = v,
            None => warn!(key = "QI_AUTO_LOG_FUTURES", value = %val, "invalid env var, ignoring"),
        }
    }
    if let Some(val) = read("QI_LOG_LEVEL") {
        settings.log_level = val;
    }
}

/// Lenient boolean for environment values: `true/false`, `1/0`, `yes/no`,
/// `on/off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    const TRUTHY: [&str; 4] = ["true", "1", "yes", "on"];
    const FALSY: [&str; 4] = ["false", "0", "no", "off"];
    let val = val.trim();
    if TRUTHY.iter().any(|t| t.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if FALSY.iter().any(|f| f.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

/// `val` as a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
