//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Services the robot exposes by default.
pub const DEFAULT_SERVICES: [&str; 11] = [
    "Actuation",
    "AutonomousAbilities",
    "Focus",
    "Conversation",
    "Camera",
    "Mapping",
    "ContextFactory",
    "Touch",
    "Knowledge",
    "HumanAwareness",
    "Power",
];

/// SDK-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkSettings {
    /// Bound on the blocking service accessors, in milliseconds.
    pub service_timeout_ms: u64,
    /// Worker threads in the shared thread pool.
    pub thread_pool_size: usize,
    /// Whether futures created by the SDK log their failures automatically.
    pub auto_log_future_errors: bool,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Service names registered with the service registry.
    pub services: Vec<String>,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            service_timeout_ms: 5_000,
            thread_pool_size: 4,
            auto_log_future_errors: true,
            log_level: "warn".to_string(),
            services: DEFAULT_SERVICES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl SdkSettings {
    /// The service timeout as a [`Duration`].
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    /// Reject values the SDK cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.thread_pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "threadPoolSize must be greater than zero".into(),
            ));
        }
        if self.service_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "serviceTimeoutMs must be greater than zero".into(),
            ));
        }
        if !is_filter(&self.log_level) {
            return Err(SettingsError::InvalidValue(format!(
                "logLevel is not a level filter: {:?}",
                self.log_level
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for name in &self.services {
            if name.is_empty() {
                return Err(SettingsError::InvalidValue("empty service name".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate service name: {name}"
                )));
            }
        }
        Ok(())
    }
}

/// Whether `filter` is a level, or comma-separated `target=level` directives.
fn is_filter(filter: &str) -> bool {
    const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
    !filter.trim().is_empty()
        && filter.split(',').all(|directive| {
            let level = directive.rsplit('=').next().unwrap_or_default().trim();
            LEVELS.iter().any(|known| known.eq_ignore_ascii_case(level))
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let settings = SdkSettings::default();
        assert_eq!(settings.service_timeout(), Duration::from_secs(5));
        assert_eq!(settings.thread_pool_size, 4);
        assert!(settings.auto_log_future_errors);
        assert_eq!(settings.services.len(), 11);
        assert!(settings.services.iter().any(|s| s == "Conversation"));
        settings.validate().unwrap();
    }

    #[test]
    fn camel_case_json() {
        let json = serde_json::to_value(SdkSettings::default()).unwrap();
        assert_eq!(json["serviceTimeoutMs"], 5000);
        assert_eq!(json["threadPoolSize"], 4);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: SdkSettings = serde_json::from_str(r#"{"threadPoolSize": 8}"#).unwrap();
        assert_eq!(settings.thread_pool_size, 8);
        assert_eq!(settings.service_timeout_ms, 5_000);
    }

    #[test]
    fn validate_rejects_zero_pool() {
        let settings = SdkSettings {
            thread_pool_size: 0,
            ..SdkSettings::default()
        };
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_duplicate_services() {
        let settings = SdkSettings {
            services: vec!["Alpha".into(), "Alpha".into()],
            ..SdkSettings::default()
        };
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("Alpha"));
    }

    #[test]
    fn validate_checks_log_level() {
        for level in ["debug", "WARN", "qi_sdk=debug,warn", "qi_resolve=trace"] {
            let settings = SdkSettings {
                log_level: level.into(),
                ..SdkSettings::default()
            };
            assert!(settings.validate().is_ok(), "{level}");
        }
        for level in ["", "loud", "qi_sdk=", "debug,,warn"] {
            let settings = SdkSettings {
                log_level: level.into(),
                ..SdkSettings::default()
            };
            assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("logLevel"));
        }
    }
}
