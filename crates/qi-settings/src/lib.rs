//! # qi-settings
//!
//! Configuration for the Qi robot SDK, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SdkSettings::default()`]
//! 2. **User file**: `~/.qisdk/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `QI_*` overrides (highest priority)
//!
//! There is no global instance: the loaded value is handed to the root
//! robot object, which owns it for its lifetime.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{DEFAULT_SERVICES, SdkSettings};
