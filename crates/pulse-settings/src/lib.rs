//! # pulse-settings
//!
//! Layered configuration for the pulse relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`PulseSettings::default()`])
//! 2. **Settings file** (`~/.pulse/settings.json` or `--config`, deep-merged over defaults)
//! 3. **Environment variables** (`PULSE_*` overrides, highest priority)
//!
//! The binary applies CLI flags on top and calls [`PulseSettings::validate`]
//! once before anything starts.
//!
//! ```no_run
//! use pulse_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
