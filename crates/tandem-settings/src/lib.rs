//! # tandem-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TandemSettings::default()`]
//! 2. **Settings file**: `~/.tandem/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `TANDEM_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
    tandem_home,
};
pub use types::*;
