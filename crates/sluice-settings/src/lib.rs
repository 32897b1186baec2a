//! # sluice-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SluiceSettings::default()`]
//! 2. **Settings file**: `~/.sluice/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SLUICE_*` overrides (highest priority)
//!
//! Command-line flags in the binary override all three.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, ServerSettings, SluiceSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = SluiceSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = SluiceSettings::default();
        assert_eq!(settings.server.port, 11111);
        assert_eq!(settings.server.http_port, 11112);
        assert_eq!(settings.server.default_fetch_size, 1000);
        assert_eq!(settings.logging.level, "info");
    }
}
