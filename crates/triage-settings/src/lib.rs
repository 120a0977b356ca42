//! # triage-settings
//!
//! Configuration management with layered sources for the triage service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`TriageSettings::default()`]
//! 2. **Settings file** — `~/.triage/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables** — `TRIAGE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use triage_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("model: {}", settings.llm.model);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, triage_home};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = TriageSettings::default();
        assert_eq!(settings.llm.provider, ProviderKind::OpenAi);
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.llm.max_tool_rounds, 4);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.store.clients_path, "clients.json");
        assert!(settings.store.log_enabled);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn settings_path_under_triage_home() {
        assert!(settings_path().starts_with(triage_home()));
        assert!(settings_path().ends_with("settings.json"));
    }
}
