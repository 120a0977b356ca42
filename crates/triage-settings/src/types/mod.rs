//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the fields it changes.

mod llm;
mod store;

pub use llm::*;
pub use store::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "llm": { "model": "gpt-4o", "timeoutMs": 30000 },
///   "store": { "clientsPath": "/etc/triage/clients.json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriageSettings {
    /// Language-model collaborator settings.
    pub llm: LlmSettings,
    /// Retry and circuit breaker settings for model calls.
    pub retry: RetrySettings,
    /// Client config and triage log locations.
    pub store: StoreSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace` … `error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"triage_llm": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
