//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TriageSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TRIAGE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ProviderKind, TriageSettings};

/// Base directory for triage state (`~/.triage`).
pub fn triage_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".triage")
}

/// Resolve the path to the settings file (`~/.triage/settings.json`).
pub fn settings_path() -> PathBuf {
    triage_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TriageSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<TriageSettings> {
    let defaults = serde_json::to_value(TriageSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TriageSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut TriageSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
pub fn apply_overrides_with<F>(settings: &mut TriageSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── LLM settings ────────────────────────────────────────────────
    if let Some(v) = env.string("TRIAGE_LLM_PROVIDER") {
        match parse_provider(&v) {
            Some(kind) => settings.llm.provider = kind,
            None => tracing::warn!(key = "TRIAGE_LLM_PROVIDER", value = %v, "unknown provider, ignoring"),
        }
    }
    if let Some(v) = env.string("TRIAGE_LLM_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.string("TRIAGE_LLM_BASE_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = env.u64("TRIAGE_LLM_TIMEOUT_MS", 1_000, 600_000) {
        settings.llm.timeout_ms = v;
    }
    if let Some(v) = env.u64("TRIAGE_MAX_TOOL_ROUNDS", 1, 32) {
        settings.llm.max_tool_rounds = v as u32;
    }

    // ── Store settings ──────────────────────────────────────────────
    if let Some(v) = env.string("TRIAGE_CLIENTS_PATH") {
        settings.store.clients_path = v;
    }
    if let Some(v) = env.string("TRIAGE_LOG_DB") {
        settings.store.log_db_path = v;
    }
    if let Some(v) = env.bool("TRIAGE_LOG_ENABLED") {
        settings.store.log_enabled = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("TRIAGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TRIAGE_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn validate(settings: &TriageSettings) -> Result<()> {
    if settings.llm.max_tool_rounds == 0 {
        return Err(SettingsError::InvalidValue(
            "llm.maxToolRounds must be at least 1".to_string(),
        ));
    }
    if settings.llm.timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "llm.timeoutMs must be positive".to_string(),
        ));
    }
    if let Some(t) = settings.llm.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(SettingsError::InvalidValue(format!(
                "llm.temperature {t} outside 0.0..=2.0"
            )));
        }
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a provider name.
pub fn parse_provider(val: &str) -> Option<ProviderKind> {
    match val.to_lowercase().as_str() {
        "openai" => Some(ProviderKind::OpenAi),
        "mock" => Some(ProviderKind::Mock),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
