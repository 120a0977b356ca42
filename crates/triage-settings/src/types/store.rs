//! Client configuration and triage log locations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Client rule file. Relative paths resolve against the working directory.
    pub clients_path: String,
    /// Triage log database. Relative paths resolve against `~/.triage`.
    pub log_db_path: String,
    /// Field encryption key file. Relative paths resolve against `~/.triage`.
    pub key_path: String,
    /// Whether finished analyses are persisted.
    pub log_enabled: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            clients_path: "clients.json".to_string(),
            log_db_path: "database/triage.db".to_string(),
            key_path: "secret.key".to_string(),
            log_enabled: true,
        }
    }
}

impl StoreSettings {
    pub fn resolved_log_db_path(&self, home: &Path) -> PathBuf {
        resolve_under(home, &self.log_db_path)
    }

    pub fn resolved_key_path(&self, home: &Path) -> PathBuf {
        resolve_under(home, &self.key_path)
    }
}

fn resolve_under(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
