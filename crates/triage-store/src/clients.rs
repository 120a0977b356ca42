//! Client rule store backed by a JSON file.
//!
//! The whole configuration is held as an immutable snapshot. Readers take
//! an `Arc` clone and keep it for the duration of a request; writers build
//! a new configuration and swap it in whole.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use triage_core::rules::{Client, ClientConfig};

use crate::error::StoreError;

pub struct ClientStore {
    path: PathBuf,
    current: RwLock<Arc<ClientConfig>>,
}

impl ClientStore {
    /// Load the config file. Relative paths resolve against the working directory.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = absolutize(path.as_ref())?;
        let config = read_config(&path)?;
        info!(clients = config.clients.len(), "client config loaded");
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Store over an in-memory config; `save` writes to `path`.
    pub fn from_config(path: impl Into<PathBuf>, config: ClientConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current configuration. Later writes do not affect the returned value.
    pub fn snapshot(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn get_client(&self, client_id: &str) -> Option<Client> {
        self.snapshot().get_client(client_id).cloned()
    }

    pub fn list_clients(&self) -> Vec<Client> {
        self.snapshot().clients.clone()
    }

    pub fn add_client(&self, client: Client) -> Result<(), StoreError> {
        self.modify(|config| {
            if config.get_client(&client.id).is_some() {
                return Err(StoreError::Conflict(format!("client {} already exists", client.id)));
            }
            config.add_client(client);
            Ok(())
        })
    }

    pub fn update_client(&self, client_id: &str, client: Client) -> Result<(), StoreError> {
        self.modify(|config| {
            if config.update_client(client_id, client) {
                Ok(())
            } else {
                Err(StoreError::NotFound(format!("client {client_id}")))
            }
        })
    }

    pub fn delete_client(&self, client_id: &str) -> Result<(), StoreError> {
        self.modify(|config| {
            if config.delete_client(client_id) {
                Ok(())
            } else {
                Err(StoreError::NotFound(format!("client {client_id}")))
            }
        })
    }

    /// Swap in a whole new configuration.
    pub fn replace(&self, config: ClientConfig) {
        *self.current.write() = Arc::new(config);
    }

    /// Re-read the file and replace the snapshot.
    pub fn reload(&self) -> Result<(), StoreError> {
        let config = read_config(&self.path)?;
        self.replace(config);
        Ok(())
    }

    /// Write the current snapshot to disk, copying the previous file to
    /// `<name>.backup` first. Holds the write lock throughout so no
    /// concurrent edit lands between the write and the swap.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<(), StoreError> {
        let mut guard = self.current.write();
        let mut config = (**guard).clone();
        config.touch();

        if self.path.exists() {
            let backup = backup_path(&self.path);
            std::fs::copy(&self.path, &backup)
                .map_err(|e| StoreError::Io(format!("backup {}: {e}", backup.display())))?;
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(&self.path, json).map_err(|e| StoreError::Io(e.to_string()))?;
        *guard = Arc::new(config);
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ClientConfig) -> Result<(), StoreError>,
    {
        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        f(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, StoreError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(cwd.join(path))
}

fn read_config(path: &Path) -> Result<ClientConfig, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(format!(
            "client config not found at: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    let config: ClientConfig = serde_json::from_str(&raw)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

    for client in &config.clients {
        let mappings = client.rules.iter().filter(|r| r.is_urgency_mapping()).count();
        if mappings > 1 {
            warn!(client_id = %client.id, mappings, "multiple active urgency mappings; first one wins");
        }
    }
    Ok(config)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}
