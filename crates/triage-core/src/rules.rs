use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDescriptor;

/// Rule type whose data maps specialty codes to urgency criteria.
pub const SPECIALTY_URGENT_MAPPING: &str = "specialty_urgent_mapping";

/// Criteria text meaning "never urgent for this specialty".
pub const NO_URGENT_DIAGNOSES: &str = "No urgent diagnoses.";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Specialty code → free-text urgency criteria.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Rule {
    pub fn urgency_mapping(id: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            version: default_version(),
            rule_type: SPECIALTY_URGENT_MAPPING.to_string(),
            description: None,
            source: None,
            created_at: None,
            updated_at: None,
            active: true,
            data,
        }
    }

    pub fn is_urgency_mapping(&self) -> bool {
        self.active && self.rule_type == SPECIALTY_URGENT_MAPPING
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Client {
    /// Snapshot of the parts of this client the analysis consumes.
    pub fn rule_set(&self) -> ClientRules {
        ClientRules {
            rules: self.rules.clone(),
            tools: self.tools.clone(),
        }
    }
}

/// Rules and tools of one client, as handed to a single analysis request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientRules {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl ClientRules {
    /// The first active specialty→urgency rule. Later mapping rules are
    /// ignored, not merged.
    pub fn urgency_rule(&self) -> Option<&Rule> {
        self.rules.iter().find(|r| r.is_urgency_mapping())
    }

    pub fn urgency_mapping(&self) -> BTreeMap<String, String> {
        self.urgency_rule().map(|r| r.data.clone()).unwrap_or_default()
    }
}

/// The whole client configuration document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default = "default_config_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            version: default_config_version(),
            updated_at: None,
        }
    }
}

impl ClientConfig {
    pub fn get_client(&self, client_id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == client_id)
    }

    /// The urgency mapping of `client_id`, or `None` for an unknown client.
    pub fn urgency_mapping(&self, client_id: &str) -> Option<BTreeMap<String, String>> {
        self.get_client(client_id)
            .map(|c| c.rule_set().urgency_mapping())
    }

    pub fn client_ids(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn add_client(&mut self, client: Client) {
        self.clients.push(client);
        self.touch();
    }

    /// Replace the client with matching id. Returns false if absent.
    pub fn update_client(&mut self, client_id: &str, mut client: Client) -> bool {
        let Some(slot) = self.clients.iter_mut().find(|c| c.id == client_id) else {
            return false;
        };
        client.updated_at = Some(now());
        *slot = client;
        self.touch();
        true
    }

    pub fn delete_client(&mut self, client_id: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c.id != client_id);
        let removed = self.clients.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(now());
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_config_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}
