use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool definition sent to the LLM as part of the context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// The closed set of side-capabilities the service knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ValidateInsurance,
    CheckPatientHistory,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::ValidateInsurance, ToolKind::CheckPatientHistory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateInsurance => "validate_insurance",
            Self::CheckPatientHistory => "check_patient_history",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-client declaration of a tool and whether it may be invoked.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ToolDescriptor {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            config: Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }
}

/// Find the enabled descriptor for `name`, if the client has one.
pub fn find_enabled<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    tools.iter().find(|t| t.name == name && t.enabled)
}

/// Outcome of invoking one tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
}

impl ToolResult {
    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: Map::new(),
            error: Some(error.into()),
            execution_time_ms: None,
        }
    }

    /// Decode `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub date: String,
    pub visit_type: String,
    pub diagnosis: String,
    pub provider: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PatientHistoryResult {
    pub patient_id: String,
    #[serde(default)]
    pub history_entries: Vec<HistoryEntry>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub last_visit_date: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InsuranceValidationResult {
    pub patient_id: String,
    pub insurance_id: String,
    pub is_valid: bool,
    pub coverage_type: String,
    pub copay_amount: f64,
    pub notes: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
