//! Side-capabilities a client may enable: insurance validation and patient
//! history lookup. Both stand in for external systems and simulate their
//! round-trip latency.

pub mod insurance;
pub mod patient_history;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use triage_core::tools::{find_enabled, ToolDescriptor, ToolError, ToolKind, ToolResult};

const INSURANCE_LATENCY: Duration = Duration::from_millis(100);
const HISTORY_LATENCY: Duration = Duration::from_millis(200);

/// Runs a named tool against one client's tool declarations.
#[derive(Clone, Debug)]
pub struct ToolExecutor {
    insurance_latency: Duration,
    history_latency: Duration,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self {
            insurance_latency: INSURANCE_LATENCY,
            history_latency: HISTORY_LATENCY,
        }
    }
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latencies(mut self, insurance: Duration, history: Duration) -> Self {
        self.insurance_latency = insurance;
        self.history_latency = history;
        self
    }

    /// Run `name` if the client has it enabled. Never errors: unavailable,
    /// unknown and failed tools come back as `success: false`.
    pub async fn execute(&self, name: &str, client_tools: &[ToolDescriptor], args: &Value) -> ToolResult {
        let Some(descriptor) = find_enabled(client_tools, name) else {
            return ToolResult::failure(
                name,
                format!("Tool '{name}' not available or disabled for this client"),
            );
        };
        let Some(kind) = ToolKind::from_name(name) else {
            return ToolResult::failure(name, format!("Unknown tool implementation: {name}"));
        };

        let start = Instant::now();
        let outcome = match kind {
            ToolKind::ValidateInsurance => {
                tokio::time::sleep(self.insurance_latency).await;
                into_data(insurance::validate(descriptor, args))
            }
            ToolKind::CheckPatientHistory => {
                tokio::time::sleep(self.history_latency).await;
                let today = chrono::Local::now().date_naive();
                into_data(patient_history::lookup(descriptor, args, today))
            }
        };
        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(data) => {
                debug!(tool = name, execution_time_ms, "tool executed");
                ToolResult {
                    tool_name: name.to_string(),
                    success: true,
                    data,
                    error: None,
                    execution_time_ms: Some(execution_time_ms),
                }
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolResult {
                    execution_time_ms: Some(execution_time_ms),
                    ..ToolResult::failure(name, e.to_string())
                }
            }
        }
    }
}

fn into_data<T: Serialize>(payload: T) -> Result<serde_json::Map<String, Value>, ToolError> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(ToolError::ExecutionFailed(format!(
            "tool payload is not an object: {other}"
        ))),
    }
}

/// Optional string argument; blank counts as absent.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
