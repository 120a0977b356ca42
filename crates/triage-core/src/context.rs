use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::tools::ToolDefinition;

/// The complete context sent to a provider for one model call.
#[derive(Clone, Debug)]
pub struct LlmContext {
    pub system_blocks: Vec<SystemBlock>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    /// Create an empty context (useful for testing).
    pub fn empty() -> Self {
        Self {
            system_blocks: Vec::new(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// All system blocks joined into a single instruction string.
    pub fn system_prompt(&self) -> String {
        self.system_blocks
            .iter()
            .map(|b| b.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A system prompt block, labelled for debugging and transcript attribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemBlock {
    pub content: String,
    pub label: SystemBlockLabel,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemBlockLabel {
    CorePrompt,
    ClientRules,
    Custom(String),
}
