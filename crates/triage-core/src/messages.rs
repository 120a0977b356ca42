use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallBlock),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn tool_result(tool_call_id: ToolCallId, text: impl Into<String>) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            text: text.into(),
        })
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCallBlock>) -> Self {
        Self {
            content: calls.into_iter().map(AssistantContent::ToolCall).collect(),
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall(_)))
    }
}
