use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// Events emitted by a provider for one model call. Ordering contract:
///
/// Start → (TextDelta* | ToolCallStart → ToolCallEnd)* → Done
///
/// Error can appear at any point and is terminal.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallEnd { tool_call: ToolCallBlock },
    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Expand a complete assistant message into the event sequence a
    /// streaming provider would have produced for it.
    pub fn sequence_for(message: AssistantMessage) -> Vec<StreamEvent> {
        let stop_reason = message.stop_reason.clone().unwrap_or(StopReason::EndTurn);
        let mut events = vec![StreamEvent::Start];
        let text = message.text_content();
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta { delta: text });
        }
        for tc in message.tool_calls() {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: tc.id.clone(),
                name: tc.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: tc.clone() });
        }
        events.push(StreamEvent::Done { message, stop_reason });
        events
    }
}
