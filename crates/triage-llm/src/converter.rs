use serde_json::{json, Map, Value};

use triage_core::context::LlmContext;
use triage_core::errors::GatewayError;
use triage_core::ids::ToolCallId;
use triage_core::messages::{AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock};
use triage_core::provider::StreamOptions;

/// Convert a full LlmContext into a chat-completions request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": false,
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !options.stop_sequences.is_empty() {
        body["stop"] = json!(options.stop_sequences);
    }

    let mut messages = Vec::with_capacity(context.messages.len() + 1);
    let system = context.system_prompt();
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(context.messages.iter().map(convert_message));
    body["messages"] = json!(messages);

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_message(message: &Message) -> Value {
    match message {
        Message::User(u) => json!({"role": "user", "content": u.text}),
        Message::Assistant(a) => {
            let text = a.text_content();
            let mut entry = json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { json!(text) },
            });
            let calls: Vec<Value> = a
                .tool_calls()
                .into_iter()
                .map(|tc| {
                    json!({
                        "id": tc.id.as_str(),
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            if !calls.is_empty() {
                entry["tool_calls"] = json!(calls);
            }
            entry
        }
        Message::ToolResult(r) => json!({
            "role": "tool",
            "tool_call_id": r.tool_call_id.as_str(),
            "content": r.text,
        }),
    }
}

/// Parse a chat-completions response body into an assistant message.
pub fn parse_completion(body: &Value) -> Result<AssistantMessage, GatewayError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| GatewayError::InvalidResponse("response has no choices".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| GatewayError::InvalidResponse("choice has no message".into()))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(AssistantContent::Text {
                text: text.to_string(),
            });
        }
    }

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            content.push(AssistantContent::ToolCall(parse_tool_call(call)?));
        }
    }

    let has_calls = content
        .iter()
        .any(|c| matches!(c, AssistantContent::ToolCall(_)));
    let stop_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        _ if has_calls => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    Ok(AssistantMessage {
        content,
        stop_reason: Some(stop_reason),
    })
}

fn parse_tool_call(call: &Value) -> Result<ToolCallBlock, GatewayError> {
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(ToolCallId::from_raw)
        .unwrap_or_default();
    let function = call
        .get("function")
        .ok_or_else(|| GatewayError::InvalidResponse("tool call has no function".into()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("tool call has no name".into()))?
        .to_string();

    // Arguments arrive as a JSON-encoded string.
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(tool = %name, error = %e, "unparseable tool arguments, using empty object");
            Value::Object(Map::new())
        }),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    };

    Ok(ToolCallBlock {
        id,
        name,
        arguments,
    })
}
