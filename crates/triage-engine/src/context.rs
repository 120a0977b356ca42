use triage_core::context::{LlmContext, SystemBlock, SystemBlockLabel};
use triage_core::ids::RequestId;
use triage_core::messages::Message;
use triage_core::rules::ClientRules;
use triage_core::tools::ToolDescriptor;
use triage_core::triage::TriageInput;

use crate::prompt;
use crate::tools::patient_history;

/// Snapshot of one request, handed to every tool call the model makes
/// while answering it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub client_id: String,
    pub referral_pages: Vec<String>,
    pub tools: Vec<ToolDescriptor>,
}

impl RequestContext {
    pub fn new(request_id: RequestId, input: &TriageInput, rules: &ClientRules) -> Self {
        Self {
            request_id,
            client_id: input.client_id.clone(),
            referral_pages: input.referral_pages.clone(),
            tools: rules.tools.clone(),
        }
    }
}

/// Initial model context: system prompt, the composite user prompt, and the
/// history tool when the provider can call tools.
pub fn build_context(user_prompt: String, supports_tools: bool) -> LlmContext {
    let tools = if supports_tools {
        vec![patient_history::definition()]
    } else {
        Vec::new()
    };
    LlmContext {
        system_blocks: vec![SystemBlock {
            content: prompt::SYSTEM_PROMPT.to_string(),
            label: SystemBlockLabel::CorePrompt,
        }],
        messages: vec![Message::user_text(user_prompt)],
        tools,
    }
}
