use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use triage_core::context::LlmContext;
use triage_core::events::TriageEvent;
use triage_core::messages::{AssistantMessage, Message, ToolCallBlock};
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::stream::StreamEvent;
use triage_core::tools::ToolKind;

use crate::context::RequestContext;
use crate::error::EngineError;
use crate::tools::{patient_history, ToolExecutor};

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 4;

/// Final answer of one model exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub response: String,
    /// One entry per tool call the model made, in call order.
    pub tools_called: Vec<String>,
    /// Model calls made, including the final one.
    pub model_calls: u32,
}

/// Drives the model exchange for one request: call the model, serve any
/// tool calls it makes against that request's context, repeat until it
/// answers in text.
pub struct ExchangeRunner {
    provider: Arc<dyn LlmProvider>,
    tools: ToolExecutor,
    event_tx: broadcast::Sender<TriageEvent>,
    options: StreamOptions,
    max_tool_rounds: u32,
}

impl ExchangeRunner {
    pub fn new(provider: Arc<dyn LlmProvider>, event_tx: broadcast::Sender<TriageEvent>) -> Self {
        Self {
            provider,
            tools: ToolExecutor::new(),
            event_tx,
            options: StreamOptions::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_tools(mut self, tools: ToolExecutor) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn send_event(&self, event: TriageEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id, client_id = %ctx.client_id))]
    pub async fn run(
        &self,
        ctx: &RequestContext,
        mut llm: LlmContext,
        cancel: &CancellationToken,
    ) -> Result<Exchange, EngineError> {
        let mut tools_called = Vec::new();

        for round in 0..=self.max_tool_rounds {
            let assistant = self.call_model(&llm, cancel).await?;
            let calls: Vec<ToolCallBlock> = assistant.tool_calls().into_iter().cloned().collect();

            if calls.is_empty() {
                let response = assistant.text_content();
                debug!(response = %response, "model response");
                return Ok(Exchange {
                    response,
                    tools_called,
                    model_calls: round + 1,
                });
            }
            if round == self.max_tool_rounds {
                break;
            }

            llm.messages.push(Message::Assistant(assistant));
            for call in calls {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let (label, text, success) = self.dispatch(ctx, &call).await;
                self.send_event(TriageEvent::ToolInvoked {
                    request_id: ctx.request_id.clone(),
                    tool_name: call.name.clone(),
                    success,
                });
                tools_called.push(label);
                llm.messages.push(Message::tool_result(call.id, text));
            }
        }

        warn!(rounds = self.max_tool_rounds, "model did not settle on an answer");
        Err(EngineError::MaxToolRounds(self.max_tool_rounds))
    }

    async fn call_model(
        &self,
        llm: &LlmContext,
        cancel: &CancellationToken,
    ) -> Result<AssistantMessage, EngineError> {
        let mut stream = self.provider.stream(llm, &self.options).await?;

        let mut assistant_msg: Option<AssistantMessage> = None;
        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match event {
                StreamEvent::Done { message, .. } => assistant_msg = Some(message),
                StreamEvent::Error { error } => return Err(EngineError::Gateway(error)),
                _ => {}
            }
        }

        assistant_msg.ok_or_else(|| EngineError::Internal("Stream ended without Done event".into()))
    }

    /// Serve one model tool call. Returns the transcript label, the text
    /// handed back to the model, and whether the tool succeeded.
    async fn dispatch(&self, ctx: &RequestContext, call: &ToolCallBlock) -> (String, String, bool) {
        match ToolKind::from_name(&call.name) {
            Some(ToolKind::CheckPatientHistory) => {
                let reply = patient_history::answer_model_call(&self.tools, ctx, &call.arguments).await;
                (
                    format!("{} (patient_id: {})", call.name, reply.patient_id),
                    reply.text,
                    reply.success,
                )
            }
            Some(ToolKind::ValidateInsurance) => {
                let result = self.tools.execute(&call.name, &ctx.tools, &call.arguments).await;
                let text = serde_json::to_string(&result)
                    .unwrap_or_else(|e| format!("Unable to encode tool result: {e}"));
                (call.name.clone(), text, result.success)
            }
            None => {
                warn!(tool = %call.name, "model called an unknown tool");
                (call.name.clone(), format!("Unknown tool: {}", call.name), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;
    use triage_core::errors::GatewayError;
    use triage_core::ids::RequestId;
    use triage_core::tools::ToolDescriptor;
    use triage_llm::{MockProvider, MockResponse};

    fn ctx(tools: Vec<ToolDescriptor>) -> RequestContext {
        RequestContext {
            request_id: RequestId::from_raw("req_runner"),
            client_id: "clinic-a".into(),
            referral_pages: vec!["MRN: 9001 intermittent spacing out".into()],
            tools,
        }
    }

    fn runner(provider: Arc<MockProvider>) -> (ExchangeRunner, broadcast::Receiver<TriageEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let runner = ExchangeRunner::new(provider, tx)
            .with_tools(ToolExecutor::new().with_latencies(Duration::ZERO, Duration::ZERO));
        (runner, rx)
    }

    fn initial() -> LlmContext {
        let mut llm = LlmContext::empty();
        llm.messages.push(Message::user_text("triage this"));
        llm
    }

    #[tokio::test]
    async fn plain_answer_returns_text() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("SPECIALTY: NEUROLOGY")]));
        let (runner, _rx) = runner(provider.clone());
        let exchange = runner
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exchange.response, "SPECIALTY: NEUROLOGY");
        assert!(exchange.tools_called.is_empty());
        assert_eq!(exchange.model_calls, 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn history_round_trip() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("check_patient_history", json!({})),
            MockResponse::stream_text("SPECIALTY: NEUROLOGY\nCONFIDENCE: 0.9"),
        ]));
        let (runner, mut rx) = runner(provider.clone());
        let exchange = runner
            .run(
                &ctx(vec![ToolDescriptor::enabled("check_patient_history")]),
                initial(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(exchange.model_calls, 2);
        assert_eq!(exchange.tools_called, vec!["check_patient_history (patient_id: 9001)"]);

        let second = &provider.seen_contexts()[1];
        assert_eq!(second.messages.len(), 3);
        match &second.messages[2] {
            Message::ToolResult(r) => assert!(r.text.contains("Patient ID: 9001")),
            other => panic!("expected tool result, got {other:?}"),
        }

        match rx.try_recv().unwrap() {
            TriageEvent::ToolInvoked { tool_name, success, .. } => {
                assert_eq!(tool_name, "check_patient_history");
                assert!(success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_history_is_reported_to_model() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("check_patient_history", json!({"patient_id": "P1"})),
            MockResponse::stream_text("SPECIALTY: CARDIOLOGY"),
        ]));
        let (runner, _rx) = runner(provider.clone());
        let exchange = runner
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exchange.tools_called, vec!["check_patient_history (patient_id: P1)"]);
        match &provider.seen_contexts()[1].messages[2] {
            Message::ToolResult(r) => {
                assert_eq!(r.text, "Patient history tool not available for this client.")
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("order_mri", json!({})),
            MockResponse::stream_text("SPECIALTY: ORTHOPEDICS"),
        ]));
        let (runner, _rx) = runner(provider);
        let exchange = runner
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exchange.response, "SPECIALTY: ORTHOPEDICS");
        assert_eq!(exchange.tools_called, vec!["order_mri"]);
    }

    #[tokio::test]
    async fn too_many_tool_rounds() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("check_patient_history", json!({})),
            MockResponse::tool_call("check_patient_history", json!({})),
        ]));
        let (runner, _rx) = runner(provider.clone());
        let err = runner
            .with_max_tool_rounds(1)
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MaxToolRounds(1)));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn stream_error_surfaces_as_gateway_error() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            GatewayError::QuotaExceeded("insufficient_quota".into()),
        )]));
        let (runner, _rx) = runner(provider);
        let err = runner
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn cancelled_before_answer() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("SPECIALTY: X")]));
        let (runner, _rx) = runner(provider);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&ctx(Vec::new()), initial(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn blank_answer_is_returned_as_is() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("   ")]));
        let (runner, _rx) = runner(provider);
        let exchange = runner
            .run(&ctx(Vec::new()), initial(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exchange.response, "   ");
        assert_eq!(exchange.model_calls, 1);
    }
}
