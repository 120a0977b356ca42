use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;

use triage_core::context::LlmContext;
use triage_core::errors::GatewayError;
use triage_core::ids::ToolCallId;
use triage_core::messages::{AssistantMessage, ToolCallBlock};
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::stream::StreamEvent;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: create a simple text response stream.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(StreamEvent::sequence_for(AssistantMessage::text(text)))
    }

    /// Convenience: a single tool call with the given name and arguments.
    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    /// Convenience: several tool calls in one assistant turn.
    pub fn tool_calls(calls: Vec<(&str, Value)>) -> Self {
        let blocks = calls
            .into_iter()
            .map(|(name, arguments)| ToolCallBlock {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            })
            .collect();
        Self::Stream(StreamEvent::sequence_for(AssistantMessage::with_tool_calls(blocks)))
    }

    /// Convenience: create a stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// remembers every context it was called with.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Contexts received so far, in call order.
    pub fn seen_contexts(&self) -> Vec<LlmContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.seen.lock().push(context.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {}",
                idx
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: &MockResponse,
) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                let events = events.clone();
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;
    use triage_core::messages::Message;

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello world")]);
        let context = LlmContext::empty();
        let mut stream = mock
            .stream(&context, &StreamOptions::default())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }

        assert_eq!(events.len(), 3); // Start, TextDelta, Done
        assert!(matches!(events[0], StreamEvent::Start));
        if let StreamEvent::TextDelta { delta } = &events[1] {
            assert_eq!(delta, "hello world");
        } else {
            panic!("expected TextDelta");
        }
        assert!(matches!(events[2], StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn tool_call_response() {
        let mock = MockProvider::new(vec![MockResponse::tool_call(
            "check_patient_history",
            json!({"patient_id": "MRN1"}),
        )]);
        let events: Vec<StreamEvent> = mock
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        match events.last() {
            Some(StreamEvent::Done { message, .. }) => {
                assert_eq!(message.tool_calls()[0].name, "check_patient_history");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            GatewayError::AuthenticationFailed("bad".into()),
        )]);
        let context = LlmContext::empty();
        let result = mock.stream(&context, &StreamOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sequential_responses_and_recorded_contexts() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_text("first"),
            MockResponse::stream_text("second"),
        ]);
        let mut context = LlmContext::empty();
        context.messages.push(Message::user_text("one"));

        let result1 = mock.stream(&context, &StreamOptions::default()).await;
        assert!(result1.is_ok());
        assert_eq!(mock.call_count(), 1);

        context.messages.push(Message::user_text("two"));
        let result2 = mock.stream(&context, &StreamOptions::default()).await;
        assert!(result2.is_ok());
        assert_eq!(mock.call_count(), 2);

        let seen = mock.seen_contexts();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].messages.len(), 1);
        assert_eq!(seen[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        let context = LlmContext::empty();

        let _ = mock.stream(&context, &StreamOptions::default()).await;
        let result = mock.stream(&context, &StreamOptions::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn provider_properties() {
        let mock = MockProvider::new(vec![]);
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.model(), "mock-model");
        assert!(mock.supports_tools());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(50),
            MockResponse::stream_text("after delay"),
        )]);
        let context = LlmContext::empty();

        let start = tokio::time::Instant::now();
        let stream = mock
            .stream(&context, &StreamOptions::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn delayed_error() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(20),
            MockResponse::Error(GatewayError::RateLimited { retry_after: None }),
        )]);
        let context = LlmContext::empty();

        let result = mock.stream(&context, &StreamOptions::default()).await;
        match result {
            Err(GatewayError::RateLimited { .. }) => {}
            Err(other) => panic!("expected RateLimited, got: {other:?}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
