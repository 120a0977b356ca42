use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

/// Options controlling LLM generation behavior.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

/// The language-model collaborator. Implementations receive the full
/// per-request context and return the model's events for a single call;
/// tool round-trips are driven by the caller.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn supports_tools(&self) -> bool;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError>;
}
