use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

use triage_core::context::LlmContext;
use triage_core::errors::GatewayError;
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::stream::StreamEvent;

use crate::converter;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PLACEHOLDER_KEY_PREFIX: &str = "dummy";

/// Endpoint and credentials for an OpenAI-compatible chat completions API.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    /// Pick the endpoint for a given key.
    ///
    /// A real key talks to the configured base URL. A placeholder key
    /// (prefixed `dummy`) is only accepted for a non-OpenAI base URL, which
    /// is how local model servers are addressed.
    pub fn resolve(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GatewayError::AuthenticationFailed("no API key configured".into()))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        if key.starts_with(PLACEHOLDER_KEY_PREFIX) && base_url == OPENAI_BASE_URL {
            return Err(GatewayError::AuthenticationFailed(
                "placeholder API key requires a local base URL".into(),
            ));
        }

        Ok(Self {
            base_url,
            model: model.to_string(),
            api_key: SecretString::from(key),
            request_timeout,
        })
    }

    pub fn is_local(&self) -> bool {
        self.base_url != OPENAI_BASE_URL
    }
}

/// Non-streaming chat completions client. Each call returns the full
/// completion re-expressed as a stream of events.
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.config.request_timeout)
        } else {
            GatewayError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        if self.config.is_local() {
            "local"
        } else {
            "openai"
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    #[instrument(skip(self, context, options), fields(model = %self.config.model))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let body = converter::build_request_body(context, options, &self.config.model);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let message = converter::parse_completion(&payload)?;
        debug!(
            tool_calls = message.tool_calls().len(),
            chars = message.text_content().len(),
            "completion received"
        );

        Ok(Box::pin(stream::iter(StreamEvent::sequence_for(message))))
    }
}
