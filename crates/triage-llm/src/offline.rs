//! Offline provider for demos and local runs without network access.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{stream, Stream};

use triage_core::context::LlmContext;
use triage_core::errors::GatewayError;
use triage_core::messages::{AssistantMessage, Message};
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::stream::StreamEvent;
use triage_core::triage::UNKNOWN_SPECIALTY;

/// Keyword → specialty table, checked in order.
const KEYWORD_SPECIALTIES: &[(&str, &str)] = &[
    ("seizure", "NEUROLOGY"),
    ("headache", "NEUROLOGY"),
    ("cardiac", "CARDIOLOGY"),
    ("heart", "CARDIOLOGY"),
    ("chest pain", "CARDIOLOGY"),
    ("hypertension", "CARDIOLOGY"),
    ("fracture", "ORTHOPEDICS"),
    ("bone", "ORTHOPEDICS"),
    ("diabetes", "ENDOCRINOLOGY"),
    ("thyroid", "ENDOCRINOLOGY"),
    ("abdominal", "GASTROENTEROLOGY"),
    ("asthma", "PULMONOLOGY_RESPIRATORY_AND_SLEEP_MEDICINE"),
    ("fever", "INFECTIOUS_DISEASE"),
    ("wound", "WOUND_CARE"),
];

/// Bounds of the referral pages inside a triage prompt.
const REFERRAL_START: &str = "Referral Text (";
const REFERRAL_END: &str = "Detected Clinical Keywords:";

/// Answers in the structured reply format by matching keywords in the
/// referral text. Never calls tools.
#[derive(Debug, Default)]
pub struct KeywordProvider;

impl KeywordProvider {
    pub fn new() -> Self {
        Self
    }

    /// The referral pages of a triage prompt, so rule text and the
    /// specialty list don't count as findings. Other text is used whole.
    fn referral_section(prompt: &str) -> &str {
        let Some(start) = prompt.find(REFERRAL_START) else {
            return prompt;
        };
        let rest = &prompt[start..];
        match rest.find(REFERRAL_END) {
            Some(end) => &rest[..end],
            None => rest,
        }
    }

    fn reply_for(text: &str) -> String {
        let lower = Self::referral_section(text).to_lowercase();
        let hits: Vec<&str> = KEYWORD_SPECIALTIES
            .iter()
            .filter(|(kw, _)| lower.contains(kw))
            .map(|(kw, _)| *kw)
            .collect();

        match KEYWORD_SPECIALTIES.iter().find(|(kw, _)| lower.contains(kw)) {
            Some((_, specialty)) => format!(
                "SPECIALTY: {specialty}\n\
                 REASONING: Referral mentions {}.\n\
                 CONFIDENCE: 0.6\n\
                 CLINICAL_DETAILS: Keyword match only; no model was consulted.",
                hits.join(", ")
            ),
            None => format!(
                "SPECIALTY: {UNKNOWN_SPECIALTY}\n\
                 REASONING: No recognised clinical keywords.\n\
                 CONFIDENCE: 0.1\n\
                 CLINICAL_DETAILS: Keyword match only; no model was consulted."
            ),
        }
    }
}

#[async_trait]
impl LlmProvider for KeywordProvider {
    fn name(&self) -> &str {
        "offline"
    }

    fn model(&self) -> &str {
        "keyword-heuristic"
    }

    fn supports_tools(&self) -> bool {
        false
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        let text = context
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User(u) => Some(u.text.as_str()),
                _ => None,
            })
            .ok_or_else(|| GatewayError::InvalidRequest("no user message in context".into()))?;

        let message = AssistantMessage::text(Self::reply_for(text));
        Ok(Box::pin(stream::iter(StreamEvent::sequence_for(message))))
    }
}
