//! Orchestration entry point: prompt → model exchange → parse → urgency.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use triage_core::context::LlmContext;
use triage_core::events::{AnalysisRecord, StageTimings, TriageEvent};
use triage_core::ids::RequestId;
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::rules::ClientRules;
use triage_core::triage::{FailureKind, TriageInput, TriageOutcome, TriageResult};
use triage_telemetry::StageClock;

use crate::context::{build_context, RequestContext};
use crate::error::EngineError;
use crate::parser::{MarkerResponseParser, ResponseParser};
use crate::prompt;
use crate::runner::{Exchange, ExchangeRunner};
use crate::tools::ToolExecutor;
use crate::urgency::{self, UrgencyDecision};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Analyzes referrals for any client. Holds no per-request state, so one
/// instance serves concurrent requests.
pub struct TriageAnalyzer {
    runner: ExchangeRunner,
    parser: Arc<dyn ResponseParser>,
    event_tx: broadcast::Sender<TriageEvent>,
    timeout: Duration,
}

impl TriageAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, event_tx: broadcast::Sender<TriageEvent>) -> Self {
        Self {
            runner: ExchangeRunner::new(provider, event_tx.clone()),
            parser: Arc::new(MarkerResponseParser),
            event_tx,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound on the whole model exchange, tool calls included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.runner = self.runner.with_max_tool_rounds(rounds);
        self
    }

    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.runner = self.runner.with_options(options);
        self
    }

    pub fn with_tools(mut self, tools: ToolExecutor) -> Self {
        self.runner = self.runner.with_tools(tools);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.event_tx.subscribe()
    }

    /// Analyze a referral. Never fails: any error yields the
    /// `UNKNOWN` / non-urgent / zero-confidence result.
    pub async fn analyze(&self, input: &TriageInput, rules: &ClientRules) -> TriageResult {
        self.analyze_outcome(input, rules, &CancellationToken::new())
            .await
            .into_result()
    }

    /// Analyze a referral, reporting failure as [`TriageOutcome::Failed`].
    #[instrument(skip_all, fields(client_id = %input.client_id, pages = input.referral_pages.len()))]
    pub async fn analyze_outcome(
        &self,
        input: &TriageInput,
        rules: &ClientRules,
        cancel: &CancellationToken,
    ) -> TriageOutcome {
        let request_id = RequestId::new();
        let clock = StageClock::start();
        self.send_event(TriageEvent::AnalysisStarted {
            request_id: request_id.clone(),
            client_id: input.client_id.clone(),
        });

        let init = clock.stage();
        let ctx = RequestContext::new(request_id.clone(), input, rules);
        let user_prompt = prompt::build_user_prompt(input, &rules.urgency_mapping());
        let llm = build_context(user_prompt.clone(), self.runner.provider().supports_tools());
        let agent_init_ms = init.elapsed_ms();

        let llm_stage = clock.stage();
        let exchange = self.exchange(&ctx, llm, cancel).await;
        let llm_call_ms = llm_stage.elapsed_ms();

        let rule_stage = clock.stage();
        let (outcome, response, decision, tools_used) = match exchange {
            Ok(Exchange { response, tools_called, .. }) => {
                let parsed = self.parser.parse(&response);
                let decision = urgency::evaluate(&parsed.specialty, &parsed.reasoning, rules);
                let result = TriageResult::new(
                    parsed.specialty,
                    decision.urgent,
                    parsed.reasoning,
                    parsed.confidence,
                );
                (TriageOutcome::Completed(result), Some(response), Some(decision), tools_called)
            }
            Err(e) => {
                let kind = e.failure_kind();
                error!(request_id = %request_id, kind = kind.as_str(), error = %e, "triage analysis failed");
                (TriageOutcome::failed(kind, e.to_string()), None, None, Vec::new())
            }
        };
        let rule_processing_ms = rule_stage.elapsed_ms();

        let timings = StageTimings {
            agent_init_ms,
            llm_call_ms,
            rule_processing_ms,
            total_ms: clock.total_ms(),
        };
        if let TriageOutcome::Completed(result) = &outcome {
            info!(
                request_id = %request_id,
                specialty = %result.specialty,
                urgent = result.is_urgent(),
                confidence = result.confidence,
                total_ms = timings.total_ms,
                "triage analysis complete"
            );
        }

        self.send_event(TriageEvent::AnalysisCompleted(Box::new(record(
            request_id,
            input,
            user_prompt,
            response,
            self.runner.provider().model(),
            &outcome,
            decision,
            tools_used,
            timings,
        ))));
        outcome
    }

    async fn exchange(
        &self,
        ctx: &RequestContext,
        llm: LlmContext,
        cancel: &CancellationToken,
    ) -> Result<Exchange, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.runner.run(ctx, llm, cancel)) => {
                res.unwrap_or(Err(EngineError::Timeout(self.timeout)))
            }
        }
    }

    fn send_event(&self, event: TriageEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, triage event dropped");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn record(
    request_id: RequestId,
    input: &TriageInput,
    prompt: String,
    llm_response: Option<String>,
    model: &str,
    outcome: &TriageOutcome,
    decision: Option<UrgencyDecision>,
    tools_used: Vec<String>,
    timings: StageTimings,
) -> AnalysisRecord {
    let failure: Option<FailureKind> = outcome.failure_kind();
    let (matched_rule, urgency_criteria) = match decision {
        Some(d) => (d.matched_rule, Some(d.criteria)),
        None => (None, None),
    };
    AnalysisRecord {
        request_id,
        client_id: input.client_id.clone(),
        referral_pages: input.referral_pages.clone(),
        prompt: Some(prompt),
        llm_response,
        llm_model: Some(model.to_string()),
        result: outcome.clone().into_result(),
        failure,
        tools_used,
        matched_rule,
        urgency_criteria,
        timings,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::pin::Pin;

    use super::*;
    use async_trait::async_trait;
    use futures::Stream;
    use serde_json::json;
    use triage_core::errors::GatewayError;
    use triage_core::ids::ToolCallId;
    use triage_core::messages::{AssistantMessage, Message, ToolCallBlock};
    use triage_core::rules::Rule;
    use triage_core::stream::StreamEvent;
    use triage_core::tools::ToolDescriptor;
    use triage_llm::{KeywordProvider, MockProvider, MockResponse};

    fn rules(pairs: &[(&str, &str)], tools: Vec<ToolDescriptor>) -> ClientRules {
        let data: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ClientRules {
            rules: vec![Rule::urgency_mapping("clinic-a-urgency", data)],
            tools,
        }
    }

    fn analyzer(provider: Arc<dyn LlmProvider>) -> (TriageAnalyzer, broadcast::Receiver<TriageEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (TriageAnalyzer::new(provider, tx), rx)
    }

    fn completed_record(rx: &mut broadcast::Receiver<TriageEvent>) -> AnalysisRecord {
        loop {
            match rx.try_recv().expect("analysis_completed event") {
                TriageEvent::AnalysisCompleted(record) => return *record,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn neurology_seizure_is_urgent() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text(
            "SPECIALTY: NEUROLOGY\nREASONING: seizures present\nCONFIDENCE: 0.85",
        )]));
        let (analyzer, mut rx) = analyzer(provider);
        let input = TriageInput::new("clinic-a", vec!["34yo with new onset seizures".into()]);
        let rules = rules(&[("NEUROLOGY", "New onset seizure or seizure like events")], Vec::new());

        let result = analyzer.analyze(&input, &rules).await;
        assert_eq!(result.specialty, "NEUROLOGY");
        assert_eq!(result.urgency, 1);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.evidence, "seizures present");

        let record = completed_record(&mut rx);
        assert_eq!(record.client_id, "clinic-a");
        assert_eq!(record.matched_rule.as_deref(), Some("clinic-a-urgency"));
        assert_eq!(record.urgency_criteria.as_deref(), Some("New onset seizure or seizure like events"));
        assert_eq!(record.llm_model.as_deref(), Some("mock-model"));
        assert!(record.prompt.unwrap().contains("Page 1: 34yo with new onset seizures"));
        assert!(record.failure.is_none());
        assert!(record.timings.total_ms >= record.timings.llm_call_ms);
    }

    #[tokio::test]
    async fn sentinel_cardiology_is_not_urgent() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text(
            "**SPECIALTY:** CARDIOLOGY\n**REASONING:** exertional chest tightness\n**CONFIDENCE:** 0.6",
        )]));
        let (analyzer, _rx) = analyzer(provider);
        let input = TriageInput::new("clinic-a", vec!["chest tightness on exertion".into()]);
        let rules = rules(&[("CARDIOLOGY", "No urgent diagnoses.")], Vec::new());

        let result = analyzer.analyze(&input, &rules).await;
        assert_eq!(result.specialty, "CARDIOLOGY");
        assert_eq!(result.urgency, 0);
        assert_eq!(result.confidence, 0.6);
    }

    #[tokio::test]
    async fn model_failure_degrades_to_default() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::ServerError { status: 503, body: "unavailable".into() },
        )]));
        let (analyzer, mut rx) = analyzer(provider);
        let input = TriageInput::new("clinic-a", vec!["anything".into()]);

        let result = analyzer.analyze(&input, &ClientRules::default()).await;
        assert_eq!(result.specialty, "UNKNOWN");
        assert_eq!(result.urgency, 0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.evidence.starts_with("Analysis failed: "));
        assert!(result.evidence.contains("503"));

        let record = completed_record(&mut rx);
        assert_eq!(record.failure, Some(FailureKind::Upstream));
        assert!(record.llm_response.is_none());
    }

    #[tokio::test]
    async fn quota_failure_is_typed() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::QuotaExceeded("insufficient_quota".into()),
        )]));
        let (analyzer, _rx) = analyzer(provider);
        let input = TriageInput::new("clinic-a", vec!["x".into()]);
        let outcome = analyzer
            .analyze_outcome(&input, &ClientRules::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::QuotaExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(300),
            MockResponse::stream_text("SPECIALTY: NEUROLOGY"),
        )]));
        let (analyzer, _rx) = analyzer(provider);
        let analyzer = analyzer.with_timeout(Duration::from_secs(5));
        let input = TriageInput::new("clinic-a", vec!["x".into()]);

        let outcome = analyzer
            .analyze_outcome(&input, &ClientRules::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_exchange() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(30),
            MockResponse::stream_text("SPECIALTY: NEUROLOGY"),
        )]));
        let (analyzer, _rx) = analyzer(provider);
        let input = TriageInput::new("clinic-a", vec!["x".into()]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let outcome = analyzer
            .analyze_outcome(&input, &ClientRules::default(), &cancel)
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn history_tool_round_trip_is_recorded() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("check_patient_history", json!({})),
            MockResponse::stream_text(
                "SPECIALTY: NEUROLOGY\nREASONING: staring spells, prior EEG normal\nCONFIDENCE: 0.7",
            ),
        ]));
        let (analyzer, mut rx) = analyzer(provider.clone());
        let analyzer =
            analyzer.with_tools(ToolExecutor::new().with_latencies(Duration::ZERO, Duration::ZERO));
        let input = TriageInput::new("clinic-a", vec!["MRN: 55 child spacing out".into()]);
        let rules = rules(
            &[("NEUROLOGY", "No urgent diagnoses.")],
            vec![ToolDescriptor::enabled("check_patient_history")],
        );

        let result = analyzer.analyze(&input, &rules).await;
        assert_eq!(result.specialty, "NEUROLOGY");
        assert_eq!(result.urgency, 0);

        let first = &provider.seen_contexts()[0];
        assert_eq!(first.tools.len(), 1);
        match &first.messages[0] {
            Message::User(u) => assert!(u.text.contains("NOTE: This case appears potentially ambiguous")),
            other => panic!("expected user prompt, got {other:?}"),
        }

        let record = completed_record(&mut rx);
        assert_eq!(record.tools_used, vec!["check_patient_history (patient_id: 55)"]);
        assert!(record.patient_history_used());
    }

    /// Asks for history on the first call, then echoes the patient id it
    /// was given back as reasoning.
    struct EchoHistoryProvider;

    #[async_trait]
    impl LlmProvider for EchoHistoryProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-model"
        }

        fn supports_tools(&self) -> bool {
            true
        }

        async fn stream(
            &self,
            context: &LlmContext,
            _options: &StreamOptions,
        ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
            let message = match context.messages.last() {
                Some(Message::ToolResult(r)) => {
                    let id_line = r
                        .text
                        .lines()
                        .find(|l| l.starts_with("Patient ID:"))
                        .unwrap_or("Patient ID: none");
                    AssistantMessage::text(format!(
                        "SPECIALTY: NEUROLOGY\nREASONING: {id_line}\nCONFIDENCE: 0.7"
                    ))
                }
                _ => AssistantMessage::with_tool_calls(vec![ToolCallBlock {
                    id: ToolCallId::new(),
                    name: "check_patient_history".into(),
                    arguments: json!({}),
                }]),
            };
            Ok(Box::pin(futures::stream::iter(StreamEvent::sequence_for(message))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_see_their_own_referral() {
        let (analyzer, mut rx) = analyzer(Arc::new(EchoHistoryProvider));
        let rules = rules(&[], vec![ToolDescriptor::enabled("check_patient_history")]);
        let a = TriageInput::new("clinic-a", vec!["MRN: AAA111 blackouts".into()]);
        let b = TriageInput::new("clinic-b", vec!["MRN: BBB222 blackouts".into()]);

        let (ra, rb) = tokio::join!(analyzer.analyze(&a, &rules), analyzer.analyze(&b, &rules));
        assert_eq!(ra.evidence, "Patient ID: AAA111");
        assert_eq!(rb.evidence, "Patient ID: BBB222");

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TriageEvent::AnalysisCompleted(record) = event {
                seen.push((record.client_id.clone(), record.tools_used.clone()));
            }
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("clinic-a".to_string(), vec!["check_patient_history (patient_id: AAA111)".to_string()]),
                ("clinic-b".to_string(), vec!["check_patient_history (patient_id: BBB222)".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn offline_provider_end_to_end() {
        let (analyzer, _rx) = analyzer(Arc::new(KeywordProvider::new()));
        let input = TriageInput::new("clinic-a", vec!["9yo with new onset seizures".into()]);
        let rules = rules(&[("NEUROLOGY", "New onset seizure or seizure like events")], Vec::new());

        let result = analyzer.analyze(&input, &rules).await;
        assert_eq!(result.specialty, "NEUROLOGY");
        assert_eq!(result.urgency, 1);
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.evidence, "Referral mentions seizure.");
    }

    #[tokio::test]
    async fn analysis_without_receivers_still_returns() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("SPECIALTY: ORTHOPEDICS")]));
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let analyzer = TriageAnalyzer::new(provider, tx);
        let input = TriageInput::new("clinic-a", vec!["wrist fracture".into()]);
        let result = analyzer.analyze(&input, &ClientRules::default()).await;
        assert_eq!(result.specialty, "ORTHOPEDICS");
        assert_eq!(result.confidence, 0.5);
    }

    #[tokio::test]
    async fn blank_answer_falls_back_to_parser_defaults() {
        for blank in ["", "   \n"] {
            let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text(blank)]));
            let (analyzer, mut rx) = analyzer(provider);
            let input = TriageInput::new("clinic-a", vec!["follow-up visit".into()]);
            let rules = rules(&[("GENERAL_SURGERY", "No urgent diagnoses.")], Vec::new());

            let outcome = analyzer
                .analyze_outcome(&input, &rules, &CancellationToken::new())
                .await;
            let result = match outcome {
                TriageOutcome::Completed(result) => result,
                other => panic!("blank answer should still complete, got {other:?}"),
            };
            assert_eq!(result.specialty, "GENERAL_SURGERY");
            assert_eq!(result.urgency, 0);
            assert_eq!(result.confidence, 0.5);
            assert!(result.evidence.trim().is_empty());
            assert!(completed_record(&mut rx).failure.is_none());
        }
    }

    #[tokio::test]
    async fn missing_receivers_do_not_warn() {
        use std::io::Write;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);
        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("SPECIALTY: ORTHOPEDICS")]));
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let analyzer = TriageAnalyzer::new(provider, tx);
        let input = TriageInput::new("clinic-a", vec!["wrist fracture".into()]);
        let result = analyzer.analyze(&input, &ClientRules::default()).await;
        assert_eq!(result.specialty, "ORTHOPEDICS");

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(!logs.contains("no event receivers"), "unexpected warning: {logs}");
    }
}
