use serde::{Deserialize, Serialize};

use crate::ids::RequestId;
use crate::triage::{FailureKind, TriageResult};

/// Wall-clock breakdown of one analysis, in milliseconds.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StageTimings {
    pub agent_init_ms: f64,
    pub llm_call_ms: f64,
    pub rule_processing_ms: f64,
    pub total_ms: f64,
}

/// Everything the persistence collaborator receives about one analysis.
/// Text fields are plaintext; encryption happens on the far side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub request_id: RequestId,
    pub client_id: String,
    pub referral_pages: Vec<String>,
    pub prompt: Option<String>,
    pub llm_response: Option<String>,
    pub llm_model: Option<String>,
    pub result: TriageResult,
    pub failure: Option<FailureKind>,
    pub tools_used: Vec<String>,
    pub matched_rule: Option<String>,
    pub urgency_criteria: Option<String>,
    pub timings: StageTimings,
    pub created_at: String,
}

impl AnalysisRecord {
    pub fn page_count(&self) -> usize {
        self.referral_pages.len()
    }

    pub fn word_count(&self) -> usize {
        self.referral_pages
            .iter()
            .map(|p| p.split_whitespace().count())
            .sum()
    }

    pub fn patient_history_used(&self) -> bool {
        self.tools_used.iter().any(|t| t.starts_with("check_patient_history"))
    }
}

/// One-way notifications emitted by the analyzer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    AnalysisStarted { request_id: RequestId, client_id: String },
    ToolInvoked { request_id: RequestId, tool_name: String, success: bool },
    AnalysisCompleted(Box<AnalysisRecord>),
}

impl TriageEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AnalysisStarted { .. } => "analysis_started",
            Self::ToolInvoked { .. } => "tool_invoked",
            Self::AnalysisCompleted(_) => "analysis_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AnalysisRecord {
        AnalysisRecord {
            request_id: RequestId::from_raw("req_1"),
            client_id: "c1".into(),
            referral_pages: vec!["new onset seizures".into(), "MRN: 42".into()],
            prompt: None,
            llm_response: Some("SPECIALTY: NEUROLOGY".into()),
            llm_model: Some("mock-model".into()),
            result: TriageResult::new("NEUROLOGY", true, "seizures", 0.85),
            failure: None,
            tools_used: vec!["check_patient_history (patient_id: 42)".into()],
            matched_rule: Some("r1".into()),
            urgency_criteria: Some("New onset seizure".into()),
            timings: StageTimings::default(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn record_counts() {
        let r = record();
        assert_eq!(r.page_count(), 2);
        assert_eq!(r.word_count(), 5);
        assert!(r.patient_history_used());
    }

    #[test]
    fn event_type_tags() {
        let evt = TriageEvent::AnalysisCompleted(Box::new(record()));
        assert_eq!(evt.event_type(), "analysis_completed");
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "analysis_completed");
        assert_eq!(json["client_id"], "c1");

        let started = TriageEvent::AnalysisStarted {
            request_id: RequestId::from_raw("req_2"),
            client_id: "c2".into(),
        };
        assert_eq!(started.event_type(), "analysis_started");
    }
}
