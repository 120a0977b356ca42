use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Specialty code reported when analysis could not produce one.
pub const UNKNOWN_SPECIALTY: &str = "UNKNOWN";

/// Specialty codes the model is asked to choose from.
pub const AVAILABLE_SPECIALTIES: &[&str] = &[
    "NEUROLOGY",
    "CARDIOLOGY",
    "ORTHOPEDICS",
    "ENDOCRINOLOGY",
    "GASTROENTEROLOGY",
    "GENERAL_SURGERY",
    "GYNECOLOGY",
    "OPHTHALMOLOGY",
    "EAR_NOSE_AND_THROAT_OTOLARYNGOLOGY",
    "INFECTIOUS_DISEASE",
    "NUTRITION",
    "OCCUPATIONAL_THERAPY",
    "PHYSICAL_THERAPY",
    "PULMONOLOGY_RESPIRATORY_AND_SLEEP_MEDICINE",
    "SPEECH_THERAPY",
    "WOUND_CARE",
];

/// One analysis request: a client and the ordered pages of its referral.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TriageInput {
    pub client_id: String,
    pub referral_pages: Vec<String>,
}

impl TriageInput {
    pub fn new(client_id: impl Into<String>, referral_pages: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            referral_pages,
        }
    }

    /// Pages joined with blank lines, without page markers.
    pub fn full_text(&self) -> String {
        self.referral_pages.join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.referral_pages
            .iter()
            .map(|p| p.split_whitespace().count())
            .sum()
    }
}

/// Structured fields extracted from the model's free-text answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParsedSpecialtyInfo {
    pub specialty: String,
    pub reasoning: String,
    pub confidence: f64,
    pub clinical_details: Vec<String>,
}

impl ParsedSpecialtyInfo {
    pub fn parse_failure(reason: impl std::fmt::Display) -> Self {
        Self {
            specialty: UNKNOWN_SPECIALTY.to_string(),
            reasoning: format!("Response parsing failed: {reason}"),
            confidence: 0.0,
            clinical_details: Vec::new(),
        }
    }
}

/// The externally visible verdict.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TriageResult {
    pub specialty: String,
    /// 1 for urgent, 0 for not urgent.
    pub urgency: u8,
    pub evidence: String,
    pub confidence: f64,
}

impl TriageResult {
    pub fn new(specialty: impl Into<String>, urgent: bool, evidence: impl Into<String>, confidence: f64) -> Self {
        Self {
            specialty: specialty.into(),
            urgency: u8::from(urgent),
            evidence: evidence.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The safe default returned when analysis fails.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            specialty: UNKNOWN_SPECIALTY.to_string(),
            urgency: 0,
            evidence: format!("Analysis failed: {reason}"),
            confidence: 0.0,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.urgency == 1
    }
}

/// Why an analysis failed, classified from the typed error rather than its text.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    QuotaExceeded,
    Authentication,
    Upstream,
    Timeout,
    Cancelled,
    InvalidResponse,
    Internal,
}

impl FailureKind {
    pub fn from_gateway(error: &GatewayError) -> Self {
        match error {
            GatewayError::QuotaExceeded(_) | GatewayError::RateLimited { .. } => Self::QuotaExceeded,
            GatewayError::AuthenticationFailed(_) => Self::Authentication,
            GatewayError::ServerError { .. }
            | GatewayError::ProviderOverloaded
            | GatewayError::NetworkError(_) => Self::Upstream,
            GatewayError::Timeout(_) => Self::Timeout,
            GatewayError::Cancelled => Self::Cancelled,
            GatewayError::InvalidResponse(_) => Self::InvalidResponse,
            GatewayError::InvalidRequest(_) => Self::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Upstream | Self::Timeout)
    }

    /// HTTP status an API layer should answer with for this failure.
    pub fn suggested_http_status(&self) -> u16 {
        match self {
            Self::QuotaExceeded => 429,
            Self::Authentication => 503,
            Self::Upstream | Self::InvalidResponse => 502,
            Self::Timeout => 504,
            Self::Cancelled | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quota_exceeded",
            Self::Authentication => "authentication_error",
            Self::Upstream => "upstream_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidResponse => "invalid_response",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TriageFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one analysis: a verdict, or an explicit failure.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageOutcome {
    Completed(TriageResult),
    Failed(TriageFailure),
}

impl TriageOutcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed(TriageFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed(f) => Some(f.kind),
            Self::Completed(_) => None,
        }
    }

    /// Project onto the single-shape result: failures become the
    /// UNKNOWN / non-urgent / zero-confidence default.
    pub fn into_result(self) -> TriageResult {
        match self {
            Self::Completed(result) => result,
            Self::Failed(failure) => TriageResult::failed(failure.message),
        }
    }
}
