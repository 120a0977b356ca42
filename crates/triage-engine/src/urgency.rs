use tracing::info;

use triage_core::rules::{ClientRules, NO_URGENT_DIAGNOSES};

/// Specialty whose seizure findings are always urgent.
const SEIZURE_OVERRIDE_SPECIALTY: &str = "NEUROLOGY";
const SEIZURE_TERM: &str = "seizure";

/// How an urgency verdict was reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrgencyDecision {
    pub urgent: bool,
    /// Criteria text looked up for the specialty (the sentinel when absent).
    pub criteria: String,
    /// Id of the mapping rule consulted, if the client has one.
    pub matched_rule: Option<String>,
    /// Set when the NEUROLOGY/seizure override decided the outcome.
    pub override_applied: bool,
}

/// Decide urgency for a specialty under a client's first active
/// specialty→urgency mapping.
///
/// Any criteria text other than [`NO_URGENT_DIAGNOSES`] counts as urgent;
/// the text itself is not matched against the clinical findings.
pub fn evaluate(specialty: &str, reasoning: &str, rules: &ClientRules) -> UrgencyDecision {
    let rule = rules.urgency_rule();
    let criteria = rule
        .and_then(|r| r.data.get(specialty))
        .map_or(NO_URGENT_DIAGNOSES, String::as_str);

    let from_criteria = criteria != NO_URGENT_DIAGNOSES;
    let seizure = specialty == SEIZURE_OVERRIDE_SPECIALTY
        && reasoning.to_lowercase().contains(SEIZURE_TERM);

    let decision = UrgencyDecision {
        urgent: from_criteria || seizure,
        criteria: criteria.to_string(),
        matched_rule: rule.map(|r| r.id.clone()),
        override_applied: seizure && !from_criteria,
    };

    info!(
        specialty,
        criteria = %decision.criteria,
        urgent = decision.urgent,
        override_applied = decision.override_applied,
        "urgency evaluated"
    );
    decision
}

pub fn decide_urgency(specialty: &str, reasoning: &str, rules: &ClientRules) -> bool {
    evaluate(specialty, reasoning, rules).urgent
}
