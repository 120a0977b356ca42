//! Composite user prompt for one referral.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use triage_core::triage::{TriageInput, AVAILABLE_SPECIALTIES};

/// System instructions sent with every analysis.
pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system.txt");

/// Terms reported back to the model when present in the referral.
pub const CLINICAL_KEYWORDS: &[&str] = &[
    "seizure",
    "cardiac",
    "heart",
    "fracture",
    "bone",
    "diabetes",
    "hypertension",
    "fever",
    "pain",
];

/// Phrases that suggest the referral alone may not settle the specialty.
pub const AMBIGUITY_INDICATORS: &[&str] = &[
    "spacing out",
    "episodes",
    "intermittent",
    "unclear",
    "unknown history",
    "family history unknown",
    "previous episodes",
    "similar events",
    "similar presentations",
    "loses time",
    "blackouts",
    "unclear etiology",
    "atypical",
    "varies",
    "multiple medical problems",
    "further evaluation",
    "history shows",
];

const HISTORY_SUGGESTION: &str = "NOTE: This case appears potentially ambiguous. Consider using the \
     check_patient_history tool to get additional context about previous diagnoses, medications, \
     or similar episodes before making your final determination.";

const RESPONSE_FORMAT: &str = "Please respond with:
1. SPECIALTY: [detected specialty]
2. REASONING: [CONCISE 1-2 sentence explanation focusing on key clinical indicators]
3. CONFIDENCE: [0.0-1.0]
4. CLINICAL_DETAILS: [key clinical findings]

IMPORTANT: Keep reasoning brief and focused - maximum 2 sentences highlighting the main clinical evidence.";

/// Keywords from [`CLINICAL_KEYWORDS`] found in `text`, in table order.
pub fn detect_keywords(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    CLINICAL_KEYWORDS
        .iter()
        .copied()
        .filter(|k| lower.contains(k))
        .collect()
}

pub fn is_potentially_ambiguous(text: &str) -> bool {
    let lower = text.to_lowercase();
    AMBIGUITY_INDICATORS.iter().any(|i| lower.contains(i))
}

/// Build the user prompt. `mapping` is shown for context only; urgency is
/// decided after the model answers.
pub fn build_user_prompt(input: &TriageInput, mapping: &BTreeMap<String, String>) -> String {
    let full_text = input.full_text();
    let keywords = detect_keywords(&full_text);
    let rules = serde_json::to_string(mapping).unwrap_or_else(|_| "{}".to_string());

    let mut out = String::from(
        "You are a medical specialty detection AI. Analyze this referral and determine the most \
         appropriate medical specialty.\n\n",
    );
    let _ = writeln!(out, "Client: {}", input.client_id);
    let _ = writeln!(out, "Available Client Rules: {rules}");
    out.push('\n');

    let _ = writeln!(out, "Referral Text ({} pages):", input.referral_pages.len());
    let pages = input
        .referral_pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("Page {}: {page}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push_str(&pages);
    out.push_str("\n\n");

    let detected = if keywords.is_empty() {
        "None detected".to_string()
    } else {
        keywords.join(", ")
    };
    let _ = write!(out, "Detected Clinical Keywords: {detected}");
    if is_potentially_ambiguous(&full_text) {
        out.push_str("\n\n");
        out.push_str(HISTORY_SUGGESTION);
    }
    out.push_str("\n\n");

    let _ = writeln!(out, "Available specialties: {}", AVAILABLE_SPECIALTIES.join(", "));
    out.push('\n');
    out.push_str(RESPONSE_FORMAT);
    out
}
