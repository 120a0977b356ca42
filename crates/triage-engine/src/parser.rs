//! Extraction of specialty, confidence and reasoning from the model's
//! free-text answer.
//!
//! The model is asked for a `SPECIALTY / REASONING / CONFIDENCE /
//! CLINICAL_DETAILS` block but nothing enforces it, so extraction is a loose
//! marker scan. Each field tolerates three spellings, tried in order; the
//! first spelling present anywhere in the text is the one used.

use tracing::{debug, warn};

use triage_core::triage::ParsedSpecialtyInfo;

/// Specialty assumed when the answer names none.
pub const DEFAULT_SPECIALTY: &str = "GENERAL_SURGERY";

/// Confidence assumed when the answer's value can't be read.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Substring → specialty code, checked in order when no specialty marker exists.
const SPECIALTY_FRAGMENTS: &[(&str, &str)] = &[
    ("neurology", "NEUROLOGY"),
    ("cardiology", "CARDIOLOGY"),
    ("orthopedics", "ORTHOPEDICS"),
    ("endocrinology", "ENDOCRINOLOGY"),
    ("gastroenterology", "GASTROENTEROLOGY"),
    ("surgery", "GENERAL_SURGERY"),
    ("gynecology", "GYNECOLOGY"),
    ("ophthalmology", "OPHTHALMOLOGY"),
    ("infectious", "INFECTIOUS_DISEASE"),
];

/// Lines containing any of these end a multi-line reasoning block.
const REASONING_TERMINATORS: &[&str] = &["SPECIALTY:", "CONFIDENCE:", "CLINICAL_DETAILS:"];

/// A labelled field in the model's answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Specialty,
    Reasoning,
    Confidence,
}

impl Field {
    /// Accepted spellings, most specific first.
    pub fn markers(self) -> [&'static str; 3] {
        match self {
            Self::Specialty => ["**SPECIALTY:**", "**SPECIALTY**:", "SPECIALTY:"],
            Self::Reasoning => ["**REASONING:**", "**REASONING**:", "REASONING:"],
            Self::Confidence => ["**CONFIDENCE:**", "**CONFIDENCE**:", "CONFIDENCE:"],
        }
    }

    /// The first spelling that occurs anywhere in `text`.
    fn marker_in(self, text: &str) -> Option<&'static str> {
        self.markers().into_iter().find(|m| text.contains(m))
    }
}

/// Turns raw model output into [`ParsedSpecialtyInfo`].
///
/// Implementations never fail: unreadable input degrades to defaults or to
/// [`ParsedSpecialtyInfo::parse_failure`].
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParsedSpecialtyInfo;
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("no specialty code after marker {0:?}")]
    EmptySpecialty(&'static str),
}

/// Marker-scanning parser for the prompt's requested answer format.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerResponseParser;

impl ResponseParser for MarkerResponseParser {
    fn parse(&self, raw: &str) -> ParsedSpecialtyInfo {
        match parse_fields(raw) {
            Ok(info) => {
                debug!(specialty = %info.specialty, confidence = info.confidence, "parsed model response");
                info
            }
            Err(e) => {
                warn!(error = %e, "failed to parse model response");
                ParsedSpecialtyInfo::parse_failure(e)
            }
        }
    }
}

fn parse_fields(raw: &str) -> Result<ParsedSpecialtyInfo, ParseError> {
    let specialty = extract_specialty(raw)?;
    let confidence = extract_confidence(raw);
    let reasoning = extract_reasoning(raw).unwrap_or_else(|| raw.to_string());

    Ok(ParsedSpecialtyInfo {
        specialty,
        clinical_details: vec![reasoning.clone()],
        reasoning,
        confidence,
    })
}

/// Text between the first and second occurrence of `marker` on the first
/// line that contains it.
fn after_marker<'a>(raw: &'a str, marker: &str) -> Option<&'a str> {
    raw.lines()
        .find(|line| line.contains(marker))
        .and_then(|line| line.split(marker).nth(1))
}

fn extract_specialty(raw: &str) -> Result<String, ParseError> {
    let Some(marker) = Field::Specialty.marker_in(raw) else {
        return Ok(specialty_from_fragments(raw).to_string());
    };
    after_marker(raw, marker)
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .ok_or(ParseError::EmptySpecialty(marker))
}

fn specialty_from_fragments(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    SPECIALTY_FRAGMENTS
        .iter()
        .find(|(fragment, _)| lower.contains(fragment))
        .map_or(DEFAULT_SPECIALTY, |(_, code)| code)
}

fn extract_confidence(raw: &str) -> f64 {
    let value = Field::Confidence
        .marker_in(raw)
        .and_then(|marker| after_marker(raw, marker))
        .map_or(DEFAULT_CONFIDENCE, |rest| {
            match rest.trim().parse::<f64>() {
                Ok(v) if !v.is_nan() => v,
                _ => DEFAULT_CONFIDENCE,
            }
        });
    value.clamp(0.0, 1.0)
}

/// Reasoning text, or `None` when the answer has no reasoning marker.
fn extract_reasoning(raw: &str) -> Option<String> {
    let marker = Field::Reasoning.marker_in(raw)?;

    let mut parts = Vec::new();
    let mut in_block = false;
    for line in raw.lines() {
        if line.contains(marker) {
            in_block = true;
            parts.push(line.split(marker).nth(1).unwrap_or_default().trim());
        } else if in_block {
            if REASONING_TERMINATORS.iter().any(|t| line.contains(t)) {
                break;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
    }

    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedSpecialtyInfo {
        MarkerResponseParser.parse(raw)
    }

    #[test]
    fn bold_markers() {
        let info = parse("**SPECIALTY:** CARDIOLOGY\n**CONFIDENCE:** 0.8\n**REASONING:** chest pain reported.");
        assert_eq!(info.specialty, "CARDIOLOGY");
        assert_eq!(info.confidence, 0.8);
        assert_eq!(info.reasoning, "chest pain reported.");
        assert_eq!(info.clinical_details, vec!["chest pain reported.".to_string()]);
    }

    #[test]
    fn numbered_plain_format() {
        let raw = "1. SPECIALTY: NEUROLOGY\n\
                   2. REASONING: New onset seizures in a 34 year old.\n\
                   Recommend EEG.\n\
                   3. CONFIDENCE: 0.85\n\
                   4. CLINICAL_DETAILS: seizures";
        let info = parse(raw);
        assert_eq!(info.specialty, "NEUROLOGY");
        assert_eq!(info.confidence, 0.85);
        assert_eq!(info.reasoning, "New onset seizures in a 34 year old. Recommend EEG.");
    }

    #[test]
    fn bold_outside_colon_variant() {
        let info = parse("**SPECIALTY**: ORTHOPEDICS fracture\n**CONFIDENCE**: 0.7");
        assert_eq!(info.specialty, "ORTHOPEDICS");
        assert_eq!(info.confidence, 0.7);
    }

    #[test]
    fn only_first_token_is_the_specialty() {
        let info = parse("SPECIALTY: GENERAL_SURGERY (appendicitis suspected)");
        assert_eq!(info.specialty, "GENERAL_SURGERY");
    }

    #[test]
    fn token_keeps_trailing_punctuation() {
        let info = parse("SPECIALTY: NEUROLOGY.");
        assert_eq!(info.specialty, "NEUROLOGY.");
    }

    #[test]
    fn fallback_to_fragment_scan() {
        let info = parse("This patient should be seen by Neurology soon.");
        assert_eq!(info.specialty, "NEUROLOGY");
        assert_eq!(info.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(info.reasoning, "This patient should be seen by Neurology soon.");
    }

    #[test]
    fn fragment_order_decides() {
        // "cardiology" precedes "surgery" in the fragment table
        let info = parse("cardiac surgery vs cardiology follow up");
        assert_eq!(info.specialty, "CARDIOLOGY");
    }

    #[test]
    fn default_specialty_when_nothing_matches() {
        let info = parse("I am not sure.");
        assert_eq!(info.specialty, DEFAULT_SPECIALTY);
        assert_eq!(info.reasoning, "I am not sure.");
        assert_eq!(info.clinical_details.len(), 1);
    }

    #[test]
    fn unparsable_confidence_defaults() {
        assert_eq!(parse("SPECIALTY: X\nCONFIDENCE: high").confidence, 0.5);
        assert_eq!(parse("SPECIALTY: X\nCONFIDENCE: 0.9 (strong)").confidence, 0.5);
        assert_eq!(parse("SPECIALTY: X\nCONFIDENCE: NaN").confidence, 0.5);
    }

    #[test]
    fn confidence_clamped() {
        assert_eq!(parse("SPECIALTY: X\nCONFIDENCE: 85").confidence, 1.0);
        assert_eq!(parse("SPECIALTY: X\nCONFIDENCE: -0.3").confidence, 0.0);
    }

    #[test]
    fn empty_specialty_is_a_parse_failure() {
        let info = parse("SPECIALTY:\nREASONING: unclear");
        assert_eq!(info.specialty, "UNKNOWN");
        assert_eq!(info.confidence, 0.0);
        assert!(info.reasoning.starts_with("Response parsing failed:"));
        assert!(info.clinical_details.is_empty());
    }

    #[test]
    fn marker_with_nothing_after_it_gives_empty_reasoning() {
        let raw = "SPECIALTY: CARDIOLOGY\nREASONING:";
        // the marker line contributes an empty segment, which still counts
        let info = parse(raw);
        assert_eq!(info.reasoning, "");
    }

    #[test]
    fn reasoning_stops_at_next_field() {
        let raw = "REASONING: first\n\nsecond\nSPECIALTY: CARDIOLOGY\nthird";
        let info = parse(raw);
        assert_eq!(info.reasoning, "first second");
        assert_eq!(info.specialty, "CARDIOLOGY");
    }

    #[test]
    fn repeated_reasoning_markers_accumulate() {
        let raw = "REASONING: one\nREASONING: two\nCONFIDENCE: 0.4";
        assert_eq!(parse(raw).reasoning, "one two");
    }
}
