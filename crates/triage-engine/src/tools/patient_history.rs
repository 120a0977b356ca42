use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use triage_core::tools::{
    find_enabled, HistoryEntry, PatientHistoryResult, ToolDefinition, ToolDescriptor, ToolKind,
};

use super::{str_arg, ToolExecutor};
use crate::context::RequestContext;

/// Identifier used when neither the model nor the referral supplies one.
pub const PLACEHOLDER_PATIENT_ID: &str = "DEMO_PATIENT";

const DEFAULT_MAX_HISTORY_YEARS: u64 = 5;
const DAYS_PER_YEAR: u64 = 365;

static MRN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)MRN[:\s]*([A-Z0-9]+)").expect("MRN regex"));

/// Placeholder EHR query. History older than the descriptor's
/// `max_history_years` (default 5) is left out.
pub fn lookup(descriptor: &ToolDescriptor, args: &Value, today: NaiveDate) -> PatientHistoryResult {
    let max_years = descriptor
        .config_u64("max_history_years")
        .unwrap_or(DEFAULT_MAX_HISTORY_YEARS);
    let window_days = max_years.saturating_mul(DAYS_PER_YEAR);

    let entries = [
        (90, "Annual Physical", "Routine checkup", "Dr. Smith"),
        (365, "Urgent Care", "Upper respiratory infection", "Dr. Johnson"),
    ];
    let history_entries = entries
        .into_iter()
        .filter(|(age, ..)| *age <= window_days)
        .map(|(age, visit_type, diagnosis, provider)| HistoryEntry {
            date: days_before(today, age),
            visit_type: visit_type.to_string(),
            diagnosis: diagnosis.to_string(),
            provider: provider.to_string(),
        })
        .collect();

    PatientHistoryResult {
        patient_id: str_arg(args, "patient_id").unwrap_or("UNKNOWN").to_string(),
        history_entries,
        medications: vec![
            "Lisinopril 10mg daily".to_string(),
            "Metformin 500mg twice daily".to_string(),
        ],
        allergies: vec!["Penicillin".to_string(), "Shellfish".to_string()],
        last_visit_date: Some(days_before(today, 90)),
    }
}

fn days_before(today: NaiveDate, days: u64) -> String {
    today
        .checked_sub_days(Days::new(days))
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string()
}

/// First `MRN` identifier in the referral, case-insensitive.
pub fn extract_mrn(pages: &[String]) -> Option<String> {
    let text = pages.join("\n");
    MRN_PATTERN
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Definition advertised to the model.
pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: ToolKind::CheckPatientHistory.as_str().to_string(),
        description: "Check patient history for additional context when the referral is \
                      ambiguous: previous diagnoses, medications, allergies and similar episodes."
            .to_string(),
        parameters_schema: json!({
            "type": "object",
            "properties": {
                "patient_id": {
                    "type": "string",
                    "description": "Patient identifier or MRN. Omit to use the MRN found in the referral."
                }
            }
        }),
    }
}

/// Reply to the model's `check_patient_history` call.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryReply {
    pub patient_id: String,
    pub text: String,
    pub success: bool,
}

/// Serve a model-initiated history lookup against the request it belongs to.
///
/// Without an explicit id (or with the placeholder), the MRN is taken from
/// this request's referral pages.
pub async fn answer_model_call(executor: &ToolExecutor, ctx: &RequestContext, args: &Value) -> HistoryReply {
    let requested = str_arg(args, "patient_id").unwrap_or(PLACEHOLDER_PATIENT_ID);
    let patient_id = if requested == PLACEHOLDER_PATIENT_ID {
        extract_mrn(&ctx.referral_pages).unwrap_or_else(|| requested.to_string())
    } else {
        requested.to_string()
    };
    info!(request_id = %ctx.request_id, patient_id = %patient_id, "model requested patient history");

    let name = ToolKind::CheckPatientHistory.as_str();
    if find_enabled(&ctx.tools, name).is_none() {
        return HistoryReply {
            patient_id,
            text: "Patient history tool not available for this client.".to_string(),
            success: false,
        };
    }

    let result = executor
        .execute(name, &ctx.tools, &json!({ "patient_id": patient_id }))
        .await;
    if !result.success {
        let error = result.error.unwrap_or_default();
        warn!(request_id = %ctx.request_id, error = %error, "patient history lookup failed");
        return HistoryReply {
            patient_id,
            text: format!("Unable to retrieve patient history: {error}"),
            success: false,
        };
    }

    match result.payload::<PatientHistoryResult>() {
        Ok(history) => HistoryReply {
            patient_id,
            text: format_for_model(&history),
            success: true,
        },
        Err(e) => {
            warn!(request_id = %ctx.request_id, error = %e, "patient history payload unreadable");
            HistoryReply {
                patient_id,
                text: format!("Error accessing patient history: {e}"),
                success: false,
            }
        }
    }
}

fn format_for_model(history: &PatientHistoryResult) -> String {
    let mut out = String::from("Patient History Retrieved:\n\n");
    let _ = writeln!(out, "Patient ID: {}", history.patient_id);
    let _ = writeln!(
        out,
        "Last Visit: {}",
        history.last_visit_date.as_deref().unwrap_or("Unknown")
    );

    out.push_str("\nRecent Medical History:\n");
    for entry in &history.history_entries {
        let _ = writeln!(out, "- {}: {} ({})", entry.date, entry.diagnosis, entry.visit_type);
    }
    out.push_str("\nCurrent Medications:\n");
    for med in &history.medications {
        let _ = writeln!(out, "- {med}");
    }
    out.push_str("\nKnown Allergies:\n");
    for allergy in &history.allergies {
        let _ = writeln!(out, "- {allergy}");
    }
    out.push_str(
        "\nThis additional context should be considered when determining specialty and urgency.",
    );
    out
}
