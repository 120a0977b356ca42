use serde_json::Value;

use triage_core::tools::{InsuranceValidationResult, ToolDescriptor};

use super::str_arg;

const DEFAULT_INSURANCE_ID: &str = "INS-12345";

/// Placeholder eligibility check: every policy validates as PPO with a
/// fixed copay.
pub fn validate(descriptor: &ToolDescriptor, args: &Value) -> InsuranceValidationResult {
    let source = descriptor.description.as_deref().unwrap_or("insurance system");
    InsuranceValidationResult {
        patient_id: str_arg(args, "patient_id").unwrap_or("UNKNOWN").to_string(),
        insurance_id: str_arg(args, "insurance_id")
            .unwrap_or(DEFAULT_INSURANCE_ID)
            .to_string(),
        is_valid: true,
        coverage_type: "PPO".to_string(),
        copay_amount: 25.0,
        notes: Some(format!("Validated via {source}")),
    }
}
