//! Request and response types for the compliance autofill pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The fixed set of form fields every result must account for. This is the
/// contract between the prompt (what the model is asked to fill) and the
/// reconciler (what the response is guaranteed to contain).
pub const KNOWN_FIELDS: [&str; 7] = [
    "client_name",
    "client_age",
    "time_horizon_years",
    "risk_tolerance",
    "primary_goal",
    "recommended_action_summary",
    "risk_disclosure_summary",
];

/// Fields whose autofilled value is numeric; they default to `0` instead of `""`.
pub fn is_numeric_field(field: &str) -> bool {
    matches!(field, "client_age" | "time_horizon_years")
}

/// One autofill run's input. Immutable once constructed.
#[derive(Debug, Clone, Deserialize)]
pub struct AutofillRequest {
    pub advisor_notes: String,
    #[serde(default)]
    pub client_profile: Option<Map<String, Value>>,
    pub form_type: String,
    #[serde(default = "default_true")]
    pub use_policy_docs: bool,
    #[serde(default = "default_top_k")]
    pub top_k_docs: usize,
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    4
}

impl AutofillRequest {
    /// Minimum input lengths enforced at the API edge.
    pub fn validate(&self) -> Result<(), String> {
        if self.advisor_notes.trim().len() < 5 {
            return Err("advisor_notes must be at least 5 characters".to_string());
        }
        if self.form_type.trim().len() < 3 {
            return Err("form_type must be at least 3 characters".to_string());
        }
        Ok(())
    }

    /// Client profile with the absent case collapsed to an empty object.
    pub fn profile(&self) -> Map<String, Value> {
        self.client_profile.clone().unwrap_or_default()
    }

    /// Requested excerpt count, clamped for prompt-size control.
    pub fn clamped_top_k(&self) -> usize {
        self.top_k_docs.clamp(1, 5)
    }
}

/// A retrieved policy snippet. `source_id` has the stable form
/// `"<document-name>::chunk_<index>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyExcerpt {
    pub source_id: String,
    pub text: String,
}

/// The schema-conforming output every pipeline path converges on.
///
/// `explanations` and `citations` hold an entry for every field in
/// [`KNOWN_FIELDS`], even when empty; the reconciler enforces this
/// regardless of what the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofillResult {
    pub form_type: String,
    pub autofilled_fields: Map<String, Value>,
    pub missing_fields: Vec<String>,
    pub risk_flags: Vec<String>,
    pub explanations: BTreeMap<String, String>,
    pub citations: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: AutofillRequest = serde_json::from_str(
            r#"{"advisor_notes": "Client wants growth.", "form_type": "KYC"}"#,
        )
        .unwrap();
        assert!(req.use_policy_docs);
        assert_eq!(req.top_k_docs, 4);
        assert!(req.client_profile.is_none());
        assert!(req.profile().is_empty());
    }

    #[test]
    fn test_validate_rejects_short_inputs() {
        let req: AutofillRequest =
            serde_json::from_str(r#"{"advisor_notes": "hi", "form_type": "KYC"}"#).unwrap();
        assert!(req.validate().is_err());

        let req: AutofillRequest =
            serde_json::from_str(r#"{"advisor_notes": "long enough notes", "form_type": "ab"}"#)
                .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_top_k_clamped() {
        let mut req: AutofillRequest = serde_json::from_str(
            r#"{"advisor_notes": "long enough", "form_type": "KYC", "top_k_docs": 50}"#,
        )
        .unwrap();
        assert_eq!(req.clamped_top_k(), 5);
        req.top_k_docs = 0;
        assert_eq!(req.clamped_top_k(), 1);
    }

    #[test]
    fn test_numeric_fields() {
        assert!(is_numeric_field("client_age"));
        assert!(is_numeric_field("time_horizon_years"));
        assert!(!is_numeric_field("risk_tolerance"));
        assert!(!is_numeric_field("client_name"));
    }
}
