//! Schema reconciliation: the final normalization pass guaranteeing every
//! output conforms to the fixed form schema regardless of what the model
//! produced.
//!
//! Pure and total; there is no failure mode. Missing keys get defaults,
//! citation values are forced to arrays, and every known field ends up with
//! an autofilled value, an explanation slot, and a citations slot.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::recover::JsonObject;
use crate::schema::{is_numeric_field, AutofillRequest, AutofillResult, KNOWN_FIELDS};

/// Normalize a recovered object into an [`AutofillResult`].
pub fn reconcile(mut data: JsonObject, request: &AutofillRequest) -> AutofillResult {
    let form_type = match data.remove("form_type") {
        Some(Value::String(s)) => s,
        Some(other) => safe_str(&other),
        None => request.form_type.clone(),
    };

    let mut autofilled_fields = as_object(data.remove("autofilled_fields"));
    let missing_fields = as_string_vec(data.remove("missing_fields"));
    let risk_flags = as_string_vec(data.remove("risk_flags"));

    let mut explanations: BTreeMap<String, String> = as_object(data.remove("explanations"))
        .into_iter()
        .map(|(k, v)| (k, safe_str(&v)))
        .collect();

    // Non-array citation values are coerced to empty lists, never rejected.
    let mut citations: BTreeMap<String, Vec<String>> = as_object(data.remove("citations"))
        .into_iter()
        .map(|(k, v)| {
            let list = match v {
                Value::Array(items) => items.iter().map(safe_str).collect(),
                _ => Vec::new(),
            };
            (k, list)
        })
        .collect();

    for field in KNOWN_FIELDS {
        autofilled_fields
            .entry(field.to_string())
            .or_insert_with(|| default_field_value(field));
        explanations.entry(field.to_string()).or_default();
        citations.entry(field.to_string()).or_default();
    }

    AutofillResult {
        form_type,
        autofilled_fields,
        missing_fields,
        risk_flags,
        explanations,
        citations,
    }
}

fn default_field_value(field: &str) -> Value {
    if is_numeric_field(field) {
        Value::from(0)
    } else {
        Value::String(String::new())
    }
}

fn as_object(v: Option<Value>) -> Map<String, Value> {
    match v {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn as_string_vec(v: Option<Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().map(safe_str).collect(),
        _ => Vec::new(),
    }
}

/// Stringify a value the permissive way: null becomes empty, strings pass
/// through, everything else is compact JSON.
fn safe_str(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> AutofillRequest {
        serde_json::from_value(json!({
            "advisor_notes": "Client is 44, wants to retire at 60.",
            "form_type": "KYC-2024"
        }))
        .unwrap()
    }

    fn to_object(result: &AutofillResult) -> JsonObject {
        match serde_json::to_value(result).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_total_defaulting_from_empty() {
        let result = reconcile(JsonObject::new(), &request());

        assert_eq!(result.form_type, "KYC-2024");
        assert!(result.missing_fields.is_empty());
        assert!(result.risk_flags.is_empty());
        for field in KNOWN_FIELDS {
            assert_eq!(result.explanations[field], "");
            assert!(result.citations.get(field).unwrap().is_empty());
            let expected = if is_numeric_field(field) {
                json!(0)
            } else {
                json!("")
            };
            assert_eq!(result.autofilled_fields.get(field).unwrap(), &expected);
        }
    }

    #[test]
    fn test_idempotent_on_complete_object() {
        let once = reconcile(JsonObject::new(), &request());
        let twice = reconcile(to_object(&once), &request());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_model_form_type_wins_over_request() {
        let mut data = JsonObject::new();
        data.insert("form_type".to_string(), json!("SUITABILITY"));
        let result = reconcile(data, &request());
        assert_eq!(result.form_type, "SUITABILITY");
    }

    #[test]
    fn test_non_list_citations_coerced_to_empty() {
        let mut data = JsonObject::new();
        data.insert(
            "citations".to_string(),
            json!({"client_age": "advisor_notes", "primary_goal": ["advisor_notes"]}),
        );
        let result = reconcile(data, &request());
        assert!(result.citations.get("client_age").unwrap().is_empty());
        assert_eq!(
            result.citations.get("primary_goal").unwrap(),
            &vec!["advisor_notes".to_string()]
        );
    }

    #[test]
    fn test_unknown_citation_strings_pass_through() {
        let mut data = JsonObject::new();
        data.insert(
            "citations".to_string(),
            json!({"client_age": ["policy.pdf::chunk_3", "made-up-source"]}),
        );
        let result = reconcile(data, &request());
        assert_eq!(
            result.citations.get("client_age").unwrap(),
            &vec!["policy.pdf::chunk_3".to_string(), "made-up-source".to_string()]
        );
    }

    #[test]
    fn test_extra_autofilled_keys_kept() {
        let mut data = JsonObject::new();
        data.insert(
            "autofilled_fields".to_string(),
            json!({"client_age": 44, "invented_by_model": "kept"}),
        );
        let result = reconcile(data, &request());
        assert_eq!(result.autofilled_fields.get("client_age").unwrap(), 44);
        assert_eq!(
            result.autofilled_fields.get("invented_by_model").unwrap(),
            "kept"
        );
        // defaults still filled in around the extras
        assert_eq!(result.autofilled_fields["risk_tolerance"], "");
    }

    #[test]
    fn test_malformed_composite_values_degrade_to_defaults() {
        let mut data = JsonObject::new();
        data.insert("missing_fields".to_string(), json!("not a list"));
        data.insert("explanations".to_string(), json!(["not", "an", "object"]));
        let result = reconcile(data, &request());
        assert!(result.missing_fields.is_empty());
        assert_eq!(result.explanations.len(), KNOWN_FIELDS.len());
    }

    #[test]
    fn test_non_string_list_entries_stringified() {
        let mut data = JsonObject::new();
        data.insert("missing_fields".to_string(), json!(["client_age", 7]));
        let result = reconcile(data, &request());
        assert_eq!(result.missing_fields, vec!["client_age", "7"]);
    }
}
