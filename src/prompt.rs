//! Prompt construction for the autofill pipeline.
//!
//! Deterministic string composition, no side effects. The formatting rules
//! baked into the instruction block (no fences, no trailing commas, short
//! outputs) exist to reduce the malformed/truncated responses the recovery
//! cascade otherwise has to absorb.

use serde_json::Value;

use crate::schema::{AutofillRequest, PolicyExcerpt};

/// Build the initial extraction prompt for a request and its retrieved
/// policy excerpts.
pub fn build(request: &AutofillRequest, excerpts: &[PolicyExcerpt]) -> String {
    let profile_json = serde_json::to_string(&Value::Object(request.profile()))
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are a financial compliance assistant.

Return ONLY valid JSON (no markdown, no extra text).
- Never include trailing commas.
- Never include comments.
- Never wrap the JSON in triple backticks.
- Keep outputs SHORT to avoid truncation:
  - explanations: max 1 short sentence per field (<= 160 chars)
  - risk_flags: max 5 items
  - missing_fields: max 10 items
Follow this exact JSON schema:

{schema}

RULES:
- Use advisor_notes + client_profile when available.
- You MAY also use the POLICY EXCERPTS below (they come from public SEC/FINRA documents).
- Be conservative: if information is missing, put the field name in missing_fields.
- risk_flags should identify potential compliance issues (e.g. mismatch between risk tolerance and recommendation).
- citations must be a list of strings for each field.
  Allowed citation strings are only:
  - "advisor_notes"
  - "client_profile"
  - any SOURCE_ID from POLICY EXCERPTS (exactly as shown)
- If you did not use a source for a field, leave its citations list empty.

INPUT:
advisor_notes: {notes}
client_profile: {profile}

POLICY EXCERPTS:
{excerpts}"#,
        schema = schema_block(&request.form_type),
        notes = request.advisor_notes,
        profile = profile_json,
        excerpts = excerpt_block(excerpts),
    )
}

/// Build the correction prompt sent when a previous response was invalid or
/// truncated. Embeds the bad output so the model can reprint it whole.
pub fn reprint(bad_output: &str) -> String {
    format!(
        "You returned output that was invalid or truncated. \
         Reprint the FULL JSON object only, matching the exact same schema.\n\
         Requirements:\n\
         - JSON only (no markdown/backticks)\n\
         - No trailing commas\n\
         - Keep explanations <= 160 chars each\n\
         - citations values must always be JSON arrays (even if empty)\n\n\
         PREVIOUS_OUTPUT (for reference):\n{bad_output}\n"
    )
}

/// The literal target schema with the request's form type substituted in.
fn schema_block(form_type: &str) -> String {
    format!(
        r#"{{
  "form_type": "{form_type}",
  "autofilled_fields": {{
    "client_name": "",
    "client_age": 0,
    "time_horizon_years": 0,
    "risk_tolerance": "",
    "primary_goal": "",
    "recommended_action_summary": "",
    "risk_disclosure_summary": ""
  }},
  "missing_fields": ["..."],
  "risk_flags": ["..."],
  "explanations": {{
    "client_name": "",
    "client_age": "",
    "time_horizon_years": "",
    "risk_tolerance": "",
    "primary_goal": "",
    "recommended_action_summary": "",
    "risk_disclosure_summary": ""
  }},
  "citations": {{
    "client_name": [],
    "client_age": [],
    "time_horizon_years": [],
    "risk_tolerance": [],
    "primary_goal": [],
    "recommended_action_summary": [],
    "risk_disclosure_summary": []
  }}
}}"#
    )
}

fn excerpt_block(excerpts: &[PolicyExcerpt]) -> String {
    if excerpts.is_empty() {
        return "(none)".to_string();
    }
    excerpts
        .iter()
        .map(|e| format!("SOURCE_ID: {}\nEXCERPT: {}", e.source_id, e.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KNOWN_FIELDS;
    use serde_json::json;

    fn request() -> AutofillRequest {
        serde_json::from_value(json!({
            "advisor_notes": "Client is 44 and wants steady income.",
            "client_profile": {"name": "A. Woods"},
            "form_type": "KYC-2024"
        }))
        .unwrap()
    }

    #[test]
    fn test_prompt_embeds_schema_and_input() {
        let prompt = build(&request(), &[]);
        assert!(prompt.contains(r#""form_type": "KYC-2024""#));
        assert!(prompt.contains("Client is 44 and wants steady income."));
        assert!(prompt.contains(r#"{"name":"A. Woods"}"#));
        for field in KNOWN_FIELDS {
            assert!(prompt.contains(field), "schema is missing {field}");
        }
    }

    #[test]
    fn test_prompt_marks_empty_excerpts() {
        let prompt = build(&request(), &[]);
        assert!(prompt.ends_with("(none)"));
    }

    #[test]
    fn test_prompt_formats_excerpt_pairs() {
        let excerpts = vec![
            PolicyExcerpt {
                source_id: "reg-bi.pdf::chunk_2".to_string(),
                text: "Care obligation...".to_string(),
            },
            PolicyExcerpt {
                source_id: "finra-2111.pdf::chunk_0".to_string(),
                text: "Suitability...".to_string(),
            },
        ];
        let prompt = build(&request(), &excerpts);
        assert!(prompt.contains("SOURCE_ID: reg-bi.pdf::chunk_2\nEXCERPT: Care obligation..."));
        assert!(prompt.contains("SOURCE_ID: finra-2111.pdf::chunk_0"));
        assert!(!prompt.contains("(none)"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(build(&request(), &[]), build(&request(), &[]));
    }

    #[test]
    fn test_reprint_embeds_previous_output() {
        let p = reprint("{\"broken\": ");
        assert!(p.contains("PREVIOUS_OUTPUT"));
        assert!(p.contains("{\"broken\": "));
    }
}
