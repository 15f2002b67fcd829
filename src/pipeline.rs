//! The autofill pipeline: retrieval, prompting, bounded retry/reprint, and
//! reconciliation.
//!
//! The controller retries on bad *output* only. A transport or configuration
//! failure from the generator is terminal and surfaced to the caller.
//! Malformed or truncated output is absorbed: after the attempt budget is
//! spent, per-field salvage plus schema defaults still produce a
//! schema-valid result.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::llm::TextGenerator;
use crate::prompt;
use crate::reconcile::reconcile;
use crate::recover::{self, JsonObject};
use crate::retriever::DocIndex;
use crate::schema::{AutofillRequest, AutofillResult};

/// Top-level attempt budget. Each attempt may issue reprint calls, but the
/// loop itself never runs more than this many times.
const MAX_ATTEMPTS: usize = 3;

/// Pipeline orchestrator.
pub struct AutofillEngine<G> {
    generator: G,
    docs: Arc<DocIndex>,
}

impl<G: TextGenerator> AutofillEngine<G> {
    pub fn new(generator: G, docs: Arc<DocIndex>) -> Self {
        Self { generator, docs }
    }

    /// Run one autofill request to a schema-conforming result.
    ///
    /// Fails only when the generation capability itself cannot be invoked;
    /// unusable model output degrades to partial data plus defaults.
    pub async fn autofill(&self, request: &AutofillRequest) -> Result<AutofillResult, EngineError> {
        let excerpts = if request.use_policy_docs {
            self.docs
                .search(&retrieval_query(request), request.clamped_top_k())
        } else {
            Vec::new()
        };

        info!(
            "Autofill start: form_type={}, {} policy excerpts",
            request.form_type,
            excerpts.len()
        );

        let mut current_prompt = prompt::build(request, &excerpts);
        let mut last_raw = String::new();
        let mut data: Option<JsonObject> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            debug!("Extraction attempt {}/{}", attempt, MAX_ATTEMPTS);
            last_raw = self.generate(&current_prompt).await?;

            // A response that opens an object without closing it gets one
            // immediate reprint before we spend a parse attempt on it.
            if recover::looks_truncated(&last_raw) {
                debug!("Response looks truncated, requesting reprint");
                last_raw = self.generate(&prompt::reprint(&last_raw)).await?;
            }

            if let Some(obj) = try_extract(&last_raw) {
                data = Some(obj);
                break;
            }

            debug!("Extraction failed, requesting reprint");
            last_raw = self.generate(&prompt::reprint(&last_raw)).await?;
            if let Some(obj) = try_extract(&last_raw) {
                data = Some(obj);
                break;
            }

            // next attempt corrects against the latest bad output
            current_prompt = prompt::reprint(&last_raw);
        }

        let data = data.unwrap_or_else(|| {
            warn!("All parse attempts exhausted, salvaging fields from last response");
            recover::salvage_fields(&last_raw)
        });

        let result = reconcile(data, request);
        info!(
            "Autofill complete: {} fields, {} missing, {} risk flags",
            result.autofilled_fields.len(),
            result.missing_fields.len(),
            result.risk_flags.len()
        );
        Ok(result)
    }

    async fn generate(&self, prompt_text: &str) -> Result<String, EngineError> {
        self.generator
            .generate(prompt_text)
            .await
            .map_err(EngineError::Generation)
    }
}

/// Direct extraction path, then prefix recovery for truncated output.
fn try_extract(raw: &str) -> Option<JsonObject> {
    recover::extract_json(raw).or_else(|| recover::largest_valid_prefix(raw))
}

fn retrieval_query(request: &AutofillRequest) -> String {
    let profile = serde_json::to_string(&serde_json::Value::Object(request.profile()))
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "form_type={} advisor_notes={} client_profile={}",
        request.form_type, request.advisor_notes, profile
    )
}
