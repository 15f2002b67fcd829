//! Compliance Autofill Engine - LLM-backed structured form extraction server.

mod error;
mod ingest;
mod llm;
mod pipeline;
mod prompt;
mod reconcile;
mod recover;
mod retriever;
mod schema;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use llm::{LlmClient, TextGenerator};
use pipeline::AutofillEngine;
use retriever::DocIndex;
use schema::{AutofillRequest, AutofillResult};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHUNKS_PATH: &str = "data/index/chunks.json";
const DOCS_DIR: &str = "docs";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    llm: Arc<LlmClient>,
    docs: Arc<DocIndex>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "compliance_autofill_engine=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize the LLM client; missing configuration fails startup
    let llm = LlmClient::from_env()?;
    info!("LLM client initialized");

    // Load the policy corpus (a missing index file means an empty corpus)
    let docs = Arc::new(DocIndex::load(CHUNKS_PATH));

    let state = AppState {
        llm: Arc::new(llm),
        docs,
    };

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/llm", post(health_llm))
        .route("/autofill", post(autofill))
        .route("/autofill-from-pdf", post(autofill_from_pdf))
        .route("/docs/reload", post(reload_docs))
        .route("/docs/ingest", post(ingest_docs))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
    info!("Server listening on http://0.0.0.0:8000");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "compliance-autofill-engine",
    }))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Round-trip probe of the LLM capability.
async fn health_llm(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.llm.generate("Reply with exactly: MODEL_OK").await {
        Ok(reply) => Ok(Json(json!({"status": "ok", "model_reply": reply}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("LLM probe failed: {}", e),
        )),
    }
}

/// Run the autofill pipeline for a JSON request.
async fn autofill(
    State(state): State<AppState>,
    Json(request): Json<AutofillRequest>,
) -> Result<Json<AutofillResult>, (StatusCode, String)> {
    run_pipeline(&state, request).await
}

/// Run the autofill pipeline with advisor notes pulled out of uploaded PDFs.
///
/// Accepts one required document (`file`) and an optional second one
/// (`file2`); their extracted text is combined with any `advisor_notes`
/// field into one notes block.
async fn autofill_from_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AutofillResult>, (StatusCode, String)> {
    let mut pdf_texts: Vec<String> = Vec::new();
    let mut form_type = String::new();
    let mut client_profile: Option<String> = None;
    let mut advisor_notes: Option<String> = None;
    let mut use_policy_docs = true;
    let mut top_k_docs: usize = 4;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "file2" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                if !filename.to_lowercase().ends_with(".pdf") {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        "Only PDF files are supported.".to_string(),
                    ));
                }
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?;
                info!("Received {}: {} ({} bytes)", name, filename, data.len());

                let text = ingest::extract_pdf_text(&data).map_err(|e| {
                    error!("PDF extraction failed for {}: {}", filename, e);
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        format!("Could not extract text from {}", filename),
                    )
                })?;
                pdf_texts.push(text.trim().to_string());
            }
            "form_type" => form_type = read_text_field(field).await?,
            "client_profile" => client_profile = Some(read_text_field(field).await?),
            "advisor_notes" => advisor_notes = Some(read_text_field(field).await?),
            "use_policy_docs" => {
                use_policy_docs = read_text_field(field).await?.trim() != "false";
            }
            "top_k_docs" => {
                top_k_docs = read_text_field(field).await?.trim().parse().unwrap_or(4);
            }
            _ => {}
        }
    }

    if pdf_texts.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    let profile = match client_profile.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(raw).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("client_profile is not valid JSON: {}", e),
            )
        })?),
        _ => None,
    };

    let combined_notes = advisor_notes
        .into_iter()
        .chain(pdf_texts)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if combined_notes.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "No text found in PDF or notes.".to_string(),
        ));
    }

    let request = AutofillRequest {
        advisor_notes: combined_notes,
        client_profile: profile,
        form_type,
        use_policy_docs,
        top_k_docs,
    };
    run_pipeline(&state, request).await
}

/// Reload chunks.json without restarting the server.
async fn reload_docs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chunks_loaded = state.docs.reload();
    Json(json!({
        "status": "ok",
        "chunks_loaded": chunks_loaded,
        "chunks_path": state.docs.path().display().to_string(),
    }))
}

#[derive(serde::Deserialize)]
struct IngestQuery {
    dir: Option<String>,
}

/// Re-chunk every PDF in the docs directory, rewrite the index file, and
/// swap the in-memory corpus.
async fn ingest_docs(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let dir = query.dir.unwrap_or_else(|| DOCS_DIR.to_string());
    let records = ingest::ingest_dir(Path::new(&dir)).map_err(|e| {
        error!("Ingestion failed: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Ingestion failed: {}", e),
        )
    })?;

    ingest::write_index(&records, state.docs.path()).map_err(|e| {
        error!("Index write failed: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Index write failed: {}", e),
        )
    })?;

    let chunks_loaded = state.docs.reload();
    Ok(Json(json!({
        "status": "ok",
        "chunks_written": records.len(),
        "chunks_loaded": chunks_loaded,
    })))
}

// ============================================================================
// Helper functions
// ============================================================================

async fn run_pipeline(
    state: &AppState,
    request: AutofillRequest,
) -> Result<Json<AutofillResult>, (StatusCode, String)> {
    request
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, msg))?;

    let engine = AutofillEngine::new((*state.llm).clone(), state.docs.clone());
    let result = engine.autofill(&request).await.map_err(|e| {
        error!("Autofill failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", e))
    })?;

    Ok(Json(result))
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid form field: {}", e)))
}
