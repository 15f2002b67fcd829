#![allow(dead_code)]
//! Lexical retrieval over the policy-document corpus.
//!
//! Deliberately a placeholder scorer: ranking is the count of shared
//! normalized tokens between query and chunk text, ties broken by corpus
//! order. The corpus is loaded from a flat `chunks.json` record list and
//! shared process-wide; reload builds a fresh vector and swaps the whole
//! reference so concurrent readers never observe a half-written collection.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, LazyLock};
use tracing::{info, warn};

use crate::schema::PolicyExcerpt;

/// Tokens shorter than this carry no signal for overlap scoring.
const MIN_TOKEN_LEN: usize = 3;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").expect("token pattern"));

/// One persisted corpus record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub source: String,
    pub chunk_index: u32,
    pub text: String,
}

/// In-memory policy-document index.
pub struct DocIndex {
    records: RwLock<Arc<Vec<ChunkRecord>>>,
    path: PathBuf,
}

impl DocIndex {
    /// Load the index from a chunks.json file. A missing or unreadable file
    /// yields an empty corpus, not an error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path);
        info!("Loaded {} policy chunks from {:?}", records.len(), path);
        Self {
            records: RwLock::new(Arc::new(records)),
            path,
        }
    }

    /// Build an index directly from records (used by ingestion and tests).
    pub fn from_records(records: Vec<ChunkRecord>) -> Self {
        Self {
            records: RwLock::new(Arc::new(records)),
            path: PathBuf::new(),
        }
    }

    /// Re-read chunks.json and atomically replace the whole corpus.
    /// Returns the new chunk count.
    pub fn reload(&self) -> usize {
        let fresh = Arc::new(read_records(&self.path));
        let count = fresh.len();
        *self.records.write().unwrap() = fresh;
        info!("Reloaded policy corpus: {} chunks", count);
        count
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-matching chunks for a query by shared-token count, at most
    /// `k` results (clamped to [1, 10]).
    pub fn search(&self, query: &str, k: usize) -> Vec<PolicyExcerpt> {
        let records = self.snapshot();
        if records.is_empty() {
            return Vec::new();
        }

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &ChunkRecord)> = records
            .iter()
            .filter_map(|rec| {
                let overlap = tokenize(&rec.text)
                    .intersection(&query_tokens)
                    .count();
                (overlap > 0).then_some((overlap, rec))
            })
            .collect();

        // stable sort keeps ties in corpus order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(k.clamp(1, 10))
            .map(|(_, rec)| PolicyExcerpt {
                source_id: rec.id.clone(),
                text: rec.text.clone(),
            })
            .collect()
    }

    fn snapshot(&self) -> Arc<Vec<ChunkRecord>> {
        self.records.read().unwrap().clone()
    }
}

fn read_records(path: &Path) -> Vec<ChunkRecord> {
    if !path.exists() {
        return Vec::new();
    }
    match try_read_records(path) {
        Ok(records) => records,
        Err(e) => {
            warn!("Failed to read corpus from {:?}: {:#}", path, e);
            Vec::new()
        }
    }
}

fn try_read_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {:?}", path))
}

/// Lowercase, strip non-alphanumerics, keep tokens of useful length.
fn tokenize(s: &str) -> HashSet<String> {
    let lowered = s.to_lowercase();
    NON_ALNUM
        .replace_all(&lowered, " ")
        .split_whitespace()
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            source: format!("{}.pdf", id),
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    fn corpus() -> DocIndex {
        DocIndex::from_records(vec![
            record("a.pdf::chunk_0", "suitability obligations for retail investors"),
            record("b.pdf::chunk_0", "recordkeeping requirements for brokers"),
            record("c.pdf::chunk_0", "suitability and risk tolerance of retail clients"),
        ])
    }

    #[test]
    fn test_tokenize_normalizes() {
        let tokens = tokenize("Risk-Tolerance: HIGH! (age 44)");
        assert!(tokens.contains("risk"));
        assert!(tokens.contains("tolerance"));
        assert!(tokens.contains("high"));
        assert!(tokens.contains("age"));
        // too short after normalization
        assert!(!tokens.contains("44"));
    }

    #[test]
    fn test_search_ranks_by_overlap() {
        let index = corpus();
        let results = index.search("suitability risk tolerance of retail clients", 3);
        assert_eq!(results[0].source_id, "c.pdf::chunk_0");
        assert_eq!(results[1].source_id, "a.pdf::chunk_0");
        // zero-overlap chunk never surfaces
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = corpus();
        let a = index.search("suitability retail", 5);
        let b = index.search("suitability retail", 5);
        let ids = |r: &[PolicyExcerpt]| r.iter().map(|e| e.source_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_ties_keep_corpus_order() {
        let index = DocIndex::from_records(vec![
            record("first", "margin accounts explained"),
            record("second", "margin accounts explained"),
        ]);
        let results = index.search("margin accounts", 2);
        assert_eq!(results[0].source_id, "first");
        assert_eq!(results[1].source_id, "second");
    }

    #[test]
    fn test_k_is_clamped() {
        let index = corpus();
        assert_eq!(index.search("suitability retail", 0).len(), 1);

        let many: Vec<ChunkRecord> = (0..20)
            .map(|i| record(&format!("doc{i}"), "suitability suitability"))
            .collect();
        let index = DocIndex::from_records(many);
        assert_eq!(index.search("suitability", 50).len(), 10);
    }

    #[test]
    fn test_empty_corpus_and_empty_query() {
        let empty = DocIndex::from_records(Vec::new());
        assert!(empty.search("anything at all", 4).is_empty());

        let index = corpus();
        assert!(index.search("a an of", 4).is_empty());
        assert!(index.search("", 4).is_empty());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let index = DocIndex::load("/nonexistent/chunks.json");
        assert!(index.is_empty());
    }
}
