//! Policy-document ingestion: PDFs in a docs directory become the flat
//! chunk-record list the retriever searches over.
//!
//! Chunking is a plain word window with overlap so a sentence cut at a
//! boundary still appears whole in the neighboring chunk.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

use crate::retriever::ChunkRecord;

/// Words per chunk.
pub const CHUNK_SIZE: usize = 900;
/// Words shared between adjacent chunks.
pub const CHUNK_OVERLAP: usize = 150;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws pattern"));

/// Extract text from a PDF file.
pub fn extract_pdf_text(data: &[u8]) -> Result<String> {
    use lopdf::Document;
    use std::io::Cursor;

    let doc = Document::load_from(Cursor::new(data))
        .map_err(|e| anyhow::anyhow!("Failed to load PDF: {}", e))?;

    let mut text = String::new();
    let pages = doc.get_pages();

    for (page_num, _) in pages {
        if let Ok(content) = doc.extract_text(&[page_num]) {
            text.push_str(&content);
            text.push('\n');
        }
    }

    Ok(text)
}

/// Collapse whitespace runs and drop NUL bytes left by PDF extraction.
pub fn clean_text(t: &str) -> String {
    let t = t.replace('\u{0}', " ");
    WHITESPACE.replace_all(&t, " ").trim().to_string()
}

/// Split text into word windows of `chunk_size` with `overlap` words shared
/// between neighbors.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let end = (i + chunk_size).min(words.len());
        chunks.push(words[i..end].join(" "));
        if end == words.len() {
            break;
        }
        i += step;
    }
    chunks
}

/// Read every PDF in `docs_dir` (sorted by filename) into chunk records with
/// ids of the form `"<file>::chunk_<index>"`.
pub fn ingest_dir(docs_dir: &Path) -> Result<Vec<ChunkRecord>> {
    let mut pdf_paths: Vec<_> = std::fs::read_dir(docs_dir)
        .with_context(|| format!("reading docs directory {:?}", docs_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdf_paths.sort();

    let mut records = Vec::new();
    for path in &pdf_paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let data = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
        let text = clean_text(&extract_pdf_text(&data)?);

        let chunks = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        info!("Ingested {}: {} chunks", name, chunks.len());

        for (idx, chunk) in chunks.into_iter().enumerate() {
            records.push(ChunkRecord {
                id: format!("{}::chunk_{}", name, idx),
                source: name.clone(),
                chunk_index: idx as u32,
                text: chunk,
            });
        }
    }

    Ok(records)
}

/// Persist chunk records as the retriever's index file.
pub fn write_index(records: &[ChunkRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating index directory {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(records).context("serializing chunk records")?;
    std::fs::write(path, json).with_context(|| format!("writing {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a\u{0}b\n\n c\t d  "), "a b c d");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_chunk_text_window_and_overlap() {
        let words: Vec<String> = (0..25).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");

        let chunks = chunk_text(&text, 10, 3);
        // step is 7: windows start at 0, 7, 14, 21
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks[1].starts_with("w7 "));
        // overlap: the last 3 words of chunk 0 open chunk 1
        assert!(chunks[0].ends_with("w7 w8 w9"));
        assert_eq!(chunks[3], "w21 w22 w23 w24");
    }

    #[test]
    fn test_chunk_text_short_input_single_chunk() {
        let chunks = chunk_text("just a few words", 900, 150);
        assert_eq!(chunks, vec!["just a few words".to_string()]);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 900, 150).is_empty());
        assert!(chunk_text("   ", 900, 150).is_empty());
    }

    #[test]
    fn test_chunk_text_degenerate_overlap_still_advances() {
        // overlap >= chunk_size must not loop forever
        let chunks = chunk_text("a b c d", 2, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "a b");
        assert_eq!(chunks[1], "b c");
    }
}
