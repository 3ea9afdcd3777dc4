use anyhow::{Context, Result};
use tracing::info;

use super::types::DocMeta;
use super::RegulatoryStore;

#[derive(Debug, Clone, Copy)]
pub struct Chunking {
    pub size: usize,
    pub overlap: usize,
}

/// Fetch a web page or text document and add it to the corpus.
pub async fn ingest_url(
    store: &RegulatoryStore,
    url: &str,
    name: Option<&str>,
    chunking: Chunking,
) -> Result<DocMeta> {
    let resp = reqwest::get(url)
        .await
        .context("Failed to fetch URL")?
        .error_for_status()
        .context("Source returned an error status")?;

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = resp.bytes().await.context("Failed to read response body")?;

    let text = if content_type.contains("html") {
        html2text::from_read(&body[..], 120)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).to_string())
    } else {
        String::from_utf8_lossy(&body).to_string()
    };

    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| default_name(url));
    ingest_text(store, &text, &name, &format!("url:{}", url), chunking).await
}

/// Chunk already-extracted text and store it.
pub async fn ingest_text(
    store: &RegulatoryStore,
    text: &str,
    name: &str,
    source: &str,
    chunking: Chunking,
) -> Result<DocMeta> {
    let chunks = chunk_text(text, chunking.size, chunking.overlap);
    if chunks.is_empty() {
        anyhow::bail!("No text found in {}", source);
    }
    let meta = store.store(text, name, source, chunks).await?;
    info!(doc_id = %meta.id, name, chunks = meta.chunk_count, size = meta.size, "Document ingested");
    Ok(meta)
}

fn default_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(url)
        .to_string()
}

/// Split text into windows of at most `size` characters, each starting
/// `overlap` characters before the previous one ended. Whitespace is
/// collapsed first; a window prefers to end on a word boundary in its back half.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(space) = (start + size / 2..end).rev().find(|&i| chars[i] == ' ') {
                end = space;
            }
        }
        let chunk: String = chars[start..end].iter().collect();
        chunks.push(chunk.trim().to_string());
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}
