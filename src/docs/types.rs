use serde::{Deserialize, Serialize};

/// Content-addressed document ID (blake3 hex hash of the extracted text).
pub type DocId = String;

/// Document metadata stored alongside its chunks in cnidarium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: DocId,
    pub name: String,
    /// Where the text came from, e.g. "url:https://www.prarulebook.co.uk/..."
    pub source: String,
    pub size: usize,
    pub chunk_count: usize,
    pub ingested_at: i64,
}

/// One overlapping slice of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: DocId,
    pub index: usize,
    /// Display name of the parent document, used as the snippet source.
    pub source: String,
    pub text: String,
}
