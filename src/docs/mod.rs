pub mod ingest;
pub mod retriever;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use types::{Chunk, DocMeta};

// cnidarium substore prefixes, no trailing slash.
const META_PREFIX: &str = "doc/meta";
const CHUNK_PREFIX: &str = "doc/chunk";

fn meta_key(id: &str) -> String {
    format!("{}/{}", META_PREFIX, id)
}
fn chunk_key(id: &str, index: usize) -> String {
    format!("{}/{}/{:06}", CHUNK_PREFIX, id, index)
}

/// All chunks, loaded on first search and dropped on every write.
///
/// Each write bumps `generation`; a load only fills the cache if no write
/// happened since it started.
#[derive(Default)]
struct ChunkCache {
    generation: u64,
    chunks: Option<Arc<Vec<Chunk>>>,
}

impl ChunkCache {
    fn fill(&mut self, generation: u64, chunks: Arc<Vec<Chunk>>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.chunks = Some(chunks);
        true
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.chunks = None;
    }
}

/// Document and chunk counts for the status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusStats {
    pub documents: usize,
    pub chunks: usize,
}

/// The regulatory corpus: document metadata plus pre-chunked text.
pub struct RegulatoryStore {
    storage: Storage,
    chunk_cache: RwLock<ChunkCache>,
}

impl RegulatoryStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let prefixes = vec![META_PREFIX.to_string(), CHUNK_PREFIX.to_string()];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            chunk_cache: RwLock::new(ChunkCache::default()),
        })
    }

    /// Store a document and its chunks. Same text = same ID; re-ingesting
    /// replaces the previous chunk set.
    pub async fn store(
        &self,
        text: &str,
        name: &str,
        source: &str,
        chunks: Vec<String>,
    ) -> Result<DocMeta> {
        let id = blake3::hash(text.as_bytes()).to_hex().to_string();
        let previous = self.find_meta(&id).await?;

        let meta = DocMeta {
            id: id.clone(),
            name: name.to_string(),
            source: source.to_string(),
            size: text.len(),
            chunk_count: chunks.len(),
            ingested_at: chrono::Utc::now().timestamp(),
        };

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);

        if let Some(previous) = previous {
            for index in chunks.len()..previous.chunk_count {
                delta.delete(chunk_key(&id, index));
            }
        }
        for (index, text) in chunks.into_iter().enumerate() {
            let chunk = Chunk {
                doc_id: id.clone(),
                index,
                source: name.to_string(),
                text,
            };
            delta.put_raw(
                chunk_key(&id, index),
                serde_json::to_vec(&chunk).context("serialize chunk")?,
            );
        }
        delta.put_raw(
            meta_key(&id),
            serde_json::to_vec(&meta).context("serialize meta")?,
        );

        self.storage.commit(delta).await?;
        self.invalidate().await;
        debug!(doc_id = %id, name, chunks = meta.chunk_count, size = meta.size, "document stored");
        Ok(meta)
    }

    async fn find_meta(&self, doc_id: &str) -> Result<Option<DocMeta>> {
        let snapshot = self.storage.latest_snapshot();
        match snapshot.get_raw(&meta_key(doc_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_meta(&self, doc_id: &str) -> Result<DocMeta> {
        self.find_meta(doc_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document not found: {}", doc_id))
    }

    /// Resolve a full ID or a unique prefix of one (as shown by `/corep sources`).
    pub async fn resolve(&self, id_or_prefix: &str) -> Result<DocMeta> {
        pick_by_prefix(self.list(usize::MAX).await?, id_or_prefix)
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        let documents = self.list(usize::MAX).await?.len();
        let chunks = self.chunks().await?.len();
        Ok(CorpusStats { documents, chunks })
    }

    /// List all documents, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<DocMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(META_PREFIX);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => {
                    if let Ok(meta) = serde_json::from_slice::<DocMeta>(&value) {
                        results.push(meta);
                    }
                }
                Err(e) => {
                    warn!("Error reading doc meta stream: {}", e);
                }
            }
        }

        results.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at));
        results.truncate(limit);
        Ok(results)
    }

    /// Delete a document and all of its chunks.
    pub async fn delete(&self, doc_id: &str) -> Result<DocMeta> {
        let meta = self.get_meta(doc_id).await?;
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        for index in 0..meta.chunk_count {
            delta.delete(chunk_key(doc_id, index));
        }
        delta.delete(meta_key(doc_id));
        self.storage.commit(delta).await?;
        self.invalidate().await;
        debug!(doc_id, "document deleted");
        Ok(meta)
    }

    /// Every stored chunk, in key order.
    pub async fn chunks(&self) -> Result<Arc<Vec<Chunk>>> {
        let generation = {
            let cache = self.chunk_cache.read().await;
            if let Some(chunks) = cache.chunks.as_ref() {
                return Ok(chunks.clone());
            }
            cache.generation
        };

        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(CHUNK_PREFIX);
        let mut chunks = Vec::new();
        while let Some(entry) = stream.next().await {
            let (key, value) = entry?;
            match serde_json::from_slice::<Chunk>(&value) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => warn!(key = %key, "Skipping unreadable chunk: {}", e),
            }
        }

        let chunks = Arc::new(chunks);
        if self.chunk_cache.write().await.fill(generation, chunks.clone()) {
            debug!(count = chunks.len(), "chunk cache loaded");
        } else {
            debug!(count = chunks.len(), "corpus changed during load, cache left empty");
        }
        Ok(chunks)
    }

    async fn invalidate(&self) {
        self.chunk_cache.write().await.invalidate();
    }
}

/// The single document whose ID starts with `id_or_prefix`.
fn pick_by_prefix(metas: Vec<DocMeta>, id_or_prefix: &str) -> Result<DocMeta> {
    let needle = id_or_prefix.trim();
    if needle.is_empty() {
        anyhow::bail!("document ID is empty");
    }
    let mut matches: Vec<DocMeta> = metas
        .into_iter()
        .filter(|m| m.id.starts_with(needle))
        .collect();
    if matches.len() > 1 {
        anyhow::bail!("{} documents match `{}`; use a longer ID", matches.len(), needle);
    }
    matches
        .pop()
        .ok_or_else(|| anyhow::anyhow!("document not found: {}", needle))
}
