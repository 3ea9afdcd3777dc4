use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RetrievalConfig;
use crate::docs::ingest::Chunking;
use crate::docs::RegulatoryStore;
use crate::pipeline::QueryOrchestrator;

pub struct AppState {
    pub store: Arc<RegulatoryStore>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub admin_ids: HashSet<u64>,
    /// Shared with the retriever; admins can modify at runtime.
    pub retrieval_config: Arc<RwLock<RetrievalConfig>>,
    pub chunking: Chunking,
    /// Model name reported by `/corep status`.
    pub model: String,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
