use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::Chunk;
use super::RegulatoryStore;
use crate::config::RetrievalConfig;
use crate::pipeline::types::RetrievedSnippet;
use crate::pipeline::Retriever;

const STOP_WORDS: &[&str] = &[
    "what", "which", "where", "when", "does", "have", "with", "that", "this", "from", "about",
    "some", "there", "their", "they", "your", "been", "were", "how", "could", "would", "should",
    "shall", "will", "into", "also", "just", "like", "make", "using", "used", "need", "want",
    "find", "know", "tell", "many", "much", "very", "really", "please", "help", "more", "most",
    "only", "the", "and", "for", "are", "has", "our", "its", "was", "all", "any", "can", "not",
    "but", "per",
];

/// Search terms from a question. Hyphenated terms are kept whole and also split.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut keywords = Vec::new();

    for word in question.split_whitespace() {
        let clean: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect::<String>()
            .to_lowercase();
        let clean = clean.trim_matches(|c| c == '-' || c == '_');
        if clean.is_empty() {
            continue;
        }

        if clean.contains('-') || clean.contains('_') {
            keywords.push(clean.to_string());
            for part in clean.split(|c: char| c == '-' || c == '_') {
                if is_keyword(part) {
                    keywords.push(part.to_string());
                }
            }
        } else if is_keyword(clean) {
            keywords.push(clean.to_string());
        }
    }

    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
    keywords
}

fn is_keyword(word: &str) -> bool {
    word.chars().count() > 2 && !STOP_WORDS.contains(&word)
}

/// Fraction of `keywords` present in `text`, case-insensitive. Always in [0, 1].
pub fn score_chunk(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Score, filter and order chunks for a question. Zero-score chunks never
/// qualify; ties keep corpus order.
pub fn rank(chunks: &[Chunk], question: &str, config: RetrievalConfig) -> Vec<RetrievedSnippet> {
    let keywords = extract_keywords(question);
    let mut scored: Vec<(f64, &Chunk)> = chunks
        .iter()
        .map(|c| (score_chunk(&c.text, &keywords), c))
        .filter(|(score, _)| *score > 0.0 && *score >= config.relevance_threshold)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(config.top_k);

    scored
        .into_iter()
        .map(|(score, chunk)| RetrievedSnippet {
            text: chunk.text.clone(),
            source: chunk.source.clone(),
            relevance_score: score,
        })
        .collect()
}

/// Keyword-overlap retrieval over the stored corpus.
pub struct StoreRetriever {
    store: Arc<RegulatoryStore>,
    config: Arc<RwLock<RetrievalConfig>>,
}

impl StoreRetriever {
    pub fn new(store: Arc<RegulatoryStore>, config: Arc<RwLock<RetrievalConfig>>) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn search(&self, question: &str) -> Result<Vec<RetrievedSnippet>> {
        let config = *self.config.read().await;
        let chunks = self.store.chunks().await?;
        let snippets = rank(&chunks, question, config);
        debug!(
            corpus_chunks = chunks.len(),
            returned = snippets.len(),
            top_k = config.top_k,
            threshold = config.relevance_threshold,
            "Corpus searched"
        );
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            doc_id: "doc".to_string(),
            index,
            source: format!("CRR part {}", index),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("What are the CET1 deductions for intangible-assets under Article 36?");
        assert_eq!(
            keywords,
            vec!["cet1", "deductions", "intangible-assets", "intangible", "assets", "under", "article"]
        );
    }

    #[test]
    fn test_score_is_fraction_of_keywords() {
        let keywords = vec!["cet1".to_string(), "goodwill".to_string()];
        assert_eq!(score_chunk("Deduct goodwill from CET1 items", &keywords), 1.0);
        assert_eq!(score_chunk("Goodwill is an intangible asset", &keywords), 0.5);
        assert_eq!(score_chunk("Tier 2 instruments", &keywords), 0.0);
        assert_eq!(score_chunk("anything", &[]), 0.0);
    }

    #[test]
    fn test_rank_filters_sorts_and_limits() {
        let chunks = vec![
            chunk(0, "Retained earnings qualify as CET1 items."),
            chunk(1, "Goodwill and other intangible assets are deducted from CET1."),
            chunk(2, "Tier 2 instruments have a minimum maturity of five years."),
            chunk(3, "Intangible assets include goodwill."),
        ];
        let question = "How are goodwill intangible assets treated in CET1?";

        let all = rank(&chunks, question, RetrievalConfig { top_k: 10, relevance_threshold: 0.0 });
        let sources: Vec<&str> = all.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["CRR part 1", "CRR part 3", "CRR part 0"]);
        assert!(all.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
        assert!(all.iter().all(|s| (0.0..=1.0).contains(&s.relevance_score)));

        let limited = rank(&chunks, question, RetrievalConfig { top_k: 1, relevance_threshold: 0.0 });
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].source, "CRR part 1");
        assert_eq!(limited[0].relevance_score, 0.8);

        let strict = rank(&chunks, question, RetrievalConfig { top_k: 10, relevance_threshold: 0.5 });
        assert_eq!(strict.len(), 2);
    }

    #[test]
    fn test_rank_without_keywords_is_empty() {
        let chunks = vec![chunk(0, "Anything at all")];
        assert!(rank(&chunks, "what is the", RetrievalConfig::default()).is_empty());
    }
}
