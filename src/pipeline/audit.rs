use chrono::{DateTime, Utc};
use tracing::debug;

use super::parser::FieldCandidate;
use super::types::{AuditLogEntry, RetrievedSnippet, SourceRuleCitation};
use crate::template::types::Confidence;

pub const RULE_TEXT_NOT_FOUND: &str = "Rule text not found in retrieved context";
const PREVIEW_CHARS: usize = 200;

/// Builds the per-field audit trail from what the model claimed.
///
/// Provenance is best-effort and textual: a cited rule id is resolved to the
/// first retrieved snippet containing it (case-insensitive), so the recorded
/// relevance is always "N/A".
pub struct AuditTrailBuilder {
    preview_chars: usize,
}

impl Default for AuditTrailBuilder {
    fn default() -> Self {
        Self {
            preview_chars: PREVIEW_CHARS,
        }
    }
}

impl AuditTrailBuilder {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    pub fn build(
        &self,
        candidates: &[FieldCandidate],
        snippets: &[RetrievedSnippet],
    ) -> Vec<AuditLogEntry> {
        self.build_at(candidates, snippets, Utc::now())
    }

    fn build_at(
        &self,
        candidates: &[FieldCandidate],
        snippets: &[RetrievedSnippet],
        now: DateTime<Utc>,
    ) -> Vec<AuditLogEntry> {
        // Lowercased once per build.
        let haystacks: Vec<String> = snippets.iter().map(|s| s.text.to_lowercase()).collect();

        candidates
            .iter()
            .filter(|c| !c.field_code.is_empty())
            .map(|c| AuditLogEntry {
                field_code: c.field_code.clone(),
                value: c.value.clone(),
                reasoning: c.justification.clone(),
                source_rules: c
                    .source_rule_ids
                    .iter()
                    .map(|id| self.cite(id, snippets, &haystacks))
                    .collect(),
                confidence: Confidence::parse(&c.confidence),
                retrieved_at: now,
            })
            .collect()
    }

    fn cite(
        &self,
        rule_id: &str,
        snippets: &[RetrievedSnippet],
        haystacks: &[String],
    ) -> SourceRuleCitation {
        let needle = rule_id.trim().to_lowercase();
        let found = if needle.is_empty() {
            None
        } else {
            haystacks
                .iter()
                .position(|h| h.contains(&needle))
                .map(|i| &snippets[i])
        };

        let rule_text = match found {
            Some(snippet) => {
                debug!(rule_id, source = %snippet.source, "Resolved cited rule");
                self.preview(&snippet.text)
            }
            None => RULE_TEXT_NOT_FOUND.to_string(),
        };
        SourceRuleCitation {
            rule_id: rule_id.to_string(),
            rule_text,
            relevance_score: None,
        }
    }

    fn preview(&self, text: &str) -> String {
        if text.chars().count() <= self.preview_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(self.preview_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn claim(code: &str, value: Value, rules: &[&str]) -> FieldCandidate {
        FieldCandidate {
            field_code: code.to_string(),
            value,
            justification: "Per the scenario".to_string(),
            source_rule_ids: rules.iter().map(|r| r.to_string()).collect(),
            confidence: "high".to_string(),
        }
    }

    fn snippet(text: &str) -> RetrievedSnippet {
        RetrievedSnippet {
            text: text.to_string(),
            source: "PRA Rulebook".to_string(),
            relevance_score: 0.8,
        }
    }

    #[test]
    fn test_resolves_cited_rule_by_substring() {
        let snippets = vec![
            snippet("Article 36 deductions from CET1 items."),
            snippet("Under CRR Article 26(1), Common Equity Tier 1 items consist of capital instruments."),
        ];
        let entries = AuditTrailBuilder::default().build(
            &[claim("C0010_R0010", json!(300_000_000), &["crr article 26(1)"])],
            &snippets,
        );
        assert_eq!(entries.len(), 1);
        let citation = &entries[0].source_rules[0];
        assert_eq!(citation.rule_id, "crr article 26(1)");
        assert_eq!(citation.rule_text, snippets[1].text);
        assert_eq!(citation.relevance_score, None);
        assert_eq!(entries[0].confidence, Confidence::High);
    }

    #[test]
    fn test_unmatched_rule_gets_placeholder() {
        let entries = AuditTrailBuilder::default().build(
            &[claim("C0010_R0010", json!(1), &["CRR Article 26(1)"])],
            &[snippet("Nothing relevant here.")],
        );
        assert_eq!(entries[0].source_rules[0].rule_text, RULE_TEXT_NOT_FOUND);
    }

    #[test]
    fn test_long_snippet_is_truncated_with_ellipsis() {
        let long = format!("CRR Article 28 {}", "x".repeat(300));
        let entries = AuditTrailBuilder::new(50).build(
            &[claim("C0010_R0010", json!(1), &["CRR Article 28"])],
            &[snippet(&long)],
        );
        let text = &entries[0].source_rules[0].rule_text;
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), 53);
    }

    #[test]
    fn test_one_entry_per_claim_including_null() {
        let entries = AuditTrailBuilder::default().build(
            &[
                claim("C0010_R0010", json!(1), &[]),
                claim("C0010_R0030", Value::Null, &[]),
                claim("C9999_R0010", json!(2), &[]),
            ],
            &[],
        );
        let codes: Vec<&str> = entries.iter().map(|e| e.field_code.as_str()).collect();
        assert_eq!(codes, vec!["C0010_R0010", "C0010_R0030", "C9999_R0010"]);
        assert!(entries[1].value.is_null());
        assert!(entries[0].source_rules.is_empty());
    }

    #[test]
    fn test_entries_share_build_timestamp() {
        let now = Utc::now();
        let entries = AuditTrailBuilder::default().build_at(
            &[claim("C0010_R0010", json!(1), &[]), claim("C0010_R0030", json!(2), &[])],
            &[],
            now,
        );
        assert!(entries.iter().all(|e| e.retrieved_at == now));
    }
}
