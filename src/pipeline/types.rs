use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::template::types::{Confidence, TemplateField};

/// A ranked piece of regulatory text returned by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub text: String,
    pub source: String,
    /// Normalised similarity, higher is more relevant.
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field_code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// One cited rule in an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRuleCitation {
    pub rule_id: String,
    pub rule_text: String,
    /// `None` is reported as "N/A": textual matches carry no similarity.
    #[serde(serialize_with = "score_or_na")]
    pub relevance_score: Option<f64>,
}

fn score_or_na<S: Serializer>(score: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match score {
        Some(s) => serializer.serialize_f64(*s),
        None => serializer.serialize_str("N/A"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub field_code: String,
    pub value: Value,
    pub reasoning: String,
    pub source_rules: Vec<SourceRuleCitation>,
    pub confidence: Confidence,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_template_id")]
    pub template_id: String,
    #[serde(default)]
    pub context: Option<BTreeMap<String, Value>>,
}

fn default_template_id() -> String {
    "CA1".to_string()
}

impl QueryRequest {
    pub const MIN_QUESTION_LEN: usize = 10;

    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            template_id: default_template_id(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    PartiallyRecovered,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub processed_at: DateTime<Utc>,
    pub documents_retrieved: usize,
    pub fields_populated: usize,
    pub fields_rejected: usize,
    pub validation_errors: usize,
    pub validation_warnings: usize,
    pub parse_status: ParseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateResponse {
    pub query_id: String,
    pub template_id: String,
    pub template_name: String,
    pub fields: Vec<TemplateField>,
    pub validation_issues: Vec<ValidationIssue>,
    pub audit_log: Vec<AuditLogEntry>,
    pub missing_data: Vec<String>,
    pub assumptions: Vec<String>,
    pub metadata: ResponseMetadata,
}

impl TemplateResponse {
    pub fn populated_fields(&self) -> impl Iterator<Item = &TemplateField> {
        self.fields.iter().filter(|f| f.value.is_some())
    }

    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.validation_issues
            .iter()
            .filter(move |i| i.severity == severity)
    }
}
