pub mod audit;
pub mod mapper;
pub mod parser;
pub mod types;
pub mod validator;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::template::types::TemplateField;
use crate::template::{TemplateCatalog, TemplateSchema};

use audit::AuditTrailBuilder;
use types::{QueryRequest, ResponseMetadata, RetrievedSnippet, Severity, TemplateResponse};
use validator::{ValidationConfig, ValidationEngine};

/// Ranked regulatory text for a question, best first. May be empty.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, question: &str) -> Result<Vec<RetrievedSnippet>>;
}

/// Raw model text for a question, its context and the target field list.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context_text: &str,
        field_schema_text: &str,
    ) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Retrieving,
    Generating,
    Parsing,
    Mapping,
    Validating,
    Auditing,
    Completed,
    Failed,
}

impl Stage {
    /// The only stage reachable from this one on success.
    pub fn next(self) -> Stage {
        match self {
            Stage::Received => Stage::Retrieving,
            Stage::Retrieving => Stage::Generating,
            Stage::Generating => Stage::Parsing,
            Stage::Parsing => Stage::Mapping,
            Stage::Mapping => Stage::Validating,
            Stage::Validating => Stage::Auditing,
            Stage::Auditing => Stage::Completed,
            Stage::Completed => Stage::Completed,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Progress<'a> {
    query_id: &'a str,
    stage: Stage,
}

impl<'a> Progress<'a> {
    fn new(query_id: &'a str) -> Self {
        Self {
            query_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self) {
        debug_assert!(!self.stage.is_terminal(), "advance past {}", self.stage);
        let next = self.stage.next();
        debug!(query_id = self.query_id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    fn fail(&mut self, err: &PipelineError) {
        error!(query_id = self.query_id, stage = %self.stage, error = %err, "Query processing failed");
        self.stage = Stage::Failed;
    }
}

pub const NO_CONTEXT_TEXT: &str =
    "No specific regulatory context found. Using general COREP knowledge.";

fn no_context_snippet() -> RetrievedSnippet {
    RetrievedSnippet {
        text: NO_CONTEXT_TEXT.to_string(),
        source: "System".to_string(),
        relevance_score: 0.0,
    }
}

/// Runs one request through retrieval, generation, parsing, mapping, validation
/// and audit. Collaborators are injected; nothing is shared between requests
/// except the read-only catalog.
pub struct QueryOrchestrator {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    catalog: Arc<TemplateCatalog>,
    validation: ValidationConfig,
    audit: AuditTrailBuilder,
}

impl QueryOrchestrator {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        catalog: Arc<TemplateCatalog>,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            catalog,
            validation,
            audit: AuditTrailBuilder::default(),
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub async fn process(&self, request: &QueryRequest) -> PipelineResult<TemplateResponse> {
        let query_id = Uuid::new_v4().to_string();
        let mut progress = Progress::new(&query_id);

        let result = self.run(&query_id, request, &mut progress).await;
        if let Err(e) = &result {
            progress.fail(e);
        }
        result
    }

    async fn run(
        &self,
        query_id: &str,
        request: &QueryRequest,
        progress: &mut Progress<'_>,
    ) -> PipelineResult<TemplateResponse> {
        let question = request.question.trim();
        if question.chars().count() < QueryRequest::MIN_QUESTION_LEN {
            return Err(PipelineError::InvalidRequest(format!(
                "question must be at least {} characters",
                QueryRequest::MIN_QUESTION_LEN
            )));
        }
        let schema = self
            .catalog
            .get(&request.template_id)
            .ok_or_else(|| PipelineError::UnknownTemplate(request.template_id.clone()))?;
        info!(
            query_id,
            template = schema.template_id,
            question = %question.chars().take(100).collect::<String>(),
            "Processing query"
        );

        progress.advance();
        let mut snippets = self
            .retriever
            .search(question)
            .await
            .map_err(PipelineError::Retrieval)?;
        let documents_retrieved = snippets.len();
        info!(query_id, documents_retrieved, "Retrieved regulatory context");
        if snippets.is_empty() {
            warn!(query_id, "No relevant documents found, using placeholder context");
            snippets.push(no_context_snippet());
        }

        progress.advance();
        let mut fields = schema.get_empty_template();
        let raw = self
            .generator
            .generate(
                &scenario_text(question, request),
                &format_context(&snippets),
                &format_field_schema(&schema, &fields),
            )
            .await
            .map_err(PipelineError::Generation)?;
        debug!(query_id, response_len = raw.len(), "Model response received");

        progress.advance();
        let outcome = parser::parse(&raw);
        let parse_status = outcome.status();
        let parse_error = outcome.diagnostic().map(str::to_string);
        let (output, _) = outcome.into_output();

        progress.advance();
        let mapping = mapper::map_fields(&mut fields, &output.populated_fields);

        progress.advance();
        let validation_issues = ValidationEngine::new(&schema, self.validation).validate(&fields);

        progress.advance();
        let audit_log = self.audit.build(&output.populated_fields, &snippets);

        let metadata = ResponseMetadata {
            processed_at: Utc::now(),
            documents_retrieved,
            fields_populated: fields.iter().filter(|f| f.value.is_some()).count(),
            fields_rejected: mapping.rejected,
            validation_errors: validation_issues
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .count(),
            validation_warnings: validation_issues
                .iter()
                .filter(|i| i.severity == Severity::Warning)
                .count(),
            parse_status,
            parse_error,
        };

        progress.advance();
        info!(
            query_id,
            fields_populated = metadata.fields_populated,
            issues = validation_issues.len(),
            "Query completed"
        );

        Ok(TemplateResponse {
            query_id: query_id.to_string(),
            template_id: schema.template_id.to_string(),
            template_name: schema.display_name(),
            fields,
            validation_issues,
            audit_log,
            missing_data: output.missing_data,
            assumptions: output.assumptions,
            metadata,
        })
    }
}

/// The scenario as given to the model, with any caller-supplied context appended.
fn scenario_text(question: &str, request: &QueryRequest) -> String {
    let Some(context) = request.context.as_ref().filter(|c| !c.is_empty()) else {
        return question.to_string();
    };
    let mut text = format!("{}\n\nAdditional context:", question);
    for (key, value) in context {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!("\n- {}: {}", key, value));
    }
    text
}

pub fn format_context(snippets: &[RetrievedSnippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("### {}\n{}", s.source, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_field_schema(schema: &TemplateSchema, fields: &[TemplateField]) -> String {
    let mut text = String::from("Fields to populate:\n");
    for field in fields {
        text.push_str(&format!("- {}: {}", field.field_code, field.label));
        if let Some(rule) = schema.calculation_rule(&field.row_code) {
            text.push_str(&format!(" [calculated: {}]", rule.formula));
        }
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parser::TRUNCATION_NOTE;
    use crate::pipeline::types::ParseStatus;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedRetriever(Vec<RetrievedSnippet>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _question: &str) -> Result<Vec<RetrievedSnippet>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn search(&self, _question: &str) -> Result<Vec<RetrievedSnippet>> {
            anyhow::bail!("index unavailable")
        }
    }

    /// Replies with a canned payload and records what it was asked.
    struct ScriptedGenerator {
        reply: String,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedGenerator {
        fn new(reply: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            question: &str,
            context_text: &str,
            field_schema_text: &str,
        ) -> Result<String> {
            self.calls.lock().unwrap().push((
                question.to_string(),
                context_text.to_string(),
                field_schema_text.to_string(),
            ));
            Ok(self.reply.clone())
        }
    }

    fn crr_snippet() -> RetrievedSnippet {
        RetrievedSnippet {
            text: "CRR Article 26(1): Common Equity Tier 1 items of institutions consist of capital instruments, share premium accounts and retained earnings.".to_string(),
            source: "CRR Part Two".to_string(),
            relevance_score: 0.9,
        }
    }

    fn orchestrator(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> QueryOrchestrator {
        QueryOrchestrator::new(
            retriever,
            generator,
            Arc::new(TemplateCatalog::standard()),
            ValidationConfig::default(),
        )
    }

    const SCENARIO: &str = "Our bank has CET1 capital before adjustments of £500M and deductions of £80M.";

    #[tokio::test]
    async fn test_full_pipeline() {
        let reply = json!({
            "populated_fields": [
                {"field_code": "C0010_R0070", "value": 500000000, "justification": "Given", "source_rules": ["CRR Article 26(1)"], "confidence": "high"},
                {"field_code": "C0010_R0180", "value": 80000000, "justification": "Given", "source_rules": ["CRR Article 36"], "confidence": "medium"},
                {"field_code": "C0010_R0200", "value": 400000000, "justification": "Derived", "source_rules": [], "confidence": "sure"},
                {"field_code": "R0200_C0010", "value": 1, "justification": "Wrong order", "source_rules": [], "confidence": "low"}
            ],
            "missing_data": ["AT1 instruments"],
            "assumptions": ["Figures in GBP"]
        })
        .to_string();
        let generator = ScriptedGenerator::new(reply);
        let orch = orchestrator(Arc::new(FixedRetriever(vec![crr_snippet()])), generator.clone());

        let response = orch.process(&QueryRequest::new(SCENARIO)).await.unwrap();

        assert_eq!(response.template_id, "CA1");
        assert_eq!(response.template_name, "Own Funds (CA1)");
        assert_eq!(response.fields.len(), 58);
        assert_eq!(response.fields[0].field_code, "C0010_R0010");
        assert_eq!(response.metadata.fields_populated, 3);
        assert_eq!(response.metadata.fields_rejected, 1);
        assert_eq!(response.metadata.documents_retrieved, 1);
        assert_eq!(response.metadata.parse_status, ParseStatus::Parsed);
        assert!(Uuid::parse_str(&response.query_id).is_ok());

        let cet1_issues: Vec<_> = response
            .validation_issues
            .iter()
            .filter(|i| i.field_code == "C0010_R0200")
            .collect();
        assert_eq!(cet1_issues.len(), 1);
        assert_eq!(cet1_issues[0].severity, Severity::Warning);

        // Audit reflects every claim, including the one the template rejected.
        assert_eq!(response.audit_log.len(), 4);
        assert_eq!(response.audit_log[0].source_rules[0].rule_text, crr_snippet().text);
        assert_eq!(response.missing_data, vec!["AT1 instruments"]);
        assert_eq!(response.assumptions, vec!["Figures in GBP"]);

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.starts_with("### CRR Part Two\n"));
        assert!(calls[0].2.contains("- C0010_R0200: Common Equity Tier 1 (CET1) capital - Amount [calculated: R0070 - R0180]"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_uses_placeholder_context() {
        let generator = ScriptedGenerator::new(r#"{"populated_fields": []}"#);
        let orch = orchestrator(Arc::new(FixedRetriever(vec![])), generator.clone());

        let response = orch.process(&QueryRequest::new(SCENARIO)).await.unwrap();
        assert_eq!(response.metadata.documents_retrieved, 0);

        let calls = generator.calls.lock().unwrap();
        assert!(calls[0].1.contains(NO_CONTEXT_TEXT));
    }

    #[tokio::test]
    async fn test_truncated_output_degrades_gracefully() {
        let generator = ScriptedGenerator::new(
            "```json\n{\"populated_fields\": [{\"field_code\": \"C0010_R0010\", \"value\": 300000000, \"confidence\": \"high\"}, {\"field_code\": \"C0010_R00",
        );
        let orch = orchestrator(Arc::new(FixedRetriever(vec![crr_snippet()])), generator);

        let response = orch.process(&QueryRequest::new(SCENARIO)).await.unwrap();
        assert_eq!(response.metadata.parse_status, ParseStatus::PartiallyRecovered);
        assert_eq!(response.metadata.fields_populated, 1);
        assert!(response.missing_data.iter().any(|m| m == TRUNCATION_NOTE));
    }

    #[tokio::test]
    async fn test_garbage_output_still_completes() {
        let generator = ScriptedGenerator::new("The model is overloaded.");
        let orch = orchestrator(Arc::new(FixedRetriever(vec![])), generator);

        let response = orch.process(&QueryRequest::new(SCENARIO)).await.unwrap();
        assert_eq!(response.metadata.parse_status, ParseStatus::Failed);
        assert!(response.metadata.parse_error.is_some());
        assert_eq!(response.metadata.fields_populated, 0);
        assert!(response.audit_log.is_empty());
        // Required subtotals are still reported missing.
        assert_eq!(response.metadata.validation_warnings, 4);
    }

    #[tokio::test]
    async fn test_short_question_is_client_error() {
        let orch = orchestrator(
            Arc::new(FixedRetriever(vec![])),
            ScriptedGenerator::new("{}"),
        );
        let err = orch.process(&QueryRequest::new("  CET1?   ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_template_is_client_error() {
        let orch = orchestrator(
            Arc::new(FixedRetriever(vec![])),
            ScriptedGenerator::new("{}"),
        );
        let mut request = QueryRequest::new(SCENARIO);
        request.template_id = "CR1".to_string();
        let err = orch.process(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTemplate(ref id) if id == "CR1"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates() {
        let generator = ScriptedGenerator::new("{}");
        let orch = orchestrator(Arc::new(BrokenRetriever), generator.clone());
        let err = orch.process(&QueryRequest::new(SCENARIO)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval(_)));
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("index unavailable"));
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_context_reaches_generator() {
        let generator = ScriptedGenerator::new(r#"{"populated_fields": []}"#);
        let orch = orchestrator(Arc::new(FixedRetriever(vec![])), generator.clone());
        let mut request = QueryRequest::new(SCENARIO);
        request.context = Some([("reporting_date".to_string(), json!("2024-12-31"))].into());

        orch.process(&request).await.unwrap();
        let calls = generator.calls.lock().unwrap();
        assert!(calls[0].0.ends_with("Additional context:\n- reporting_date: 2024-12-31"));
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Received;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Received,
                Stage::Retrieving,
                Stage::Generating,
                Stage::Parsing,
                Stage::Mapping,
                Stage::Validating,
                Stage::Auditing,
                Stage::Completed,
            ]
        );
        assert_eq!(Stage::Failed.next(), Stage::Failed);
    }
}
