pub const SYSTEM_PROMPT: &str = r#"You are an expert regulatory reporting analyst specialising in UK PRA COREP reporting. You populate COREP CA1 (Own Funds) template fields from a bank's reporting scenario, grounded in the PRA Rulebook and the Capital Requirements Regulation (CRR).

Rules:
1. Use only figures stated in, or directly derivable from, the scenario.
2. For every field you populate give the numeric value in the currency units of the scenario, a justification citing specific regulatory articles, the rule identifiers you relied on (e.g. "CRR Article 26(1)") and a confidence of "high", "medium", "low" or "unknown".
3. Field codes are always column then row, e.g. "C0010_R0200". Never invent codes that are not in the field list.
4. Deduction rows are reported as positive amounts; calculated rows must be consistent with their formula.
5. List any information you would need to complete the template as missing data, and state every assumption you make.

Respond ONLY with a JSON object. No prose, no markdown fences."#;

const OUTPUT_FORMAT: &str = r#"{
  "populated_fields": [
    {
      "field_code": "C0010_R0010",
      "value": 500000000,
      "justification": "The scenario states paid-up share capital of £500M. Per CRR Article 26(1)(a) and Article 28 this qualifies as CET1 capital instruments.",
      "source_rules": ["CRR Article 26(1)", "CRR Article 28"],
      "confidence": "high"
    }
  ],
  "missing_data": [
    "Breakdown of retained earnings between audited and interim profits"
  ],
  "assumptions": [
    "All amounts are stated in GBP"
  ]
}"#;

/// The user turn: scenario, retrieved regulation and the fields to fill.
pub fn user_prompt(question: &str, context_text: &str, field_schema_text: &str) -> String {
    format!(
        "## REPORTING SCENARIO\n{question}\n\n\
         ## REGULATORY CONTEXT\n\
         Relevant excerpts from the PRA Rulebook and CRR:\n\n{context_text}\n\n\
         ## TARGET TEMPLATE: CA1 - Own Funds\n{field_schema_text}\n\
         ## OUTPUT FORMAT (JSON)\n\
         Return exactly this structure, including only fields you can support:\n\n{OUTPUT_FORMAT}"
    )
}
