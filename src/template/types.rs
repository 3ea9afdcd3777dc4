use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse reliability tag the model attaches to each proposed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl Confidence {
    /// Total parse: anything that is not a recognised level becomes `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            "low" => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::Unknown => "unknown",
        }
    }
}

/// Declared type of a template cell. CA1 is numeric throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Numeric,
    Text,
    Date,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub code: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowDef {
    pub code: &'static str,
    pub label: &'static str,
    /// Grouping tag, e.g. "CET1" or "CET1_DEDUCTIONS".
    pub section: &'static str,
    pub is_calculated: bool,
}

impl RowDef {
    /// Deduction lines (and their totals) may legitimately carry negative amounts.
    pub fn is_deduction(&self) -> bool {
        self.section.contains("DEDUCTIONS")
    }
}

/// One cell of a template instance.
///
/// Only `value`, `justification`, `source_rule_ids` and `confidence` change after
/// instantiation; the coordinates are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub field_code: String,
    pub row_code: String,
    pub col_code: String,
    pub label: String,
    pub value: Option<Value>,
    pub data_type: DataType,
    pub justification: Option<String>,
    #[serde(default)]
    pub source_rule_ids: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

impl TemplateField {
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_ref().and_then(numeric_value)
    }
}

/// `{column_code}_{row_code}`, e.g. `C0010_R0200`.
pub fn field_code(col_code: &str, row_code: &str) -> String {
    format!("{}_{}", col_code, row_code)
}

/// Numeric reading of an untyped scalar: numbers as-is, strings that parse
/// cleanly as a float. Everything else is not a number.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Name of a JSON value's type as shown in validation messages.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_parse_is_total() {
        assert_eq!(Confidence::parse("high"), Confidence::High);
        assert_eq!(Confidence::parse(" Medium "), Confidence::Medium);
        assert_eq!(Confidence::parse("LOW"), Confidence::Low);
        assert_eq!(Confidence::parse("very sure"), Confidence::Unknown);
        assert_eq!(Confidence::parse(""), Confidence::Unknown);
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value(&json!(420000000)), Some(420_000_000.0));
        assert_eq!(numeric_value(&json!("1.5e6")), Some(1_500_000.0));
        assert_eq!(numeric_value(&json!(" 12 ")), Some(12.0));
        assert_eq!(numeric_value(&json!("£500M")), None);
        assert_eq!(numeric_value(&json!(true)), None);
        assert_eq!(numeric_value(&json!([1])), None);
    }
}
