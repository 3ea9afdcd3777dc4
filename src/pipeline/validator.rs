//! Validation of a populated template.
//!
//! Four independent passes run in a fixed order (type, required, business rule,
//! range) and their issues are concatenated. Nothing here fails: a value that
//! cannot be read as a number is reported once by the type pass and skipped by
//! the numeric passes.

use std::collections::HashMap;

use tracing::info;

use super::types::{Severity, ValidationIssue};
use crate::template::types::{field_code, numeric_value, value_type_name, DataType, TemplateField};
use crate::template::{CalculationRule, TemplateSchema};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    /// Allowed `|reported - expected|` as a fraction of `|expected|`.
    pub relative_tolerance: f64,
    /// Absolute magnitude above which a value is assumed to be a unit error.
    pub magnitude_ceiling: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            relative_tolerance: 0.01,
            magnitude_ceiling: 10_000_000_000_000.0,
        }
    }
}

impl ValidationConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        if !self.relative_tolerance.is_finite() || self.relative_tolerance < 0.0 {
            anyhow::bail!(
                "VALIDATION_TOLERANCE must be a non-negative fraction, got {}",
                self.relative_tolerance
            );
        }
        if !self.magnitude_ceiling.is_finite() || self.magnitude_ceiling <= 0.0 {
            anyhow::bail!(
                "VALIDATION_MAGNITUDE_CEILING must be a positive amount, got {}",
                self.magnitude_ceiling
            );
        }
        Ok(())
    }
}

pub struct ValidationEngine<'a> {
    schema: &'a TemplateSchema,
    config: ValidationConfig,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(schema: &'a TemplateSchema, config: ValidationConfig) -> Self {
        Self { schema, config }
    }

    pub fn validate(&self, fields: &[TemplateField]) -> Vec<ValidationIssue> {
        let mut issues = self.check_types(fields);
        issues.extend(self.check_required(fields));
        issues.extend(self.check_business_rules(fields));
        issues.extend(self.check_ranges(fields));

        info!(
            issues = issues.len(),
            errors = issues.iter().filter(|i| i.severity == Severity::Error).count(),
            "Validation complete"
        );
        issues
    }

    fn check_types(&self, fields: &[TemplateField]) -> Vec<ValidationIssue> {
        fields
            .iter()
            .filter(|f| f.data_type == DataType::Numeric)
            .filter_map(|f| {
                let value = f.value.as_ref()?;
                if numeric_value(value).is_some() {
                    return None;
                }
                Some(ValidationIssue {
                    field_code: f.field_code.clone(),
                    severity: Severity::Error,
                    message: format!("Expected numeric value, got: {}", value_type_name(value)),
                    suggestion: Some("Provide a numeric value".to_string()),
                })
            })
            .collect()
    }

    fn check_required(&self, fields: &[TemplateField]) -> Vec<ValidationIssue> {
        let primary = self.schema.primary_column();
        self.schema
            .required_rows
            .iter()
            .filter_map(|row| {
                let code = field_code(primary, row);
                let populated = fields
                    .iter()
                    .any(|f| f.field_code == code && f.value.is_some());
                (!populated).then(|| ValidationIssue {
                    field_code: code,
                    severity: Severity::Warning,
                    message: format!("Required field {} is not populated", row),
                    suggestion: Some("Ensure this field is calculated or provided".to_string()),
                })
            })
            .collect()
    }

    fn check_business_rules(&self, fields: &[TemplateField]) -> Vec<ValidationIssue> {
        let primary = self.schema.primary_column();
        let reported: HashMap<&str, f64> = fields
            .iter()
            .filter(|f| f.col_code == primary)
            .filter_map(|f| Some((f.row_code.as_str(), f.numeric()?)))
            .collect();
        let lookup = |row: &str| reported.get(row).copied();

        let mut issues = Vec::new();
        for rule in self.schema.get_calculation_rules() {
            let Some(actual) = lookup(rule.row_code) else {
                continue;
            };
            // Partial inputs are skipped, not flagged.
            let Some(expected) = rule.evaluate(lookup) else {
                continue;
            };
            if (actual - expected).abs() <= expected.abs() * self.config.relative_tolerance {
                continue;
            }

            let label = self
                .schema
                .row(rule.row_code)
                .map(|r| r.label)
                .unwrap_or(rule.row_code);
            let severity = if self.schema.identity_rows.contains(&rule.row_code) {
                Severity::Error
            } else {
                Severity::Warning
            };
            issues.push(ValidationIssue {
                field_code: field_code(primary, rule.row_code),
                severity,
                message: format!(
                    "{} calculation mismatch. Expected {}, got {}",
                    label,
                    amount(expected),
                    amount(actual)
                ),
                suggestion: Some(format!(
                    "{} should equal {}",
                    rule.row_code,
                    describe_terms(rule, &lookup)
                )),
            });
        }
        issues
    }

    fn check_ranges(&self, fields: &[TemplateField]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for field in fields.iter().filter(|f| f.data_type == DataType::Numeric) {
            let Some(value) = field.numeric() else {
                continue;
            };
            let is_deduction = self
                .schema
                .row(&field.row_code)
                .is_some_and(|r| r.is_deduction());

            if value < 0.0 && !is_deduction {
                issues.push(ValidationIssue {
                    field_code: field.field_code.clone(),
                    severity: Severity::Warning,
                    message: format!("Unexpected negative value: {}", amount(value)),
                    suggestion: Some("Capital components should typically be positive".to_string()),
                });
            }
            if value.abs() > self.config.magnitude_ceiling {
                issues.push(ValidationIssue {
                    field_code: field.field_code.clone(),
                    severity: Severity::Warning,
                    message: format!("Unusually large value: {}", amount(value)),
                    suggestion: Some(
                        "Please verify this amount is correct and reported in the right units"
                            .to_string(),
                    ),
                });
            }
        }
        issues
    }
}

/// `R0070 (500000000) - R0180 (80000000)`
fn describe_terms<F>(rule: &CalculationRule, lookup: &F) -> String
where
    F: Fn(&str) -> Option<f64>,
{
    let mut out = String::new();
    for (i, term) in rule.terms().iter().enumerate() {
        if i > 0 {
            out.push_str(if term.sign < 0.0 { " - " } else { " + " });
        } else if term.sign < 0.0 {
            out.push('-');
        }
        let value = lookup(term.row_code).map(amount).unwrap_or_default();
        out.push_str(&format!("{} ({})", term.row_code, value));
    }
    out
}

fn amount(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.0}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn template_with(values: &[(&str, Value)]) -> Vec<TemplateField> {
        let mut fields = TemplateSchema::ca1().get_empty_template();
        for (code, value) in values {
            let field = fields.iter_mut().find(|f| f.field_code == *code).unwrap();
            field.value = Some(value.clone());
        }
        fields
    }

    fn issues_for(values: &[(&str, Value)]) -> Vec<ValidationIssue> {
        let schema = TemplateSchema::ca1();
        ValidationEngine::new(&schema, ValidationConfig::default()).validate(&template_with(values))
    }

    fn rule_issues(values: &[(&str, Value)]) -> Vec<ValidationIssue> {
        let schema = TemplateSchema::ca1();
        ValidationEngine::new(&schema, ValidationConfig::default())
            .check_business_rules(&template_with(values))
    }

    fn range_issues(values: &[(&str, Value)]) -> Vec<ValidationIssue> {
        let schema = TemplateSchema::ca1();
        ValidationEngine::new(&schema, ValidationConfig::default())
            .check_ranges(&template_with(values))
    }

    #[test]
    fn test_cet1_within_tolerance() {
        let issues = rule_issues(&[
            ("C0010_R0070", json!(500_000_000)),
            ("C0010_R0180", json!(80_000_000)),
            ("C0010_R0200", json!(420_000_000)),
        ]);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_cet1_mismatch_is_warning() {
        let issues = rule_issues(&[
            ("C0010_R0070", json!(500_000_000)),
            ("C0010_R0180", json!(80_000_000)),
            ("C0010_R0200", json!(400_000_000)),
        ]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field_code, "C0010_R0200");
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(
            issues[0].suggestion.as_deref(),
            Some("R0200 should equal R0070 (500000000) - R0180 (80000000)")
        );
    }

    #[test]
    fn test_small_rounding_is_tolerated() {
        let issues = rule_issues(&[
            ("C0010_R0070", json!(500_000_000)),
            ("C0010_R0180", json!(80_000_000)),
            ("C0010_R0200", json!(423_000_000)),
        ]);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_tier1_identity() {
        let ok = rule_issues(&[
            ("C0010_R0200", json!(420_000_000)),
            ("C0010_R0280", json!(100_000_000)),
            ("C0010_R0290", json!(516_000_000)),
        ]);
        assert!(ok.is_empty());

        // 20M off an expected 520M is outside 1%.
        let off = rule_issues(&[
            ("C0010_R0200", json!(420_000_000)),
            ("C0010_R0280", json!(100_000_000)),
            ("C0010_R0290", json!(500_000_000)),
        ]);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].severity, Severity::Error);

        let bad = rule_issues(&[
            ("C0010_R0200", json!(420_000_000)),
            ("C0010_R0280", json!(100_000_000)),
            ("C0010_R0290", json!(600_000_000)),
        ]);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].field_code, "C0010_R0290");
        assert_eq!(bad[0].severity, Severity::Error);
    }

    #[test]
    fn test_total_capital_mismatch_is_error() {
        let issues = rule_issues(&[
            ("C0010_R0290", json!(500_000_000)),
            ("C0010_R0370", json!(50_000_000)),
            ("C0010_R0380", json!(600_000_000)),
        ]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field_code, "C0010_R0380");
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn test_partial_dependencies_are_skipped() {
        let issues = rule_issues(&[
            ("C0010_R0070", json!(500_000_000)),
            ("C0010_R0200", json!(1)),
        ]);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_sum_range_subtotal_checked_when_complete() {
        let issues = rule_issues(&[
            ("C0010_R0010", json!(300_000_000)),
            ("C0010_R0030", json!(150_000_000)),
            ("C0010_R0040", json!(20_000_000)),
            ("C0010_R0050", json!(30_000_000)),
            ("C0010_R0060", json!(0)),
            ("C0010_R0070", json!(450_000_000)),
        ]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field_code, "C0010_R0070");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_secondary_column_not_rule_checked() {
        let issues = rule_issues(&[
            ("C0020_R0200", json!(420_000_000)),
            ("C0020_R0280", json!(100_000_000)),
            ("C0020_R0290", json!(600_000_000)),
        ]);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_range_negative_and_large() {
        let negative = range_issues(&[("C0010_R0010", json!(-1))]);
        assert_eq!(negative.len(), 1);
        assert_eq!(negative[0].severity, Severity::Warning);

        let large = range_issues(&[("C0010_R0030", json!(2e13))]);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].severity, Severity::Warning);

        assert!(range_issues(&[("C0010_R0040", json!(5_000_000))]).is_empty());
    }

    #[test]
    fn test_config_bounds() {
        assert!(ValidationConfig::default().check().is_ok());
        let zero = ValidationConfig { relative_tolerance: 0.0, ..Default::default() };
        assert!(zero.check().is_ok());

        for tolerance in [-0.5, f64::NAN, f64::INFINITY] {
            let config = ValidationConfig { relative_tolerance: tolerance, ..Default::default() };
            assert!(config.check().is_err(), "tolerance {} accepted", tolerance);
        }
        for ceiling in [0.0, -1.0, f64::NAN] {
            let config = ValidationConfig { magnitude_ceiling: ceiling, ..Default::default() };
            assert!(config.check().is_err(), "ceiling {} accepted", ceiling);
        }
    }

    #[test]
    fn test_negative_deduction_rows_allowed() {
        assert!(range_issues(&[("C0010_R0090", json!(-40_000_000))]).is_empty());
        assert!(range_issues(&[("C0010_R0180", json!(-80_000_000))]).is_empty());
        assert_eq!(range_issues(&[("C0010_R0200", json!(-1))]).len(), 1);
    }

    #[test]
    fn test_non_numeric_flagged_once() {
        let issues = issues_for(&[("C0010_R0010", json!("three hundred million"))]);
        let for_field: Vec<_> = issues
            .iter()
            .filter(|i| i.field_code == "C0010_R0010")
            .collect();
        assert_eq!(for_field.len(), 1);
        assert_eq!(for_field[0].severity, Severity::Error);
        assert_eq!(for_field[0].message, "Expected numeric value, got: string");
    }

    #[test]
    fn test_numeric_strings_pass_type_check() {
        let schema = TemplateSchema::ca1();
        let engine = ValidationEngine::new(&schema, ValidationConfig::default());
        assert!(engine
            .check_types(&template_with(&[("C0010_R0010", json!("300000000"))]))
            .is_empty());
    }

    #[test]
    fn test_required_subtotals_warn_when_missing() {
        let issues = issues_for(&[]);
        let codes: Vec<&str> = issues.iter().map(|i| i.field_code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["C0010_R0200", "C0010_R0280", "C0010_R0370", "C0010_R0380"]
        );
        assert!(issues.iter().all(|i| i.severity == Severity::Warning));
    }

    #[test]
    fn test_pass_order_is_fixed() {
        let issues = issues_for(&[
            ("C0010_R0010", json!(-5)),
            ("C0010_R0030", json!(true)),
            ("C0010_R0200", json!(420_000_000)),
            ("C0010_R0280", json!(100_000_000)),
            ("C0010_R0290", json!(600_000_000)),
        ]);
        let messages: Vec<&str> = issues.iter().map(|i| i.field_code.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "C0010_R0030", // type
                "C0010_R0370", // required
                "C0010_R0380",
                "C0010_R0290", // business rule
                "C0010_R0010", // range
            ]
        );
    }
}
