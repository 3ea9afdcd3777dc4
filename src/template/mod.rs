pub mod types;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use types::{field_code, ColumnDef, DataType, RowDef, TemplateField};

/// Right-hand side of a calculated row, as written in the template guidance.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// Every non-calculated row from `first` to `last` inclusive, in template order.
    SumRange {
        first: &'static str,
        last: &'static str,
    },
    Difference {
        minuend: &'static str,
        subtrahend: &'static str,
    },
    Sum(&'static [&'static str]),
    /// The row carries the value of a single other row.
    Alias(&'static str),
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::SumRange { first, last } => write!(f, "Sum of {} to {}", first, last),
            Formula::Difference {
                minuend,
                subtrahend,
            } => write!(f, "{} - {}", minuend, subtrahend),
            Formula::Sum(rows) => write!(f, "{}", rows.join(" + ")),
            Formula::Alias(row) => write!(f, "{}", row),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub row_code: &'static str,
    pub sign: f64,
}

/// A calculated row together with its formula resolved into signed terms.
#[derive(Debug, Clone)]
pub struct CalculationRule {
    pub row_code: &'static str,
    pub formula: Formula,
    terms: Vec<Term>,
}

impl CalculationRule {
    fn resolve(row_code: &'static str, formula: Formula, rows: &[RowDef]) -> Self {
        let positive = |row_code: &'static str| Term {
            row_code,
            sign: 1.0,
        };
        let terms = match &formula {
            Formula::SumRange { first, last } => {
                let start = rows.iter().position(|r| r.code == *first);
                let end = rows.iter().position(|r| r.code == *last);
                match (start, end) {
                    (Some(s), Some(e)) if s <= e => rows[s..=e]
                        .iter()
                        .filter(|r| !r.is_calculated)
                        .map(|r| positive(r.code))
                        .collect(),
                    _ => Vec::new(),
                }
            }
            Formula::Difference {
                minuend,
                subtrahend,
            } => vec![
                positive(*minuend),
                Term {
                    row_code: *subtrahend,
                    sign: -1.0,
                },
            ],
            Formula::Sum(parts) => parts.iter().map(|r| positive(*r)).collect(),
            Formula::Alias(row) => vec![positive(*row)],
        };
        Self {
            row_code,
            formula,
            terms,
        }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.terms.iter().map(|t| t.row_code)
    }

    /// Evaluate against the supplied row values. `None` unless every
    /// dependency has a value.
    pub fn evaluate<F>(&self, lookup: F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        if self.terms.is_empty() {
            return None;
        }
        self.terms
            .iter()
            .try_fold(0.0, |acc, t| lookup(t.row_code).map(|v| acc + t.sign * v))
    }
}

impl fmt::Display for CalculationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.row_code, self.formula)
    }
}

/// Row and column metadata behind a field code.
#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo<'a> {
    pub field_code: String,
    pub row: &'a RowDef,
    pub column: &'a ColumnDef,
    pub is_calculated: bool,
    pub section: &'static str,
}

/// Summary of a template for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub row_count: usize,
    pub col_count: usize,
    pub field_count: usize,
    pub status: String,
}

/// Static definition of a report template. Immutable once built.
#[derive(Debug, Clone)]
pub struct TemplateSchema {
    pub template_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<RowDef>,
    rules: Vec<CalculationRule>,
    /// Capital subtotals expected under the primary column.
    pub required_rows: Vec<&'static str>,
    /// Calculated rows that are definitional identities; a mismatch on these is
    /// an inconsistent answer rather than rounding.
    pub identity_rows: Vec<&'static str>,
}

fn input(code: &'static str, label: &'static str, section: &'static str) -> RowDef {
    RowDef {
        code,
        label,
        section,
        is_calculated: false,
    }
}

fn calculated(code: &'static str, label: &'static str, section: &'static str) -> RowDef {
    RowDef {
        code,
        label,
        section,
        is_calculated: true,
    }
}

impl TemplateSchema {
    /// COREP CA1 (Own Funds), simplified to the main capital components.
    pub fn ca1() -> Self {
        let columns = vec![
            ColumnDef {
                code: "C0010",
                label: "Amount",
            },
            ColumnDef {
                code: "C0020",
                label: "Of which: classified as equity under applicable accounting standards",
            },
        ];

        let rows = vec![
            input("R0010", "Capital instruments and the related share premium accounts", "CET1"),
            input("R0030", "Retained earnings", "CET1"),
            input("R0040", "Accumulated other comprehensive income", "CET1"),
            input("R0050", "Other reserves", "CET1"),
            input("R0060", "Minority interests (amount allowed in consolidated CET1)", "CET1"),
            calculated(
                "R0070",
                "Common Equity Tier 1 (CET1) capital before regulatory adjustments",
                "CET1_SUBTOTAL",
            ),
            input("R0080", "Additional value adjustments", "CET1_DEDUCTIONS"),
            input("R0090", "Intangible assets (net of related tax liability)", "CET1_DEDUCTIONS"),
            input("R0100", "Deferred tax assets that rely on future profitability", "CET1_DEDUCTIONS"),
            input("R0130", "Direct and indirect holdings of own CET1 instruments", "CET1_DEDUCTIONS"),
            calculated("R0180", "Total regulatory adjustments to CET1", "CET1_DEDUCTIONS_TOTAL"),
            calculated("R0200", "Common Equity Tier 1 (CET1) capital", "CET1_TOTAL"),
            input("R0210", "Capital instruments and the related share premium accounts", "AT1"),
            input("R0220", "Amount of qualifying items referred to in Article 484 (4) CRR", "AT1"),
            input("R0230", "Minority interests (amount allowed in consolidated AT1)", "AT1"),
            calculated(
                "R0240",
                "Additional Tier 1 (AT1) capital before regulatory adjustments",
                "AT1_SUBTOTAL",
            ),
            input("R0250", "Direct and indirect holdings of own AT1 instruments", "AT1_DEDUCTIONS"),
            calculated("R0270", "Total regulatory adjustments to AT1 capital", "AT1_DEDUCTIONS_TOTAL"),
            calculated("R0280", "Additional Tier 1 (AT1) capital", "AT1_TOTAL"),
            calculated("R0290", "Tier 1 capital (T1 = CET1 + AT1)", "T1_TOTAL"),
            input("R0300", "Capital instruments and the related share premium accounts", "T2"),
            input("R0310", "Amount of qualifying items referred to in Article 484 (5) CRR", "T2"),
            input("R0320", "Credit risk adjustments", "T2"),
            input("R0330", "Minority interests (amount allowed in consolidated T2)", "T2"),
            calculated("R0340", "Tier 2 (T2) capital before regulatory adjustments", "T2_SUBTOTAL"),
            input("R0350", "Direct and indirect holdings of own T2 instruments", "T2_DEDUCTIONS"),
            calculated("R0360", "Total regulatory adjustments to T2 capital", "T2_DEDUCTIONS_TOTAL"),
            calculated("R0370", "Tier 2 (T2) capital", "T2_TOTAL"),
            calculated("R0380", "Total capital (TC = T1 + T2)", "TOTAL_CAPITAL"),
        ];

        let formulas = [
            ("R0070", Formula::SumRange { first: "R0010", last: "R0060" }),
            ("R0180", Formula::SumRange { first: "R0080", last: "R0130" }),
            ("R0200", Formula::Difference { minuend: "R0070", subtrahend: "R0180" }),
            ("R0240", Formula::SumRange { first: "R0210", last: "R0230" }),
            ("R0270", Formula::Alias("R0250")),
            ("R0280", Formula::Difference { minuend: "R0240", subtrahend: "R0270" }),
            ("R0290", Formula::Sum(&["R0200", "R0280"])),
            ("R0340", Formula::SumRange { first: "R0300", last: "R0330" }),
            ("R0360", Formula::Alias("R0350")),
            ("R0370", Formula::Difference { minuend: "R0340", subtrahend: "R0360" }),
            ("R0380", Formula::Sum(&["R0290", "R0370"])),
        ];
        let rules = formulas
            .into_iter()
            .map(|(row, formula)| CalculationRule::resolve(row, formula, &rows))
            .collect();

        Self {
            template_id: "CA1",
            name: "Own Funds",
            description: "COREP CA1 - Own Funds template for reporting capital composition",
            columns,
            rows,
            rules,
            required_rows: vec!["R0200", "R0280", "R0370", "R0380"],
            identity_rows: vec!["R0290", "R0380"],
        }
    }

    /// Name used in responses, e.g. "Own Funds (CA1)".
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.template_id)
    }

    /// Column under which subtotals and calculation checks are evaluated.
    pub fn primary_column(&self) -> &str {
        self.columns.first().map(|c| c.code).unwrap_or_default()
    }

    pub fn row(&self, row_code: &str) -> Option<&RowDef> {
        self.rows.iter().find(|r| r.code == row_code)
    }

    pub fn column(&self, col_code: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.code == col_code)
    }

    /// One empty field per (row, column), rows outer, columns inner.
    pub fn get_empty_template(&self) -> Vec<TemplateField> {
        self.rows
            .iter()
            .flat_map(|row| {
                self.columns.iter().map(move |col| TemplateField {
                    field_code: field_code(col.code, row.code),
                    row_code: row.code.to_string(),
                    col_code: col.code.to_string(),
                    label: format!("{} - {}", row.label, col.label),
                    value: None,
                    data_type: DataType::Numeric,
                    justification: None,
                    source_rule_ids: Vec::new(),
                    confidence: Default::default(),
                })
            })
            .collect()
    }

    /// Metadata for `{column}_{row}`, or `None` when the code does not split into
    /// exactly two known parts.
    pub fn get_field_info(&self, code: &str) -> Option<FieldInfo<'_>> {
        let mut parts = code.split('_');
        let (col_code, row_code) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(r), None) => (c, r),
            _ => return None,
        };
        let row = self.row(row_code)?;
        let column = self.column(col_code)?;
        Some(FieldInfo {
            field_code: code.to_string(),
            row,
            column,
            is_calculated: row.is_calculated,
            section: row.section,
        })
    }

    pub fn get_calculation_rules(&self) -> &[CalculationRule] {
        &self.rules
    }

    pub fn calculation_rule(&self, row_code: &str) -> Option<&CalculationRule> {
        self.rules.iter().find(|r| r.row_code == row_code)
    }

    /// Check that every calculated row has a rule whose dependencies exist and
    /// appear strictly earlier in the template.
    pub fn verify(&self) -> Result<(), String> {
        let position = |code: &str| self.rows.iter().position(|r| r.code == code);

        for row in self.rows.iter().filter(|r| r.is_calculated) {
            if self.calculation_rule(row.code).is_none() {
                return Err(format!("calculated row {} has no rule", row.code));
            }
        }
        for rule in &self.rules {
            let at = position(rule.row_code)
                .ok_or_else(|| format!("rule for unknown row {}", rule.row_code))?;
            if rule.terms.is_empty() {
                return Err(format!("rule {} resolves to no terms", rule));
            }
            for dep in rule.dependencies() {
                match position(dep) {
                    Some(p) if p < at => {}
                    Some(_) => {
                        return Err(format!(
                            "rule {} depends on {} which is not earlier",
                            rule, dep
                        ))
                    }
                    None => return Err(format!("rule {} depends on unknown row {}", rule, dep)),
                }
            }
        }
        Ok(())
    }

    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            template_id: self.template_id.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            row_count: self.rows.len(),
            col_count: self.columns.len(),
            field_count: self.rows.len() * self.columns.len(),
            status: "available".to_string(),
        }
    }
}

/// The templates this deployment can populate.
pub struct TemplateCatalog {
    templates: Vec<Arc<TemplateSchema>>,
}

impl TemplateCatalog {
    pub fn standard() -> Self {
        Self {
            templates: vec![Arc::new(TemplateSchema::ca1())],
        }
    }

    pub fn get(&self, template_id: &str) -> Option<Arc<TemplateSchema>> {
        let wanted = template_id.trim();
        self.templates
            .iter()
            .find(|t| t.template_id.eq_ignore_ascii_case(wanted))
            .cloned()
    }

    pub fn list(&self) -> Vec<TemplateInfo> {
        self.templates.iter().map(|t| t.info()).collect()
    }
}
