//! Rule engine: applies compiled rules to rows.
//!
//! Rules are checked once, when the engine is built; malformed rules are a
//! [`RuleError`]. After that, nothing about a single value can fail the run:
//! conversion problems become [`ValidationFinding`]s attached to the row.

use std::borrow::Borrow;
use std::fmt;
use std::iter::Enumerate;
use std::sync::Arc;

use serde_json::Value;

use super::convert::{self, is_valid_pattern, DEFAULT_DATE_OUTPUT};
use super::custom::{call_guarded, CustomFunction, CustomFunctions};
use super::report::TransformReport;
use super::rules::{RuleKind, TransformationRule};
use super::validate::{invalid, param_str, FieldValidators};
use crate::error::{RuleError, RuleResult};
use crate::models::{Row, ValidationFinding};

const MISSING_SOURCE_FIELD: &str = "missing source field";

static NULL: Value = Value::Null;

// =============================================================================
// Compiled Rules
// =============================================================================

struct CompiledRule {
    rule: TransformationRule,
    default: Option<Value>,
    date_format: Option<String>,
    output_format: String,
    function: Option<Arc<dyn CustomFunction>>,
    validators: FieldValidators,
}

impl CompiledRule {
    fn compile(rule: TransformationRule, functions: &CustomFunctions) -> RuleResult<Self> {
        let target = rule.target_field.as_str();
        let params = &rule.parameters;

        let default = params.get("default").filter(|v| !v.is_null()).cloned();

        let date_format = param_str(target, params, "format")?.map(str::to_string);
        if let Some(pattern) = &date_format {
            if !is_valid_pattern(pattern) {
                return Err(invalid(target, "format", "not a valid date pattern"));
            }
        }
        let output_format = param_str(target, params, "outputFormat")?
            .unwrap_or(DEFAULT_DATE_OUTPUT)
            .to_string();
        if !is_valid_pattern(&output_format) {
            return Err(invalid(target, "outputFormat", "not a valid date pattern"));
        }

        let function = if rule.kind == RuleKind::Custom {
            let name = param_str(target, params, "function")?.ok_or_else(|| RuleError::MissingParameter {
                target: target.to_string(),
                parameter: "function".to_string(),
            })?;
            let function = functions.get(name).ok_or_else(|| RuleError::UnknownFunction {
                target: target.to_string(),
                function: name.to_string(),
            })?;
            Some(function)
        } else {
            None
        };

        let validators = FieldValidators::from_parameters(target, params)?;

        Ok(Self {
            default,
            date_format,
            output_format,
            function,
            validators,
            rule,
        })
    }

    fn convert(&self, value: &Value) -> convert::Converted {
        match self.rule.kind {
            RuleKind::Direct => convert::direct(value),
            RuleKind::Uppercase => convert::uppercase(value),
            RuleKind::Lowercase => convert::lowercase(value),
            RuleKind::Trim => convert::trim(value),
            RuleKind::ToInteger => convert::to_integer(value),
            RuleKind::ToFloat => convert::to_float(value),
            RuleKind::ToBoolean => convert::to_boolean(value),
            RuleKind::ToDate => convert::to_date(value, self.date_format.as_deref(), &self.output_format),
            RuleKind::Custom => match &self.function {
                Some(f) => call_guarded(f.as_ref(), value, &self.rule.parameters),
                None => Err("custom function not registered".to_string()),
            },
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A row after all rules ran, with the findings raised for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    /// Zero-based index of the input row.
    pub index: usize,
    /// Target fields in rule order.
    pub record: Row,
    pub findings: Vec<ValidationFinding>,
}

impl TransformedRow {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(ValidationFinding::is_error)
    }
}

/// Compiled, validated rules ready to run over rows.
pub struct TransformEngine {
    rules: Vec<CompiledRule>,
}

impl fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEngine")
            .field("rules", &self.rules.iter().map(|r| &r.rule).collect::<Vec<_>>())
            .finish()
    }
}

impl TransformEngine {
    /// Compile rules. Fails on a missing or mistyped parameter or on a
    /// custom rule whose function is not in `functions`.
    pub fn new(rules: Vec<TransformationRule>, functions: &CustomFunctions) -> RuleResult<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule::compile(rule, functions))
            .collect::<RuleResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> impl Iterator<Item = &TransformationRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Target fields in first-appearance order.
    pub fn target_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for compiled in &self.rules {
            if !fields.contains(&compiled.rule.target_field) {
                fields.push(compiled.rule.target_field.clone());
            }
        }
        fields
    }

    /// Run every rule over one row.
    pub fn transform_row(&self, index: usize, row: &Row) -> TransformedRow {
        let mut record = Row::new();
        let mut findings = Vec::new();

        for compiled in &self.rules {
            let rule = &compiled.rule;
            let source = match row.get(&rule.source_field) {
                Some(value) if !value.is_null() => value,
                Some(_) => compiled.default.as_ref().unwrap_or(&NULL),
                None => {
                    findings.push(ValidationFinding::warning(index, &rule.source_field, MISSING_SOURCE_FIELD));
                    compiled.default.as_ref().unwrap_or(&NULL)
                }
            };

            let value = match compiled.convert(source) {
                Ok(value) => value,
                Err(message) => {
                    findings.push(ValidationFinding::error(index, &rule.target_field, message));
                    Value::Null
                }
            };

            compiled.validators.check(index, &rule.target_field, &value, &mut findings);
            record.insert(rule.target_field.clone(), value);
        }

        TransformedRow { index, record, findings }
    }

    /// Lazily transform rows.
    ///
    /// The result can be walked again (by cloning it) whenever the input
    /// iterator can.
    pub fn apply<I>(&self, rows: I) -> Transformed<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: Borrow<Row>,
    {
        Transformed {
            engine: self,
            rows: rows.into_iter().enumerate(),
        }
    }

    /// Transform the first `limit` rows.
    pub fn preview<I>(&self, rows: I, limit: usize) -> Vec<TransformedRow>
    where
        I: IntoIterator,
        I::Item: Borrow<Row>,
    {
        self.apply(rows).take(limit).collect()
    }

    /// Transform every row eagerly.
    ///
    /// With a `threshold`, stops with [`RuleError::ThresholdExceeded`] as
    /// soon as the number of error findings goes past it.
    pub fn run<I>(&self, rows: I, threshold: Option<usize>) -> RuleResult<(Vec<Row>, TransformReport)>
    where
        I: IntoIterator,
        I::Item: Borrow<Row>,
    {
        let mut report = TransformReport::default();
        let mut records = Vec::new();
        for transformed in self.apply(rows) {
            report.record(&transformed);
            report.check_threshold(threshold)?;
            records.push(transformed.record);
        }
        Ok((records, report))
    }
}

// =============================================================================
// Lazy Output
// =============================================================================

/// Lazy sequence of transformed rows. See [`TransformEngine::apply`].
#[derive(Clone)]
pub struct Transformed<'a, I> {
    engine: &'a TransformEngine,
    rows: Enumerate<I>,
}

impl<'a, I> Iterator for Transformed<'a, I>
where
    I: Iterator,
    I::Item: Borrow<Row>,
{
    type Item = TransformedRow;

    fn next(&mut self) -> Option<TransformedRow> {
        let (index, row) = self.rows.next()?;
        Some(self.engine.transform_row(index, row.borrow()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<'a, I> Transformed<'a, I>
where
    I: Iterator + 'a,
    I::Item: Borrow<Row>,
{
    /// Only the transformed records.
    pub fn records(self) -> impl Iterator<Item = Row> + 'a {
        self.map(|t| t.record)
    }

    /// Only the findings, in row order.
    pub fn findings(self) -> impl Iterator<Item = ValidationFinding> + 'a {
        self.flat_map(|t| t.findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use serde_json::{json, Map};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn engine(rules: Vec<TransformationRule>) -> TransformEngine {
        TransformEngine::new(rules, &CustomFunctions::new()).unwrap()
    }

    #[test]
    fn test_direct_keeps_value() {
        let values = vec![json!("text"), json!(3.25), json!(true), json!([1, 2]), json!({"k": "v"})];
        let e = engine(vec![TransformationRule::new("v", "out", RuleKind::Direct)]);
        for value in values {
            let out = e.transform_row(0, &row(json!({ "v": value.clone() })));
            assert_eq!(out.record["out"], value);
            assert!(out.findings.is_empty());
        }
    }

    #[test]
    fn test_to_integer_findings() {
        let e = engine(vec![TransformationRule::new("qty", "quantity", RuleKind::ToInteger)]);
        let rows = vec![row(json!({"qty": "42"})), row(json!({"qty": "abc"}))];

        let out: Vec<_> = e.apply(&rows).collect();
        assert_eq!(out[0].record["quantity"], json!(42));
        assert!(out[0].findings.is_empty());

        assert_eq!(out[1].record["quantity"], Value::Null);
        assert_eq!(out[1].findings.len(), 1);
        let finding = &out[1].findings[0];
        assert_eq!(finding.row_index, 1);
        assert_eq!(finding.field, "quantity");
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn test_missing_source_is_warning() {
        let e = engine(vec![
            TransformationRule::new("a", "A", RuleKind::Uppercase),
            TransformationRule::new("b", "B", RuleKind::Direct).with_parameter("default", "n/a"),
        ]);
        let out = e.transform_row(0, &row(json!({"x": 1})));

        assert_eq!(out.record["A"], Value::Null);
        assert_eq!(out.record["B"], json!("n/a"));
        assert_eq!(out.findings.len(), 2);
        assert!(out.findings.iter().all(|f| f.severity == Severity::Warning));
        assert_eq!(out.findings[0].message, "missing source field");
        assert!(!out.has_errors());
    }

    #[test]
    fn test_record_follows_rule_order() {
        let e = engine(vec![
            TransformationRule::new("b", "second", RuleKind::Direct),
            TransformationRule::new("a", "first", RuleKind::Direct),
        ]);
        let out = e.transform_row(0, &row(json!({"a": 1, "b": 2})));
        let keys: Vec<_> = out.record.keys().cloned().collect();
        assert_eq!(keys, vec!["second", "first"]);
        assert_eq!(e.target_fields(), vec!["second", "first"]);
    }

    #[test]
    fn test_custom_function() {
        let functions = CustomFunctions::new().with("initials", |v: &Value, _: &Map<String, Value>| {
            let text = v.as_str().ok_or_else(|| "expected text".to_string())?;
            Ok(json!(text.split_whitespace().filter_map(|w| w.chars().next()).collect::<String>()))
        });
        let rules = vec![TransformationRule::new("name", "initials", RuleKind::Custom)
            .with_parameter("function", "initials")];
        let e = TransformEngine::new(rules, &functions).unwrap();

        let rows = vec![row(json!({"name": "Ada Lovelace"})), row(json!({"name": 7}))];
        let out: Vec<_> = e.apply(&rows).collect();
        assert_eq!(out[0].record["initials"], json!("AL"));
        assert_eq!(out[1].record["initials"], Value::Null);
        assert!(out[1].has_errors());
    }

    #[test]
    fn test_custom_without_function_is_fatal() {
        let rules = vec![TransformationRule::new("a", "b", RuleKind::Custom)];
        let err = TransformEngine::new(rules, &CustomFunctions::new()).unwrap_err();
        assert!(matches!(err, RuleError::MissingParameter { .. }));

        let rules = vec![TransformationRule::new("a", "b", RuleKind::Custom).with_parameter("function", "nope")];
        let err = TransformEngine::new(rules, &CustomFunctions::new()).unwrap_err();
        assert!(matches!(err, RuleError::UnknownFunction { .. }));
    }

    #[test]
    fn test_invalid_date_format_is_fatal() {
        let rules = vec![TransformationRule::new("d", "d", RuleKind::ToDate).with_parameter("outputFormat", "%Q")];
        assert!(TransformEngine::new(rules, &CustomFunctions::new()).is_err());
    }

    #[test]
    fn test_restartable_when_input_is() {
        let e = engine(vec![TransformationRule::new("n", "n", RuleKind::ToInteger)]);
        let rows = vec![row(json!({"n": "1"})), row(json!({"n": "x"})), row(json!({"n": "3"}))];

        let lazy = e.apply(rows.iter());
        let records: Vec<_> = lazy.clone().records().collect();
        let findings: Vec<_> = lazy.findings().collect();

        assert_eq!(records.len(), 3);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].row_index, 1);
    }

    #[test]
    fn test_single_pass_input() {
        let e = engine(vec![TransformationRule::new("n", "n", RuleKind::Trim)]);
        let rows = vec![row(json!({"n": " a "})), row(json!({"n": "b"}))];
        let out: Vec<_> = e.apply(rows.into_iter()).records().collect();
        assert_eq!(out[0]["n"], json!("a"));
    }

    #[test]
    fn test_threshold() {
        let e = engine(vec![TransformationRule::new("n", "n", RuleKind::ToFloat)]);
        let rows = vec![row(json!({"n": "x"})), row(json!({"n": "y"})), row(json!({"n": "1.5"}))];

        let (records, report) = e.run(&rows, None).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(report.error_count, 2);

        let err = e.run(&rows, Some(1)).unwrap_err();
        assert!(matches!(err, RuleError::ThresholdExceeded { errors: 2, threshold: 1 }));
    }

    #[test]
    fn test_preview_limits_rows() {
        let e = engine(vec![TransformationRule::direct("a")]);
        let rows: Vec<Row> = (0..10).map(|i| row(json!({ "a": i }))).collect();
        let preview = e.preview(&rows, 3);
        assert_eq!(preview.len(), 3);
        assert_eq!(preview[2].index, 2);
    }
}
