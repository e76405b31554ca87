//! Rule parameter parsing and per-field validators.

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{RuleError, RuleResult};
use crate::models::{is_empty_value, value_to_text, ValidationFinding};

/// Validators declared in a rule's parameters, checked after conversion.
#[derive(Debug, Clone, Default)]
pub struct FieldValidators {
    required: bool,
    pattern: Option<Regex>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
}

impl FieldValidators {
    /// Read validators from rule parameters. A parameter of the wrong shape
    /// or an invalid regex is an error.
    pub fn from_parameters(target: &str, parameters: &Map<String, Value>) -> RuleResult<Self> {
        let pattern = match param_str(target, parameters, "pattern")? {
            Some(p) => Some(Regex::new(p).map_err(|e| invalid(target, "pattern", &e.to_string()))?),
            None => None,
        };

        Ok(Self {
            required: param_bool(target, parameters, "required")?.unwrap_or(false),
            pattern,
            min_length: param_usize(target, parameters, "minLength")?,
            max_length: param_usize(target, parameters, "maxLength")?,
            min: param_f64(target, parameters, "min")?,
            max: param_f64(target, parameters, "max")?,
        })
    }

    pub fn is_empty(&self) -> bool {
        !self.required
            && self.pattern.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.min.is_none()
            && self.max.is_none()
    }

    /// Check a converted value. Null values only fail `required`.
    pub fn check(&self, row_index: usize, field: &str, value: &Value, findings: &mut Vec<ValidationFinding>) {
        if is_empty_value(value) {
            if self.required {
                findings.push(ValidationFinding::error(row_index, field, "required value is missing"));
            }
            return;
        }

        let text = value_to_text(value);
        let length = text.chars().count();

        if let Some(re) = &self.pattern {
            if !re.is_match(&text) {
                findings.push(ValidationFinding::error(
                    row_index,
                    field,
                    format!("value '{}' does not match pattern '{}'", text, re.as_str()),
                ));
            }
        }
        if let Some(min) = self.min_length {
            if length < min {
                findings.push(ValidationFinding::error(
                    row_index,
                    field,
                    format!("length {} is below minimum {}", length, min),
                ));
            }
        }
        if let Some(max) = self.max_length {
            if length > max {
                findings.push(ValidationFinding::error(
                    row_index,
                    field,
                    format!("length {} exceeds maximum {}", length, max),
                ));
            }
        }

        if self.min.is_none() && self.max.is_none() {
            return;
        }
        let number = match value {
            Value::Number(n) => n.as_f64(),
            _ => text.trim().parse::<f64>().ok(),
        };
        let Some(number) = number else {
            findings.push(ValidationFinding::error(
                row_index,
                field,
                format!("value '{}' is not numeric", text),
            ));
            return;
        };
        if let Some(min) = self.min {
            if number < min {
                findings.push(ValidationFinding::error(
                    row_index,
                    field,
                    format!("value {} is below minimum {}", number, min),
                ));
            }
        }
        if let Some(max) = self.max {
            if number > max {
                findings.push(ValidationFinding::error(
                    row_index,
                    field,
                    format!("value {} exceeds maximum {}", number, max),
                ));
            }
        }
    }
}

// =============================================================================
// Parameter Accessors
// =============================================================================

pub(crate) fn param_str<'a>(target: &str, parameters: &'a Map<String, Value>, key: &str) -> RuleResult<Option<&'a str>> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid(target, key, &format!("expected a string, got {}", other))),
    }
}

pub(crate) fn param_bool(target: &str, parameters: &Map<String, Value>, key: &str) -> RuleResult<Option<bool>> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(invalid(target, key, &format!("expected a boolean, got {}", other))),
    }
}

pub(crate) fn param_usize(target: &str, parameters: &Map<String, Value>, key: &str) -> RuleResult<Option<usize>> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| invalid(target, key, &format!("expected a non-negative integer, got {}", n))),
        Some(other) => Err(invalid(target, key, &format!("expected a non-negative integer, got {}", other))),
    }
}

pub(crate) fn param_f64(target: &str, parameters: &Map<String, Value>, key: &str) -> RuleResult<Option<f64>> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(invalid(target, key, &format!("expected a number, got {}", other))),
    }
}

pub(crate) fn invalid(target: &str, parameter: &str, message: &str) -> RuleError {
    RuleError::InvalidParameter {
        target: target.to_string(),
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
}
