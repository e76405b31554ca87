//! Value conversions used by the rule kinds.
//!
//! Every conversion maps `null` to `null`. A value that cannot be converted
//! yields `Err(message)`; the engine records it as an error finding and
//! writes `null`.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::models::value_to_text;

/// Output pattern for `toDate` when none is configured.
pub const DEFAULT_DATE_OUTPUT: &str = "%Y-%m-%d";

/// Accepted date-only patterns, in priority order. Day-first wins over
/// month-first for ambiguous slashed dates.
const DATE_PATTERNS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// Accepted date-time patterns, in priority order.
const DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

pub type Converted = Result<Value, String>;

pub fn direct(value: &Value) -> Converted {
    Ok(value.clone())
}

pub fn uppercase(value: &Value) -> Converted {
    Ok(text_or_null(value, |s| s.to_uppercase()))
}

pub fn lowercase(value: &Value) -> Converted {
    Ok(text_or_null(value, |s| s.to_lowercase()))
}

pub fn trim(value: &Value) -> Converted {
    Ok(text_or_null(value, |s| s.trim().to_string()))
}

fn text_or_null(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(f(&value_to_text(other))),
    }
}

pub fn to_integer(value: &Value) -> Converted {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .and_then(integral)
            .map(Value::from)
            .ok_or_else(|| format!("cannot convert {} to integer", n)),
        Value::String(s) => {
            let text = s.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(integral))
                .map(Value::from)
                .ok_or_else(|| format!("cannot convert '{}' to integer", s))
        }
        other => Err(format!("cannot convert {} to integer", other)),
    }
}

/// Whole floats within `i64` range.
fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

pub fn to_float(value: &Value) -> Converted {
    let parsed = match value {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("cannot convert '{}' to float", value_to_text(value)))
}

pub fn to_boolean(value: &Value) -> Converted {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(_) => Ok(value.clone()),
        other => {
            let text = value_to_text(other);
            match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("cannot convert '{}' to boolean", text)),
            }
        }
    }
}

/// Parse a date or date-time.
///
/// `preferred` is tried first, then the built-in patterns, then RFC 3339.
/// The first pattern that parses wins. Dates without a time get midnight.
pub fn parse_date(raw: &str, preferred: Option<&str>) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let with_pattern = |pattern: &str| {
        NaiveDateTime::parse_from_str(text, pattern)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, pattern)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    };

    if let Some(found) = preferred.and_then(with_pattern) {
        return Some(found);
    }

    DATE_PATTERNS
        .iter()
        .find_map(|p| {
            NaiveDate::parse_from_str(text, p)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DATETIME_PATTERNS
                .iter()
                .find_map(|p| NaiveDateTime::parse_from_str(text, p).ok())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_local()))
}

pub fn to_date(value: &Value, format: Option<&str>, output_format: &str) -> Converted {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let text = value_to_text(value);
    let parsed = parse_date(&text, format)
        .ok_or_else(|| format!("cannot parse '{}' as a date", text))?;

    let mut out = String::new();
    write!(out, "{}", parsed.format(output_format))
        .map_err(|_| format!("invalid output format '{}'", output_format))?;
    Ok(Value::String(out))
}

/// Whether a chrono pattern is well formed.
pub fn is_valid_pattern(pattern: &str) -> bool {
    !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_integer() {
        assert_eq!(to_integer(&json!("42")), Ok(json!(42)));
        assert_eq!(to_integer(&json!(" 7 ")), Ok(json!(7)));
        assert_eq!(to_integer(&json!("3.0")), Ok(json!(3)));
        assert!(to_integer(&json!("abc")).is_err());
        assert!(to_integer(&json!("3.5")).is_err());
        assert_eq!(to_integer(&Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_to_float() {
        assert_eq!(to_float(&json!("2.5")), Ok(json!(2.5)));
        assert_eq!(to_float(&json!(3)), Ok(json!(3.0)));
        assert!(to_float(&json!("NaN")).is_err());
        assert!(to_float(&json!("x")).is_err());
    }

    #[test]
    fn test_to_boolean_vocabulary() {
        assert_eq!(to_boolean(&json!("YES")), Ok(json!(true)));
        assert_eq!(to_boolean(&json!("0")), Ok(json!(false)));
        assert_eq!(to_boolean(&json!(1)), Ok(json!(true)));
        assert!(to_boolean(&json!("maybe")).is_err());
    }

    #[test]
    fn test_text_normalization_stringifies() {
        assert_eq!(uppercase(&json!("abc")), Ok(json!("ABC")));
        assert_eq!(lowercase(&json!(true)), Ok(json!("true")));
        assert_eq!(trim(&json!(12)), Ok(json!("12")));
        assert_eq!(trim(&json!("  x ")), Ok(json!("x")));
        assert_eq!(trim(&Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_date_patterns_first_wins() {
        // Day-first before month-first
        assert_eq!(
            to_date(&json!("03/04/2024"), None, DEFAULT_DATE_OUTPUT),
            Ok(json!("2024-04-03"))
        );
        assert_eq!(
            to_date(&json!("2024-01-31 10:30:00"), None, DEFAULT_DATE_OUTPUT),
            Ok(json!("2024-01-31"))
        );
        assert_eq!(
            to_date(&json!("03/04/2024"), Some("%m/%d/%Y"), "%d.%m.%Y"),
            Ok(json!("04.03.2024"))
        );
        assert!(to_date(&json!("next tuesday"), None, DEFAULT_DATE_OUTPUT).is_err());
    }

    #[test]
    fn test_pattern_validation() {
        assert!(is_valid_pattern("%Y-%m-%d"));
        assert!(!is_valid_pattern("%Q"));
    }
}
