//! Per-value and per-field type inference.

use crate::models::InferredType;
use crate::transform::convert::parse_date;

/// Infer the type of one non-empty value.
///
/// Integers are tried first, so `1` and `0` are integers rather than
/// booleans.
pub fn infer_value(raw: &str) -> InferredType {
    let value = raw.trim();
    if value.is_empty() {
        return InferredType::Unknown;
    }
    if value.parse::<i64>().is_ok() {
        return InferredType::Integer;
    }
    if value.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false) {
        return InferredType::Float;
    }
    if matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no"
    ) {
        return InferredType::Boolean;
    }
    if parse_date(value, None).is_some() {
        return InferredType::Date;
    }
    InferredType::String
}

/// Infer a field type from all of its values.
///
/// Empty values are ignored. A field gets a concrete type only when every
/// non-empty value agrees; integers widen to float. Any other mix is
/// `string`, and a field with no non-empty value is `unknown`.
pub fn infer_field<'a, I>(values: I) -> InferredType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut current = InferredType::Unknown;
    for value in values {
        let observed = infer_value(value);
        current = match (current, observed) {
            (c, InferredType::Unknown) => c,
            (InferredType::Unknown, o) => o,
            (c, o) if c == o => c,
            (InferredType::Integer, InferredType::Float)
            | (InferredType::Float, InferredType::Integer) => InferredType::Float,
            _ => return InferredType::String,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_value() {
        assert_eq!(infer_value("42"), InferredType::Integer);
        assert_eq!(infer_value("-3.5"), InferredType::Float);
        assert_eq!(infer_value("Yes"), InferredType::Boolean);
        assert_eq!(infer_value("2024-01-31"), InferredType::Date);
        assert_eq!(infer_value("hello"), InferredType::String);
        assert_eq!(infer_value("  "), InferredType::Unknown);
    }

    #[test]
    fn test_infer_field_widens_and_mixes() {
        assert_eq!(infer_field(["1", "2", ""]), InferredType::Integer);
        assert_eq!(infer_field(["1", "2.5"]), InferredType::Float);
        assert_eq!(infer_field(["1", "abc"]), InferredType::String);
        assert_eq!(infer_field(["true", "1"]), InferredType::String);
        assert_eq!(infer_field(["", ""]), InferredType::Unknown);
    }
}
