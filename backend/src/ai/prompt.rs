//! Prompt generation for mapping recommendations
//!
//! Describes both structures (names, inferred types, samples) and asks for a
//! JSON list of column correspondences.

use serde_json::Value;

use crate::models::{value_to_text, StructureDescriptor};

/// Samples shown per field
const MAX_SAMPLES_SHOWN: usize = 5;

/// Samples longer than this are cut
const MAX_SAMPLE_CHARS: usize = 60;

/// Generate the system prompt for mapping recommendation
pub fn system_prompt() -> String {
    r#"You are a data integration expert. Your task is to map the columns of an input dataset onto the columns of a reference dataset.

## Your Mission

Given:
1. The input structure (column names, inferred types, sample values)
2. The reference structure (the target layout)

Return the best one-to-one correspondence between input columns and reference columns.

## CRITICAL: Output Format

You MUST return ONLY valid JSON of this exact shape:

```json
{
  "mappings": [
    {
      "input_column": "exact input column name",
      "reference_column": "exact reference column name",
      "confidence": 0,
      "reasoning": "one short sentence",
      "transformation": "none"
    }
  ]
}
```

## Rules

1. Use exact column names as listed (case-sensitive)
2. Each input column and each reference column appears at most once
3. `confidence` is an integer from 0 to 100
4. `transformation` is one of: none, rename, convert, concatenate, split, custom
   - none: same meaning and same type
   - rename: same meaning, only the name differs
   - convert: the value needs a type conversion (text to number, date formats, ...)
   - concatenate / split: several columns combine into one, or one splits into several
   - custom: anything else
5. Leave out columns with no plausible counterpart
6. Return ONLY the JSON object, no explanations or markdown"#
        .to_string()
}

/// Generate the user prompt describing both structures
pub fn user_prompt(input: &StructureDescriptor, reference: &StructureDescriptor) -> String {
    let input_desc = describe_structure(input);
    let reference_desc = describe_structure(reference);
    let input_rows = input.row_count();

    format!(
        r#"## Input Structure ({input_rows} rows)

{input_desc}

## Reference Structure

{reference_desc}

## Task

Map the input columns onto the reference columns.

Return ONLY the JSON object. No explanations."#
    )
}

/// Build the messages array for the API
pub fn build_messages(input: &StructureDescriptor, reference: &StructureDescriptor) -> Vec<Value> {
    vec![serde_json::json!({
        "role": "user",
        "content": user_prompt(input, reference)
    })]
}

/// One bullet per field: name, type, null rate and a few samples
fn describe_structure(structure: &StructureDescriptor) -> String {
    if structure.is_empty() {
        return "(no columns)".to_string();
    }

    let mut result = String::new();
    for field in structure.fields() {
        let samples: Vec<String> = field
            .sample_values
            .iter()
            .take(MAX_SAMPLES_SHOWN)
            .map(|v| format!("\"{}\"", truncate(&value_to_text(v))))
            .collect();

        result.push_str(&format!(
            "- **{}** ({}, {:.0}% empty)",
            field.name,
            field.inferred_type,
            field.null_rate * 100.0
        ));
        if !samples.is_empty() {
            result.push_str(&format!(": {}", samples.join(", ")));
        }
        result.push('\n');
    }
    result
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_SAMPLE_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SAMPLE_CHARS).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDescriptor, InferredType};
    use serde_json::json;

    #[test]
    fn test_user_prompt_lists_fields_with_types_and_samples() {
        let input = StructureDescriptor::new(
            vec![
                FieldDescriptor::new("Cust Name", InferredType::String)
                    .with_samples(vec![json!("Ada"), json!("Linus")]),
                FieldDescriptor::new("Joined", InferredType::Date).with_null_rate(0.5),
            ],
            2,
        );
        let reference = StructureDescriptor::from_names(&["customer_name", "joined_on"]);

        let prompt = user_prompt(&input, &reference);
        assert!(prompt.contains("## Input Structure (2 rows)"));
        assert!(prompt.contains("- **Cust Name** (string, 0% empty): \"Ada\", \"Linus\""));
        assert!(prompt.contains("- **Joined** (date, 50% empty)"));
        assert!(prompt.contains("- **customer_name**"));
    }

    #[test]
    fn test_empty_structure_description() {
        let prompt = user_prompt(&StructureDescriptor::new(vec![], 0), &StructureDescriptor::from_names(&["a"]));
        assert!(prompt.contains("(no columns)"));
    }

    #[test]
    fn test_truncate_long_samples() {
        let long = "x".repeat(100);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), MAX_SAMPLE_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
