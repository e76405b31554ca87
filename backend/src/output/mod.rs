//! Output encoder.
//!
//! Serializes transformed rows into one of four formats:
//!
//! | Format | Streaming | Notes |
//! |--------|-----------|-------|
//! | Delimited | yes | quoted only when a value holds the delimiter, a quote or a newline; quotes doubled (*) |
//! | Spreadsheet | yes | single `.xlsx` sheet, bold header row first |
//! | Json | yes | array of objects, keys in field order |
//! | FixedWidth | **no** | widths need a full pass over the rows, so rows are materialized first |
//!
//! Values are written as text; `null` and missing fields are empty.
//!
//! (*) One exception: a record made of a single empty field is written as
//! `""`, since a bare empty line would read back as no record at all.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeSeq, Serializer as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EncodeError, EncodeResult};
use crate::models::{value_to_text, Row};

const DEFAULT_SHEET_NAME: &str = "Data";

// =============================================================================
// Formats & Options
// =============================================================================

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutputFormat {
    /// Delimited text with a single ASCII delimiter.
    Delimited { delimiter: char },
    /// Spreadsheet workbook.
    Spreadsheet,
    /// JSON array of objects.
    Json,
    /// Fixed-width positional text.
    FixedWidth,
}

impl OutputFormat {
    pub fn csv() -> Self {
        OutputFormat::Delimited { delimiter: ',' }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Delimited { delimiter: '\t' } => "tsv",
            OutputFormat::Delimited { delimiter: ',' } => "csv",
            OutputFormat::Delimited { .. } => "txt",
            OutputFormat::Spreadsheet => "xlsx",
            OutputFormat::Json => "json",
            OutputFormat::FixedWidth => "txt",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Delimited { delimiter: '\t' } => "text/tab-separated-values",
            OutputFormat::Delimited { delimiter: ',' } => "text/csv",
            OutputFormat::Delimited { .. } | OutputFormat::FixedWidth => "text/plain",
            OutputFormat::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            OutputFormat::Json => "application/json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = EncodeError;

    /// Accepts `csv`, `txt`, `tsv`, `pipe`, `json`, `xlsx`/`excel`/`xls` and
    /// `fixed`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "txt" => Ok(OutputFormat::csv()),
            "tsv" => Ok(OutputFormat::Delimited { delimiter: '\t' }),
            "pipe" | "psv" => Ok(OutputFormat::Delimited { delimiter: '|' }),
            "json" => Ok(OutputFormat::Json),
            "xlsx" | "excel" | "xls" => Ok(OutputFormat::Spreadsheet),
            "fixed" | "fixed-width" | "fixed_width" => Ok(OutputFormat::FixedWidth),
            other => Err(EncodeError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Delimited { delimiter: ',' } => f.write_str("csv"),
            OutputFormat::Delimited { delimiter: '\t' } => f.write_str("tsv"),
            OutputFormat::Delimited { delimiter: '|' } => f.write_str("pipe"),
            OutputFormat::Delimited { delimiter } => write!(f, "delimited({})", delimiter),
            OutputFormat::Spreadsheet => f.write_str("xlsx"),
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::FixedWidth => f.write_str("fixed"),
        }
    }
}

/// Encoder options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncodeOptions {
    /// Emit a header row (delimited, spreadsheet, fixed-width).
    pub include_header: bool,
    /// Minimum widths per field (fixed-width).
    pub widths: HashMap<String, usize>,
    /// Worksheet name (spreadsheet).
    pub sheet_name: Option<String>,
    /// Indent the document (JSON).
    pub pretty: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            include_header: true,
            widths: HashMap::new(),
            sheet_name: None,
            pretty: false,
        }
    }
}

impl EncodeOptions {
    pub fn without_header(mut self) -> Self {
        self.include_header = false;
        self
    }

    pub fn with_width(mut self, field: impl Into<String>, width: usize) -> Self {
        self.widths.insert(field.into(), width);
        self
    }
}

// =============================================================================
// Artifact
// =============================================================================

/// Encoded output.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
    pub row_count: usize,
}

/// Artifact metadata, without the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub format: String,
    pub extension: String,
    pub mime_type: String,
    pub size: usize,
    pub row_count: usize,
}

impl Artifact {
    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            format: self.format.to_string(),
            extension: self.format.extension().to_string(),
            mime_type: self.format.mime_type().to_string(),
            size: self.bytes.len(),
            row_count: self.row_count,
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode rows with the given field order.
pub fn encode<I>(rows: I, fields: &[String], format: OutputFormat, options: &EncodeOptions) -> EncodeResult<Artifact>
where
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    let (bytes, row_count) = match format {
        OutputFormat::Delimited { delimiter } => encode_delimited(rows, fields, delimiter, options)?,
        OutputFormat::Spreadsheet => encode_spreadsheet(rows, fields, options)?,
        OutputFormat::Json => encode_json(rows, fields, options)?,
        OutputFormat::FixedWidth => encode_fixed_width(rows, fields, options),
    };
    tracing::debug!(%format, rows = row_count, bytes = bytes.len(), "encoded output");
    Ok(Artifact {
        format,
        bytes,
        row_count,
    })
}

fn cell(row: &Row, field: &str) -> String {
    row.get(field).map(value_to_text).unwrap_or_default()
}

fn encode_delimited<I>(rows: I, fields: &[String], delimiter: char, options: &EncodeOptions) -> EncodeResult<(Vec<u8>, usize)>
where
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    if !delimiter.is_ascii() || matches!(delimiter, '"' | '\n' | '\r') {
        return Err(EncodeError::InvalidDelimiter(delimiter));
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    if options.include_header {
        writer.write_record(fields)?;
    }

    let mut count = 0;
    for row in rows {
        let row = row.borrow();
        writer.write_record(fields.iter().map(|f| cell(row, f)))?;
        count += 1;
    }

    let bytes = writer.into_inner().map_err(|e| EncodeError::Io(e.into_error()))?;
    Ok((bytes, count))
}

fn encode_spreadsheet<I>(rows: I, fields: &[String], options: &EncodeOptions) -> EncodeResult<(Vec<u8>, usize)>
where
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    use rust_xlsxwriter::{Format, Workbook};

    let xlsx = |e: rust_xlsxwriter::XlsxError| EncodeError::Spreadsheet(e.to_string());
    if fields.len() > u16::MAX as usize {
        return Err(EncodeError::Spreadsheet(format!("{} columns is too many", fields.len())));
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(options.sheet_name.as_deref().unwrap_or(DEFAULT_SHEET_NAME))
        .map_err(xlsx)?;

    let mut line: u32 = 0;
    if options.include_header {
        for (col, field) in fields.iter().enumerate() {
            worksheet
                .write_string_with_format(0, col as u16, field, &header_format)
                .map_err(xlsx)?;
        }
        line = 1;
    }

    let mut count = 0;
    for row in rows {
        let row = row.borrow();
        for (col, field) in fields.iter().enumerate() {
            let col = col as u16;
            match row.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(b)) => {
                    worksheet.write_boolean(line, col, *b).map_err(xlsx)?;
                }
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => {
                        worksheet.write_number(line, col, f).map_err(xlsx)?;
                    }
                    None => {
                        worksheet.write_string(line, col, n.to_string()).map_err(xlsx)?;
                    }
                },
                Some(other) => {
                    worksheet.write_string(line, col, value_to_text(other)).map_err(xlsx)?;
                }
            }
        }
        line += 1;
        count += 1;
    }

    let bytes = workbook.save_to_buffer().map_err(xlsx)?;
    Ok((bytes, count))
}

fn encode_json<I>(rows: I, fields: &[String], options: &EncodeOptions) -> EncodeResult<(Vec<u8>, usize)>
where
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    let mut bytes = Vec::new();
    let count = if options.pretty {
        write_json_array(&mut serde_json::Serializer::pretty(&mut bytes), rows, fields)?
    } else {
        write_json_array(&mut serde_json::Serializer::new(&mut bytes), rows, fields)?
    };
    Ok((bytes, count))
}

/// Serialize one document per row as they come.
fn write_json_array<W, F, I>(
    serializer: &mut serde_json::Serializer<W, F>,
    rows: I,
    fields: &[String],
) -> Result<usize, serde_json::Error>
where
    W: std::io::Write,
    F: serde_json::ser::Formatter,
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    let mut seq = serializer.serialize_seq(None)?;
    let mut count = 0;
    for row in rows {
        let row = row.borrow();
        let document: Map<String, Value> = fields
            .iter()
            .map(|f| (f.clone(), row.get(f).cloned().unwrap_or(Value::Null)))
            .collect();
        seq.serialize_element(&document)?;
        count += 1;
    }
    seq.end()?;
    Ok(count)
}

/// Fixed-width needs every value length before the first line is written,
/// so this format collects all rows up front.
fn encode_fixed_width<I>(rows: I, fields: &[String], options: &EncodeOptions) -> (Vec<u8>, usize)
where
    I: IntoIterator,
    I::Item: Borrow<Row>,
{
    let table: Vec<Vec<String>> = rows
        .into_iter()
        .map(|row| {
            let row = row.borrow();
            fields.iter().map(|f| cell(row, f)).collect()
        })
        .collect();

    let widths: Vec<usize> = fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let configured = options.widths.get(field).copied().unwrap_or(0);
            let observed = table
                .iter()
                .map(|cells| cells[i].chars().count())
                .max()
                .unwrap_or(0);
            configured.max(observed).max(field.chars().count())
        })
        .collect();

    let mut out = String::new();
    if options.include_header {
        push_padded_line(&mut out, fields.iter().map(String::as_str), &widths);
    }
    for cells in &table {
        push_padded_line(&mut out, cells.iter().map(String::as_str), &widths);
    }

    (out.into_bytes(), table.len())
}

fn push_padded_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    for (text, width) in cells.zip(widths) {
        out.push_str(text);
        let pad = width.saturating_sub(text.chars().count());
        out.extend(std::iter::repeat(' ').take(pad));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fixed_width_literal_output() {
        let data = rows(json!([{"a": "x", "b": "yyy"}]));
        let artifact = encode(&data, &fields(&["a", "b"]), OutputFormat::FixedWidth, &EncodeOptions::default()).unwrap();
        assert_eq!(artifact.bytes, b"ab  \nxyyy\n".to_vec());
        assert_eq!(artifact.row_count, 1);
    }

    #[test]
    fn test_fixed_width_configured_and_header_widths() {
        let data = rows(json!([{"code": "7", "n": null}]));
        let options = EncodeOptions::default().with_width("code", 6).without_header();
        let artifact = encode(&data, &fields(&["code", "n"]), OutputFormat::FixedWidth, &options).unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "7      \n");
    }

    #[test]
    fn test_delimited_escaping() {
        let data = rows(json!([
            {"name": "Smith, Jane", "note": "said \"hi\""},
            {"name": "plain", "note": "two\nlines"}
        ]));
        let artifact = encode(&data, &fields(&["name", "note"]), OutputFormat::csv(), &EncodeOptions::default()).unwrap();
        let text = String::from_utf8(artifact.bytes).unwrap();
        assert_eq!(
            text,
            "name,note\n\"Smith, Jane\",\"said \"\"hi\"\"\"\nplain,\"two\nlines\"\n"
        );
    }

    #[test]
    fn test_delimited_custom_delimiter_and_missing_fields() {
        let data = rows(json!([{"a": 1, "b": true}, {"a": 2}]));
        let artifact = encode(
            &data,
            &fields(&["a", "b"]),
            OutputFormat::Delimited { delimiter: '|' },
            &EncodeOptions::default().without_header(),
        )
        .unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "1|true\n2|\n");
    }

    #[test]
    fn test_invalid_delimiter() {
        let err = encode(
            Vec::<Row>::new(),
            &fields(&["a"]),
            OutputFormat::Delimited { delimiter: '→' },
            &EncodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidDelimiter('→')));
    }

    #[test]
    fn test_json_document_in_field_order() {
        let data = rows(json!([{"b": 2, "a": "x"}]));
        let artifact = encode(&data, &fields(&["a", "b", "c"]), OutputFormat::Json, &EncodeOptions::default()).unwrap();
        assert_eq!(
            String::from_utf8(artifact.bytes).unwrap(),
            r#"[{"a":"x","b":2,"c":null}]"#
        );
    }

    #[test]
    fn test_json_pretty_and_empty() {
        let data = rows(json!([{"a": 1}, {"a": 2}]));
        let options = EncodeOptions {
            pretty: true,
            ..EncodeOptions::default()
        };
        let artifact = encode(&data, &fields(&["a"]), OutputFormat::Json, &options).unwrap();
        assert_eq!(artifact.row_count, 2);
        assert_eq!(
            String::from_utf8(artifact.bytes).unwrap(),
            "[\n  {\n    \"a\": 1\n  },\n  {\n    \"a\": 2\n  }\n]"
        );

        let empty = encode(Vec::<Row>::new(), &fields(&["a"]), OutputFormat::Json, &options).unwrap();
        assert_eq!(empty.bytes, b"[]".to_vec());
        assert_eq!(empty.row_count, 0);
    }

    #[test]
    fn test_delimited_lone_empty_field_is_quoted() {
        let data = rows(json!([{"a": null}, {"a": "x"}]));
        let artifact = encode(&data, &fields(&["a"]), OutputFormat::csv(), &EncodeOptions::default()).unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "a\n\"\"\nx\n");

        // With more than one field, empty cells stay bare
        let data = rows(json!([{"a": null, "b": null}]));
        let artifact = encode(&data, &fields(&["a", "b"]), OutputFormat::csv(), &EncodeOptions::default()).unwrap();
        assert_eq!(String::from_utf8(artifact.bytes).unwrap(), "a,b\n,\n");
    }

    #[test]
    fn test_spreadsheet_is_zip() {
        let data = rows(json!([{"a": "x", "n": 1.5, "ok": true}]));
        let artifact = encode(&data, &fields(&["a", "n", "ok"]), OutputFormat::Spreadsheet, &EncodeOptions::default()).unwrap();
        assert!(artifact.bytes.starts_with(b"PK"));
        assert_eq!(artifact.info().extension, "xlsx");
    }

    #[test]
    fn test_format_names() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::csv());
        assert_eq!("txt".parse::<OutputFormat>().unwrap(), OutputFormat::csv());
        assert_eq!(
            "tsv".parse::<OutputFormat>().unwrap(),
            OutputFormat::Delimited { delimiter: '\t' }
        );
        assert_eq!("excel".parse::<OutputFormat>().unwrap(), OutputFormat::Spreadsheet);
        assert_eq!("fixed".parse::<OutputFormat>().unwrap(), OutputFormat::FixedWidth);
        assert!(matches!(
            "parquet".parse::<OutputFormat>(),
            Err(EncodeError::UnsupportedFormat(_))
        ));
    }
}
