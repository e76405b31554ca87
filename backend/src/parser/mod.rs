//! Delimited text parser with encoding and delimiter auto-detection.
//!
//! Turns a source into a [`StructureDescriptor`] plus its rows. Rows keep
//! file order and `row_count` always equals the number of rows produced.
//!
//! - Encoding: detected with chardet, decoded with encoding_rs
//! - Delimiter: `;`, `,`, TAB or `|`, whichever occurs most in the first line
//! - Empty cells become `null`; ragged rows are padded, extra cells dropped

mod infer;

pub use infer::{infer_field, infer_value};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseError, ParseResult};
use crate::models::{FieldDescriptor, Row, StructureDescriptor};

const DEFAULT_SAMPLE_SIZE: usize = 10;
const CANDIDATE_DELIMITERS: [char; 4] = [';', ',', '\t', '|'];

// =============================================================================
// Source Input
// =============================================================================

/// Where a source's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceInput {
    /// A file on disk.
    Path { path: PathBuf },
    /// Bytes already in memory, with a display name.
    Bytes { name: String, data: Vec<u8> },
}

impl SourceInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        SourceInput::Path { path: path.into() }
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        SourceInput::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Display name used in messages.
    pub fn name(&self) -> String {
        match self {
            SourceInput::Path { path } => path.display().to_string(),
            SourceInput::Bytes { name, .. } => name.clone(),
        }
    }

    /// Read the raw bytes.
    pub fn read_bytes(&self) -> ParseResult<Vec<u8>> {
        match self {
            SourceInput::Path { path } => Ok(std::fs::read(path)?),
            SourceInput::Bytes { data, .. } => Ok(data.clone()),
        }
    }
}

impl From<&Path> for SourceInput {
    fn from(path: &Path) -> Self {
        SourceInput::path(path)
    }
}

// =============================================================================
// Parsed Source
// =============================================================================

/// A parsed source: its structure and its rows.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub structure: StructureDescriptor,
    rows: Vec<Row>,
    /// Encoding the bytes were decoded with.
    pub encoding: String,
    /// Delimiter the rows were split on.
    pub delimiter: char,
}

impl ParsedSource {
    /// Rows in file order. The iterator is cheap to clone, so it can be
    /// walked more than once.
    pub fn rows(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Turns a source into a structure and rows.
pub trait Parser: Send + Sync {
    fn parse(&self, source: &SourceInput) -> ParseResult<ParsedSource>;
}

// =============================================================================
// Encoding / Delimiter Detection
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let (charset, _, _) = chardet::detect(bytes);

    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes with the given encoding label.
///
/// Unknown labels detected automatically fall back to lossy UTF-8; the
/// caller decides whether an unknown explicit label is an error.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let label = encoding.to_lowercase();
    let text = match label.as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()
        }
        _ => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    };
    text.trim_start_matches('\u{feff}').to_string()
}

/// Detect the delimiter by counting occurrences in the first line.
/// Falls back to `;` when none occurs.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best_sep = ';';
    let mut best_count = 0;

    for &sep in &CANDIDATE_DELIMITERS {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

// =============================================================================
// Delimited Parser
// =============================================================================

/// Parser for delimited text (CSV, TSV, pipe- or semicolon-separated).
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    delimiter: Option<char>,
    encoding: Option<String>,
    sample_size: usize,
}

impl Default for DelimitedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DelimitedParser {
    pub fn new() -> Self {
        Self {
            delimiter: None,
            encoding: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    /// Use this delimiter instead of detecting one.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Use this encoding instead of detecting one.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Number of distinct sample values kept per field.
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    /// Parse already-decoded text.
    pub fn parse_str(&self, name: &str, content: &str, encoding: String) -> ParseResult<ParsedSource> {
        if content.trim().is_empty() {
            return Err(ParseError::EmptySource(name.to_string()));
        }

        let delimiter = self.delimiter.unwrap_or_else(|| detect_delimiter(content));
        if !delimiter.is_ascii() {
            return Err(ParseError::Malformed {
                line: 1,
                message: format!("delimiter {:?} is not ASCII", delimiter),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let raw_headers = reader.headers().map_err(|e| malformed(&e, 1))?.clone();
        if raw_headers.iter().all(|h| h.is_empty()) {
            return Err(ParseError::NoHeaders(name.to_string()));
        }
        let headers = unique_headers(raw_headers.iter());

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| malformed(&e, rows.len() as u64 + 2))?;
            if record.iter().all(|cell| cell.is_empty()) && record.len() <= 1 {
                continue;
            }

            let mut row = Row::new();
            for (i, header) in headers.iter().enumerate() {
                let value = match record.get(i) {
                    Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                    _ => Value::Null,
                };
                row.insert(header.clone(), value);
            }
            rows.push(row);
        }

        let structure = describe(&headers, &rows, self.sample_size);
        tracing::debug!(
            source = name,
            rows = rows.len(),
            fields = headers.len(),
            %encoding,
            delimiter = %delimiter.escape_default(),
            "parsed source"
        );

        Ok(ParsedSource {
            structure,
            rows,
            encoding,
            delimiter,
        })
    }
}

impl Parser for DelimitedParser {
    fn parse(&self, source: &SourceInput) -> ParseResult<ParsedSource> {
        let name = source.name();
        let bytes = source.read_bytes()?;
        if bytes.is_empty() {
            return Err(ParseError::EmptySource(name));
        }

        let encoding = match &self.encoding {
            Some(label) => {
                let known = matches!(label.to_lowercase().as_str(), "utf-8" | "utf8" | "ascii" | "latin1" | "latin-1")
                    || encoding_rs::Encoding::for_label(label.to_lowercase().as_bytes()).is_some();
                if !known {
                    return Err(ParseError::Encoding {
                        encoding: label.clone(),
                        message: "unknown encoding label".to_string(),
                    });
                }
                label.clone()
            }
            None => detect_encoding(&bytes),
        };

        let content = decode_content(&bytes, &encoding);
        self.parse_str(&name, &content, encoding)
    }
}

/// Build the structure descriptor for parsed rows.
pub fn describe(headers: &[String], rows: &[Row], sample_size: usize) -> StructureDescriptor {
    let fields = headers
        .iter()
        .map(|header| {
            let texts: Vec<&str> = rows
                .iter()
                .filter_map(|row| row.get(header).and_then(Value::as_str))
                .collect();

            let mut seen = HashSet::new();
            let samples = texts
                .iter()
                .filter(|t| seen.insert(**t))
                .take(sample_size)
                .map(|t| Value::String(t.to_string()))
                .collect();

            let null_rate = if rows.is_empty() {
                0.0
            } else {
                (rows.len() - texts.len()) as f64 / rows.len() as f64
            };

            FieldDescriptor::new(header.clone(), infer_field(texts.iter().copied()))
                .with_samples(samples)
                .with_null_rate(null_rate)
        })
        .collect();

    StructureDescriptor::new(fields, rows.len())
}

/// Make header names unique: blank headers get a positional name and
/// repeats get a numeric suffix.
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.enumerate()
        .map(|(i, h)| {
            let base = if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h.to_string()
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

fn malformed(err: &csv::Error, fallback_line: u64) -> ParseError {
    let line = err
        .position()
        .map(|p| p.line())
        .unwrap_or(fallback_line);
    ParseError::Malformed {
        line,
        message: err.to_string(),
    }
}
