//! Runtime settings.
//!
//! Settings come from the environment (a `.env` file is loaded first if
//! present) and can be overridden with the `with_*` builders.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `AUTOCONV_MIN_MATCH_SCORE` | 50 | lowest similarity accepted by greedy matching (inclusive) |
//! | `AUTOCONV_SAMPLE_SIZE` | 10 | sample values kept per field |
//! | `AUTOCONV_RECOMMENDER_TIMEOUT_SECS` | 30 | bound on external recommender calls |
//! | `AUTOCONV_ROW_BATCH_SIZE` | 500 | rows transformed between cooperative yields |
//! | `AUTOCONV_BATCH_CONCURRENCY` | 4 | batch items processed concurrently |
//! | `AUTOCONV_TEMPLATE_DIR` | `.autoconv/templates` | file template store |
//! | `ANTHROPIC_API_KEY` | - | enables the bundled recommender |
//! | `AUTOCONV_AI_MODEL` | `claude-sonnet-4-20250514` | model for the bundled recommender |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_MIN_MATCH_SCORE: u8 = 50;
const DEFAULT_SAMPLE_SIZE: usize = 10;
const DEFAULT_RECOMMENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ROW_BATCH_SIZE: usize = 500;
const DEFAULT_BATCH_CONCURRENCY: usize = 4;
const DEFAULT_TEMPLATE_DIR: &str = ".autoconv/templates";
const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";

/// Core settings shared by the mapping engine, transformation pipelines and
/// job executor.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Minimum similarity score (0-100) for a pair to be matched. A pair
    /// scoring exactly this value is kept.
    pub min_match_score: u8,
    /// Number of distinct sample values recorded per field.
    pub sample_size: usize,
    /// Upper bound on a single recommender call.
    pub recommender_timeout: Duration,
    /// Rows transformed between two cooperative yields.
    pub row_batch_size: usize,
    /// Batch items in flight at once.
    pub batch_concurrency: usize,
    /// Directory of the file-backed template store.
    pub template_dir: PathBuf,
    /// API key for the bundled recommender.
    pub ai_api_key: Option<String>,
    /// Model name for the bundled recommender.
    pub ai_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_match_score: DEFAULT_MIN_MATCH_SCORE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            recommender_timeout: Duration::from_secs(DEFAULT_RECOMMENDER_TIMEOUT_SECS),
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            ai_api_key: None,
            ai_model: DEFAULT_AI_MODEL.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(score) = parse_var::<u8>(&lookup, "AUTOCONV_MIN_MATCH_SCORE")? {
            if score > 100 {
                return Err(invalid("AUTOCONV_MIN_MATCH_SCORE", &score.to_string(), "must be 0-100"));
            }
            settings.min_match_score = score;
        }
        if let Some(size) = parse_var::<usize>(&lookup, "AUTOCONV_SAMPLE_SIZE")? {
            settings.sample_size = size;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "AUTOCONV_RECOMMENDER_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(invalid("AUTOCONV_RECOMMENDER_TIMEOUT_SECS", "0", "must be at least 1"));
            }
            settings.recommender_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize>(&lookup, "AUTOCONV_ROW_BATCH_SIZE")? {
            if size == 0 {
                return Err(invalid("AUTOCONV_ROW_BATCH_SIZE", "0", "must be at least 1"));
            }
            settings.row_batch_size = size;
        }
        if let Some(workers) = parse_var::<usize>(&lookup, "AUTOCONV_BATCH_CONCURRENCY")? {
            if workers == 0 {
                return Err(invalid("AUTOCONV_BATCH_CONCURRENCY", "0", "must be at least 1"));
            }
            settings.batch_concurrency = workers;
        }
        if let Some(dir) = lookup("AUTOCONV_TEMPLATE_DIR").filter(|d| !d.trim().is_empty()) {
            settings.template_dir = PathBuf::from(dir);
        }
        settings.ai_api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(model) = lookup("AUTOCONV_AI_MODEL").filter(|m| !m.trim().is_empty()) {
            settings.ai_model = model;
        }

        Ok(settings)
    }

    /// Set the minimum match score (clamped to 100).
    pub fn with_min_match_score(mut self, score: u8) -> Self {
        self.min_match_score = score.min(100);
        self
    }

    /// Set the per-field sample size.
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size;
        self
    }

    /// Set the recommender timeout.
    pub fn with_recommender_timeout(mut self, timeout: Duration) -> Self {
        self.recommender_timeout = timeout;
        self
    }

    /// Set the cooperative row batch size.
    pub fn with_row_batch_size(mut self, size: usize) -> Self {
        self.row_batch_size = size.max(1);
        self
    }

    /// Set the number of batch items processed concurrently.
    pub fn with_batch_concurrency(mut self, workers: usize) -> Self {
        self.batch_concurrency = workers.max(1);
        self
    }

    /// Set the template store directory.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.min_match_score, 50);
        assert_eq!(settings.sample_size, 10);
        assert_eq!(settings.recommender_timeout, Duration::from_secs(30));
        assert!(settings.ai_api_key.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("AUTOCONV_MIN_MATCH_SCORE", "65"),
            ("AUTOCONV_BATCH_CONCURRENCY", "2"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(settings.min_match_score, 65);
        assert_eq!(settings.batch_concurrency, 2);
        assert_eq!(settings.ai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = Settings::from_lookup(lookup_from(&[("AUTOCONV_MIN_MATCH_SCORE", "high")]))
            .unwrap_err();
        assert!(err.to_string().contains("AUTOCONV_MIN_MATCH_SCORE"));

        let err = Settings::from_lookup(lookup_from(&[("AUTOCONV_MIN_MATCH_SCORE", "140")]))
            .unwrap_err();
        assert!(err.to_string().contains("0-100"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(Settings::from_lookup(lookup_from(&[("AUTOCONV_BATCH_CONCURRENCY", "0")])).is_err());
    }
}
