use serde::{Deserialize, Serialize};

use super::engine::TransformedRow;
use crate::error::{RuleError, RuleResult};
use crate::models::{Severity, ValidationFinding};
use crate::output::ArtifactInfo;

/// Outcome label of a finished transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportStatus {
    Completed,
    /// Finished, but findings were recorded.
    CompletedWithWarnings,
}

/// Summary of a transformation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformReport {
    /// Rows read.
    pub rows_processed: usize,
    /// Rows without any error finding.
    pub rows_transformed: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub findings: Vec<ValidationFinding>,
    /// Set once the rows were encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
}

impl TransformReport {
    /// Fold one transformed row into the report.
    pub fn record(&mut self, row: &TransformedRow) {
        self.rows_processed += 1;
        if !row.has_errors() {
            self.rows_transformed += 1;
        }
        for finding in &row.findings {
            match finding.severity {
                Severity::Error => self.error_count += 1,
                Severity::Warning => self.warning_count += 1,
            }
        }
        self.findings.extend(row.findings.iter().cloned());
    }

    pub fn check_threshold(&self, threshold: Option<usize>) -> RuleResult<()> {
        match threshold {
            Some(limit) if self.error_count > limit => Err(RuleError::ThresholdExceeded {
                errors: self.error_count,
                threshold: limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> ReportStatus {
        if self.findings.is_empty() {
            ReportStatus::Completed
        } else {
            ReportStatus::CompletedWithWarnings
        }
    }

    /// Fraction of processed rows without errors (1.0 for no rows).
    pub fn success_rate(&self) -> f64 {
        if self.rows_processed == 0 {
            1.0
        } else {
            self.rows_transformed as f64 / self.rows_processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;

    #[test]
    fn test_report_counts_and_status() {
        let mut report = TransformReport::default();
        assert_eq!(report.status(), ReportStatus::Completed);

        report.record(&TransformedRow {
            index: 0,
            record: Row::new(),
            findings: vec![],
        });
        report.record(&TransformedRow {
            index: 1,
            record: Row::new(),
            findings: vec![
                ValidationFinding::error(1, "a", "bad"),
                ValidationFinding::warning(1, "b", "missing source field"),
            ],
        });

        assert_eq!(report.rows_processed, 2);
        assert_eq!(report.rows_transformed, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warning_count, 1);
        assert_eq!(report.status(), ReportStatus::CompletedWithWarnings);
        assert_eq!(report.success_rate(), 0.5);
        assert!(report.check_threshold(Some(1)).is_ok());
        assert!(report.check_threshold(Some(0)).is_err());
    }
}
