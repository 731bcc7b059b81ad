// 🚨 Error taxonomy
// Typed conditions raised by the pipeline stages. File, CSV and database
// failures travel as anyhow::Error with context instead.

use thiserror::Error;

use crate::data_quality::QualityReport;

/// Conditions raised by components 2-6.
///
/// Data-quality signals (unmapped names, unallocated remainders) are normally
/// accumulated in a `QualityReport`; they only become a `PipelineError` when
/// the caller asks for strict mode.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("year {year} not present in {table}")]
    YearNotPresent { year: String, table: String },

    #[error("unknown jurisdiction: {0}")]
    UnknownJurisdiction(String),

    #[error("invalid mapping at line {line}: {reason}")]
    InvalidMapping { line: usize, reason: String },

    #[error("{issues} data-quality issue(s): {summary}")]
    DataQuality { issues: usize, summary: String },

    /// A structural failure that stopped the run after standardization.
    /// `report` holds every issue gathered up to that point.
    #[error("{cause} ({})", .report.summary())]
    Incomplete {
        cause: Box<PipelineError>,
        report: QualityReport,
    },
}

/// Failures of the economic index builder (component 7).
///
/// None of these abort the pipeline; the affected index is marked
/// unavailable instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EconomicError {
    #[error("failed to fetch series {series_id}: {reason}")]
    Fetch { series_id: String, reason: String },

    #[error("series {0} has no observations in range")]
    EmptySeries(String),

    #[error("series {series_id} has a zero base value at {year}")]
    ZeroBase { series_id: String, year: String },

    #[error("series {series_id} needs at least two observations to extrapolate")]
    InsufficientHistory { series_id: String },

    #[error("invalid observation in {series_id}: {reason}")]
    InvalidObservation { series_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_not_present_message() {
        let err = PipelineError::YearNotPresent {
            year: "2031".to_string(),
            table: "Maine standardized".to_string(),
        };
        assert_eq!(err.to_string(), "year 2031 not present in Maine standardized");
    }

    #[test]
    fn test_incomplete_keeps_cause_and_report() {
        let err = PipelineError::Incomplete {
            cause: Box::new(PipelineError::YearNotPresent {
                year: "2018".to_string(),
                table: "New Hampshire standardized".to_string(),
            }),
            report: QualityReport::default(),
        };
        let message = err.to_string();
        assert!(message.starts_with("year 2018 not present in New Hampshire standardized"));

        println!("✅ Incomplete error: {}", message);
    }

    #[test]
    fn test_economic_error_message() {
        let err = EconomicError::ZeroBase {
            series_id: "MEPOP".to_string(),
            year: "2016".to_string(),
        };
        assert!(err.to_string().contains("MEPOP"));
        assert!(err.to_string().contains("2016"));
    }
}
