// ✅ Data Quality Engine - Accumulate every defect found in a run
//
// Problems in the source documents (unmapped departments, missing totals,
// mismatched grand totals) are not programming errors. They are collected
// per run so a single pass surfaces the full list, then either logged or,
// in strict mode, turned into a hard failure.

use crate::errors::PipelineError;
use crate::jurisdiction::Jurisdiction;
use crate::table::{BudgetTable, FundingSource, TOTAL_DEPARTMENT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Dollars are unaccounted for or a value is invalid
    Warning,  // Output is usable but something upstream looks wrong
    Info,     // Expected gaps, recorded for transparency
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueKind {
    /// As-reported department with no rule in either mapping tier
    UnmappedDepartment,

    /// Department only covered by sub-department rules, with dollars left over
    UnallocatedRemainder,

    /// Department without a DEPARTMENT TOTAL row, so no ex-fund view
    MissingExclusionBase,

    /// Reported grand total disagrees with the recomputed one
    GrandTotalMismatch,

    /// Standardized dollars differ from source dollars
    ConservationViolation,

    /// Amount is NaN/infinite or the row key is blank
    InvalidValue,

    /// Economic series could not be fetched or indexed
    MissingEconomicData,

    /// A comparison year is absent from a standardized table
    MissingYear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub jurisdiction: Option<Jurisdiction>,
    pub subject: String,
    pub issue: String,
    pub recommendation: String,
}

impl QualityIssue {
    pub fn new(
        severity: Severity,
        kind: IssueKind,
        jurisdiction: Option<Jurisdiction>,
        subject: &str,
        issue: String,
        recommendation: &str,
    ) -> Self {
        QualityIssue {
            severity,
            kind,
            jurisdiction,
            subject: subject.to_string(),
            issue,
            recommendation: recommendation.to_string(),
        }
    }

    pub fn unmapped(jurisdiction: Jurisdiction, department: &str) -> Self {
        QualityIssue::new(
            Severity::Critical,
            IssueKind::UnmappedDepartment,
            Some(jurisdiction),
            department,
            format!("{} department '{}' has no mapping rule", jurisdiction, department),
            "Add a direct or sub-department row for this name to the mapping file",
        )
    }

    fn describe(&self) -> String {
        match self.jurisdiction {
            Some(j) => format!("[{:?}] {}: {}", self.kind, j.code(), self.issue),
            None => format!("[{:?}] {}", self.kind, self.issue),
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

/// QualityReport - every issue found during one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue; warnings and criticals are also logged right away
    pub fn push(&mut self, issue: QualityIssue) {
        if issue.severity != Severity::Info {
            warn!(
                kind = ?issue.kind,
                jurisdiction = issue.jurisdiction.map(|j| j.code()).unwrap_or("-"),
                subject = %issue.subject,
                "{}",
                issue.issue
            );
        }
        self.issues.push(issue);
    }

    pub fn extend<I: IntoIterator<Item = QualityIssue>>(&mut self, issues: I) {
        for issue in issues {
            self.push(issue);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Department names reported as unmapped for one jurisdiction
    pub fn unmapped_names(&self, jurisdiction: Jurisdiction) -> BTreeSet<&str> {
        self.of_kind(IssueKind::UnmappedDepartment)
            .filter(|i| i.jurisdiction == Some(jurisdiction))
            .map(|i| i.subject.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        let critical = self.issues.iter().filter(|i| i.severity == Severity::Critical).count();
        let warnings = self.issues.iter().filter(|i| i.severity == Severity::Warning).count();
        format!(
            "{} issue(s): {} critical, {} warning, {} unmapped department(s)",
            self.issues.len(),
            critical,
            warnings,
            self.count(IssueKind::UnmappedDepartment)
        )
    }

    /// Strict mode: any critical issue fails the run, listing all of them
    pub fn into_strict_result(self) -> Result<QualityReport, PipelineError> {
        let critical: Vec<String> = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .map(QualityIssue::describe)
            .collect();

        if critical.is_empty() {
            Ok(self)
        } else {
            Err(PipelineError::DataQuality {
                issues: critical.len(),
                summary: critical.join("; "),
            })
        }
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

/// Dollars in vs dollars out for one jurisdiction-year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConservationCheck {
    pub jurisdiction: Jurisdiction,
    pub year: String,
    pub source_total: f64,
    pub standardized_total: f64,
    pub difference: f64,
    pub conserved: bool,
}

pub struct DataQualityEngine {
    /// Absolute tolerance for dollar comparisons (default: $0.01)
    pub tolerance: f64,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        DataQualityEngine { tolerance }
    }

    /// Validate a raw table as it comes out of a loader
    pub fn validate_table(&self, jurisdiction: Jurisdiction, table: &BudgetTable) -> Vec<QualityIssue> {
        let mut issues = Vec::new();

        for (key, amounts) in table.rows() {
            // Rule 1: Department name present
            if key.department.is_empty() {
                issues.push(QualityIssue::new(
                    Severity::Critical,
                    IssueKind::InvalidValue,
                    Some(jurisdiction),
                    &key.to_string(),
                    format!("Row with empty department name ({})", key.funding_source),
                    "Check the loader's department detection for this document",
                ));
            }

            // Rule 2: Funding source present
            if key.funding_source.label().is_empty() {
                issues.push(QualityIssue::new(
                    Severity::Critical,
                    IssueKind::InvalidValue,
                    Some(jurisdiction),
                    &key.department,
                    format!("Row with empty funding source in '{}'", key.department),
                    "Check the loader's funding-source detection for this document",
                ));
            }

            // Rule 3: Amounts are finite
            for (year, amount) in amounts {
                if !amount.is_finite() {
                    issues.push(QualityIssue::new(
                        Severity::Critical,
                        IssueKind::InvalidValue,
                        Some(jurisdiction),
                        &key.to_string(),
                        format!("Amount for {} in {} is not a valid number", key, year),
                        "Verify the amount in the source document",
                    ));
                }
            }
        }

        issues
    }

    /// DEPARTMENT TOTAL dollars before and after standardization, per year.
    ///
    /// `TOTAL` and any department in `excluded` are left out on both sides.
    pub fn conservation_checks(
        &self,
        jurisdiction: Jurisdiction,
        source: &BudgetTable,
        standardized: &BudgetTable,
        excluded: &[&str],
    ) -> Vec<ConservationCheck> {
        let mut skip: Vec<&str> = excluded.to_vec();
        skip.push(TOTAL_DEPARTMENT);

        let years: BTreeSet<&String> = source.years().chain(standardized.years()).collect();
        years
            .into_iter()
            .map(|year| {
                let source_total = source.sum_funding_source(&FundingSource::DepartmentTotal, year, &skip);
                let standardized_total = standardized.sum_funding_source(&FundingSource::DepartmentTotal, year, &skip);
                let difference = standardized_total - source_total;
                ConservationCheck {
                    jurisdiction,
                    year: year.clone(),
                    source_total,
                    standardized_total,
                    difference,
                    conserved: difference.abs() <= self.tolerance,
                }
            })
            .collect()
    }

    /// Critical issue for every year whose dollars were not conserved
    pub fn check_conservation(
        &self,
        jurisdiction: Jurisdiction,
        source: &BudgetTable,
        standardized: &BudgetTable,
        excluded: &[&str],
    ) -> Vec<QualityIssue> {
        let checks = self.conservation_checks(jurisdiction, source, standardized, excluded);
        conservation_issues(&checks)
    }
}

/// Critical issues for already-computed checks that failed
pub fn conservation_issues(checks: &[ConservationCheck]) -> Vec<QualityIssue> {
    checks
        .iter()
        .filter(|check| !check.conserved)
        .map(|check| {
            QualityIssue::new(
                Severity::Critical,
                IssueKind::ConservationViolation,
                Some(check.jurisdiction),
                &check.year,
                format!(
                    "{} {}: standardized total ${:.2} differs from source ${:.2} by ${:.2}",
                    check.jurisdiction, check.year, check.standardized_total, check.source_total, check.difference
                ),
                "Check for overlapping direct and sub-department rules",
            )
        })
        .collect()
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LineItemKey;

    fn total(table: &mut BudgetTable, dept: &str, year: &str, amount: f64) {
        table.set_amount(LineItemKey::department_total(dept), year, amount);
    }

    #[test]
    fn test_report_collects_all_unmapped() {
        let mut report = QualityReport::new();
        report.push(QualityIssue::unmapped(Jurisdiction::Maine, "DEPARTMENT OF AUDIT"));
        report.push(QualityIssue::unmapped(Jurisdiction::Maine, "EXECUTIVE DEPARTMENT"));
        report.push(QualityIssue::unmapped(Jurisdiction::NewHampshire, "BANKING"));

        assert_eq!(report.count(IssueKind::UnmappedDepartment), 3);
        let maine: Vec<&str> = report.unmapped_names(Jurisdiction::Maine).into_iter().collect();
        assert_eq!(maine, vec!["DEPARTMENT OF AUDIT", "EXECUTIVE DEPARTMENT"]);
        assert!(report.has_critical_issues());

        println!("Report: {}", report.summary());
    }

    #[test]
    fn test_strict_result_lists_every_critical_issue() {
        let mut report = QualityReport::new();
        report.push(QualityIssue::unmapped(Jurisdiction::Maine, "A"));
        report.push(QualityIssue::unmapped(Jurisdiction::NewHampshire, "B"));

        match report.into_strict_result() {
            Err(PipelineError::DataQuality { issues, summary }) => {
                assert_eq!(issues, 2);
                assert!(summary.contains("'A'"));
                assert!(summary.contains("'B'"));
            }
            other => panic!("expected DataQuality error, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_result_passes_without_critical() {
        let mut report = QualityReport::new();
        report.push(QualityIssue::new(
            Severity::Info,
            IssueKind::MissingExclusionBase,
            Some(Jurisdiction::Maine),
            "X",
            "no total".to_string(),
            "",
        ));
        assert!(report.into_strict_result().is_ok());
    }

    #[test]
    fn test_validate_table_flags_non_finite() {
        let engine = DataQualityEngine::new();
        let mut table = BudgetTable::new();
        total(&mut table, "A", "2023", f64::NAN);
        total(&mut table, "B", "2023", 10.0);

        let issues = engine.validate_table(Jurisdiction::Maine, &table);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::InvalidValue);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn test_conservation_balanced_and_violated() {
        let engine = DataQualityEngine::new();

        let mut source = BudgetTable::new();
        total(&mut source, "B", "2023", 500.0);
        total(&mut source, "TOTAL", "2023", 500.0);

        let mut standardized = BudgetTable::new();
        total(&mut standardized, "X", "2023", 420.0);
        total(&mut standardized, "Y", "2023", 80.0);
        total(&mut standardized, "TOTAL", "2023", 500.0);

        assert!(engine
            .check_conservation(Jurisdiction::Maine, &source, &standardized, &[])
            .is_empty());

        total(&mut standardized, "Y", "2023", 160.0);
        let issues = engine.check_conservation(Jurisdiction::Maine, &source, &standardized, &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::ConservationViolation);
    }

    #[test]
    fn test_conservation_issues_from_checks() {
        let engine = DataQualityEngine::new();

        let mut source = BudgetTable::new();
        total(&mut source, "B", "2023", 500.0);
        total(&mut source, "B", "2024", 510.0);
        let mut standardized = BudgetTable::new();
        total(&mut standardized, "X", "2023", 500.0);
        total(&mut standardized, "X", "2024", 400.0);

        let checks = engine.conservation_checks(Jurisdiction::NewHampshire, &source, &standardized, &[]);
        let issues = conservation_issues(&checks);

        assert_eq!(checks.len(), 2);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subject, "2024");
        assert_eq!(issues[0].jurisdiction, Some(Jurisdiction::NewHampshire));
        assert_eq!(
            issues,
            engine.check_conservation(Jurisdiction::NewHampshire, &source, &standardized, &[])
        );
    }
}
