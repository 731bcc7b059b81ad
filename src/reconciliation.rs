// ⚖️ Total Reconciler - Rebuild totals the extraction layer can't be trusted with
//
// The headline tables carry a grand-total block that upstream extraction
// captures inconsistently, so it is discarded and recomputed:
//
//   TOTAL / <fund>            = Σ departments' <fund>
//   <dept> / TOTAL ex FEDERAL = <dept> / DEPARTMENT TOTAL − <dept> / <exclusion fund>
//
// The discarded grand total is still compared against the recomputed one so
// a bad extraction shows up as a discrepancy instead of vanishing.

use crate::data_quality::{IssueKind, QualityIssue, Severity};
use crate::jurisdiction::Jurisdiction;
use crate::table::{
    FundingSource, LineItemKey, LineItemTable, DEFAULT_GRAND_TOTAL_DEPARTMENT, TOTAL_DEPARTMENT,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fund subtracted for the ex-fund view unless configured otherwise
pub const DEFAULT_EXCLUSION_FUND: &str = "FEDERAL EXPENDITURES FUND";

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Reported grand total matches the recomputed total
    Balanced { total: f64 },

    /// Off by less than the major threshold
    MinorDiscrepancy {
        reported: f64,
        recomputed: f64,
        difference: f64,
        tolerance: f64,
    },

    /// Off by at least the major threshold
    MajorDiscrepancy {
        reported: f64,
        recomputed: f64,
        difference: f64,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn has_discrepancy(&self) -> bool {
        !self.is_balanced()
    }

    pub fn difference(&self) -> f64 {
        match self {
            ReconciliationResult::Balanced { .. } => 0.0,
            ReconciliationResult::MinorDiscrepancy { difference, .. } => *difference,
            ReconciliationResult::MajorDiscrepancy { difference, .. } => *difference,
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrandTotalCheck {
    pub year: String,
    pub result: ReconciliationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub jurisdiction: Jurisdiction,

    /// Raw grand-total rows dropped from the table
    pub discarded_rows: usize,

    /// One check per year that had a reported DEPARTMENT TOTAL grand total
    pub grand_total_checks: Vec<GrandTotalCheck>,

    /// Departments with no DEPARTMENT TOTAL row, hence no ex-fund view
    pub missing_base: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.grand_total_checks.iter().all(|c| c.result.is_balanced())
    }

    pub fn summary(&self) -> String {
        let discrepancies = self
            .grand_total_checks
            .iter()
            .filter(|c| c.result.has_discrepancy())
            .count();
        format!(
            "Reconciliation for {}: {} grand-total row(s) discarded, {} year(s) checked, {} discrepancy(ies), {} department(s) without base total",
            self.jurisdiction,
            self.discarded_rows,
            self.grand_total_checks.len(),
            discrepancies,
            self.missing_base.len()
        )
    }

    /// Data-quality issues raised by this reconciliation
    pub fn issues(&self) -> Vec<QualityIssue> {
        let mut issues = Vec::new();

        for check in &self.grand_total_checks {
            let severity = match &check.result {
                ReconciliationResult::Balanced { .. } => continue,
                ReconciliationResult::MinorDiscrepancy { .. } => Severity::Info,
                ReconciliationResult::MajorDiscrepancy { .. } => Severity::Warning,
            };
            issues.push(QualityIssue::new(
                severity,
                IssueKind::GrandTotalMismatch,
                Some(self.jurisdiction),
                &check.year,
                format!(
                    "Reported grand total for {} is off by ${:.2} from the sum of departments",
                    check.year,
                    check.result.difference()
                ),
                "Inspect the extracted headline table for missing or duplicated departments",
            ));
        }

        for department in &self.missing_base {
            issues.push(QualityIssue::new(
                Severity::Info,
                IssueKind::MissingExclusionBase,
                Some(self.jurisdiction),
                department,
                format!("'{}' has no DEPARTMENT TOTAL row; ex-fund view skipped", department),
                "No action needed unless this department should report a total",
            ));
        }

        issues
    }
}

/// Output of the reconciler: the rebuilt table plus what was found on the way
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledTable {
    pub table: LineItemTable,
    pub report: ReconciliationReport,
}

// ============================================================================
// TOTAL RECONCILER
// ============================================================================

pub struct TotalReconciler {
    /// Department name marking raw grand-total rows
    pub grand_total_department: String,

    /// Fund removed for the ex-fund view
    pub exclusion_fund: FundingSource,

    /// Tolerance for the grand-total check (default: $0.01)
    pub tolerance: f64,

    /// Threshold for minor vs major discrepancy (default: $10.00)
    pub major_discrepancy_threshold: f64,
}

impl TotalReconciler {
    pub fn new() -> Self {
        TotalReconciler {
            grand_total_department: DEFAULT_GRAND_TOTAL_DEPARTMENT.to_string(),
            exclusion_fund: FundingSource::regular(DEFAULT_EXCLUSION_FUND),
            tolerance: 0.01,
            major_discrepancy_threshold: 10.0,
        }
    }

    pub fn with_grand_total_department(mut self, name: &str) -> Self {
        self.grand_total_department = name.trim().to_string();
        self
    }

    pub fn with_exclusion_fund(mut self, fund: &str) -> Self {
        self.exclusion_fund = FundingSource::regular(fund);
        self
    }

    pub fn with_thresholds(mut self, tolerance: f64, major_threshold: f64) -> Self {
        self.tolerance = tolerance;
        self.major_discrepancy_threshold = major_threshold;
        self
    }

    /// Rebuild totals for one jurisdiction's raw table
    ///
    /// Example:
    /// ```
    /// use budget_standardization::{Jurisdiction, LineItemKey, LineItemTable, FundingSource, TotalReconciler};
    ///
    /// let mut raw = LineItemTable::new();
    /// raw.set_amount(LineItemKey::new("A", FundingSource::regular("GENERAL FUND")), "2023", 100.0);
    /// raw.set_amount(LineItemKey::department_total("A"), "2023", 100.0);
    ///
    /// let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);
    /// assert_eq!(reconciled.table.amount("TOTAL", &FundingSource::DepartmentTotal, "2023"), Some(100.0));
    /// ```
    pub fn reconcile(&self, jurisdiction: Jurisdiction, raw: &LineItemTable) -> ReconciledTable {
        let grand_total = self.grand_total_department.as_str();

        let discarded_rows = raw.rows().filter(|(k, _)| k.department == grand_total).count();

        // Step 1: drop grand totals, stale TOTAL rows and stale ex-fund rows
        let departments = raw.filter(|k| {
            k.department != grand_total
                && k.department != TOTAL_DEPARTMENT
                && k.funding_source != FundingSource::ExFederal
        });

        // Step 2: TOTAL per funding source
        let mut table = departments.clone();
        for (key, amounts) in departments.rows() {
            table.add_row(LineItemKey::new(TOTAL_DEPARTMENT, key.funding_source.clone()), amounts);
        }

        // Step 3: ex-fund view per department (TOTAL included)
        let missing_base = self.add_ex_fund_rows(&mut table);

        // Step 4: compare against the discarded grand total
        let grand_total_checks = self.check_grand_total(raw, &table);

        let report = ReconciliationReport {
            jurisdiction,
            discarded_rows,
            grand_total_checks,
            missing_base,
        };
        info!("{}", report.summary());

        ReconciledTable { table, report }
    }

    /// Adds `DEPARTMENT TOTAL ex FEDERAL` rows; returns departments skipped
    fn add_ex_fund_rows(&self, table: &mut LineItemTable) -> Vec<String> {
        let mut missing_base = Vec::new();
        let mut derived = Vec::new();

        for department in table.departments() {
            let Some(totals) = table.get(&LineItemKey::department_total(department)) else {
                missing_base.push(department.to_string());
                continue;
            };

            let excluded = table.get(&LineItemKey::new(department, self.exclusion_fund.clone()));
            for (year, total) in totals {
                let ex_fund = match excluded.and_then(|row| row.get(year)) {
                    Some(fund) => total - fund,
                    // Not every department receives the exclusion fund
                    None => *total,
                };
                derived.push((LineItemKey::new(department, FundingSource::ExFederal), year.clone(), ex_fund));
            }
        }

        for (key, year, amount) in derived {
            debug!(%key, %year, amount, "ex-fund row");
            table.set_amount(key, &year, amount);
        }

        missing_base
    }

    fn check_grand_total(&self, raw: &LineItemTable, reconciled: &LineItemTable) -> Vec<GrandTotalCheck> {
        let reported = match raw.get(&LineItemKey::department_total(&self.grand_total_department)) {
            Some(row) => row,
            None => return Vec::new(),
        };
        let recomputed = reconciled.get(&LineItemKey::department_total(TOTAL_DEPARTMENT));

        reported
            .iter()
            .map(|(year, reported)| {
                let recomputed = recomputed.and_then(|row| row.get(year)).copied().unwrap_or(0.0);
                GrandTotalCheck {
                    year: year.clone(),
                    result: self.classify(*reported, recomputed),
                }
            })
            .collect()
    }

    fn classify(&self, reported: f64, recomputed: f64) -> ReconciliationResult {
        let difference = (recomputed - reported).abs();

        if difference < self.tolerance {
            ReconciliationResult::Balanced { total: recomputed }
        } else if difference < self.major_discrepancy_threshold {
            ReconciliationResult::MinorDiscrepancy {
                reported,
                recomputed,
                difference,
                tolerance: self.tolerance,
            }
        } else {
            ReconciliationResult::MajorDiscrepancy {
                reported,
                recomputed,
                difference,
            }
        }
    }
}

impl Default for TotalReconciler {
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
    use crate::table::{DEPARTMENT_TOTAL_EX_FEDERAL, TOTAL_DEPARTMENT};

    fn set(table: &mut LineItemTable, dept: &str, fs: &str, year: &str, amount: f64) {
        table.set_amount(LineItemKey::new(dept, FundingSource::parse(fs)), year, amount);
    }

    fn basic_raw() -> LineItemTable {
        let mut raw = LineItemTable::new();
        set(&mut raw, "A", "GENERAL FUND", "2023", 100.0);
        set(&mut raw, "A", "FEDERAL FUND", "2023", 20.0);
        set(&mut raw, "A", "DEPARTMENT TOTAL", "2023", 120.0);
        set(&mut raw, "GRAND TOTAL", "DEPARTMENT TOTAL", "2023", 120.0);
        raw
    }

    fn scenario_reconciler() -> TotalReconciler {
        TotalReconciler::new()
            .with_grand_total_department("GRAND TOTAL")
            .with_exclusion_fund("FEDERAL FUND")
    }

    #[test]
    fn test_basic_reconciliation() {
        let reconciled = scenario_reconciler().reconcile(Jurisdiction::Maine, &basic_raw());
        let table = &reconciled.table;

        assert!(!table.departments().contains("GRAND TOTAL"));
        assert_eq!(table.amount(TOTAL_DEPARTMENT, &FundingSource::DepartmentTotal, "2023"), Some(120.0));
        assert_eq!(table.amount(TOTAL_DEPARTMENT, &FundingSource::regular("GENERAL FUND"), "2023"), Some(100.0));
        assert_eq!(
            table.amount("A", &FundingSource::parse(DEPARTMENT_TOTAL_EX_FEDERAL), "2023"),
            Some(100.0)
        );
        assert_eq!(reconciled.report.discarded_rows, 1);
        assert!(reconciled.report.is_balanced());

        println!("✅ Test passed: {}", reconciled.report.summary());
    }

    #[test]
    fn test_ex_fund_falls_back_to_total() {
        let mut raw = LineItemTable::new();
        set(&mut raw, "AUDIT", "GENERAL FUND", "2024", 17.25);
        set(&mut raw, "AUDIT", "DEPARTMENT TOTAL", "2024", 17.25);

        let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);
        let total = reconciled.table.amount("AUDIT", &FundingSource::DepartmentTotal, "2024");
        let ex_fund = reconciled.table.amount("AUDIT", &FundingSource::ExFederal, "2024");

        assert_eq!(ex_fund, total);
        assert_eq!(ex_fund, Some(17.25));
    }

    #[test]
    fn test_missing_base_skips_ex_fund() {
        let mut raw = LineItemTable::new();
        set(&mut raw, "NO TOTAL", "GENERAL FUND", "2024", 5.0);
        set(&mut raw, "NO TOTAL", "FEDERAL EXPENDITURES FUND", "2024", 2.0);
        set(&mut raw, "HAS TOTAL", "DEPARTMENT TOTAL", "2024", 9.0);

        let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);

        assert_eq!(reconciled.table.amount("NO TOTAL", &FundingSource::ExFederal, "2024"), None);
        assert_eq!(reconciled.report.missing_base, vec!["NO TOTAL".to_string()]);
        assert_eq!(
            reconciled.report.issues()[0].kind,
            IssueKind::MissingExclusionBase
        );
    }

    #[test]
    fn test_ex_fund_only_for_years_with_base() {
        let mut raw = LineItemTable::new();
        set(&mut raw, "A", "DEPARTMENT TOTAL", "2023", 10.0);
        set(&mut raw, "A", "FEDERAL EXPENDITURES FUND", "2023", 4.0);
        set(&mut raw, "A", "FEDERAL EXPENDITURES FUND", "2024", 3.0);

        let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);

        assert_eq!(reconciled.table.amount("A", &FundingSource::ExFederal, "2023"), Some(6.0));
        assert_eq!(reconciled.table.amount("A", &FundingSource::ExFederal, "2024"), None);
    }

    #[test]
    fn test_grand_total_discrepancies() {
        let mut raw = basic_raw();
        set(&mut raw, "GRAND TOTAL", "DEPARTMENT TOTAL", "2023", 125.0);
        set(&mut raw, "A", "DEPARTMENT TOTAL", "2024", 50.0);
        set(&mut raw, "GRAND TOTAL", "DEPARTMENT TOTAL", "2024", 500.0);

        let reconciled = scenario_reconciler().reconcile(Jurisdiction::Maine, &raw);
        let checks = &reconciled.report.grand_total_checks;

        assert_eq!(checks.len(), 2);
        assert!(matches!(checks[0].result, ReconciliationResult::MinorDiscrepancy { .. }));
        assert!((checks[0].result.difference() - 5.0).abs() < 0.01);
        assert!(matches!(checks[1].result, ReconciliationResult::MajorDiscrepancy { .. }));

        let issues = reconciled.report.issues();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].severity, Severity::Warning);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let reconciler = scenario_reconciler();
        let once = reconciler.reconcile(Jurisdiction::Maine, &basic_raw());
        let twice = reconciler.reconcile(Jurisdiction::Maine, &once.table);

        assert_eq!(once.table, twice.table);
        assert_eq!(once.table.fingerprint(), twice.table.fingerprint());
    }

    #[test]
    fn test_rows_sorted_by_department_then_fund() {
        let reconciled = scenario_reconciler().reconcile(Jurisdiction::Maine, &basic_raw());
        let keys: Vec<String> = reconciled.table.rows().map(|(k, _)| k.to_string()).collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.first().map(String::as_str), Some("A / DEPARTMENT TOTAL"));
    }

    #[test]
    fn test_reconciliation_result_methods() {
        let balanced = ReconciliationResult::Balanced { total: 10.0 };
        assert!(balanced.is_balanced());
        assert_eq!(balanced.difference(), 0.0);

        let minor = ReconciliationResult::MinorDiscrepancy {
            reported: 10.0,
            recomputed: 15.0,
            difference: 5.0,
            tolerance: 0.01,
        };
        assert!(minor.has_discrepancy());
        assert_eq!(minor.difference(), 5.0);
    }
}
