// 🔀 Cross-Jurisdiction Comparator - Align two standardized tables by department
//
// Point-in-time: one record per standardized department for a year.
// Through-time: levels, changes and the gap between the two states.
//
// A department missing from one state's table is a function that state
// doesn't have: it compares as zero, not as missing.

use crate::errors::PipelineError;
use crate::jurisdiction::Jurisdiction;
use crate::table::{FundingSource, StandardizedTable, TOTAL_DEPARTMENT};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// One department's DEPARTMENT TOTAL in both states for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub department: String,
    pub amount_a: f64,
    pub amount_b: f64,
}

impl ComparisonRecord {
    /// A − B
    pub fn differential(&self) -> f64 {
        self.amount_a - self.amount_b
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointInTimeComparison {
    pub year: String,
    pub jurisdiction_a: Jurisdiction,
    pub jurisdiction_b: Jurisdiction,
    pub records: Vec<ComparisonRecord>,
}

impl PointInTimeComparison {
    pub fn record(&self, department: &str) -> Option<&ComparisonRecord> {
        self.records.iter().find(|r| r.department == department)
    }

    pub fn summary(&self) -> String {
        let total_a: f64 = self.records.iter().map(|r| r.amount_a).sum();
        let total_b: f64 = self.records.iter().map(|r| r.amount_b).sum();
        format!(
            "{}: {} departments, {} ${:.2} vs {} ${:.2}",
            self.year,
            self.records.len(),
            self.jurisdiction_a.code(),
            total_a,
            self.jurisdiction_b.code(),
            total_b
        )
    }
}

/// Start/end level of one series and how it moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub start: f64,
    pub end: f64,
    pub change: f64,

    /// Percent change; `None` when the start level is zero or the result
    /// isn't a finite number
    pub pct_change: Option<f64>,
}

impl LevelChange {
    pub fn between(start: f64, end: f64) -> Self {
        LevelChange {
            start,
            end,
            change: end - start,
            pct_change: percent_change(start, end),
        }
    }
}

/// `(end − start) / start × 100`, or `None` instead of NaN/±inf
pub fn percent_change(start: f64, end: f64) -> Option<f64> {
    if start == 0.0 {
        return None;
    }
    let pct = (end - start) / start * 100.0;
    pct.is_finite().then_some(pct)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughTimeRecord {
    pub department: String,
    pub a: LevelChange,
    pub b: LevelChange,

    /// A − B at the start year
    pub differential_start: f64,

    /// A − B at the end year
    pub differential_end: f64,

    /// Growth in the gap over the period
    pub differential_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughTimeComparison {
    pub start_year: String,
    pub end_year: String,
    pub jurisdiction_a: Jurisdiction,
    pub jurisdiction_b: Jurisdiction,

    /// Descending by A's end level, ties by department name
    pub records: Vec<ThroughTimeRecord>,
}

impl ThroughTimeComparison {
    pub fn record(&self, department: &str) -> Option<&ThroughTimeRecord> {
        self.records.iter().find(|r| r.department == department)
    }

    /// Departments whose gap grew the most (absolute), largest first
    pub fn widest_gap_growth(&self, n: usize) -> Vec<&ThroughTimeRecord> {
        let mut records: Vec<&ThroughTimeRecord> = self.records.iter().collect();
        records.sort_by(|x, y| {
            y.differential_change
                .abs()
                .total_cmp(&x.differential_change.abs())
                .then_with(|| x.department.cmp(&y.department))
        });
        records.truncate(n);
        records
    }
}

// ============================================================================
// COMPARATOR
// ============================================================================

pub struct Comparator {
    pub jurisdiction_a: Jurisdiction,
    pub jurisdiction_b: Jurisdiction,

    /// Departments left out of every comparison (TOTAL by default)
    departments_to_ignore: Vec<String>,
}

impl Comparator {
    pub fn new(jurisdiction_a: Jurisdiction, jurisdiction_b: Jurisdiction) -> Self {
        Comparator {
            jurisdiction_a,
            jurisdiction_b,
            departments_to_ignore: vec![TOTAL_DEPARTMENT.to_string()],
        }
    }

    /// Builder pattern: ignore more departments (names are compared upper-cased)
    pub fn with_ignored<S: AsRef<str>>(mut self, departments: &[S]) -> Self {
        self.departments_to_ignore
            .extend(departments.iter().map(|d| d.as_ref().trim().to_uppercase()));
        self
    }

    fn is_ignored(&self, department: &str) -> bool {
        self.departments_to_ignore.iter().any(|d| d == department)
    }

    fn require_year(table: &StandardizedTable, year: &str, jurisdiction: Jurisdiction) -> Result<(), PipelineError> {
        if table.has_year(year) {
            Ok(())
        } else {
            Err(PipelineError::YearNotPresent {
                year: year.to_string(),
                table: format!("{} standardized", jurisdiction),
            })
        }
    }

    /// Union of DEPARTMENT TOTAL departments in both tables, minus ignored ones
    fn departments<'t>(&self, a: &'t StandardizedTable, b: &'t StandardizedTable) -> BTreeSet<&'t str> {
        static TOTAL: FundingSource = FundingSource::DepartmentTotal;
        a.funding_source_rows(&TOTAL)
            .chain(b.funding_source_rows(&TOTAL))
            .map(|(dept, _)| dept)
            .filter(|dept| !self.is_ignored(dept))
            .collect()
    }

    fn level(table: &StandardizedTable, department: &str, year: &str) -> f64 {
        table
            .amount(department, &FundingSource::DepartmentTotal, year)
            .unwrap_or(0.0)
    }

    /// Compare both states' DEPARTMENT TOTAL for one year
    pub fn point_in_time(
        &self,
        a: &StandardizedTable,
        b: &StandardizedTable,
        year: &str,
    ) -> Result<PointInTimeComparison, PipelineError> {
        Self::require_year(a, year, self.jurisdiction_a)?;
        Self::require_year(b, year, self.jurisdiction_b)?;

        let records = self
            .departments(a, b)
            .into_iter()
            .map(|dept| ComparisonRecord {
                department: dept.to_string(),
                amount_a: Self::level(a, dept, year),
                amount_b: Self::level(b, dept, year),
            })
            .collect();

        Ok(PointInTimeComparison {
            year: year.to_string(),
            jurisdiction_a: self.jurisdiction_a,
            jurisdiction_b: self.jurisdiction_b,
            records,
        })
    }

    /// Levels, changes and the cross-state gap between two years
    pub fn through_time(
        &self,
        a: &StandardizedTable,
        b: &StandardizedTable,
        start_year: &str,
        end_year: &str,
    ) -> Result<ThroughTimeComparison, PipelineError> {
        for year in [start_year, end_year] {
            Self::require_year(a, year, self.jurisdiction_a)?;
            Self::require_year(b, year, self.jurisdiction_b)?;
        }

        let mut records: Vec<ThroughTimeRecord> = self
            .departments(a, b)
            .into_iter()
            .map(|dept| {
                let level_a = LevelChange::between(Self::level(a, dept, start_year), Self::level(a, dept, end_year));
                let level_b = LevelChange::between(Self::level(b, dept, start_year), Self::level(b, dept, end_year));
                let differential_start = level_a.start - level_b.start;
                let differential_end = level_a.end - level_b.end;

                ThroughTimeRecord {
                    department: dept.to_string(),
                    a: level_a,
                    b: level_b,
                    differential_start,
                    differential_end,
                    differential_change: differential_end - differential_start,
                }
            })
            .collect();

        records.sort_by(|x, y| match y.a.end.total_cmp(&x.a.end) {
            Ordering::Equal => x.department.cmp(&y.department),
            other => other,
        });

        Ok(ThroughTimeComparison {
            start_year: start_year.to_string(),
            end_year: end_year.to_string(),
            jurisdiction_a: self.jurisdiction_a,
            jurisdiction_b: self.jurisdiction_b,
            records,
        })
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(Jurisdiction::Maine, Jurisdiction::NewHampshire)
    }
}

/// SHA-256 over every comparison number, for rerun checks
pub fn comparison_fingerprint(point: &[PointInTimeComparison], through: Option<&ThroughTimeComparison>) -> String {
    let mut hasher = Sha256::new();
    for comparison in point {
        hasher.update(comparison.year.as_bytes());
        for r in &comparison.records {
            hasher.update(r.department.as_bytes());
            hasher.update(r.amount_a.to_bits().to_le_bytes());
            hasher.update(r.amount_b.to_bits().to_le_bytes());
        }
        hasher.update([0x1e]);
    }
    if let Some(through) = through {
        hasher.update(through.start_year.as_bytes());
        hasher.update(through.end_year.as_bytes());
        for r in &through.records {
            hasher.update(r.department.as_bytes());
            for value in [
                r.a.start,
                r.a.end,
                r.a.change,
                r.b.start,
                r.b.end,
                r.b.change,
                r.differential_start,
                r.differential_end,
                r.differential_change,
            ] {
                hasher.update(value.to_bits().to_le_bytes());
            }
            for pct in [r.a.pct_change, r.b.pct_change] {
                match pct {
                    Some(p) => hasher.update(p.to_bits().to_le_bytes()),
                    None => hasher.update([0xff]),
                }
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LineItemKey;

    fn table(rows: &[(&str, &str, f64)]) -> StandardizedTable {
        let mut t = StandardizedTable::new();
        for (dept, year, amount) in rows {
            t.set_amount(LineItemKey::department_total(dept), year, *amount);
        }
        t
    }

    #[test]
    fn test_missing_department_compares_as_zero() {
        let me = table(&[("Z", "2025", 50.0), ("A", "2025", 10.0)]);
        let nh = table(&[("A", "2025", 12.0)]);

        let comparison = Comparator::default().point_in_time(&me, &nh, "2025").unwrap();
        let z = comparison.record("Z").unwrap();

        assert_eq!(z.amount_a, 50.0);
        assert_eq!(z.amount_b, 0.0);
        assert_eq!(comparison.records.len(), 2);
        println!("✅ {}", comparison.summary());
    }

    #[test]
    fn test_absent_year_is_an_error() {
        let me = table(&[("A", "2025", 10.0)]);
        let nh = table(&[("A", "2024", 12.0)]);

        let err = Comparator::default().point_in_time(&me, &nh, "2025").unwrap_err();
        assert!(matches!(err, PipelineError::YearNotPresent { ref year, .. } if year == "2025"));
    }

    #[test]
    fn test_ignored_departments_and_total_skipped() {
        let me = table(&[("A", "2025", 10.0), ("TOTAL", "2025", 30.0), ("B", "2025", 20.0)]);
        let nh = table(&[("A", "2025", 12.0)]);

        let comparison = Comparator::default()
            .with_ignored(&["b"])
            .point_in_time(&me, &nh, "2025")
            .unwrap();

        let departments: Vec<&str> = comparison.records.iter().map(|r| r.department.as_str()).collect();
        assert_eq!(departments, vec!["A"]);
    }

    #[test]
    fn test_through_time_zero_start_is_none() {
        let me = table(&[("NEW", "2020", 0.0), ("NEW", "2024", 25.0)]);
        let nh = table(&[("NEW", "2020", 5.0), ("NEW", "2024", 10.0)]);

        let result = Comparator::default().through_time(&me, &nh, "2020", "2024").unwrap();
        let record = result.record("NEW").unwrap();

        assert_eq!(record.a.pct_change, None);
        assert_eq!(record.a.change, 25.0);
        assert_eq!(record.b.pct_change, Some(100.0));
        assert_eq!(record.differential_start, -5.0);
        assert_eq!(record.differential_end, 15.0);
        assert_eq!(record.differential_change, 20.0);
    }

    #[test]
    fn test_through_time_sorted_by_a_end_level() {
        let me = table(&[
            ("SMALL", "2020", 1.0),
            ("SMALL", "2024", 2.0),
            ("BIG", "2020", 10.0),
            ("BIG", "2024", 90.0),
            ("TIE", "2024", 2.0),
        ]);
        let nh = table(&[("BIG", "2020", 1.0), ("BIG", "2024", 1.0)]);

        let result = Comparator::default().through_time(&me, &nh, "2020", "2024").unwrap();
        let order: Vec<&str> = result.records.iter().map(|r| r.department.as_str()).collect();

        assert_eq!(order, vec!["BIG", "SMALL", "TIE"]);
        assert_eq!(result.widest_gap_growth(1)[0].department, "BIG");
    }

    #[test]
    fn test_percent_change_never_infinite() {
        assert_eq!(percent_change(0.0, 10.0), None);
        assert_eq!(percent_change(0.0, 0.0), None);
        assert_eq!(percent_change(f64::MIN_POSITIVE, f64::MAX), None);
        assert_eq!(percent_change(50.0, 75.0), Some(50.0));
    }

    #[test]
    fn test_fingerprint_stable() {
        let me = table(&[("A", "2024", 1.0), ("A", "2025", 2.0)]);
        let nh = table(&[("A", "2024", 3.0), ("A", "2025", 4.0)]);
        let comparator = Comparator::default();

        let run = || {
            let point = vec![comparator.point_in_time(&me, &nh, "2025").unwrap()];
            let through = comparator.through_time(&me, &nh, "2024", "2025").unwrap();
            comparison_fingerprint(&point, Some(&through))
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_fingerprint_covers_differentials() {
        let me = table(&[("A", "2024", 1.0), ("A", "2025", 2.0)]);
        let nh = table(&[("A", "2024", 3.0), ("A", "2025", 4.0)]);
        let through = Comparator::default().through_time(&me, &nh, "2024", "2025").unwrap();

        let mut shifted = through.clone();
        shifted.records[0].differential_start += 1.0;
        shifted.records[0].differential_end += 1.0;

        assert_ne!(
            comparison_fingerprint(&[], Some(&through)),
            comparison_fingerprint(&[], Some(&shifted))
        );
    }
}
