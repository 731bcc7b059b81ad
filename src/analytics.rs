// 📊 Analytics Views - Read-only slices of a reconciled or standardized table
//
// These feed the presentation layer. Missing cells are zero here, and the
// aggregate rows (TOTAL, the raw grand-total sentinel) never show up as
// departments. Scaling and rounding stay with the consumer.

use crate::errors::PipelineError;
use crate::table::{
    BudgetTable, FundingSource, YearAmounts, DEFAULT_GRAND_TOTAL_DEPARTMENT, TOTAL_DEPARTMENT,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Bucket name for everything below the top N
pub const ALL_OTHERS: &str = "ALL OTHERS";

fn is_aggregate(department: &str) -> bool {
    department == TOTAL_DEPARTMENT || department == DEFAULT_GRAND_TOTAL_DEPARTMENT
}

/// Every year of the table, zero where the cell is missing
fn dense(table: &BudgetTable, amounts: Option<&YearAmounts>) -> YearAmounts {
    table
        .years()
        .map(|year| {
            let value = amounts.and_then(|a| a.get(year)).copied().unwrap_or(0.0);
            (year.clone(), value)
        })
        .collect()
}

// ============================================================================
// FUNDING SOURCE VIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingSourceView {
    pub funding_source: String,
    pub rows: BTreeMap<String, YearAmounts>,
}

impl FundingSourceView {
    /// Sum across departments per year
    pub fn totals(&self) -> YearAmounts {
        let mut totals = YearAmounts::new();
        for amounts in self.rows.values() {
            for (year, amount) in amounts {
                *totals.entry(year.clone()).or_insert(0.0) += amount;
            }
        }
        totals
    }
}

/// One funding source across departments (e.g. GENERAL FUND by department)
pub fn funding_source_view(table: &BudgetTable, funding_source: &FundingSource) -> FundingSourceView {
    let rows = table
        .funding_source_rows(funding_source)
        .filter(|(dept, _)| !is_aggregate(dept))
        .map(|(dept, amounts)| (dept.to_string(), dense(table, Some(amounts))))
        .collect();

    FundingSourceView {
        funding_source: funding_source.label().to_string(),
        rows,
    }
}

/// Table without the named departments (e.g. "everything but the big three")
pub fn exclude_departments(table: &BudgetTable, departments: &[&str]) -> BudgetTable {
    table.filter(|key| !departments.contains(&key.department.as_str()))
}

// ============================================================================
// TOP DEPARTMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentBar {
    pub department: String,
    pub amount: f64,
    pub prior_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopDepartmentsView {
    pub year: String,
    pub prior_year: Option<String>,
    pub bars: Vec<DepartmentBar>,
}

/// Largest departments by DEPARTMENT TOTAL for a year
pub struct TopDepartments {
    year: String,
    top_n: usize,
    exclude: Vec<String>,
    all_others: bool,
    prior_year: Option<String>,
}

impl TopDepartments {
    pub fn new(year: &str) -> Self {
        TopDepartments {
            year: year.to_string(),
            top_n: 10,
            exclude: vec![TOTAL_DEPARTMENT.to_string()],
            all_others: false,
            prior_year: None,
        }
    }

    pub fn top(mut self, n: usize) -> Self {
        self.top_n = n;
        self
    }

    pub fn excluding(mut self, departments: &[&str]) -> Self {
        self.exclude.extend(departments.iter().map(|d| d.to_string()));
        self
    }

    pub fn with_all_others(mut self) -> Self {
        self.all_others = true;
        self
    }

    pub fn with_prior_year(mut self, year: &str) -> Self {
        self.prior_year = Some(year.to_string());
        self
    }

    pub fn compute(&self, table: &BudgetTable) -> Result<TopDepartmentsView, PipelineError> {
        for year in std::iter::once(&self.year).chain(self.prior_year.as_ref()) {
            if !table.has_year(year) {
                return Err(PipelineError::YearNotPresent {
                    year: year.clone(),
                    table: "top departments".to_string(),
                });
            }
        }

        let total = FundingSource::DepartmentTotal;
        let mut bars: Vec<DepartmentBar> = table
            .funding_source_rows(&total)
            .filter(|(dept, _)| !is_aggregate(dept) && !self.exclude.iter().any(|e| e == dept))
            .map(|(dept, amounts)| DepartmentBar {
                department: dept.to_string(),
                amount: amounts.get(&self.year).copied().unwrap_or(0.0),
                prior_amount: self
                    .prior_year
                    .as_ref()
                    .map(|y| amounts.get(y).copied().unwrap_or(0.0)),
            })
            .collect();

        bars.sort_by(|a, b| match b.amount.total_cmp(&a.amount) {
            Ordering::Equal => a.department.cmp(&b.department),
            other => other,
        });

        if bars.len() > self.top_n {
            let rest = bars.split_off(self.top_n);
            if self.all_others {
                bars.push(DepartmentBar {
                    department: ALL_OTHERS.to_string(),
                    amount: rest.iter().map(|b| b.amount).sum(),
                    prior_amount: self
                        .prior_year
                        .as_ref()
                        .map(|_| rest.iter().filter_map(|b| b.prior_amount).sum()),
                });
            }
        }

        Ok(TopDepartmentsView {
            year: self.year.clone(),
            prior_year: self.prior_year.clone(),
            bars,
        })
    }
}

// ============================================================================
// SMALL DEPARTMENT SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallDepartmentPoint {
    pub year: String,

    /// Mean DEPARTMENT TOTAL over departments with a non-zero amount
    pub mean_size: Option<f64>,

    /// Departments with a positive amount
    pub count: usize,
}

/// Per year: how big the typical non-major department is, and how many there are
pub fn small_department_summary(table: &BudgetTable, big_departments: &[&str]) -> Vec<SmallDepartmentPoint> {
    let total = FundingSource::DepartmentTotal;
    let rows: Vec<YearAmounts> = table
        .funding_source_rows(&total)
        .filter(|(dept, _)| !is_aggregate(dept) && !big_departments.contains(dept))
        .map(|(_, amounts)| dense(table, Some(amounts)))
        .collect();

    table
        .years()
        .map(|year| {
            let non_zero: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.get(year).copied())
                .filter(|v| *v != 0.0)
                .collect();
            let mean_size = if non_zero.is_empty() {
                None
            } else {
                Some(non_zero.iter().sum::<f64>() / non_zero.len() as f64)
            };
            SmallDepartmentPoint {
                year: year.clone(),
                mean_size,
                count: non_zero.iter().filter(|v| **v > 0.0).count(),
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
