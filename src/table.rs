// 📒 Budget Tables - The common currency between all pipeline stages
//
// A table maps (Department, Funding Source) → (Year → Amount).
// Absent years are missing values; they count as zero only when summed.
// Every stage builds a new table instead of mutating its input.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Funding source carrying a department's full budget
pub const DEPARTMENT_TOTAL: &str = "DEPARTMENT TOTAL";

/// Derived funding source: department total minus the exclusion fund
pub const DEPARTMENT_TOTAL_EX_FEDERAL: &str = "DEPARTMENT TOTAL ex FEDERAL";

/// Department holding the recomputed sum across all departments
pub const TOTAL_DEPARTMENT: &str = "TOTAL";

/// Sentinel department of the raw grand-total rows in the Maine headline table
pub const DEFAULT_GRAND_TOTAL_DEPARTMENT: &str = "GRAND TOTALS - ALL DEPARTMENTS";

/// Standardized bucket for dollars whose department has no mapping rule
pub const UNMAPPED_DEPARTMENT: &str = "UNMAPPED";

// ============================================================================
// FUNDING SOURCE
// ============================================================================

/// FundingSource - role of a row within its department
///
/// Ordering, equality and hashing all go through `label()`, so sorting a
/// table is plain lexicographic order on the printed names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FundingSource {
    /// The department's whole budget
    DepartmentTotal,

    /// Department total minus the exclusion fund
    ExFederal,

    /// Any fund reported as-is (GENERAL FUND, HIGHWAY FUND, ...)
    Regular(String),
}

impl FundingSource {
    /// Classify a label read from a source document
    pub fn parse(label: &str) -> Self {
        let label = label.trim();
        if label == DEPARTMENT_TOTAL {
            FundingSource::DepartmentTotal
        } else if label == DEPARTMENT_TOTAL_EX_FEDERAL {
            FundingSource::ExFederal
        } else {
            FundingSource::Regular(label.to_string())
        }
    }

    pub fn regular(label: &str) -> Self {
        Self::parse(label)
    }

    pub fn label(&self) -> &str {
        match self {
            FundingSource::DepartmentTotal => DEPARTMENT_TOTAL,
            FundingSource::ExFederal => DEPARTMENT_TOTAL_EX_FEDERAL,
            FundingSource::Regular(name) => name,
        }
    }

    pub fn is_department_total(&self) -> bool {
        matches!(self, FundingSource::DepartmentTotal)
    }

    /// True for rows computed from other rows of the same department
    pub fn is_derived(&self) -> bool {
        !matches!(self, FundingSource::Regular(_))
    }
}

impl PartialEq for FundingSource {
    fn eq(&self, other: &Self) -> bool {
        self.label() == other.label()
    }
}

impl Eq for FundingSource {}

impl Hash for FundingSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label().hash(state);
    }
}

impl PartialOrd for FundingSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FundingSource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label().cmp(other.label())
    }
}

impl fmt::Display for FundingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for FundingSource {
    fn from(label: String) -> Self {
        FundingSource::parse(&label)
    }
}

impl From<FundingSource> for String {
    fn from(source: FundingSource) -> Self {
        source.label().to_string()
    }
}

// ============================================================================
// ROW KEY + FLAT RECORD
// ============================================================================

/// Row key; derived ordering sorts by department, then funding source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineItemKey {
    pub department: String,
    pub funding_source: FundingSource,
}

impl LineItemKey {
    pub fn new(department: &str, funding_source: FundingSource) -> Self {
        LineItemKey {
            department: department.trim().to_string(),
            funding_source,
        }
    }

    pub fn department_total(department: &str) -> Self {
        Self::new(department, FundingSource::DepartmentTotal)
    }
}

impl fmt::Display for LineItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.department, self.funding_source)
    }
}

/// One (department, funding source, year, amount) fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRecord {
    #[serde(rename = "Department")]
    pub department: String,

    #[serde(rename = "Funding Source")]
    pub funding_source: String,

    #[serde(rename = "Year")]
    pub year: String,

    #[serde(rename = "Amount")]
    pub amount: f64,
}

pub type YearAmounts = BTreeMap<String, f64>;

// ============================================================================
// BUDGET TABLE
// ============================================================================

/// BudgetTable - rows keyed by (department, funding source), wide by year
///
/// The year set is tracked separately from the rows so a fiscal year whose
/// cells are all missing still counts as present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "TableRecords", from = "TableRecords")]
pub struct BudgetTable {
    years: BTreeSet<String>,
    rows: BTreeMap<LineItemKey, YearAmounts>,
}

/// Serialized form: the year set plus one record per present cell
#[derive(Serialize, Deserialize)]
struct TableRecords {
    years: Vec<String>,
    records: Vec<LineItemRecord>,
}

impl From<BudgetTable> for TableRecords {
    fn from(table: BudgetTable) -> Self {
        TableRecords {
            records: table.records(),
            years: table.years.into_iter().collect(),
        }
    }
}

impl From<TableRecords> for BudgetTable {
    fn from(repr: TableRecords) -> Self {
        let mut table = BudgetTable::with_years(repr.years);
        for record in repr.records {
            let key = LineItemKey::new(&record.department, FundingSource::parse(&record.funding_source));
            table.add_amount(key, &record.year, record.amount);
        }
        table
    }
}

/// Raw or reconciled table in a jurisdiction's own department names
pub type LineItemTable = BudgetTable;

/// Table keyed by standardized department names
pub type StandardizedTable = BudgetTable;

impl BudgetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_years<I, S>(years: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BudgetTable {
            years: years.into_iter().map(Into::into).collect(),
            rows: BTreeMap::new(),
        }
    }

    /// Build a table from flat records, summing duplicates
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = LineItemRecord>,
    {
        let mut table = BudgetTable::new();
        for record in records {
            let key = LineItemKey::new(&record.department, FundingSource::parse(&record.funding_source));
            table.add_amount(key, &record.year, record.amount);
        }
        table
    }

    pub fn add_year(&mut self, year: &str) {
        self.years.insert(year.to_string());
    }

    /// Add `amount` to the cell, creating row and year as needed
    pub fn add_amount(&mut self, key: LineItemKey, year: &str, amount: f64) {
        self.years.insert(year.to_string());
        *self
            .rows
            .entry(key)
            .or_default()
            .entry(year.to_string())
            .or_insert(0.0) += amount;
    }

    /// Overwrite the cell
    pub fn set_amount(&mut self, key: LineItemKey, year: &str, amount: f64) {
        self.years.insert(year.to_string());
        self.rows.entry(key).or_default().insert(year.to_string(), amount);
    }

    /// Add every present year of `amounts` into the row
    pub fn add_row(&mut self, key: LineItemKey, amounts: &YearAmounts) {
        let row = self.rows.entry(key).or_default();
        for (year, amount) in amounts {
            self.years.insert(year.clone());
            *row.entry(year.clone()).or_insert(0.0) += amount;
        }
    }

    /// Register a row even when it has no values (keeps the key visible)
    pub fn touch_row(&mut self, key: LineItemKey) {
        self.rows.entry(key).or_default();
    }

    pub fn get(&self, key: &LineItemKey) -> Option<&YearAmounts> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &LineItemKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn amount(&self, department: &str, funding_source: &FundingSource, year: &str) -> Option<f64> {
        self.rows
            .get(&LineItemKey::new(department, funding_source.clone()))
            .and_then(|row| row.get(year).copied())
    }

    pub fn years(&self) -> impl Iterator<Item = &String> {
        self.years.iter()
    }

    pub fn has_year(&self, year: &str) -> bool {
        self.years.contains(year)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&LineItemKey, &YearAmounts)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn departments(&self) -> BTreeSet<&str> {
        self.rows.keys().map(|k| k.department.as_str()).collect()
    }

    /// Rows of one funding source, keyed by department
    pub fn funding_source_rows<'a>(
        &'a self,
        funding_source: &'a FundingSource,
    ) -> impl Iterator<Item = (&'a str, &'a YearAmounts)> + 'a {
        self.rows
            .iter()
            .filter(move |(k, _)| &k.funding_source == funding_source)
            .map(|(k, v)| (k.department.as_str(), v))
    }

    /// Distinct funding sources in sorted order
    pub fn funding_sources(&self) -> BTreeSet<&FundingSource> {
        self.rows.keys().map(|k| &k.funding_source).collect()
    }

    /// New table with only the rows whose key passes `keep`
    pub fn filter<F>(&self, keep: F) -> BudgetTable
    where
        F: Fn(&LineItemKey) -> bool,
    {
        BudgetTable {
            years: self.years.clone(),
            rows: self
                .rows
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Sum `other` into this table (union of rows and years)
    pub fn merge(&mut self, other: &BudgetTable) {
        self.years.extend(other.years.iter().cloned());
        for (key, amounts) in &other.rows {
            self.add_row(key.clone(), amounts);
        }
    }

    /// `self - other`, treating a missing cell on either side as zero.
    ///
    /// A cell is present in the result when it is present on either side.
    pub fn subtract(&self, other: &BudgetTable) -> BudgetTable {
        let mut result = BudgetTable {
            years: self.years.union(&other.years).cloned().collect(),
            rows: BTreeMap::new(),
        };

        let keys: BTreeSet<&LineItemKey> = self.rows.keys().chain(other.rows.keys()).collect();
        for key in keys {
            let empty = YearAmounts::new();
            let left = self.rows.get(key).unwrap_or(&empty);
            let right = other.rows.get(key).unwrap_or(&empty);
            let years: BTreeSet<&String> = left.keys().chain(right.keys()).collect();

            let row = result.rows.entry(key.clone()).or_default();
            for year in years {
                let value = left.get(year).copied().unwrap_or(0.0) - right.get(year).copied().unwrap_or(0.0);
                row.insert(year.clone(), value);
            }
        }

        result
    }

    /// Sum of one funding source for a year across departments not in `excluded`
    pub fn sum_funding_source(&self, funding_source: &FundingSource, year: &str, excluded: &[&str]) -> f64 {
        self.funding_source_rows(funding_source)
            .filter(|(dept, _)| !excluded.contains(dept))
            .filter_map(|(_, amounts)| amounts.get(year))
            .sum()
    }

    /// Flatten to one record per present cell, in key then year order
    pub fn records(&self) -> Vec<LineItemRecord> {
        self.rows
            .iter()
            .flat_map(|(key, amounts)| {
                amounts.iter().map(move |(year, amount)| LineItemRecord {
                    department: key.department.clone(),
                    funding_source: key.funding_source.label().to_string(),
                    year: year.clone(),
                    amount: *amount,
                })
            })
            .collect()
    }

    /// SHA-256 over the exact bits of every cell.
    ///
    /// Two runs over identical inputs must produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for year in &self.years {
            hasher.update(year.as_bytes());
            hasher.update([0x1e]);
        }
        for record in self.records() {
            hasher.update(record.department.as_bytes());
            hasher.update([0x1f]);
            hasher.update(record.funding_source.as_bytes());
            hasher.update([0x1f]);
            hasher.update(record.year.as_bytes());
            hasher.update([0x1f]);
            hasher.update(record.amount.to_bits().to_le_bytes());
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// TESTS
// ============================================================================
