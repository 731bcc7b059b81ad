// 🏷️ Category Mapping - Rules as Data
// As-reported department names → shared standardized taxonomy
//
// Two tiers:
// - Direct:         (state, department)                 → standardized department
// - Sub-department: (state, department, funding source) → standardized department
//
// The mapping is built once and passed to every stage that needs it.

use crate::errors::PipelineError;
use crate::jurisdiction::Jurisdiction;
use crate::table::{BudgetTable, FundingSource};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// RULE DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectRule {
    pub jurisdiction: Jurisdiction,

    /// Department name exactly as printed in the source document
    pub as_reported: String,

    /// Upper-cased shared name
    pub standardized: String,

    /// Optional label for charts ("Health & Human Services")
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDepartmentRule {
    pub jurisdiction: Jurisdiction,
    pub as_reported: String,

    /// Only rows with this funding source are moved
    pub funding_source: FundingSource,

    pub standardized: String,
}

impl SubDepartmentRule {
    pub fn matches(&self, department: &str, funding_source: &FundingSource) -> bool {
        self.as_reported == department && &self.funding_source == funding_source
    }
}

// CSV row shapes: {State, As Reported, Standardized[, Shortened Name]}
#[derive(Debug, Deserialize)]
struct DirectRow {
    #[serde(rename = "State")]
    state: String,

    #[serde(rename = "As Reported")]
    as_reported: String,

    #[serde(rename = "Standardized")]
    standardized: String,

    #[serde(rename = "Shortened Name", default)]
    short_name: Option<String>,
}

// {State, As Reported, Funding Source, Standardized}
#[derive(Debug, Deserialize)]
struct SubDepartmentRow {
    #[serde(rename = "State")]
    state: String,

    #[serde(rename = "As Reported")]
    as_reported: String,

    #[serde(rename = "Funding Source")]
    funding_source: String,

    #[serde(rename = "Standardized")]
    standardized: String,
}

fn normalize_standardized(name: &str) -> String {
    name.trim().to_uppercase()
}

fn required(value: &str, column: &str, line: usize) -> Result<String, PipelineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PipelineError::InvalidMapping {
            line,
            reason: format!("empty '{}' column", column),
        });
    }
    Ok(value.to_string())
}

// ============================================================================
// CATEGORY MAPPING
// ============================================================================

/// CategoryMapping - immutable lookup for both mapping tiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMapping {
    direct: BTreeMap<(Jurisdiction, String), DirectRule>,
    sub_department: Vec<SubDepartmentRule>,
}

impl CategoryMapping {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Load both tiers from CSV files
    pub fn from_files<P: AsRef<Path>>(direct_path: P, sub_department_path: Option<P>) -> Result<Self> {
        let direct = File::open(direct_path.as_ref())
            .with_context(|| format!("Failed to open mapping file: {:?}", direct_path.as_ref()))?;

        match sub_department_path {
            Some(path) => {
                let sub = File::open(path.as_ref())
                    .with_context(|| format!("Failed to open sub-department mapping file: {:?}", path.as_ref()))?;
                Self::from_readers(direct, Some(sub))
            }
            None => Self::from_readers(direct, None::<File>),
        }
    }

    /// Load both tiers from any CSV readers
    pub fn from_readers<R: Read>(direct: R, sub_department: Option<R>) -> Result<Self> {
        let mut direct_rules = Vec::new();
        let mut rdr = csv::Reader::from_reader(direct);
        for (index, result) in rdr.deserialize::<DirectRow>().enumerate() {
            // +2: header row and 1-based numbering
            let line = index + 2;
            let row = result.with_context(|| format!("Failed to parse direct mapping row {}", line))?;
            direct_rules.push(DirectRule {
                jurisdiction: row.state.parse()?,
                as_reported: required(&row.as_reported, "As Reported", line)?,
                standardized: normalize_standardized(&required(&row.standardized, "Standardized", line)?),
                short_name: row.short_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            });
        }

        let mut sub_rules = Vec::new();
        if let Some(reader) = sub_department {
            let mut rdr = csv::Reader::from_reader(reader);
            for (index, result) in rdr.deserialize::<SubDepartmentRow>().enumerate() {
                let line = index + 2;
                let row = result.with_context(|| format!("Failed to parse sub-department mapping row {}", line))?;
                sub_rules.push(SubDepartmentRule {
                    jurisdiction: row.state.parse()?,
                    as_reported: required(&row.as_reported, "As Reported", line)?,
                    funding_source: FundingSource::parse(&required(&row.funding_source, "Funding Source", line)?),
                    standardized: normalize_standardized(&required(&row.standardized, "Standardized", line)?),
                });
            }
        }

        Ok(Self::from_rules(direct_rules, sub_rules)?)
    }

    /// Build from rule lists, rejecting names that map to two different targets
    pub fn from_rules(
        direct_rules: Vec<DirectRule>,
        sub_rules: Vec<SubDepartmentRule>,
    ) -> Result<Self, PipelineError> {
        let mut mapping = CategoryMapping::new();

        for (index, mut rule) in direct_rules.into_iter().enumerate() {
            rule.standardized = normalize_standardized(&rule.standardized);
            let key = (rule.jurisdiction, rule.as_reported.clone());
            if let Some(existing) = mapping.direct.get(&key) {
                if existing.standardized != rule.standardized {
                    return Err(PipelineError::InvalidMapping {
                        line: index + 2,
                        reason: format!(
                            "{} '{}' maps to both '{}' and '{}'",
                            rule.jurisdiction, rule.as_reported, existing.standardized, rule.standardized
                        ),
                    });
                }
                continue;
            }
            mapping.direct.insert(key, rule);
        }

        for (index, mut rule) in sub_rules.into_iter().enumerate() {
            rule.standardized = normalize_standardized(&rule.standardized);
            let clash = mapping.sub_department.iter().find(|r| {
                r.jurisdiction == rule.jurisdiction
                    && r.as_reported == rule.as_reported
                    && r.funding_source == rule.funding_source
            });
            match clash {
                Some(existing) if existing.standardized != rule.standardized => {
                    return Err(PipelineError::InvalidMapping {
                        line: index + 2,
                        reason: format!(
                            "{} '{}' / '{}' maps to both '{}' and '{}'",
                            rule.jurisdiction,
                            rule.as_reported,
                            rule.funding_source,
                            existing.standardized,
                            rule.standardized
                        ),
                    });
                }
                Some(_) => continue,
                None => mapping.sub_department.push(rule),
            }
        }

        Ok(mapping)
    }

    /// Builder pattern: add a direct rule (replaces an existing one)
    pub fn with_direct(mut self, jurisdiction: Jurisdiction, as_reported: &str, standardized: &str) -> Self {
        let as_reported = as_reported.trim();
        self.direct.insert(
            (jurisdiction, as_reported.to_string()),
            DirectRule {
                jurisdiction,
                as_reported: as_reported.to_string(),
                standardized: normalize_standardized(standardized),
                short_name: None,
            },
        );
        self
    }

    /// Builder pattern: add a sub-department rule
    pub fn with_sub_department(
        mut self,
        jurisdiction: Jurisdiction,
        as_reported: &str,
        funding_source: &str,
        standardized: &str,
    ) -> Self {
        self.sub_department.push(SubDepartmentRule {
            jurisdiction,
            as_reported: as_reported.trim().to_string(),
            funding_source: FundingSource::parse(funding_source),
            standardized: normalize_standardized(standardized),
        });
        self
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Standardized name for a department under the direct tier
    pub fn standardize(&self, jurisdiction: Jurisdiction, as_reported: &str) -> Option<&str> {
        self.direct
            .get(&(jurisdiction, as_reported.to_string()))
            .map(|rule| rule.standardized.as_str())
    }

    pub fn direct_rules(&self, jurisdiction: Jurisdiction) -> impl Iterator<Item = &DirectRule> {
        self.direct.values().filter(move |r| r.jurisdiction == jurisdiction)
    }

    pub fn sub_department_rules(&self, jurisdiction: Jurisdiction) -> impl Iterator<Item = &SubDepartmentRule> {
        self.sub_department.iter().filter(move |r| r.jurisdiction == jurisdiction)
    }

    /// Sub-department rule covering this exact row, if any
    pub fn sub_department_rule(
        &self,
        jurisdiction: Jurisdiction,
        department: &str,
        funding_source: &FundingSource,
    ) -> Option<&SubDepartmentRule> {
        self.sub_department_rules(jurisdiction)
            .find(|r| r.matches(department, funding_source))
    }

    pub fn has_direct_rule(&self, jurisdiction: Jurisdiction, as_reported: &str) -> bool {
        self.standardize(jurisdiction, as_reported).is_some()
    }

    pub fn has_sub_department_rule(&self, jurisdiction: Jurisdiction, as_reported: &str) -> bool {
        self.sub_department_rules(jurisdiction).any(|r| r.as_reported == as_reported)
    }

    /// Short label when one is configured, else the as-reported name
    pub fn display_name<'a>(&'a self, jurisdiction: Jurisdiction, as_reported: &'a str) -> &'a str {
        self.direct
            .get(&(jurisdiction, as_reported.to_string()))
            .and_then(|rule| rule.short_name.as_deref())
            .unwrap_or(as_reported)
    }

    /// Every standardized name used by a jurisdiction, sorted
    pub fn standardized_names(&self, jurisdiction: Jurisdiction) -> BTreeSet<&str> {
        self.direct_rules(jurisdiction)
            .map(|r| r.standardized.as_str())
            .chain(self.sub_department_rules(jurisdiction).map(|r| r.standardized.as_str()))
            .collect()
    }

    /// Departments in `table` with no rule in either tier.
    ///
    /// Names listed in `reserved` (e.g. the synthetic TOTAL) are skipped.
    pub fn unmapped_departments(
        &self,
        jurisdiction: Jurisdiction,
        table: &BudgetTable,
        reserved: &[&str],
    ) -> BTreeSet<String> {
        table
            .departments()
            .into_iter()
            .filter(|dept| !reserved.contains(dept))
            .filter(|dept| {
                !self.has_direct_rule(jurisdiction, dept) && !self.has_sub_department_rule(jurisdiction, dept)
            })
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.direct.len() + self.sub_department.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// TESTS
// ============================================================================
