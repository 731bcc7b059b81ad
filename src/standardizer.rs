// 🗂️ Standardizer - Map a jurisdiction's departments onto the shared taxonomy
//
// Order matters:
//   1. sub-department path: matched rows → <target> / DEPARTMENT TOTAL
//   2. remainder = table − claimed (see double_count.rs)
//   3. direct path: remainder rows → <standardized> / <same funding source>
//   4. union of both paths, summed per (department, funding source)
//
// Running the direct path on the unreduced table would count every
// sub-mapped slice twice.

use crate::data_quality::{IssueKind, QualityIssue, Severity};
use crate::double_count::{ClaimedAmounts, DoubleCountResolver};
use crate::jurisdiction::Jurisdiction;
use crate::mapping::CategoryMapping;
use crate::table::{
    FundingSource, LineItemKey, LineItemTable, StandardizedTable, YearAmounts, TOTAL_DEPARTMENT,
    UNMAPPED_DEPARTMENT,
};
use std::collections::BTreeSet;
use tracing::info;

/// Result of standardizing one jurisdiction
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizationOutcome {
    pub jurisdiction: Jurisdiction,
    pub table: StandardizedTable,

    /// What the sub-department tier took before the direct tier ran
    pub claimed: ClaimedAmounts,

    /// Unmapped departments and unallocated remainders
    pub issues: Vec<QualityIssue>,
}

pub struct Standardizer<'a> {
    mapping: &'a CategoryMapping,

    /// Departments passed through under their own name (default: TOTAL)
    reserved: Vec<String>,

    /// Remainders smaller than this are treated as fully claimed
    pub tolerance: f64,
}

impl<'a> Standardizer<'a> {
    pub fn new(mapping: &'a CategoryMapping) -> Self {
        Standardizer {
            mapping,
            reserved: vec![TOTAL_DEPARTMENT.to_string()],
            tolerance: 0.005,
        }
    }

    pub fn with_reserved(mut self, departments: &[&str]) -> Self {
        self.reserved = departments.iter().map(|d| d.to_string()).collect();
        self
    }

    fn is_reserved(&self, department: &str) -> bool {
        self.reserved.iter().any(|r| r == department)
    }

    pub fn standardize(&self, jurisdiction: Jurisdiction, table: &LineItemTable) -> StandardizationOutcome {
        // Step 1: sub-department path
        let claimed = DoubleCountResolver::new(self.mapping).resolve(jurisdiction, table);
        let sub_path = self.sub_department_path(table, &claimed);

        // Step 2: pool left for the direct tier
        let remainder = claimed.subtract_from(table);

        // Step 3: direct path
        let (direct_path, issues) = self.direct_path(jurisdiction, &remainder, &claimed);

        // Step 4: union, colliding keys summed
        let mut standardized = sub_path;
        standardized.merge(&direct_path);

        info!(
            jurisdiction = jurisdiction.code(),
            rows_in = table.len(),
            rows_out = standardized.len(),
            sub_department_matches = claimed.matches.len(),
            "standardized"
        );

        StandardizationOutcome {
            jurisdiction,
            table: standardized,
            claimed,
            issues,
        }
    }

    fn sub_department_path(&self, table: &LineItemTable, claimed: &ClaimedAmounts) -> StandardizedTable {
        let mut path = StandardizedTable::with_years(table.years().cloned());
        for matched in &claimed.matches {
            if let Some(amounts) = table.get(&matched.key) {
                path.add_row(LineItemKey::department_total(&matched.standardized), amounts);
            }
        }
        path
    }

    fn direct_path(
        &self,
        jurisdiction: Jurisdiction,
        remainder: &LineItemTable,
        claimed: &ClaimedAmounts,
    ) -> (StandardizedTable, Vec<QualityIssue>) {
        let mut path = StandardizedTable::with_years(remainder.years().cloned());
        let mut unmapped: BTreeSet<&str> = BTreeSet::new();
        let mut unallocated: BTreeSet<&str> = BTreeSet::new();

        for (key, amounts) in remainder.rows() {
            let department = key.department.as_str();

            // Fully claimed line items have nothing left to map
            if claimed.is_claimed(key) && self.is_negligible(amounts) {
                continue;
            }

            if self.is_reserved(department) {
                path.add_row(key.clone(), amounts);
                continue;
            }

            if let Some(standardized) = self.mapping.standardize(jurisdiction, department) {
                path.add_row(LineItemKey::new(standardized, key.funding_source.clone()), amounts);
                continue;
            }

            if self.mapping.has_sub_department_rule(jurisdiction, department) {
                // Partly mapped: leftovers are parked, but only the department
                // total decides whether dollars went unallocated
                if !self.is_negligible(amounts) {
                    if key.funding_source.is_department_total() {
                        unallocated.insert(department);
                    }
                    self.park_unmapped(&mut path, &key.funding_source, amounts);
                }
            } else {
                unmapped.insert(department);
                self.park_unmapped(&mut path, &key.funding_source, amounts);
            }
        }

        let mut issues: Vec<QualityIssue> = unmapped
            .into_iter()
            .map(|dept| QualityIssue::unmapped(jurisdiction, dept))
            .collect();

        issues.extend(unallocated.into_iter().map(|dept| {
            QualityIssue::new(
                Severity::Critical,
                IssueKind::UnallocatedRemainder,
                Some(jurisdiction),
                dept,
                format!(
                    "{} department '{}' has dollars left after sub-department mapping but no direct rule",
                    jurisdiction, dept
                ),
                "Add a direct rule for the remainder or extend the sub-department rules",
            )
        }));

        (path, issues)
    }

    /// Unmapped dollars stay visible under a single bucket
    fn park_unmapped(&self, path: &mut StandardizedTable, funding_source: &FundingSource, amounts: &YearAmounts) {
        path.add_row(LineItemKey::new(UNMAPPED_DEPARTMENT, funding_source.clone()), amounts);
    }

    fn is_negligible(&self, amounts: &YearAmounts) -> bool {
        amounts.values().all(|v| v.abs() < self.tolerance)
    }
}

// ============================================================================
// TESTS
// ============================================================================
