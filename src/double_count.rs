// 🔍 Double-Count Resolver - Find dollars already claimed by sub-department rules
//
// Some departments split across standardized functions: part of Maine's
// Education budget belongs under Health & Human Services in New Hampshire's
// structure. The sub-department tier moves that slice; before the direct
// tier maps the department total, the same slice must come out of the pool
// or it is counted twice.
//
// Claimed table = matched rows ∪ per-department "already mapped" totals.
// Caller computes: remainder = raw − claimed (missing cells are zero).

use crate::jurisdiction::Jurisdiction;
use crate::mapping::CategoryMapping;
use crate::table::{LineItemKey, LineItemTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// SUB-DEPARTMENT MATCH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDepartmentMatch {
    /// Raw row claimed by the rule
    pub key: LineItemKey,

    /// Where the sub-department path sends it
    pub standardized: String,
}

// ============================================================================
// CLAIMED AMOUNTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedAmounts {
    /// Matched rows plus synthetic department-total rows
    pub table: LineItemTable,

    /// Every row matched, in table order
    pub matches: Vec<SubDepartmentMatch>,
}

impl ClaimedAmounts {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// `raw` with the claimed slices taken out
    pub fn subtract_from(&self, raw: &LineItemTable) -> LineItemTable {
        raw.subtract(&self.table)
    }

    pub fn is_claimed(&self, key: &LineItemKey) -> bool {
        self.matches.iter().any(|m| &m.key == key)
    }
}

// ============================================================================
// DOUBLE-COUNT RESOLVER
// ============================================================================

pub struct DoubleCountResolver<'a> {
    mapping: &'a CategoryMapping,
}

impl<'a> DoubleCountResolver<'a> {
    pub fn new(mapping: &'a CategoryMapping) -> Self {
        DoubleCountResolver { mapping }
    }

    /// Amounts claimed by the sub-department tier for one jurisdiction
    pub fn resolve(&self, jurisdiction: Jurisdiction, table: &LineItemTable) -> ClaimedAmounts {
        let mut claimed = LineItemTable::with_years(table.years().cloned());
        let mut matches = Vec::new();

        for (key, amounts) in table.rows() {
            let Some(rule) = self
                .mapping
                .sub_department_rule(jurisdiction, &key.department, &key.funding_source)
            else {
                continue;
            };

            debug!(%key, target = %rule.standardized, "sub-department match");
            matches.push(SubDepartmentMatch {
                key: key.clone(),
                standardized: rule.standardized.clone(),
            });

            // Roll up into the department's "already mapped" total
            claimed.add_row(LineItemKey::department_total(&key.department), amounts);

            // A rule on the total itself is already covered by the roll-up
            if !key.funding_source.is_department_total() {
                claimed.add_row(key.clone(), amounts);
            }
        }

        ClaimedAmounts {
            table: claimed,
            matches,
        }
    }

    /// Convenience: the pool left for the direct tier, plus what was claimed
    pub fn remainder(&self, jurisdiction: Jurisdiction, table: &LineItemTable) -> (LineItemTable, ClaimedAmounts) {
        let claimed = self.resolve(jurisdiction, table);
        (claimed.subtract_from(table), claimed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FundingSource;

    fn set(table: &mut LineItemTable, dept: &str, fs: &str, year: &str, amount: f64) {
        table.set_amount(LineItemKey::new(dept, FundingSource::parse(fs)), year, amount);
    }

    fn scenario() -> (CategoryMapping, LineItemTable) {
        let mapping = CategoryMapping::new()
            .with_direct(Jurisdiction::Maine, "B", "X")
            .with_sub_department(Jurisdiction::Maine, "B", "GRANTS", "Y");

        let mut raw = LineItemTable::new();
        set(&mut raw, "B", "DEPARTMENT TOTAL", "2023", 500.0);
        set(&mut raw, "B", "GRANTS", "2023", 80.0);
        (mapping, raw)
    }

    #[test]
    fn test_claimed_rows_and_rollup() {
        let (mapping, raw) = scenario();
        let claimed = DoubleCountResolver::new(&mapping).resolve(Jurisdiction::Maine, &raw);

        assert_eq!(claimed.matches.len(), 1);
        assert_eq!(claimed.matches[0].standardized, "Y");
        assert_eq!(claimed.table.amount("B", &FundingSource::regular("GRANTS"), "2023"), Some(80.0));
        assert_eq!(claimed.table.amount("B", &FundingSource::DepartmentTotal, "2023"), Some(80.0));
    }

    #[test]
    fn test_remainder_removes_claimed_slice() {
        let (mapping, raw) = scenario();
        let (remainder, claimed) = DoubleCountResolver::new(&mapping).remainder(Jurisdiction::Maine, &raw);

        assert_eq!(remainder.amount("B", &FundingSource::DepartmentTotal, "2023"), Some(420.0));
        assert_eq!(remainder.amount("B", &FundingSource::regular("GRANTS"), "2023"), Some(0.0));
        assert!(claimed.is_claimed(&LineItemKey::new("B", FundingSource::regular("GRANTS"))));
    }

    #[test]
    fn test_multiple_rules_roll_up_per_department() {
        let mapping = CategoryMapping::new()
            .with_sub_department(Jurisdiction::Maine, "B", "GRANTS", "Y")
            .with_sub_department(Jurisdiction::Maine, "B", "LOANS", "Z");

        let mut raw = LineItemTable::new();
        set(&mut raw, "B", "DEPARTMENT TOTAL", "2023", 500.0);
        set(&mut raw, "B", "GRANTS", "2023", 80.0);
        set(&mut raw, "B", "LOANS", "2023", 20.0);
        set(&mut raw, "B", "LOANS", "2024", 30.0);

        let claimed = DoubleCountResolver::new(&mapping).resolve(Jurisdiction::Maine, &raw);

        assert_eq!(claimed.table.amount("B", &FundingSource::DepartmentTotal, "2023"), Some(100.0));
        assert_eq!(claimed.table.amount("B", &FundingSource::DepartmentTotal, "2024"), Some(30.0));
    }

    #[test]
    fn test_rule_on_department_total_not_doubled() {
        let mapping = CategoryMapping::new().with_sub_department(Jurisdiction::Maine, "B", "DEPARTMENT TOTAL", "Y");

        let mut raw = LineItemTable::new();
        set(&mut raw, "B", "DEPARTMENT TOTAL", "2023", 500.0);

        let (remainder, _) = DoubleCountResolver::new(&mapping).remainder(Jurisdiction::Maine, &raw);
        assert_eq!(remainder.amount("B", &FundingSource::DepartmentTotal, "2023"), Some(0.0));
    }

    #[test]
    fn test_other_jurisdiction_rules_ignored() {
        let (mapping, raw) = scenario();
        let claimed = DoubleCountResolver::new(&mapping).resolve(Jurisdiction::NewHampshire, &raw);

        assert!(claimed.is_empty());
        assert!(claimed.table.is_empty());
    }
}
