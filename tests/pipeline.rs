// End-to-end checks of the budget pipeline through the public API

use budget_standardization::{
    export_run, load_inputs, load_mapping, percent_change, setup_database, verify_count, CategoryMapping, Comparator,
    DataQualityEngine, EconomicSeries, FundingSource, Jurisdiction, LineItemKey, LineItemTable, Pipeline,
    PipelineConfig, PipelineError, PipelineInputs, QualityReport, Standardizer, TotalReconciler,
    DEFAULT_GRAND_TOTAL_DEPARTMENT, TOTAL_DEPARTMENT,
};
use proptest::prelude::*;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;

fn set(table: &mut LineItemTable, dept: &str, fs: &str, year: &str, amount: f64) {
    table.set_amount(LineItemKey::new(dept, FundingSource::parse(fs)), year, amount);
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn basic_reconciliation_rebuilds_totals() {
    let mut raw = LineItemTable::new();
    set(&mut raw, "A", "GENERAL FUND", "2023", 100.0);
    set(&mut raw, "A", "FEDERAL FUND", "2023", 20.0);
    set(&mut raw, "A", "DEPARTMENT TOTAL", "2023", 120.0);
    set(&mut raw, "GRAND TOTAL", "DEPARTMENT TOTAL", "2023", 120.0);

    let reconciled = TotalReconciler::new()
        .with_grand_total_department("GRAND TOTAL")
        .with_exclusion_fund("FEDERAL FUND")
        .reconcile(Jurisdiction::Maine, &raw);
    let table = &reconciled.table;

    assert!(!table.departments().contains("GRAND TOTAL"));
    assert_eq!(table.amount("TOTAL", &FundingSource::DepartmentTotal, "2023"), Some(120.0));
    assert_eq!(table.amount("A", &FundingSource::ExFederal, "2023"), Some(100.0));
    assert_eq!(reconciled.report.discarded_rows, 1);
    assert!(reconciled.report.is_balanced());

    println!("✅ {}", reconciled.report.summary());
}

#[test]
fn sub_department_slice_is_not_counted_twice() {
    let mapping = CategoryMapping::new()
        .with_direct(Jurisdiction::Maine, "B", "X")
        .with_sub_department(Jurisdiction::Maine, "B", "GRANTS", "Y");

    let mut raw = LineItemTable::new();
    set(&mut raw, "B", "DEPARTMENT TOTAL", "2023", 500.0);
    set(&mut raw, "B", "GRANTS", "2023", 80.0);

    let outcome = Standardizer::new(&mapping).standardize(Jurisdiction::Maine, &raw);

    assert_eq!(outcome.table.amount("Y", &FundingSource::DepartmentTotal, "2023"), Some(80.0));
    assert_eq!(outcome.table.amount("X", &FundingSource::DepartmentTotal, "2023"), Some(420.0));
    assert!(outcome.issues.is_empty());
}

#[test]
fn department_missing_in_one_state_compares_as_zero() {
    let mut a = LineItemTable::new();
    set(&mut a, "Z", "DEPARTMENT TOTAL", "2025", 50.0);
    let mut b = LineItemTable::with_years(["2025"]);
    set(&mut b, "W", "DEPARTMENT TOTAL", "2025", 10.0);

    let comparison = Comparator::default().point_in_time(&a, &b, "2025").unwrap();
    let z = comparison.record("Z").unwrap();

    assert_eq!((z.amount_a, z.amount_b), (50.0, 0.0));
}

#[test]
fn index_rebases_to_start_year() {
    let raw = EconomicSeries::new(
        "CPI",
        "CPI",
        BTreeMap::from([("2016".to_string(), 100.0), ("2017".to_string(), 110.0)]),
    );
    let rebased = raw.rebase("2016", 1.0).unwrap();

    assert_eq!(rebased.get("2016"), Some(1.0));
    assert!((rebased.get("2017").unwrap() - 1.1).abs() < 1e-12);
}

#[test]
fn ex_fund_view_falls_back_to_department_total() {
    let mut raw = LineItemTable::new();
    set(&mut raw, "PARKS", "GENERAL FUND", "2024", 12.5);
    set(&mut raw, "PARKS", "DEPARTMENT TOTAL", "2024", 12.5);

    let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);
    let total = reconciled.table.amount("PARKS", &FundingSource::DepartmentTotal, "2024");

    assert_eq!(reconciled.table.amount("PARKS", &FundingSource::ExFederal, "2024"), total);
}

#[test]
fn zero_start_has_no_percent_change() {
    assert_eq!(percent_change(0.0, 75.0), None);
    assert_eq!(percent_change(50.0, 75.0), Some(50.0));

    let mut a = LineItemTable::new();
    set(&mut a, "NEW PROGRAM", "DEPARTMENT TOTAL", "2018", 0.0);
    set(&mut a, "NEW PROGRAM", "DEPARTMENT TOTAL", "2025", 75.0);
    let b = LineItemTable::with_years(["2018", "2025"]);

    let through = Comparator::default().through_time(&a, &b, "2018", "2025").unwrap();
    let record = through.record("NEW PROGRAM").unwrap();

    assert_eq!(record.a.change, 75.0);
    assert_eq!(record.a.pct_change, None);
    assert_eq!(record.b.pct_change, None);
}

#[test]
fn unmapped_names_are_reported_exactly() {
    let mapping = CategoryMapping::new().with_direct(Jurisdiction::NewHampshire, "EDUCATION", "Education");

    let mut raw = LineItemTable::new();
    set(&mut raw, "EDUCATION", "DEPARTMENT TOTAL", "2024", 10.0);
    set(&mut raw, "LOTTERY COMMISSION", "DEPARTMENT TOTAL", "2024", 3.0);
    set(&mut raw, "LIQUOR COMMISSION", "DEPARTMENT TOTAL", "2024", 4.0);

    let outcome = Standardizer::new(&mapping).standardize(Jurisdiction::NewHampshire, &raw);
    let mut report = QualityReport::new();
    report.extend(outcome.issues);

    let names: Vec<&str> = report.unmapped_names(Jurisdiction::NewHampshire).into_iter().collect();
    assert_eq!(names, vec!["LIQUOR COMMISSION", "LOTTERY COMMISSION"]);
    assert!(report.has_critical_issues());
}

// ============================================================================
// PROPERTIES
// ============================================================================

/// (department index, general fund, federal fund) rows for one year
fn departments() -> impl Strategy<Value = Vec<(u8, u32, u32)>> {
    prop::collection::vec((0u8..12, 0u32..1_000_000, 0u32..500_000), 1..15)
}

fn build(rows: &[(u8, u32, u32)]) -> (CategoryMapping, LineItemTable) {
    let mut mapping = CategoryMapping::new();
    let mut raw = LineItemTable::new();

    for &(index, general, federal) in rows {
        let dept = format!("DEPT {}", index);
        let key = |fs: &str| LineItemKey::new(&dept, FundingSource::parse(fs));
        raw.add_amount(key("GENERAL FUND"), "2024", f64::from(general) / 100.0);
        raw.add_amount(key("FEDERAL EXPENDITURES FUND"), "2024", f64::from(federal) / 100.0);
        raw.add_amount(key("DEPARTMENT TOTAL"), "2024", f64::from(general + federal) / 100.0);

        if !mapping.has_direct_rule(Jurisdiction::Maine, &dept) {
            // Several raw departments share one standardized name
            mapping = mapping.with_direct(Jurisdiction::Maine, &dept, &format!("FUNCTION {}", index % 4));
        }
    }

    if mapping.has_direct_rule(Jurisdiction::Maine, "DEPT 0") {
        mapping = mapping.with_sub_department(Jurisdiction::Maine, "DEPT 0", "FEDERAL EXPENDITURES FUND", "GRANTS");
    }

    (mapping, raw)
}

proptest! {
    #[test]
    fn standardization_conserves_department_totals(rows in departments()) {
        let (mapping, raw) = build(&rows);
        let reconciled = TotalReconciler::new().reconcile(Jurisdiction::Maine, &raw);
        let outcome = Standardizer::new(&mapping).standardize(Jurisdiction::Maine, &reconciled.table);

        let checks = DataQualityEngine::new().conservation_checks(
            Jurisdiction::Maine,
            &reconciled.table,
            &outcome.table,
            &[],
        );
        prop_assert!(!checks.is_empty());
        for check in checks {
            prop_assert!(check.conserved, "{:?}", check);
        }
    }

    #[test]
    fn standardization_is_deterministic(rows in departments()) {
        let (mapping, raw) = build(&rows);
        let standardizer = Standardizer::new(&mapping);

        let first = standardizer.standardize(Jurisdiction::Maine, &raw);
        let second = standardizer.standardize(Jurisdiction::Maine, &raw);

        prop_assert_eq!(first.table.fingerprint(), second.table.fingerprint());
        prop_assert_eq!(first.issues, second.issues);
    }
}

// ============================================================================
// FULL RUN FROM CONFIG
// ============================================================================

#[test]
fn config_driven_run_exports_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(
        root.join("department_mapping.csv"),
        "State,As Reported,Standardized\n\
         Maine,DEPT OF EDUCATION,Education\n\
         Maine,DEPT OF CONSERVATION,Parks\n\
         New Hampshire,EDUCATION,Education\n\
         New Hampshire,FISH AND GAME,Parks\n",
    )
    .unwrap();

    fs::write(
        root.join("maine.csv"),
        "Department,Funding Source,2018,2025\n\
         DEPT OF EDUCATION,GENERAL FUND,\"1,000\",\"1,200\"\n\
         DEPT OF EDUCATION,FEDERAL EXPENDITURES FUND,300,350\n\
         DEPT OF EDUCATION,DEPARTMENT TOTAL,\"1,300\",\"1,550\"\n\
         DEPT OF CONSERVATION,GENERAL FUND,50,\n\
         DEPT OF CONSERVATION,DEPARTMENT TOTAL,50,\n",
    )
    .unwrap();

    fs::write(root.join("nh_2018.csv"), "DEPARTMENT,FY18 APPROPRIATION\nEDUCATION,900\nFISH AND GAME,40\n").unwrap();
    fs::write(root.join("nh_2025.csv"), "DEPARTMENT,FY25 APPROPRIATION\nEDUCATION,\"1,000\"\n").unwrap();

    let config_path = root.join("pipeline.json");
    fs::write(
        &config_path,
        r#"{
            "sources": {
                "maine": [{"kind": "line_item_csv", "path": "maine.csv"}],
                "new_hampshire": [
                    {"kind": "expenditure_csv", "path": "nh_2018.csv", "year": "2018"},
                    {"kind": "expenditure_csv", "path": "nh_2025.csv", "year": "2025"}
                ]
            },
            "economic": {"enabled": false},
            "strict": true
        }"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    let mapping = load_mapping(&config).unwrap();
    let inputs: PipelineInputs = load_inputs(&config).unwrap();
    let run = Pipeline::from_config(&config, mapping, true).run(&inputs).unwrap();

    let current = &run.point_in_time[0];
    assert_eq!(current.year, "2025");
    let education = current.record("EDUCATION").unwrap();
    assert_eq!((education.amount_a, education.amount_b), (1550.0, 1000.0));

    // Parks dropped out of Maine's 2025 table and NH's 2025 report entirely
    let parks = current.record("PARKS").unwrap();
    assert_eq!((parks.amount_a, parks.amount_b), (0.0, 0.0));

    let through = run.through_time.as_ref().unwrap();
    assert_eq!(through.records[0].department, "EDUCATION");
    assert_eq!(through.record("PARKS").unwrap().a.pct_change, Some(-100.0));

    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    let stats = export_run(&conn, &run).unwrap();
    assert_eq!(verify_count(&conn, "standardized_amounts").unwrap() as usize, stats.standardized_rows);
    assert_eq!(verify_count(&conn, "point_in_time").unwrap(), 4);

    println!("✅ {}", run.summary());
}

#[test]
fn strict_run_reports_every_gap_at_once() {
    let mapping = CategoryMapping::new().with_direct(Jurisdiction::Maine, "A", "Alpha");

    let mut me = LineItemTable::new();
    let mut nh = LineItemTable::new();
    for year in ["2018", "2025"] {
        set(&mut me, "A", "DEPARTMENT TOTAL", year, 10.0);
        set(&mut me, "B", "DEPARTMENT TOTAL", year, 5.0);
        set(&mut nh, "C", "DEPARTMENT TOTAL", year, 7.0);
    }
    let inputs = PipelineInputs::from([(Jurisdiction::Maine, me), (Jurisdiction::NewHampshire, nh)]);

    let result = Pipeline::new(mapping, "2025", "2018").strict(true).run(&inputs);
    let Err(PipelineError::DataQuality { issues, summary }) = result else {
        panic!("strict run should fail on unmapped departments");
    };

    assert_eq!(issues, 2);
    assert!(summary.contains("'B'"), "{}", summary);
    assert!(summary.contains("'C'"), "{}", summary);
}

#[test]
fn loaded_tables_report_mapping_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(
        root.join("department_mapping.csv"),
        "State,As Reported,Standardized\n\
         Maine,DEPT OF EDUCATION,Education\n\
         New Hampshire,EDUCATION,Education\n",
    )
    .unwrap();
    fs::write(
        root.join("maine.csv"),
        "Department,Funding Source,2018,2025\n\
         DEPT OF EDUCATION,DEPARTMENT TOTAL,100,120\n\
         DEPT OF LABOR,DEPARTMENT TOTAL,30,35\n\
         GRAND TOTALS - ALL DEPARTMENTS,DEPARTMENT TOTAL,130,155\n",
    )
    .unwrap();
    fs::write(root.join("nh_2018.csv"), "DEPARTMENT,FY18 APPROPRIATION\nEDUCATION,90\nSAFETY,20\n").unwrap();
    fs::write(root.join("nh_2025.csv"), "DEPARTMENT,FY25 APPROPRIATION\nEDUCATION,95\nSAFETY,25\n").unwrap();

    let config_path = root.join("pipeline.json");
    fs::write(
        &config_path,
        r#"{
            "sources": {
                "maine": [{"kind": "line_item_csv", "path": "maine.csv"}],
                "new_hampshire": [
                    {"kind": "expenditure_csv", "path": "nh_2018.csv", "year": "2018"},
                    {"kind": "expenditure_csv", "path": "nh_2025.csv", "year": "2025"}
                ]
            },
            "economic": {"enabled": false}
        }"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    let mapping = load_mapping(&config).unwrap();
    let inputs = load_inputs(&config).unwrap();

    let reserved = [TOTAL_DEPARTMENT, DEFAULT_GRAND_TOTAL_DEPARTMENT];
    let expected = [(Jurisdiction::Maine, "DEPT OF LABOR"), (Jurisdiction::NewHampshire, "SAFETY")];
    for (jurisdiction, name) in expected {
        let gaps = mapping.unmapped_departments(jurisdiction, &inputs[&jurisdiction], &reserved);
        assert_eq!(gaps.into_iter().collect::<Vec<_>>(), vec![name.to_string()]);
    }

    // The pipeline flags the same names in its report
    let run = Pipeline::from_config(&config, mapping, true).run(&inputs).unwrap();
    for (jurisdiction, name) in expected {
        assert_eq!(run.quality.unmapped_names(jurisdiction).into_iter().collect::<Vec<_>>(), vec![name]);
    }

    println!("✅ Mapping gaps: {}", run.quality.summary());
}
