// 🗄️ SQLite Export - Hand a run's outputs to the presentation layer
//
// The database mirrors the latest run only: every export wipes the previous
// contents inside the same transaction, so readers never see a mix.

use crate::data_quality::QualityIssue;
use crate::economic::EconomicSeries;
use crate::jurisdiction::Jurisdiction;
use crate::pipeline::PipelineRun;
use crate::table::{FundingSource, LineItemKey, StandardizedTable};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::info;

/// Appended to the composite id for the spending-anchored benchmark rows
pub const BENCHMARK_SUFFIX: &str = "_BENCHMARK";

const TABLES: [&str; 7] = [
    "runs",
    "standardized_amounts",
    "conservation_checks",
    "point_in_time",
    "through_time",
    "economic_indices",
    "quality_issues",
];

/// Open (or create) the export database
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Run metadata
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            comparison_fingerprint TEXT NOT NULL,
            summary TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Standardized tables (one row per cell)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS standardized_amounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            jurisdiction TEXT NOT NULL,
            department TEXT NOT NULL,
            funding_source TEXT NOT NULL,
            year TEXT NOT NULL,
            amount REAL NOT NULL,
            UNIQUE (jurisdiction, department, funding_source, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conservation_checks (
            jurisdiction TEXT NOT NULL,
            year TEXT NOT NULL,
            source_total REAL NOT NULL,
            standardized_total REAL NOT NULL,
            difference REAL NOT NULL,
            conserved INTEGER NOT NULL,
            PRIMARY KEY (jurisdiction, year)
        )",
        [],
    )?;

    // ==========================================================================
    // Comparisons
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS point_in_time (
            year TEXT NOT NULL,
            department TEXT NOT NULL,
            amount_a REAL NOT NULL,
            amount_b REAL NOT NULL,
            PRIMARY KEY (year, department)
        )",
        [],
    )?;

    // NULL pct columns: start level was zero
    conn.execute(
        "CREATE TABLE IF NOT EXISTS through_time (
            position INTEGER PRIMARY KEY,
            department TEXT NOT NULL,
            start_year TEXT NOT NULL,
            end_year TEXT NOT NULL,
            a_start REAL NOT NULL,
            a_end REAL NOT NULL,
            a_change REAL NOT NULL,
            a_pct_change REAL,
            b_start REAL NOT NULL,
            b_end REAL NOT NULL,
            b_change REAL NOT NULL,
            b_pct_change REAL,
            differential_start REAL NOT NULL,
            differential_end REAL NOT NULL,
            differential_change REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS economic_indices (
            series_id TEXT NOT NULL,
            name TEXT NOT NULL,
            year TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (series_id, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quality_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            severity TEXT NOT NULL,
            kind TEXT NOT NULL,
            jurisdiction TEXT,
            subject TEXT NOT NULL,
            issue TEXT NOT NULL,
            recommendation TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_standardized_year ON standardized_amounts(jurisdiction, year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quality_kind ON quality_issues(kind)",
        [],
    )?;

    Ok(())
}

/// Row counts written by one export
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExportStats {
    pub standardized_rows: usize,
    pub comparison_rows: usize,
    pub economic_rows: usize,
    pub quality_issues: usize,
}

impl ExportStats {
    pub fn summary(&self) -> String {
        format!(
            "{} standardized cell(s), {} comparison row(s), {} index point(s), {} issue(s)",
            self.standardized_rows, self.comparison_rows, self.economic_rows, self.quality_issues
        )
    }
}

/// Replace the database contents with `run`
pub fn export_run(conn: &Connection, run: &PipelineRun) -> Result<ExportStats> {
    let tx = conn.unchecked_transaction().context("Failed to start export transaction")?;
    let mut stats = ExportStats::default();

    for table in TABLES {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .with_context(|| format!("Failed to clear {}", table))?;
    }

    tx.execute(
        "INSERT INTO runs (run_id, started_at, comparison_fingerprint, summary) VALUES (?1, ?2, ?3, ?4)",
        params![
            run.run_id.to_string(),
            run.started_at.to_rfc3339(),
            run.comparison_fingerprint,
            run.summary()
        ],
    )?;

    for (jurisdiction, result) in &run.jurisdictions {
        for record in result.standardized.records() {
            tx.execute(
                "INSERT INTO standardized_amounts (jurisdiction, department, funding_source, year, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![jurisdiction.code(), record.department, record.funding_source, record.year, record.amount],
            )?;
            stats.standardized_rows += 1;
        }

        for check in &result.conservation {
            tx.execute(
                "INSERT INTO conservation_checks (jurisdiction, year, source_total, standardized_total, difference, conserved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    jurisdiction.code(),
                    check.year,
                    check.source_total,
                    check.standardized_total,
                    check.difference,
                    check.conserved
                ],
            )?;
        }
    }

    for comparison in &run.point_in_time {
        for record in &comparison.records {
            tx.execute(
                "INSERT INTO point_in_time (year, department, amount_a, amount_b) VALUES (?1, ?2, ?3, ?4)",
                params![comparison.year, record.department, record.amount_a, record.amount_b],
            )?;
            stats.comparison_rows += 1;
        }
    }

    if let Some(through) = &run.through_time {
        for (position, r) in through.records.iter().enumerate() {
            tx.execute(
                "INSERT INTO through_time (
                    position, department, start_year, end_year,
                    a_start, a_end, a_change, a_pct_change,
                    b_start, b_end, b_change, b_pct_change,
                    differential_start, differential_end, differential_change
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    position as i64,
                    r.department,
                    through.start_year,
                    through.end_year,
                    r.a.start,
                    r.a.end,
                    r.a.change,
                    r.a.pct_change,
                    r.b.start,
                    r.b.end,
                    r.b.change,
                    r.b.pct_change,
                    r.differential_start,
                    r.differential_end,
                    r.differential_change,
                ],
            )?;
            stats.comparison_rows += 1;
        }
    }

    if let Some(economic) = &run.economic {
        // Benchmark shares the composite's id; store it under its own
        let mut series: Vec<(String, &EconomicSeries)> = economic
            .indices
            .series
            .values()
            .chain(economic.indices.composite.iter())
            .map(|s| (s.id.clone(), s))
            .collect();
        if let Some(benchmark) = &economic.benchmark {
            series.push((format!("{}{}", benchmark.id, BENCHMARK_SUFFIX), benchmark));
        }

        for (id, s) in series {
            for (year, value) in &s.values {
                tx.execute(
                    "INSERT INTO economic_indices (series_id, name, year, value) VALUES (?1, ?2, ?3, ?4)",
                    params![id, s.name, year, value],
                )?;
                stats.economic_rows += 1;
            }
        }
    }

    for issue in &run.quality.issues {
        insert_issue(&tx, issue)?;
        stats.quality_issues += 1;
    }

    tx.commit().context("Failed to commit export")?;
    info!(run_id = %run.run_id, "{}", stats.summary());
    Ok(stats)
}

fn insert_issue(conn: &Connection, issue: &QualityIssue) -> Result<()> {
    conn.execute(
        "INSERT INTO quality_issues (severity, kind, jurisdiction, subject, issue, recommendation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            format!("{:?}", issue.severity),
            format!("{:?}", issue.kind),
            issue.jurisdiction.map(|j| j.code()),
            issue.subject,
            issue.issue,
            issue.recommendation
        ],
    )?;
    Ok(())
}

/// Rows currently in one of the export tables
pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    if !TABLES.contains(&table) {
        bail!("unknown export table: {}", table);
    }
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

/// Read back one jurisdiction's standardized table
pub fn get_standardized(conn: &Connection, jurisdiction: Jurisdiction) -> Result<StandardizedTable> {
    let mut stmt = conn.prepare(
        "SELECT department, funding_source, year, amount
         FROM standardized_amounts
         WHERE jurisdiction = ?1
         ORDER BY department, funding_source, year",
    )?;

    let rows = stmt.query_map(params![jurisdiction.code()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut table = StandardizedTable::new();
    for row in rows {
        let (department, funding_source, year, amount) = row?;
        table.add_amount(LineItemKey::new(&department, FundingSource::parse(&funding_source)), &year, amount);
    }
    Ok(table)
}

// ============================================================================
// TESTS
// ============================================================================
