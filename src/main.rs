use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use budget_standardization::{
    export_run, load_inputs, load_mapping, open_database, verify_count, Jurisdiction, Pipeline, PipelineConfig,
    PipelineError, PipelineRun, QualityReport, TopDepartments, TOTAL_DEPARTMENT,
};

#[derive(Debug, Parser)]
#[command(name = "budget-standardization")]
#[command(about = "Standardize and compare Maine / New Hampshire state budgets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline
    Run {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,

        /// Fail on any critical data-quality issue
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Skip network sources (FRED)
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// SQLite file to export the run into
        #[arg(long)]
        export: Option<PathBuf>,

        /// Write the whole run as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// List as-reported departments with no mapping rule
    CheckMapping {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,
    },

    /// Largest standardized departments for a year
    Top {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,

        #[arg(long)]
        jurisdiction: Jurisdiction,

        #[arg(long)]
        year: String,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run {
            config,
            strict,
            offline,
            export,
            json,
        } => run_pipeline(config, strict, offline, export, json),
        Command::CheckMapping { config } => check_mapping(config),
        Command::Top {
            config,
            jurisdiction,
            year,
            top,
        } => show_top(config, jurisdiction, &year, top),
    }
}

fn execute(config: &PipelineConfig, offline: bool) -> Result<PipelineRun> {
    let mapping = load_mapping(config)?;
    println!("✓ Loaded {} mapping rule(s)", mapping.len());

    let inputs = load_inputs(config)?;
    for (jurisdiction, table) in &inputs {
        println!("✓ {}: {} row(s), {} year(s)", jurisdiction, table.len(), table.years().count());
    }

    match Pipeline::from_config(config, mapping, offline).run(&inputs) {
        Ok(run) => Ok(run),
        Err(PipelineError::Incomplete { cause, report }) => {
            print_quality(&report);
            Err(anyhow::Error::new(*cause).context("Pipeline run stopped before comparisons"))
        }
        Err(err) => Err(err.into()),
    }
}

fn print_quality(report: &QualityReport) {
    if report.is_clean() {
        return;
    }
    println!("\n⚠️  Data quality: {}", report.summary());
    for issue in &report.issues {
        println!("   [{:?}] {}: {}", issue.severity, issue.subject, issue.issue);
    }
}

fn run_pipeline(
    config_path: PathBuf,
    strict: bool,
    offline: bool,
    export: Option<PathBuf>,
    json: Option<PathBuf>,
) -> Result<()> {
    println!("🔄 Budget Standardization Pipeline");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut config = PipelineConfig::from_file(&config_path)?;
    config.strict |= strict;

    println!("\n📂 Loading sources...");
    let run = execute(&config, offline)?;

    println!("\n📊 Comparisons");
    for comparison in &run.point_in_time {
        println!("   {}", comparison.summary());
    }
    if let Some(through) = &run.through_time {
        for record in through.widest_gap_growth(5) {
            println!(
                "   {:<40} gap {:>16.0} → {:>16.0}",
                record.department, record.differential_start, record.differential_end
            );
        }
    }

    if let Some(economic) = &run.economic {
        println!("\n📈 Economic indices: {}", economic.indices.summary());
    }

    print_quality(&run.quality);

    if let Some(path) = export {
        println!("\n💾 Exporting to {}...", path.display());
        let conn = open_database(&path)?;
        let stats = export_run(&conn, &run)?;
        println!("✓ {}", stats.summary());
        println!("✓ Database contains {} standardized cell(s)", verify_count(&conn, "standardized_amounts")?);
    }

    if let Some(path) = json {
        let body = serde_json::to_string_pretty(&run)?;
        fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("✓ Run written to {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", run.summary());
    Ok(())
}

fn check_mapping(config_path: PathBuf) -> Result<()> {
    println!("🗂️  Mapping coverage");
    let config = PipelineConfig::from_file(&config_path)?;
    let mapping = load_mapping(&config)?;
    let inputs = load_inputs(&config)?;

    let reserved = [TOTAL_DEPARTMENT, config.reconciler.grand_total_department.as_str()];
    let mut missing = 0;
    for (&jurisdiction, table) in &inputs {
        let unmapped = mapping.unmapped_departments(jurisdiction, table, &reserved);
        if unmapped.is_empty() {
            println!("✅ {}: every department mapped", jurisdiction);
            continue;
        }
        println!("❌ {}: {} unmapped department(s)", jurisdiction, unmapped.len());
        for department in &unmapped {
            println!("   - {}", department);
        }
        missing += unmapped.len();
    }

    if missing > 0 {
        anyhow::bail!("{} department(s) need a mapping rule", missing);
    }
    Ok(())
}

fn show_top(config_path: PathBuf, jurisdiction: Jurisdiction, year: &str, top: usize) -> Result<()> {
    let config = PipelineConfig::from_file(&config_path)?;
    let run = execute(&config, true)?;
    let table = run
        .standardized(jurisdiction)
        .with_context(|| format!("no sources configured for {}", jurisdiction))?;

    let view = TopDepartments::new(year).top(top).with_all_others().compute(table)?;
    println!("\n🏆 Top {} departments, {} {}", top, jurisdiction, year);
    for bar in &view.bars {
        println!("   {:<40} {:>16.0}", bar.department, bar.amount);
    }
    Ok(())
}
