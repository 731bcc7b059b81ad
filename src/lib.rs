// Budget Standardization - Core Library
// Exposes all pipeline stages for use in the CLI and tests

pub mod table;          // Line-item tables shared by every stage
pub mod jurisdiction;
pub mod errors;
pub mod mapping;        // Two-tier category mapping
pub mod reconciliation; // Grand totals + ex-fund view
pub mod double_count;   // Sub-department claims
pub mod standardizer;
pub mod data_quality;   // Issue collection, conservation, strict mode
pub mod comparison;     // Point-in-time + through-time
pub mod economic;       // FRED indices and benchmark
pub mod analytics;      // Read-only views for presentation
pub mod loader;         // Raw source files → tables
pub mod config;
pub mod pipeline;
pub mod db;             // SQLite export of a run

// Re-export commonly used types
pub use table::{
    BudgetTable, FundingSource, LineItemKey, LineItemRecord, LineItemTable, StandardizedTable, YearAmounts,
    DEFAULT_GRAND_TOTAL_DEPARTMENT, DEPARTMENT_TOTAL, DEPARTMENT_TOTAL_EX_FEDERAL, TOTAL_DEPARTMENT,
    UNMAPPED_DEPARTMENT,
};
pub use jurisdiction::Jurisdiction;
pub use errors::{EconomicError, PipelineError};
pub use mapping::{CategoryMapping, DirectRule, SubDepartmentRule};
pub use reconciliation::{
    GrandTotalCheck, ReconciledTable, ReconciliationReport, ReconciliationResult, TotalReconciler,
};
pub use double_count::{ClaimedAmounts, DoubleCountResolver, SubDepartmentMatch};
pub use standardizer::{StandardizationOutcome, Standardizer};
pub use data_quality::{
    conservation_issues, ConservationCheck, DataQualityEngine, IssueKind, QualityIssue, QualityReport, Severity,
};
pub use comparison::{
    percent_change, Comparator, ComparisonRecord, LevelChange, PointInTimeComparison, ThroughTimeComparison,
    ThroughTimeRecord,
};
pub use economic::{
    CsvSeriesSource, EconomicIndexBuilder, EconomicIndexSet, EconomicSeries, FredClient, IndexAvailability,
    Observation, SeriesRequest, SeriesSource,
};
pub use analytics::{funding_source_view, small_department_summary, TopDepartments};
pub use loader::{get_loader, load_sources, parse_amount, TableLoader};
pub use config::{PipelineConfig, SourceSpec};
pub use pipeline::{load_inputs, load_mapping, EconomicStage, Pipeline, PipelineInputs, PipelineRun};
pub use db::{export_run, open_database, setup_database, verify_count};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
