// ⚙️ Pipeline Configuration - One JSON file describing a run
//
// Relative paths in the file resolve against the file's own directory, so a
// config can travel together with its data folder.

use crate::economic::{SeriesRequest, DEFAULT_EXTRAPOLATION_WINDOW};
use crate::jurisdiction::Jurisdiction;
use crate::reconciliation::DEFAULT_EXCLUSION_FUND;
use crate::table::{DEFAULT_GRAND_TOTAL_DEPARTMENT, TOTAL_DEPARTMENT};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// SOURCES
// ============================================================================

/// One raw input file and the loader that reads it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Extracted text of a Maine biennial headline table
    HeadlineText {
        path: PathBuf,
        first_year: String,
        second_year: String,
    },

    /// New Hampshire expenditure CSV for one fiscal year
    ExpenditureCsv { path: PathBuf, year: String },

    /// Wide `Department,Funding Source,<years>` CSV
    LineItemCsv { path: PathBuf },
}

impl SourceSpec {
    pub fn path(&self) -> &Path {
        match self {
            SourceSpec::HeadlineText { path, .. }
            | SourceSpec::ExpenditureCsv { path, .. }
            | SourceSpec::LineItemCsv { path } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub maine: Vec<SourceSpec>,

    #[serde(default)]
    pub new_hampshire: Vec<SourceSpec>,
}

impl SourceSettings {
    pub fn for_jurisdiction(&self, jurisdiction: Jurisdiction) -> &[SourceSpec] {
        match jurisdiction {
            Jurisdiction::Maine => &self.maine,
            Jurisdiction::NewHampshire => &self.new_hampshire,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingFiles {
    pub direct: PathBuf,

    #[serde(default)]
    pub sub_department: Option<PathBuf>,
}

impl Default for MappingFiles {
    fn default() -> Self {
        MappingFiles {
            direct: PathBuf::from("department_mapping.csv"),
            sub_department: None,
        }
    }
}

// ============================================================================
// STAGE SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub grand_total_department: String,
    pub exclusion_fund: String,
    pub tolerance: f64,
    pub major_discrepancy_threshold: f64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            grand_total_department: DEFAULT_GRAND_TOTAL_DEPARTMENT.to_string(),
            exclusion_fund: DEFAULT_EXCLUSION_FUND.to_string(),
            tolerance: 0.01,
            major_discrepancy_threshold: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonSettings {
    pub current_year: String,
    pub previous_year: String,
    pub departments_to_ignore: Vec<String>,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        ComparisonSettings {
            current_year: "2025".to_string(),
            previous_year: "2018".to_string(),
            departments_to_ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EconomicProvider {
    Fred,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicSettings {
    pub enabled: bool,
    pub provider: EconomicProvider,

    /// Environment variable holding the FRED API key
    pub api_key_env: String,

    /// Folder of `<series id>.csv` files for the csv provider
    pub csv_dir: Option<PathBuf>,

    pub series: Vec<SeriesRequest>,
    pub cpi_series: String,
    pub population_series: String,
    pub start_year: String,
    pub multiplier: f64,
    pub extrapolation_window: usize,

    /// Spending line the benchmark curve is anchored to
    pub benchmark_department: String,
    pub benchmark_funding_source: String,
}

impl Default for EconomicSettings {
    fn default() -> Self {
        EconomicSettings {
            enabled: true,
            provider: EconomicProvider::Fred,
            api_key_env: "FRED_API_KEY".to_string(),
            csv_dir: None,
            series: vec![
                SeriesRequest::new("CPIAUCSL", "CPI"),
                SeriesRequest::new("MEPOP", "Maine Population"),
                SeriesRequest::new("MENQGSP", "Maine GDP"),
            ],
            cpi_series: "CPIAUCSL".to_string(),
            population_series: "MEPOP".to_string(),
            start_year: "2016".to_string(),
            multiplier: 1.0,
            extrapolation_window: DEFAULT_EXTRAPOLATION_WINDOW,
            benchmark_department: TOTAL_DEPARTMENT.to_string(),
            benchmark_funding_source: "GENERAL FUND".to_string(),
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: SourceSettings,

    #[serde(default)]
    pub mapping: MappingFiles,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub comparison: ComparisonSettings,

    #[serde(default)]
    pub economic: EconomicSettings,

    /// Unmapped entities (and every other critical issue) fail the run
    #[serde(default)]
    pub strict: bool,

    /// Directory relative paths resolve against (the config file's folder)
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PipelineConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: PipelineConfig = serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Absolute or config-relative path
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconciler.tolerance < 0.0 || self.reconciler.major_discrepancy_threshold < self.reconciler.tolerance {
            bail!(
                "reconciler thresholds must satisfy 0 <= tolerance <= major threshold (got {} / {})",
                self.reconciler.tolerance,
                self.reconciler.major_discrepancy_threshold
            );
        }
        if self.comparison.current_year.trim() == self.comparison.previous_year.trim() {
            bail!(
                "comparison.current_year and comparison.previous_year must differ (both are {})",
                self.comparison.current_year
            );
        }
        if self.economic.extrapolation_window == 0 {
            bail!("economic.extrapolation_window must be at least 1");
        }
        if !self.economic.multiplier.is_finite() || self.economic.multiplier == 0.0 {
            bail!("economic.multiplier must be a non-zero number");
        }
        if self.economic.provider == EconomicProvider::Csv && self.economic.enabled && self.economic.csv_dir.is_none() {
            bail!("economic.csv_dir is required for the csv provider");
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.reconciler.grand_total_department, "GRAND TOTALS - ALL DEPARTMENTS");
        assert_eq!(config.reconciler.exclusion_fund, "FEDERAL EXPENDITURES FUND");
        assert_eq!(config.economic.extrapolation_window, 5);
        assert!(!config.strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(
            &path,
            r#"{
                "sources": {
                    "maine": [
                        {"kind": "headline_text", "path": "me/2024-2025.txt", "first_year": "2024", "second_year": "2025"}
                    ],
                    "new_hampshire": [
                        {"kind": "expenditure_csv", "path": "nh/2024.csv", "year": "2024"}
                    ]
                },
                "mapping": {"direct": "mapping.csv"},
                "comparison": {"current_year": "2024", "departments_to_ignore": ["LEGISLATURE"]},
                "economic": {"provider": "csv", "csv_dir": "fred"},
                "strict": true
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();

        assert!(config.strict);
        assert_eq!(config.comparison.previous_year, "2018");
        assert_eq!(config.sources.for_jurisdiction(Jurisdiction::Maine).len(), 1);
        assert_eq!(
            config.resolve(config.sources.new_hampshire[0].path()),
            dir.path().join("nh/2024.csv")
        );
        assert_eq!(config.economic.cpi_series, "CPIAUCSL");
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = PipelineConfig::default();
        config.economic.extrapolation_window = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.economic.provider = EconomicProvider::Csv;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_equal_comparison_years() {
        let mut config = PipelineConfig::default();
        config.comparison.previous_year = config.comparison.current_year.clone();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));

        println!("✅ Rejected: {}", err);
    }
}
