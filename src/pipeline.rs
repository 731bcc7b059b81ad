// 🔄 Pipeline - One full run, from raw tables to comparisons
//
// Per jurisdiction:  validate → reconcile → resolve double counts → standardize
// Then:              conservation check → comparisons → economic indices
//
// Every data-quality problem lands in one QualityReport. Strict mode turns
// critical issues into an error at the very end, after all of them have
// been found. A missing comparison year stops the run in either mode, but
// the error still carries the report gathered so far. Economic data is optional: when it can't be had, the run
// carries on without the benchmark views.

use crate::comparison::{comparison_fingerprint, Comparator, PointInTimeComparison, ThroughTimeComparison};
use crate::config::{EconomicProvider, PipelineConfig};
use crate::data_quality::{
    conservation_issues, ConservationCheck, DataQualityEngine, IssueKind, QualityIssue, QualityReport, Severity,
};
use crate::double_count::SubDepartmentMatch;
use crate::economic::{
    CsvSeriesSource, EconomicIndexBuilder, EconomicIndexSet, EconomicSeries, FredClient, SeriesSource,
};
use crate::errors::PipelineError;
use crate::jurisdiction::Jurisdiction;
use crate::loader::load_sources;
use crate::mapping::CategoryMapping;
use crate::reconciliation::{ReconciliationReport, TotalReconciler};
use crate::standardizer::Standardizer;
use crate::table::{FundingSource, LineItemTable, StandardizedTable};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Raw tables keyed by jurisdiction
pub type PipelineInputs = BTreeMap<Jurisdiction, LineItemTable>;

// ============================================================================
// RUN OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionResult {
    pub jurisdiction: Jurisdiction,

    /// Raw table with totals rebuilt and the ex-fund view added
    pub reconciled: LineItemTable,
    pub reconciliation: ReconciliationReport,

    pub standardized: StandardizedTable,
    pub sub_department_matches: Vec<SubDepartmentMatch>,
    pub conservation: Vec<ConservationCheck>,

    /// SHA-256 of the standardized table
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicOutput {
    pub indices: EconomicIndexSet,

    /// Composite extrapolated over the comparison period, anchored to spending
    pub benchmark: Option<EconomicSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub jurisdictions: BTreeMap<Jurisdiction, JurisdictionResult>,
    pub point_in_time: Vec<PointInTimeComparison>,
    pub through_time: Option<ThroughTimeComparison>,
    pub economic: Option<EconomicOutput>,
    pub quality: QualityReport,
    pub comparison_fingerprint: String,
}

impl PipelineRun {
    pub fn standardized(&self, jurisdiction: Jurisdiction) -> Option<&StandardizedTable> {
        self.jurisdictions.get(&jurisdiction).map(|r| &r.standardized)
    }

    /// Every fingerprint of the deterministic payload, in a stable order
    pub fn fingerprints(&self) -> Vec<String> {
        let mut all: Vec<String> = self.jurisdictions.values().map(|r| r.fingerprint.clone()).collect();
        all.push(self.comparison_fingerprint.clone());
        all
    }

    /// Two runs over identical inputs must agree here
    pub fn same_output_as(&self, other: &PipelineRun) -> bool {
        self.fingerprints() == other.fingerprints()
    }

    pub fn summary(&self) -> String {
        let conserved = self
            .jurisdictions
            .values()
            .flat_map(|r| r.conservation.iter())
            .all(|c| c.conserved);
        format!(
            "Run {}: {} jurisdiction(s), {} comparison(s), economic {}, dollars {}, {}",
            self.run_id,
            self.jurisdictions.len(),
            self.point_in_time.len() + usize::from(self.through_time.is_some()),
            if self.economic.is_some() { "included" } else { "skipped" },
            if conserved { "conserved" } else { "NOT conserved" },
            self.quality.summary()
        )
    }
}

// ============================================================================
// ECONOMIC STAGE
// ============================================================================

pub enum EconomicStage {
    Disabled,

    /// Configured but no source could be set up (e.g. missing API key)
    Unavailable(String),

    Enabled {
        builder: EconomicIndexBuilder,
        source: Box<dyn SeriesSource>,
        window: usize,
        benchmark_department: String,
        benchmark_funding_source: FundingSource,
    },
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    mapping: CategoryMapping,
    reconciler: TotalReconciler,
    comparator: Comparator,
    quality: DataQualityEngine,
    current_year: String,
    previous_year: String,
    economic: EconomicStage,
    strict: bool,
}

impl Pipeline {
    pub fn new(mapping: CategoryMapping, current_year: &str, previous_year: &str) -> Self {
        Pipeline {
            mapping,
            reconciler: TotalReconciler::new(),
            comparator: Comparator::default(),
            quality: DataQualityEngine::new(),
            current_year: current_year.to_string(),
            previous_year: previous_year.to_string(),
            economic: EconomicStage::Disabled,
            strict: false,
        }
    }

    /// Build every stage from a config (does not touch the network)
    pub fn from_config(config: &PipelineConfig, mapping: CategoryMapping, offline: bool) -> Self {
        let settings = &config.reconciler;
        let reconciler = TotalReconciler::new()
            .with_grand_total_department(&settings.grand_total_department)
            .with_exclusion_fund(&settings.exclusion_fund)
            .with_thresholds(settings.tolerance, settings.major_discrepancy_threshold);

        let comparator = Comparator::default().with_ignored(&config.comparison.departments_to_ignore[..]);

        Pipeline {
            mapping,
            reconciler,
            comparator,
            quality: DataQualityEngine::with_tolerance(settings.tolerance),
            current_year: config.comparison.current_year.clone(),
            previous_year: config.comparison.previous_year.clone(),
            economic: economic_stage(config, offline),
            strict: config.strict,
        }
    }

    pub fn with_reconciler(mut self, reconciler: TotalReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_economic(mut self, stage: EconomicStage) -> Self {
        self.economic = stage;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn mapping(&self) -> &CategoryMapping {
        &self.mapping
    }

    /// Execute one run over already-loaded tables
    pub fn run(&self, inputs: &PipelineInputs) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, jurisdictions = inputs.len(), strict = self.strict, "pipeline run started");

        let mut quality = QualityReport::new();
        let mut jurisdictions = BTreeMap::new();

        for (&jurisdiction, raw) in inputs {
            let result = self.run_jurisdiction(jurisdiction, raw, &mut quality);
            jurisdictions.insert(jurisdiction, result);
        }

        let (point_in_time, through_time) = match self.compare(&jurisdictions) {
            Ok(comparisons) => comparisons,
            Err(cause) => {
                quality.push(QualityIssue::new(
                    Severity::Critical,
                    IssueKind::MissingYear,
                    None,
                    "comparison",
                    cause.to_string(),
                    "Load a source covering this year or change the comparison years",
                ));
                warn!(%run_id, "pipeline run stopped: {}", quality.summary());
                return Err(PipelineError::Incomplete {
                    cause: Box::new(cause),
                    report: quality,
                });
            }
        };
        let comparison_fingerprint = comparison_fingerprint(&point_in_time, through_time.as_ref());

        let economic = self.economic_indices(&jurisdictions, &mut quality);

        let quality = if self.strict {
            quality.into_strict_result()?
        } else {
            quality
        };

        let run = PipelineRun {
            run_id,
            started_at,
            jurisdictions,
            point_in_time,
            through_time,
            economic,
            quality,
            comparison_fingerprint,
        };
        info!("{}", run.summary());
        Ok(run)
    }

    fn run_jurisdiction(
        &self,
        jurisdiction: Jurisdiction,
        raw: &LineItemTable,
        quality: &mut QualityReport,
    ) -> JurisdictionResult {
        quality.extend(self.quality.validate_table(jurisdiction, raw));

        let reconciled = self.reconciler.reconcile(jurisdiction, raw);
        quality.extend(reconciled.report.issues());

        let outcome = Standardizer::new(&self.mapping).standardize(jurisdiction, &reconciled.table);
        quality.extend(outcome.issues);

        let conservation = self
            .quality
            .conservation_checks(jurisdiction, &reconciled.table, &outcome.table, &[]);
        quality.extend(conservation_issues(&conservation));

        JurisdictionResult {
            jurisdiction,
            fingerprint: outcome.table.fingerprint(),
            reconciled: reconciled.table,
            reconciliation: reconciled.report,
            standardized: outcome.table,
            sub_department_matches: outcome.claimed.matches,
            conservation,
        }
    }

    fn compare(
        &self,
        results: &BTreeMap<Jurisdiction, JurisdictionResult>,
    ) -> Result<(Vec<PointInTimeComparison>, Option<ThroughTimeComparison>), PipelineError> {
        let (Some(a), Some(b)) = (
            results.get(&self.comparator.jurisdiction_a),
            results.get(&self.comparator.jurisdiction_b),
        ) else {
            warn!("comparison needs both jurisdictions; skipped");
            return Ok((Vec::new(), None));
        };

        let mut years = vec![&self.current_year];
        if self.previous_year != self.current_year {
            years.push(&self.previous_year);
        }

        let mut point_in_time = Vec::new();
        for year in years {
            point_in_time.push(self.comparator.point_in_time(&a.standardized, &b.standardized, year)?);
        }

        let through_time = self.comparator.through_time(
            &a.standardized,
            &b.standardized,
            &self.previous_year,
            &self.current_year,
        )?;

        Ok((point_in_time, Some(through_time)))
    }

    fn economic_indices(
        &self,
        results: &BTreeMap<Jurisdiction, JurisdictionResult>,
        quality: &mut QualityReport,
    ) -> Option<EconomicOutput> {
        let missing = |subject: &str, issue: String| {
            QualityIssue::new(
                Severity::Warning,
                IssueKind::MissingEconomicData,
                None,
                subject,
                issue,
                "Benchmark views are omitted for this run",
            )
        };

        let (builder, source, window, department, funding_source) = match &self.economic {
            EconomicStage::Disabled => return None,
            EconomicStage::Unavailable(reason) => {
                quality.push(missing("economic source", reason.clone()));
                return None;
            }
            EconomicStage::Enabled {
                builder,
                source,
                window,
                benchmark_department,
                benchmark_funding_source,
            } => (builder, source, *window, benchmark_department, benchmark_funding_source),
        };

        let indices = builder.build(source.as_ref());
        for (id, reason) in indices.unavailable() {
            quality.push(missing(id, format!("series {} unavailable: {}", id, reason)));
        }

        // Benchmark anchored to Maine's spending line at the previous comparison year
        let spending_at_start = results
            .get(&Jurisdiction::Maine)
            .and_then(|r| r.reconciled.amount(department, funding_source, &self.previous_year));

        let benchmark = match (indices.composite.is_some(), spending_at_start) {
            (false, _) => None,
            (true, None) => {
                quality.push(missing(
                    department,
                    format!(
                        "no {} / {} amount for {} to anchor the benchmark",
                        department, funding_source, self.previous_year
                    ),
                ));
                None
            }
            (true, Some(level)) => match indices.benchmark(&self.previous_year, &self.current_year, level, window) {
                Some(Ok(series)) => Some(series),
                Some(Err(e)) => {
                    quality.push(missing("benchmark", e.to_string()));
                    None
                }
                None => None,
            },
        };

        Some(EconomicOutput { indices, benchmark })
    }
}

/// Pick the economic source the config asks for
fn economic_stage(config: &PipelineConfig, offline: bool) -> EconomicStage {
    let settings = &config.economic;
    if !settings.enabled {
        return EconomicStage::Disabled;
    }

    let source: Box<dyn SeriesSource> = match (settings.provider, offline) {
        (EconomicProvider::Csv, _) => match &settings.csv_dir {
            Some(dir) => Box::new(CsvSeriesSource::new(config.resolve(dir))),
            None => return EconomicStage::Unavailable("economic.csv_dir is not set".to_string()),
        },
        (EconomicProvider::Fred, true) => {
            return EconomicStage::Unavailable("offline run, FRED not queried".to_string());
        }
        (EconomicProvider::Fred, false) => match FredClient::from_env(&settings.api_key_env) {
            Ok(client) => Box::new(client),
            Err(e) => return EconomicStage::Unavailable(e.to_string()),
        },
    };

    let builder = settings.series.iter().cloned().fold(
        EconomicIndexBuilder::new(&settings.start_year)
            .with_multiplier(settings.multiplier)
            .with_composite(&settings.cpi_series, &settings.population_series),
        |builder, request| builder.with_series(request),
    );

    EconomicStage::Enabled {
        builder,
        source,
        window: settings.extrapolation_window,
        benchmark_department: settings.benchmark_department.clone(),
        benchmark_funding_source: FundingSource::parse(&settings.benchmark_funding_source),
    }
}

// ============================================================================
// APPLICATION EDGE
// ============================================================================

/// Load the mapping files named in the config
pub fn load_mapping(config: &PipelineConfig) -> Result<CategoryMapping> {
    let direct = config.resolve(&config.mapping.direct);
    let sub = config.mapping.sub_department.as_ref().map(|p| config.resolve(p));
    CategoryMapping::from_files(direct, sub).context("Failed to load category mapping")
}

/// Load every configured raw table
pub fn load_inputs(config: &PipelineConfig) -> Result<PipelineInputs> {
    let mut inputs = PipelineInputs::new();
    for jurisdiction in Jurisdiction::ALL {
        let specs = config.sources.for_jurisdiction(jurisdiction);
        if specs.is_empty() {
            warn!(jurisdiction = jurisdiction.code(), "no sources configured");
            continue;
        }
        let table = load_sources(jurisdiction, specs, &config.base_dir)?;
        inputs.insert(jurisdiction, table);
    }
    Ok(inputs)
}

// ============================================================================
// TESTS
// ============================================================================
