// 📈 Economic Index Builder - Macro series rebased to a common start year
//
// Series arrive as dated observations (monthly, quarterly, annual) from a
// SeriesSource, are averaged per calendar year, then rebased so the first
// in-range year equals the multiplier (1.0 by default).
//
// The composite (inflation × population) is the "spending that merely kept
// up" benchmark. Extrapolation past the last published year compounds the
// trailing average growth rate: an approximation, not a forecast.

use crate::errors::EconomicError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_EXTRAPOLATION_WINDOW: usize = 5;

// ============================================================================
// OBSERVATIONS + SERIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Mean of all observations per calendar year
pub fn resample_annual_mean(observations: &[Observation]) -> BTreeMap<String, f64> {
    let mut buckets: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    for obs in observations {
        let bucket = buckets.entry(obs.date.year()).or_insert((0.0, 0));
        bucket.0 += obs.value;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(year, (sum, count))| (year.to_string(), sum / count as f64))
        .collect()
}

/// EconomicSeries - one named Year → Value series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicSeries {
    pub id: String,
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl EconomicSeries {
    pub fn new(id: &str, name: &str, values: BTreeMap<String, f64>) -> Self {
        EconomicSeries {
            id: id.to_string(),
            name: name.to_string(),
            values,
        }
    }

    pub fn from_observations(id: &str, name: &str, observations: &[Observation]) -> Result<Self, EconomicError> {
        if observations.is_empty() {
            return Err(EconomicError::EmptySeries(id.to_string()));
        }
        Ok(Self::new(id, name, resample_annual_mean(observations)))
    }

    pub fn get(&self, year: &str) -> Option<f64> {
        self.values.get(year).copied()
    }

    pub fn first_year(&self) -> Option<&str> {
        self.values.keys().next().map(String::as_str)
    }

    pub fn last_year(&self) -> Option<&str> {
        self.values.keys().next_back().map(String::as_str)
    }

    /// Re-base so the first year at or after `start_year` equals `multiplier`.
    ///
    /// Years before the start are dropped. Each series is normalized against
    /// its own first in-range observation.
    pub fn rebase(&self, start_year: &str, multiplier: f64) -> Result<Self, EconomicError> {
        let in_range: BTreeMap<String, f64> = self
            .values
            .range(start_year.to_string()..)
            .map(|(y, v)| (y.clone(), *v))
            .collect();

        let (base_year, base) = match in_range.iter().next() {
            Some((y, v)) => (y.clone(), *v),
            None => return Err(EconomicError::EmptySeries(self.id.clone())),
        };
        if base == 0.0 || !base.is_finite() {
            return Err(EconomicError::ZeroBase {
                series_id: self.id.clone(),
                year: base_year,
            });
        }

        let values = in_range
            .into_iter()
            .map(|(y, v)| (y, v / base * multiplier))
            .collect();

        Ok(Self::new(&self.id, &self.name, values))
    }

    /// Element-wise product over the years both series cover
    pub fn composite(&self, other: &EconomicSeries, id: &str, name: &str) -> Self {
        let values = self
            .values
            .iter()
            .filter_map(|(year, a)| other.get(year).map(|b| (year.clone(), a * b)))
            .collect();
        Self::new(id, name, values)
    }

    pub fn scale(&self, factor: f64) -> Self {
        let values = self.values.iter().map(|(y, v)| (y.clone(), v * factor)).collect();
        Self::new(&self.id, &self.name, values)
    }

    /// Extend the series to `target_year` with the average annual growth rate
    /// over the trailing `window` years, compounded.
    ///
    /// A target at or before the last observation returns the series as is.
    pub fn extrapolate(&self, target_year: &str, window: usize) -> Result<Self, EconomicError> {
        let target = parse_year(&self.id, target_year)?;
        let mut years: BTreeMap<i32, f64> = BTreeMap::new();
        for (year, value) in &self.values {
            years.insert(parse_year(&self.id, year)?, *value);
        }

        let Some((&last_year, &last_value)) = years.iter().next_back() else {
            return Err(EconomicError::EmptySeries(self.id.clone()));
        };
        if target <= last_year {
            return Ok(self.clone());
        }

        let insufficient = || EconomicError::InsufficientHistory {
            series_id: self.id.clone(),
        };
        let window_start = last_year - window as i32;
        let (&base_year, &base_value) = years.range(window_start..last_year).next().ok_or_else(insufficient)?;
        if base_value <= 0.0 || last_value <= 0.0 {
            return Err(insufficient());
        }

        let span = (last_year - base_year) as f64;
        let growth = (last_value / base_value).powf(1.0 / span);

        let mut values = self.values.clone();
        for year in (last_year + 1)..=target {
            values.insert(year.to_string(), last_value * growth.powi(year - last_year));
        }
        Ok(Self::new(&self.id, &self.name, values))
    }
}

fn parse_year(series_id: &str, year: &str) -> Result<i32, EconomicError> {
    year.trim().parse().map_err(|_| EconomicError::InvalidObservation {
        series_id: series_id.to_string(),
        reason: format!("'{}' is not a year", year),
    })
}

// ============================================================================
// SERIES SOURCES
// ============================================================================

/// Anything that can hand back dated observations for a series id
pub trait SeriesSource {
    fn fetch(&self, series_id: &str) -> Result<Vec<Observation>, EconomicError>;

    fn source_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct FredResponse {
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

/// FRED observations API (blocking)
pub struct FredClient {
    api_key: String,
    base_url: String,
    agent: ureq::Agent,
}

impl FredClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.stlouisfed.org/fred/series/observations";

    pub fn new(api_key: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(30)).build();
        FredClient {
            api_key: api_key.to_string(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            agent,
        }
    }

    /// Read the API key from an environment variable
    pub fn from_env(variable: &str) -> Result<Self, EconomicError> {
        match std::env::var(variable) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(EconomicError::Fetch {
                series_id: "*".to_string(),
                reason: format!("environment variable {} is not set", variable),
            }),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn parse_observations(series_id: &str, response: FredResponse) -> Result<Vec<Observation>, EconomicError> {
        let mut observations = Vec::with_capacity(response.observations.len());
        for raw in response.observations {
            // FRED marks missing values with "."
            if raw.value.trim() == "." {
                continue;
            }
            let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d").map_err(|e| {
                EconomicError::InvalidObservation {
                    series_id: series_id.to_string(),
                    reason: format!("date '{}': {}", raw.date, e),
                }
            })?;
            let value = raw.value.trim().parse::<f64>().map_err(|e| EconomicError::InvalidObservation {
                series_id: series_id.to_string(),
                reason: format!("value '{}': {}", raw.value, e),
            })?;
            observations.push(Observation { date, value });
        }
        Ok(observations)
    }
}

impl SeriesSource for FredClient {
    fn fetch(&self, series_id: &str) -> Result<Vec<Observation>, EconomicError> {
        let fetch_error = |reason: String| EconomicError::Fetch {
            series_id: series_id.to_string(),
            reason,
        };

        let response: FredResponse = self
            .agent
            .get(&self.base_url)
            .query("series_id", series_id)
            .query("api_key", &self.api_key)
            .query("file_type", "json")
            .call()
            .map_err(|e| fetch_error(e.to_string()))?
            .into_json()
            .map_err(|e| fetch_error(e.to_string()))?;

        Self::parse_observations(series_id, response)
    }

    fn source_name(&self) -> &str {
        "FRED"
    }
}

#[derive(Debug, Deserialize)]
struct CsvObservation {
    date: String,
    value: String,
}

/// Offline source: `<dir>/<series id>.csv` with `date,value` columns
pub struct CsvSeriesSource {
    dir: PathBuf,
}

impl CsvSeriesSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        CsvSeriesSource { dir: dir.into() }
    }
}

impl SeriesSource for CsvSeriesSource {
    fn fetch(&self, series_id: &str) -> Result<Vec<Observation>, EconomicError> {
        let path = self.dir.join(format!("{}.csv", series_id));
        let invalid = |reason: String| EconomicError::InvalidObservation {
            series_id: series_id.to_string(),
            reason,
        };

        let mut reader = csv::Reader::from_path(&path).map_err(|e| EconomicError::Fetch {
            series_id: series_id.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        let mut observations = Vec::new();
        for row in reader.deserialize::<CsvObservation>() {
            let row = row.map_err(|e| invalid(e.to_string()))?;
            let value = row.value.trim();
            if value.is_empty() || value == "." {
                continue;
            }
            let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
                .map_err(|e| invalid(format!("date '{}': {}", row.date, e)))?;
            let value = value
                .parse::<f64>()
                .map_err(|e| invalid(format!("value '{}': {}", row.value, e)))?;
            observations.push(Observation { date, value });
        }
        Ok(observations)
    }

    fn source_name(&self) -> &str {
        "csv"
    }
}

// ============================================================================
// INDEX BUILDER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub id: String,
    pub name: String,
}

impl SeriesRequest {
    pub fn new(id: &str, name: &str) -> Self {
        SeriesRequest {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IndexAvailability {
    Available,
    Unavailable { reason: String },
}

impl IndexAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, IndexAvailability::Available)
    }
}

/// Output of one build: rebased series, composite, per-series availability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndexSet {
    pub start_year: String,
    pub series: BTreeMap<String, EconomicSeries>,
    pub composite: Option<EconomicSeries>,
    pub availability: BTreeMap<String, IndexAvailability>,
}

impl EconomicIndexSet {
    pub fn is_complete(&self) -> bool {
        self.availability.values().all(IndexAvailability::is_available)
    }

    pub fn unavailable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.availability.iter().filter_map(|(id, a)| match a {
            IndexAvailability::Unavailable { reason } => Some((id.as_str(), reason.as_str())),
            IndexAvailability::Available => None,
        })
    }

    /// Benchmark curve for spending: the composite extrapolated to `end_year`
    /// and rebased so `start_year` equals `spending_at_start`.
    ///
    /// `None` when the composite couldn't be built.
    pub fn benchmark(
        &self,
        start_year: &str,
        end_year: &str,
        spending_at_start: f64,
        window: usize,
    ) -> Option<Result<EconomicSeries, EconomicError>> {
        let composite = self.composite.as_ref()?;
        Some(
            composite
                .extrapolate(end_year, window)
                .and_then(|s| s.rebase(start_year, spending_at_start)),
        )
    }

    pub fn summary(&self) -> String {
        let available = self.availability.values().filter(|a| a.is_available()).count();
        format!(
            "{}/{} series available from {}, composite {}",
            available,
            self.availability.len(),
            self.start_year,
            if self.composite.is_some() { "built" } else { "unavailable" }
        )
    }
}

pub struct EconomicIndexBuilder {
    requests: Vec<SeriesRequest>,
    start_year: String,
    multiplier: f64,

    /// (inflation id, population id) for the composite
    composite: Option<(String, String)>,
}

impl EconomicIndexBuilder {
    pub const COMPOSITE_ID: &'static str = "CPI_X_POP";

    pub fn new(start_year: &str) -> Self {
        EconomicIndexBuilder {
            requests: Vec::new(),
            start_year: start_year.to_string(),
            multiplier: 1.0,
            composite: None,
        }
    }

    pub fn with_series(mut self, request: SeriesRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build inflation × population from two already-requested series ids
    pub fn with_composite(mut self, inflation_id: &str, population_id: &str) -> Self {
        self.composite = Some((inflation_id.to_string(), population_id.to_string()));
        self
    }

    fn load(&self, source: &dyn SeriesSource, request: &SeriesRequest) -> Result<EconomicSeries, EconomicError> {
        let observations = source.fetch(&request.id)?;
        EconomicSeries::from_observations(&request.id, &request.name, &observations)?.rebase(&self.start_year, 1.0)
    }

    /// Fetch and rebase every requested series. Never fails as a whole:
    /// a series that can't be loaded is marked unavailable.
    pub fn build(&self, source: &dyn SeriesSource) -> EconomicIndexSet {
        let mut unit: BTreeMap<String, EconomicSeries> = BTreeMap::new();
        let mut availability = BTreeMap::new();

        for request in &self.requests {
            match self.load(source, request) {
                Ok(series) => {
                    availability.insert(request.id.clone(), IndexAvailability::Available);
                    unit.insert(request.id.clone(), series);
                }
                Err(e) => {
                    warn!(series = %request.id, source = source.source_name(), error = %e, "economic series unavailable");
                    availability.insert(request.id.clone(), IndexAvailability::Unavailable { reason: e.to_string() });
                }
            }
        }

        let composite = self.composite.as_ref().and_then(|(inflation, population)| {
            let a = unit.get(inflation)?;
            let b = unit.get(population)?;
            let name = format!("{} x {}", a.name, b.name);
            Some(a.composite(b, Self::COMPOSITE_ID, &name).scale(self.multiplier))
        });

        let series: BTreeMap<String, EconomicSeries> = unit
            .into_iter()
            .map(|(id, s)| (id, s.scale(self.multiplier)))
            .collect();

        info!(
            requested = self.requests.len(),
            available = series.len(),
            composite = composite.is_some(),
            "economic indices built"
        );

        EconomicIndexSet {
            start_year: self.start_year.clone(),
            series,
            composite,
            availability,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
