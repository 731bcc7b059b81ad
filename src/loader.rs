// 🏗️ Raw Table Loaders - Source documents → LineItemTable
//
// Each jurisdiction publishes its budget differently:
//   - Maine: biennial headline table (text extracted from the budget PDF)
//   - New Hampshire: one expenditure CSV per fiscal year
//   - anything already normalized: wide CSV (Department, Funding Source, years...)
//
// Every loader yields the same shape. Absent cells stay absent.

use crate::config::SourceSpec;
use crate::jurisdiction::Jurisdiction;
use crate::table::{FundingSource, LineItemKey, LineItemTable, DEFAULT_GRAND_TOTAL_DEPARTMENT};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// CORE TRAIT
// ============================================================================

/// TableLoader - turns one source file into a line-item table
pub trait TableLoader {
    fn load(&self, path: &Path) -> Result<LineItemTable>;

    /// Jurisdiction whose documents this loader understands
    fn jurisdiction(&self) -> Jurisdiction;

    /// Loader version (recorded with each run)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Amount with thousands separators; parenthesised amounts are negative
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body.chars().filter(|c| *c != ',' && *c != '$').collect();
    let value: f64 = cleaned.trim().parse().ok()?;
    Some(if negative { -value } else { value })
}

// ============================================================================
// MAINE HEADLINE TABLE
// ============================================================================

/// Maine biennial headline table.
///
/// ```text
/// 01 DEPARTMENT OF EDUCATION
/// GENERAL FUND 1,500,000 1,600,000
/// FEDERAL EXPENDITURES FUND 200,000 (5,000)
/// DEPARTMENT TOTAL 1,700,000 1,595,000
/// ```
///
/// A line starting with a digit opens a department (the leading page/code
/// token is dropped). A `<funding source> <amount> <amount>` line adds a row
/// for the current department. Everything else is ignored.
pub struct HeadlineTableParser {
    pub first_year: String,
    pub second_year: String,

    /// Extra lines that open a department even without a leading digit
    department_markers: Vec<String>,
    funding_line: Regex,
}

impl HeadlineTableParser {
    pub fn new(first_year: &str, second_year: &str) -> Result<Self> {
        let funding_line = Regex::new(r"^(.+?)\s+(\(?\d{1,3}(?:,\d{3})*\)?)\s+(\(?\d{1,3}(?:,\d{3})*\)?)$")
            .context("Failed to compile funding line pattern")?;
        Ok(HeadlineTableParser {
            first_year: first_year.to_string(),
            second_year: second_year.to_string(),
            department_markers: vec![DEFAULT_GRAND_TOTAL_DEPARTMENT.to_string()],
            funding_line,
        })
    }

    /// Builder pattern: treat `marker` lines as department headers
    pub fn with_department_marker(mut self, marker: &str) -> Self {
        self.department_markers.push(marker.trim().to_string());
        self
    }

    fn department_header(&self, line: &str) -> Option<String> {
        if self.department_markers.iter().any(|m| m == line) {
            return Some(line.to_string());
        }
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        match line.split_once(' ') {
            Some((_, name)) => Some(name.trim().to_string()),
            None => Some(line.to_string()),
        }
    }

    /// Parse already-extracted text
    pub fn parse_text(&self, text: &str) -> LineItemTable {
        let mut table = LineItemTable::with_years([self.first_year.as_str(), self.second_year.as_str()]);
        let mut current_department: Option<String> = None;

        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(department) = self.department_header(line) {
                current_department = Some(department);
                continue;
            }

            let Some(caps) = self.funding_line.captures(line) else {
                continue;
            };
            let Some(department) = current_department.as_deref() else {
                debug!(line = line_num + 1, "funding line before any department, skipped");
                continue;
            };

            let key = LineItemKey::new(department, FundingSource::parse(&caps[1]));
            // Pattern guarantees digits; a failed parse falls back to zero
            let first = parse_amount(&caps[2]).unwrap_or(0.0);
            let second = parse_amount(&caps[3]).unwrap_or(0.0);
            table.add_amount(key.clone(), &self.first_year, first);
            table.add_amount(key, &self.second_year, second);
        }

        table
    }
}

impl TableLoader for HeadlineTableParser {
    fn load(&self, path: &Path) -> Result<LineItemTable> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read headline table: {}", path.display()))?;
        let table = self.parse_text(&text);
        info!(
            path = %path.display(),
            rows = table.len(),
            years = %format!("{}-{}", self.first_year, self.second_year),
            "loaded headline table"
        );
        Ok(table)
    }

    fn jurisdiction(&self) -> Jurisdiction {
        Jurisdiction::Maine
    }
}

// ============================================================================
// NEW HAMPSHIRE EXPENDITURE CSV
// ============================================================================

/// New Hampshire expenditure report for one fiscal year.
///
/// Only department appropriations are used, so every row's funding source is
/// DEPARTMENT TOTAL. Repeated departments are summed.
pub struct ExpenditureCsvLoader {
    pub year: String,
    fiscal_prefix: Regex,
}

impl ExpenditureCsvLoader {
    pub fn new(year: &str) -> Result<Self> {
        let fiscal_prefix = Regex::new(r"FY\d{2} ").context("Failed to compile fiscal-year prefix pattern")?;
        Ok(ExpenditureCsvLoader {
            year: year.to_string(),
            fiscal_prefix,
        })
    }

    /// "June\nFY24 Apropriation" → "APROPRIATION"
    pub fn normalize_header(&self, header: &str) -> String {
        let upper = header.to_uppercase().replace('\n', " ").replace("JUNE ", "");
        let stripped = self.fiscal_prefix.replace_all(&upper, "");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn parse_reader<R: std::io::Read>(&self, reader: R, source: &str) -> Result<LineItemTable> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read CSV headers in {}", source))?
            .iter()
            .map(|h| self.normalize_header(h))
            .collect();

        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
        let Some(department_col) = find(&["DEPARTMENT"]) else {
            bail!("{}: no DEPARTMENT column (headers: {:?})", source, headers);
        };
        let Some(amount_col) = find(&["APROPRIATION", "APPROPRIATION"]) else {
            bail!("{}: no appropriation column (headers: {:?})", source, headers);
        };

        let mut table = LineItemTable::with_years([self.year.as_str()]);
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Failed to parse CSV line {} in {}", line_num + 2, source))?;

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let department = record.get(department_col).unwrap_or("").trim();
            if department.is_empty() {
                debug!(line = line_num + 2, source, "row without department, skipped");
                continue;
            }

            let raw_amount = record.get(amount_col).unwrap_or("");
            if raw_amount.trim().is_empty() {
                table.touch_row(LineItemKey::department_total(department));
                continue;
            }
            let amount = parse_amount(raw_amount)
                .with_context(|| format!("{} line {}: bad amount '{}'", source, line_num + 2, raw_amount))?;

            table.add_amount(LineItemKey::department_total(department), &self.year, amount);
        }

        Ok(table)
    }
}

impl TableLoader for ExpenditureCsvLoader {
    fn load(&self, path: &Path) -> Result<LineItemTable> {
        let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
        let table = self.parse_reader(file, &path.display().to_string())?;
        info!(path = %path.display(), rows = table.len(), year = %self.year, "loaded expenditure csv");
        Ok(table)
    }

    fn jurisdiction(&self) -> Jurisdiction {
        Jurisdiction::NewHampshire
    }
}

// ============================================================================
// WIDE LINE-ITEM CSV
// ============================================================================

/// `Department,Funding Source,<year>,<year>,...`; empty cells are absent
pub struct LineItemCsvLoader {
    jurisdiction: Jurisdiction,
}

impl LineItemCsvLoader {
    pub fn new(jurisdiction: Jurisdiction) -> Self {
        LineItemCsvLoader { jurisdiction }
    }

    pub fn parse_reader<R: std::io::Read>(&self, reader: R, source: &str) -> Result<LineItemTable> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read CSV headers in {}", source))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.len() < 2 || headers[0] != "Department" || headers[1] != "Funding Source" {
            bail!("{}: expected 'Department,Funding Source,<years>' header, got {:?}", source, headers);
        }
        let years = &headers[2..];

        let mut table = LineItemTable::with_years(years.iter().cloned());
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Failed to parse CSV line {} in {}", line_num + 2, source))?;
            let key = LineItemKey::new(
                record.get(0).unwrap_or(""),
                FundingSource::parse(record.get(1).unwrap_or("")),
            );
            table.touch_row(key.clone());

            for (offset, year) in years.iter().enumerate() {
                let raw = record.get(offset + 2).unwrap_or("");
                if raw.trim().is_empty() {
                    continue;
                }
                let amount = parse_amount(raw).with_context(|| {
                    format!("{} line {}, year {}: bad amount '{}'", source, line_num + 2, year, raw)
                })?;
                table.add_amount(key.clone(), year, amount);
            }
        }

        Ok(table)
    }
}

impl TableLoader for LineItemCsvLoader {
    fn load(&self, path: &Path) -> Result<LineItemTable> {
        let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
        let table = self.parse_reader(file, &path.display().to_string())?;
        info!(path = %path.display(), rows = table.len(), "loaded line-item csv");
        Ok(table)
    }

    fn jurisdiction(&self) -> Jurisdiction {
        self.jurisdiction
    }
}

/// Write any table in the wide line-item shape
pub fn write_csv<W: std::io::Write>(table: &LineItemTable, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let years: Vec<&String> = table.years().collect();

    let mut header = vec!["Department".to_string(), "Funding Source".to_string()];
    header.extend(years.iter().map(|y| y.to_string()));
    writer.write_record(&header).context("Failed to write CSV header")?;

    for (key, amounts) in table.rows() {
        let mut record = vec![key.department.clone(), key.funding_source.label().to_string()];
        record.extend(
            years
                .iter()
                .map(|y| amounts.get(*y).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer
            .write_record(&record)
            .with_context(|| format!("Failed to write row {}", key))?;
    }

    writer.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

// ============================================================================
// FACTORY
// ============================================================================

/// Loader for a configured source (factory, like one parser per bank)
pub fn get_loader(jurisdiction: Jurisdiction, spec: &SourceSpec) -> Result<Box<dyn TableLoader>> {
    let loader: Box<dyn TableLoader> = match spec {
        SourceSpec::HeadlineText {
            first_year, second_year, ..
        } => Box::new(HeadlineTableParser::new(first_year, second_year)?),
        SourceSpec::ExpenditureCsv { year, .. } => Box::new(ExpenditureCsvLoader::new(year)?),
        SourceSpec::LineItemCsv { .. } => Box::new(LineItemCsvLoader::new(jurisdiction)),
    };

    if loader.jurisdiction() != jurisdiction {
        bail!(
            "{} source {} is a {} document format",
            jurisdiction,
            spec.path().display(),
            loader.jurisdiction()
        );
    }
    Ok(loader)
}

/// Load and merge every source of one jurisdiction.
///
/// Relative paths resolve against `base_dir`. A fiscal year delivered by two
/// sources is an error rather than a silent double count.
pub fn load_sources(jurisdiction: Jurisdiction, specs: &[SourceSpec], base_dir: &Path) -> Result<LineItemTable> {
    let mut merged = LineItemTable::new();

    for spec in specs {
        let path = base_dir.join(spec.path());
        let loader = get_loader(jurisdiction, spec)?;
        let table = loader
            .load(&path)
            .with_context(|| format!("Failed to load {} source {}", jurisdiction, path.display()))?;

        if let Some(year) = table.years().find(|y| merged.has_year(y)) {
            bail!("{} year {} delivered by more than one source ({})", jurisdiction, year, path.display());
        }
        merged.merge(&table);
    }

    debug!(jurisdiction = jurisdiction.code(), rows = merged.len(), "sources merged");
    Ok(merged)
}

// ============================================================================
// TESTS
// ============================================================================
