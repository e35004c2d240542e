//! Byproducts handed to the rendering layer next to the combined dataset:
//! per-ticker share counts, per-column tooltip lines, and the source
//! document of every column.

use crate::combiner::{document_stem, CombinedDataset};
use crate::error::Result;
use crate::per_share::ShareCountSeries;
use crate::utils::{parse_numeric, write_atomic_all};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const RELEASE_DATES_FILE: &str = "ReleaseDates.csv";
pub const STOCK_PRICES_FILE: &str = "StockPrices.csv";
pub const SHARE_COUNTS_FILE: &str = "share_counts.json";
pub const FACTOR_TOOLTIPS_FILE: &str = "factor_tooltips.json";
pub const PDF_SOURCES_FILE: &str = "pdf_sources.json";
pub const DEFAULT_PRICE_OFFSETS: [&str; 7] = ["-30", "-7", "-1", "0", "1", "7", "30"];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `ReleaseDates.csv`: period label → release date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseDates {
    dates: BTreeMap<String, String>,
}

impl ReleaseDates {
    pub fn load(path: &Path) -> Result<Self> {
        let mut dates = BTreeMap::new();
        if !path.exists() {
            log::debug!("No release dates at {}", path.display());
            return Ok(Self { dates });
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let date_idx = headers.iter().position(|h| h.trim() == "Date");
        let release_idx = headers.iter().position(|h| h.trim() == "ReleaseDate");
        let (Some(date_idx), Some(release_idx)) = (date_idx, release_idx) else {
            log::warn!("{} lacks Date/ReleaseDate columns", path.display());
            return Ok(Self { dates });
        };
        for record in reader.records() {
            let record = record?;
            let label = record.get(date_idx).unwrap_or("").trim();
            if !label.is_empty() {
                let release = record.get(release_idx).unwrap_or("").trim();
                dates.insert(label.to_string(), release.to_string());
            }
        }
        Ok(Self { dates })
    }

    pub fn insert(&mut self, label: &str, release: &str) {
        self.dates.insert(label.trim().to_string(), release.trim().to_string());
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.dates
            .get(label.trim())
            .map(String::as_str)
            .filter(|d| !d.is_empty())
    }
}

/// `StockPrices.csv`: one row per release date, one column per day offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockPrices {
    offsets: Vec<String>,
    prices: BTreeMap<String, BTreeMap<String, String>>,
}

impl StockPrices {
    pub fn load(path: &Path) -> Result<Self> {
        let mut table = Self::default();
        if !path.exists() {
            log::debug!("No stock prices at {}", path.display());
            return Ok(table);
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let Some(release_idx) = headers.iter().position(|h| h.trim() == "ReleaseDate") else {
            log::warn!("{} lacks a ReleaseDate column", path.display());
            return Ok(table);
        };

        let columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, h)| *idx != release_idx && !h.trim().is_empty())
            .map(|(idx, h)| (idx, h.trim().to_string()))
            .collect();
        table.offsets = columns.iter().map(|(_, h)| h.clone()).collect();
        for offset in DEFAULT_PRICE_OFFSETS {
            if !table.offsets.iter().any(|o| o == offset) {
                table.offsets.push(offset.to_string());
            }
        }

        for record in reader.records() {
            let record = record?;
            let release = record.get(release_idx).unwrap_or("").trim();
            if release.is_empty() {
                continue;
            }
            let row = columns
                .iter()
                .map(|(idx, offset)| {
                    (offset.clone(), record.get(*idx).unwrap_or("").trim().to_string())
                })
                .collect();
            table.prices.insert(release.to_string(), row);
        }
        Ok(table)
    }

    pub fn offsets(&self) -> &[String] {
        &self.offsets
    }

    pub fn price(&self, release: &str, offset: &str) -> Option<f64> {
        self.prices
            .get(release)
            .and_then(|row| row.get(offset))
            .and_then(|raw| parse_numeric(raw))
            .filter(|p| *p > 0.0)
    }
}

/// Share counts keyed by ticker, then by combined column name.
pub type ShareCountTable = BTreeMap<String, BTreeMap<String, Option<f64>>>;

pub fn build_share_counts(
    ticker: &str,
    dataset: &CombinedDataset,
    series: &BTreeMap<String, ShareCountSeries>,
) -> ShareCountTable {
    let mut counts = BTreeMap::new();
    for column in &dataset.columns {
        let Some(source) = dataset.sources.get(column) else {
            continue;
        };
        let count = match series.get(&source.document) {
            Some(s) => s.count_for(&source.period),
            None => Some(1.0),
        };
        counts.insert(column.clone(), count.map(round2));
    }
    let mut table = BTreeMap::new();
    table.insert(ticker.to_string(), counts);
    table
}

pub fn build_factor_tooltips(
    dataset: &CombinedDataset,
    releases: &ReleaseDates,
    prices: &StockPrices,
) -> BTreeMap<String, Vec<String>> {
    let mut tooltips = BTreeMap::new();
    for column in &dataset.columns {
        let label = dataset
            .sources
            .get(column)
            .map(|s| s.label.as_str())
            .unwrap_or(column.as_str());
        let release = releases.get(label).or_else(|| releases.get(column));

        let mut lines = vec![format!("Release Date: {}", release.unwrap_or("NA"))];
        for offset in prices.offsets() {
            let price = release.and_then(|r| prices.price(r, offset));
            match price {
                Some(p) => lines.push(format!("{}: {:.3}", offset, p)),
                None => lines.push(format!("{}: NaN", offset)),
            }
        }
        tooltips.insert(column.clone(), lines);
    }
    tooltips
}

pub fn build_pdf_sources(dataset: &CombinedDataset) -> BTreeMap<String, String> {
    dataset
        .sources
        .iter()
        .map(|(column, source)| (column.clone(), document_stem(&source.document)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideTables {
    pub share_counts: ShareCountTable,
    pub factor_tooltips: BTreeMap<String, Vec<String>>,
    pub pdf_sources: BTreeMap<String, String>,
}

impl SideTables {
    pub fn build(
        ticker: &str,
        dataset: &CombinedDataset,
        series: &BTreeMap<String, ShareCountSeries>,
        releases: &ReleaseDates,
        prices: &StockPrices,
    ) -> Self {
        Self {
            share_counts: build_share_counts(ticker, dataset, series),
            factor_tooltips: build_factor_tooltips(dataset, releases, prices),
            pdf_sources: build_pdf_sources(dataset),
        }
    }

    /// The three JSON files under `dir` with their contents.
    pub fn json_files(&self, dir: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
        Ok(vec![
            (
                dir.join(SHARE_COUNTS_FILE),
                serde_json::to_vec_pretty(&self.share_counts)?,
            ),
            (
                dir.join(FACTOR_TOOLTIPS_FILE),
                serde_json::to_vec_pretty(&self.factor_tooltips)?,
            ),
            (
                dir.join(PDF_SOURCES_FILE),
                serde_json::to_vec_pretty(&self.pdf_sources)?,
            ),
        ])
    }

    pub fn write_json(&self, dir: &Path) -> Result<()> {
        write_atomic_all(&self.json_files(dir)?)?;
        Ok(())
    }
}
