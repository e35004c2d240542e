use crate::combiner::{CombinedDataset, ColumnAssignment, COLUMN_LABELS_FILE, COMBINED_FILE};
use crate::error::{CombinerError, Result};
use crate::ingestion::load_document;
use crate::multipliers::{StockMultiplierFile, STOCK_MULTIPLIER_FILE};
use crate::notes::{NoteAssignmentStore, NOTE_STORE_FILE};
use crate::ordering::{CanonicalOrder, CATEGORY_ORDER_FILE, ITEM_ORDER_FILE};
use crate::schema::PipelineConfig;
use crate::side_tables::{
    ReleaseDates, SideTables, StockPrices, RELEASE_DATES_FILE, STOCK_PRICES_FILE,
};
use crate::utils::{write_atomic, write_atomic_all};
use crate::{CombinationPipeline, DocumentInput};
use std::fs;
use std::path::{Path, PathBuf};

pub const SCRAPE_DIR: &str = "openapiscrape";
pub const CONFIG_FILE: &str = "combiner.json";

#[derive(Debug, Clone)]
pub struct RunReport {
    pub dataset: CombinedDataset,
    pub side_tables: SideTables,
    pub documents: usize,
    pub appended_order_entries: usize,
}

/// On-disk layout of one company directory:
///
/// ```text
/// <root>/
///   combiner.json
///   openapiscrape/<document>/<Type>.csv
///   openapiscrape/<document>/<Type>_multiplier.txt
///   type_category_item_assignments.csv
///   category_order.csv, item_order.csv
///   column_labels.csv, stock_multipliers.csv
///   ReleaseDates.csv, StockPrices.csv
///   combined.csv, share_counts.json, factor_tooltips.json, pdf_sources.json
/// ```
///
/// Runs against the same workspace must not overlap.
#[derive(Debug, Clone)]
pub struct CompanyWorkspace {
    root: PathBuf,
}

impl CompanyWorkspace {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scrape_dir(&self) -> PathBuf {
        self.root.join(SCRAPE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn note_store_path(&self) -> PathBuf {
        self.root.join(NOTE_STORE_FILE)
    }

    pub fn category_order_path(&self) -> PathBuf {
        self.root.join(CATEGORY_ORDER_FILE)
    }

    pub fn item_order_path(&self) -> PathBuf {
        self.root.join(ITEM_ORDER_FILE)
    }

    pub fn combined_path(&self) -> PathBuf {
        self.root.join(COMBINED_FILE)
    }

    pub fn column_labels_path(&self) -> PathBuf {
        self.root.join(COLUMN_LABELS_FILE)
    }

    pub fn stock_multipliers_path(&self) -> PathBuf {
        self.root.join(STOCK_MULTIPLIER_FILE)
    }

    pub fn load_config(&self) -> Result<PipelineConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Err(CombinerError::InvalidConfig(format!(
                "{} not found",
                path.display()
            )));
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| CombinerError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn save_config(&self, config: &PipelineConfig) -> Result<()> {
        let data = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.config_path(), &data)?;
        Ok(())
    }

    /// Document directories under the scrape folder, sorted by name so
    /// document insertion order is stable.
    pub fn document_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.scrape_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut documents = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                documents.push((name, entry.path()));
            }
        }
        documents.sort();
        Ok(documents)
    }

    pub fn load_documents(&self) -> Result<Vec<DocumentInput>> {
        let mut documents = Vec::new();
        for (name, path) in self.document_dirs()? {
            let tables = load_document(&path, &name)?;
            if tables.is_empty() {
                log::debug!("Skipping {}: no statement tables", name);
                continue;
            }
            documents.push(DocumentInput::new(name, tables));
        }
        Ok(documents)
    }

    /// Writes `stock_multipliers.csv` listing every period label found in
    /// the extracted tables with factor 1. Existing factors are kept.
    pub fn generate_stock_multipliers(&self) -> Result<StockMultiplierFile> {
        let path = self.stock_multipliers_path();
        let existing = StockMultiplierFile::load(&path)?;
        let documents = self.load_documents()?;

        let labels: Vec<&str> = documents
            .iter()
            .flat_map(|d| d.tables.iter())
            .flat_map(|t| t.periods.iter().map(String::as_str))
            .collect();
        let mut file = StockMultiplierFile::generate(labels);
        for label in documents
            .iter()
            .flat_map(|d| d.tables.iter())
            .flat_map(|t| t.periods.iter())
        {
            if let Some(factor) = existing.get(label) {
                file.set(label, factor);
            }
        }
        file.save(&path)?;
        log::info!("Wrote {} stock multipliers to {}", file.len(), path.display());
        Ok(file)
    }

    /// Loads inputs and state, runs the pipeline, and persists the combined
    /// dataset, note store, canonical order and side tables. Every output is
    /// staged before any is renamed into place, so a failed stage or write
    /// leaves the previous files untouched.
    pub fn run(&self) -> Result<RunReport> {
        let config = self.load_config()?;
        let documents = self.load_documents()?;
        let mut notes = NoteAssignmentStore::load(&self.note_store_path())?;
        let mut order = CanonicalOrder::load(&self.category_order_path(), &self.item_order_path())?;
        let assignment = ColumnAssignment::load(&self.column_labels_path())?;
        let stock_file = StockMultiplierFile::load(&self.stock_multipliers_path())?;

        let pipeline = CombinationPipeline::new(config);
        let output = pipeline.run(&documents, &mut notes, &mut order, &assignment, Some(&stock_file))?;

        let releases = ReleaseDates::load(&self.root.join(RELEASE_DATES_FILE)).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable {}: {}", RELEASE_DATES_FILE, e);
            ReleaseDates::default()
        });
        let prices = StockPrices::load(&self.root.join(STOCK_PRICES_FILE)).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable {}: {}", STOCK_PRICES_FILE, e);
            StockPrices::default()
        });
        let side_tables = SideTables::build(
            &pipeline.config().ticker,
            &output.dataset,
            &output.share_counts,
            &releases,
            &prices,
        );

        let (categories, items) = order.to_csv_bytes()?;
        let mut files = vec![
            (self.combined_path(), output.dataset.to_csv_bytes()?),
            (self.category_order_path(), categories),
            (self.item_order_path(), items),
        ];
        files.extend(notes.pending_write()?);
        files.extend(side_tables.json_files(&self.root)?);
        write_atomic_all(&files)?;

        log::info!(
            "Workspace {} combined: {} rows, {} columns",
            self.root.display(),
            output.dataset.records.len(),
            output.dataset.columns.len()
        );
        Ok(RunReport {
            dataset: output.dataset,
            side_tables,
            documents: documents.len(),
            appended_order_entries: output.appended_order_entries,
        })
    }

    /// Rebuilds the canonical order files from the persisted combined
    /// dataset, keeping the relative order of entries already recorded.
    pub fn regenerate_order(&self) -> Result<CanonicalOrder> {
        let dataset = CombinedDataset::read_csv(&self.combined_path())?;
        let mut order = CanonicalOrder::load(&self.category_order_path(), &self.item_order_path())?;
        order.regenerate(&dataset.records);
        order.save(&self.category_order_path(), &self.item_order_path())?;
        Ok(order)
    }
}
