//! # Financial Statement Combiner
//!
//! A library for turning financial statement tables extracted independently
//! from many annual reports into one normalized, comparable dataset.
//!
//! ## Core Concepts
//!
//! - **Raw tables**: One table per source document and statement Type (Financial, Income, Shares)
//! - **Multipliers**: Meta-rows that correct unit mismatches (thousands vs. millions) per period
//! - **Notes**: Reviewer tags (`excluded`, `negated`, `intangibles`) kept in a persistent store
//! - **Per-share values**: Every line divided by the document's share count for that period
//! - **Merge key**: `(Type, Category, Item)`, normalized, unifying rows across documents
//! - **Canonical order**: Append-only reference lists that keep rows in place across runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_statement_combiner::*;
//!
//! let mut table = RawTable::new("10-K_2022", StatementType::Financial, vec!["2022".into()]);
//! table.push_row("Financial Multiplier", "", &["1000"]);
//! table.push_row("Revenue", "Sales", &["100"]);
//!
//! let config = PipelineConfig::new("ACME", OnMissingDivisor::Fail);
//! let mut notes = NoteAssignmentStore::in_memory();
//! let mut order = CanonicalOrder::new();
//!
//! let output = CombinationPipeline::new(config).run(
//!     &[DocumentInput::new("10-K_2022.pdf", vec![table])],
//!     &mut notes,
//!     &mut order,
//!     &ColumnAssignment::new(),
//!     None,
//! )?;
//! ```

pub mod combiner;
pub mod error;
pub mod ingestion;
pub mod multipliers;
pub mod normalizer;
pub mod notes;
pub mod ordering;
pub mod per_share;
pub mod periods;
pub mod schema;
pub mod side_tables;
pub mod utils;
pub mod workspace;

pub use combiner::{
    document_stem, ColumnAssignment, ColumnSource, CombinedDataset, CombinedRecord, Combiner,
    DocumentTables,
};
pub use error::{CombinerError, ErrorKind, Result};
pub use ingestion::{
    check_duplicates, load_document, parse_extraction_response, read_raw_table,
    ExtractionResponse,
};
pub use multipliers::{DocumentMultipliers, MultiplierKind, MultiplierSet, StockMultiplierFile};
pub use normalizer::{normalize_row, normalize_table};
pub use notes::{NoteAssignmentStore, NoteKey};
pub use ordering::{CanonicalOrder, OrderedRecord};
pub use per_share::{PerShareNormalizer, ShareCountSeries};
pub use periods::{parse_period_label, resolve_header, PeriodAnchor, ResolvedPeriod};
pub use schema::*;
pub use side_tables::SideTables;
pub use workspace::{CompanyWorkspace, RunReport};

use log::{debug, info};
use multipliers::is_multiplier_row;
use std::collections::BTreeMap;

/// Raw tables of one source document, in the order documents were added.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub document: String,
    pub tables: Vec<RawTable>,
}

impl DocumentInput {
    pub fn new(document: impl Into<String>, tables: Vec<RawTable>) -> Self {
        Self {
            document: document.into(),
            tables,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataset: CombinedDataset,
    /// Share-count series per document, for the side tables.
    pub share_counts: BTreeMap<String, ShareCountSeries>,
    pub appended_order_entries: usize,
}

pub struct CombinationPipeline {
    config: PipelineConfig,
}

impl CombinationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every stage over `documents`.
    ///
    /// `notes` and `order` are updated only when the whole run succeeds; on
    /// error they are left exactly as passed in.
    pub fn run(
        &self,
        documents: &[DocumentInput],
        notes: &mut NoteAssignmentStore,
        order: &mut CanonicalOrder,
        assignment: &ColumnAssignment,
        stock_file: Option<&StockMultiplierFile>,
    ) -> Result<PipelineOutput> {
        info!(
            "Combining {} documents for {} ({:?}, on missing divisor: {:?})",
            documents.len(),
            self.config.ticker,
            self.config.normalization,
            self.config.on_missing_divisor
        );

        let mut staged_notes = notes.clone();
        let mut staged_order = order.clone();

        let mut combined_input = Vec::with_capacity(documents.len());
        let mut share_counts = BTreeMap::new();
        for doc in documents {
            let (tables, series) = self.prepare_document(doc, &mut staged_notes, stock_file)?;
            share_counts.insert(doc.document.clone(), series);
            combined_input.push(DocumentTables {
                document: doc.document.clone(),
                tables,
            });
        }

        let combiner = Combiner::new(assignment, &staged_notes, self.config.value_precision);
        let mut dataset = combiner.combine(&combined_input)?;

        let appended = staged_order.update(&dataset.records);
        staged_order.sort(&mut dataset.records);

        *notes = staged_notes;
        *order = staged_order;

        Ok(PipelineOutput {
            dataset,
            share_counts,
            appended_order_entries: appended,
        })
    }

    /// Notes, multipliers, row rules and per-share division for one document.
    fn prepare_document(
        &self,
        doc: &DocumentInput,
        notes: &mut NoteAssignmentStore,
        stock_file: Option<&StockMultiplierFile>,
    ) -> Result<(Vec<NormalizedTable>, ShareCountSeries)> {
        let mut tables = doc.tables.clone();
        for table in &mut tables {
            table.periods = periods::dedupe_labels(&table.periods);
            check_duplicates(table)?;
            for row in &mut table.rows {
                if is_multiplier_row(row) {
                    continue;
                }
                let key = NoteKey::new(row.statement, &row.category, &row.item);
                row.note = notes.seed(key, &row.note).to_string();
            }
        }

        let multipliers = DocumentMultipliers::resolve(&doc.document, &tables, stock_file)?;
        let normalized: Vec<NormalizedTable> = tables
            .iter()
            .map(|t| normalize_table(t, &multipliers))
            .collect();

        match self.config.normalization {
            NormalizationMode::PerShare => {
                let normalizer = PerShareNormalizer::new(
                    self.config.on_missing_divisor,
                    self.config.include_intangibles,
                );
                let result = normalizer.normalize_document(&doc.document, &normalized)?;
                debug!(
                    "{}: per-share values from '{}'",
                    doc.document,
                    result.share_counts.source_item.as_deref().unwrap_or("none")
                );
                Ok((result.tables, result.share_counts))
            }
            NormalizationMode::Reported => {
                let series = ShareCountSeries::locate(&doc.document, &normalized);
                let tables = normalized
                    .into_iter()
                    .map(|mut table| {
                        if !self.config.include_intangibles {
                            table
                                .rows
                                .retain(|r| NoteKind::of(&r.note) != NoteKind::Intangibles);
                        }
                        table
                    })
                    .collect();
                Ok((tables, series))
            }
        }
    }
}

pub fn combine_documents(
    config: PipelineConfig,
    documents: &[DocumentInput],
    notes: &mut NoteAssignmentStore,
    order: &mut CanonicalOrder,
) -> Result<PipelineOutput> {
    CombinationPipeline::new(config).run(documents, notes, order, &ColumnAssignment::new(), None)
}
