use crate::error::{CombinerError, Result};
use crate::notes::{NoteAssignmentStore, NoteKey};
use crate::ordering::OrderedRecord;
use crate::periods::{dedupe_labels, order_columns, ColumnRef};
use crate::schema::{NormalizedTable, StatementType};
use crate::utils::{format_cell, is_null_placeholder, normalize_key_text, parse_numeric, write_atomic};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const COMBINED_FILE: &str = "combined.csv";
pub const COLUMN_LABELS_FILE: &str = "column_labels.csv";
pub const BASE_COLUMNS: [&str; 4] = ["Type", "Category", "Item", "Note"];

/// `"10-K_2022.csv"` → `"10-K_2022"`. Only `.pdf` and `.csv` extensions are
/// stripped, so stems pass through unchanged.
pub fn document_stem(document: &str) -> String {
    let name = Path::new(document.trim())
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.trim().to_string());
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("pdf") || ext.eq_ignore_ascii_case("csv") => {
            stem.to_string()
        }
        _ => name,
    }
}

/// Reviewer-assigned period labels, keyed by `(document, column position)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnAssignment {
    labels: BTreeMap<(String, usize), String>,
}

impl ColumnAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, document: &str, position: usize, label: &str) {
        let label = label.trim();
        let key = (document_stem(document), position);
        if label.is_empty() {
            self.labels.remove(&key);
        } else {
            self.labels.insert(key, label.to_string());
        }
    }

    pub fn get(&self, document: &str, position: usize) -> Option<&str> {
        self.labels
            .get(&(document_stem(document), position))
            .map(String::as_str)
    }

    /// The assigned label, else the extracted header label, else
    /// `Value <n>` with `n` counted from 1.
    pub fn label_for(&self, document: &str, position: usize, header_label: &str) -> String {
        if let Some(label) = self.get(document, position) {
            return label.to_string();
        }
        if !header_label.trim().is_empty() {
            return header_label.trim().to_string();
        }
        format!("Value {}", position + 1)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Loads `column_labels.csv` (`Document,Position,Label`); a missing file
    /// is an empty assignment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut assignment = Self::new();
        if !path.exists() {
            return Ok(assignment);
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        for record in reader.records() {
            let record = record?;
            let document = record.get(0).unwrap_or("").trim();
            let raw_position = record.get(1).unwrap_or("").trim();
            let Ok(position) = raw_position.parse::<usize>() else {
                log::warn!(
                    "Ignoring column label for '{}' with position '{}'",
                    document,
                    raw_position
                );
                continue;
            };
            assignment.set(document, position, record.get(2).unwrap_or(""));
        }
        Ok(assignment)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["Document", "Position", "Label"])?;
        for ((document, position), label) in &self.labels {
            writer.write_record([document.as_str(), position.to_string().as_str(), label.as_str()])?;
        }
        let data = writer.into_inner().map_err(|e| e.into_error())?;
        write_atomic(path, &data)?;
        Ok(())
    }
}

/// One row of the combined dataset: a merge key, its note, and formatted
/// cells keyed by `<document-stem>.<period-label>` column name.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRecord {
    pub statement: StatementType,
    pub category: String,
    pub item: String,
    pub note: String,
    pub values: BTreeMap<String, String>,
}

impl CombinedRecord {
    pub fn cell(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        parse_numeric(self.cell(column))
    }

    pub fn merge_key(&self) -> (StatementType, String, String) {
        merge_key(self.statement, &self.category, &self.item)
    }
}

impl OrderedRecord for CombinedRecord {
    fn statement(&self) -> StatementType {
        self.statement
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn item(&self) -> &str {
        &self.item
    }
}

pub fn merge_key(statement: StatementType, category: &str, item: &str) -> (StatementType, String, String) {
    (statement, normalize_key_text(category), normalize_key_text(item))
}

/// Where a combined column came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSource {
    pub document: String,
    /// Extracted header label, before any reviewer assignment.
    pub period: String,
    /// Label after assignment, as used in the column name.
    pub label: String,
    pub position: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedDataset {
    pub columns: Vec<String>,
    pub records: Vec<CombinedRecord>,
    pub sources: BTreeMap<String, ColumnSource>,
}

impl CombinedDataset {
    pub fn find(&self, statement: StatementType, category: &str, item: &str) -> Option<&CombinedRecord> {
        let key = merge_key(statement, category, item);
        self.records.iter().find(|r| r.merge_key() == key)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header: Vec<&str> = BASE_COLUMNS
            .iter()
            .copied()
            .chain(self.columns.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;

        for record in &self.records {
            let mut row: Vec<&str> = vec![
                record.statement.as_str(),
                record.category.as_str(),
                record.item.as_str(),
                record.note.as_str(),
            ];
            row.extend(self.columns.iter().map(|c| record.cell(c)));
            writer.write_record(&row)?;
        }
        Ok(writer.into_inner().map_err(|e| e.into_error())?)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let data = self.to_csv_bytes()?;
        write_atomic(path, &data)?;
        log::info!(
            "Wrote {} combined rows x {} columns to {}",
            self.records.len(),
            self.columns.len(),
            path.display()
        );
        Ok(())
    }

    /// Reloads a combined file. `nan`, `none` and `null` cells read as blank;
    /// rows whose Type is not a statement Type are skipped.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let base_ok = headers.len() >= BASE_COLUMNS.len()
            && BASE_COLUMNS
                .iter()
                .zip(headers.iter())
                .all(|(expected, actual)| expected.eq_ignore_ascii_case(actual.trim()));
        if !base_ok {
            return Err(CombinerError::MalformedTable {
                source_name: path.display().to_string(),
                details: format!("expected leading columns {:?}", BASE_COLUMNS),
            });
        }
        let columns: Vec<String> = headers
            .iter()
            .skip(BASE_COLUMNS.len())
            .map(|h| h.trim().to_string())
            .collect();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            let raw_type = record.get(0).unwrap_or("");
            let Some(statement) = StatementType::from_label(raw_type) else {
                log::warn!("Skipping combined row with Type '{}'", raw_type);
                continue;
            };
            let mut values = BTreeMap::new();
            for (idx, column) in columns.iter().enumerate() {
                let cell = record.get(idx + BASE_COLUMNS.len()).unwrap_or("").trim();
                if !is_null_placeholder(cell) {
                    values.insert(column.clone(), cell.to_string());
                }
            }
            let note = record.get(3).unwrap_or("").trim();
            records.push(CombinedRecord {
                statement,
                category: record.get(1).unwrap_or("").trim().to_string(),
                item: record.get(2).unwrap_or("").trim().to_string(),
                note: if is_null_placeholder(note) {
                    String::new()
                } else {
                    note.to_string()
                },
                values,
            });
        }

        Ok(Self {
            columns,
            records,
            sources: BTreeMap::new(),
        })
    }
}

/// One source document's normalized tables, in insertion order.
#[derive(Debug, Clone)]
pub struct DocumentTables {
    pub document: String,
    pub tables: Vec<NormalizedTable>,
}

/// Merges per-document tables into one record per merge key.
pub struct Combiner<'a> {
    assignment: &'a ColumnAssignment,
    notes: &'a NoteAssignmentStore,
    precision: usize,
}

impl<'a> Combiner<'a> {
    pub fn new(assignment: &'a ColumnAssignment, notes: &'a NoteAssignmentStore, precision: usize) -> Self {
        Self {
            assignment,
            notes,
            precision,
        }
    }

    /// Column names for one table, after label assignment and
    /// disambiguation.
    fn column_names(&self, stem: &str, table: &NormalizedTable) -> Vec<String> {
        let labels: Vec<String> = table
            .periods
            .iter()
            .enumerate()
            .map(|(pos, header)| self.assignment.label_for(stem, pos, header))
            .collect();
        dedupe_labels(&labels)
            .into_iter()
            .map(|label| format!("{}.{}", stem, label))
            .collect()
    }

    pub fn combine(&self, documents: &[DocumentTables]) -> Result<CombinedDataset> {
        let mut records: Vec<CombinedRecord> = Vec::new();
        let mut index: HashMap<(StatementType, String, String), usize> = HashMap::new();
        let mut refs: Vec<ColumnRef> = Vec::new();
        let mut sources: BTreeMap<String, ColumnSource> = BTreeMap::new();

        for (doc_idx, doc) in documents.iter().enumerate() {
            let stem = document_stem(&doc.document);
            for table in &doc.tables {
                let names = self.column_names(&stem, table);
                for (pos, name) in names.iter().enumerate() {
                    if sources.contains_key(name) {
                        continue;
                    }
                    let label = &name[stem.len() + 1..];
                    let mut column = ColumnRef::new(doc_idx, pos, label);
                    column.label = name.clone();
                    refs.push(column);
                    sources.insert(
                        name.clone(),
                        ColumnSource {
                            document: doc.document.clone(),
                            period: table.periods[pos].clone(),
                            label: label.to_string(),
                            position: pos,
                        },
                    );
                }

                for row in &table.rows {
                    let key = merge_key(row.statement, &row.category, &row.item);
                    let slot = match index.get(&key) {
                        Some(&slot) => slot,
                        None => {
                            let note_key = NoteKey::new(row.statement, &row.category, &row.item);
                            records.push(CombinedRecord {
                                statement: row.statement,
                                category: row.category.trim().to_string(),
                                item: row.item.trim().to_string(),
                                note: self.notes.note_for(&note_key).to_string(),
                                values: BTreeMap::new(),
                            });
                            index.insert(key, records.len() - 1);
                            records.len() - 1
                        }
                    };
                    let record = &mut records[slot];
                    for (pos, name) in names.iter().enumerate() {
                        let cell = format_cell(row.value(pos), row.unit(pos), self.precision);
                        let existing = record.values.entry(name.clone()).or_default();
                        if existing.is_empty() {
                            *existing = cell;
                        }
                    }
                }
            }
        }

        order_columns(&mut refs);
        let columns: Vec<String> = refs.into_iter().map(|c| c.label).collect();

        log::info!(
            "Combined {} documents into {} rows x {} columns",
            documents.len(),
            records.len(),
            columns.len()
        );
        Ok(CombinedDataset {
            columns,
            records,
            sources,
        })
    }
}
