use crate::error::{CombinerError, Result};
use crate::multipliers::{is_multiplier_row, MultiplierKind};
use crate::periods::resolve_header;
use crate::schema::{RawRow, RawTable, StatementType};
use crate::utils::normalize_key_text;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const DEFAULT_COLUMNS: [&str; 4] = ["Category", "Subcategory", "Item", "Note"];

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:[^`\n]*)\n([\s\S]*?)```").expect("fence regex"))
}

fn multiplier_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([-+]?\d[\d,]*\.?\d*)").expect("multiplier regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Category,
    Subcategory,
    Item,
    Note,
    Type,
    ColorKey,
    Period(usize),
}

fn classify_header(header: &[String]) -> (Vec<Column>, Vec<String>) {
    let mut columns = Vec::with_capacity(header.len());
    let mut period_labels = Vec::new();
    for cell in header {
        let column = match cell.trim().to_lowercase().as_str() {
            "category" => Column::Category,
            "subcategory" => Column::Subcategory,
            "item" => Column::Item,
            "note" => Column::Note,
            "type" => Column::Type,
            "colorkey" | "color key" | "key4coloring" => Column::ColorKey,
            _ => {
                period_labels.push(cell.clone());
                Column::Period(period_labels.len() - 1)
            }
        };
        columns.push(column);
    }
    let periods = resolve_header(&period_labels)
        .into_iter()
        .map(|p| p.label)
        .collect();
    (columns, periods)
}

/// Builds a table from already-split records, the first of which is the
/// header. Blank records are skipped and short records padded.
fn table_from_records(
    source_name: &str,
    document: &str,
    statement: StatementType,
    records: Vec<Vec<String>>,
) -> Result<RawTable> {
    let mut records = records
        .into_iter()
        .map(|r| r.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
        .filter(|r| r.iter().any(|c| !c.is_empty()));

    let Some(header) = records.next() else {
        return Ok(RawTable::new(document, statement, Vec::new()));
    };

    let (columns, periods) = classify_header(&header);
    for required in [Column::Category, Column::Item] {
        if !columns.contains(&required) {
            return Err(CombinerError::MalformedTable {
                source_name: source_name.to_string(),
                details: format!("header has no {:?} column: {:?}", required, header),
            });
        }
    }

    let mut table = RawTable::new(document, statement, periods);
    for record in records {
        let mut row = RawRow::new(statement, "", "", vec![String::new(); table.periods.len()]);
        for (idx, column) in columns.iter().enumerate() {
            let value = record.get(idx).cloned().unwrap_or_default();
            match column {
                Column::Category => row.category = value,
                Column::Subcategory => row.subcategory = value,
                Column::Item => row.item = value,
                Column::Note => row.note = value,
                Column::ColorKey => row.color_key = value,
                Column::Type => {}
                Column::Period(p) => row.cells[*p] = value,
            }
        }
        table.rows.push(row);
    }

    log::debug!(
        "Read {} {} rows x {} periods from {}",
        table.rows.len(),
        statement,
        table.periods.len(),
        source_name
    );
    Ok(table)
}

/// Reads one `<Type>.csv` extraction file.
pub fn read_raw_table(path: &Path, document: &str, statement: StatementType) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(str::to_string).collect());
    }
    table_from_records(&path.display().to_string(), document, statement, records)
}

/// Adds a `<Type> Multiplier` meta-row carrying `value` in every period,
/// unless the table already has one for that Type.
pub fn inject_multiplier_row(table: &mut RawTable, value: &str) {
    let kind = MultiplierKind::for_statement(table.statement);
    let exists = table
        .rows
        .iter()
        .any(|r| MultiplierKind::from_category(&r.category) == Some(kind));
    if exists || value.trim().is_empty() {
        return;
    }
    let cells = vec![value.trim().to_string(); table.periods.len()];
    let row = RawRow::new(table.statement, kind.category_label(), "", cells);
    table.rows.insert(0, row);
}

/// Reads `<Type>_multiplier.txt`, if present.
pub fn read_multiplier_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    let value = text.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

#[derive(Debug, Clone)]
pub struct ExtractionResponse {
    pub multiplier: Option<String>,
    pub table: RawTable,
}

/// Parses the textual reply of the table extraction step: an optional fenced
/// block holding an optional `multiplier: <n>` line followed by CSV.
pub fn parse_extraction_response(
    text: &str,
    document: &str,
    statement: StatementType,
) -> Result<ExtractionResponse> {
    let body = fence_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let mut multiplier = None;
    let mut data_lines = Vec::new();
    let mut seen_multiplier_line = false;
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !seen_multiplier_line && line.to_lowercase().starts_with("multiplier") {
            seen_multiplier_line = true;
            multiplier = multiplier_value_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            continue;
        }
        data_lines.push(line);
    }

    let csv_body = data_lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_body.as_bytes());
    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(str::to_string).collect());
    }

    let has_header = records
        .first()
        .and_then(|r| r.first())
        .map(|c| c.trim().eq_ignore_ascii_case("category"))
        .unwrap_or(false);
    if !has_header && !records.is_empty() {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        let mut header: Vec<String> = DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect();
        for n in DEFAULT_COLUMNS.len()..width {
            header.push(format!("Value {}", n - DEFAULT_COLUMNS.len() + 1));
        }
        records.insert(0, header);
    }

    let mut table = table_from_records("extraction response", document, statement, records)?;
    if let Some(value) = &multiplier {
        inject_multiplier_row(&mut table, value);
    }
    Ok(ExtractionResponse { multiplier, table })
}

/// Rejects tables where `(Category, Item)` identifies more than one statement
/// row. Multiplier meta-rows are not statement rows.
pub fn check_duplicates(table: &RawTable) -> Result<()> {
    let mut seen: BTreeMap<(String, String), usize> = BTreeMap::new();
    for (idx, row) in table.rows.iter().enumerate() {
        if is_multiplier_row(row) {
            continue;
        }
        let key = (normalize_key_text(&row.category), normalize_key_text(&row.item));
        if seen.insert(key, idx).is_some() {
            return Err(CombinerError::DuplicateRow {
                document: table.document.clone(),
                statement: table.statement.to_string(),
                category: row.category.clone(),
                item: row.item.clone(),
            });
        }
    }
    Ok(())
}

/// Loads every statement table of one document directory
/// (`<dir>/<Type>.csv` plus `<dir>/<Type>_multiplier.txt`). Missing sections
/// are skipped.
pub fn load_document(dir: &Path, document: &str) -> Result<Vec<RawTable>> {
    let mut tables = Vec::new();
    for statement in StatementType::ALL {
        let csv_path = dir.join(format!("{}.csv", statement.as_str()));
        if !csv_path.exists() {
            log::debug!("{} has no {} table", document, statement);
            continue;
        }
        let mut table = read_raw_table(&csv_path, document, statement)?;
        let txt_path = dir.join(format!("{}_multiplier.txt", statement.as_str()));
        if let Some(value) = read_multiplier_file(&txt_path)? {
            inject_multiplier_row(&mut table, &value);
        }
        check_duplicates(&table)?;
        tables.push(table);
    }
    Ok(tables)
}
