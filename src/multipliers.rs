use crate::error::{CombinerError, Result};
use crate::periods::{normalize_label, sort_labels};
use crate::schema::{RawRow, RawTable, StatementType};
use crate::utils::{parse_numeric, write_atomic};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const STOCK_MULTIPLIER_FILE: &str = "stock_multipliers.csv";
const STOCK_DATE_COLUMN: &str = "Date";
const STOCK_VALUE_COLUMN: &str = "Stock Multiplier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MultiplierKind {
    Financial,
    Income,
    Shares,
    Stock,
}

impl MultiplierKind {
    pub const ALL: [MultiplierKind; 4] = [Self::Financial, Self::Income, Self::Shares, Self::Stock];

    /// The Category text of the meta-row carrying this multiplier.
    pub fn category_label(&self) -> &'static str {
        match self {
            Self::Financial => "Financial Multiplier",
            Self::Income => "Income Multiplier",
            Self::Shares => "Shares Multiplier",
            Self::Stock => "Stock Multiplier",
        }
    }

    pub fn from_category(category: &str) -> Option<Self> {
        let wanted = category.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.category_label().to_lowercase() == wanted)
    }

    pub fn for_statement(statement: StatementType) -> Self {
        match statement {
            StatementType::Financial => Self::Financial,
            StatementType::Income => Self::Income,
            StatementType::Shares => Self::Shares,
        }
    }
}

impl fmt::Display for MultiplierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category_label())
    }
}

pub fn is_multiplier_row(row: &RawRow) -> bool {
    MultiplierKind::from_category(&row.category).is_some()
}

/// Per-period scaling factors for one statement Type. Periods without an
/// entry scale by 1.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiplierSet {
    factors: BTreeMap<String, f64>,
}

impl MultiplierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factor(&self, period: &str) -> f64 {
        self.factors.get(period).copied().unwrap_or(1.0)
    }

    pub fn insert(&mut self, period: &str, factor: f64) {
        self.factors.insert(period.to_string(), factor);
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.factors.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Reads one multiplier kind from the meta-rows of a document's tables.
///
/// No matching row yields an empty set. Otherwise every period of a table
/// holding a matching row must resolve: the first non-blank candidate cell
/// wins, and a period whose candidates are all blank, or whose chosen cell
/// does not parse, is an error.
pub fn resolve_multiplier(
    document: &str,
    kind: MultiplierKind,
    tables: &[RawTable],
) -> Result<MultiplierSet> {
    let candidates: Vec<(&RawTable, &RawRow)> = tables
        .iter()
        .flat_map(|table| table.rows.iter().map(move |row| (table, row)))
        .filter(|(_, row)| MultiplierKind::from_category(&row.category) == Some(kind))
        .collect();

    let mut set = MultiplierSet::new();
    if candidates.is_empty() {
        return Ok(set);
    }
    if candidates.len() > 1 {
        log::debug!(
            "{} has {} '{}' rows; using the first non-blank value per period",
            document,
            candidates.len(),
            kind
        );
    }

    let mut periods: Vec<&str> = Vec::new();
    for (table, _) in &candidates {
        for label in &table.periods {
            if !label.is_empty() && !periods.contains(&label.as_str()) {
                periods.push(label);
            }
        }
    }

    for period in periods {
        let raw = candidates
            .iter()
            .filter_map(|(table, row)| table.raw_value(row, period))
            .map(str::trim)
            .find(|cell| !cell.is_empty());

        let Some(raw) = raw else {
            return Err(CombinerError::InvalidMultiplier {
                document: document.to_string(),
                statement: kind.to_string(),
                period: period.to_string(),
                detail: "cell is blank".to_string(),
            });
        };
        let factor = parse_numeric(raw).ok_or_else(|| CombinerError::InvalidMultiplier {
            document: document.to_string(),
            statement: kind.to_string(),
            period: period.to_string(),
            detail: format!("'{}' is not a number", raw),
        })?;
        set.insert(period, factor);
    }

    Ok(set)
}

/// All multipliers for one source document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMultipliers {
    pub financial: MultiplierSet,
    pub income: MultiplierSet,
    pub shares: MultiplierSet,
    pub stock: MultiplierSet,
}

impl DocumentMultipliers {
    /// Resolves every multiplier kind for `document`. The stock multiplier
    /// falls back to `stock_file` when the document has no stock meta-row.
    pub fn resolve(
        document: &str,
        tables: &[RawTable],
        stock_file: Option<&StockMultiplierFile>,
    ) -> Result<Self> {
        let mut multipliers = Self {
            financial: resolve_multiplier(document, MultiplierKind::Financial, tables)?,
            income: resolve_multiplier(document, MultiplierKind::Income, tables)?,
            shares: resolve_multiplier(document, MultiplierKind::Shares, tables)?,
            stock: resolve_multiplier(document, MultiplierKind::Stock, tables)?,
        };

        if multipliers.stock.is_empty() {
            if let Some(file) = stock_file {
                for table in tables {
                    for label in &table.periods {
                        if let Some(factor) = file.get(label) {
                            multipliers.stock.insert(label, factor);
                        }
                    }
                }
            }
        }

        Ok(multipliers)
    }

    pub fn get(&self, kind: MultiplierKind) -> &MultiplierSet {
        match kind {
            MultiplierKind::Financial => &self.financial,
            MultiplierKind::Income => &self.income,
            MultiplierKind::Shares => &self.shares,
            MultiplierKind::Stock => &self.stock,
        }
    }

    /// Factors applied, in order, to a row of `statement` for `period`.
    /// Shares rows take the shares and the stock multiplier.
    pub fn factors_for(&self, statement: StatementType, period: &str) -> Vec<f64> {
        match statement {
            StatementType::Financial => vec![self.financial.factor(period)],
            StatementType::Income => vec![self.income.factor(period)],
            StatementType::Shares => vec![self.shares.factor(period), self.stock.factor(period)],
        }
    }
}

/// `stock_multipliers.csv`: stock-split corrections keyed by period label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockMultiplierFile {
    entries: BTreeMap<String, f64>,
}

impl StockMultiplierFile {
    /// Loads the file, or an empty table when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No stock multiplier file at {}", path.display());
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let date_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(STOCK_DATE_COLUMN));
        let value_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(STOCK_VALUE_COLUMN));
        let (Some(date_idx), Some(value_idx)) = (date_idx, value_idx) else {
            return Err(CombinerError::MalformedTable {
                source_name: path.display().to_string(),
                details: format!("expected '{}' and '{}' columns", STOCK_DATE_COLUMN, STOCK_VALUE_COLUMN),
            });
        };

        let mut entries = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let label = normalize_label(record.get(date_idx).unwrap_or(""));
            if label.is_empty() {
                continue;
            }
            let raw = record.get(value_idx).unwrap_or("");
            let factor = match parse_numeric(raw) {
                Some(value) => value,
                None => {
                    log::warn!(
                        "Stock multiplier for '{}' is '{}'; using 1",
                        label,
                        raw.trim()
                    );
                    1.0
                }
            };
            entries.insert(label, factor);
        }
        Ok(Self { entries })
    }

    /// A file listing every label with factor 1.
    pub fn generate<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let entries = labels
            .into_iter()
            .map(normalize_label)
            .filter(|l| !l.is_empty())
            .map(|l| (l, 1.0))
            .collect();
        Self { entries }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries.get(&normalize_label(label)).copied()
    }

    pub fn set(&mut self, label: &str, factor: f64) {
        self.entries.insert(normalize_label(label), factor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes rows in chronological label order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut labels: Vec<String> = self.entries.keys().cloned().collect();
        sort_labels(&mut labels);

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([STOCK_DATE_COLUMN, STOCK_VALUE_COLUMN])?;
        for label in labels {
            let factor = self.entries.get(&label).copied().unwrap_or(1.0);
            writer.write_record([label, factor.to_string()])?;
        }
        let data = writer.into_inner().map_err(|e| e.into_error())?;
        write_atomic(path, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn table(statement: StatementType, periods: &[&str]) -> RawTable {
        RawTable::new(
            "10-K_2022",
            statement,
            periods.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn test_no_multiplier_rows_means_factor_one() {
        let mut t = table(StatementType::Financial, &["2022"]);
        t.push_row("Revenue", "Sales", &["100"]);

        let set = resolve_multiplier("10-K_2022", MultiplierKind::Financial, &[t]).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.factor("2022"), 1.0);
    }

    #[test]
    fn test_reads_factor_per_period() {
        let mut t = table(StatementType::Financial, &["2022", "2021"]);
        t.push_row("financial multiplier", "", &["2", "1,000"]);

        let set = resolve_multiplier("10-K_2022", MultiplierKind::Financial, &[t]).unwrap();
        assert_eq!(set.factor("2022"), 2.0);
        assert_eq!(set.factor("2021"), 1000.0);
        assert_eq!(set.factor("2020"), 1.0);
    }

    #[test]
    fn test_blank_multiplier_cell_is_configuration_error() {
        let mut t = table(StatementType::Income, &["2022", "2021"]);
        t.push_row("Income Multiplier", "", &["1000", ""]);

        let err = resolve_multiplier("10-K_2022", MultiplierKind::Income, &[t]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("'2021'"));
    }

    #[test]
    fn test_unparsable_multiplier_cell_is_error() {
        let mut t = table(StatementType::Income, &["2022"]);
        t.push_row("Income Multiplier", "", &["thousands"]);

        let err = resolve_multiplier("10-K_2022", MultiplierKind::Income, &[t]).unwrap_err();
        assert!(matches!(err, CombinerError::InvalidMultiplier { .. }));
    }

    #[test]
    fn test_duplicate_rows_take_first_non_blank() {
        let mut t = table(StatementType::Shares, &["2022", "2021"]);
        t.push_row("Shares Multiplier", "a", &["", "10"]);
        t.push_row("Shares Multiplier", "b", &["5", "20"]);

        let set = resolve_multiplier("10-K_2022", MultiplierKind::Shares, &[t]).unwrap();
        assert_eq!(set.factor("2022"), 5.0);
        assert_eq!(set.factor("2021"), 10.0);
    }

    #[test]
    fn test_shares_rows_use_shares_and_stock() {
        let mut shares = table(StatementType::Shares, &["2022"]);
        shares.push_row("Shares Multiplier", "", &["1000"]);

        let mut stock = StockMultiplierFile::default();
        stock.set("2022", 2.0);

        let multipliers =
            DocumentMultipliers::resolve("10-K_2022", &[shares], Some(&stock)).unwrap();
        assert_eq!(
            multipliers.factors_for(StatementType::Shares, "2022"),
            vec![1000.0, 2.0]
        );
        assert_eq!(
            multipliers.factors_for(StatementType::Financial, "2022"),
            vec![1.0]
        );
    }

    #[test]
    fn test_stock_row_overrides_stock_file() {
        let mut shares = table(StatementType::Shares, &["2022"]);
        shares.push_row("Stock Multiplier", "", &["3"]);

        let mut stock = StockMultiplierFile::default();
        stock.set("2022", 2.0);

        let multipliers =
            DocumentMultipliers::resolve("10-K_2022", &[shares], Some(&stock)).unwrap();
        assert_eq!(multipliers.stock.factor("2022"), 3.0);
    }

    #[test]
    fn test_stock_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STOCK_MULTIPLIER_FILE);

        let mut file = StockMultiplierFile::generate(["2023", "31.12.2021", "2022"]);
        file.set("2022", 4.0);
        file.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Date,Stock Multiplier");
        assert_eq!(lines[1], "31.12.2021,1");
        assert_eq!(lines[2], "2022,4");
        assert_eq!(lines[3], "2023,1");

        let loaded = StockMultiplierFile::load(&path).unwrap();
        assert_eq!(loaded, file);
    }

    #[test]
    fn test_missing_stock_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = StockMultiplierFile::load(&dir.path().join("absent.csv")).unwrap();
        assert!(loaded.is_empty());
    }
}
