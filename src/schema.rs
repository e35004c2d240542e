use crate::utils::ValueUnit;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NOTE_EXCLUDED: &str = "excluded";
pub const NOTE_NEGATED: &str = "negated";
pub const NOTE_INTANGIBLES: &str = "intangibles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum StatementType {
    #[schemars(description = "Statement of financial position (balance sheet)")]
    Financial,

    #[schemars(description = "Statement of profit or loss")]
    Income,

    #[schemars(description = "Movements in issued capital, including the share count")]
    Shares,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [Self::Financial, Self::Income, Self::Shares];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "Financial",
            Self::Income => "Income",
            Self::Shares => "Shares",
        }
    }

    /// Fixed priority used when no canonical order entry applies.
    pub fn priority(&self) -> usize {
        match self {
            Self::Financial => 0,
            Self::Income => 1,
            Self::Shares => 2,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "financial" | "finance" => Some(Self::Financial),
            "income" => Some(Self::Income),
            "shares" | "share" => Some(Self::Shares),
            _ => None,
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a row's Note steers normalization. Notes are free text; only a few
/// values carry meaning for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Excluded,
    Negated,
    Intangibles,
    Other,
}

impl NoteKind {
    pub fn of(note: &str) -> Self {
        match note.trim().to_lowercase().as_str() {
            NOTE_EXCLUDED => Self::Excluded,
            NOTE_NEGATED => Self::Negated,
            NOTE_INTANGIBLES => Self::Intangibles,
            _ => Self::Other,
        }
    }
}

/// One extracted statement line with its raw, unparsed cells. `cells` is
/// aligned with the owning table's `periods`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawRow {
    pub statement: StatementType,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub item: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub color_key: String,
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new(statement: StatementType, category: &str, item: &str, cells: Vec<String>) -> Self {
        Self {
            statement,
            category: category.to_string(),
            subcategory: String::new(),
            item: item.to_string(),
            note: String::new(),
            color_key: String::new(),
            cells,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }

    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }
}

/// A statement line after sign, exclusion and multiplier rules. `values`
/// and `units` are aligned with the owning table's `periods`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub statement: StatementType,
    pub category: String,
    pub item: String,
    pub note: String,
    pub values: Vec<Option<f64>>,
    pub units: Vec<ValueUnit>,
}

impl NormalizedRow {
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn unit(&self, index: usize) -> ValueUnit {
        self.units.get(index).copied().unwrap_or_default()
    }
}

/// One statement table from one source document: an explicit ordered list
/// of period labels plus rows whose values line up with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<R> {
    pub document: String,
    pub statement: StatementType,
    pub periods: Vec<String>,
    pub rows: Vec<R>,
}

pub type RawTable = Table<RawRow>;
pub type NormalizedTable = Table<NormalizedRow>;

impl<R> Table<R> {
    pub fn new(document: &str, statement: StatementType, periods: Vec<String>) -> Self {
        Self {
            document: document.to_string(),
            statement,
            periods,
            rows: Vec::new(),
        }
    }

    pub fn period_index(&self, label: &str) -> Option<usize> {
        self.periods.iter().position(|p| p == label)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RawTable {
    pub fn push_row(&mut self, category: &str, item: &str, cells: &[&str]) -> &mut RawRow {
        let row = RawRow::new(
            self.statement,
            category,
            item,
            cells.iter().map(|c| c.to_string()).collect(),
        );
        let index = self.rows.len();
        self.rows.push(row);
        &mut self.rows[index]
    }

    /// Raw text for `(row, period label)`, or `None` when the label is unknown.
    pub fn raw_value<'a>(&'a self, row: &'a RawRow, label: &str) -> Option<&'a str> {
        self.period_index(label).map(|idx| row.cell(idx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnMissingDivisor {
    #[schemars(
        description = "Abort the run when a share count is missing, zero or NaN for a period that has output values."
    )]
    Fail,

    #[schemars(
        description = "Leave the period's values undivided when its share count is missing, zero or NaN."
    )]
    SkipPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    #[schemars(description = "Values as reported, after multipliers.")]
    Reported,

    #[default]
    #[schemars(description = "Values divided by the share count for each period.")]
    PerShare,
}

fn default_include_intangibles() -> bool {
    true
}

fn default_value_precision() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[serde(default)]
    #[schemars(description = "Ticker or company identifier used to key the side tables.")]
    pub ticker: String,

    #[schemars(
        description = "Policy for a missing share-count divisor. Required: there is no default."
    )]
    pub on_missing_divisor: OnMissingDivisor,

    #[serde(default)]
    #[schemars(description = "Whether values are divided by the share count.")]
    pub normalization: NormalizationMode,

    #[serde(default = "default_include_intangibles")]
    #[schemars(description = "Keep rows whose Note is 'intangibles' in the output.")]
    pub include_intangibles: bool,

    #[serde(default = "default_value_precision")]
    #[schemars(description = "Digits after the decimal point of the scientific mantissa.")]
    pub value_precision: usize,
}

impl PipelineConfig {
    pub fn new(ticker: impl Into<String>, on_missing_divisor: OnMissingDivisor) -> Self {
        Self {
            ticker: ticker.into(),
            on_missing_divisor,
            normalization: NormalizationMode::default(),
            include_intangibles: default_include_intangibles(),
            value_precision: default_value_precision(),
        }
    }

    pub fn with_normalization(mut self, mode: NormalizationMode) -> Self {
        self.normalization = mode;
        self
    }

    pub fn with_intangibles(mut self, include: bool) -> Self {
        self.include_intangibles = include;
        self
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
