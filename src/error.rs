use thiserror::Error;

/// Broad category of a [`CombinerError`], so callers can decide between
/// aborting and degrading without inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A multiplier or config value the run cannot proceed without.
    Configuration,
    /// A share-count divisor needed by the strict per-share path is absent.
    MissingReference,
    /// Structurally invalid input tables.
    Data,
    /// Filesystem or serialization failure.
    Io,
}

#[derive(Error, Debug)]
pub enum CombinerError {
    #[error("Invalid {statement} multiplier in '{document}' for period '{period}': {detail}")]
    InvalidMultiplier {
        document: String,
        statement: String,
        period: String,
        detail: String,
    },

    #[error("Share count for period '{period}' in '{document}' is {reason}")]
    MissingShareCount {
        document: String,
        period: String,
        reason: String,
    },

    #[error("Duplicate row in '{document}' {statement} table: Category '{category}', Item '{item}'")]
    DuplicateRow {
        document: String,
        statement: String,
        category: String,
        item: String,
    },

    #[error("Malformed table {source_name}: {details}")]
    MalformedTable {
        source_name: String,
        details: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CombinerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMultiplier { .. } | Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::MissingShareCount { .. } => ErrorKind::MissingReference,
            Self::DuplicateRow { .. } | Self::MalformedTable { .. } => ErrorKind::Data,
            Self::CsvError(_) | Self::SerializationError(_) | Self::IoError(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, CombinerError>;
