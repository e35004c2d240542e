use crate::error::{CombinerError, Result};
use crate::schema::{NormalizedRow, NormalizedTable, NoteKind, OnMissingDivisor, StatementType};
use std::collections::BTreeMap;

pub const SHARE_COUNT_MARKER: &str = "number of shares";

pub fn is_share_count_row(row: &NormalizedRow) -> bool {
    row.item.to_lowercase().contains(SHARE_COUNT_MARKER)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Divisor {
    /// No share-count row: values stay absolute.
    Unit,
    Count(f64),
    Missing(&'static str),
}

/// Share counts of one document, keyed by period label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareCountSeries {
    pub document: String,
    /// `None` when the document has no share-count row.
    pub source_item: Option<String>,
    pub counts: BTreeMap<String, Option<f64>>,
}

impl ShareCountSeries {
    /// Finds the share-count row, preferring the Shares table.
    pub fn locate(document: &str, tables: &[NormalizedTable]) -> Self {
        let mut ordered: Vec<&NormalizedTable> = tables.iter().collect();
        ordered.sort_by_key(|t| t.statement != StatementType::Shares);

        for table in ordered {
            if let Some(row) = table.rows.iter().find(|r| is_share_count_row(r)) {
                let counts = table
                    .periods
                    .iter()
                    .enumerate()
                    .map(|(idx, label)| (label.clone(), row.value(idx)))
                    .collect();
                return Self {
                    document: document.to_string(),
                    source_item: Some(row.item.clone()),
                    counts,
                };
            }
        }

        Self {
            document: document.to_string(),
            source_item: None,
            counts: BTreeMap::new(),
        }
    }

    pub fn has_share_row(&self) -> bool {
        self.source_item.is_some()
    }

    pub fn divisor(&self, period: &str) -> Divisor {
        if !self.has_share_row() {
            return Divisor::Unit;
        }
        match self.counts.get(period).copied().flatten() {
            None => Divisor::Missing("missing"),
            Some(count) if count.is_nan() => Divisor::Missing("NaN"),
            Some(count) if count == 0.0 => Divisor::Missing("zero"),
            Some(count) => Divisor::Count(count),
        }
    }

    /// Share count used for the side table: the count, or 1.0 when the
    /// document has no share-count row.
    pub fn count_for(&self, period: &str) -> Option<f64> {
        if self.has_share_row() {
            self.counts.get(period).copied().flatten()
        } else {
            Some(1.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerShareResult {
    pub tables: Vec<NormalizedTable>,
    pub share_counts: ShareCountSeries,
}

/// Divides normalized values by the share count for each period.
#[derive(Debug, Clone, Copy)]
pub struct PerShareNormalizer {
    pub on_missing_divisor: OnMissingDivisor,
    pub include_intangibles: bool,
}

impl PerShareNormalizer {
    pub fn new(on_missing_divisor: OnMissingDivisor, include_intangibles: bool) -> Self {
        Self {
            on_missing_divisor,
            include_intangibles,
        }
    }

    /// Normalizes a single table using the share-count row found in it.
    pub fn normalize_table(&self, table: &NormalizedTable) -> Result<PerShareResult> {
        self.normalize_document(&table.document, std::slice::from_ref(table))
    }

    /// Normalizes all tables of one document against one share-count row,
    /// looked up in the Shares table first and then in the others.
    pub fn normalize_document(
        &self,
        document: &str,
        tables: &[NormalizedTable],
    ) -> Result<PerShareResult> {
        let share_counts = ShareCountSeries::locate(document, tables);
        if !share_counts.has_share_row() {
            log::debug!("{} has no share-count row; values stay absolute", document);
        }

        let mut out = Vec::with_capacity(tables.len());
        for table in tables {
            let mut result =
                NormalizedTable::new(&table.document, table.statement, table.periods.clone());

            for row in &table.rows {
                if is_share_count_row(row) {
                    continue;
                }
                let mut divided = row.clone();
                for (idx, period) in table.periods.iter().enumerate() {
                    let Some(value) = divided.values.get_mut(idx) else {
                        continue;
                    };
                    let Some(v) = value.as_mut() else {
                        continue;
                    };
                    match share_counts.divisor(period) {
                        Divisor::Unit => {}
                        Divisor::Count(count) => *v /= count,
                        Divisor::Missing(reason) => match self.on_missing_divisor {
                            OnMissingDivisor::Fail => {
                                return Err(CombinerError::MissingShareCount {
                                    document: document.to_string(),
                                    period: period.clone(),
                                    reason: reason.to_string(),
                                });
                            }
                            OnMissingDivisor::SkipPeriod => {
                                log::debug!(
                                    "{}: share count for '{}' is {}; '{}' left undivided",
                                    document,
                                    period,
                                    reason,
                                    row.item
                                );
                            }
                        },
                    }
                }

                if !self.include_intangibles && NoteKind::of(&divided.note) == NoteKind::Intangibles
                {
                    continue;
                }
                result.rows.push(divided);
            }
            out.push(result);
        }

        Ok(PerShareResult {
            tables: out,
            share_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::utils::ValueUnit;

    fn row(statement: StatementType, item: &str, note: &str, values: &[Option<f64>]) -> NormalizedRow {
        NormalizedRow {
            statement,
            category: "Cat".to_string(),
            item: item.to_string(),
            note: note.to_string(),
            values: values.to_vec(),
            units: vec![ValueUnit::default(); values.len()],
        }
    }

    fn table(statement: StatementType, periods: &[&str], rows: Vec<NormalizedRow>) -> NormalizedTable {
        let mut t = NormalizedTable::new(
            "10-K_2022",
            statement,
            periods.iter().map(|p| p.to_string()).collect(),
        );
        t.rows = rows;
        t
    }

    #[test]
    fn test_divides_by_share_count() {
        let t = table(
            StatementType::Financial,
            &["2021", "2022"],
            vec![
                row(StatementType::Financial, "Number of shares", "", &[Some(10.0), Some(20.0)]),
                row(StatementType::Financial, "Cash", "", &[Some(100.0), Some(100.0)]),
            ],
        );
        let normalizer = PerShareNormalizer::new(OnMissingDivisor::Fail, true);
        let result = normalizer.normalize_table(&t).unwrap();

        let rows = &result.tables[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![Some(10.0), Some(5.0)]);
        assert_eq!(result.share_counts.count_for("2022"), Some(20.0));
    }

    #[test]
    fn test_without_share_row_values_stay_absolute() {
        let t = table(
            StatementType::Income,
            &["2022"],
            vec![row(StatementType::Income, "Revenue", "", &[Some(42.0)])],
        );
        let result = PerShareNormalizer::new(OnMissingDivisor::Fail, true)
            .normalize_table(&t)
            .unwrap();
        assert_eq!(result.tables[0].rows[0].value(0), Some(42.0));
        assert_eq!(result.share_counts.count_for("2022"), Some(1.0));
    }

    #[test]
    fn test_fail_policy_raises_on_missing_count() {
        let t = table(
            StatementType::Financial,
            &["2021", "2022"],
            vec![
                row(StatementType::Financial, "Number of shares", "", &[Some(10.0), None]),
                row(StatementType::Financial, "Cash", "", &[Some(100.0), Some(100.0)]),
            ],
        );
        let err = PerShareNormalizer::new(OnMissingDivisor::Fail, true)
            .normalize_table(&t)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingReference);
        assert!(err.to_string().contains("'2022'"));
    }

    #[test]
    fn test_fail_policy_ignores_periods_without_values() {
        let t = table(
            StatementType::Financial,
            &["2021", "2022"],
            vec![
                row(StatementType::Financial, "Number of shares", "", &[Some(10.0), Some(0.0)]),
                row(StatementType::Financial, "Cash", "", &[Some(100.0), None]),
            ],
        );
        let result = PerShareNormalizer::new(OnMissingDivisor::Fail, true)
            .normalize_table(&t)
            .unwrap();
        assert_eq!(result.tables[0].rows[0].values, vec![Some(10.0), None]);
    }

    #[test]
    fn test_skip_policy_leaves_value_undivided() {
        let t = table(
            StatementType::Financial,
            &["2021", "2022"],
            vec![
                row(StatementType::Financial, "Number of shares", "", &[Some(10.0), Some(0.0)]),
                row(StatementType::Financial, "Cash", "", &[Some(100.0), Some(100.0)]),
            ],
        );
        let result = PerShareNormalizer::new(OnMissingDivisor::SkipPeriod, true)
            .normalize_table(&t)
            .unwrap();
        assert_eq!(result.tables[0].rows[0].values, vec![Some(10.0), Some(100.0)]);
    }

    #[test]
    fn test_intangibles_dropped_after_division() {
        let t = table(
            StatementType::Financial,
            &["2022"],
            vec![
                row(StatementType::Financial, "Number of shares", "", &[Some(2.0)]),
                row(StatementType::Financial, "Goodwill", "Intangibles", &[Some(8.0)]),
                row(StatementType::Financial, "Cash", "", &[Some(8.0)]),
            ],
        );
        let kept = PerShareNormalizer::new(OnMissingDivisor::Fail, true)
            .normalize_table(&t)
            .unwrap();
        assert_eq!(kept.tables[0].rows.len(), 2);
        assert_eq!(kept.tables[0].rows[0].value(0), Some(4.0));

        let dropped = PerShareNormalizer::new(OnMissingDivisor::Fail, false)
            .normalize_table(&t)
            .unwrap();
        assert_eq!(dropped.tables[0].rows.len(), 1);
        assert_eq!(dropped.tables[0].rows[0].item, "Cash");
    }

    #[test]
    fn test_document_share_row_divides_every_table() {
        let shares = table(
            StatementType::Shares,
            &["2022"],
            vec![row(StatementType::Shares, "Total number of shares", "", &[Some(4.0)])],
        );
        let income = table(
            StatementType::Income,
            &["2022"],
            vec![row(StatementType::Income, "Revenue", "", &[Some(40.0)])],
        );
        let result = PerShareNormalizer::new(OnMissingDivisor::Fail, true)
            .normalize_document("10-K_2022", &[income, shares])
            .unwrap();

        assert_eq!(result.tables[0].rows[0].value(0), Some(10.0));
        assert!(result.tables[1].rows.is_empty());
        assert_eq!(
            result.share_counts.source_item.as_deref(),
            Some("Total number of shares")
        );
    }
}
