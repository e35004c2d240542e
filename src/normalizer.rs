use crate::multipliers::{is_multiplier_row, DocumentMultipliers};
use crate::schema::{NormalizedRow, NormalizedTable, NoteKind, RawRow, RawTable};
use crate::utils::{parse_numeric, ValueUnit};

/// Applies parsing, exclusion, negation and multiplier rules to one row.
///
/// Returns `None` for rows noted `excluded`. Cells that fail to parse stay
/// missing. A factor of exactly 1.0 is skipped.
pub fn normalize_row(
    row: &RawRow,
    periods: &[String],
    multipliers: &DocumentMultipliers,
) -> Option<NormalizedRow> {
    let kind = NoteKind::of(&row.note);
    if kind == NoteKind::Excluded {
        return None;
    }

    let mut values = Vec::with_capacity(periods.len());
    let mut units = Vec::with_capacity(periods.len());

    for (idx, period) in periods.iter().enumerate() {
        let raw = row.cell(idx);
        units.push(ValueUnit::detect(raw));

        let mut value = parse_numeric(raw);
        if let Some(v) = value.as_mut() {
            if kind == NoteKind::Negated {
                *v = -*v;
            }
            for factor in multipliers.factors_for(row.statement, period) {
                if factor != 1.0 {
                    *v *= factor;
                }
            }
        }
        values.push(value);
    }

    Some(NormalizedRow {
        statement: row.statement,
        category: row.category.clone(),
        item: row.item.clone(),
        note: row.note.clone(),
        values,
        units,
    })
}

/// Normalizes every statement row of a table. Multiplier meta-rows and
/// excluded rows are dropped.
pub fn normalize_table(table: &RawTable, multipliers: &DocumentMultipliers) -> NormalizedTable {
    let mut out = NormalizedTable::new(&table.document, table.statement, table.periods.clone());
    let mut excluded = 0usize;

    for row in &table.rows {
        if is_multiplier_row(row) {
            continue;
        }
        match normalize_row(row, &table.periods, multipliers) {
            Some(normalized) => out.rows.push(normalized),
            None => excluded += 1,
        }
    }

    log::debug!(
        "Normalized {} {} table: {} rows kept, {} excluded",
        table.document,
        table.statement,
        out.rows.len(),
        excluded
    );
    out
}
