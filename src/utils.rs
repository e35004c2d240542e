use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// Unit markers found in the raw text of a cell, carried through to the
/// combined output so values stay visually distinguishable by unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueUnit {
    pub currency: Option<char>,
    pub percent: bool,
}

impl ValueUnit {
    pub fn detect(raw: &str) -> Self {
        let text = raw.trim();
        Self {
            currency: text.chars().find(|c| CURRENCY_SYMBOLS.contains(c)),
            percent: text.ends_with('%'),
        }
    }

    pub fn is_plain(&self) -> bool {
        self.currency.is_none() && !self.percent
    }
}

/// Parses an extracted cell into a number.
///
/// Handles thousands separators, currency symbols, trailing percent signs and
/// accounting parentheses. Returns `None` for blanks, dash placeholders and
/// anything else that does not parse.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let mut text = raw.trim().to_string();
    if text.is_empty() || matches!(text.as_str(), "-" | "--" | "—" | "–") {
        return None;
    }

    if let Some(stripped) = text.strip_suffix('%') {
        text = stripped.trim_end().to_string();
    }
    if let Some(pos) = text.find(|c| CURRENCY_SYMBOLS.contains(&c)) {
        text.remove(pos);
        text = text.trim().to_string();
    }

    let mut negative = false;
    if text.len() > 2 && text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].trim().to_string();
    }

    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .map(|c| if c == '\u{2212}' { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let number: f64 = cleaned.parse().ok()?;
    if !number.is_finite() {
        return None;
    }
    if negative && number > 0.0 {
        Some(-number)
    } else {
        Some(number)
    }
}

/// Renders a value in normalized scientific notation, e.g. `1.234560e+06`.
pub fn format_scientific(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let rendered = format!("{:.*e}", precision, value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => rendered,
    }
}

/// Formats a cell for the combined dataset, re-attaching any currency prefix
/// or percent suffix from the original text. Missing values render blank.
pub fn format_cell(value: Option<f64>, unit: ValueUnit, precision: usize) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let body = format_scientific(value, precision);
    if body.is_empty() {
        return body;
    }
    let mut out = String::new();
    if let Some(symbol) = unit.currency {
        out.push(symbol);
    }
    out.push_str(&body);
    if unit.percent {
        out.push('%');
    }
    out
}

/// Canonical text used inside merge keys: trimmed, lower-cased, and with
/// integer-like strings collapsed so `"1.0"` and `"1"` compare equal.
pub fn normalize_key_text(text: &str) -> String {
    let trimmed = text.trim();
    if let Ok(number) = trimmed.parse::<f64>() {
        if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
            return format!("{}", number as i64);
        }
    }
    trimmed.to_lowercase()
}

/// Treats the placeholder strings pandas-style tools leave behind as blank.
pub fn is_null_placeholder(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "" | "nan" | "none" | "null"
    )
}

fn stage_file(path: &Path, data: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    Ok(tmp)
}

/// Replaces `path` with `data` via a sibling temp file so readers never see
/// a half-written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = stage_file(path, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Stages every file before renaming any of them, so a failed write leaves
/// all targets as they were.
pub fn write_atomic_all(files: &[(PathBuf, Vec<u8>)]) -> std::io::Result<()> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, data) in files {
        match stage_file(path, data) {
            Ok(tmp) => staged.push((tmp, path)),
            Err(e) => {
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                return Err(e);
            }
        }
    }
    for (tmp, path) in staged {
        fs::rename(tmp, path)?;
    }
    Ok(())
}
