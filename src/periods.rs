//! Period label resolution.
//!
//! Extracted tables label their value columns with whatever the report used:
//! `31.12.2022`, `2022-06-30`, `Q3 2023`, `FY2022`, `Dec 2021`. This module
//! parses those labels into comparable anchor dates, orders columns
//! chronologically, and disambiguates labels that collide within one header.

use chrono::{Datelike, Month, NaiveDate};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeriodKind {
    Date,
    Month,
    Quarter,
    Year,
}

/// A parsed period label. Month, quarter and year labels anchor to the first
/// day of the period they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodAnchor {
    pub date: NaiveDate,
    pub kind: PeriodKind,
}

impl PeriodAnchor {
    fn new(date: NaiveDate, kind: PeriodKind) -> Self {
        Self { date, kind }
    }

    pub fn ymd(&self) -> (i32, u32, u32) {
        (self.date.year(), self.date.month(), self.date.day())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeriod {
    pub label: String,
    pub anchor: Option<PeriodAnchor>,
}

impl ResolvedPeriod {
    pub fn date(&self) -> Option<NaiveDate> {
        self.anchor.map(|a| a.date)
    }
}

fn dmy_dot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$").expect("d.m.y regex"))
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("iso regex"))
}

fn slash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("slash regex"))
}

fn month_abbrev_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]{3})\.?\s+(\d{4})$").expect("mon yyyy regex"))
}

fn month_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]{4,})\s+(\d{4})$").expect("month yyyy regex"))
}

fn quarter_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Q([1-4])\s*[-/]?\s*(\d{4})$").expect("qn yyyy regex"))
}

fn year_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d{4})\s*[-/]?\s*Q([1-4])$").expect("yyyy qn regex"))
}

fn fiscal_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^FY\s*[-']?\s*(\d{4})$").expect("fy regex"))
}

fn bare_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})$").expect("year regex"))
}

fn suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)\.(\d+)$").expect("suffix regex"))
}

fn num(caps: &regex::Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn year(caps: &regex::Captures<'_>, idx: usize) -> Option<i32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn month_from_name(name: &str) -> Option<u32> {
    name.parse::<Month>().ok().map(|m| m.number_from_month())
}

fn quarter_start(year: i32, quarter: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
}

/// Trims, collapses inner whitespace and unifies dash variants.
pub fn normalize_label(label: &str) -> String {
    let unified: String = label
        .chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            other => other,
        })
        .collect();
    unified.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_exact(text: &str) -> Option<PeriodAnchor> {
    if let Some(caps) = dmy_dot_re().captures(text) {
        if let Some(date) = NaiveDate::from_ymd_opt(year(&caps, 3)?, num(&caps, 2)?, num(&caps, 1)?) {
            return Some(PeriodAnchor::new(date, PeriodKind::Date));
        }
    }
    if let Some(caps) = iso_re().captures(text) {
        if let Some(date) = NaiveDate::from_ymd_opt(year(&caps, 1)?, num(&caps, 2)?, num(&caps, 3)?) {
            return Some(PeriodAnchor::new(date, PeriodKind::Date));
        }
    }
    if let Some(caps) = slash_re().captures(text) {
        let (first, second, y) = (num(&caps, 1)?, num(&caps, 2)?, year(&caps, 3)?);
        // Month-first wins when both readings are valid.
        if let Some(date) = NaiveDate::from_ymd_opt(y, first, second) {
            return Some(PeriodAnchor::new(date, PeriodKind::Date));
        }
        if let Some(date) = NaiveDate::from_ymd_opt(y, second, first) {
            return Some(PeriodAnchor::new(date, PeriodKind::Date));
        }
    }
    if let Some(caps) = month_abbrev_re().captures(text) {
        if let Some(month) = month_from_name(&caps[1]) {
            if let Some(date) = NaiveDate::from_ymd_opt(year(&caps, 2)?, month, 1) {
                return Some(PeriodAnchor::new(date, PeriodKind::Month));
            }
        }
    }
    if let Some(caps) = month_name_re().captures(text) {
        if let Some(month) = month_from_name(&caps[1]) {
            if let Some(date) = NaiveDate::from_ymd_opt(year(&caps, 2)?, month, 1) {
                return Some(PeriodAnchor::new(date, PeriodKind::Month));
            }
        }
    }
    if let Some(caps) = quarter_first_re().captures(text) {
        let date = quarter_start(year(&caps, 2)?, num(&caps, 1)?)?;
        return Some(PeriodAnchor::new(date, PeriodKind::Quarter));
    }
    if let Some(caps) = year_first_re().captures(text) {
        let date = quarter_start(year(&caps, 1)?, num(&caps, 2)?)?;
        return Some(PeriodAnchor::new(date, PeriodKind::Quarter));
    }
    if let Some(caps) = fiscal_year_re().captures(text) {
        let date = NaiveDate::from_ymd_opt(year(&caps, 1)?, 1, 1)?;
        return Some(PeriodAnchor::new(date, PeriodKind::Year));
    }
    if let Some(caps) = bare_year_re().captures(text) {
        let date = NaiveDate::from_ymd_opt(year(&caps, 1)?, 1, 1)?;
        return Some(PeriodAnchor::new(date, PeriodKind::Year));
    }
    None
}

/// Splits a disambiguation suffix (`2022.1` → `2022`, 1) when the label only
/// parses without it.
fn split_suffix(text: &str) -> Option<(&str, u32)> {
    let caps = suffix_re().captures(text)?;
    let base = caps.get(1)?.as_str();
    let n = caps.get(2)?.as_str().parse().ok()?;
    Some((base, n))
}

/// Parses a period label, trying the supported formats in fixed priority
/// order. Returns `None` for labels no format matches; that is not an error.
pub fn parse_period_label(label: &str) -> Option<PeriodAnchor> {
    let text = normalize_label(label);
    if text.is_empty() {
        return None;
    }
    if let Some(anchor) = parse_exact(&text) {
        return Some(anchor);
    }
    let (base, _) = split_suffix(&text)?;
    parse_exact(base)
}

fn suffix_number(label: &str) -> u32 {
    let text = normalize_label(label);
    if parse_exact(&text).is_some() {
        return 0;
    }
    split_suffix(&text).map(|(_, n)| n).unwrap_or(0)
}

/// Sort key for period labels: parsed labels chronologically first, then
/// unparsed labels lexically.
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    let pa = parse_period_label(a);
    let pb = parse_period_label(b);
    match (pa, pb) {
        (Some(x), Some(y)) => x
            .date
            .cmp(&y.date)
            .then_with(|| suffix_number(a).cmp(&suffix_number(b)))
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)),
    }
}

pub fn sort_labels(labels: &mut [String]) {
    labels.sort_by(|a, b| compare_labels(a, b));
}

/// Normalizes header labels and suffixes collisions with `.1`, `.2`, … in
/// encounter order. Blank labels become `Value <n>` for their position.
/// Already-unique labels pass through unchanged, so running this over its
/// own output is a no-op.
pub fn dedupe_labels(labels: &[String]) -> Vec<String> {
    let normalized: Vec<String> = labels
        .iter()
        .enumerate()
        .map(|(pos, l)| match normalize_label(l) {
            blank if blank.is_empty() => format!("Value {}", pos + 1),
            label => label,
        })
        .collect();
    let mut taken: HashSet<String> = normalized.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(normalized.len());

    for label in normalized {
        if seen.insert(label.clone()) {
            out.push(label);
            continue;
        }
        let mut n = 1;
        let candidate = loop {
            let candidate = format!("{}.{}", label, n);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        taken.insert(candidate.clone());
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Resolves one header row: dedupes labels and parses each, keeping the
/// encounter order so column positions stay meaningful.
pub fn resolve_header(labels: &[String]) -> Vec<ResolvedPeriod> {
    let resolved: Vec<ResolvedPeriod> = dedupe_labels(labels)
        .into_iter()
        .map(|label| {
            let anchor = parse_period_label(&label);
            ResolvedPeriod { label, anchor }
        })
        .collect();

    let unparsed: Vec<&str> = resolved
        .iter()
        .filter(|p| p.anchor.is_none())
        .map(|p| p.label.as_str())
        .collect();
    if !unparsed.is_empty() {
        log::debug!("Unparsed period labels sort last: {:?}", unparsed);
    }
    resolved
}

/// A value column from one source document, as positioned in the combined
/// dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub document_index: usize,
    pub column_index: usize,
    pub label: String,
    pub anchor: Option<PeriodAnchor>,
}

impl ColumnRef {
    pub fn new(document_index: usize, column_index: usize, label: &str) -> Self {
        Self {
            document_index,
            column_index,
            label: label.to_string(),
            anchor: parse_period_label(label),
        }
    }
}

/// Orders columns across documents: parsed date ascending (unparsed last),
/// then document insertion order, then original column position.
pub fn order_columns(columns: &mut [ColumnRef]) {
    columns.sort_by(|a, b| {
        let da = a.anchor.map(|x| x.date);
        let db = b.anchor.map(|x| x.date);
        da.is_none()
            .cmp(&db.is_none())
            .then_with(|| da.cmp(&db))
            .then_with(|| a.document_index.cmp(&b.document_index))
            .then_with(|| a.column_index.cmp(&b.column_index))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_supported_formats() {
        assert_eq!(parse_period_label("31.12.2022").unwrap().date, date(2022, 12, 31));
        assert_eq!(parse_period_label("2022-06-30").unwrap().date, date(2022, 6, 30));
        assert_eq!(parse_period_label("12/31/2022").unwrap().date, date(2022, 12, 31));
        assert_eq!(parse_period_label("31/12/2022").unwrap().date, date(2022, 12, 31));
        assert_eq!(parse_period_label("Dec 2021").unwrap().date, date(2021, 12, 1));
        assert_eq!(parse_period_label("September 2021").unwrap().date, date(2021, 9, 1));
        assert_eq!(parse_period_label("Q3 2023").unwrap().date, date(2023, 7, 1));
        assert_eq!(parse_period_label("2023 Q2").unwrap().date, date(2023, 4, 1));
        assert_eq!(parse_period_label("FY2022").unwrap().date, date(2022, 1, 1));
        assert_eq!(parse_period_label("FY 2021").unwrap().kind, PeriodKind::Year);
        assert_eq!(parse_period_label("2020").unwrap().date, date(2020, 1, 1));
        assert_eq!(parse_period_label("Restated").map(|a| a.date), None);
        assert_eq!(parse_period_label(""), None);
    }

    #[test]
    fn test_month_first_wins_for_ambiguous_slash_dates() {
        assert_eq!(parse_period_label("01/02/2022").unwrap().date, date(2022, 1, 2));
    }

    #[test]
    fn test_suffixed_labels_keep_their_anchor() {
        assert_eq!(parse_period_label("2022.1").unwrap().date, date(2022, 1, 1));
        assert_eq!(
            parse_period_label("31.12.2022.2").unwrap().date,
            date(2022, 12, 31)
        );
    }

    #[test]
    fn test_sort_labels_puts_unparsed_last() {
        let mut values = labels(&["Notes", "2023", "31.12.2021", "Adjusted", "Q1 2022"]);
        sort_labels(&mut values);
        assert_eq!(values, labels(&["31.12.2021", "Q1 2022", "2023", "Adjusted", "Notes"]));
    }

    #[test]
    fn test_dedupe_labels_is_deterministic_and_idempotent() {
        let first = dedupe_labels(&labels(&["2022", " 2022 ", "2021", "2022"]));
        assert_eq!(first, labels(&["2022", "2022.1", "2021", "2022.2"]));

        let second = dedupe_labels(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_dedupe_skips_labels_already_in_use() {
        let out = dedupe_labels(&labels(&["2022", "2022", "2022.1"]));
        assert_eq!(out, labels(&["2022", "2022.2", "2022.1"]));
    }

    #[test]
    fn test_sorted_header_keeps_suffix_order() {
        let resolved = resolve_header(&labels(&["2022", "2021", "2022"]));
        let mut ordered: Vec<String> = resolved.into_iter().map(|p| p.label).collect();
        sort_labels(&mut ordered);
        assert_eq!(ordered, labels(&["2021", "2022", "2022.1"]));
    }

    #[test]
    fn test_blank_labels_get_positional_names() {
        let out = dedupe_labels(&labels(&["", "2022", " ", "Value 1"]));
        assert_eq!(out, labels(&["Value 1", "2022", "Value 3", "Value 1.1"]));
        assert_eq!(dedupe_labels(&out), out);

        let resolved = resolve_header(&labels(&["", ""]));
        assert_eq!(resolved[0].label, "Value 1");
        assert_eq!(resolved[1].label, "Value 2");
        assert!(resolved.iter().all(|p| p.anchor.is_none()));
    }

    #[test]
    fn test_order_columns_across_documents() {
        let mut columns = vec![
            ColumnRef::new(1, 0, "2023"),
            ColumnRef::new(0, 1, "Other"),
            ColumnRef::new(0, 0, "2022"),
            ColumnRef::new(1, 1, "2022"),
        ];
        order_columns(&mut columns);
        let order: Vec<(usize, usize)> = columns
            .iter()
            .map(|c| (c.document_index, c.column_index))
            .collect();
        assert_eq!(order, vec![(0, 0), (1, 1), (1, 0), (0, 1)]);
    }
}
