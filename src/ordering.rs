//! Canonical row ordering.
//!
//! Two append-only reference lists remember every `(Type, Category)` and
//! `(Type, Item, Category)` combination in first-seen order. Combined records
//! are sorted against them so a row keeps its place across runs even as new
//! rows appear.

use crate::error::Result;
use crate::schema::StatementType;
use crate::utils::{normalize_key_text, write_atomic};
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const CATEGORY_ORDER_FILE: &str = "category_order.csv";
pub const ITEM_ORDER_FILE: &str = "item_order.csv";

/// Anything that can be placed by the canonical order.
pub trait OrderedRecord {
    fn statement(&self) -> StatementType;
    fn category(&self) -> &str;
    fn item(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntry {
    pub statement: StatementType,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemEntry {
    pub statement: StatementType,
    pub item: String,
    pub category: String,
}

type CategoryKey = (StatementType, String);
type ItemKey = (StatementType, String, String);

fn category_key(statement: StatementType, category: &str) -> CategoryKey {
    (statement, normalize_key_text(category))
}

fn item_key(statement: StatementType, item: &str, category: &str) -> ItemKey {
    (statement, normalize_key_text(item), normalize_key_text(category))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    tier: u8,
    primary: usize,
    secondary: usize,
    tertiary: usize,
    category: String,
    item: String,
    statement: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalOrder {
    categories: Vec<CategoryEntry>,
    items: Vec<ItemEntry>,
    category_pos: HashMap<CategoryKey, usize>,
    item_pos: HashMap<ItemKey, usize>,
}

impl CanonicalOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads both reference files; missing files are empty lists.
    pub fn load(category_path: &Path, item_path: &Path) -> Result<Self> {
        let mut order = Self::new();

        if category_path.exists() {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_path(category_path)?;
            for record in reader.records() {
                let record = record?;
                let raw_type = record.get(0).unwrap_or("");
                match StatementType::from_label(raw_type) {
                    Some(statement) => {
                        order.push_category(statement, record.get(1).unwrap_or(""));
                    }
                    None => log::warn!(
                        "Ignoring category order entry with Type '{}'",
                        raw_type
                    ),
                }
            }
        }

        if item_path.exists() {
            let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(item_path)?;
            for record in reader.records() {
                let record = record?;
                let raw_type = record.get(0).unwrap_or("");
                match StatementType::from_label(raw_type) {
                    Some(statement) => {
                        order.push_item(
                            statement,
                            record.get(1).unwrap_or(""),
                            record.get(2).unwrap_or(""),
                        );
                    }
                    None => log::warn!("Ignoring item order entry with Type '{}'", raw_type),
                }
            }
        }

        log::debug!(
            "Loaded canonical order: {} categories, {} items",
            order.categories.len(),
            order.items.len()
        );
        Ok(order)
    }

    pub fn save(&self, category_path: &Path, item_path: &Path) -> Result<()> {
        let (categories, items) = self.to_csv_bytes()?;
        write_atomic(category_path, &categories)?;
        write_atomic(item_path, &items)?;
        Ok(())
    }

    /// Both reference files, all fields quoted: `(categories, items)`.
    pub fn to_csv_bytes(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(Vec::new());
        writer.write_record(["Type", "Category"])?;
        for entry in &self.categories {
            writer.write_record([entry.statement.as_str(), entry.category.as_str()])?;
        }
        let categories = writer.into_inner().map_err(|e| e.into_error())?;

        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(Vec::new());
        writer.write_record(["Type", "Item", "Category"])?;
        for entry in &self.items {
            writer.write_record([
                entry.statement.as_str(),
                entry.item.as_str(),
                entry.category.as_str(),
            ])?;
        }
        let items = writer.into_inner().map_err(|e| e.into_error())?;
        Ok((categories, items))
    }

    pub fn categories(&self) -> &[CategoryEntry] {
        &self.categories
    }

    pub fn items(&self) -> &[ItemEntry] {
        &self.items
    }

    pub fn category_position(&self, statement: StatementType, category: &str) -> Option<usize> {
        self.category_pos.get(&category_key(statement, category)).copied()
    }

    pub fn item_position(
        &self,
        statement: StatementType,
        item: &str,
        category: &str,
    ) -> Option<usize> {
        self.item_pos.get(&item_key(statement, item, category)).copied()
    }

    fn push_category(&mut self, statement: StatementType, category: &str) -> bool {
        let key = category_key(statement, category);
        if self.category_pos.contains_key(&key) {
            return false;
        }
        self.category_pos.insert(key, self.categories.len());
        self.categories.push(CategoryEntry {
            statement,
            category: category.trim().to_string(),
        });
        true
    }

    fn push_item(&mut self, statement: StatementType, item: &str, category: &str) -> bool {
        let key = item_key(statement, item, category);
        if self.item_pos.contains_key(&key) {
            return false;
        }
        self.item_pos.insert(key, self.items.len());
        self.items.push(ItemEntry {
            statement,
            item: item.trim().to_string(),
            category: category.trim().to_string(),
        });
        true
    }

    fn sort_key<R: OrderedRecord>(&self, record: &R) -> SortKey {
        let statement = record.statement();
        let category = normalize_key_text(record.category());
        let item = normalize_key_text(record.item());
        let cat_pos = self.category_position(statement, record.category());
        let item_pos = self.item_position(statement, record.item(), record.category());

        let (tier, primary, secondary, tertiary) = match (cat_pos, item_pos) {
            (Some(c), Some(i)) => (0, c, 0, i),
            (Some(c), None) => (0, c, 1, usize::MAX),
            (None, Some(i)) => (1, i, 0, 0),
            (None, None) => (2, statement.priority(), 0, 0),
        };
        SortKey {
            tier,
            primary,
            secondary,
            tertiary,
            category,
            item,
            statement: statement.priority(),
        }
    }

    /// Sorts records against the current reference lists.
    ///
    /// Records whose category is known come first by category position,
    /// then records placed only by item position, then everything else
    /// grouped by statement Type and sorted lexically.
    pub fn sort<R: OrderedRecord>(&self, records: &mut [R]) {
        records.sort_by_cached_key(|r| self.sort_key(r));
    }

    /// Appends every combination in `records` that the lists do not yet
    /// hold. Unknown combinations are appended in the order the current
    /// lists would sort them. Returns how many entries were added.
    pub fn update<R: OrderedRecord>(&mut self, records: &[R]) -> usize {
        let mut ordered: Vec<&R> = records.iter().collect();
        ordered.sort_by_cached_key(|r| self.sort_key(*r));

        let mut added = 0;
        for record in ordered {
            if self.push_category(record.statement(), record.category()) {
                added += 1;
            }
            if self.push_item(record.statement(), record.item(), record.category()) {
                added += 1;
            }
        }
        if added > 0 {
            log::info!("Appended {} canonical order entries", added);
        }
        added
    }

    /// Rebuilds the lists from a full dataset: drops entries with no
    /// matching record, keeps the relative order of the rest, and appends
    /// new combinations.
    pub fn regenerate<R: OrderedRecord>(&mut self, records: &[R]) {
        let present_categories: HashSet<CategoryKey> = records
            .iter()
            .map(|r| category_key(r.statement(), r.category()))
            .collect();
        let present_items: HashSet<ItemKey> = records
            .iter()
            .map(|r| item_key(r.statement(), r.item(), r.category()))
            .collect();

        let mut rebuilt = Self::new();
        for entry in &self.categories {
            if present_categories.contains(&category_key(entry.statement, &entry.category)) {
                rebuilt.push_category(entry.statement, &entry.category);
            }
        }
        for entry in &self.items {
            if present_items.contains(&item_key(entry.statement, &entry.item, &entry.category)) {
                rebuilt.push_item(entry.statement, &entry.item, &entry.category);
            }
        }
        let pruned = (self.categories.len() - rebuilt.categories.len())
            + (self.items.len() - rebuilt.items.len());

        rebuilt.update(records);
        *self = rebuilt;
        log::info!("Regenerated canonical order; pruned {} stale entries", pruned);
    }
}
