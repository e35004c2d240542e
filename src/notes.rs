use crate::error::Result;
use crate::schema::StatementType;
use crate::utils::{normalize_key_text, write_atomic};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const NOTE_STORE_FILE: &str = "type_category_item_assignments.csv";
const HEADER: [&str; 4] = ["Type", "Category", "Item", "Note"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub statement: StatementType,
    pub category: String,
    pub item: String,
}

impl NoteKey {
    pub fn new(statement: StatementType, category: &str, item: &str) -> Self {
        Self {
            statement,
            category: category.trim().to_string(),
            item: item.trim().to_string(),
        }
    }

    fn normalized(&self) -> (StatementType, String, String) {
        (
            self.statement,
            normalize_key_text(&self.category),
            normalize_key_text(&self.item),
        )
    }
}

/// Persisted `(Type, Category, Item) → Note` assignments.
///
/// Loaded fully into memory, mutated there, and rewritten as a whole on
/// [`NoteAssignmentStore::flush`]. Keys match on normalized text; the first
/// spelling seen is the one persisted. Notes are stored lower-case. A key
/// assigned an empty note stays in the store as cleared, so later runs do
/// not seed it again from extracted rows.
#[derive(Debug, Clone, Default)]
pub struct NoteAssignmentStore {
    path: Option<PathBuf>,
    entries: BTreeMap<(StatementType, String, String), (NoteKey, String)>,
    dirty: bool,
}

impl NoteAssignmentStore {
    /// A store with no backing file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store at `path`. A missing file is an empty store that will
    /// be created on the first flush.
    pub fn load(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if !path.exists() {
            log::debug!("Note store {} does not exist yet", path.display());
            return Ok(store);
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        for record in reader.records() {
            let record = record?;
            let raw_type = record.get(0).unwrap_or("");
            let Some(statement) = StatementType::from_label(raw_type) else {
                log::warn!(
                    "Skipping note assignment with unknown Type '{}' in {}",
                    raw_type,
                    path.display()
                );
                continue;
            };
            let key = NoteKey::new(
                statement,
                record.get(1).unwrap_or(""),
                record.get(2).unwrap_or(""),
            );
            let note = record.get(3).unwrap_or("").trim().to_lowercase();
            store.entries.insert(key.normalized(), (key, note));
        }

        log::info!("Loaded {} note assignments from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn get(&self, key: &NoteKey) -> Option<&str> {
        self.entries
            .get(&key.normalized())
            .map(|(_, note)| note.as_str())
    }

    /// The assigned note, or empty string.
    pub fn note_for(&self, key: &NoteKey) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Assigns `note` to `key`. An empty note marks the key as cleared.
    pub fn set(&mut self, key: NoteKey, note: &str) {
        let note = note.trim().to_lowercase();
        let normalized = key.normalized();
        match self.entries.get_mut(&normalized) {
            Some((_, existing)) if *existing == note => {}
            Some((_, existing)) => {
                *existing = note;
                self.dirty = true;
            }
            None => {
                self.entries.insert(normalized, (key, note));
                self.dirty = true;
            }
        }
    }

    /// Forgets `key` entirely; the next extracted note for it seeds again.
    pub fn remove(&mut self, key: &NoteKey) -> bool {
        let removed = self.entries.remove(&key.normalized()).is_some();
        self.dirty |= removed;
        removed
    }

    /// Records `note` for `key` only if the key has no assignment yet.
    /// Returns the note in effect afterwards.
    pub fn seed(&mut self, key: NoteKey, note: &str) -> &str {
        let normalized = key.normalized();
        let incoming = note.trim().to_lowercase();
        if let Some((_, existing)) = self.entries.get(&normalized) {
            if existing.is_empty() && !incoming.is_empty() {
                log::debug!(
                    "Ignoring note '{}' for {} / {} / {}: assignment was cleared",
                    incoming,
                    key.statement,
                    key.category,
                    key.item
                );
            } else if !incoming.is_empty() && *existing != incoming {
                log::warn!(
                    "Note '{}' for {} / {} / {} conflicts with assigned '{}'; keeping the assignment",
                    incoming,
                    key.statement,
                    key.category,
                    key.item,
                    existing
                );
            }
        } else if !incoming.is_empty() {
            self.set(key, &incoming);
        }
        self.entries
            .get(&normalized)
            .map(|(_, note)| note.as_str())
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NoteKey, &str)> {
        self.entries.values().map(|(key, note)| (key, note.as_str()))
    }

    /// Rewrites the backing file if anything changed since load.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !self.dirty && path.exists() {
            return Ok(());
        }
        self.save_to(&path)?;
        self.dirty = false;
        Ok(())
    }

    /// The backing file and its new contents, when a flush would write.
    pub fn pending_write(&self) -> Result<Option<(PathBuf, Vec<u8>)>> {
        match &self.path {
            Some(path) if self.dirty || !path.exists() => {
                Ok(Some((path.clone(), self.to_csv_bytes()?)))
            }
            _ => Ok(None),
        }
    }

    /// Writes every assignment to `path`, sorted by key, all fields quoted.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_csv_bytes()?)?;
        log::debug!("Wrote {} note assignments to {}", self.len(), path.display());
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(Vec::new());
        writer.write_record(HEADER)?;
        for (key, note) in self.iter() {
            writer.write_record([
                key.statement.as_str(),
                key.category.as_str(),
                key.item.as_str(),
                note,
            ])?;
        }
        Ok(writer.into_inner().map_err(|e| e.into_error())?)
    }
}
