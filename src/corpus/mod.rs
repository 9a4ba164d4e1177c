//! Character corpus produced by the wiki ETL job.
//!
//! Each corpus file is a JSON array of objects mapping a section name to its
//! text. Section headers scraped from the wiki carry a `[]` suffix
//! (`Overview[]`), so lookups go through [`canonical_key`] and match either
//! spelling.


use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::{Result, SearchError};

pub const NAME_FIELD: &str = "Name";
pub const OVERVIEW_FIELD: &str = "Overview";
pub const PRE_APOCALYPSE_FIELD: &str = "Pre-Apocalypse";
pub const POST_APOCALYPSE_FIELD: &str = "Post-Apocalypse";
pub const DEATH_FIELD: &str = "Death";
pub const KILLED_VICTIMS_FIELD: &str = "Killed Victims";
pub const APPEARANCES_FIELD: &str = "Appearances";
pub const TRIVIA_FIELD: &str = "Trivia";

/// Fields concatenated, in this order, to form the text a document vector is
/// computed from. Queries never go through this.
pub const DOCUMENT_FIELDS: [&str; 6] = [
    PRE_APOCALYPSE_FIELD,
    POST_APOCALYPSE_FIELD,
    DEATH_FIELD,
    KILLED_VICTIMS_FIELD,
    APPEARANCES_FIELD,
    TRIVIA_FIELD,
];

/// Wiki sections with no value for search, dropped during cleaning
pub const EXCLUDED_SECTIONS: [&str; 4] = ["Fate", "Contents", "Relationships", "Gallery"];

/// Strip the scraped `[]` suffix and surrounding whitespace from a field name
#[inline]
pub fn canonical_key(key: &str) -> &str {
    let key = key.trim();
    key.strip_suffix("[]").unwrap_or(key).trim_end()
}

/// Reduce an identifier to ASCII: canonical decomposition, then every
/// non-ASCII char is dropped. Idempotent.
#[inline]
pub fn normalize_id(text: &str) -> String {
    let ascii: String = text.nfkd().filter(char::is_ascii).collect();
    ascii.trim().to_string()
}

/// Collapse every whitespace run (including newlines) into a single space
#[inline]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One character biography: an ordered list of named free-text fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterRecord {
    fields: Vec<(String, String)>,
}

impl CharacterRecord {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::new();
        for (key, value) in fields {
            record.insert(key, value);
        }
        record
    }

    /// Insert or replace a field. A replaced field keeps its position.
    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Look up a field by canonical name; `Overview` matches `Overview[]`
    #[inline]
    pub fn get(&self, field: &str) -> Option<&str> {
        let wanted = canonical_key(field);
        self.fields
            .iter()
            .find(|(key, _)| canonical_key(key) == wanted)
            .map(|(_, value)| value.as_str())
    }

    /// Field value, or the empty string when absent
    #[inline]
    pub fn field(&self, field: &str) -> &str {
        self.get(field).unwrap_or("")
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.field(NAME_FIELD).trim()
    }

    #[inline]
    pub fn overview(&self) -> &str {
        self.field(OVERVIEW_FIELD)
    }

    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Text a document vector is computed from: [`DOCUMENT_FIELDS`] joined
    /// by single spaces, absent fields contributing empty strings.
    #[inline]
    pub fn document_text(&self) -> String {
        DOCUMENT_FIELDS
            .iter()
            .map(|field| self.field(field))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether any of the [`DOCUMENT_FIELDS`] carries text
    #[inline]
    pub fn has_biography(&self) -> bool {
        DOCUMENT_FIELDS
            .iter()
            .any(|field| !self.field(field).trim().is_empty())
    }

    /// Text the encoder sees for this record. Records with no biography
    /// sections fall back to `Name` and `Overview` so they remain searchable.
    #[inline]
    pub fn embedding_text(&self) -> String {
        if self.has_biography() {
            return self.document_text();
        }

        [self.name(), self.overview().trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Normalize whitespace in every value and drop wiki-only sections
    #[inline]
    pub fn cleaned(self) -> Self {
        let fields = self
            .fields
            .into_iter()
            .filter(|(key, _)| !EXCLUDED_SECTIONS.contains(&canonical_key(key)))
            .map(|(key, value)| (key, collapse_whitespace(&value)))
            .collect();
        Self { fields }
    }
}

impl Serialize for CharacterRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CharacterRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = CharacterRecord;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of field names to text")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        let mut record = CharacterRecord::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            record.insert(key, value_to_text(value));
        }
        Ok(record)
    }
}

/// Absent and null values become empty text; other scalars are stringified
fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Many(Vec<CharacterRecord>),
    One(CharacterRecord),
}

/// Load and clean the records of one corpus file. Records without a `Name`
/// are named after the file stem.
#[inline]
pub fn load_corpus_file(path: &Path) -> Result<Vec<CharacterRecord>> {
    let content = fs::read_to_string(path).map_err(|e| {
        SearchError::Corpus(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let parsed: CorpusFile = serde_json::from_str(&content).map_err(|e| {
        SearchError::Corpus(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    let records = match parsed {
        CorpusFile::Many(records) => records,
        CorpusFile::One(record) => vec![record],
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default();

    let records: Vec<CharacterRecord> = records
        .into_iter()
        .map(|record| {
            let mut record = record.cleaned();
            if record.name().is_empty() && !stem.is_empty() {
                record.insert(NAME_FIELD, stem.clone());
            }
            record
        })
        .collect();

    debug!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Load every `*.json` file in `dir`, in file name order. Files that cannot
/// be parsed are skipped with a warning.
#[inline]
pub fn load_corpus_dir(dir: &Path) -> Result<Vec<CharacterRecord>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        SearchError::Corpus(format!(
            "Failed to read corpus directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in &paths {
        match load_corpus_file(path) {
            Ok(loaded) => records.extend(loaded),
            Err(e) => warn!("Skipping corpus file: {}", e),
        }
    }

    info!(
        "Loaded {} character records from {} files in {}",
        records.len(),
        paths.len(),
        dir.display()
    );
    Ok(records)
}
