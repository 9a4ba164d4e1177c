#[cfg(test)]
mod tests;

use tracing::debug;

use crate::corpus::{CharacterRecord, NAME_FIELD, canonical_key};

/// Per-entry metadata ceiling of the hosted index the corpus was built for
pub const DEFAULT_METADATA_MAX_BYTES: usize = 40_000;

/// Length of the compact JSON object `record` serializes to
#[inline]
pub fn serialized_size(record: &CharacterRecord) -> usize {
    let entries: usize = record.fields().map(|(k, v)| entry_size(k, v)).sum();
    let separators = record.len().saturating_sub(1);
    2 + entries + separators
}

fn json_string_size(text: &str) -> usize {
    serde_json::to_string(text).map_or(usize::MAX / 4, |s| s.len())
}

fn entry_size(key: &str, value: &str) -> usize {
    json_string_size(key) + 1 + json_string_size(value)
}

/// Copy of `record` whose serialized size stays within `max_bytes`.
///
/// The first `Name` field goes first, then every other field in record
/// order, including any further key that also reads as `Name`. At the first
/// field that would overflow the budget, it and every later field are
/// dropped, so the result is always a prefix of that ordering. Ceilings
/// below 2 bytes cannot hold even `{}` and yield an empty record.
#[inline]
pub fn truncate_metadata(record: &CharacterRecord, max_bytes: usize) -> CharacterRecord {
    let name_position = record
        .fields()
        .position(|(key, _)| canonical_key(key) == NAME_FIELD);
    let name = name_position.and_then(|position| record.fields().nth(position));
    let rest = record
        .fields()
        .enumerate()
        .filter(|(position, _)| Some(*position) != name_position)
        .map(|(_, field)| field);
    let ordered: Vec<(&str, &str)> = name.into_iter().chain(rest).collect();

    let mut kept = CharacterRecord::new();
    let mut size = 2;

    for (position, (key, value)) in ordered.iter().enumerate() {
        let separator = usize::from(!kept.is_empty());
        let added = entry_size(key, value) + separator;

        if size + added > max_bytes {
            debug!(
                "Metadata ceiling of {} bytes reached at field '{}', dropping {} of {} fields",
                max_bytes,
                key,
                ordered.len() - position,
                ordered.len()
            );
            break;
        }

        size += added;
        kept.insert(*key, *value);
    }

    kept
}
