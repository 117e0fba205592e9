//! Read-merge-write of the shared notary and keyword indices.
//!
//! An index key holds `{"notaries": [...]}` or `{"listings": [...]}`. Writers never send the
//! whole index; they send an update such as `{"notary_index_add": "<guid>"}` which every
//! holder merges into its own copy, so concurrent writers don't clobber each other.

use serde_json::{Map, Value};
use tracing::debug;

pub const NOTARY_INDEX_ADD: &str = "notary_index_add";
pub const NOTARY_INDEX_REMOVE: &str = "notary_index_remove";
pub const KEYWORD_INDEX_ADD: &str = "keyword_index_add";
pub const KEYWORD_INDEX_REMOVE: &str = "keyword_index_remove";

const NOTARIES: &str = "notaries";
const LISTINGS: &str = "listings";

#[derive(Debug, Clone, PartialEq)]
pub enum IndexUpdate {
    NotaryAdd(Value),
    NotaryRemove(Value),
    KeywordAdd(Value),
    KeywordRemove(Value),
}

impl IndexUpdate {
    /// Recognize an index update: a JSON object with exactly one of the update keys, or a
    /// string holding such an object.
    pub fn parse(value: &Value) -> Option<IndexUpdate> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Self::from_map(&map),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_map(map: &Map<String, Value>) -> Option<IndexUpdate> {
        if map.len() != 1 {
            return None;
        }

        let (operation, entry) = map.iter().next()?;
        let entry = entry.clone();

        match operation.as_str() {
            NOTARY_INDEX_ADD => Some(IndexUpdate::NotaryAdd(entry)),
            NOTARY_INDEX_REMOVE => Some(IndexUpdate::NotaryRemove(entry)),
            KEYWORD_INDEX_ADD => Some(IndexUpdate::KeywordAdd(entry)),
            KEYWORD_INDEX_REMOVE => Some(IndexUpdate::KeywordRemove(entry)),
            _ => None,
        }
    }

    /// Name of the array this update touches.
    pub fn field(&self) -> &'static str {
        match self {
            IndexUpdate::NotaryAdd(_) | IndexUpdate::NotaryRemove(_) => NOTARIES,
            IndexUpdate::KeywordAdd(_) | IndexUpdate::KeywordRemove(_) => LISTINGS,
        }
    }

    /// Merge this update into the current index.
    ///
    /// Returns the new index, or `None` when a removal finds no index or no such entry, in
    /// which case nothing must be stored.
    pub fn apply(self, existing: Option<Value>) -> Option<Value> {
        let field = self.field();
        let mut entries = existing.and_then(|value| index_entries(value, field));

        match self {
            IndexUpdate::NotaryAdd(entry) | IndexUpdate::KeywordAdd(entry) => {
                let entries = entries.get_or_insert_with(Vec::new);

                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
            IndexUpdate::NotaryRemove(entry) | IndexUpdate::KeywordRemove(entry) => {
                let Some(list) = entries.as_mut() else {
                    debug!(field, "Index to remove from does not exist");
                    return None;
                };

                let Some(position) = list.iter().position(|existing| *existing == entry) else {
                    debug!(field, ?entry, "Index entry to remove does not exist");
                    return None;
                };

                list.remove(position);
            }
        }

        let mut index = Map::new();
        index.insert(field.to_string(), Value::Array(entries.unwrap_or_default()));

        Some(Value::Object(index))
    }
}

/// The value to persist for an incoming write: the merged index for an index update, the
/// value itself otherwise. `None` aborts the write.
pub fn merge(value: Value, existing: Option<Value>) -> Option<Value> {
    match IndexUpdate::parse(&value) {
        Some(update) => update.apply(existing),
        None => Some(value),
    }
}

/// Entries of an existing index, or `None` if `value` is not an index of that kind.
fn index_entries(value: Value, field: &str) -> Option<Vec<Value>> {
    let value = match value {
        Value::String(s) => serde_json::from_str(&s).ok()?,
        value => value,
    };

    match value {
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(entries)) => Some(entries),
            _ => None,
        },
        _ => None,
    }
}
