//! Bounded, durable history of past reconstructions.
//!
//! Two independent lists (`encrypt`, `decrypt`) live under fixed keys in a
//! [`KeyValueStore`], each a JSON array ordered newest-first:
//!
//! ```text
//! veil_history_encrypt  → [{ id, label, encodedImage, createdAt }, …]
//! veil_history_decrypt  → [{ id, label, encodedImage, createdAt }, …]
//! veil_history_seq      → last issued id
//! ```
//!
//! Every operation is a read-modify-write inside one call; there is a single
//! writer, so no locking.

pub mod store;

pub use store::{FileStore, KeyValueStore, MemoryStore};

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::error::{PipelineError, Result};

const SEQ_KEY: &str = "veil_history_seq";

/// Label stored when a composite is saved without a decoded text.
pub const LABEL_UNRECOGNIZED: &str = "unrecognized";
pub const LABEL_MANUAL: &str = "manually saved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Encrypt,
    Decrypt,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Encrypt, Category::Decrypt];

    pub fn storage_key(self) -> &'static str {
        match self {
            Category::Encrypt => "veil_history_encrypt",
            Category::Decrypt => "veil_history_decrypt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Encrypt => "encrypt",
            Category::Decrypt => "decrypt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "encrypt" => Some(Category::Encrypt),
            "decrypt" => Some(Category::Decrypt),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a composite was persisted without a successful decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    /// Decoding was attempted and failed.
    Unrecognized,
    /// The user saved without trying to decode.
    Manual,
}

impl SaveReason {
    pub fn label(self) -> &'static str {
        match self {
            SaveReason::Unrecognized => LABEL_UNRECOGNIZED,
            SaveReason::Manual => LABEL_MANUAL,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unrecognized" => Some(SaveReason::Unrecognized),
            "manual" => Some(SaveReason::Manual),
            _ => None,
        }
    }
}

/// One persisted reconstruction. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: u64,
    pub label: String,
    pub encoded_image: String,
    pub created_at: String,
}

impl HistoryRecord {
    pub fn is_sentinel(&self) -> bool {
        self.label == LABEL_UNRECOGNIZED || self.label == LABEL_MANUAL
    }
}

/// Local time in the display format used by the history panel.
pub fn display_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct HistoryStore<S: KeyValueStore> {
    store: S,
    capacity: usize,
}

impl<S: KeyValueStore> HistoryStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, DEFAULT_HISTORY_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking the capacity trims every list on its next write.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records for `category`, newest first. A corrupt stored list reads as
    /// empty rather than failing the caller.
    pub fn list(&self, category: Category) -> Result<Vec<HistoryRecord>> {
        let Some(raw) = self.store.get(category.storage_key())? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(category = %category, error = %e, "discarding unreadable history list");
                Ok(Vec::new())
            }
        }
    }

    /// Prepend `record`, then evict from the tail down to capacity. A record
    /// with an id already in the list replaces it.
    pub fn add(&mut self, category: Category, record: HistoryRecord) -> Result<()> {
        let mut records = self.list(category)?;
        records.retain(|r| r.id != record.id);
        records.insert(0, record);
        if records.len() > self.capacity {
            let evicted = records.split_off(self.capacity);
            debug!(category = %category, evicted = evicted.len(), "history over capacity");
        }
        self.save(category, &records)
    }

    /// Build a record with a fresh id and the current time, then add it.
    pub fn record(
        &mut self,
        category: Category,
        label: impl Into<String>,
        encoded_image: impl Into<String>,
    ) -> Result<HistoryRecord> {
        let record = HistoryRecord {
            id: self.next_id()?,
            label: label.into(),
            encoded_image: encoded_image.into(),
            created_at: display_timestamp(),
        };
        self.add(category, record.clone())?;
        Ok(record)
    }

    /// Delete the record with `id`. Returns whether anything was removed.
    pub fn remove(&mut self, category: Category, id: u64) -> Result<bool> {
        let mut records = self.list(category)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(category, &records)?;
        Ok(true)
    }

    pub fn clear(&mut self, category: Category) -> Result<()> {
        self.store.remove(category.storage_key())
    }

    /// The stored list as JSON, for hosts that persist it themselves.
    pub fn export(&self, category: Category) -> Result<String> {
        Ok(serde_json::to_string(&self.list(category)?)?)
    }

    /// Replace a list from JSON (as produced by [`export`](Self::export)),
    /// keeping at most `capacity` of its first entries. Only the first
    /// record with a given id survives. Returns the kept count.
    pub fn restore(&mut self, category: Category, json: &str) -> Result<usize> {
        let mut records: Vec<HistoryRecord> = serde_json::from_str(json)?;
        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.id));
        records.truncate(self.capacity);
        self.save(category, &records)?;
        Ok(records.len())
    }

    /// Strictly greater than every id issued or currently stored.
    fn next_id(&mut self) -> Result<u64> {
        let mut last = self
            .store
            .get(SEQ_KEY)?
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        for category in Category::ALL {
            for r in self.list(category)? {
                last = last.max(r.id);
            }
        }
        let id = last
            .checked_add(1)
            .ok_or_else(|| PipelineError::storage("history id space exhausted"))?;
        self.store.set(SEQ_KEY, &id.to_string())?;
        Ok(id)
    }

    fn save(&mut self, category: Category, records: &[HistoryRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        self.store.set(category.storage_key(), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HistoryStore<MemoryStore> {
        HistoryStore::new(MemoryStore::new())
    }

    fn rec(id: u64) -> HistoryRecord {
        HistoryRecord {
            id,
            label: format!("secret {}", id),
            encoded_image: "data:image/png;base64,AA==".to_string(),
            created_at: "2026-01-01 00:00:00".to_string(),
        }
    }

    fn ids(h: &HistoryStore<MemoryStore>, c: Category) -> Vec<u64> {
        h.list(c).unwrap().iter().map(|r| r.id).collect()
    }

    #[test]
    fn empty_store_lists_nothing() {
        assert!(store().list(Category::Decrypt).unwrap().is_empty());
    }

    #[test]
    fn add_is_newest_first() {
        let mut h = store();
        h.add(Category::Decrypt, rec(1)).unwrap();
        h.add(Category::Decrypt, rec(2)).unwrap();
        h.add(Category::Decrypt, rec(3)).unwrap();
        assert_eq!(ids(&h, Category::Decrypt), vec![3, 2, 1]);
    }

    #[test]
    fn sixth_insert_evicts_the_first() {
        let mut h = store();
        for id in 1..=6 {
            h.add(Category::Decrypt, rec(id)).unwrap();
        }
        let list = ids(&h, Category::Decrypt);
        assert_eq!(list.len(), 5);
        assert!(!list.contains(&1));
        assert_eq!(list, vec![6, 5, 4, 3, 2]);
    }

    #[test]
    fn remove_keeps_relative_order() {
        let mut h = store();
        for id in 1..=5 {
            h.add(Category::Decrypt, rec(id)).unwrap();
        }
        assert!(h.remove(Category::Decrypt, 3).unwrap());
        assert_eq!(ids(&h, Category::Decrypt), vec![5, 4, 2, 1]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut h = store();
        h.add(Category::Decrypt, rec(1)).unwrap();
        assert!(!h.remove(Category::Decrypt, 42).unwrap());
        assert_eq!(ids(&h, Category::Decrypt), vec![1]);
    }

    #[test]
    fn categories_are_independent() {
        let mut h = store();
        h.add(Category::Encrypt, rec(1)).unwrap();
        h.add(Category::Decrypt, rec(2)).unwrap();
        assert_eq!(ids(&h, Category::Encrypt), vec![1]);
        assert_eq!(ids(&h, Category::Decrypt), vec![2]);
        h.remove(Category::Encrypt, 2).unwrap();
        assert_eq!(ids(&h, Category::Decrypt), vec![2]);
    }

    #[test]
    fn record_issues_increasing_ids() {
        let mut h = store();
        let a = h.record(Category::Decrypt, "one", "img").unwrap();
        let b = h.record(Category::Encrypt, "two", "img").unwrap();
        let c = h.record(Category::Decrypt, "three", "img").unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(h.list(Category::Decrypt).unwrap()[0], c);
    }

    #[test]
    fn ids_never_reused_after_removal() {
        let mut h = store();
        let a = h.record(Category::Decrypt, "one", "img").unwrap();
        h.remove(Category::Decrypt, a.id).unwrap();
        let b = h.record(Category::Decrypt, "two", "img").unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn ids_stay_above_restored_records() {
        let mut h = store();
        h.restore(Category::Decrypt, &serde_json::to_string(&vec![rec(40)]).unwrap())
            .unwrap();
        let r = h.record(Category::Decrypt, "next", "img").unwrap();
        assert_eq!(r.id, 41);
    }

    #[test]
    fn duplicate_id_replaces() {
        let mut h = store();
        h.add(Category::Decrypt, rec(1)).unwrap();
        h.add(Category::Decrypt, rec(2)).unwrap();
        h.add(Category::Decrypt, rec(1)).unwrap();
        assert_eq!(ids(&h, Category::Decrypt), vec![1, 2]);
    }

    #[test]
    fn persisted_layout_uses_fixed_keys_and_camel_case() {
        let mut h = store();
        h.add(Category::Decrypt, rec(7)).unwrap();
        let raw = h.store().get("veil_history_decrypt").unwrap().unwrap();
        assert!(raw.contains(r#""encodedImage""#));
        assert!(raw.contains(r#""createdAt""#));
        assert!(h.store().get("veil_history_encrypt").unwrap().is_none());
    }

    #[test]
    fn corrupt_list_reads_empty_and_recovers() {
        let mut kv = MemoryStore::new();
        kv.set("veil_history_decrypt", "not json").unwrap();
        let mut h = HistoryStore::new(kv);
        assert!(h.list(Category::Decrypt).unwrap().is_empty());
        h.add(Category::Decrypt, rec(1)).unwrap();
        assert_eq!(ids(&h, Category::Decrypt), vec![1]);
    }

    #[test]
    fn restore_truncates_to_capacity() {
        let mut h = HistoryStore::with_capacity(MemoryStore::new(), 2);
        let json = serde_json::to_string(&vec![rec(9), rec(8), rec(7)]).unwrap();
        assert_eq!(h.restore(Category::Encrypt, &json).unwrap(), 2);
        assert_eq!(ids(&h, Category::Encrypt), vec![9, 8]);
    }

    #[test]
    fn export_restore_roundtrip() {
        let mut a = store();
        a.add(Category::Decrypt, rec(1)).unwrap();
        a.add(Category::Decrypt, rec(2)).unwrap();
        let json = a.export(Category::Decrypt).unwrap();
        let mut b = store();
        b.restore(Category::Decrypt, &json).unwrap();
        assert_eq!(b.list(Category::Decrypt).unwrap(), a.list(Category::Decrypt).unwrap());
    }

    #[test]
    fn restore_keeps_first_of_duplicate_ids() {
        let mut h = store();
        let mut dup = rec(1);
        dup.label = "shadow".to_string();
        let json = serde_json::to_string(&vec![rec(1), dup, rec(2)]).unwrap();
        assert_eq!(h.restore(Category::Decrypt, &json).unwrap(), 2);
        assert_eq!(ids(&h, Category::Decrypt), vec![1, 2]);
        assert_eq!(h.list(Category::Decrypt).unwrap()[0].label, "secret 1");

        assert!(h.remove(Category::Decrypt, 1).unwrap());
        assert_eq!(ids(&h, Category::Decrypt), vec![2]);
    }

    #[test]
    fn exhausted_id_space_is_a_storage_error() {
        let mut h = store();
        h.restore(Category::Decrypt, &serde_json::to_string(&vec![rec(u64::MAX)]).unwrap())
            .unwrap();
        let err = h.record(Category::Decrypt, "one more", "data:image/png;base64,AA==").unwrap_err();
        assert!(matches!(err, PipelineError::Storage { .. }));
        assert_eq!(ids(&h, Category::Decrypt), vec![u64::MAX]);
    }

    #[test]
    fn restore_invalid_json_is_error() {
        assert!(store().restore(Category::Decrypt, "{{{").is_err());
    }

    #[test]
    fn history_survives_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut h = HistoryStore::new(FileStore::open(dir.path()).unwrap());
            h.record(Category::Decrypt, "hello", "img").unwrap();
            h.record(Category::Decrypt, LABEL_MANUAL, "img").unwrap();
        }
        let h = HistoryStore::new(FileStore::open(dir.path()).unwrap());
        let list = h.list(Category::Decrypt).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].label, LABEL_MANUAL);
        assert!(list[0].is_sentinel());
        assert_eq!(list[1].label, "hello");
    }

    #[test]
    fn zero_capacity_raised_to_one() {
        let mut h = HistoryStore::with_capacity(MemoryStore::new(), 0);
        h.add(Category::Decrypt, rec(1)).unwrap();
        h.add(Category::Decrypt, rec(2)).unwrap();
        assert_eq!(ids(&h, Category::Decrypt), vec![2]);
    }

    #[test]
    fn category_and_reason_parse() {
        assert_eq!(Category::parse("encrypt"), Some(Category::Encrypt));
        assert_eq!(Category::parse("other"), None);
        assert_eq!(SaveReason::parse("manual").map(SaveReason::label), Some(LABEL_MANUAL));
        assert_eq!(Category::Decrypt.to_string(), "decrypt");
    }
}
