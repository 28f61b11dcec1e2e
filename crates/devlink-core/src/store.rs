use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::InstanceRecord;

/// Point-in-time copy of every registered instance.
///
/// Readers get their own copy, so a registration landing mid-iteration is
/// never observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrySnapshot {
    records: BTreeMap<String, InstanceRecord>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&InstanceRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstanceRecord)> {
        self.records.iter().map(|(name, record)| (name.as_str(), record))
    }

    pub fn into_records(self) -> BTreeMap<String, InstanceRecord> {
        self.records
    }

    /// Finds the instance that hosts `class_name`.
    ///
    /// `script_hint` is the instance the binding says defines the class; when
    /// absent every record is scanned in name order. A record that lists the
    /// class with a different `definingInstance` redirects the lookup to that
    /// instance (one hop only).
    pub fn object_exporter(
        &self,
        class_name: &str,
        script_hint: Option<&str>,
    ) -> Option<&InstanceRecord> {
        let candidates: Vec<&InstanceRecord> = match script_hint {
            Some(hint) => self.records.get(hint).into_iter().collect(),
            None => self.records.values().collect(),
        };

        for record in candidates {
            let Some(binding) = record
                .stateful_object_bindings
                .iter()
                .find(|binding| binding.exported_name == class_name)
            else {
                continue;
            };

            match binding.defining_instance.as_deref() {
                Some(owner) if owner != record.name => {
                    return self
                        .records
                        .get(owner)
                        .filter(|target| target.exports_object(class_name));
                }
                _ => return Some(record),
            }
        }

        None
    }
}

impl FromIterator<(String, InstanceRecord)> for RegistrySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, InstanceRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, InstanceRecord>> for RegistrySnapshot {
    fn from(records: BTreeMap<String, InstanceRecord>) -> Self {
        Self { records }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: InstanceRecord,
    last_seen: DateTime<Utc>,
}

/// In-memory map of logical instance name to its current record.
///
/// Cloning yields another handle to the same map. Every mutation is a single
/// insert or remove under the write lock, so a poisoned lock still guards a
/// consistent map and is recovered rather than surfaced.
#[derive(Debug, Clone, Default)]
pub struct RegistryStore {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing entry for `name`. The record's own `name` field
    /// is overwritten with the key.
    pub fn upsert(&self, name: &str, record: InstanceRecord) {
        self.upsert_at(name, record, Utc::now());
    }

    pub fn upsert_at(&self, name: &str, mut record: InstanceRecord, seen_at: DateTime<Utc>) {
        record.name = name.to_string();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(
            name.to_string(),
            StoredRecord {
                record,
                last_seen: seen_at,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<InstanceRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(name).map(|stored| stored.record.clone())
    }

    /// Returns whether an entry was present. Removing an absent name is not
    /// an error.
    pub fn remove(&self, name: &str) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(name).is_some()
    }

    pub fn all(&self) -> RegistrySnapshot {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .map(|(name, stored)| (name.clone(), stored.record.clone()))
            .collect()
    }

    pub fn clear(&self) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.clear();
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_seen(&self, name: &str) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(name).map(|stored| stored.last_seen)
    }

    /// Removes every entry not re-registered within `max_age` of `now` and
    /// returns the evicted names, sorted.
    pub fn evict_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut evicted: Vec<String> = records
            .iter()
            .filter(|(_, stored)| now - stored.last_seen > max_age)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &evicted {
            records.remove(name);
        }
        evicted.sort();
        evicted
    }
}
