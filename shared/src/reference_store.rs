//! Local working copy of the reference collections.
//!
//! Mutations are applied in memory first and then written to local
//! persistence; if the write fails the in-memory change is rolled back so
//! memory and disk never disagree.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capabilities::kv::{KvError, LocalStorage, TypedKvStore};
use crate::model::{Asset, AssetKey, Collection, Record, Vehicle};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{collection} record '{key}' already exists")]
    DuplicateKey { collection: Collection, key: String },

    #[error("{collection} record '{key}' not found")]
    NotFound { collection: Collection, key: String },

    #[error("history entry '{0}' not found")]
    HistoryNotFound(String),

    #[error("local persistence failed: {0}")]
    Persistence(#[from] KvError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlaySummary {
    pub added: usize,
    pub updated: usize,
    /// Remote rows ignored because the local copy is newer.
    pub kept_local: usize,
}

/// Ordered records with unique natural keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet<R: Record> {
    records: Vec<R>,
}

impl<R: Record> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R: Record> RecordSet<R> {
    /// Later duplicates replace earlier ones in place.
    #[must_use]
    pub fn from_records(records: Vec<R>) -> Self {
        let mut set = Self::default();
        set.merge(records);
        set
    }

    #[must_use]
    pub fn as_slice(&self) -> &[R] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, key: &R::Key) -> Option<usize> {
        self.records.iter().position(|r| &r.key() == key)
    }

    #[must_use]
    pub fn find(&self, key: &R::Key) -> Option<&R> {
        self.position(key).map(|i| &self.records[i])
    }

    #[must_use]
    pub fn contains(&self, key: &R::Key) -> bool {
        self.position(key).is_some()
    }

    pub fn insert(&mut self, record: R) -> Result<(), StoreError> {
        let key = record.key();
        if self.contains(&key) {
            return Err(StoreError::DuplicateKey {
                collection: R::COLLECTION,
                key: key.to_string(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn upsert(&mut self, record: R) -> MergeOutcome {
        match self.position(&record.key()) {
            Some(i) => {
                self.records[i] = record;
                MergeOutcome::Replaced
            }
            None => {
                self.records.push(record);
                MergeOutcome::Inserted
            }
        }
    }

    pub fn merge(&mut self, batch: impl IntoIterator<Item = R>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in batch {
            match self.upsert(record) {
                MergeOutcome::Inserted => summary.inserted += 1,
                MergeOutcome::Replaced => summary.replaced += 1,
            }
        }
        summary
    }

    /// Replaces the record at `original` in place; the new record may carry a different key.
    pub fn replace(&mut self, original: &R::Key, record: R) -> Result<(), StoreError> {
        let index = self.position(original).ok_or_else(|| StoreError::NotFound {
            collection: R::COLLECTION,
            key: original.to_string(),
        })?;
        let new_key = record.key();
        if &new_key != original && self.contains(&new_key) {
            return Err(StoreError::DuplicateKey {
                collection: R::COLLECTION,
                key: new_key.to_string(),
            });
        }
        self.records[index] = record;
        Ok(())
    }

    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        self.position(key).map(|i| self.records.remove(i))
    }

    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    /// Last-write-wins merge of remote records. A remote record replaces the
    /// local one unless the local copy carries a strictly newer `updated_at`.
    /// Records only present locally are kept.
    pub fn overlay(&mut self, remote: Vec<R>) -> OverlaySummary {
        let mut summary = OverlaySummary::default();
        for incoming in remote {
            let Some(i) = self.position(&incoming.key()) else {
                self.records.push(incoming);
                summary.added += 1;
                continue;
            };
            let local = &self.records[i];
            let remote_wins = match (local.updated_at(), incoming.updated_at()) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(local_at), Some(remote_at)) => remote_at >= local_at,
            };
            if !remote_wins {
                summary.kept_local += 1;
            } else if *local != incoming {
                self.records[i] = incoming;
                summary.updated += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    assets: RecordSet<Asset>,
    vehicles: RecordSet<Vehicle>,
}

impl ReferenceData {
    #[must_use]
    pub fn assets(&self) -> &[Asset] {
        self.assets.as_slice()
    }

    #[must_use]
    pub fn vehicles(&self) -> &[Vehicle] {
        self.vehicles.as_slice()
    }
}

/// Gives generic store code access to the set holding a record type.
pub trait StoredRecord: Record {
    fn slot(data: &ReferenceData) -> &RecordSet<Self>;
    fn slot_mut(data: &mut ReferenceData) -> &mut RecordSet<Self>;
}

impl StoredRecord for Asset {
    fn slot(data: &ReferenceData) -> &RecordSet<Self> {
        &data.assets
    }

    fn slot_mut(data: &mut ReferenceData) -> &mut RecordSet<Self> {
        &mut data.assets
    }
}

impl StoredRecord for Vehicle {
    fn slot(data: &ReferenceData) -> &RecordSet<Self> {
        &data.vehicles
    }

    fn slot_mut(data: &mut ReferenceData) -> &mut RecordSet<Self> {
        &mut data.vehicles
    }
}

pub struct ReferenceStore<S: LocalStorage> {
    storage: Arc<S>,
    data: ReferenceData,
}

impl<S: LocalStorage> ReferenceStore<S> {
    /// Reads both collections; a missing or malformed entry yields the default seed set.
    pub fn load(storage: Arc<S>) -> Self {
        let data = ReferenceData {
            assets: load_collection(storage.as_ref()),
            vehicles: load_collection(storage.as_ref()),
        };
        Self { storage, data }
    }

    #[must_use]
    pub fn data(&self) -> &ReferenceData {
        &self.data
    }

    #[must_use]
    pub fn assets(&self) -> &[Asset] {
        self.data.assets()
    }

    #[must_use]
    pub fn vehicles(&self) -> &[Vehicle] {
        self.data.vehicles()
    }

    #[must_use]
    pub fn records<R: StoredRecord>(&self) -> &[R] {
        R::slot(&self.data).as_slice()
    }

    #[must_use]
    pub fn find<R: StoredRecord>(&self, key: &R::Key) -> Option<&R> {
        R::slot(&self.data).find(key)
    }

    #[must_use]
    pub fn find_asset(&self, key: &AssetKey) -> Option<&Asset> {
        self.data.assets.find(key)
    }

    #[must_use]
    pub fn find_vehicle(&self, plate: &str) -> Option<&Vehicle> {
        self.data.vehicles.find(&plate.to_string())
    }

    /// Manual add: fails on an existing key.
    pub fn insert<R: StoredRecord>(&mut self, record: R) -> Result<(), StoreError> {
        self.mutate(|set: &mut RecordSet<R>| set.insert(record))
    }

    pub fn upsert<R: StoredRecord>(&mut self, record: R) -> Result<MergeOutcome, StoreError> {
        self.mutate(|set: &mut RecordSet<R>| Ok(set.upsert(record)))
    }

    /// Import merge: same key replaces in place, new keys are appended.
    pub fn merge<R: StoredRecord>(&mut self, batch: Vec<R>) -> Result<MergeSummary, StoreError> {
        self.mutate(|set: &mut RecordSet<R>| Ok(set.merge(batch)))
    }

    pub fn replace<R: StoredRecord>(
        &mut self,
        original: &R::Key,
        record: R,
    ) -> Result<(), StoreError> {
        self.mutate(|set: &mut RecordSet<R>| set.replace(original, record))
    }

    pub fn remove<R: StoredRecord>(&mut self, key: &R::Key) -> Result<R, StoreError> {
        self.mutate(|set: &mut RecordSet<R>| {
            set.remove(key).ok_or_else(|| StoreError::NotFound {
                collection: R::COLLECTION,
                key: key.to_string(),
            })
        })
    }

    pub fn replace_all<R: StoredRecord>(&mut self, records: Vec<R>) -> Result<(), StoreError> {
        self.mutate(|set: &mut RecordSet<R>| {
            *set = RecordSet::from_records(records);
            Ok(())
        })
    }

    pub fn clear<R: StoredRecord>(&mut self) -> Result<usize, StoreError> {
        self.mutate(|set: &mut RecordSet<R>| Ok(set.clear()))
    }

    pub fn overlay<R: StoredRecord>(&mut self, remote: Vec<R>) -> Result<OverlaySummary, StoreError> {
        self.mutate(|set: &mut RecordSet<R>| Ok(set.overlay(remote)))
    }

    fn mutate<R, T>(
        &mut self,
        f: impl FnOnce(&mut RecordSet<R>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError>
    where
        R: StoredRecord,
    {
        let set = R::slot_mut(&mut self.data);
        let snapshot = set.clone();
        let out = f(set)?;

        if let Err(e) = persist(self.storage.as_ref(), R::slot(&self.data)) {
            warn!(collection = %R::COLLECTION, error = %e, "rolling back local change");
            *R::slot_mut(&mut self.data) = snapshot;
            return Err(e.into());
        }

        Ok(out)
    }
}

fn load_collection<R: Record>(storage: &dyn LocalStorage) -> RecordSet<R> {
    let loaded = TypedKvStore::<Vec<R>>::named(R::COLLECTION.storage_key())
        .and_then(|store| store.load(storage));
    match loaded {
        Ok(Some(records)) => RecordSet::from_records(records),
        Ok(None) => {
            debug!(collection = %R::COLLECTION, "no local data, seeding defaults");
            RecordSet::from_records(R::defaults())
        }
        Err(e) => {
            warn!(collection = %R::COLLECTION, error = %e, "unreadable local data, seeding defaults");
            RecordSet::from_records(R::defaults())
        }
    }
}

fn persist<R: Record>(storage: &dyn LocalStorage, set: &RecordSet<R>) -> Result<(), KvError> {
    TypedKvStore::<Vec<R>>::named(R::COLLECTION.storage_key())?.save(storage, &set.records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::kv::{KvKey, MemoryStorage, StorageErrorCode};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailableStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
    }

    impl FailableStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    impl LocalStorage for FailableStorage {
        fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            self.inner.get(key)
        }

        fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(KvError::storage(StorageErrorCode::DiskFull, "Injected failure"));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
            self.inner.remove(key)
        }
    }

    fn at(ms: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn empty_store() -> ReferenceStore<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = ReferenceStore::load(storage);
        store.replace_all::<Asset>(Vec::new()).unwrap();
        store.replace_all::<Vehicle>(Vec::new()).unwrap();
        store
    }

    #[test]
    fn missing_data_seeds_defaults() {
        let store = ReferenceStore::load(Arc::new(MemoryStorage::new()));
        assert_eq!(store.assets().len(), 3);
        assert_eq!(store.vehicles().len(), 2);
        assert!(store.find_vehicle("ABC-1234").is_some());
    }

    #[test]
    fn malformed_data_seeds_defaults() {
        let storage = Arc::new(MemoryStorage::new());
        let key = KvKey::new(crate::ASSETS_STORAGE_KEY).unwrap();
        storage.set(&key, "{broken").unwrap();

        let store = ReferenceStore::load(storage);
        assert_eq!(store.assets(), Asset::defaults().as_slice());
    }

    #[test]
    fn saved_empty_collection_stays_empty() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut store = ReferenceStore::load(storage.clone());
            store.clear::<Vehicle>().unwrap();
        }
        let store = ReferenceStore::load(storage);
        assert!(store.vehicles().is_empty());
        assert_eq!(store.assets().len(), 3);
    }

    #[test]
    fn persistence_roundtrip_reproduces_collection() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = ReferenceStore::load(storage.clone());
        store
            .merge(vec![
                Asset::new("A1", "7", "Cabo de Rede").with_updated_at(at(1_000)),
                Asset::new("A2", "", "Switch"),
            ])
            .unwrap();
        store
            .upsert(Vehicle::new("QWE-9876", "Hilux", "Obras", "Campo"))
            .unwrap();

        let reloaded = ReferenceStore::load(storage);
        assert_eq!(reloaded.data(), store.data());
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let mut store = empty_store();
        store.insert(Asset::new("A1", "1", "first")).unwrap();
        let result = store.insert(Asset::new("A1", "0001", "second"));
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(store.assets().len(), 1);
    }

    #[test]
    fn merge_replaces_in_place_and_appends() {
        let mut store = empty_store();
        store
            .merge(vec![
                Asset::new("A1", "1", "one"),
                Asset::new("A2", "1", "two"),
                Asset::new("A3", "1", "three"),
            ])
            .unwrap();

        let summary = store
            .merge(vec![Asset::new("A2", "1", "TWO"), Asset::new("A4", "1", "four")])
            .unwrap();

        assert_eq!(summary, MergeSummary { inserted: 1, replaced: 1 });
        let descriptions: Vec<_> = store.assets().iter().map(|a| a.description.as_str()).collect();
        assert_eq!(descriptions, vec!["one", "TWO", "three", "four"]);
    }

    #[test]
    fn replace_rejects_rename_onto_existing_plate() {
        let mut store = empty_store();
        store.upsert(Vehicle::new("AAA-1111", "Gol", "", "")).unwrap();
        store.upsert(Vehicle::new("BBB-2222", "Uno", "", "")).unwrap();

        let result = store.replace(&"AAA-1111".to_string(), Vehicle::new("BBB-2222", "Gol", "", ""));
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));

        store
            .replace(&"AAA-1111".to_string(), Vehicle::new("CCC-3333", "Gol G5", "", ""))
            .unwrap();
        assert_eq!(store.vehicles()[0].plate, "CCC-3333");
        assert!(store.find_vehicle("AAA-1111").is_none());
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut store = empty_store();
        let result = store.remove::<Asset>(&AssetKey::new("NOPE", ""));
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn failed_write_rolls_back() {
        let storage = Arc::new(FailableStorage::new());
        let mut store = ReferenceStore::load(storage.clone());
        let before = store.data().clone();

        storage.set_fail_writes(true);
        let result = store.upsert(Asset::new("NEW", "1", "new"));

        assert!(matches!(result, Err(StoreError::Persistence(_))));
        assert_eq!(store.data(), &before);

        storage.set_fail_writes(false);
        store.upsert(Asset::new("NEW", "1", "new")).unwrap();
        assert_eq!(store.assets().len(), 4);
    }

    #[test]
    fn overlay_is_last_write_wins() {
        let mut set = RecordSet::from_records(vec![
            Asset::new("A1", "1", "local newer").with_updated_at(at(5_000)),
            Asset::new("A2", "1", "local older").with_updated_at(at(1_000)),
            Asset::new("A3", "1", "local unstamped"),
            Asset::new("A4", "1", "local only"),
        ]);

        let summary = set.overlay(vec![
            Asset::new("A1", "1", "remote older").with_updated_at(at(4_000)),
            Asset::new("A2", "1", "remote newer").with_updated_at(at(2_000)),
            Asset::new("A3", "1", "remote").with_updated_at(at(1)),
            Asset::new("A5", "1", "remote only").with_updated_at(at(1)),
        ]);

        assert_eq!(
            summary,
            OverlaySummary {
                added: 1,
                updated: 2,
                kept_local: 1
            }
        );
        let descriptions: Vec<_> = set.as_slice().iter().map(|a| a.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["local newer", "remote newer", "remote", "local only", "remote only"]
        );
    }

    #[test]
    fn overlay_of_identical_data_changes_nothing() {
        let records = vec![Asset::new("A1", "1", "same").with_updated_at(at(10))];
        let mut set = RecordSet::from_records(records.clone());
        let summary = set.overlay(records);
        assert_eq!(summary, OverlaySummary::default());
    }

    fn asset_strategy() -> impl Strategy<Value = Asset> {
        ("[A-C][0-9]", "[0-9]{0,2}", "[a-z]{1,6}")
            .prop_map(|(code, patrimony, description)| Asset::new(code, patrimony, description))
    }

    proptest! {
        #[test]
        fn import_merge_replaces_colliding_and_keeps_the_rest(
            existing in prop::collection::vec(asset_strategy(), 0..20),
            batch in prop::collection::vec(asset_strategy(), 0..20),
        ) {
            let mut set = RecordSet::from_records(existing);
            let before = set.clone();
            set.merge(batch.clone());

            let batch_set = RecordSet::from_records(batch);

            for record in batch_set.as_slice() {
                prop_assert_eq!(set.find(&record.key()), Some(record));
            }
            for record in before.as_slice() {
                if !batch_set.contains(&record.key()) {
                    prop_assert_eq!(set.find(&record.key()), Some(record));
                }
            }
            let untouched_before: Vec<_> = before
                .as_slice()
                .iter()
                .filter(|r| !batch_set.contains(&r.key()))
                .collect();
            let untouched_after: Vec<_> = set
                .as_slice()
                .iter()
                .filter(|r| !batch_set.contains(&r.key()))
                .collect();
            prop_assert_eq!(untouched_before, untouched_after);
        }
    }
}
