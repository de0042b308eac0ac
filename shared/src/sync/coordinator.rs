//! Pull-merge-push orchestration over the local working copy.
//!
//! Every local change is applied and persisted before anything goes over the
//! network. Pushes are best-effort: a failed push leaves the change in place
//! and marks the collection dirty so [`SyncCoordinator::retry_pending`] can
//! send it later. A remote delete that fails is queued the same way, and
//! pulls skip queued keys until the delete goes through.
//!
//! Each collection carries a generation counter. A pull takes a ticket per
//! collection when it starts and only applies its result to a collection whose
//! generation still equals the ticket, so a response that raced with a local
//! edit (or with a newer pull) is dropped instead of overwriting it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::kv::{LocalStorage, TypedKvStore};
use crate::model::{Asset, AssetKey, Clock, Collection, Record, SyncTimestamp, Vehicle};
use crate::reference_store::{
    MergeSummary, OverlaySummary, RecordSet, ReferenceData, ReferenceStore, StoreError,
    StoredRecord,
};
use crate::remote::{RemoteRecord, RemoteStore};
use crate::sync::client::{RemoteSyncClient, SyncError};
use crate::{
    Confirmation, DIRTY_STORAGE_KEY, LAST_SYNC_STORAGE_KEY, PENDING_DELETES_STORAGE_KEY,
};

/// Result of a local write that is also pushed to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Synced,
    /// The change is persisted locally; the push failed and will be retried.
    SavedLocallyOnly { reason: String },
}

impl WriteOutcome {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, WriteOutcome::Synced)
    }
}

/// What a pull did to each collection. `None` means the result was stale and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    pub assets: Option<OverlaySummary>,
    pub vehicles: Option<OverlaySummary>,
    /// Whether the stored sync timestamp moved forward.
    pub advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Synced(PullReport),
    /// The remote store could not be reached; local data is in use.
    LocalOnly { reason: String },
}

/// A record type the coordinator can both store locally and push.
pub trait SyncRecord: StoredRecord + RemoteRecord {}

impl<T: StoredRecord + RemoteRecord> SyncRecord for T {}

#[derive(Default)]
struct CollectionGuard {
    generation: AtomicU64,
    writes: Mutex<()>,
}

impl CollectionGuard {
    fn take_ticket(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// A local delete the remote store has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingDelete {
    collection: Collection,
    key: String,
}

struct SyncState {
    last_sync: Option<SyncTimestamp>,
    dirty: HashSet<Collection>,
    deletes: Vec<PendingDelete>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyncCoordinator<S: LocalStorage, R: RemoteStore, C: Clock> {
    storage: Arc<S>,
    store: RwLock<ReferenceStore<S>>,
    client: RemoteSyncClient<R, C>,
    clock: Arc<C>,
    assets: CollectionGuard,
    vehicles: CollectionGuard,
    state: Mutex<SyncState>,
    in_flight: AtomicUsize,
}

impl<S: LocalStorage, R: RemoteStore, C: Clock> SyncCoordinator<S, R, C> {
    /// Seeds the working copy and sync bookkeeping from local persistence.
    pub fn new(storage: Arc<S>, remote: Arc<R>, clock: Arc<C>) -> Self {
        let store = ReferenceStore::load(storage.clone());
        let last_sync = load_or_default::<Option<SyncTimestamp>>(storage.as_ref(), LAST_SYNC_STORAGE_KEY);
        let dirty: HashSet<Collection> =
            load_or_default::<Vec<Collection>>(storage.as_ref(), DIRTY_STORAGE_KEY)
                .into_iter()
                .collect();
        let deletes: Vec<PendingDelete> =
            load_or_default(storage.as_ref(), PENDING_DELETES_STORAGE_KEY);
        debug!(
            assets = store.assets().len(),
            vehicles = store.vehicles().len(),
            has_last_sync = last_sync.is_some(),
            pending_deletes = deletes.len(),
            "local reference data loaded"
        );

        Self {
            client: RemoteSyncClient::new(remote, clock.clone()),
            storage,
            store: RwLock::new(store),
            clock,
            assets: CollectionGuard::default(),
            vehicles: CollectionGuard::default(),
            state: Mutex::new(SyncState {
                last_sync,
                dirty,
                deletes,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub async fn last_sync(&self) -> Option<SyncTimestamp> {
        self.state.lock().await.last_sync
    }

    /// Collections with local changes the remote store has not acknowledged.
    pub async fn pending(&self) -> Vec<Collection> {
        let state = self.state.lock().await;
        Collection::ALL
            .into_iter()
            .filter(|c| state.dirty.contains(c) || state.deletes.iter().any(|d| d.collection == *c))
            .collect()
    }

    pub async fn data(&self) -> ReferenceData {
        self.store.read().await.data().clone()
    }

    pub async fn assets(&self) -> Vec<Asset> {
        self.store.read().await.assets().to_vec()
    }

    pub async fn vehicles(&self) -> Vec<Vehicle> {
        self.store.read().await.vehicles().to_vec()
    }

    /// First pull after start-up: full when nothing was synced yet, incremental otherwise.
    /// Never fails; an unreachable remote leaves the local data in use.
    #[instrument(skip(self))]
    pub async fn load(&self) -> LoadOutcome {
        let since = self.last_sync().await;
        match self.pull_and_apply(since).await {
            Ok(report) => LoadOutcome::Synced(report),
            Err(e) => {
                warn!(error = %e, "remote pull failed, continuing with local data");
                LoadOutcome::LocalOnly {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Incremental pull since the last successful sync.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<PullReport, SyncError> {
        let since = self.last_sync().await;
        self.pull_and_apply(since).await
    }

    /// Full pull followed by a push of the entire working copy.
    #[instrument(skip(self))]
    pub async fn resync(&self) -> Result<PullReport, SyncError> {
        let report = self.pull_and_apply(None).await?;
        self.push_all::<Asset>().await?;
        self.push_all::<Vehicle>().await?;
        info!("full resync complete");
        Ok(report)
    }

    /// Manual add; fails on an existing key.
    #[instrument(skip(self, asset), fields(key = %asset.key()))]
    pub async fn save_asset(&self, asset: Asset) -> Result<WriteOutcome, SyncError> {
        let ((), outcome) = self
            .write_through(vec![asset], None, |store, batch| {
                batch.into_iter().try_for_each(|a| store.insert(a))
            })
            .await?;
        Ok(outcome)
    }

    /// Edit in place. A changed key retires the old remote row.
    #[instrument(skip(self, original, asset), fields(original = %original))]
    pub async fn replace_asset(
        &self,
        original: &AssetKey,
        asset: Asset,
    ) -> Result<WriteOutcome, SyncError> {
        let retired = (asset.key() != *original).then(|| original.clone());
        let ((), outcome) = self
            .write_through(vec![asset], retired, |store, batch| {
                batch
                    .into_iter()
                    .try_for_each(|a| store.replace(original, a))
            })
            .await?;
        Ok(outcome)
    }

    #[instrument(skip(self, vehicle), fields(plate = %vehicle.plate))]
    pub async fn save_vehicle(&self, vehicle: Vehicle) -> Result<WriteOutcome, SyncError> {
        let ((), outcome) = self
            .write_through(vec![vehicle], None, |store, batch| {
                batch.into_iter().try_for_each(|v| store.insert(v))
            })
            .await?;
        Ok(outcome)
    }

    #[instrument(skip(self, original_plate, vehicle), fields(original = original_plate))]
    pub async fn replace_vehicle(
        &self,
        original_plate: &str,
        vehicle: Vehicle,
    ) -> Result<WriteOutcome, SyncError> {
        let original = original_plate.to_string();
        let retired = (vehicle.plate != original).then(|| original.clone());
        let ((), outcome) = self
            .write_through(vec![vehicle], retired, |store, batch| {
                batch
                    .into_iter()
                    .try_for_each(|v| store.replace(&original, v))
            })
            .await?;
        Ok(outcome)
    }

    #[instrument(skip_all, fields(count = assets.len()))]
    pub async fn import_assets(
        &self,
        assets: Vec<Asset>,
    ) -> Result<(MergeSummary, WriteOutcome), SyncError> {
        self.import(assets).await
    }

    #[instrument(skip_all, fields(count = vehicles.len()))]
    pub async fn import_vehicles(
        &self,
        vehicles: Vec<Vehicle>,
    ) -> Result<(MergeSummary, WriteOutcome), SyncError> {
        self.import(vehicles).await
    }

    /// Removes locally, then remotely. The local delete stands even if the remote one
    /// fails; the error is returned and the delete is queued for [`Self::retry_pending`].
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn delete_asset(&self, key: &AssetKey) -> Result<Asset, SyncError> {
        self.delete_through::<Asset>(key).await
    }

    #[instrument(skip(self))]
    pub async fn delete_vehicle(&self, plate: &str) -> Result<Vehicle, SyncError> {
        self.delete_through::<Vehicle>(&plate.to_string()).await
    }

    /// Empties a collection remotely and then locally. Returns the number of local records removed.
    #[instrument(skip(self))]
    pub async fn clear_collection(
        &self,
        collection: Collection,
        confirmation: Confirmation,
    ) -> Result<usize, SyncError> {
        if !confirmation.is_confirmed() {
            return Err(SyncError::NotConfirmed);
        }
        match collection {
            Collection::Assets => self.clear_through::<Asset>().await,
            Collection::Vehicles => self.clear_through::<Vehicle>().await,
        }
    }

    /// Replays queued deletes, then pushes every collection whose last push failed.
    /// Returns the collections now in sync.
    #[instrument(skip(self))]
    pub async fn retry_pending(&self) -> Result<Vec<Collection>, SyncError> {
        let pending = self.pending().await;
        self.replay_deletes().await?;
        let dirty: Vec<Collection> = {
            let state = self.state.lock().await;
            pending
                .iter()
                .copied()
                .filter(|c| state.dirty.contains(c))
                .collect()
        };
        for collection in dirty {
            match collection {
                Collection::Assets => self.push_all::<Asset>().await?,
                Collection::Vehicles => self.push_all::<Vehicle>().await?,
            };
        }
        Ok(pending)
    }

    fn guard(&self, collection: Collection) -> &CollectionGuard {
        match collection {
            Collection::Assets => &self.assets,
            Collection::Vehicles => &self.vehicles,
        }
    }

    fn begin(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    #[instrument(skip_all, fields(incremental = since.is_some()))]
    async fn pull_and_apply(&self, since: Option<SyncTimestamp>) -> Result<PullReport, SyncError> {
        let _busy = self.begin();
        let asset_ticket = self.assets.take_ticket();
        let vehicle_ticket = self.vehicles.take_ticket();

        let mut pulled = self.client.pull(since).await?;
        {
            let state = self.state.lock().await;
            pulled.assets = without_queued_deletes(pulled.assets, &state.deletes);
            pulled.vehicles = without_queued_deletes(pulled.vehicles, &state.deletes);
        }

        let mut store = self.store.write().await;
        let assets = if self.assets.is_current(asset_ticket) {
            Some(store.overlay(pulled.assets)?)
        } else {
            debug!("asset pull superseded, discarding");
            None
        };
        let vehicles = if self.vehicles.is_current(vehicle_ticket) {
            Some(store.overlay(pulled.vehicles)?)
        } else {
            debug!("vehicle pull superseded, discarding");
            None
        };
        drop(store);

        let advanced = assets.is_some() && vehicles.is_some();
        if advanced {
            self.record_last_sync(pulled.fetched_at).await;
        }
        info!(?assets, ?vehicles, advanced, "pull applied");

        Ok(PullReport {
            assets,
            vehicles,
            advanced,
        })
    }

    async fn write_through<T, O>(
        &self,
        records: Vec<T>,
        retired: Option<T::Key>,
        apply: impl FnOnce(&mut ReferenceStore<S>, Vec<T>) -> Result<O, StoreError> + Send,
    ) -> Result<(O, WriteOutcome), SyncError>
    where
        T: SyncRecord,
        O: Send,
    {
        let guard = self.guard(T::COLLECTION);
        let _queue = guard.writes.lock().await;
        let _busy = self.begin();

        let now = self.clock.now();
        let records: Vec<T> = records
            .into_iter()
            .map(|mut record| {
                record.set_updated_at(Some(now));
                record
            })
            .collect();

        let out = {
            let mut store = self.store.write().await;
            let out = apply(&mut *store, records.clone())?;
            guard.bump();
            out
        };
        self.forget_deletes(T::COLLECTION, |key| {
            records.iter().any(|r| r.key().to_string() == key)
        })
        .await;

        if let Some(old) = retired {
            let old = old.to_string();
            if let Err(e) = self.client.delete_from_remote(T::COLLECTION, &old).await {
                warn!(collection = %T::COLLECTION, key = %old, error = %e, "could not retire renamed record remotely");
            }
        }

        let outcome = match self.client.push(&records).await {
            Ok(_) => WriteOutcome::Synced,
            Err(e) => {
                warn!(collection = %T::COLLECTION, error = %e, "push failed, change kept locally");
                self.set_dirty(T::COLLECTION, true).await;
                WriteOutcome::SavedLocallyOnly {
                    reason: e.to_string(),
                }
            }
        };
        Ok((out, outcome))
    }

    async fn import<T: SyncRecord>(
        &self,
        batch: Vec<T>,
    ) -> Result<(MergeSummary, WriteOutcome), SyncError> {
        // One row per key; the remote upsert rejects a batch touching a row twice.
        let batch = RecordSet::from_records(batch).as_slice().to_vec();
        let (summary, outcome) = self
            .write_through(batch, None, |store, batch| store.merge(batch))
            .await?;
        info!(
            collection = %T::COLLECTION,
            inserted = summary.inserted,
            replaced = summary.replaced,
            "import merged"
        );
        Ok((summary, outcome))
    }

    async fn delete_through<T: SyncRecord>(&self, key: &T::Key) -> Result<T, SyncError> {
        let guard = self.guard(T::COLLECTION);
        let _queue = guard.writes.lock().await;
        let _busy = self.begin();

        let removed = {
            let mut store = self.store.write().await;
            let removed = store.remove::<T>(key)?;
            guard.bump();
            removed
        };
        let key = key.to_string();
        if let Err(e) = self.client.delete_from_remote(T::COLLECTION, &key).await {
            warn!(collection = %T::COLLECTION, %key, error = %e, "remote delete failed, queued for retry");
            self.queue_delete(PendingDelete {
                collection: T::COLLECTION,
                key,
            })
            .await;
            return Err(e);
        }
        Ok(removed)
    }

    async fn clear_through<T: SyncRecord>(&self) -> Result<usize, SyncError> {
        let guard = self.guard(T::COLLECTION);
        let _queue = guard.writes.lock().await;
        let _busy = self.begin();

        self.client.clear_remote_storage(T::COLLECTION).await?;
        let removed = {
            let mut store = self.store.write().await;
            let removed = store.clear::<T>()?;
            guard.bump();
            removed
        };
        self.set_dirty(T::COLLECTION, false).await;
        self.forget_deletes(T::COLLECTION, |_| true).await;
        info!(collection = %T::COLLECTION, removed, "collection cleared");
        Ok(removed)
    }

    async fn push_all<T: SyncRecord>(&self) -> Result<usize, SyncError> {
        let guard = self.guard(T::COLLECTION);
        let _queue = guard.writes.lock().await;
        let _busy = self.begin();

        let records = self.store.read().await.records::<T>().to_vec();
        match self.client.push(&records).await {
            Ok(pushed) => {
                self.set_dirty(T::COLLECTION, false).await;
                Ok(pushed.len())
            }
            Err(e) => {
                self.set_dirty(T::COLLECTION, true).await;
                Err(e)
            }
        }
    }

    async fn replay_deletes(&self) -> Result<(), SyncError> {
        let queued = self.state.lock().await.deletes.clone();
        for delete in queued {
            let guard = self.guard(delete.collection);
            let _queue = guard.writes.lock().await;
            let _busy = self.begin();
            self.client
                .delete_from_remote(delete.collection, &delete.key)
                .await?;
            self.forget_deletes(delete.collection, |key| key == delete.key)
                .await;
        }
        Ok(())
    }

    async fn queue_delete(&self, delete: PendingDelete) {
        let mut state = self.state.lock().await;
        if !state.deletes.contains(&delete) {
            state.deletes.push(delete);
            persist(self.storage.as_ref(), PENDING_DELETES_STORAGE_KEY, &state.deletes);
        }
    }

    async fn forget_deletes(&self, collection: Collection, matches: impl Fn(&str) -> bool + Send) {
        let mut state = self.state.lock().await;
        let before = state.deletes.len();
        state
            .deletes
            .retain(|d| d.collection != collection || !matches(&d.key));
        if state.deletes.len() != before {
            persist(self.storage.as_ref(), PENDING_DELETES_STORAGE_KEY, &state.deletes);
        }
    }

    async fn record_last_sync(&self, at: SyncTimestamp) {
        self.state.lock().await.last_sync = Some(at);
        persist(self.storage.as_ref(), LAST_SYNC_STORAGE_KEY, &Some(at));
    }

    async fn set_dirty(&self, collection: Collection, dirty: bool) {
        let mut state = self.state.lock().await;
        let changed = if dirty {
            state.dirty.insert(collection)
        } else {
            state.dirty.remove(&collection)
        };
        if changed {
            let pending: Vec<Collection> = Collection::ALL
                .into_iter()
                .filter(|c| state.dirty.contains(c))
                .collect();
            persist(self.storage.as_ref(), DIRTY_STORAGE_KEY, &pending);
        }
    }
}

fn without_queued_deletes<T: Record>(records: Vec<T>, deletes: &[PendingDelete]) -> Vec<T> {
    if deletes.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| {
            let key = record.key().to_string();
            !deletes
                .iter()
                .any(|d| d.collection == T::COLLECTION && d.key == key)
        })
        .collect()
}

fn load_or_default<T: Default + Serialize + DeserializeOwned>(
    storage: &dyn LocalStorage,
    key: &'static str,
) -> T {
    match TypedKvStore::<T>::named(key).and_then(|store| store.load(storage)) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!(key, error = %e, "unreadable sync state, using default");
            T::default()
        }
    }
}

/// Sync bookkeeping is advisory; failing to persist it only costs a wider pull later.
fn persist<T: Serialize + DeserializeOwned>(storage: &dyn LocalStorage, key: &'static str, value: &T) {
    if let Err(e) = TypedKvStore::<T>::named(key).and_then(|store| store.save(storage, value)) {
        warn!(key, error = %e, "could not persist sync state");
    }
}
