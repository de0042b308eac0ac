use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{Asset, Clock, Collection, SyncTimestamp, Vehicle};
use crate::reference_store::StoreError;
use crate::remote::{RemoteError, RemoteRecord, RemoteStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote store unreachable: {0}")]
    Offline(String),

    #[error(transparent)]
    Remote(RemoteError),

    #[error("invalid {collection} key '{key}': {reason}")]
    InvalidKey {
        collection: Collection,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("destructive action was not confirmed")]
    NotConfirmed,
}

impl SyncError {
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Offline(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unreachable(reason) => SyncError::Offline(reason),
            other => SyncError::Remote(other),
        }
    }
}

/// Both collections as fetched by one pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult {
    pub assets: Vec<Asset>,
    pub vehicles: Vec<Vehicle>,
    /// Taken when the pull started, so rows written during the fetch are seen next time.
    pub fetched_at: SyncTimestamp,
}

/// Thin typed layer over a [`RemoteStore`].
pub struct RemoteSyncClient<R: RemoteStore, C: Clock> {
    remote: Arc<R>,
    clock: Arc<C>,
}

impl<R: RemoteStore, C: Clock> RemoteSyncClient<R, C> {
    pub fn new(remote: Arc<R>, clock: Arc<C>) -> Self {
        Self { remote, clock }
    }

    /// Fetches both collections concurrently. With `since`, only rows updated after it.
    pub async fn pull(&self, since: Option<SyncTimestamp>) -> Result<PullResult, SyncError> {
        let fetched_at = SyncTimestamp(self.clock.now());
        let (asset_rows, vehicle_rows) = tokio::try_join!(
            self.remote.select(Collection::Assets, since),
            self.remote.select(Collection::Vehicles, since),
        )?;

        let assets = decode_rows::<Asset>(asset_rows);
        let vehicles = decode_rows::<Vehicle>(vehicle_rows);
        debug!(
            assets = assets.len(),
            vehicles = vehicles.len(),
            incremental = since.is_some(),
            "pulled remote rows"
        );

        Ok(PullResult {
            assets,
            vehicles,
            fetched_at,
        })
    }

    /// Upserts `records`, each stamped with the push time. Returns the stamped copies.
    pub async fn push<T: RemoteRecord>(&self, records: &[T]) -> Result<Vec<T>, SyncError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let stamped: Vec<T> = records
            .iter()
            .cloned()
            .map(|mut record| {
                record.set_updated_at(Some(now));
                record
            })
            .collect();
        let rows = stamped
            .iter()
            .map(RemoteRecord::to_row)
            .collect::<Result<Vec<_>, _>>()?;

        self.remote.upsert(T::COLLECTION, rows).await?;
        debug!(collection = %T::COLLECTION, count = stamped.len(), "pushed records");
        Ok(stamped)
    }

    pub async fn push_assets(&self, assets: &[Asset]) -> Result<Vec<Asset>, SyncError> {
        self.push(assets).await
    }

    pub async fn push_vehicles(&self, vehicles: &[Vehicle]) -> Result<Vec<Vehicle>, SyncError> {
        self.push(vehicles).await
    }

    /// Deletes one record by its key string (`fiscal_code|patrimony` for assets, plate for vehicles).
    pub async fn delete_from_remote(&self, collection: Collection, key: &str) -> Result<(), SyncError> {
        let filter = match collection {
            Collection::Assets => Asset::key_filter(&parse_key::<Asset>(key)?),
            Collection::Vehicles => Vehicle::key_filter(&parse_key::<Vehicle>(key)?),
        };
        self.remote.delete(collection, filter).await?;
        info!(%collection, key, "deleted remote record");
        Ok(())
    }

    pub async fn clear_remote_storage(&self, collection: Collection) -> Result<(), SyncError> {
        self.remote.delete_all(collection).await?;
        info!(%collection, "cleared remote collection");
        Ok(())
    }
}

fn parse_key<T: RemoteRecord>(raw: &str) -> Result<T::Key, SyncError> {
    T::parse_key(raw).map_err(|e| SyncError::InvalidKey {
        collection: T::COLLECTION,
        key: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Rows that do not decode are skipped; one bad row must not block the rest.
fn decode_rows<T: RemoteRecord>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match T::from_row(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection = %T::COLLECTION, error = %e, "skipping undecodable remote row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetKey, FixedClock, Record};
    use crate::remote::MemoryRemote;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn client() -> (Arc<MemoryRemote>, Arc<FixedClock>, RemoteSyncClient<MemoryRemote, FixedClock>) {
        let remote = Arc::new(MemoryRemote::new());
        let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let client = RemoteSyncClient::new(remote.clone(), clock.clone());
        (remote, clock, client)
    }

    #[tokio::test]
    async fn push_stamps_and_pull_filters_by_time() {
        let (_remote, clock, client) = client();
        let first = clock.now();
        client
            .push_assets(&[Asset::new("A1", "1", "Cabo")])
            .await
            .unwrap();

        clock.advance(Duration::seconds(10));
        client
            .push_vehicles(&[Vehicle::new("ABC1D23", "Van", "", "")])
            .await
            .unwrap();

        let full = client.pull(None).await.unwrap();
        assert_eq!(full.assets.len(), 1);
        assert_eq!(full.assets[0].updated_at(), Some(first));
        assert_eq!(full.vehicles.len(), 1);

        let incremental = client.pull(Some(SyncTimestamp(first))).await.unwrap();
        assert!(incremental.assets.is_empty());
        assert_eq!(incremental.vehicles.len(), 1);
    }

    #[tokio::test]
    async fn offline_is_distinguishable() {
        let (remote, _clock, client) = client();
        remote.set_offline(true);

        let err = client.pull(None).await.unwrap_err();
        assert!(err.is_offline());
        assert_matches!(
            client.push_assets(&[Asset::new("A1", "", "x")]).await,
            Err(SyncError::Offline(_))
        );
    }

    #[tokio::test]
    async fn empty_push_is_a_no_op_even_offline() {
        let (remote, _clock, client) = client();
        remote.set_offline(true);
        assert!(client.push_vehicles(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_separator_for_assets() {
        let (remote, _clock, client) = client();
        remote.seed(&[Asset::new("A1", "7", "Cabo")]).unwrap();

        assert_matches!(
            client.delete_from_remote(Collection::Assets, "A1-0007").await,
            Err(SyncError::InvalidKey { collection: Collection::Assets, .. })
        );

        let key = AssetKey::new("A1", "7").to_string();
        client
            .delete_from_remote(Collection::Assets, &key)
            .await
            .unwrap();
        assert!(remote.records::<Asset>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_only_that_collection() {
        let (remote, _clock, client) = client();
        remote.seed(&Asset::defaults()).unwrap();
        remote.seed(&Vehicle::defaults()).unwrap();

        client.clear_remote_storage(Collection::Vehicles).await.unwrap();

        assert!(remote.records::<Vehicle>().unwrap().is_empty());
        assert_eq!(remote.records::<Asset>().unwrap().len(), Asset::defaults().len());
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped() {
        let (remote, _clock, client) = client();
        remote
            .upsert(
                Collection::Vehicles,
                vec![
                    serde_json::json!({ "plate": "AAA1111", "model": "Truck" }),
                    serde_json::json!({ "model": "no plate" }),
                ],
            )
            .await
            .unwrap();

        let pulled = client.pull(None).await.unwrap();
        assert_eq!(pulled.vehicles.len(), 1);
        assert_eq!(pulled.vehicles[0].plate, "AAA1111");
    }
}
