//! Remote datastore seam.
//!
//! The remote side is a PostgREST-style table API (`/rest/v1/{table}`) with
//! snake_case rows. [`RestRemote`] speaks it over an [`HttpTransport`];
//! [`MemoryRemote`] emulates the same semantics in-process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::capabilities::http::{
    HttpError, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl,
};
use crate::config::RemoteConfig;
use crate::model::{Asset, AssetKey, Collection, Record, SyncTimestamp, Vehicle};
use crate::PATRIMONY_PLACEHOLDER;

/// Key columns and the spellings each one accepts; a row matches when every column does.
pub type KeyFilter = Vec<(&'static str, Vec<String>)>;

/// Characters of a failed response body kept in the error.
const ERROR_BODY_LIMIT: usize = 200;

const CLEAR_ALL_FILTER: &str = "(updated_at.is.null,updated_at.neq.1970-01-01T00:00:00Z)";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected remote payload: {0}")]
    Decode(String),

    #[error("could not build remote request: {0}")]
    Request(String),
}

impl RemoteError {
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Unreachable(_) => true,
            RemoteError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

impl From<HttpError> for RemoteError {
    fn from(e: HttpError) -> Self {
        if e.is_unreachable() {
            return RemoteError::Unreachable(e.to_string());
        }
        match e {
            HttpError::InvalidResponse { reason, .. } => RemoteError::Decode(reason),
            other => RemoteError::Request(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All rows of `collection`, or only those with `updated_at` strictly after `updated_after`.
    async fn select(
        &self,
        collection: Collection,
        updated_after: Option<SyncTimestamp>,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Inserts or replaces rows, matching on the collection's key columns.
    async fn upsert(&self, collection: Collection, rows: Vec<Value>) -> Result<(), RemoteError>;

    async fn delete(&self, collection: Collection, filter: KeyFilter) -> Result<(), RemoteError>;

    async fn delete_all(&self, collection: Collection) -> Result<(), RemoteError>;
}

// ============================================================================
// Row mapping
// ============================================================================

/// A [`Record`] with a remote row representation.
pub trait RemoteRecord: Record + 'static {
    fn to_row(&self) -> Result<Value, RemoteError>;
    fn from_row(row: Value) -> Result<Self, RemoteError>;
    fn key_filter(key: &Self::Key) -> KeyFilter;
    fn parse_key(raw: &str) -> Result<Self::Key, RemoteError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AssetRow {
    fiscal_code: String,
    #[serde(default)]
    patrimony: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VehicleRow {
    plate: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

fn encode_row<T: Serialize>(row: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(row).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn decode_row<T: serde::de::DeserializeOwned>(row: Value) -> Result<T, RemoteError> {
    serde_json::from_value(row).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Every stored form that normalizes to `canonical`: rows written by other
/// clients may carry the number without its zero padding, or a blank placeholder.
fn patrimony_spellings(canonical: &str) -> Vec<String> {
    if canonical == PATRIMONY_PLACEHOLDER {
        return vec![canonical.to_string(), String::new()];
    }
    let mut spellings = vec![canonical.to_string()];
    let mut rest = canonical;
    while rest.len() > 1 {
        let Some(stripped) = rest.strip_prefix('0') else {
            break;
        };
        spellings.push(stripped.to_string());
        rest = stripped;
    }
    spellings
}

impl RemoteRecord for Asset {
    fn to_row(&self) -> Result<Value, RemoteError> {
        encode_row(&AssetRow {
            fiscal_code: self.fiscal_code.clone(),
            patrimony: Some(self.patrimony.clone()),
            description: Some(self.description.clone()),
            updated_at: self.updated_at,
        })
    }

    fn from_row(row: Value) -> Result<Self, RemoteError> {
        let row: AssetRow = decode_row(row)?;
        let mut asset = Asset::new(
            row.fiscal_code,
            row.patrimony.unwrap_or_default(),
            row.description.unwrap_or_default(),
        );
        asset.updated_at = row.updated_at;
        Ok(asset)
    }

    fn key_filter(key: &AssetKey) -> KeyFilter {
        vec![
            ("fiscal_code", vec![key.fiscal_code().to_string()]),
            ("patrimony", patrimony_spellings(key.patrimony())),
        ]
    }

    fn parse_key(raw: &str) -> Result<AssetKey, RemoteError> {
        raw.parse()
            .map_err(|e: crate::model::ModelError| RemoteError::Request(e.to_string()))
    }
}

impl RemoteRecord for Vehicle {
    fn to_row(&self) -> Result<Value, RemoteError> {
        encode_row(&VehicleRow {
            plate: self.plate.clone(),
            model: Some(self.model.clone()),
            unit: Some(self.unit.clone()),
            sector: Some(self.sector.clone()),
            updated_at: self.updated_at,
        })
    }

    fn from_row(row: Value) -> Result<Self, RemoteError> {
        let row: VehicleRow = decode_row(row)?;
        let mut vehicle = Vehicle::new(
            row.plate,
            row.model.unwrap_or_default(),
            row.unit.unwrap_or_default(),
            row.sector.unwrap_or_default(),
        );
        vehicle.updated_at = row.updated_at;
        Ok(vehicle)
    }

    fn key_filter(plate: &String) -> KeyFilter {
        vec![("plate", vec![plate.clone()])]
    }

    fn parse_key(raw: &str) -> Result<String, RemoteError> {
        let plate = raw.trim();
        if plate.is_empty() {
            return Err(RemoteError::Request("plate cannot be empty".to_string()));
        }
        Ok(plate.to_string())
    }
}

// ============================================================================
// REST implementation
// ============================================================================

pub struct RestRemote<T: HttpTransport> {
    transport: Arc<T>,
    base: Url,
    api_key: String,
    timeout_ms: u64,
}

impl<T: HttpTransport> RestRemote<T> {
    pub fn new(config: &RemoteConfig, transport: Arc<T>) -> Result<Self, RemoteError> {
        let validated = ValidatedUrl::new(config.base_url.clone())?;
        let base = Url::parse(validated.as_str()).map_err(|e| RemoteError::Request(e.to_string()))?;
        Ok(Self {
            transport,
            base,
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn table_url(&self, collection: Collection) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::Request("base URL cannot carry a path".to_string()))?;
            segments
                .pop_if_empty()
                .push("rest")
                .push("v1")
                .push(collection.table());
        }
        Ok(url)
    }

    fn request(&self, method: HttpMethod, url: &Url) -> Result<HttpRequest, RemoteError> {
        let request = HttpRequest::new(method, ValidatedUrl::from_url(url)?)
            .with_header("apikey", self.api_key.as_str())?
            .with_header("Authorization", format!("Bearer {}", self.api_key))?
            .with_timeout_ms(self.timeout_ms)?;
        Ok(request)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RemoteError> {
        debug!(
            method = request.method().as_str(),
            url = request.url().as_str(),
            request_id = request.request_id(),
            "remote request"
        );
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let message: String = response.text().chars().take(ERROR_BODY_LIMIT).collect();
            return Err(RemoteError::Status {
                status: response.status(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl<T: HttpTransport> RemoteStore for RestRemote<T> {
    async fn select(
        &self,
        collection: Collection,
        updated_after: Option<SyncTimestamp>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut url = self.table_url(collection)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            if let Some(since) = updated_after {
                query.append_pair("updated_at", &format!("gt.{}", since.to_filter_value()));
            }
        }
        let response = self.send(self.request(HttpMethod::Get, &url)?).await?;
        Ok(response.json::<Vec<Value>>()?)
    }

    async fn upsert(&self, collection: Collection, rows: Vec<Value>) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut url = self.table_url(collection)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", &collection.key_columns().join(","));
        let request = self
            .request(HttpMethod::Post, &url)?
            .with_header("Prefer", "resolution=merge-duplicates,return=minimal")?
            .with_json(&rows)?;
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, filter: KeyFilter) -> Result<(), RemoteError> {
        if filter.is_empty() {
            return Err(RemoteError::Request(
                "refusing to delete without a key filter".to_string(),
            ));
        }
        let mut url = self.table_url(collection)?;
        {
            let mut query = url.query_pairs_mut();
            for (column, accepted) in &filter {
                query.append_pair(column, &match accepted.as_slice() {
                    [only] => format!("eq.{only}"),
                    many => format!(
                        "in.({})",
                        many.iter()
                            .map(|v| format!("\"{v}\""))
                            .collect::<Vec<_>>()
                            .join(",")
                    ),
                });
            }
        }
        self.send(self.request(HttpMethod::Delete, &url)?).await?;
        Ok(())
    }

    async fn delete_all(&self, collection: Collection) -> Result<(), RemoteError> {
        let mut url = self.table_url(collection)?;
        url.query_pairs_mut().append_pair("or", CLEAR_ALL_FILTER);
        self.send(self.request(HttpMethod::Delete, &url)?).await?;
        Ok(())
    }
}

// ============================================================================
// In-process implementation
// ============================================================================

/// Table-per-collection store with the same filter and upsert semantics as the REST API.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<Collection, Vec<Value>>>,
    offline: AtomicBool,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`RemoteError::Unreachable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn seed<R: RemoteRecord>(&self, records: &[R]) -> Result<(), RemoteError> {
        let rows = records
            .iter()
            .map(RemoteRecord::to_row)
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables()?;
        let table = tables.entry(R::COLLECTION).or_default();
        for row in rows {
            upsert_row(table, R::COLLECTION, row);
        }
        Ok(())
    }

    pub fn records<R: RemoteRecord>(&self) -> Result<Vec<R>, RemoteError> {
        let rows = self
            .tables()?
            .get(&R::COLLECTION)
            .cloned()
            .unwrap_or_default();
        rows.into_iter().map(R::from_row).collect()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Collection, Vec<Value>>>, RemoteError> {
        self.tables
            .lock()
            .map_err(|_| RemoteError::Request("memory remote poisoned".to_string()))
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("network is offline".to_string()));
        }
        Ok(())
    }
}

fn row_updated_at(row: &Value) -> Option<DateTime<Utc>> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn same_key(collection: Collection, a: &Value, b: &Value) -> bool {
    collection
        .key_columns()
        .iter()
        .all(|column| a.get(column) == b.get(column))
}

fn upsert_row(table: &mut Vec<Value>, collection: Collection, row: Value) {
    match table.iter_mut().find(|existing| same_key(collection, existing, &row)) {
        Some(existing) => *existing = row,
        None => table.push(row),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(
        &self,
        collection: Collection,
        updated_after: Option<SyncTimestamp>,
    ) -> Result<Vec<Value>, RemoteError> {
        self.ensure_online()?;
        let tables = self.tables()?;
        let rows = tables.get(&collection).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|row| match updated_after {
                Some(since) => row_updated_at(row).is_some_and(|at| at > since.as_datetime()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, collection: Collection, rows: Vec<Value>) -> Result<(), RemoteError> {
        self.ensure_online()?;
        let mut tables = self.tables()?;
        let table = tables.entry(collection).or_default();
        for row in rows {
            upsert_row(table, collection, row);
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, filter: KeyFilter) -> Result<(), RemoteError> {
        self.ensure_online()?;
        if filter.is_empty() {
            return Err(RemoteError::Request(
                "refusing to delete without a key filter".to_string(),
            ));
        }
        let mut tables = self.tables()?;
        if let Some(table) = tables.get_mut(&collection) {
            table.retain(|row| {
                !filter.iter().all(|(column, accepted)| {
                    row.get(*column)
                        .and_then(Value::as_str)
                        .is_some_and(|cell| accepted.iter().any(|v| v == cell))
                })
            });
        }
        Ok(())
    }

    async fn delete_all(&self, collection: Collection) -> Result<(), RemoteError> {
        self.ensure_online()?;
        self.tables()?.remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::http::{HttpResponse, HttpResult};
    use chrono::TimeZone;

    struct RecordingTransport {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: String,
    }

    impl RecordingTransport {
        fn replying(status: u16, body: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                status,
                body: body.into(),
            })
        }

        fn last(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn execute(&self, request: HttpRequest) -> HttpResult {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse::new(self.status, self.body.as_bytes().to_vec()))
        }
    }

    struct DownTransport;

    #[async_trait]
    impl HttpTransport for DownTransport {
        async fn execute(&self, request: HttpRequest) -> HttpResult {
            Err(HttpError::ConnectionError {
                host: request.url().host().to_string(),
                message: "connection refused".into(),
            })
        }
    }

    fn config() -> RemoteConfig {
        RemoteConfig {
            base_url: "https://demo.supabase.co".into(),
            api_key: "anon-key".into(),
            timeout_ms: 5_000,
        }
    }

    fn ts(ms: i64) -> SyncTimestamp {
        SyncTimestamp(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[tokio::test]
    async fn rest_select_builds_incremental_query() {
        let transport = RecordingTransport::replying(200, r#"[{"fiscal_code":"A1","patrimony":"0001","description":"Cabo","id":9}]"#);
        let remote = RestRemote::new(&config(), transport.clone()).unwrap();

        let rows = remote
            .select(Collection::Assets, Some(ts(1_700_000_000_000)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let asset = Asset::from_row(rows[0].clone()).unwrap();
        assert_eq!(asset.fiscal_code, "A1");

        let request = transport.last();
        assert_eq!(request.method(), HttpMethod::Get);
        let url = Url::parse(request.url().as_str()).unwrap();
        assert_eq!(url.path(), "/rest/v1/assets");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("select".into(), "*".into())));
        assert!(pairs.contains(&("updated_at".into(), "gt.2023-11-14T22:13:20.000Z".into())));
        assert_eq!(request.headers().get("apikey"), Some("anon-key"));
        assert_eq!(request.headers().get("authorization"), Some("Bearer anon-key"));
    }

    #[tokio::test]
    async fn rest_upsert_targets_natural_key() {
        let transport = RecordingTransport::replying(201, "");
        let remote = RestRemote::new(&config(), transport.clone()).unwrap();

        let row = Vehicle::new("ABC-1234", "Saveiro", "Obras", "Campo").to_row().unwrap();
        remote.upsert(Collection::Vehicles, vec![row]).await.unwrap();

        let request = transport.last();
        assert_eq!(request.method(), HttpMethod::Post);
        let url = Url::parse(request.url().as_str()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("on_conflict".to_string(), "plate".to_string())]);
        assert!(request
            .headers()
            .get("prefer")
            .unwrap()
            .contains("merge-duplicates"));
        let body: Vec<Value> = serde_json::from_slice(request.body().unwrap()).unwrap();
        assert_eq!(body[0]["plate"], "ABC-1234");
    }

    #[tokio::test]
    async fn rest_upsert_of_nothing_sends_nothing() {
        let transport = RecordingTransport::replying(201, "");
        let remote = RestRemote::new(&config(), transport.clone()).unwrap();
        remote.upsert(Collection::Assets, Vec::new()).await.unwrap();
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rest_delete_uses_equality_filters() {
        let transport = RecordingTransport::replying(204, "");
        let remote = RestRemote::new(&config(), transport.clone()).unwrap();

        let key = AssetKey::new("IMO-40TDM", "12");
        remote
            .delete(Collection::Assets, Asset::key_filter(&key))
            .await
            .unwrap();

        let url = Url::parse(transport.last().url().as_str()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("fiscal_code".to_string(), "eq.IMO-40TDM".to_string()),
                (
                    "patrimony".to_string(),
                    r#"in.("0012","012","12")"#.to_string()
                ),
            ]
        );

        remote
            .delete(Collection::Vehicles, Vehicle::key_filter(&"ABC-1234".to_string()))
            .await
            .unwrap();
        let url = Url::parse(transport.last().url().as_str()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("plate".to_string(), "eq.ABC-1234".to_string())]);
    }

    #[test]
    fn patrimony_filter_accepts_unpadded_spellings() {
        assert_eq!(patrimony_spellings("0007"), vec!["0007", "007", "07", "7"]);
        assert_eq!(patrimony_spellings("1200"), vec!["1200"]);
        assert_eq!(patrimony_spellings("0000"), vec!["0000", "000", "00", "0"]);
        assert_eq!(patrimony_spellings("-"), vec!["-", ""]);
    }

    #[tokio::test]
    async fn memory_delete_finds_rows_stored_without_padding() {
        let remote = MemoryRemote::new();
        let raw = serde_json::json!({"fiscal_code": "A1", "patrimony": "7", "description": "x"});
        remote.upsert(Collection::Assets, vec![raw]).await.unwrap();

        let stored: Vec<Asset> = remote.records().unwrap();
        remote
            .delete(Collection::Assets, Asset::key_filter(&stored[0].key()))
            .await
            .unwrap();
        assert!(remote.records::<Asset>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rest_status_error_is_reported() {
        let transport = RecordingTransport::replying(409, r#"{"message":"conflict"}"#);
        let remote = RestRemote::new(&config(), transport).unwrap();
        let result = remote.delete_all(Collection::Vehicles).await;
        assert!(matches!(result, Err(RemoteError::Status { status: 409, .. })));
    }

    #[tokio::test]
    async fn rest_error_body_is_cut_on_a_char_boundary() {
        let body = format!("{}ã resto da mensagem", "a".repeat(199));
        let transport = RecordingTransport::replying(400, body);
        let remote = RestRemote::new(&config(), transport).unwrap();

        let message = assert_matches::assert_matches!(
            remote.delete_all(Collection::Vehicles).await,
            Err(RemoteError::Status { status: 400, message }) => message
        );
        assert_eq!(message.chars().count(), ERROR_BODY_LIMIT);
        assert!(message.ends_with("aã"));
    }

    #[tokio::test]
    async fn rest_connection_failure_is_unreachable() {
        let remote = RestRemote::new(&config(), Arc::new(DownTransport)).unwrap();
        let result = remote.select(Collection::Assets, None).await;
        assert!(result.unwrap_err().is_unreachable());
    }

    #[test]
    fn rest_rejects_bad_base_url() {
        let mut bad = config();
        bad.base_url = "ftp://demo".into();
        assert!(RestRemote::new(&bad, Arc::new(DownTransport)).is_err());
    }

    #[tokio::test]
    async fn memory_select_filters_by_updated_at() {
        let remote = MemoryRemote::new();
        let old = Utc.timestamp_millis_opt(1_000).unwrap();
        let new = Utc.timestamp_millis_opt(5_000).unwrap();
        remote
            .seed(&[
                Asset::new("A1", "1", "old").with_updated_at(old),
                Asset::new("A2", "1", "new").with_updated_at(new),
                Asset::new("A3", "1", "unstamped"),
            ])
            .unwrap();

        assert_eq!(remote.select(Collection::Assets, None).await.unwrap().len(), 3);
        let recent = remote.select(Collection::Assets, Some(ts(1_000))).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["fiscal_code"], "A2");
    }

    #[tokio::test]
    async fn memory_upsert_replaces_by_composite_key() {
        let remote = MemoryRemote::new();
        remote.seed(&[Asset::new("A1", "1", "first")]).unwrap();
        let row = Asset::new("A1", "0001", "second").to_row().unwrap();
        remote.upsert(Collection::Assets, vec![row]).await.unwrap();

        let assets: Vec<Asset> = remote.records().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].description, "second");
    }

    #[tokio::test]
    async fn memory_delete_matches_all_columns() {
        let remote = MemoryRemote::new();
        remote
            .seed(&[Asset::new("A1", "1", "x"), Asset::new("A1", "2", "y")])
            .unwrap();
        remote
            .delete(Collection::Assets, Asset::key_filter(&AssetKey::new("A1", "2")))
            .await
            .unwrap();
        let assets: Vec<Asset> = remote.records().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].patrimony, "0001");
    }

    #[tokio::test]
    async fn memory_offline_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert!(remote.select(Collection::Vehicles, None).await.unwrap_err().is_unreachable());
        assert!(remote.delete_all(Collection::Vehicles).await.is_err());
        remote.set_offline(false);
        assert!(remote.delete_all(Collection::Vehicles).await.is_ok());
    }

    #[test]
    fn vehicle_row_tolerates_null_columns() {
        let row = serde_json::json!({"plate": "ABC-1234", "model": null, "unit": null, "sector": "Campo"});
        let vehicle = Vehicle::from_row(row).unwrap();
        assert_eq!(vehicle.model, "");
        assert_eq!(vehicle.unit, "-");
        assert_eq!(vehicle.sector, "Campo");
    }

    #[test]
    fn asset_key_parse_requires_separator() {
        assert!(Asset::parse_key("A1|0001").is_ok());
        assert!(matches!(Asset::parse_key("A1"), Err(RemoteError::Request(_))));
        assert!(Vehicle::parse_key("  ").is_err());
    }
}
