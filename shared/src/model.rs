use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    ASSETS_STORAGE_KEY, KEY_SEPARATOR, PATRIMONY_PLACEHOLDER, PATRIMONY_WIDTH,
    VEHICLES_STORAGE_KEY,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid asset key '{key}': {reason}")]
    InvalidAssetKey { key: String, reason: &'static str },
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
}

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self::from(Utc::now())
    }
}

impl From<DateTime<Utc>> for UnixTimeMs {
    fn from(at: DateTime<Utc>) -> Self {
        Self(u64::try_from(at.timestamp_millis()).unwrap_or(0))
    }
}

/// Moment of the last pull that was fully applied to the local cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncTimestamp(pub DateTime<Utc>);

impl SyncTimestamp {
    #[must_use]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// RFC 3339 with millisecond precision, as used in remote filters.
    #[must_use]
    pub fn to_filter_value(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant. Used by shells that replay events and by tests.
#[derive(Debug)]
pub struct FixedClock {
    at: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at: Mutex::new(at) }
    }

    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        Self::new(Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.at.lock() {
            *guard = at;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.at.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at.lock().map(|g| *g).unwrap_or_default()
    }
}

// ============================================================================
// Reference data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Assets,
    Vehicles,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Assets, Collection::Vehicles];

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::Vehicles => "vehicles",
        }
    }

    /// Natural-key columns used as the upsert conflict target.
    #[must_use]
    pub const fn key_columns(self) -> &'static [&'static str] {
        match self {
            Self::Assets => &["fiscal_code", "patrimony"],
            Self::Vehicles => &["plate"],
        }
    }

    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Assets => ASSETS_STORAGE_KEY,
            Self::Vehicles => VEHICLES_STORAGE_KEY,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A record of one of the two reference collections, keyed by its natural key.
pub trait Record: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync {
    type Key: Clone + fmt::Debug + fmt::Display + Eq + Hash + Send + Sync;

    const COLLECTION: Collection;

    fn key(&self) -> Self::Key;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    fn set_updated_at(&mut self, at: Option<DateTime<Utc>>);
    fn defaults() -> Vec<Self>;
}

/// Trims and left-pads a patrimony number to the fixed width; blank becomes the placeholder.
#[must_use]
pub fn normalize_patrimony(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == PATRIMONY_PLACEHOLDER {
        return PATRIMONY_PLACEHOLDER.to_string();
    }
    format!("{trimmed:0>width$}", width = PATRIMONY_WIDTH)
}

fn deserialize_patrimony<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    String::deserialize(deserializer).map(|raw| normalize_patrimony(&raw))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey {
    fiscal_code: String,
    patrimony: String,
}

impl AssetKey {
    #[must_use]
    pub fn new(fiscal_code: impl AsRef<str>, patrimony: impl AsRef<str>) -> Self {
        Self {
            fiscal_code: fiscal_code.as_ref().trim().to_string(),
            patrimony: normalize_patrimony(patrimony.as_ref()),
        }
    }

    #[must_use]
    pub fn fiscal_code(&self) -> &str {
        &self.fiscal_code
    }

    #[must_use]
    pub fn patrimony(&self) -> &str {
        &self.patrimony
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.fiscal_code, self.patrimony)
    }
}

impl FromStr for AssetKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fiscal_code, patrimony) =
            s.split_once(KEY_SEPARATOR)
                .ok_or_else(|| ModelError::InvalidAssetKey {
                    key: s.to_string(),
                    reason: "missing separator",
                })?;
        if fiscal_code.trim().is_empty() {
            return Err(ModelError::InvalidAssetKey {
                key: s.to_string(),
                reason: "empty fiscal code",
            });
        }
        Ok(Self::new(fiscal_code, patrimony))
    }
}

impl TryFrom<String> for AssetKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub fiscal_code: String,
    #[serde(deserialize_with = "deserialize_patrimony")]
    pub patrimony: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Asset {
    #[must_use]
    pub fn new(
        fiscal_code: impl AsRef<str>,
        patrimony: impl AsRef<str>,
        description: impl AsRef<str>,
    ) -> Self {
        Self {
            fiscal_code: fiscal_code.as_ref().trim().to_string(),
            patrimony: normalize_patrimony(patrimony.as_ref()),
            description: description.as_ref().trim().to_string(),
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

impl Record for Asset {
    type Key = AssetKey;

    const COLLECTION: Collection = Collection::Assets;

    fn key(&self) -> AssetKey {
        AssetKey::new(&self.fiscal_code, &self.patrimony)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Option<DateTime<Utc>>) {
        self.updated_at = at;
    }

    fn defaults() -> Vec<Self> {
        vec![
            Asset::new("IMO-40TDM", "", "APARELHO DIGITAL OPENSTAGE 40 TDM"),
            Asset::new("IMOOPENSTAGE15T", "", "APARELHO OPENSTAGE 15 TDM"),
            Asset::new(
                "IMOB-GWH18QD",
                "",
                "AR CONDICIONADO 18.000 BTUS 220V INVERTER QUENTE/FRIO GREE",
            ),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub plate: String,
    pub model: String,
    pub unit: String,
    pub sector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Vehicle {
    #[must_use]
    pub fn new(
        plate: impl AsRef<str>,
        model: impl AsRef<str>,
        unit: impl AsRef<str>,
        sector: impl AsRef<str>,
    ) -> Self {
        Self {
            plate: plate.as_ref().trim().to_string(),
            model: model.as_ref().trim().to_string(),
            unit: or_placeholder(unit.as_ref()),
            sector: or_placeholder(sector.as_ref()),
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

impl Record for Vehicle {
    type Key = String;

    const COLLECTION: Collection = Collection::Vehicles;

    fn key(&self) -> String {
        self.plate.clone()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Option<DateTime<Utc>>) {
        self.updated_at = at;
    }

    fn defaults() -> Vec<Self> {
        vec![
            Vehicle::new("ABC-1234", "VW Saveiro", "Obras", "Logística"),
            Vehicle::new("XYZ-5678", "Fiat Strada", "Manutenção", "Campo"),
        ]
    }
}

fn or_placeholder(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        PATRIMONY_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// The vehicle chosen on a trip request: a registered plate or a one-off vehicle typed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleRef {
    Known(String),
    #[serde(rename_all = "camelCase")]
    Custom {
        plate: String,
        model: String,
        unit: String,
        sector: String,
    },
}

impl VehicleRef {
    #[must_use]
    pub fn custom_empty() -> Self {
        Self::Custom {
            plate: String::new(),
            model: String::new(),
            unit: String::new(),
            sector: String::new(),
        }
    }

    #[must_use]
    pub fn plate(&self) -> &str {
        match self {
            Self::Known(plate) | Self::Custom { plate, .. } => plate,
        }
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

// ============================================================================
// Trip requests
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(Uuid);

impl LineId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedAssetLine {
    pub id: LineId,
    pub asset: Option<AssetKey>,
    pub quantity: u32,
}

impl SelectedAssetLine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: LineId::generate(),
            asset: None,
            quantity: 1,
        }
    }

    #[must_use]
    pub fn with_asset(mut self, key: AssetKey, quantity: u32) -> Self {
        self.asset = Some(key);
        self.quantity = quantity.max(1);
        self
    }

    /// Copy with a fresh identifier, for loading a stored request back into the form.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: LineId::generate(),
            ..self.clone()
        }
    }
}

impl Default for SelectedAssetLine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripRequest {
    pub work_name: String,
    pub structure_id: String,
    pub destination_city: String,
    pub driver_name: String,
    pub vehicle: Option<VehicleRef>,
    /// `YYYY-MM-DD`
    pub exit_date: String,
    /// `HH:MM`
    pub exit_time: String,
    pub return_date: String,
    pub return_time: String,
    pub total_weight: String,
    pub volume: String,
    pub has_materials: bool,
    pub observations: String,
    pub lines: Vec<SelectedAssetLine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(Uuid);

impl HistoryId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| ModelError::InvalidId(raw.to_string()))
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub created_at: UnixTimeMs,
    pub request: TripRequest,
    #[serde(default)]
    pub is_draft: bool,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(request: TripRequest, is_draft: bool, created_at: UnixTimeMs) -> Self {
        Self {
            id: HistoryId::generate(),
            created_at,
            request,
            is_draft,
        }
    }
}
