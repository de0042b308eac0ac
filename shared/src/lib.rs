// lib.rs - trip-request desk core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod form;
pub mod history;
pub mod import;
pub mod model;
pub mod reference_store;
pub mod remote;
pub mod select;
pub mod sync;
pub mod telemetry;
pub mod text;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{HttpError, KvError};
use crate::config::ConfigError;
use crate::model::ModelError;
use crate::reference_store::StoreError;
use crate::remote::RemoteError;
use crate::sync::SyncError;

pub use config::AppConfig;
pub use form::{TripFormEngine, ValidationErrors, ValidationPolicy};
pub use history::HistoryLog;
pub use import::{ImportError, ImportReport};
pub use model::{Asset, AssetKey, Collection, HistoryEntry, TripRequest, Vehicle, VehicleRef};
pub use reference_store::ReferenceStore;
pub use select::{SearchableSelect, SelectOutcome};
pub use sync::{RemoteSyncClient, SyncCoordinator, WriteOutcome};

pub const ASSETS_STORAGE_KEY: &str = "transport_app_assets";
pub const VEHICLES_STORAGE_KEY: &str = "transport_app_vehicles";
pub const HISTORY_STORAGE_KEY: &str = "transport_app_history";
pub const LAST_SYNC_STORAGE_KEY: &str = "transport_app_last_sync";
pub const DIRTY_STORAGE_KEY: &str = "transport_app_dirty";
pub const PENDING_DELETES_STORAGE_KEY: &str = "transport_app_pending_deletes";
pub const KEY_SEPARATOR: char = '|';
pub const PATRIMONY_PLACEHOLDER: &str = "-";
pub const PATRIMONY_WIDTH: usize = 4;
pub const HISTORY_CAPACITY: usize = 50;
pub const CUSTOM_VEHICLE_SENTINEL: &str = "OUTRO";
pub const UNKNOWN_ASSET_PLACEHOLDER: &str = "Item desconhecido";
pub const DEFAULT_DISPATCH_PHONE: &str = "554991109940";
pub const DEFAULT_DISPATCH_BASE_URL: &str = "https://wa.me/";
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 15_000;

/// Explicit answer to a destructive-action prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl Confirmation {
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Offline,
    Timeout,
    Remote,
    Validation,
    NotFound,
    Conflict,
    Storage,
    Serialization,
    DataIntegrity,
    ConfirmationRequired,
    Configuration,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Timeout => "TIMEOUT",
            Self::Remote => "REMOTE_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::DataIntegrity => "DATA_INTEGRITY",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::Configuration => "CONFIG_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Offline | Self::Timeout | Self::Remote | Self::Storage | Self::Conflict => {
                ErrorSeverity::Transient
            }

            Self::Configuration | Self::InvalidState | Self::Internal => ErrorSeverity::Fatal,

            Self::Validation
            | Self::NotFound
            | Self::Serialization
            | Self::DataIntegrity
            | Self::ConfirmationRequired => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Offline | Self::Timeout | Self::Remote | Self::Storage
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    /// Text shown to the clerk.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Offline => {
                "Sem conexão com o servidor. As alterações foram salvas apenas neste dispositivo."
                    .into()
            }
            ErrorKind::Timeout => "O servidor demorou a responder. Tente novamente.".into(),
            ErrorKind::Remote => {
                "Não foi possível sincronizar com o servidor. Tente novamente.".into()
            }
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::NotFound => {
                self.message.clone()
            }
            ErrorKind::Storage => {
                "Não foi possível salvar os dados neste dispositivo.".into()
            }
            ErrorKind::Serialization | ErrorKind::DataIntegrity => {
                "Os dados salvos estão corrompidos ou incompletos.".into()
            }
            ErrorKind::ConfirmationRequired => "Ação cancelada.".into(),
            ErrorKind::Configuration => {
                "Configuração inválida. Contate o suporte.".into()
            }
            ErrorKind::InvalidState | ErrorKind::Internal => {
                "Ocorreu um erro inesperado. Tente novamente.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        match &e {
            KvError::Serialization { key, .. } => {
                let err = AppError::new(ErrorKind::Serialization, "Stored data is unreadable")
                    .with_internal(e.to_string());
                match key {
                    Some(key) => err.with_context("key", key.clone()),
                    None => err,
                }
            }
            KvError::InvalidKey { .. } => {
                AppError::new(ErrorKind::Internal, "Invalid storage key").with_internal(e.to_string())
            }
            KvError::ValueTooLarge { .. } | KvError::Storage { .. } => {
                let severity = if e.is_retryable() {
                    ErrorSeverity::Transient
                } else {
                    ErrorSeverity::Permanent
                };
                AppError::new(ErrorKind::Storage, "Local storage failed")
                    .with_severity(severity)
                    .with_internal(e.to_string())
            }
        }
    }
}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        let kind = match &e {
            HttpError::Timeout { .. } => ErrorKind::Timeout,
            HttpError::ConnectionError { .. } => ErrorKind::Offline,
            HttpError::InvalidResponse { .. } => ErrorKind::Remote,
            _ => ErrorKind::Internal,
        };
        AppError::new(kind, "HTTP request failed").with_internal(e.to_string())
    }
}

impl From<RemoteError> for AppError {
    fn from(e: RemoteError) -> Self {
        match &e {
            RemoteError::Unreachable(_) => {
                AppError::new(ErrorKind::Offline, "Remote store unreachable")
            }
            RemoteError::Status { status, .. } => {
                let severity = if e.is_retryable() {
                    ErrorSeverity::Transient
                } else {
                    ErrorSeverity::Permanent
                };
                AppError::new(ErrorKind::Remote, "Remote store rejected the request")
                    .with_severity(severity)
                    .with_context("http_status", status.to_string())
            }
            RemoteError::Decode(_) => {
                AppError::new(ErrorKind::DataIntegrity, "Remote payload could not be read")
            }
            RemoteError::Request(_) => {
                AppError::new(ErrorKind::Internal, "Remote request could not be built")
            }
        }
        .with_internal(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey { collection, key } => {
                let message = match collection {
                    Collection::Assets => "Já existe um item com este código e patrimônio",
                    Collection::Vehicles => "Já existe um veículo com esta placa",
                };
                AppError::new(ErrorKind::Conflict, message)
                    .with_context("collection", collection.to_string())
                    .with_context("key", key)
            }
            StoreError::NotFound { collection, key } => {
                AppError::new(ErrorKind::NotFound, "Registro não encontrado")
                    .with_context("collection", collection.to_string())
                    .with_context("key", key)
            }
            StoreError::HistoryNotFound(id) => {
                AppError::new(ErrorKind::NotFound, "Solicitação não encontrada no histórico")
                    .with_context("id", id)
            }
            StoreError::Persistence(kv) => kv.into(),
        }
    }
}

impl From<ModelError> for AppError {
    fn from(e: ModelError) -> Self {
        AppError::new(ErrorKind::DataIntegrity, "Invalid record reference").with_internal(e.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Offline(reason) => {
                AppError::new(ErrorKind::Offline, "Remote store unreachable").with_internal(reason)
            }
            SyncError::Remote(remote) => remote.into(),
            SyncError::InvalidKey {
                collection,
                key,
                reason,
            } => AppError::new(ErrorKind::DataIntegrity, "Invalid record key")
                .with_internal(reason)
                .with_context("collection", collection.to_string())
                .with_context("key", key),
            SyncError::Store(store) => store.into(),
            SyncError::NotConfirmed => {
                AppError::new(ErrorKind::ConfirmationRequired, "Action was not confirmed")
            }
        }
    }
}

impl From<ImportError> for AppError {
    fn from(e: ImportError) -> Self {
        AppError::new(ErrorKind::Validation, "Arquivo de importação inválido").with_internal(e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, "Invalid configuration").with_internal(e.to_string())
    }
}
