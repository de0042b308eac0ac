use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KvKey(String);

impl KvKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let problem = if key.trim().is_empty() {
            Some("empty")
        } else if key.len() > MAX_KEY_LENGTH {
            Some("too long")
        } else if key.contains("..") || key.starts_with(['/', '\\']) {
            Some("looks like a path")
        } else if key.chars().any(char::is_control) {
            Some("contains control characters")
        } else {
            None
        };
        match problem {
            Some(reason) => Err(KvError::InvalidKey {
                key: key.chars().take(64).collect::<String>().escape_default().to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },
}

impl KvError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    Unknown,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, StorageErrorCode::Busy | StorageErrorCode::Locked)
    }
}

/// String-keyed local persistence, the shape of a browser's `localStorage`.
pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError>;
    fn remove(&self, key: &KvKey) -> Result<bool, KvError>;
}

fn check_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::storage(StorageErrorCode::Locked, "memory storage poisoned"))
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(self.lock()?.get(key.as_str()).cloned())
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_size(value)?;
        self.lock()?
            .insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
        Ok(self.lock()?.remove(key.as_str()).is_some())
    }
}

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::sqlite::SqliteStorage;

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite {
    use super::{check_size, KvError, KvKey, LocalStorage, StorageErrorCode};
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::Mutex;

    /// Single-table key/value store for native shells.
    pub struct SqliteStorage {
        conn: Mutex<Connection>,
    }

    impl SqliteStorage {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(map_sqlite)?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(map_sqlite)?;
            Self::init(conn)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .map_err(map_sqlite)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, KvError> {
            self.conn
                .lock()
                .map_err(|_| KvError::storage(StorageErrorCode::Locked, "sqlite connection poisoned"))
        }
    }

    impl LocalStorage for SqliteStorage {
        fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            self.conn()?
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![key.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite)
        }

        fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
            check_size(value)?;
            self.conn()?
                .execute(
                    "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key.as_str(), value],
                )
                .map_err(map_sqlite)?;
            Ok(())
        }

        fn remove(&self, key: &KvKey) -> Result<bool, KvError> {
            let removed = self
                .conn()?
                .execute("DELETE FROM kv_entries WHERE key = ?1", params![key.as_str()])
                .map_err(map_sqlite)?;
            Ok(removed > 0)
        }
    }

    fn map_sqlite(e: rusqlite::Error) -> KvError {
        let code = match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
                rusqlite::ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
                rusqlite::ErrorCode::DiskFull => StorageErrorCode::DiskFull,
                rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly => {
                    StorageErrorCode::PermissionDenied
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    StorageErrorCode::Corrupted
                }
                rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::SystemIoFailure => {
                    StorageErrorCode::IoError
                }
                _ => StorageErrorCode::Unknown,
            },
            _ => StorageErrorCode::Unknown,
        };
        KvError::storage(code, e.to_string())
    }
}

/// JSON document stored under one fixed key.
pub struct TypedKvStore<T> {
    key: KvKey,
    _phantom: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> TypedKvStore<T> {
    #[must_use]
    pub fn new(key: KvKey) -> Self {
        Self {
            key,
            _phantom: PhantomData,
        }
    }

    /// Builds a store for one of the crate's fixed key names.
    pub fn named(key: &'static str) -> Result<Self, KvError> {
        Ok(Self::new(KvKey::new(key)?))
    }

    #[must_use]
    pub fn key(&self) -> &KvKey {
        &self.key
    }

    /// `Ok(None)` when absent, `Err(Serialization)` when present but malformed.
    pub fn load(&self, storage: &dyn LocalStorage) -> Result<Option<T>, KvError> {
        let Some(raw) = storage.get(&self.key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| KvError::Serialization {
                message: e.to_string(),
                key: Some(self.key.as_str().to_string()),
            })
    }

    pub fn save(&self, storage: &dyn LocalStorage, value: &T) -> Result<(), KvError> {
        let raw = serde_json::to_string(value).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: Some(self.key.as_str().to_string()),
        })?;
        storage.set(&self.key, &raw)
    }

    pub fn clear(&self, storage: &dyn LocalStorage) -> Result<bool, KvError> {
        storage.remove(&self.key)
    }
}
