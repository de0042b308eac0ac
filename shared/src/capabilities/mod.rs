//! Host-provided effects: local persistence and outbound HTTP.

pub mod http;
pub mod kv;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
    ValidatedUrl,
};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::kv::SqliteStorage;
pub use self::kv::{KvError, KvKey, LocalStorage, MemoryStorage, StorageErrorCode, TypedKvStore};
