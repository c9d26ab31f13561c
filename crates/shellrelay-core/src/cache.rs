//! Provider-neutral response cache, organised in named generations.
//!
//! # Architecture
//!
//! ```text
//!  OfflineWorker          CacheHandle (validation, cross-generation match)
//!      │                       │
//!      └──────────────────────►│
//!                              │
//!                   Arc<dyn CacheStore>  (object-safe, snapshots)
//!                              │
//!                      MemoryCacheStore (axum adapter)
//! ```
//!
//! A generation is a named bucket such as `ace-clouds-v1`. Entries are keyed by the
//! absolute request URL and hold a [`CachedResponse`] snapshot with a fully buffered body.
//! Generations are listed in creation order, which is also the order
//! [`CacheHandle::match_any`] searches them in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::body::Body;
use crate::error::EdgeError;
use crate::http::{HeaderMap, StatusCode};
use crate::proxy::ProxyResponse;

/// Errors returned by cache store operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend is temporarily unavailable.
    #[error("cache store unavailable")]
    Unavailable,

    /// Invalid generation name, key or entry.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("cache store error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CacheError> for EdgeError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable => {
                EdgeError::internal(anyhow::anyhow!("cache store unavailable"))
            }
            CacheError::Validation(e) => {
                EdgeError::bad_request(format!("cache validation error: {e}"))
            }
            CacheError::Internal(e) => EdgeError::internal(e),
        }
    }
}

/// Immutable snapshot of a response: status, every header value and the buffered body.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Buffer a live response into a snapshot. Extensions (such as the response type) are
    /// not part of a cache entry.
    pub async fn from_proxy_response(response: ProxyResponse) -> Result<Self, CacheError> {
        let body = response.body.collect().await?;
        Ok(Self::new(response.status, response.headers, body))
    }

    pub fn to_proxy_response(&self) -> ProxyResponse {
        let mut response = ProxyResponse::new(self.status, Body::from_bytes(self.body.clone()));
        response.headers = self.headers.clone();
        response
    }
}

/// Object-safe interface for cache backends.
///
/// All methods take `&self`; backends handle concurrent access internally. Futures are
/// `Send` so writes can run on a detached task.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the generation if it does not exist. Existing entries are left untouched.
    async fn open(&self, generation: &str) -> Result<(), CacheError>;

    /// Look up one key in one generation. A missing generation is a miss.
    async fn get(&self, generation: &str, key: &str)
        -> Result<Option<CachedResponse>, CacheError>;

    /// Store an entry, creating the generation if needed and replacing any previous entry.
    async fn put(
        &self,
        generation: &str,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError>;

    /// Drop a whole generation. Returns `false` when it did not exist.
    async fn delete(&self, generation: &str) -> Result<bool, CacheError>;

    /// Generation names in creation order.
    async fn generations(&self) -> Result<Vec<String>, CacheError>;

    /// Keys stored in a generation. A missing generation has no keys.
    async fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError>;
}

/// A cloneable handle to a cache store that validates names and keys before delegating.
#[derive(Clone)]
pub struct CacheHandle {
    store: Arc<dyn CacheStore>,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle").finish_non_exhaustive()
    }
}

impl CacheHandle {
    /// Maximum key (request URL) size in bytes.
    pub const MAX_KEY_SIZE: usize = 8 * 1024;

    /// Maximum generation name size in bytes.
    pub const MAX_GENERATION_SIZE: usize = 256;

    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    fn validate_generation(generation: &str) -> Result<(), CacheError> {
        if generation.trim().is_empty() {
            return Err(CacheError::Validation(
                "generation name cannot be empty".to_string(),
            ));
        }
        if generation.len() > Self::MAX_GENERATION_SIZE {
            return Err(CacheError::Validation(format!(
                "generation name length {} exceeds limit of {} bytes",
                generation.len(),
                Self::MAX_GENERATION_SIZE
            )));
        }
        Ok(())
    }

    fn validate_key(key: &str) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::Validation("key cannot be empty".to_string()));
        }
        if key.len() > Self::MAX_KEY_SIZE {
            return Err(CacheError::Validation(format!(
                "key length {} exceeds limit of {} bytes",
                key.len(),
                Self::MAX_KEY_SIZE
            )));
        }
        if key.contains('#') {
            return Err(CacheError::Validation(
                "key must not contain a fragment".to_string(),
            ));
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(CacheError::Validation(
                "key contains invalid control characters".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn open(&self, generation: &str) -> Result<(), CacheError> {
        Self::validate_generation(generation)?;
        self.store.open(generation).await
    }

    pub async fn get(
        &self,
        generation: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, CacheError> {
        Self::validate_generation(generation)?;
        Self::validate_key(key)?;
        self.store.get(generation, key).await
    }

    pub async fn put(
        &self,
        generation: &str,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        Self::validate_generation(generation)?;
        Self::validate_key(key)?;
        self.store.put(generation, key, response).await
    }

    /// Validate every key first, then store the entries in order. Nothing is written when any
    /// key is invalid.
    pub async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError> {
        Self::validate_generation(generation)?;
        for (key, _) in &entries {
            Self::validate_key(key)?;
        }
        for (key, response) in entries {
            self.store.put(generation, &key, response).await?;
        }
        Ok(())
    }

    /// Search every generation, oldest first, and return the first hit.
    pub async fn match_any(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Self::validate_key(key)?;
        for generation in self.store.generations().await? {
            if let Some(hit) = self.store.get(&generation, key).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    pub async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        Self::validate_generation(generation)?;
        self.store.delete(generation).await
    }

    pub async fn generations(&self) -> Result<Vec<String>, CacheError> {
        self.store.generations().await
    }

    pub async fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        Self::validate_generation(generation)?;
        self.store.keys(generation).await
    }
}

/// Generate a suite of contract tests for any [`CacheStore`] implementation.
///
/// # Example
///
/// ```rust,ignore
/// shellrelay_core::cache_store_contract_tests!(memory_cache_contract, MemoryCacheStore::new());
/// ```
#[macro_export]
macro_rules! cache_store_contract_tests {
    ($mod_name:ident, $factory:expr) => {
        mod $mod_name {
            use super::*;
            use bytes::Bytes;
            use $crate::cache::{CacheStore, CachedResponse};
            use $crate::http::{HeaderMap, StatusCode};

            fn run<F: std::future::Future>(f: F) -> F::Output {
                futures::executor::block_on(f)
            }

            fn entry(body: &'static str) -> CachedResponse {
                CachedResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body))
            }

            #[test]
            fn contract_put_and_get() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/x", entry("x")).await.unwrap();
                    let hit = store.get("v1", "https://a/x").await.unwrap().unwrap();
                    assert_eq!(hit.body(), &Bytes::from("x"));
                });
            }

            #[test]
            fn contract_get_missing_returns_none() {
                let store = $factory;
                run(async {
                    assert!(store.get("v1", "https://a/x").await.unwrap().is_none());
                    store.open("v1").await.unwrap();
                    assert!(store.get("v1", "https://a/x").await.unwrap().is_none());
                });
            }

            #[test]
            fn contract_put_overwrites() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/x", entry("first")).await.unwrap();
                    store.put("v1", "https://a/x", entry("second")).await.unwrap();
                    let hit = store.get("v1", "https://a/x").await.unwrap().unwrap();
                    assert_eq!(hit.body(), &Bytes::from("second"));
                    assert_eq!(store.keys("v1").await.unwrap().len(), 1);
                });
            }

            #[test]
            fn contract_generations_are_isolated() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/x", entry("old")).await.unwrap();
                    assert!(store.get("v2", "https://a/x").await.unwrap().is_none());
                });
            }

            #[test]
            fn contract_generations_in_creation_order() {
                let store = $factory;
                run(async {
                    store.open("b").await.unwrap();
                    store.put("a", "https://a/x", entry("x")).await.unwrap();
                    store.open("c").await.unwrap();
                    store.open("b").await.unwrap();
                    assert_eq!(store.generations().await.unwrap(), vec!["b", "a", "c"]);
                });
            }

            #[test]
            fn contract_open_keeps_entries() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/x", entry("x")).await.unwrap();
                    store.open("v1").await.unwrap();
                    assert!(store.get("v1", "https://a/x").await.unwrap().is_some());
                });
            }

            #[test]
            fn contract_delete_removes_generation() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/x", entry("x")).await.unwrap();
                    assert!(store.delete("v1").await.unwrap());
                    assert!(store.get("v1", "https://a/x").await.unwrap().is_none());
                    assert!(store.generations().await.unwrap().is_empty());
                });
            }

            #[test]
            fn contract_delete_missing_returns_false() {
                let store = $factory;
                run(async {
                    assert!(!store.delete("nope").await.unwrap());
                });
            }

            #[test]
            fn contract_keys_lists_generation() {
                let store = $factory;
                run(async {
                    store.put("v1", "https://a/1", entry("1")).await.unwrap();
                    store.put("v1", "https://a/2", entry("2")).await.unwrap();
                    store.put("v2", "https://a/3", entry("3")).await.unwrap();

                    let mut keys = store.keys("v1").await.unwrap();
                    keys.sort();
                    assert_eq!(keys, vec!["https://a/1", "https://a/2"]);
                    assert!(store.keys("missing").await.unwrap().is_empty());
                });
            }
        }
    };
}
