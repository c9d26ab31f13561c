//! Offline cache worker: precaches the app shell, prunes stale generations and answers
//! fetches network-first for API hosts and cache-first for everything else.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use futures::FutureExt;
use url::Url;

use shellrelay_core::body::Body;
use shellrelay_core::cache::{CacheError, CacheHandle, CachedResponse};
use shellrelay_core::error::EdgeError;
use shellrelay_core::http::header::CONTENT_TYPE;
use shellrelay_core::http::{HeaderValue, Method, StatusCode, Uri};
use shellrelay_core::proxy::{ProxyClient, ProxyRequest, ProxyResponse, ResponseType};
use shellrelay_core::task::Spawn;

use crate::settings::OfflineConfig;

const OFFLINE_BODY: &[u8] = br#"{"error":"You are offline."}"#;

#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("cannot {operation} while the worker is {state}")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },
    #[error("failed to precache {url}: {reason}")]
    InstallFailed { url: String, reason: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid url `{input}`: {source}")]
    Url {
        input: String,
        source: url::ParseError,
    },
}

impl From<OfflineError> for EdgeError {
    fn from(err: OfflineError) -> Self {
        match err {
            OfflineError::Cache(err) => err.into(),
            OfflineError::Url { .. } => EdgeError::bad_request(err.to_string()),
            OfflineError::InstallFailed { .. } => EdgeError::bad_gateway(err),
            OfflineError::InvalidState { .. } => EdgeError::internal(err),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    /// Only an activated worker controls its clients.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
}

/// API hosts (hostname contains `marker`) go network-first; everything else is cache-first.
pub fn classify(url: &Url, marker: &str) -> Strategy {
    match url.host_str() {
        Some(host) if host.contains(marker) => Strategy::NetworkFirst,
        _ => Strategy::CacheFirst,
    }
}

/// Cache key for a request URL: the absolute URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// `503` JSON answer for an API request made while the network is unreachable.
pub fn offline_response() -> ProxyResponse {
    let mut response = ProxyResponse::new(
        StatusCode::SERVICE_UNAVAILABLE,
        Body::from_bytes(Bytes::from_static(OFFLINE_BODY)),
    );
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Offline cache worker for the app shell.
///
/// This is a library type: the native server only runs the relay. A host that controls page
/// fetches builds one from [`crate::offline_config`] with its own network client and cache
/// store, drives [`install`](Self::install) and [`activate`](Self::activate), then routes
/// requests through [`fetch`](Self::fetch) or uses the worker itself as a [`ProxyClient`].
pub struct OfflineWorker<C: ProxyClient> {
    config: OfflineConfig,
    scope: Url,
    cache: CacheHandle,
    network: C,
    spawner: Arc<dyn Spawn>,
    state: Mutex<WorkerState>,
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
}

impl<C: ProxyClient> OfflineWorker<C> {
    /// Fails only when the configured scope is not an absolute URL.
    pub fn new(
        config: OfflineConfig,
        cache: CacheHandle,
        network: C,
        spawner: Arc<dyn Spawn>,
    ) -> Result<Self, OfflineError> {
        let scope = Url::parse(&config.scope).map_err(|source| OfflineError::Url {
            input: config.scope.clone(),
            source,
        })?;
        Ok(Self {
            config,
            scope,
            cache,
            network,
            spawner,
            state: Mutex::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            clients_claimed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> &str {
        &self.config.generation
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn transition(
        &self,
        operation: &'static str,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<(), OfflineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(OfflineError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Resolve `input` against the worker scope. Absolute inputs are returned as-is.
    pub fn resolve(&self, input: &str) -> Result<Url, OfflineError> {
        self.scope.join(input).map_err(|source| OfflineError::Url {
            input: input.to_string(),
            source,
        })
    }

    /// Precache every shell entry into the current generation.
    ///
    /// All entries are fetched concurrently and stored only if every one of them succeeds.
    /// On success the worker is `Installed` and asks to skip waiting; on failure it is
    /// `Redundant` and the generation holds none of the shell.
    pub async fn install(&self) -> Result<(), OfflineError> {
        self.transition("install", WorkerState::Parsed, WorkerState::Installing)?;

        match self.precache().await {
            Ok(count) => {
                self.set_state(WorkerState::Installed);
                self.skip_waiting.store(true, Ordering::Release);
                log::info!(
                    "installed {} with {count} shell entries",
                    self.config.generation
                );
                Ok(())
            }
            Err(err) => {
                self.set_state(WorkerState::Redundant);
                log::warn!("install of {} failed: {err}", self.config.generation);
                Err(err)
            }
        }
    }

    async fn precache(&self) -> Result<usize, OfflineError> {
        self.cache.open(&self.config.generation).await?;

        let urls = self
            .config
            .shell
            .iter()
            .map(|entry| self.resolve(entry))
            .collect::<Result<Vec<_>, _>>()?;
        let entries = try_join_all(urls.iter().map(|url| self.fetch_shell_entry(url))).await?;

        let count = entries.len();
        self.cache.put_all(&self.config.generation, entries).await?;
        Ok(count)
    }

    async fn fetch_shell_entry(&self, url: &Url) -> Result<(String, CachedResponse), OfflineError> {
        let failed = |reason: String| OfflineError::InstallFailed {
            url: url.to_string(),
            reason,
        };

        let uri = url
            .as_str()
            .parse::<Uri>()
            .map_err(|err| failed(err.to_string()))?;
        let response = self
            .network
            .send(ProxyRequest::new(Method::GET, uri))
            .await
            .map_err(|err| failed(err.to_string()))?;

        if response.kind == ResponseType::Opaque {
            return Err(failed("opaque response".to_string()));
        }
        if !response.status.is_success() {
            return Err(failed(format!("status {}", response.status)));
        }

        let snapshot = CachedResponse::from_proxy_response(response).await?;
        Ok((cache_key(url), snapshot))
    }

    /// Delete every generation other than the current one and take control of clients.
    /// Returns the deleted generation names.
    pub async fn activate(&self) -> Result<Vec<String>, OfflineError> {
        self.transition("activate", WorkerState::Installed, WorkerState::Activating)?;

        match self.prune().await {
            Ok(deleted) => {
                self.set_state(WorkerState::Activated);
                self.clients_claimed.store(true, Ordering::Release);
                log::info!(
                    "activated {}; removed {} stale generation(s)",
                    self.config.generation,
                    deleted.len()
                );
                Ok(deleted)
            }
            Err(err) => {
                self.set_state(WorkerState::Redundant);
                log::warn!("activation of {} failed: {err}", self.config.generation);
                Err(err)
            }
        }
    }

    async fn prune(&self) -> Result<Vec<String>, OfflineError> {
        let mut deleted = Vec::new();
        for generation in self.cache.generations().await? {
            if generation == self.config.generation {
                continue;
            }
            if self.cache.delete(&generation).await? {
                deleted.push(generation);
            }
        }
        Ok(deleted)
    }

    /// Answer a request the way the worker's fetch hook does.
    pub async fn fetch(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        if !self.state().can_intercept_fetch() {
            return self.network.send(request).await;
        }

        let url = self.resolve(&request.uri.to_string())?;
        match classify(&url, &self.config.api_host_marker) {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request, &url).await,
        }
    }

    async fn network_first(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let uri = request.uri.clone();
        match self.network.send(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                log::warn!("network unavailable for {uri}: {err}");
                Ok(offline_response())
            }
        }
    }

    async fn cache_first(&self, request: ProxyRequest, url: &Url) -> Result<ProxyResponse, EdgeError> {
        let cacheable = request.method == Method::GET;
        let key = cache_key(url);

        if cacheable {
            match self.cache.match_any(&key).await {
                Ok(Some(hit)) => {
                    log::debug!("cache hit for {key}");
                    return Ok(hit.to_proxy_response());
                }
                Ok(None) => {}
                Err(err) => log::warn!("cache lookup for {key} failed: {err}"),
            }
        }

        let response = self.network.send(request).await?;
        if !cacheable || response.status != StatusCode::OK || response.kind == ResponseType::Opaque
        {
            return Ok(response);
        }

        let ProxyResponse {
            status,
            headers,
            body,
            kind,
        } = response;
        let bytes = body.collect().await.map_err(EdgeError::bad_gateway)?;
        self.store_detached(key, CachedResponse::new(status, headers.clone(), bytes.clone()));

        let mut response = ProxyResponse::new(status, Body::from_bytes(bytes)).with_kind(kind);
        response.headers = headers;
        Ok(response)
    }

    fn store_detached(&self, key: String, snapshot: CachedResponse) {
        let cache = self.cache.clone();
        let generation = self.config.generation.clone();
        self.spawner.spawn(
            async move {
                match cache.put(&generation, &key, snapshot).await {
                    Ok(()) => log::debug!("cached {key} in {generation}"),
                    Err(err) => log::warn!("failed to cache {key} in {generation}: {err}"),
                }
            }
            .boxed(),
        );
    }
}

impl<C: ProxyClient> fmt::Debug for OfflineWorker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("generation", &self.config.generation)
            .field("scope", &self.scope.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait(?Send)]
impl<C: ProxyClient> ProxyClient for OfflineWorker<C> {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        self.fetch(request).await
    }
}
