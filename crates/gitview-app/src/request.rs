//! Cache-aware, deduplicating front door for remote fetches.

use std::sync::Arc;

use gitview_core::{ResourceKey, resolve_policy};
use gitview_store::ByteCache;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{FetchError, TransportError};
use crate::in_flight::InFlightTable;
use crate::transport::Transport;

/// Coordinates foreground fetches: serves fresh cache hits, collapses
/// concurrent identical requests into one transport call and writes
/// successful results back into the [`ByteCache`].
pub struct RequestCoordinator {
    transport: Arc<dyn Transport>,
    cache: Arc<ByteCache>,
    text: InFlightTable<Fetched<String>>,
    bytes: InFlightTable<Fetched<Vec<u8>>>,
}

/// Outcome of one transport call, and whether the flight already wrote it
/// to the cache.
#[derive(Clone)]
struct Fetched<V> {
    value: V,
    cached: bool,
}

impl RequestCoordinator {
    /// Create a coordinator over `transport` and `cache`.
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<ByteCache>) -> Self {
        Self {
            transport,
            cache,
            text: InFlightTable::new(),
            bytes: InFlightTable::new(),
        }
    }

    /// Fetch page text for `url`.
    ///
    /// With `use_cache`, a fresh cached copy is returned without touching the
    /// transport and a successful fetch is written back.
    ///
    /// # Errors
    /// Returns the shared [`FetchError`] of the flight this call joined or
    /// started.
    pub async fn fetch_content(&self, url: &str, use_cache: bool) -> Result<String, FetchError> {
        let key = ResourceKey::new(url);
        if use_cache && let Some(text) = self.cache.get_cached_html(url).await {
            debug!(%key, "Serving page from cache");
            return Ok(text);
        }

        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let owned_url = url.to_owned();
        let flight = self.text.join_or_start(key.as_str(), move |cancel| async move {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                fetched = transport.fetch_text(&owned_url) => fetched?,
            };
            let cached = use_cache && !cancel.is_cancelled();
            if cached {
                cache.cache_html(&owned_url, &text).await;
            }
            Ok(Fetched {
                value: text,
                cached,
            })
        });

        let cancel = flight.cancel_token();
        let fetched = flight.await?;
        // A flight started without caching leaves the write to cache-aware joiners.
        if use_cache && !fetched.cached && !cancel.is_cancelled() {
            self.cache.cache_html(url, &fetched.value).await;
        }
        Ok(fetched.value)
    }

    /// Alias of [`fetch_content`](Self::fetch_content).
    ///
    /// # Errors
    /// See [`fetch_content`](Self::fetch_content).
    pub async fn fetch_html(&self, url: &str, use_cache: bool) -> Result<String, FetchError> {
        self.fetch_content(url, use_cache).await
    }

    /// Fetch raw bytes for `url` through the cache, using the policy
    /// resolved from the URL.
    ///
    /// # Errors
    /// Returns the shared [`FetchError`] of the flight.
    pub async fn fetch_data(&self, url: &str, use_cache: bool) -> Result<Vec<u8>, FetchError> {
        let key = ResourceKey::new(url);
        if use_cache && let Some(bytes) = self.cache.get(&key).await {
            debug!(%key, "Serving data from cache");
            return Ok(bytes);
        }
        self.fetch_bytes(key, url, use_cache).await
    }

    /// Fetch `url` as JSON and decode it.
    ///
    /// # Errors
    /// Returns the fetch error, or [`TransportError::InvalidResponse`] when
    /// the body does not decode.
    pub async fn fetch_json<T>(&self, url: &str, use_cache: bool) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let bytes = self.fetch_data(url, use_cache).await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::InvalidResponse(err.to_string()).into())
    }

    /// Fetch raw bytes for `url`, deduplicating concurrent requests but
    /// leaving caching to the transport.
    ///
    /// # Errors
    /// Returns the shared [`FetchError`] of the flight.
    pub async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_bytes(ResourceKey::new(url), url, false).await
    }

    async fn fetch_bytes(
        &self,
        key: ResourceKey,
        url: &str,
        write_back: bool,
    ) -> Result<Vec<u8>, FetchError> {
        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let owned_url = url.to_owned();
        let flight_key = key.clone();
        let flight = self.bytes.join_or_start(key.as_str(), move |cancel| async move {
            let bytes = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                fetched = transport.fetch_bytes(&owned_url) => fetched?,
            };
            let cached = write_back && !cancel.is_cancelled();
            if cached {
                cache
                    .put(&flight_key, bytes.clone(), resolve_policy(&owned_url))
                    .await;
            }
            Ok(Fetched {
                value: bytes,
                cached,
            })
        });

        let cancel = flight.cancel_token();
        let fetched = flight.await?;
        if write_back && !fetched.cached && !cancel.is_cancelled() {
            self.cache
                .put(&key, fetched.value.clone(), resolve_policy(url))
                .await;
        }
        Ok(fetched.value)
    }

    /// Cancel the fetch for `url`, if any.
    pub fn cancel(&self, url: &str) -> bool {
        let key = ResourceKey::new(url);
        let cancelled = self.text.cancel(key.as_str()) | self.bytes.cancel(key.as_str());
        if cancelled {
            debug!(%key, "Cancelled fetch");
        }
        cancelled
    }

    /// Cancel every in-flight fetch.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.text.cancel_all() + self.bytes.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled all fetches");
        }
        cancelled
    }

    /// Whether a fetch for `url` is in flight.
    #[must_use]
    pub fn is_active(&self, url: &str) -> bool {
        let key = ResourceKey::new(url);
        self.text.contains(key.as_str()) || self.bytes.contains(key.as_str())
    }

    /// Number of in-flight fetches.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.text.len() + self.bytes.len()
    }

    /// Cache the coordinator writes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<ByteCache> {
        &self.cache
    }
}
