//! Named response caches keyed by absolute URL.
//!
//! Mirrors the browser Cache Storage model: a storage of named caches, each
//! cache mapping a request URL to a stored response. Writes are
//! last-write-wins.

use crate::error::Result;
use crate::http::FetchResponse;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// One named response cache.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Stored response for `url`, ignoring any fragment.
    async fn match_url(&self, url: &Url) -> Option<FetchResponse>;

    /// Store a response for `url`, replacing any previous entry.
    async fn put(&self, url: &Url, response: FetchResponse) -> Result<()>;

    /// Remove the entry for `url`. Returns whether one existed.
    async fn delete(&self, url: &Url) -> bool;
}

/// A set of named caches.
#[async_trait]
pub trait CacheStorage: Send + Sync + fmt::Debug {
    /// Open a cache, creating it when missing.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> bool;

    /// Names of every cache.
    async fn keys(&self) -> Vec<String>;
}

/// Cache key: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// In-memory [`Cache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, FetchResponse>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn match_url(&self, url: &Url) -> Option<FetchResponse> {
        self.entries.read().get(&cache_key(url)).cloned()
    }

    async fn put(&self, url: &Url, response: FetchResponse) -> Result<()> {
        self.entries.write().insert(cache_key(url), response);
        Ok(())
    }

    async fn delete(&self, url: &Url) -> bool {
        self.entries.write().remove(&cache_key(url)).is_some()
    }
}

/// In-memory [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let cache = Arc::clone(self.caches.write().entry(name.to_string()).or_default());
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> bool {
        self.caches.write().remove(name).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }
}
