//! # dbscope-cache — key-value cache collaborator
//!
//! A small command surface (`set`/`get`, `hset`/`hgetall`, `expire`, `ping`,
//! `close`) over a pluggable [`CacheStore`]. The cache is independent of the
//! database: it never takes part in commit or rollback, so writes made inside
//! a unit of work stay in the cache even if that unit of work rolls back.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use dbscope_core::CacheConfig;

/// Errors returned by a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The store was closed.
    Closed,
    /// A plain-value command hit a hash, or the reverse.
    WrongType { key: String },
    /// Backend-specific failure (transport, protocol).
    Backend(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Closed => write!(f, "cache is closed"),
            CacheError::WrongType { key } => {
                write!(f, "operation against a key holding the wrong kind of value: {key}")
            }
            CacheError::Backend(msg) => write!(f, "cache backend error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Boxed future returned by [`CacheStore`] methods.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Pluggable cache backend.
///
/// Implement this to back the cache with Redis, Memcached, etc.
pub trait CacheStore: Send + Sync + 'static {
    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> CacheFuture<'a, ()>;
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Bytes>>;
    /// Set fields of the hash at `key`, creating it if needed.
    fn hset<'a>(&'a self, key: &'a str, fields: Vec<(String, Bytes)>) -> CacheFuture<'a, ()>;
    /// All fields of the hash at `key`; empty when the key is absent.
    fn hgetall<'a>(&'a self, key: &'a str) -> CacheFuture<'a, HashMap<String, Bytes>>;
    /// Expire `key` after `ttl`. Returns whether the key existed.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> CacheFuture<'a, bool>;
    fn ping(&self) -> CacheFuture<'_, ()>;
    fn close(&self) -> CacheFuture<'_, ()>;
}

enum Data {
    Value(Bytes),
    Hash(HashMap<String, Bytes>),
}

struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache store backed by `DashMap`.
///
/// Expired entries are lazily evicted on access. New keys get the default
/// TTL, if one is configured.
#[derive(Clone)]
pub struct InMemoryCache {
    inner: Arc<DashMap<String, Entry>>,
    default_ttl: Option<Duration>,
    closed: Arc<AtomicBool>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            default_ttl: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Entries expire `ttl` after they are created unless `expire` says otherwise.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Build from the `rd.*` section; a non-zero idle timeout becomes the default TTL.
    pub fn from_config(config: &CacheConfig) -> Self {
        tracing::debug!(
            address = %config.address(),
            idle_timeout = ?config.idle_timeout(),
            "using in-memory cache"
        );
        let cache = Self::new();
        if config.idle_timeout().is_zero() {
            cache
        } else {
            cache.with_default_ttl(config.idle_timeout())
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.retain(|_, entry| !entry.is_expired(now));
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.inner.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn new_expiry(&self) -> Option<Instant> {
        self.default_ttl.map(|ttl| Instant::now() + ttl)
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for InMemoryCache {
    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let entry = Entry {
                data: Data::Value(value),
                expires_at: self.new_expiry(),
            };
            self.inner.insert(key.to_string(), entry);
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.evict_if_expired(key);
            match self.inner.get(key).as_deref() {
                None => Ok(None),
                Some(Entry {
                    data: Data::Value(v),
                    ..
                }) => Ok(Some(v.clone())),
                Some(_) => Err(CacheError::WrongType { key: key.to_string() }),
            }
        })
    }

    fn hset<'a>(&'a self, key: &'a str, fields: Vec<(String, Bytes)>) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.evict_if_expired(key);
            match self.inner.entry(key.to_string()) {
                MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().data {
                    Data::Hash(hash) => hash.extend(fields),
                    Data::Value(_) => return Err(CacheError::WrongType { key: key.to_string() }),
                },
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry {
                        data: Data::Hash(fields.into_iter().collect()),
                        expires_at: self.new_expiry(),
                    });
                }
            }
            Ok(())
        })
    }

    fn hgetall<'a>(&'a self, key: &'a str) -> CacheFuture<'a, HashMap<String, Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.evict_if_expired(key);
            match self.inner.get(key).as_deref() {
                None => Ok(HashMap::new()),
                Some(Entry {
                    data: Data::Hash(hash),
                    ..
                }) => Ok(hash.clone()),
                Some(_) => Err(CacheError::WrongType { key: key.to_string() }),
            }
        })
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> CacheFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            self.evict_if_expired(key);
            if ttl.is_zero() {
                return Ok(self.inner.remove(key).is_some());
            }
            Ok(match self.inner.get_mut(key) {
                Some(mut entry) => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                }
                None => false,
            })
        })
    }

    fn ping(&self) -> CacheFuture<'_, ()> {
        Box::pin(async move { self.ensure_open() })
    }

    fn close(&self) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.inner.clear();
                tracing::debug!("in-memory cache closed");
            }
            Ok(())
        })
    }
}
