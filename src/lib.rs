#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A storage backend for cooperative client-side throttling against APIs that
//! advertise their current per-service rate limits in response headers.
//!
//! Some upstream APIs expose a throttle-control header describing the overall
//! system status plus a request-per-minute limit for each of their services,
//! and a retry-after header carrying an explicit cooldown in milliseconds.
//! This crate parses those headers, persists the most recent observation in a
//! shared cache, and computes the delay a client should wait before its next
//! request so that independent clients (or threads) pace themselves
//! cooperatively against the advertised limits.
//!
//! The cache itself is pluggable through the [`CacheManager`] trait. By
//! default an in-memory manager backed by
//! [`moka`](https://github.com/moka-rs/moka) is provided; on-disk
//! ([`cacache`](https://github.com/zkat/cacache-rs)) and
//! [`redis`](https://github.com/redis-rs/redis-rs) backends are available
//! behind feature flags for sharing throttle state between processes or
//! hosts.
//!
//! ## Basic Usage
//!
//! ```rust
//! use throttle_cache::{MokaManager, ThrottleCache, ThrottleCacheOptions};
//!
//! // Create a throttle cache with an in-memory backend
//! let throttle = ThrottleCache {
//!     manager: MokaManager::default(),
//!     options: ThrottleCacheOptions::default(),
//! };
//! ```
//!
//! Feed every response's headers into [`ThrottleCache::record`] and ask
//! [`ThrottleCache::delay_for`] how long to wait before the next request:
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use throttle_cache::{
//!     MokaManager, Service, ThrottleCache, ThrottleCacheOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> throttle_cache::Result<()> {
//!     let throttle = ThrottleCache {
//!         manager: MokaManager::default(),
//!         options: ThrottleCacheOptions::default(),
//!     };
//!
//!     let mut headers = HashMap::new();
//!     headers.insert(
//!         "x-throttling-control".to_string(),
//!         "idling (images=green:200 inpadoc=green:60 other=green:1000 \
//!          retrieval=green:200 search=green:30)"
//!             .to_string(),
//!     );
//!     throttle.record(&headers).await?;
//!
//!     // 30 requests per minute advertised for search, so pace at one
//!     // request every two seconds.
//!     let delay = throttle.delay_for(Service::Search).await?;
//!     assert!(delay <= 2.0);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Cache Keys
//!
//! Two clients talking to different upstream APIs can share one backend store
//! by giving each its own key:
//!
//! ```rust
//! use throttle_cache::{MokaManager, ThrottleCache, ThrottleCacheOptions};
//!
//! let throttle = ThrottleCache {
//!     manager: MokaManager::default(),
//!     options: ThrottleCacheOptions {
//!         cache_key: Some("throttle-status:sandbox".to_string()),
//!     },
//! };
//! ```
//!
//! ## Features
//!
//! The following features are available. By default `manager-moka` is enabled.
//!
//! - `manager-moka` (default): enable [moka](https://github.com/moka-rs/moka),
//! an in-memory cache, backend manager.
//! - `manager-cacache` (disabled): enable [cacache](https://github.com/zkat/cacache-rs),
//! a disk cache, backend manager.
//! - `manager-redis` (disabled): enable [redis](https://github.com/redis-rs/redis-rs),
//! a shared remote cache, backend manager.
mod error;
mod managers;

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::OnceLock,
    time::{Duration, SystemTime},
};

use http::response;
use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::{
    BadService, BoxError, Result, ThrottleParseError, ThrottleParseErrorKind,
};

#[cfg(feature = "manager-cacache")]
pub use managers::cacache::CACacheManager;

#[cfg(feature = "manager-moka")]
pub use managers::moka::MokaManager;

#[cfg(feature = "manager-redis")]
pub use managers::redis::RedisManager;

// Exposing the moka cache for convenience, renaming to avoid naming conflicts
#[cfg(feature = "manager-moka")]
#[cfg_attr(docsrs, doc(cfg(feature = "manager-moka")))]
pub use moka::future::{Cache as MokaCache, CacheBuilder as MokaCacheBuilder};

// Headers read by `ThrottleCache::record`
/// `x-throttling-control` header: system status plus a `status:limit` pair
/// per service, e.g. `"idling (images=green:200 ... search=green:30)"`
pub const XTHROTTLINGCONTROL: &str = "x-throttling-control";
/// `retry-after` header: explicit cooldown in milliseconds, sent alongside the
/// throttle-control header when a service is fully throttled
pub const RETRYAFTER: &str = "retry-after";

/// Default key the throttle record is stored under
pub const DEFAULT_CACHE_KEY: &str = "throttle-status";

/// One of the fixed set of upstream services, each independently rate-limited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Service {
    /// Published document image retrieval
    #[serde(rename = "images")]
    Images,
    /// Legal status and family data lookups
    #[serde(rename = "inpadoc")]
    Inpadoc,
    /// Everything not covered by a dedicated quota
    #[serde(rename = "other")]
    Other,
    /// Full-text and bibliographic data retrieval
    #[serde(rename = "retrieval")]
    Retrieval,
    /// Query execution
    #[serde(rename = "search")]
    Search,
}

impl Service {
    /// All services, in the order they conventionally appear in the
    /// throttle-control header
    pub const ALL: [Service; 5] = [
        Service::Images,
        Service::Inpadoc,
        Service::Other,
        Service::Retrieval,
        Service::Search,
    ];

    /// The service name as it appears on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Images => "images",
            Service::Inpadoc => "inpadoc",
            Service::Other => "other",
            Service::Retrieval => "retrieval",
            Service::Search => "search",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Service {
    type Err = BadService;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "images" => Ok(Service::Images),
            "inpadoc" => Ok(Service::Inpadoc),
            "other" => Ok(Service::Other),
            "retrieval" => Ok(Service::Retrieval),
            "search" => Ok(Service::Search),
            _ => Err(BadService),
        }
    }
}

/// Throttle state of a single service as advertised by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceStatus {
    /// Server-assigned status word for the service (e.g. `green`, `yellow`,
    /// `red`, `black`)
    pub status: String,
    /// Requests permitted per 60-second window; 0 means fully throttled
    pub limit: u32,
}

/// A parsed throttle-control header value
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThrottleStatus {
    /// The leading system-wide status token (e.g. `idling`, `busy`,
    /// `overloaded`)
    pub system_status: String,
    /// Per-service status, keyed by [`Service`]. Always holds exactly the
    /// entries of [`Service::ALL`] when produced by [`ThrottleStatus::parse`].
    pub services: HashMap<Service, ServiceStatus>,
}

fn system_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+) \(").expect("system status pattern is valid")
    })
}

fn service_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\w+)=(\w+):(\d+)").expect("service entry pattern is valid")
    })
}

impl ThrottleStatus {
    /// Parses a throttle-control header value of the form
    /// `"<system_status> (<service>=<status>:<limit> ...)"`.
    ///
    /// Entries for names outside the fixed service set are ignored; each of
    /// the five services must appear, otherwise a [`ThrottleParseError`] with
    /// the missing service is returned. The order of entries is not
    /// significant.
    ///
    /// # Example
    /// ```rust
    /// use throttle_cache::{Service, ThrottleStatus};
    ///
    /// let status = ThrottleStatus::parse(
    ///     "busy (images=green:100 inpadoc=yellow:30 other=green:500 \
    ///      retrieval=green:100 search=red:5)",
    /// )?;
    /// assert_eq!(status.system_status, "busy");
    /// assert_eq!(status.services[&Service::Search].limit, 5);
    /// # Ok::<(), throttle_cache::ThrottleParseError>(())
    /// ```
    pub fn parse(
        throttle: &str,
    ) -> std::result::Result<Self, ThrottleParseError> {
        let system_status = system_status_re()
            .captures(throttle)
            .map(|caps| caps[1].to_string())
            .ok_or_else(ThrottleParseError::missing_system_status)?;

        let mut services = HashMap::new();
        for caps in service_entry_re().captures_iter(throttle) {
            // Tokens that are not one of the known services are skipped
            let Ok(service) = caps[1].parse::<Service>() else {
                continue;
            };
            let limit = caps[3]
                .parse()
                .map_err(|_| ThrottleParseError::limit_out_of_range(service))?;
            services.insert(
                service,
                ServiceStatus { status: caps[2].to_string(), limit },
            );
        }

        for service in Service::ALL {
            if !services.contains_key(&service) {
                return Err(ThrottleParseError::missing_service(service));
            }
        }

        Ok(Self { system_status, services })
    }
}

impl FromStr for ThrottleStatus {
    type Err = ThrottleParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The most recently observed throttle state, as stored in the backend cache.
///
/// Created (and unconditionally overwritten) by [`ThrottleCache::record`];
/// read, never mutated, by [`ThrottleCache::delay_for`]. At most one record
/// exists per cache key; expiry is left to the backend store's own policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThrottleRecord {
    /// Server-issued cooldown in milliseconds, 0 when none was sent
    pub retry_after: u64,
    /// The parsed throttle-control header
    pub status: ThrottleStatus,
    /// When the record was taken
    pub timestamp: SystemTime,
}

/// A trait providing methods for storing, reading, and removing throttle
/// records.
#[async_trait::async_trait]
pub trait CacheManager: Send + Sync + 'static {
    /// Attempts to pull a throttle record from cache.
    async fn get(&self, cache_key: &str) -> Result<Option<ThrottleRecord>>;
    /// Attempts to cache a throttle record, overwriting any previous one.
    async fn put(
        &self,
        cache_key: String,
        record: ThrottleRecord,
    ) -> Result<ThrottleRecord>;
    /// Attempts to remove a record from cache.
    async fn delete(&self, cache_key: &str) -> Result<()>;
}

/// Configuration options for the throttle cache.
#[derive(Debug, Clone, Default)]
pub struct ThrottleCacheOptions {
    /// Override the default cache key. Useful when several upstream APIs
    /// share one backend store.
    pub cache_key: Option<String>,
}

impl ThrottleCacheOptions {
    fn cache_key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or(DEFAULT_CACHE_KEY)
    }
}

/// Converts http::HeaderMap to HashMap<String, String> for
/// [`ThrottleCache::record`]
#[must_use]
pub fn headers_to_hashmap(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

// Header names arrive with whatever case the transport delivered
fn header_value<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v.as_str()))
}

/// Persists observed throttle state and computes request pacing from it.
///
/// Callers are expected to invoke [`record`](Self::record) after every
/// response and [`delay_for`](Self::delay_for) before every request; neither
/// ordering nor frequency is enforced here. The read-then-compute sequence in
/// `delay_for` is not atomic across concurrent callers; strict rate-limit
/// correctness under high concurrency requires external synchronization
/// around the cache key.
#[derive(Debug, Clone)]
pub struct ThrottleCache<T: CacheManager> {
    /// Manager instance that implements the [`CacheManager`] trait.
    /// By default, a manager implementation with
    /// [`moka`](https://github.com/moka-rs/moka) as the backend has been
    /// provided, see [`MokaManager`].
    pub manager: T,
    /// Override the default options.
    pub options: ThrottleCacheOptions,
}

impl<T: CacheManager> ThrottleCache<T> {
    /// Records the throttle state advertised in a set of response headers.
    ///
    /// If the `x-throttling-control` header is absent this is a no-op and the
    /// previously cached record (if any) is left intact. If it is present but
    /// malformed the parse error propagates and the cache is not touched.
    /// A missing, empty, or unparseable `retry-after` header is treated as 0.
    pub async fn record(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let Some(throttle) = header_value(headers, XTHROTTLINGCONTROL) else {
            trace!("no {XTHROTTLINGCONTROL} header, keeping cached throttle state");
            return Ok(());
        };
        let status = ThrottleStatus::parse(throttle)?;
        let retry_after = header_value(headers, RETRYAFTER)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        debug!(
            "recording throttle state: system {}, retry-after {}ms",
            status.system_status, retry_after
        );
        self.manager
            .put(
                self.options.cache_key().to_string(),
                ThrottleRecord {
                    retry_after,
                    status,
                    timestamp: SystemTime::now(),
                },
            )
            .await?;
        Ok(())
    }

    /// Records the throttle state from `http::response::Parts`.
    pub async fn record_parts(&self, parts: &response::Parts) -> Result<()> {
        self.record(&headers_to_hashmap(&parts.headers)).await
    }

    /// Returns how many seconds to wait before the next request to `service`.
    ///
    /// With no cached record the next request may run immediately (0.0).
    /// A cached limit of 0 means the service is fully throttled and the
    /// server-issued cooldown applies: the next run is the record's timestamp
    /// plus `retry_after` milliseconds. Any other limit L paces requests
    /// evenly at `60/L` seconds apart. A next-run instant already in the past
    /// yields 0.0; the result is never negative.
    pub async fn delay_for(&self, service: Service) -> Result<f64> {
        let now = SystemTime::now();

        let record = match self.manager.get(self.options.cache_key()).await? {
            Some(record) => record,
            None => return Ok(0.0),
        };

        let next_run = match record.status.services.get(&service) {
            Some(ServiceStatus { limit: 0, .. }) => {
                record.timestamp + Duration::from_millis(record.retry_after)
            }
            Some(ServiceStatus { limit, .. }) => {
                now + Duration::from_secs_f64(60.0 / f64::from(*limit))
            }
            // Only reachable with a hand-built record; parse always fills
            // in every service
            None => return Ok(0.0),
        };

        let delay = match next_run.duration_since(now) {
            Ok(delay) => delay.as_micros() as f64 / 1_000_000.0,
            Err(_) => 0.0,
        };
        trace!("throttle delay for {service}: {delay}s");
        Ok(delay)
    }

    /// Drops the cached record so pacing restarts optimistically.
    pub async fn clear(&self) -> Result<()> {
        self.manager.delete(self.options.cache_key()).await
    }
}
