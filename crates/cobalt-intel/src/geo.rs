//! Geolocation client (spec §4.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::error::IntelErrorKind;
use cobalt_common::record::GeoInfo;
use serde::Deserialize;
use tracing::warn;

use crate::cache::IntelCache;
use crate::client::{IntelError, IntelResult};
use crate::ratelimit::TokenBucket;

const CLIENT_NAME: &str = "geo";
const GEO_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Deserialize)]
struct GeoApiResponse {
    country_code: Option<String>,
    country_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    region: Option<String>,
    city: Option<String>,
}

/// Geolocation lookups with an internal LRU+TTL cache and a token-bucket
/// rate limiter. A client with no configured credentials/endpoint disables
/// itself cleanly and reports empty results rather than erroring.
pub struct GeoClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    cache: IntelCache<GeoInfo>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    rate_limited: Arc<AtomicBool>,
}

impl GeoClient {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        rate_per_min: f64,
        timeout_ms: u64,
        cache_capacity: u64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            cache: IntelCache::new(cache_capacity, GEO_TTL),
            limiter: Arc::new(TokenBucket::new(rate_per_min.ceil() as u64, rate_per_min)),
            timeout: Duration::from_millis(timeout_ms),
            rate_limited: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Shared handle the health reporter can poll after this client is
    /// moved into the enrichment orchestrator (spec §6.4: `rate_limited`
    /// must be observable on the feed).
    pub fn rate_limit_flag(&self) -> Arc<AtomicBool> {
        self.rate_limited.clone()
    }

    pub async fn lookup(&self, ip: &str) -> IntelResult<GeoInfo> {
        if let Some(hit) = self.cache.get(ip) {
            return Ok(hit);
        }

        if !self.is_enabled() {
            return Ok(GeoInfo::default());
        }

        if !self.limiter.try_acquire() {
            self.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::RateLimited,
            });
        }

        let result = tokio::time::timeout(self.timeout, self.fetch(ip)).await;
        match result {
            Ok(Ok(info)) => {
                self.rate_limited.store(false, Ordering::Relaxed);
                self.cache.insert(ip.to_string(), info.clone());
                Ok(info)
            }
            Ok(Err(e)) => {
                if e.kind == IntelErrorKind::RateLimited {
                    self.rate_limited.store(true, Ordering::Relaxed);
                }
                warn!(client = CLIENT_NAME, error = %e, "geo lookup failed");
                Err(e)
            }
            Err(_) => Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::Timeout,
            }),
        }
    }

    async fn fetch(&self, ip: &str) -> IntelResult<GeoInfo> {
        let endpoint = self.endpoint.as_ref().expect("checked by is_enabled");
        let mut req = self.http.get(format!("{endpoint}/{ip}"));
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key)]);
        }

        let resp = req.send().await.map_err(|e| IntelError {
            client: CLIENT_NAME,
            kind: if e.is_timeout() {
                IntelErrorKind::Timeout
            } else {
                IntelErrorKind::NetworkError
            },
        })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::AuthError,
            });
        }
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::RateLimited,
            });
        }

        let parsed: GeoApiResponse = resp.json().await.map_err(|_| IntelError {
            client: CLIENT_NAME,
            kind: IntelErrorKind::MalformedResponse,
        })?;

        Ok(GeoInfo {
            country_code: parsed.country_code,
            country_name: parsed.country_name,
            lat: parsed.lat,
            lon: parsed.lon,
            region: parsed.region,
            city: parsed.city,
            asn: None,
            as_org: None,
        })
    }
}
