//! ASN client (spec §4.2). May be served by the same upstream provider as
//! `GeoClient`, but is a structurally independent client with its own cache
//! and rate limiter so a failure or rate limit on one never starves the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::error::IntelErrorKind;
use serde::Deserialize;

use crate::cache::IntelCache;
use crate::client::{IntelError, IntelResult};
use crate::ratelimit::TokenBucket;

const CLIENT_NAME: &str = "asn";
const ASN_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AsnInfo {
    pub asn: Option<u32>,
    pub as_org: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AsnApiResponse {
    asn: Option<u32>,
    as_org: Option<String>,
}

pub struct AsnClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    cache: IntelCache<AsnInfo>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    rate_limited: Arc<AtomicBool>,
}

impl AsnClient {
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
            cache: IntelCache::new(cache_capacity, ASN_TTL),
            limiter: Arc::new(TokenBucket::new(rate_per_min.ceil() as u64, rate_per_min)),
            timeout: Duration::from_millis(timeout_ms),
            rate_limited: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Shared handle the health reporter can poll after this client is
    /// moved into the enrichment orchestrator (spec §6.4).
    pub fn rate_limit_flag(&self) -> Arc<AtomicBool> {
        self.rate_limited.clone()
    }

    pub async fn lookup(&self, ip: &str) -> IntelResult<AsnInfo> {
        if let Some(hit) = self.cache.get(ip) {
            return Ok(hit);
        }
        if !self.is_enabled() {
            return Ok(AsnInfo::default());
        }
        if !self.limiter.try_acquire() {
            self.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::RateLimited,
            });
        }

        match tokio::time::timeout(self.timeout, self.fetch(ip)).await {
            Ok(Ok(info)) => {
                self.rate_limited.store(false, Ordering::Relaxed);
                self.cache.insert(ip.to_string(), info.clone());
                Ok(info)
            }
            Ok(Err(e)) => {
                if e.kind == IntelErrorKind::RateLimited {
                    self.rate_limited.store(true, Ordering::Relaxed);
                }
                Err(e)
            }
            Err(_) => Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::Timeout,
            }),
        }
    }

    async fn fetch(&self, ip: &str) -> IntelResult<AsnInfo> {
        let endpoint = self.endpoint.as_ref().expect("checked by is_enabled");
        let mut req = self.http.get(format!("{endpoint}/{ip}"));
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key)]);
        }
        let resp = req.send().await.map_err(|_| IntelError {
            client: CLIENT_NAME,
            kind: IntelErrorKind::NetworkError,
        })?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IntelError {
                client: CLIENT_NAME,
                kind: IntelErrorKind::AuthError,
            });
        }
        let parsed: AsnApiResponse = resp.json().await.map_err(|_| IntelError {
            client: CLIENT_NAME,
            kind: IntelErrorKind::MalformedResponse,
        })?;
        Ok(AsnInfo {
            asn: parsed.asn,
            as_org: parsed.as_org,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_empty() {
        let client = AsnClient::new(None, None, 45.0, 3000, 100);
        let info = client.lookup("8.8.8.8").await.unwrap();
        assert!(info.asn.is_none());
    }
}
