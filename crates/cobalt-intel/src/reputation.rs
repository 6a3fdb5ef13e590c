//! Reputation client: fans out to VirusTotal and AbuseIPDB and aggregates
//! the results under the tie-break policy in spec §4.2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::error::IntelErrorKind;
use cobalt_common::record::ReputationInfo;
use serde::Deserialize;
use tracing::warn;

use crate::cache::IntelCache;
use crate::client::{IntelError, IntelResult};
use crate::ratelimit::TokenBucket;

const REPUTATION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Deserialize)]
struct VtResponse {
    positives: Option<u32>,
    total: Option<u32>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct AbuseIpDbResponse {
    #[serde(rename = "abuseConfidenceScore")]
    abuse_confidence_score: Option<u32>,
}

struct ProviderClient {
    name: &'static str,
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    rate_limited: Arc<AtomicBool>,
}

impl ProviderClient {
    fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

pub struct ReputationClient {
    vt: ProviderClient,
    abuseipdb: ProviderClient,
    cache: IntelCache<ReputationInfo>,
}

impl ReputationClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vt_endpoint: Option<String>,
        vt_api_key: Option<String>,
        vt_rate_per_sec: f64,
        vt_timeout_ms: u64,
        abuseipdb_endpoint: Option<String>,
        abuseipdb_api_key: Option<String>,
        abuseipdb_rate_per_sec: f64,
        abuseipdb_timeout_ms: u64,
        cache_capacity: u64,
    ) -> Self {
        Self {
            vt: ProviderClient {
                name: "virustotal",
                http: reqwest::Client::new(),
                endpoint: vt_endpoint,
                api_key: vt_api_key,
                limiter: Arc::new(TokenBucket::new(
                    vt_rate_per_sec.ceil() as u64,
                    vt_rate_per_sec * 60.0,
                )),
                timeout: Duration::from_millis(vt_timeout_ms),
                rate_limited: Arc::new(AtomicBool::new(false)),
            },
            abuseipdb: ProviderClient {
                name: "abuseipdb",
                http: reqwest::Client::new(),
                endpoint: abuseipdb_endpoint,
                api_key: abuseipdb_api_key,
                limiter: Arc::new(TokenBucket::new(
                    abuseipdb_rate_per_sec.ceil() as u64,
                    abuseipdb_rate_per_sec * 60.0,
                )),
                timeout: Duration::from_millis(abuseipdb_timeout_ms),
                rate_limited: Arc::new(AtomicBool::new(false)),
            },
            cache: IntelCache::new(cache_capacity, REPUTATION_TTL),
        }
    }

    /// True if either provider has credentials configured. Used by the
    /// pipeline orchestrator's health reporting (spec §6.4); neither
    /// provider being enabled is not an error, just an inert client.
    pub fn is_enabled(&self) -> bool {
        self.vt.is_enabled() || self.abuseipdb.is_enabled()
    }

    pub fn vt_enabled(&self) -> bool {
        self.vt.is_enabled()
    }

    pub fn abuseipdb_enabled(&self) -> bool {
        self.abuseipdb.is_enabled()
    }

    /// Shared handles the health reporter can poll after this client is
    /// moved into the enrichment orchestrator (spec §6.4).
    pub fn vt_rate_limit_flag(&self) -> Arc<AtomicBool> {
        self.vt.rate_limited.clone()
    }

    pub fn abuseipdb_rate_limit_flag(&self) -> Arc<AtomicBool> {
        self.abuseipdb.rate_limited.clone()
    }

    pub async fn lookup(&self, ip: &str) -> IntelResult<ReputationInfo> {
        if let Some(hit) = self.cache.get(ip) {
            return Ok(hit);
        }

        let vt_fut = self.query_vt(ip);
        let abuse_fut = self.query_abuseipdb(ip);
        let (vt_result, abuse_result) = tokio::join!(vt_fut, abuse_fut);

        let mut info = ReputationInfo::default();

        match vt_result {
            Ok(Some((positives, total, tags))) => {
                info.vt_positives = Some(positives);
                info.vt_total = Some(total);
                info.tags.extend(tags);
                info.sources_used.push("virustotal".to_string());
            }
            Ok(None) => {}
            Err(e) => warn!(client = "virustotal", error = %e, "reputation lookup failed"),
        }

        match abuse_result {
            Ok(Some(score)) => {
                info.abuseipdb_score = Some(score);
                info.sources_used.push("abuseipdb".to_string());
            }
            Ok(None) => {}
            Err(e) => warn!(client = "abuseipdb", error = %e, "reputation lookup failed"),
        }

        info.is_known_malicious = info.compute_is_known_malicious();

        // Only cache if at least one provider actually contributed; an
        // all-soft-error result should be retried on the next lookup
        // rather than poisoning the cache with an empty verdict.
        if !info.sources_used.is_empty() {
            self.cache.insert(ip.to_string(), info.clone());
        }

        Ok(info)
    }

    async fn query_vt(&self, ip: &str) -> IntelResult<Option<(u32, u32, Vec<String>)>> {
        if !self.vt.is_enabled() {
            return Ok(None);
        }
        if !self.vt.limiter.try_acquire() {
            self.vt.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: "virustotal",
                kind: IntelErrorKind::RateLimited,
            });
        }
        let endpoint = self.vt.endpoint.as_ref().unwrap();
        let key = self.vt.api_key.as_ref().unwrap();
        let fut = self
            .vt
            .http
            .get(format!("{endpoint}/{ip}"))
            .header("x-apikey", key)
            .send();

        let resp = tokio::time::timeout(self.vt.timeout, fut)
            .await
            .map_err(|_| IntelError {
                client: "virustotal",
                kind: IntelErrorKind::Timeout,
            })?
            .map_err(|_| IntelError {
                client: "virustotal",
                kind: IntelErrorKind::NetworkError,
            })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IntelError {
                client: "virustotal",
                kind: IntelErrorKind::AuthError,
            });
        }
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.vt.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: "virustotal",
                kind: IntelErrorKind::RateLimited,
            });
        }

        let parsed: VtResponse = resp.json().await.map_err(|_| IntelError {
            client: "virustotal",
            kind: IntelErrorKind::MalformedResponse,
        })?;

        self.vt.rate_limited.store(false, Ordering::Relaxed);
        Ok(Some((
            parsed.positives.unwrap_or(0),
            parsed.total.unwrap_or(0),
            parsed.tags.unwrap_or_default(),
        )))
    }

    async fn query_abuseipdb(&self, ip: &str) -> IntelResult<Option<u32>> {
        if !self.abuseipdb.is_enabled() {
            return Ok(None);
        }
        if !self.abuseipdb.limiter.try_acquire() {
            self.abuseipdb.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: "abuseipdb",
                kind: IntelErrorKind::RateLimited,
            });
        }
        let endpoint = self.abuseipdb.endpoint.as_ref().unwrap();
        let key = self.abuseipdb.api_key.as_ref().unwrap();
        let fut = self
            .abuseipdb
            .http
            .get(endpoint)
            .header("Key", key)
            .query(&[("ipAddress", ip)])
            .send();

        let resp = tokio::time::timeout(self.abuseipdb.timeout, fut)
            .await
            .map_err(|_| IntelError {
                client: "abuseipdb",
                kind: IntelErrorKind::Timeout,
            })?
            .map_err(|_| IntelError {
                client: "abuseipdb",
                kind: IntelErrorKind::NetworkError,
            })?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IntelError {
                client: "abuseipdb",
                kind: IntelErrorKind::AuthError,
            });
        }
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.abuseipdb.rate_limited.store(true, Ordering::Relaxed);
            return Err(IntelError {
                client: "abuseipdb",
                kind: IntelErrorKind::RateLimited,
            });
        }

        let parsed: AbuseIpDbResponse = resp.json().await.map_err(|_| IntelError {
            client: "abuseipdb",
            kind: IntelErrorKind::MalformedResponse,
        })?;

        self.abuseipdb.rate_limited.store(false, Ordering::Relaxed);
        Ok(parsed.abuse_confidence_score)
    }
}
