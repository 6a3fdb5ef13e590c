//! The configuration object handed to `cobalt_pipeline::run` by the launcher
//! (spec §6.1). The core never parses CLI flags itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CobaltError;
use crate::record::CaptureMode;

fn default_tick_ms() -> u64 {
    1000
}
fn default_workers() -> usize {
    4
}
fn default_enrichment_deadline_ms() -> u64 {
    5000
}
fn default_geo_rate_per_min() -> u32 {
    45
}
fn default_vt_rate_per_sec() -> u32 {
    4
}
fn default_abuseipdb_rate_per_sec() -> u32 {
    1
}
fn default_timeout_ms() -> u64 {
    3000
}
fn default_min_scorers() -> usize {
    2
}
fn default_outlier_threshold() -> f64 {
    0.3
}
fn default_uncertainty_threshold() -> f64 {
    0.25
}
fn default_mad_k() -> f64 {
    3.0
}
fn default_storage_path() -> String {
    "database/cobaltgraph.db".to_string()
}
fn default_export_dir() -> String {
    "exports/".to_string()
}
fn default_buffer_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_csv_max_size_mb() -> u64 {
    10
}
fn default_jsonl_max_size_mb() -> u64 {
    100
}
fn default_record_deadline_ms() -> u64 {
    200
}
fn default_scorer_deadline_ms() -> u64 {
    100
}
fn default_ingress_capacity() -> usize {
    1024
}
fn default_drain_deadline_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_enrichment_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            deadline_ms: default_enrichment_deadline_ms(),
            ingress_capacity: default_ingress_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelClientConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub rate_per_sec: Option<u32>,
    pub rate_per_min: Option<u32>,
}

impl IntelClientConfig {
    pub fn geo_default() -> Self {
        Self {
            api_key: None,
            timeout_ms: default_timeout_ms(),
            rate_per_sec: None,
            rate_per_min: Some(default_geo_rate_per_min()),
        }
    }

    pub fn vt_default() -> Self {
        Self {
            api_key: None,
            timeout_ms: default_timeout_ms(),
            rate_per_sec: Some(default_vt_rate_per_sec()),
            rate_per_min: None,
        }
    }

    pub fn abuseipdb_default() -> Self {
        Self {
            api_key: None,
            timeout_ms: default_timeout_ms(),
            rate_per_sec: Some(default_abuseipdb_rate_per_sec()),
            rate_per_min: None,
        }
    }

    pub fn rate_per_minute(&self) -> f64 {
        if let Some(per_min) = self.rate_per_min {
            per_min as f64
        } else if let Some(per_sec) = self.rate_per_sec {
            per_sec as f64 * 60.0
        } else {
            60.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelConfig {
    #[serde(default = "IntelClientConfig::geo_default")]
    pub geo: IntelClientConfig,
    #[serde(default = "IntelClientConfig::vt_default")]
    pub vt: IntelClientConfig,
    #[serde(default = "IntelClientConfig::abuseipdb_default")]
    pub abuseipdb: IntelClientConfig,
    /// LRU cache capacity, entry count (spec §4.2 default 10,000).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            geo: IntelClientConfig::geo_default(),
            vt: IntelClientConfig::vt_default(),
            abuseipdb: IntelClientConfig::abuseipdb_default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_min_scorers")]
    pub min_scorers: usize,
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,
    #[serde(default = "default_uncertainty_threshold")]
    pub uncertainty_threshold: f64,
    #[serde(default = "default_mad_k")]
    pub mad_k: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_scorers: default_min_scorers(),
            outlier_threshold: default_outlier_threshold(),
            uncertainty_threshold: default_uncertainty_threshold(),
            mad_k: default_mad_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScorerKeysConfig {
    pub statistical: Option<String>,
    pub rule_based: Option<String>,
    pub ml_based: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorersConfig {
    #[serde(default)]
    pub keys: ScorerKeysConfig,
    pub ml_weights_path: Option<String>,
    #[serde(default = "default_scorer_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for ScorersConfig {
    fn default() -> Self {
        Self {
            keys: ScorerKeysConfig::default(),
            ml_weights_path: None,
            deadline_ms: default_scorer_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_csv_max_size_mb")]
    pub csv_max_size_mb: u64,
    #[serde(default = "default_jsonl_max_size_mb")]
    pub jsonl_max_size_mb: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            csv_max_size_mb: default_csv_max_size_mb(),
            jsonl_max_size_mb: default_jsonl_max_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTuning {
    #[serde(default = "default_record_deadline_ms")]
    pub record_deadline_ms: u64,
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            record_deadline_ms: default_record_deadline_ms(),
            drain_deadline_ms: default_drain_deadline_ms(),
        }
    }
}

/// Top-level configuration object, matching the table in spec §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: CaptureMode,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub intel: IntelConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub scorers: ScorersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub pipeline: PipelineTuning,
    /// Free-form overrides not otherwise modeled, preserved for forward compatibility.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, CobaltError> {
        toml::from_str(s).map_err(|e| CobaltError::ConfigInvalid(e.to_string()))
    }

    /// Validates cross-field invariants beyond what serde/defaulting enforce.
    pub fn validate(&self) -> Result<(), CobaltError> {
        if self.enrichment.workers == 0 {
            return Err(CobaltError::ConfigInvalid(
                "enrichment.workers must be >= 1".into(),
            ));
        }
        if self.consensus.min_scorers == 0 {
            return Err(CobaltError::ConfigInvalid(
                "consensus.min_scorers must be >= 1".into(),
            ));
        }
        if self.mode == CaptureMode::Network && self.capture.interface.is_none() {
            return Err(CobaltError::ConfigInvalid(
                "capture.interface is required in network mode".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg = PipelineConfig::from_toml_str(r#"mode = "device""#).unwrap();
        assert_eq!(cfg.enrichment.workers, 4);
        assert_eq!(cfg.consensus.min_scorers, 2);
        assert!((cfg.consensus.outlier_threshold - 0.3).abs() < 1e-9);
        cfg.validate().unwrap();
    }

    #[test]
    fn network_mode_requires_interface() {
        let cfg = PipelineConfig::from_toml_str(r#"mode = "network""#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_config_invalid() {
        let err = PipelineConfig::from_toml_str("not valid = [[[").unwrap_err();
        assert!(matches!(err, CobaltError::ConfigInvalid(_)));
    }
}
