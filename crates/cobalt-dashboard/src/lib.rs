//! Read-only, in-process dashboard feed (spec §6.4).
//!
//! Built directly on `tokio::sync::broadcast`: fan-out to every
//! subscriber comes for free, and a subscriber that falls behind gets
//! `Lagged(n)` on its next `recv` rather than blocking the publisher --
//! exactly the "lossy per subscriber, oldest item dropped" contract the
//! spec calls for, so there is nothing bespoke to build here.

use std::collections::HashMap;

use cobalt_common::record::ConsensusAssessment;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntelHealth {
    Ok,
    RateLimited,
    Unavailable,
}

/// Counters maintained by the pipeline orchestrator (spec §4.8 item 4).
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub records_accepted: u64,
    pub records_dropped: u64,
    pub enrichment_partials: u64,
    pub scorer_vote_rejections: HashMap<String, u64>,
    pub storage_degradations: u64,
    pub exporter_errors: u64,
}

/// `{storage, exporter_jsonl, exporter_csv, intel.{geo,vt,abuseipdb}}` from
/// spec §6.4.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub storage: ComponentHealth,
    pub exporter_jsonl: ComponentHealth,
    pub exporter_csv: ComponentHealth,
    pub intel_geo: IntelHealth,
    pub intel_vt: IntelHealth,
    pub intel_abuseipdb: IntelHealth,
}

#[derive(Debug, Clone)]
pub enum FeedItem {
    Assessment(Box<ConsensusAssessment>),
    Counters(Counters),
    Health(HealthSnapshot),
}

const DEFAULT_CAPACITY: usize = 1024;

/// Publisher handle owned by the pipeline orchestrator.
#[derive(Clone)]
pub struct FeedBus {
    tx: broadcast::Sender<FeedItem>,
}

impl FeedBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscribers only see items published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedItem> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers attached is not an error -- the
    /// dashboard is an optional, out-of-scope consumer (spec §6.4).
    pub fn publish_assessment(&self, assessment: ConsensusAssessment) {
        let _ = self.tx.send(FeedItem::Assessment(Box::new(assessment)));
    }

    pub fn publish_counters(&self, counters: Counters) {
        let _ = self.tx.send(FeedItem::Counters(counters));
    }

    pub fn publish_health(&self, health: HealthSnapshot) {
        let _ = self.tx.send(FeedItem::Health(health));
    }
}

impl Default for FeedBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_common::timestamp::Timestamp;

    fn assessment() -> ConsensusAssessment {
        ConsensusAssessment {
            dst_ip: "8.8.8.8".into(),
            dst_port: 443,
            timestamp: Timestamp(0.0),
            consensus_score: 0.1,
            confidence: 0.5,
            method: "median_bft".into(),
            votes: vec![],
            outliers: vec![],
            high_uncertainty: false,
            score_spread: 0.0,
            num_scorers: 3,
            num_outliers: 0,
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_same_item() {
        let bus = FeedBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish_assessment(assessment());

        let item_a = a.recv().await.unwrap();
        let item_b = b.recv().await.unwrap();
        assert!(matches!(item_a, FeedItem::Assessment(_)));
        assert!(matches!(item_b, FeedItem::Assessment(_)));
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_instead_of_blocking_publisher() {
        let bus = FeedBus::with_capacity(2);
        let mut slow = bus.subscribe();
        for _ in 0..5 {
            bus.publish_assessment(assessment());
        }
        // The publisher above never blocked despite `slow` not having
        // drained anything; `slow` now observes a lag instead.
        let result = slow.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = FeedBus::new();
        bus.publish_counters(Counters::default());
    }
}
