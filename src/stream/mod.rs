//! Supervised venue stream consumption.
//!
//! A [`StreamSupervisor`] owns one logical venue stream end to end: it
//! connects, replays the subscription set, pumps events onto the bus, and on
//! any failure reconnects with capped exponential backoff.

pub mod supervisor;

pub use supervisor::{BackoffPolicy, StreamSupervisor, SupervisorHandle};

use crate::domain::InstrumentId;
use crate::venue::SubscriptionTopic;
use std::collections::{BTreeMap, BTreeSet};

/// The desired subscription state of one stream, kept across reconnects.
///
/// Ordered containers so replay after a reconnect is deterministic.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    topics: BTreeMap<SubscriptionTopic, BTreeSet<InstrumentId>>,
}

impl SubscriptionSet {
    /// Add instruments under a topic, returning only the ids that were not
    /// already present (the ones that need a wire subscribe).
    pub fn add(&mut self, topic: SubscriptionTopic, ids: &[InstrumentId]) -> Vec<InstrumentId> {
        let set = self.topics.entry(topic).or_default();
        ids.iter()
            .filter(|id| set.insert((*id).clone()))
            .cloned()
            .collect()
    }

    /// Remove instruments under a topic, returning only the ids that were
    /// actually present.
    pub fn remove(&mut self, topic: SubscriptionTopic, ids: &[InstrumentId]) -> Vec<InstrumentId> {
        let Some(set) = self.topics.get_mut(&topic) else {
            return Vec::new();
        };
        ids.iter().filter(|id| set.remove(id)).cloned().collect()
    }

    /// Non-empty (topic, ids) pairs in deterministic order, for replay.
    pub fn entries(&self) -> Vec<(SubscriptionTopic, Vec<InstrumentId>)> {
        self.topics
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(topic, ids)| (*topic, ids.iter().cloned().collect()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.values().all(BTreeSet::is_empty)
    }
}
