use crate::models::DepthTier;
use std::collections::BTreeMap;

/// One configured tier: who serves it and where its diffs are published.
#[derive(Debug, Clone)]
pub struct TierEntry<P> {
    pub tier: DepthTier,
    pub provider: P,
    pub topic: String,
}

/// Maps configured depth tiers to their providers.
///
/// Populated once at startup, then shared read-only (behind an `Arc`) by
/// request handlers, so lookups take no lock.
#[derive(Debug, Clone)]
pub struct TierRegistry<P> {
    tiers: BTreeMap<DepthTier, TierEntry<P>>,
}

impl<P> Default for TierRegistry<P> {
    fn default() -> Self {
        Self {
            tiers: BTreeMap::new(),
        }
    }
}

impl<P> TierRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tier`, replacing any previous entry for it.
    pub fn configure(&mut self, tier: DepthTier, provider: P, topic: impl Into<String>) {
        let topic = topic.into();
        tracing::debug!(%tier, topic = %topic, "tier configured");
        self.tiers.insert(
            tier,
            TierEntry {
                tier,
                provider,
                topic,
            },
        );
    }

    /// Smallest tier that can serve `requested_size` levels, or the largest
    /// tier when none is big enough. `None` only if nothing is configured.
    pub fn resolve(&self, requested_size: u32) -> Option<&TierEntry<P>> {
        self.tiers
            .range(DepthTier(requested_size)..)
            .next()
            .or_else(|| self.tiers.iter().next_back())
            .map(|(_, entry)| entry)
    }

    pub fn by_topic(&self, topic: &str) -> Option<&TierEntry<P>> {
        self.tiers.values().find(|entry| entry.topic == topic)
    }

    pub fn largest(&self) -> Option<&TierEntry<P>> {
        self.tiers.values().next_back()
    }

    /// Configured tiers in ascending order.
    pub fn tiers(&self) -> impl Iterator<Item = &TierEntry<P>> {
        self.tiers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}
