//! Venue billing configuration and the volume tier resolver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::Amount;
use crate::config::{EngineConfig, SurchargeSchedule};
use crate::engine::StoreError;
use crate::model::{BillingConfig, Period, VenueId};
use crate::volume::VolumeStore;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// The venue's billing config, created with defaults on first use.
    async fn get_or_create(&self, venue: &str) -> Result<BillingConfig, StoreError>;

    /// Consume one waiver credit if any remain; `false` when none were left.
    async fn take_waiver(&self, venue: &str) -> Result<bool, StoreError>;

    /// Give back a credit consumed by a charge that did not complete.
    async fn restore_waiver(&self, venue: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    configs: RwLock<HashMap<VenueId, BillingConfig>>,
    default_base_surcharge: Amount,
    default_waiver_credits: u32,
    fail_on_read: RwLock<bool>,
}

impl InMemoryBillingStore {
    pub fn new(default_base_surcharge: Amount, default_waiver_credits: u32) -> Self {
        Self {
            default_base_surcharge,
            default_waiver_credits,
            ..Self::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.surcharge.base, config.default_waiver_credits)
    }

    pub fn defaults_for(&self, venue: &str) -> BillingConfig {
        BillingConfig {
            venue: venue.to_string(),
            base_surcharge: self.default_base_surcharge,
            waiver_credits: self.default_waiver_credits,
            venue_share_bps: None,
            surcharge_override: None,
        }
    }

    /// Insert or replace a venue's config (venue administration).
    pub async fn upsert(&self, config: BillingConfig) {
        self.configs
            .write()
            .await
            .insert(config.venue.clone(), config);
    }

    pub async fn get(&self, venue: &str) -> Option<BillingConfig> {
        self.configs.read().await.get(venue).cloned()
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn get_or_create(&self, venue: &str) -> Result<BillingConfig, StoreError> {
        if *self.fail_on_read.read().await {
            return Err(StoreError::unavailable("billing", "read rejected by store"));
        }
        let mut configs = self.configs.write().await;
        let config = configs
            .entry(venue.to_string())
            .or_insert_with(|| self.defaults_for(venue));
        Ok(config.clone())
    }

    async fn take_waiver(&self, venue: &str) -> Result<bool, StoreError> {
        let mut configs = self.configs.write().await;
        let config = configs
            .entry(venue.to_string())
            .or_insert_with(|| self.defaults_for(venue));
        if config.waiver_credits == 0 {
            return Ok(false);
        }
        config.waiver_credits -= 1;
        Ok(true)
    }

    async fn restore_waiver(&self, venue: &str) -> Result<(), StoreError> {
        let mut configs = self.configs.write().await;
        let config = configs.get_mut(venue).ok_or_else(|| StoreError::NotFound {
            store: "billing",
            id: venue.to_string(),
        })?;
        config.waiver_credits += 1;
        Ok(())
    }
}

/// Where a resolved surcharge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurchargeSource {
    /// A waiver credit was consumed; the surcharge is zero.
    Waiver,
    /// The venue has a manual override.
    Override,
    /// Looked up from the volume table.
    Volume { transactions: u64 },
}

/// Surcharge to apply to one charge, plus the venue settings it was priced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurchargeQuote {
    pub surcharge: Amount,
    pub source: SurchargeSource,
    pub venue_share_bps: Option<u32>,
}

impl SurchargeQuote {
    pub fn consumed_waiver(&self) -> bool {
        self.source == SurchargeSource::Waiver
    }
}

/// Maps a venue's monthly volume to its per-transaction surcharge.
pub struct VolumeTierResolver {
    billing: Arc<dyn BillingStore>,
    volume: Arc<dyn VolumeStore>,
    schedule: SurchargeSchedule,
}

impl VolumeTierResolver {
    pub fn new(
        billing: Arc<dyn BillingStore>,
        volume: Arc<dyn VolumeStore>,
        schedule: SurchargeSchedule,
    ) -> Self {
        Self {
            billing,
            volume,
            schedule,
        }
    }

    /// Resolve the surcharge for one charge at `venue` during `period`.
    ///
    /// Consumes a waiver credit when one is available, so call at most once
    /// per charge. The volume is read as of now, before this charge counts.
    pub async fn resolve(
        &self,
        venue: &str,
        period: &Period,
    ) -> Result<SurchargeQuote, StoreError> {
        let config = self.billing.get_or_create(venue).await?;

        if config.waiver_credits > 0 && self.billing.take_waiver(venue).await? {
            debug!(venue = %venue, remaining = config.waiver_credits - 1, "surcharge waived");
            return Ok(SurchargeQuote {
                surcharge: Amount::ZERO,
                source: SurchargeSource::Waiver,
                venue_share_bps: config.venue_share_bps,
            });
        }

        if let Some(surcharge) = config.surcharge_override {
            return Ok(SurchargeQuote {
                surcharge,
                source: SurchargeSource::Override,
                venue_share_bps: config.venue_share_bps,
            });
        }

        let counter = self.volume.counter(venue, period).await?;
        Ok(SurchargeQuote {
            surcharge: self
                .schedule
                .surcharge_for(config.base_surcharge, counter.transactions),
            source: SurchargeSource::Volume {
                transactions: counter.transactions,
            },
            venue_share_bps: config.venue_share_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VolumeCounter;
    use crate::volume::InMemoryVolumeStore;
    use chrono::{TimeZone, Utc};

    fn oct() -> Period {
        Period::of(Utc.with_ymd_and_hms(2026, 10, 18, 20, 0, 0).unwrap())
    }

    fn setup(
        waivers: u32,
    ) -> (
        Arc<InMemoryBillingStore>,
        Arc<InMemoryVolumeStore>,
        VolumeTierResolver,
    ) {
        let billing = Arc::new(InMemoryBillingStore::new(Amount::from_minor(20), waivers));
        let volume = Arc::new(InMemoryVolumeStore::new());
        let resolver =
            VolumeTierResolver::new(billing.clone(), volume.clone(), SurchargeSchedule::default());
        (billing, volume, resolver)
    }

    #[tokio::test]
    async fn new_venue_gets_base_surcharge() {
        let (billing, _, resolver) = setup(0);
        let quote = resolver.resolve("v1", &oct()).await.unwrap();
        assert_eq!(quote.surcharge, Amount::from_minor(20));
        assert_eq!(quote.source, SurchargeSource::Volume { transactions: 0 });
        assert!(billing.get("v1").await.is_some());
    }

    #[tokio::test]
    async fn higher_volume_lowers_surcharge() {
        let (_, volume, resolver) = setup(0);
        volume
            .seed(VolumeCounter {
                venue: "v1".into(),
                period: oct(),
                transactions: 2_500,
                surcharge_total: Amount::ZERO,
            })
            .await;
        let quote = resolver.resolve("v1", &oct()).await.unwrap();
        assert_eq!(quote.surcharge, Amount::from_minor(10));
    }

    #[tokio::test]
    async fn override_bypasses_volume_table() {
        let (billing, _, resolver) = setup(0);
        let mut config = billing.defaults_for("v1");
        config.surcharge_override = Some(Amount::from_minor(3));
        billing.upsert(config).await;

        let quote = resolver.resolve("v1", &oct()).await.unwrap();
        assert_eq!(quote.surcharge, Amount::from_minor(3));
        assert_eq!(quote.source, SurchargeSource::Override);
    }

    #[tokio::test]
    async fn waiver_credits_are_consumed_one_per_charge() {
        let (billing, _, resolver) = setup(2);

        for _ in 0..2 {
            let quote = resolver.resolve("v1", &oct()).await.unwrap();
            assert_eq!(quote.surcharge, Amount::ZERO);
            assert!(quote.consumed_waiver());
        }
        let quote = resolver.resolve("v1", &oct()).await.unwrap();
        assert_eq!(quote.surcharge, Amount::from_minor(20));
        assert_eq!(billing.get("v1").await.unwrap().waiver_credits, 0);
    }

    #[tokio::test]
    async fn quote_carries_venue_share_override() {
        let (billing, _, resolver) = setup(0);
        let mut config = billing.defaults_for("v1");
        config.venue_share_bps = Some(4_000);
        billing.upsert(config).await;
        let quote = resolver.resolve("v1", &oct()).await.unwrap();
        assert_eq!(quote.venue_share_bps, Some(4_000));
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let (billing, _, resolver) = setup(0);
        billing.set_fail_on_read(true).await;
        assert!(resolver.resolve("v1", &oct()).await.is_err());
    }
}
