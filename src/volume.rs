//! Rolling per-venue, per-month transaction volume.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Amount;
use crate::engine::StoreError;
use crate::model::{Period, VenueId, VolumeCounter};

#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Counter for `period`; an empty counter if the venue has none yet.
    async fn counter(&self, venue: &str, period: &Period) -> Result<VolumeCounter, StoreError>;

    /// Count one more transaction and add its surcharge to the period total.
    async fn increment(
        &self,
        venue: &str,
        period: &Period,
        surcharge: Amount,
    ) -> Result<VolumeCounter, StoreError>;
}

#[derive(Default)]
pub struct InMemoryVolumeStore {
    counters: RwLock<HashMap<(VenueId, Period), VolumeCounter>>,
    fail_on_increment: RwLock<bool>,
}

impl InMemoryVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_increment(&self, fail: bool) {
        *self.fail_on_increment.write().await = fail;
    }

    /// Overwrite a counter, e.g. to start a venue at a known volume.
    pub async fn seed(&self, counter: VolumeCounter) {
        let key = (counter.venue.clone(), counter.period.clone());
        self.counters.write().await.insert(key, counter);
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn counter(&self, venue: &str, period: &Period) -> Result<VolumeCounter, StoreError> {
        let key = (venue.to_string(), period.clone());
        Ok(self
            .counters
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(|| VolumeCounter::empty(venue, period.clone())))
    }

    async fn increment(
        &self,
        venue: &str,
        period: &Period,
        surcharge: Amount,
    ) -> Result<VolumeCounter, StoreError> {
        if *self.fail_on_increment.read().await {
            return Err(StoreError::unavailable("volume", "increment rejected by store"));
        }
        let key = (venue.to_string(), period.clone());
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(key)
            .or_insert_with(|| VolumeCounter::empty(venue, period.clone()));
        counter.transactions += 1;
        counter.surcharge_total += surcharge;
        Ok(counter.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn period(s: &str) -> Period {
        let (year, month) = s.split_once('-').unwrap();
        let at = Utc
            .with_ymd_and_hms(year.parse().unwrap(), month.parse().unwrap(), 1, 12, 0, 0)
            .unwrap();
        Period::of(at)
    }

    #[tokio::test]
    async fn missing_counter_reads_as_empty() {
        let store = InMemoryVolumeStore::new();
        let counter = store.counter("v1", &period("2026-10")).await.unwrap();
        assert_eq!(counter.transactions, 0);
        assert_eq!(counter.surcharge_total, Amount::ZERO);
    }

    #[tokio::test]
    async fn increment_accumulates_within_period() {
        let store = InMemoryVolumeStore::new();
        let oct = period("2026-10");
        store.increment("v1", &oct, Amount::from_minor(20)).await.unwrap();
        let counter = store.increment("v1", &oct, Amount::from_minor(15)).await.unwrap();
        assert_eq!(counter.transactions, 2);
        assert_eq!(counter.surcharge_total, Amount::from_minor(35));
    }

    #[tokio::test]
    async fn periods_and_venues_are_independent() {
        let store = InMemoryVolumeStore::new();
        store
            .increment("v1", &period("2026-10"), Amount::from_minor(20))
            .await
            .unwrap();

        let nov = store.counter("v1", &period("2026-11")).await.unwrap();
        assert_eq!(nov.transactions, 0);
        let other = store.counter("v2", &period("2026-10")).await.unwrap();
        assert_eq!(other.transactions, 0);
    }

    #[tokio::test]
    async fn injected_failure_leaves_counter_untouched() {
        let store = InMemoryVolumeStore::new();
        let oct = period("2026-10");
        store.set_fail_on_increment(true).await;
        assert!(store.increment("v1", &oct, Amount::from_minor(20)).await.is_err());
        assert_eq!(store.counter("v1", &oct).await.unwrap().transactions, 0);
    }
}
