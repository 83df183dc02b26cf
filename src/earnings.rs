//! Promoter lookup by referral code and pending-earnings updates.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Amount;
use crate::engine::StoreError;
use crate::model::{Promoter, PromoterId};

#[async_trait]
pub trait PromoterStore: Send + Sync {
    /// Resolve a referral code; codes match case-insensitively, ignoring surrounding whitespace.
    async fn find_by_code(&self, code: &str) -> Result<Option<Promoter>, StoreError>;

    /// Add `amount` to the promoter's pending earnings.
    async fn add_pending_earnings(
        &self,
        promoter: &str,
        amount: Amount,
    ) -> Result<Promoter, StoreError>;
}

#[derive(Default)]
pub struct InMemoryPromoterStore {
    promoters: RwLock<HashMap<PromoterId, Promoter>>,
    fail_on_update: RwLock<bool>,
}

impl InMemoryPromoterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: impl Into<PromoterId>, referral_code: impl Into<String>) {
        let id = id.into();
        let promoter = Promoter {
            id: id.clone(),
            referral_code: referral_code.into(),
            pending_earnings: Amount::ZERO,
        };
        self.promoters.write().await.insert(id, promoter);
    }

    pub async fn get(&self, id: &str) -> Option<Promoter> {
        self.promoters.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Promoter> {
        self.promoters.write().await.remove(id)
    }

    pub async fn set_fail_on_update(&self, fail: bool) {
        *self.fail_on_update.write().await = fail;
    }
}

#[async_trait]
impl PromoterStore for InMemoryPromoterStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Promoter>, StoreError> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }
        Ok(self
            .promoters
            .read()
            .await
            .values()
            .find(|p| p.referral_code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn add_pending_earnings(
        &self,
        promoter: &str,
        amount: Amount,
    ) -> Result<Promoter, StoreError> {
        if *self.fail_on_update.read().await {
            return Err(StoreError::unavailable("promoters", "update rejected by store"));
        }
        let mut promoters = self.promoters.write().await;
        let entry = promoters
            .get_mut(promoter)
            .ok_or_else(|| StoreError::NotFound {
                store: "promoters",
                id: promoter.to_string(),
            })?;
        entry.pending_earnings += amount;
        Ok(entry.clone())
    }
}
