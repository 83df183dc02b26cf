//! Append-only store of settlement records.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::StoreError;
use crate::model::{NewSettlement, SettlementId, SettlementRecord};

/// System of record for completed charges. There is no update or delete.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Persist a settlement and return it with its generated id.
    async fn insert(&self, settlement: NewSettlement) -> Result<SettlementRecord, StoreError>;

    async fn get(&self, id: SettlementId) -> Result<Option<SettlementRecord>, StoreError>;

    /// Records for a venue in insertion order.
    async fn list_for_venue(&self, venue: &str) -> Result<Vec<SettlementRecord>, StoreError>;
}

#[derive(Default)]
pub struct InMemorySettlementStore {
    records: RwLock<Vec<SettlementRecord>>,
    fail_on_insert: RwLock<bool>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<SettlementRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn insert(&self, settlement: NewSettlement) -> Result<SettlementRecord, StoreError> {
        if *self.fail_on_insert.read().await {
            return Err(StoreError::unavailable("settlements", "insert rejected by store"));
        }
        if !settlement.breakdown.is_balanced() {
            return Err(StoreError::Rejected {
                store: "settlements",
                reason: format!(
                    "breakdown does not sum to gross {}",
                    settlement.breakdown.gross_amount
                ),
            });
        }
        let record = SettlementRecord::completed(Uuid::new_v4(), settlement);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: SettlementId) -> Result<Option<SettlementRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_for_venue(&self, venue: &str) -> Result<Vec<SettlementRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.venue_id == venue)
            .cloned()
            .collect())
    }
}
