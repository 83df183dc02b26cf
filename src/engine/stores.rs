use std::sync::Arc;

use crate::access::{InMemoryDirectory, SubjectDirectory, VenueAuthorizer};
use crate::billing::{BillingStore, InMemoryBillingStore};
use crate::config::EngineConfig;
use crate::earnings::{InMemoryPromoterStore, PromoterStore};
use crate::ledger::{BalanceLedger, InMemoryLedger};
use crate::recorder::{InMemorySettlementStore, SettlementStore};
use crate::volume::{InMemoryVolumeStore, VolumeStore};

/// Every persistence seam and collaborator the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn BalanceLedger>,
    pub billing: Arc<dyn BillingStore>,
    pub volume: Arc<dyn VolumeStore>,
    pub promoters: Arc<dyn PromoterStore>,
    pub settlements: Arc<dyn SettlementStore>,
    pub authorizer: Arc<dyn VenueAuthorizer>,
    pub subjects: Arc<dyn SubjectDirectory>,
}

/// Concrete in-memory stores, kept typed so callers can seed and inspect them.
#[derive(Clone)]
pub struct InMemoryBackend {
    pub ledger: Arc<InMemoryLedger>,
    pub billing: Arc<InMemoryBillingStore>,
    pub volume: Arc<InMemoryVolumeStore>,
    pub promoters: Arc<InMemoryPromoterStore>,
    pub settlements: Arc<InMemorySettlementStore>,
    pub directory: Arc<InMemoryDirectory>,
}

impl InMemoryBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            billing: Arc::new(InMemoryBillingStore::from_config(config)),
            volume: Arc::new(InMemoryVolumeStore::new()),
            promoters: Arc::new(InMemoryPromoterStore::new()),
            settlements: Arc::new(InMemorySettlementStore::new()),
            directory: Arc::new(InMemoryDirectory::new()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            ledger: self.ledger.clone(),
            billing: self.billing.clone(),
            volume: self.volume.clone(),
            promoters: self.promoters.clone(),
            settlements: self.settlements.clone(),
            authorizer: self.directory.clone(),
            subjects: self.directory.clone(),
        }
    }
}
