pub mod access;
pub mod amount;
pub mod billing;
pub mod config;
pub mod csv;
pub mod earnings;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod recorder;
pub mod rpc;
pub mod split;
pub mod volume;

pub use amount::Amount;
pub use config::EngineConfig;
pub use engine::{InMemoryBackend, SettlementEngine, SettlementError, Stores};
pub use model::{ChargeRequest, PassTier, PaymentModel, Receipt, SettlementRecord};
