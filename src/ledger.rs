//! Balance ledger: the only shared numeric resource a charge mutates.
//!
//! Every write is conditional on state read under the same lock. Debits
//! additionally require the caller to present the version it priced the
//! charge against, so two racing debits cannot both succeed.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Amount;
use crate::engine::LedgerError;
use crate::model::{Balance, SubjectId};

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance and version; `NotFound` if the subject has no row yet.
    async fn read(&self, subject: &str) -> Result<Balance, LedgerError>;

    /// Read the balance, creating a zero row first if none exists.
    async fn open(&self, subject: &str) -> Result<Balance, LedgerError>;

    /// Debit `amount` if the stored version still equals `expected_version`.
    async fn debit(
        &self,
        subject: &str,
        amount: Amount,
        expected_version: u64,
    ) -> Result<Balance, LedgerError>;

    /// Credit `amount` back. Only used to compensate a prior debit.
    async fn credit(&self, subject: &str, amount: Amount) -> Result<Balance, LedgerError>;
}

/// In-memory ledger with switchable failure injection.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<SubjectId, Balance>>,
    fail_on_debit: RwLock<bool>,
    fail_on_credit: RwLock<bool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a subject's balance outright, bumping its version.
    pub async fn seed(&self, subject: impl Into<SubjectId>, amount: Amount) {
        debug_assert!(!amount.is_negative(), "seeded negative balance {amount}");
        let subject = subject.into();
        let mut balances = self.balances.write().await;
        let entry = balances
            .entry(subject.clone())
            .or_insert_with(|| Balance::empty(subject));
        entry.amount = amount;
        entry.version += 1;
    }

    pub async fn set_fail_on_debit(&self, fail: bool) {
        *self.fail_on_debit.write().await = fail;
    }

    pub async fn set_fail_on_credit(&self, fail: bool) {
        *self.fail_on_credit.write().await = fail;
    }

    /// Snapshot of all balances, sorted by subject.
    pub async fn balances(&self) -> Vec<Balance> {
        let mut all: Vec<Balance> = self.balances.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.subject.cmp(&b.subject));
        all
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn read(&self, subject: &str) -> Result<Balance, LedgerError> {
        self.balances
            .read()
            .await
            .get(subject)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(subject.to_string()))
    }

    async fn open(&self, subject: &str) -> Result<Balance, LedgerError> {
        let mut balances = self.balances.write().await;
        let balance = balances
            .entry(subject.to_string())
            .or_insert_with(|| Balance::empty(subject));
        Ok(balance.clone())
    }

    async fn debit(
        &self,
        subject: &str,
        amount: Amount,
        expected_version: u64,
    ) -> Result<Balance, LedgerError> {
        if *self.fail_on_debit.read().await {
            return Err(LedgerError::Unavailable("debit rejected by store".into()));
        }
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut balances = self.balances.write().await;
        let balance = balances
            .get_mut(subject)
            .ok_or_else(|| LedgerError::NotFound(subject.to_string()))?;

        if balance.version != expected_version {
            return Err(LedgerError::Conflict {
                subject: subject.to_string(),
                expected: expected_version,
                actual: balance.version,
            });
        }

        if amount > balance.amount {
            return Err(LedgerError::InsufficientFunds {
                subject: subject.to_string(),
                available: balance.amount,
                requested: amount,
            });
        }

        balance.amount -= amount;
        balance.version += 1;
        Ok(balance.clone())
    }

    async fn credit(&self, subject: &str, amount: Amount) -> Result<Balance, LedgerError> {
        if *self.fail_on_credit.read().await {
            return Err(LedgerError::Unavailable("credit rejected by store".into()));
        }
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut balances = self.balances.write().await;
        let balance = balances
            .get_mut(subject)
            .ok_or_else(|| LedgerError::NotFound(subject.to_string()))?;

        balance.amount = balance
            .amount
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount(amount))?;
        balance.version += 1;
        Ok(balance.clone())
    }
}
