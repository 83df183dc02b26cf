//! Settlement orchestrator.
//!
//! The engine takes a charge request, authorizes it, prices it, debits the
//! subject's balance and writes the settlement record. The debit, the record
//! and the reporting counters are separate writes with no shared
//! transaction: a charge that fails after the debit credits the funds back
//! before the error reaches the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::Amount;
use crate::billing::{SurchargeQuote, VolumeTierResolver};
use crate::config::{ConfigError, EngineConfig, SplitRules};
use crate::model::{
    Balance, ChargeRequest, NewSettlement, PaymentModel, Period, Promoter, Receipt,
};
use crate::split;

mod error;
pub use error::{LedgerError, SettlementError, StoreError};

pub mod saga;
pub use saga::{ChargeState, Compensation, DerivedUpdate, Saga};

mod stores;
pub use stores::{InMemoryBackend, Stores};

/// Source of "now" for timestamps and volume periods.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The settlement engine.
///
/// Holds no per-charge state; one instance can serve concurrent charges.
pub struct SettlementEngine {
    config: EngineConfig,
    stores: Stores,
    resolver: VolumeTierResolver,
    clock: Arc<dyn Clock>,
    /// Failed reporting updates awaiting
    /// [`retry_derived_updates`](Self::retry_derived_updates).
    backlog: Mutex<Vec<DerivedUpdate>>,
}

/// Public API
impl SettlementEngine {
    pub fn new(config: EngineConfig, stores: Stores) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = VolumeTierResolver::new(
            stores.billing.clone(),
            stores.volume.clone(),
            config.surcharge.clone(),
        );
        Ok(Self {
            config,
            stores,
            resolver,
            clock: Arc::new(SystemClock),
            backlog: Mutex::new(Vec::new()),
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one charge to completion.
    ///
    /// On error the subject's balance is as it was before the call, unless
    /// the error is [`SettlementError::ReconciliationRequired`].
    pub async fn charge(&self, request: ChargeRequest) -> Result<Receipt, SettlementError> {
        let mut saga = Saga::new();
        let result = match self.execute(&request, &mut saga).await {
            Ok(receipt) => Ok(receipt),
            Err(cause) => Err(self.compensate(&mut saga, cause).await),
        };
        debug!(subject = %request.subject, states = ?saga.history(), "charge finished");
        Self::log_result(&request, &result);
        result
    }

    /// Reporting updates still waiting to be applied.
    pub async fn pending_derived_updates(&self) -> Vec<DerivedUpdate> {
        self.backlog.lock().await.clone()
    }

    /// Replay queued reporting updates; returns how many are still pending.
    pub async fn retry_derived_updates(&self) -> usize {
        let pending = std::mem::take(&mut *self.backlog.lock().await);
        let mut failed = Vec::new();
        for update in pending {
            match self.apply_derived(&update).await {
                Ok(()) => debug!(update = ?update, "derived update replayed"),
                Err(err @ StoreError::NotFound { .. }) => Self::drop_derived(&update, &err),
                Err(err) => {
                    warn!(update = ?update, reason = %err, "derived update still failing");
                    failed.push(update);
                }
            }
        }
        let mut backlog = self.backlog.lock().await;
        backlog.extend(failed);
        backlog.len()
    }
}

/// Private API
impl SettlementEngine {
    fn log_result(request: &ChargeRequest, result: &Result<Receipt, SettlementError>) {
        let model = request.model.kind();
        match result {
            Ok(receipt) => {
                info!(
                    subject = %request.subject,
                    venue = %request.venue,
                    settlement = %receipt.record.id,
                    gross = %receipt.record.breakdown.gross_amount,
                    model = ?model,
                    "charge completed"
                );
            }
            Err(err) => {
                warn!(
                    subject = %request.subject,
                    venue = %request.venue,
                    model = ?model,
                    code = err.code(),
                    reason = %err,
                    "charge rejected"
                );
            }
        }
    }

    /// Walk the charge forward, registering compensations on `saga` as side effects land.
    async fn execute(
        &self,
        request: &ChargeRequest,
        saga: &mut Saga,
    ) -> Result<Receipt, SettlementError> {
        self.authorize(request).await?;

        let profile = self
            .stores
            .subjects
            .profile(&request.subject)
            .await?
            .ok_or_else(|| SettlementError::NotFound {
                entity: "subject",
                id: request.subject.clone(),
            })?;

        let mut balance = self.stores.ledger.open(&request.subject).await?;
        saga.advance(ChargeState::BalanceChecked);

        let now = self.clock.now();
        let period = Period::of(now);
        let promoter = self.resolve_promoter(&request.model).await?;

        let quote = self.resolver.resolve(&request.venue, &period).await?;
        if quote.consumed_waiver() {
            saga.register(Compensation::RestoreWaiver {
                venue: request.venue.clone(),
            });
        }

        let rules = self.split_rules(&request.venue, &quote)?;
        let breakdown = split::calculate(
            &request.model,
            quote.surcharge,
            promoter.is_some(),
            &rules,
            &self.config.pass_prices,
        )?;
        let gross = breakdown.gross_amount;

        let (previous_balance, debited) = self
            .debit(&request.subject, gross, &mut balance, saga)
            .await?;
        saga.advance(ChargeState::Debited);
        saga.register(Compensation::Credit {
            subject: request.subject.clone(),
            amount: gross,
        });

        let record = self
            .stores
            .settlements
            .insert(NewSettlement {
                subject: request.subject.clone(),
                venue: request.venue.clone(),
                staff: request.staff.clone(),
                promoter: promoter.as_ref().map(|p| p.id.clone()),
                payment_model: request.model.kind(),
                tier: match &request.model {
                    PaymentModel::TieredPass { tier, .. } => Some(*tier),
                    PaymentModel::Direct { .. } => None,
                },
                charge_type: request.charge_type.clone(),
                breakdown: breakdown.clone(),
                created_at: now,
            })
            .await
            .map_err(|err| SettlementError::RecordingFailed {
                reason: err.to_string(),
            })?;
        saga.advance(ChargeState::Recorded);
        saga.commit();

        self.apply_or_defer(DerivedUpdate::Volume {
            venue: request.venue.clone(),
            period,
            surcharge: breakdown.surcharge,
        })
        .await;
        if let Some(promoter) = &promoter {
            if breakdown.promoter_payout.is_positive() {
                self.apply_or_defer(DerivedUpdate::Earnings {
                    promoter: promoter.id.clone(),
                    amount: breakdown.promoter_payout,
                    settlement: record.id,
                })
                .await;
            }
        }
        saga.advance(ChargeState::Aggregated);
        saga.advance(ChargeState::Completed);

        Ok(Receipt {
            record,
            subject_label: profile.label,
            previous_balance,
            new_balance: debited.amount,
        })
    }

    async fn authorize(&self, request: &ChargeRequest) -> Result<(), SettlementError> {
        match (&request.staff, &request.model) {
            (Some(staff), _) => {
                if self
                    .stores
                    .authorizer
                    .is_permitted(staff, &request.venue)
                    .await?
                {
                    Ok(())
                } else {
                    Err(SettlementError::AccessDenied {
                        staff: staff.clone(),
                        venue: request.venue.clone(),
                    })
                }
            }
            // Self-service pass purchase by the subject.
            (None, PaymentModel::TieredPass { .. }) => Ok(()),
            (None, PaymentModel::Direct { .. }) => Err(SettlementError::Validation(
                "staffUserId is required for direct charges".into(),
            )),
        }
    }

    async fn resolve_promoter(
        &self,
        model: &PaymentModel,
    ) -> Result<Option<Promoter>, SettlementError> {
        let Some(code) = model.promoter_code() else {
            return Ok(None);
        };
        let promoter = self.stores.promoters.find_by_code(code).await?;
        if promoter.is_none() {
            debug!(code, "unknown referral code, promoter share goes to platform");
        }
        Ok(promoter)
    }

    fn split_rules(
        &self,
        venue: &str,
        quote: &SurchargeQuote,
    ) -> Result<SplitRules, SettlementError> {
        match quote.venue_share_bps {
            Some(bps) => self.config.split.with_venue_bps(bps).map_err(|err| {
                SettlementError::Unavailable(format!("billing config of venue {venue}: {err}"))
            }),
            None => Ok(self.config.split),
        }
    }

    /// Conditional debit, re-reading the balance on version conflicts.
    ///
    /// Returns the balance the debit was applied to and the balance after it.
    async fn debit(
        &self,
        subject: &str,
        gross: Amount,
        balance: &mut Balance,
        saga: &mut Saga,
    ) -> Result<(Amount, Balance), SettlementError> {
        let max_attempts = self.config.max_conflict_retries;
        let mut attempt = 1;
        loop {
            if balance.amount < gross {
                return Err(SettlementError::InsufficientFunds {
                    subject: subject.to_string(),
                    available: balance.amount,
                    requested: gross,
                });
            }

            match self
                .stores
                .ledger
                .debit(subject, gross, balance.version)
                .await
            {
                Ok(after) => return Ok((balance.amount, after)),
                Err(LedgerError::Conflict {
                    expected, actual, ..
                }) => {
                    if attempt >= max_attempts {
                        return Err(SettlementError::Conflict {
                            subject: subject.to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        subject = %subject,
                        expected,
                        actual,
                        attempt,
                        "balance changed during charge, retrying"
                    );
                    *balance = self.stores.ledger.read(subject).await?;
                    saga.advance(ChargeState::BalanceChecked);
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Replay registered compensations and produce the error the caller sees.
    async fn compensate(&self, saga: &mut Saga, cause: SettlementError) -> SettlementError {
        let mut outcome = cause;
        for step in saga.unwind() {
            match step {
                Compensation::Credit { subject, amount } => {
                    match self.stores.ledger.credit(&subject, amount).await {
                        Ok(balance) => {
                            info!(
                                subject = %subject,
                                amount = %amount,
                                balance = %balance.amount,
                                "debit reversed"
                            );
                        }
                        Err(err) => {
                            error!(
                                subject = %subject,
                                amount = %amount,
                                reason = %err,
                                "compensating credit failed, manual reconciliation required"
                            );
                            outcome = SettlementError::ReconciliationRequired {
                                subject,
                                amount,
                                reason: err.to_string(),
                            };
                        }
                    }
                }
                Compensation::RestoreWaiver { venue } => {
                    if let Err(err) = self.stores.billing.restore_waiver(&venue).await {
                        warn!(venue = %venue, reason = %err, "waiver credit not restored");
                    }
                }
            }
        }
        saga.fail();
        outcome
    }

    async fn apply_or_defer(&self, update: DerivedUpdate) {
        match self.apply_derived(&update).await {
            Ok(()) => {}
            Err(err @ StoreError::NotFound { .. }) => Self::drop_derived(&update, &err),
            Err(err) => {
                let err = SettlementError::AggregationFailed {
                    reason: err.to_string(),
                };
                warn!(update = ?update, reason = %err, "derived update failed, queued for retry");
                self.backlog.lock().await.push(update);
            }
        }
    }

    /// Discard an update whose target no longer exists.
    fn drop_derived(update: &DerivedUpdate, err: &StoreError) {
        error!(update = ?update, reason = %err, "derived update target missing, dropped");
    }

    async fn apply_derived(&self, update: &DerivedUpdate) -> Result<(), StoreError> {
        match update {
            DerivedUpdate::Volume {
                venue,
                period,
                surcharge,
            } => self
                .stores
                .volume
                .increment(venue, period, *surcharge)
                .await
                .map(|_| ()),
            DerivedUpdate::Earnings {
                promoter, amount, ..
            } => self
                .stores
                .promoters
                .add_pending_earnings(promoter, *amount)
                .await
                .map(|_| ()),
        }
    }
}
