//! Error types for settlement processing.

use thiserror::Error;

use crate::Amount;
use crate::model::{StaffId, SubjectId, VenueId};
use crate::split::SplitError;

/// Errors raised by a [`BalanceLedger`](crate::ledger::BalanceLedger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("no balance for subject {0}")]
    NotFound(SubjectId),

    #[error("balance of {subject} changed: expected version {expected}, found {actual}")]
    Conflict {
        subject: SubjectId,
        expected: u64,
        actual: u64,
    },

    #[error("insufficient funds for {subject}: available {available}, requested {requested}")]
    InsufficientFunds {
        subject: SubjectId,
        available: Amount,
        requested: Amount,
    },

    #[error("invalid ledger amount {0}")]
    InvalidAmount(Amount),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the other persistence seams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{store} unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },

    #[error("{store}: {id} not found")]
    NotFound { store: &'static str, id: String },

    #[error("{store} rejected write: {reason}")]
    Rejected { store: &'static str, reason: String },
}

impl StoreError {
    pub fn unavailable(store: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            store,
            reason: reason.into(),
        }
    }
}

/// Caller-visible error returned by [`SettlementEngine::charge`](super::SettlementEngine::charge).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("staff user {staff} may not charge at venue {venue}")]
    AccessDenied { staff: StaffId, venue: VenueId },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("charge amount must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        subject: SubjectId,
        available: Amount,
        requested: Amount,
    },

    #[error("fees of {deductions} exceed charge of {gross}")]
    FeeExceedsCharge { gross: Amount, deductions: Amount },

    #[error("balance of {subject} kept changing after {attempts} attempts, please retry")]
    Conflict { subject: SubjectId, attempts: u32 },

    #[error("settlement could not be recorded, charge was reversed: {reason}")]
    RecordingFailed { reason: String },

    #[error("derived update failed: {reason}")]
    AggregationFailed { reason: String },

    #[error("compensating credit of {amount} to {subject} failed: {reason}")]
    ReconciliationRequired {
        subject: SubjectId,
        amount: Amount,
        reason: String,
    },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl SettlementError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "validation_error",
            SettlementError::AccessDenied { .. } => "access_denied",
            SettlementError::NotFound { .. } => "not_found",
            SettlementError::InvalidAmount(_) => "invalid_amount",
            SettlementError::InsufficientFunds { .. } => "insufficient_funds",
            SettlementError::FeeExceedsCharge { .. } => "fee_exceeds_charge",
            SettlementError::Conflict { .. } => "conflict",
            SettlementError::RecordingFailed { .. } => "recording_failed",
            SettlementError::AggregationFailed { .. } => "aggregation_failed",
            SettlementError::ReconciliationRequired { .. } => "reconciliation_required",
            SettlementError::Unavailable(_) => "unavailable",
        }
    }

    /// HTTP-style status for the RPC boundary.
    pub fn status(&self) -> u16 {
        match self {
            SettlementError::Validation(_)
            | SettlementError::InvalidAmount(_)
            | SettlementError::InsufficientFunds { .. }
            | SettlementError::FeeExceedsCharge { .. } => 400,
            SettlementError::AccessDenied { .. } => 403,
            SettlementError::NotFound { .. } => 404,
            SettlementError::Conflict { .. } => 409,
            SettlementError::Unavailable(_)
            | SettlementError::RecordingFailed { .. }
            | SettlementError::AggregationFailed { .. }
            | SettlementError::ReconciliationRequired { .. } => 500,
        }
    }

    /// Whether submitting a new request may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::Conflict { .. }
                | SettlementError::RecordingFailed { .. }
                | SettlementError::Unavailable(_)
        )
    }
}

impl From<SplitError> for SettlementError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::InvalidAmount(amount) => SettlementError::InvalidAmount(amount),
            SplitError::FeeExceedsCharge { gross, deductions } => {
                SettlementError::FeeExceedsCharge { gross, deductions }
            }
            SplitError::Overflow => SettlementError::Validation("amount out of range".into()),
            SplitError::Rules(reason) => SettlementError::Unavailable(reason),
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(subject) => SettlementError::NotFound {
                entity: "balance",
                id: subject,
            },
            LedgerError::Conflict { subject, .. } => SettlementError::Conflict {
                subject,
                attempts: 1,
            },
            LedgerError::InsufficientFunds {
                subject,
                available,
                requested,
            } => SettlementError::InsufficientFunds {
                subject,
                available,
                requested,
            },
            LedgerError::InvalidAmount(amount) => SettlementError::InvalidAmount(amount),
            LedgerError::Unavailable(reason) => SettlementError::Unavailable(reason),
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        SettlementError::Unavailable(err.to_string())
    }
}
