//! Core domain types for the settlement engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Amount;

/// Customer account identifier (owner of a prepaid balance).
pub type SubjectId = String;

/// Venue identifier.
pub type VenueId = String;

/// Staff / operator user identifier.
pub type StaffId = String;

/// Promoter (affiliate) identifier.
pub type PromoterId = String;

/// Settlement record identifier, generated at insert time.
pub type SettlementId = Uuid;

/// Fixed price points for tiered passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTier {
    Basic,
    Standard,
    Premium,
}

impl fmt::Display for PassTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassTier::Basic => "basic",
            PassTier::Standard => "standard",
            PassTier::Premium => "premium",
        };
        f.write_str(name)
    }
}

/// How the gross of a charge is determined and split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentModel {
    /// Fixed-price pass split between venue, promoter, pool and platform.
    TieredPass {
        tier: PassTier,
        promoter_code: Option<String>,
    },
    /// Caller-supplied amount owed to the venue minus fees.
    Direct { amount: Amount },
}

impl PaymentModel {
    pub fn kind(&self) -> PaymentKind {
        match self {
            PaymentModel::TieredPass { .. } => PaymentKind::TieredPass,
            PaymentModel::Direct { .. } => PaymentKind::Direct,
        }
    }

    pub fn promoter_code(&self) -> Option<&str> {
        match self {
            PaymentModel::TieredPass { promoter_code, .. } => promoter_code.as_deref(),
            PaymentModel::Direct { .. } => None,
        }
    }
}

/// Tag of a [`PaymentModel`], as persisted on the settlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    TieredPass,
    Direct,
}

/// A validated charge request entering the orchestrator.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub venue: VenueId,
    pub subject: SubjectId,
    /// `None` only for self-service pass purchases.
    pub staff: Option<StaffId>,
    /// Free-form label for direct charges ("bar_tab", "merch", ...).
    pub charge_type: Option<String>,
    pub model: PaymentModel,
}

/// A subject's spendable balance with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub subject: SubjectId,
    pub amount: Amount,
    /// Bumped on every write; debits must present the version they read.
    pub version: u64,
}

impl Balance {
    pub fn empty(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
            amount: Amount::ZERO,
            version: 0,
        }
    }
}

/// Per-venue billing settings consumed by the tier resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    pub venue: VenueId,
    /// Surcharge charged below the first volume step.
    pub base_surcharge: Amount,
    /// Remaining transactions with the surcharge waived.
    pub waiver_credits: u32,
    /// Venue's share of tiered passes; `None` uses the configured default.
    pub venue_share_bps: Option<u32>,
    /// Fixed surcharge bypassing the volume table.
    pub surcharge_override: Option<Amount>,
}

/// Calendar month (UTC) used to key volume counters, formatted `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(String);

impl Period {
    pub fn of(at: DateTime<Utc>) -> Self {
        Period(at.format("%Y-%m").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction volume of a venue within one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCounter {
    pub venue: VenueId,
    pub period: Period,
    pub transactions: u64,
    pub surcharge_total: Amount,
}

impl VolumeCounter {
    pub fn empty(venue: impl Into<VenueId>, period: Period) -> Self {
        Self {
            venue: venue.into(),
            period,
            transactions: 0,
            surcharge_total: Amount::ZERO,
        }
    }
}

/// A referring promoter and their running earnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promoter {
    pub id: PromoterId,
    pub referral_code: String,
    pub pending_earnings: Amount,
}

/// Four-way ratio split of a tiered pass gross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassShares {
    pub venue: Amount,
    pub promoter: Amount,
    pub pool: Amount,
    pub platform: Amount,
}

impl PassShares {
    pub fn total(&self) -> Amount {
        self.venue + self.promoter + self.pool + self.platform
    }
}

/// Fee and share breakdown of one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub gross_amount: Amount,
    pub surcharge: Amount,
    pub transaction_fee: Amount,
    pub venue_net: Amount,
    /// Includes the pool share and any unclaimed promoter share.
    pub platform_net: Amount,
    /// Amount credited to the promoter's pending earnings.
    pub promoter_payout: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<PassShares>,
}

impl Breakdown {
    /// Whether every minor unit of the gross is accounted for.
    pub fn is_balanced(&self) -> bool {
        let nets_balanced =
            self.venue_net + self.promoter_payout + self.platform_net == self.gross_amount;
        let shares_balanced = self
            .shares
            .map(|s| s.total() == self.gross_amount)
            .unwrap_or(true);
        nets_balanced && shares_balanced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Completed,
}

/// Settlement data handed to the recorder; the id is assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSettlement {
    pub subject: SubjectId,
    pub venue: VenueId,
    pub staff: Option<StaffId>,
    pub promoter: Option<PromoterId>,
    pub payment_model: PaymentKind,
    pub tier: Option<PassTier>,
    pub charge_type: Option<String>,
    pub breakdown: Breakdown,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger entry for a completed charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub subject_id: SubjectId,
    pub venue_id: VenueId,
    pub staff_user_id: Option<StaffId>,
    pub promoter_id: Option<PromoterId>,
    pub payment_model: PaymentKind,
    pub tier: Option<PassTier>,
    pub charge_type: Option<String>,
    pub breakdown: Breakdown,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn completed(id: SettlementId, new: NewSettlement) -> Self {
        Self {
            id,
            subject_id: new.subject,
            venue_id: new.venue,
            staff_user_id: new.staff,
            promoter_id: new.promoter,
            payment_model: new.payment_model,
            tier: new.tier,
            charge_type: new.charge_type,
            breakdown: new.breakdown,
            status: SettlementStatus::Completed,
            created_at: new.created_at,
        }
    }
}

/// What the orchestrator hands back for a completed charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub record: SettlementRecord,
    pub subject_label: String,
    pub previous_balance: Amount,
    pub new_balance: Amount,
}
