//! Split calculator: turns a gross amount and payment model into a breakdown.
//!
//! Pure arithmetic over minor units. Ratio shares are truncated and the
//! platform share takes the remainder; the transaction fee is rounded once.
//! The resulting breakdown always satisfies
//! `venue_net + promoter_payout + platform_net == gross`.

use thiserror::Error;

use crate::Amount;
use crate::config::{PassPrices, SplitRules};
use crate::model::{Breakdown, PassShares, PaymentModel};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("charge amount must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("fees of {deductions} exceed charge of {gross}")]
    FeeExceedsCharge { gross: Amount, deductions: Amount },

    #[error("amount overflow")]
    Overflow,

    #[error("invalid split rules: {0}")]
    Rules(String),
}

/// Gross amount the subject pays under `model`.
pub fn gross_amount(model: &PaymentModel, prices: &PassPrices) -> Amount {
    match model {
        PaymentModel::TieredPass { tier, .. } => prices.price(*tier),
        PaymentModel::Direct { amount } => *amount,
    }
}

/// Compute the fee and share breakdown of one charge.
///
/// `promoter_resolved` is whether the referral code on a tiered pass
/// matched a promoter; when it did not, the promoter share goes to the
/// platform.
pub fn calculate(
    model: &PaymentModel,
    surcharge: Amount,
    promoter_resolved: bool,
    rules: &SplitRules,
    prices: &PassPrices,
) -> Result<Breakdown, SplitError> {
    if surcharge.is_negative() {
        return Err(SplitError::Rules(format!("negative surcharge {surcharge}")));
    }
    let gross = gross_amount(model, prices);
    if !gross.is_positive() {
        return Err(SplitError::InvalidAmount(gross));
    }
    if gross < surcharge {
        return Err(SplitError::FeeExceedsCharge {
            gross,
            deductions: surcharge,
        });
    }

    let breakdown = match model {
        PaymentModel::TieredPass { .. } => tiered(gross, surcharge, promoter_resolved, rules)?,
        PaymentModel::Direct { .. } => direct(gross, surcharge, rules)?,
    };
    debug_assert!(breakdown.is_balanced(), "unbalanced breakdown {breakdown:?}");
    Ok(breakdown)
}

fn tiered(
    gross: Amount,
    surcharge: Amount,
    promoter_resolved: bool,
    rules: &SplitRules,
) -> Result<Breakdown, SplitError> {
    let venue = gross.share_bps(rules.venue_bps);
    let promoter = gross.share_bps(rules.promoter_bps);
    let pool = gross.share_bps(rules.pool_bps);
    let platform = gross - venue - promoter - pool;
    if platform.is_negative() {
        return Err(SplitError::Rules("ratios exceed 100%".into()));
    }

    // Fee is taken from the venue's share, not the gross.
    let fee = venue.percent_bps(rules.transaction_fee_bps);
    let deductions = surcharge.checked_add(fee).ok_or(SplitError::Overflow)?;
    let venue_net = venue.checked_sub(deductions).ok_or(SplitError::Overflow)?;
    if venue_net.is_negative() {
        return Err(SplitError::FeeExceedsCharge { gross, deductions });
    }

    let (promoter_payout, unclaimed) = if promoter_resolved {
        (promoter, Amount::ZERO)
    } else {
        (Amount::ZERO, promoter)
    };

    Ok(Breakdown {
        gross_amount: gross,
        surcharge,
        transaction_fee: fee,
        venue_net,
        platform_net: platform + pool + unclaimed + deductions,
        promoter_payout,
        shares: Some(PassShares {
            venue,
            promoter,
            pool,
            platform,
        }),
    })
}

fn direct(gross: Amount, surcharge: Amount, rules: &SplitRules) -> Result<Breakdown, SplitError> {
    let fee = gross.percent_bps(rules.transaction_fee_bps);
    let deductions = surcharge.checked_add(fee).ok_or(SplitError::Overflow)?;
    let venue_net = gross.checked_sub(deductions).ok_or(SplitError::Overflow)?;
    if venue_net.is_negative() {
        return Err(SplitError::FeeExceedsCharge { gross, deductions });
    }

    Ok(Breakdown {
        gross_amount: gross,
        surcharge,
        transaction_fee: fee,
        venue_net,
        platform_net: deductions,
        promoter_payout: Amount::ZERO,
        shares: None,
    })
}
