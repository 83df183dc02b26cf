//! Engine configuration.
//!
//! Every policy number (split ratios, fee rate, pass prices, surcharge
//! steps) lives here and is passed into the engine explicitly. A JSON file
//! may override any subset of the defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::BPS_DENOMINATOR;
use crate::model::PassTier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub split: SplitRules,
    pub pass_prices: PassPrices,
    pub surcharge: SurchargeSchedule,
    /// Waiver credits granted to a venue whose billing config is created lazily.
    pub default_waiver_credits: u32,
    /// Debit attempts made before a version conflict is surfaced.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            split: SplitRules::default(),
            pass_prices: PassPrices::default(),
            surcharge: SurchargeSchedule::default(),
            default_waiver_credits: 0,
            max_conflict_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.split.validate()?;
        self.pass_prices.validate()?;
        self.surcharge.validate()?;
        if self.max_conflict_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_conflict_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Tiered-pass ratios and the transaction fee rate, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRules {
    pub venue_bps: u32,
    pub promoter_bps: u32,
    pub pool_bps: u32,
    pub platform_bps: u32,
    pub transaction_fee_bps: u32,
}

impl Default for SplitRules {
    fn default() -> Self {
        Self {
            venue_bps: 3_000,
            promoter_bps: 2_000,
            pool_bps: 1_000,
            platform_bps: 4_000,
            transaction_fee_bps: 150,
        }
    }
}

impl SplitRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = self.venue_bps as i64
            + self.promoter_bps as i64
            + self.pool_bps as i64
            + self.platform_bps as i64;
        if total != BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "split ratios must sum to {BPS_DENOMINATOR} bps, got {total}"
            )));
        }
        if self.transaction_fee_bps as i64 > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "transaction fee of {} bps exceeds 100%",
                self.transaction_fee_bps
            )));
        }
        Ok(())
    }

    /// Rules with the venue ratio replaced; the platform ratio absorbs the difference.
    pub fn with_venue_bps(&self, venue_bps: u32) -> Result<Self, ConfigError> {
        let others = self.promoter_bps as i64 + self.pool_bps as i64;
        let platform = BPS_DENOMINATOR - others - venue_bps as i64;
        if platform < 0 {
            return Err(ConfigError::Invalid(format!(
                "venue ratio of {venue_bps} bps leaves no room for promoter and pool"
            )));
        }
        Ok(Self {
            venue_bps,
            platform_bps: platform as u32,
            ..*self
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassPrices {
    pub basic: Amount,
    pub standard: Amount,
    pub premium: Amount,
}

impl Default for PassPrices {
    fn default() -> Self {
        Self {
            basic: Amount::from_minor(1_000),
            standard: Amount::from_minor(2_000),
            premium: Amount::from_minor(5_000),
        }
    }
}

impl PassPrices {
    pub fn price(&self, tier: PassTier) -> Amount {
        match tier {
            PassTier::Basic => self.basic,
            PassTier::Standard => self.standard,
            PassTier::Premium => self.premium,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for tier in [PassTier::Basic, PassTier::Standard, PassTier::Premium] {
            if !self.price(tier).is_positive() {
                return Err(ConfigError::Invalid(format!(
                    "{tier} pass price must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// One step of the volume discount table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurchargeStep {
    /// Monthly transaction count at which this step starts applying.
    pub min_transactions: u64,
    pub surcharge: Amount,
}

/// Descending step function from monthly volume to per-transaction surcharge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurchargeSchedule {
    /// Surcharge for new venues below the first step.
    pub base: Amount,
    /// Sorted by ascending `min_transactions`.
    pub steps: Vec<SurchargeStep>,
}

impl Default for SurchargeSchedule {
    fn default() -> Self {
        Self {
            base: Amount::from_minor(20),
            steps: vec![
                SurchargeStep {
                    min_transactions: 500,
                    surcharge: Amount::from_minor(15),
                },
                SurchargeStep {
                    min_transactions: 2_000,
                    surcharge: Amount::from_minor(10),
                },
                SurchargeStep {
                    min_transactions: 10_000,
                    surcharge: Amount::from_minor(5),
                },
            ],
        }
    }
}

impl SurchargeSchedule {
    /// Surcharge for a venue with `base` surcharge that has already seen
    /// `transactions` this period.
    pub fn surcharge_for(&self, base: Amount, transactions: u64) -> Amount {
        self.steps
            .iter()
            .rev()
            .find(|step| transactions >= step.min_transactions)
            .map(|step| step.surcharge.min(base))
            .unwrap_or(base)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base.is_negative() {
            return Err(ConfigError::Invalid("base surcharge is negative".into()));
        }
        let mut previous: Option<&SurchargeStep> = None;
        for step in &self.steps {
            if step.surcharge.is_negative() {
                return Err(ConfigError::Invalid(format!(
                    "surcharge step at {} transactions is negative",
                    step.min_transactions
                )));
            }
            if let Some(prev) = previous {
                if step.min_transactions <= prev.min_transactions {
                    return Err(ConfigError::Invalid(
                        "surcharge steps must have ascending thresholds".into(),
                    ));
                }
                if step.surcharge > prev.surcharge {
                    return Err(ConfigError::Invalid(
                        "surcharge must not increase with volume".into(),
                    ));
                }
            }
            previous = Some(step);
        }
        Ok(())
    }
}
