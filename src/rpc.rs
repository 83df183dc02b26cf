//! JSON-lines request/response boundary.
//!
//! Each input line is an envelope `{"id", "method", "params"}`; each output
//! line is `{"id", "status", "result"}` or `{"id", "status", "error"}`.
//! Methods: `charge.direct` (point-of-sale charge) and `charge.split`
//! (tiered pass or direct charge with a full split breakdown).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::Amount;
use crate::engine::{SettlementEngine, SettlementError};
use crate::model::{ChargeRequest, PassTier, PaymentModel, Receipt, SettlementRecord};

pub const METHOD_DIRECT: &str = "charge.direct";
pub const METHOD_SPLIT: &str = "charge.split";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("malformed request: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl RpcError {
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Parse(_) => "validation_error",
            RpcError::UnknownMethod(_) => "unknown_method",
            RpcError::Settlement(err) => err.code(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            RpcError::Parse(_) => 400,
            RpcError::UnknownMethod(_) => 404,
            RpcError::Settlement(err) => err.status(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            RpcError::Settlement(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Params of `charge.direct`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChargeParams {
    pub venue_id: Option<String>,
    pub staff_user_id: Option<String>,
    pub subject_id: Option<String>,
    pub charge_type: Option<String>,
    pub amount_minor_units: Option<i64>,
}

/// Params of `charge.split`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitChargeParams {
    pub venue_id: Option<String>,
    pub subject_id: Option<String>,
    pub staff_user_id: Option<String>,
    pub payment_model: Option<String>,
    pub tier: Option<String>,
    pub promoter_code: Option<String>,
    pub amount_minor_units: Option<i64>,
}

fn required(field: &str, value: Option<String>) -> Result<String, SettlementError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(SettlementError::Validation(format!("missing field {field}"))),
    }
}

fn positive_amount(value: Option<i64>) -> Result<Amount, SettlementError> {
    let amount = value
        .map(Amount::from_minor)
        .ok_or_else(|| SettlementError::Validation("missing field amountMinorUnits".into()))?;
    if !amount.is_positive() {
        return Err(SettlementError::InvalidAmount(amount));
    }
    Ok(amount)
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<DirectChargeParams> for ChargeRequest {
    type Error = SettlementError;

    fn try_from(params: DirectChargeParams) -> Result<Self, Self::Error> {
        Ok(ChargeRequest {
            venue: required("venueId", params.venue_id)?,
            subject: required("subjectId", params.subject_id)?,
            staff: Some(required("staffUserId", params.staff_user_id)?),
            charge_type: Some(required("chargeType", params.charge_type)?),
            model: PaymentModel::Direct {
                amount: positive_amount(params.amount_minor_units)?,
            },
        })
    }
}

impl TryFrom<SplitChargeParams> for ChargeRequest {
    type Error = SettlementError;

    fn try_from(params: SplitChargeParams) -> Result<Self, Self::Error> {
        let venue = required("venueId", params.venue_id)?;
        let subject = required("subjectId", params.subject_id)?;
        let model = match required("paymentModel", params.payment_model)?.as_str() {
            "tiered_pass" => {
                let tier = required("tier", params.tier)?;
                let tier: PassTier = serde_json::from_value(Value::String(tier.clone()))
                    .map_err(|_| SettlementError::Validation(format!("unknown tier '{tier}'")))?;
                PaymentModel::TieredPass {
                    tier,
                    promoter_code: optional(params.promoter_code),
                }
            }
            "direct" => PaymentModel::Direct {
                amount: positive_amount(params.amount_minor_units)?,
            },
            other => {
                return Err(SettlementError::Validation(format!(
                    "unknown paymentModel '{other}'"
                )));
            }
        };
        Ok(ChargeRequest {
            venue,
            subject,
            staff: optional(params.staff_user_id),
            charge_type: None,
            model,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectBreakdown {
    pub surcharge: Amount,
    pub platform_fee: Amount,
    pub venue_net: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub previous_balance: Amount,
    pub new_balance: Amount,
}

/// Result of `charge.direct`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChargeResponse {
    pub charge_id: Uuid,
    pub charge_type: String,
    pub amount_minor_units: Amount,
    pub created_at: DateTime<Utc>,
    pub subject_label: String,
    pub breakdown: DirectBreakdown,
    pub wallet: Wallet,
}

impl From<Receipt> for DirectChargeResponse {
    fn from(receipt: Receipt) -> Self {
        let b = &receipt.record.breakdown;
        Self {
            charge_id: receipt.record.id,
            charge_type: receipt.record.charge_type.clone().unwrap_or_default(),
            amount_minor_units: b.gross_amount,
            created_at: receipt.record.created_at,
            subject_label: receipt.subject_label,
            breakdown: DirectBreakdown {
                surcharge: b.surcharge,
                platform_fee: b.transaction_fee,
                venue_net: b.venue_net,
            },
            wallet: Wallet {
                previous_balance: receipt.previous_balance,
                new_balance: receipt.new_balance,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitBreakdown {
    pub gross_amount: Amount,
    pub surcharge: Amount,
    pub transaction_fee: Amount,
    pub venue_net: Amount,
    pub platform_net: Amount,
    pub promoter_payout: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_share: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoter_share: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_share: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_share: Option<Amount>,
}

/// Result of `charge.split`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitChargeResponse {
    pub transaction: SettlementRecord,
    pub subject_label: String,
    pub breakdown: SplitBreakdown,
    pub wallet: Wallet,
}

impl From<Receipt> for SplitChargeResponse {
    fn from(receipt: Receipt) -> Self {
        let b = receipt.record.breakdown.clone();
        Self {
            breakdown: SplitBreakdown {
                gross_amount: b.gross_amount,
                surcharge: b.surcharge,
                transaction_fee: b.transaction_fee,
                venue_net: b.venue_net,
                platform_net: b.platform_net,
                promoter_payout: b.promoter_payout,
                venue_share: b.shares.map(|s| s.venue),
                promoter_share: b.shares.map(|s| s.promoter),
                pool_share: b.shares.map(|s| s.pool),
                platform_share: b.shares.map(|s| s.platform),
            },
            wallet: Wallet {
                previous_balance: receipt.previous_balance,
                new_balance: receipt.new_balance,
            },
            subject_label: receipt.subject_label,
            transaction: receipt.record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            status: 200,
            result: Some(result),
            error: None,
        }
    }

    fn failed(id: Value, err: &RpcError) -> Self {
        Self {
            id,
            status: err.status(),
            result: None,
            error: Some(ErrorBody {
                code: err.code(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            }),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|err| internal_error_json(&self.id, &err.to_string()))
    }
}

fn internal_error_json(id: &Value, message: &str) -> String {
    json!({
        "id": id,
        "status": 500,
        "error": {
            "code": "internal",
            "message": message,
            "retryable": false,
        },
    })
    .to_string()
}

/// Dispatch one request line.
pub async fn handle_line(engine: &SettlementEngine, line: &str) -> Response {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => return Response::failed(Value::Null, &RpcError::Parse(err)),
    };
    let id = envelope.id.clone();
    match dispatch(engine, envelope).await {
        Ok(result) => Response::ok(id, result),
        Err(err) => Response::failed(id, &err),
    }
}

async fn dispatch(engine: &SettlementEngine, envelope: Envelope) -> Result<Value, RpcError> {
    let params = match envelope.params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    match envelope.method.as_str() {
        METHOD_DIRECT => {
            let params: DirectChargeParams = serde_json::from_value(params)?;
            let receipt = engine.charge(params.try_into()?).await?;
            Ok(serde_json::to_value(DirectChargeResponse::from(receipt))?)
        }
        METHOD_SPLIT => {
            let params: SplitChargeParams = serde_json::from_value(params)?;
            let receipt = engine.charge(params.try_into()?).await?;
            Ok(serde_json::to_value(SplitChargeResponse::from(receipt))?)
        }
        other => Err(RpcError::UnknownMethod(other.to_string())),
    }
}

/// Process request lines in order, handing each response to `emit`.
pub async fn serve(
    engine: &SettlementEngine,
    mut lines: impl Stream<Item = String> + Unpin,
    mut emit: impl FnMut(Response),
) {
    while let Some(line) = lines.next().await {
        if line.trim().is_empty() {
            continue;
        }
        emit(handle_line(engine, &line).await);
    }
}
