//! Inputs and outputs of the ledger operations.
//!
//! Request fields default to empty so that a missing field reaches
//! validation and is reported by name instead of failing deserialization.

use agritrace_chain::TxOutcome;
use agritrace_storage::{BatchRecord, ProductRecord, StageRecord};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accept an amount as a JSON string or number (`"0.5"` or `0.5`).
fn amount_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewBatch {
    pub batch_id: String,
    pub farmer_addr: String,
    pub crop_type: Option<String>,
    pub harvest_date: Option<String>,
    pub location: Option<String>,
    #[serde(deserialize_with = "amount_string")]
    pub price_eth: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewProductRequest {
    pub product_id: String,
    pub product_name: String,
    pub farmer_name: String,
    pub farmer_location: String,
    pub crop_type: String,
    /// `YYYY-MM-DD` or RFC 3339
    pub harvest_date: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageRequest {
    pub stage_name: String,
    pub location: String,
    pub status: Option<String>,
    pub notes: Option<String>,
}

/// Confirmed contract call, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
}

impl From<TxOutcome> for ChainReceipt {
    fn from(outcome: TxOutcome) -> Self {
        ChainReceipt {
            transaction_hash: outcome.tx_hash_hex(),
            block_number: outcome.block_number,
            gas_used: outcome.gas_used,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWrite {
    pub batch: BatchRecord,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductWrite {
    pub product: ProductRecord,
    pub blockchain: ChainReceipt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageWrite {
    pub product_id: String,
    pub stage: StageRecord,
    pub blockchain: ChainReceipt,
}

/// Outcome of re-submitting a batch's pending proofs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    /// Pending ids now moved to `chainProofs`
    pub confirmed: Vec<String>,
    /// Pending ids whose attempt failed again
    pub still_pending: Vec<String>,
    /// Pending ids left for manual review (payments)
    pub skipped: Vec<String>,
    pub batch: BatchRecord,
}

/// What a payment lookup found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    /// Mined successfully; the batch is now paid.
    Confirmed,
    /// Still waiting to be mined; nothing changed.
    Pending,
    /// Mined with a failed status; the batch can be paid again.
    Reverted,
    /// Unknown to the node; the batch can be paid again.
    Dropped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResolution {
    pub outcome: PaymentOutcome,
    pub tx_hash: String,
    pub batch: BatchRecord,
}

/// Outcome of re-sending a product's unconfirmed contract calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRetryReport {
    /// Whether `addProduct` is confirmed after the retry
    pub registered: bool,
    /// Stage indexes confirmed by this retry
    pub confirmed_stages: Vec<usize>,
    /// Stage indexes still not on chain
    pub still_pending: Vec<usize>,
    pub product: ProductRecord,
}
