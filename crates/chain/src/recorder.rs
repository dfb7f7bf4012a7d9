//! Anchors payload digests on chain and sends native-token payments.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::canonical::{canonical_json, digest};
use crate::config::GasPolicy;
use crate::error::{ChainError, Result};
use crate::node::{
    await_confirmation, ensure_affordable, resolve_gas, ChainNode, Confirmation, TxRequest,
};

/// A confirmed recorder transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTx {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// Anchored digest; absent for payments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Build the `{action, ...payload}` envelope that gets hashed.
///
/// Object payloads are merged with `action` taking precedence; any other
/// payload is nested under `payload`.
pub fn envelope(action: &str, payload: &Value) -> Value {
    let mut map = match payload {
        Value::Object(fields) => fields.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    map.insert("action".to_string(), Value::String(action.to_string()));
    Value::Object(map)
}

/// Parse a decimal native-token amount such as `"0.5"` into wei.
pub fn parse_eth_amount(amount: &str) -> Result<U256> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(ChainError::InvalidAmount(amount.to_string()));
    }
    let wei = parse_ether(trimmed)
        .map_err(|e| ChainError::InvalidAmount(format!("{}: {}", amount, e)))?;
    if wei.is_zero() {
        return Err(ChainError::InvalidAmount(format!(
            "{}: amount must be positive",
            amount
        )));
    }
    Ok(wei)
}

pub struct ChainRecorder<N: ?Sized = dyn ChainNode> {
    node: Arc<N>,
    gas: GasPolicy,
    confirmation: Confirmation,
}

impl<N: ChainNode + ?Sized> ChainRecorder<N> {
    pub fn new(node: Arc<N>, gas: GasPolicy, timeout: Duration) -> Self {
        Self {
            node,
            gas,
            confirmation: Confirmation::new(timeout),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.confirmation = self.confirmation.with_poll_interval(poll_interval);
        self
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    /// Anchor `{action, ...payload}` and wait for one confirmation.
    pub async fn record(&self, action: &str, payload: &Value) -> Result<RecordedTx> {
        self.record_envelope(&envelope(action, payload)).await
    }

    /// Anchor an already-built envelope. Retries use this so the digest is
    /// exactly the one computed at first attempt.
    pub async fn record_envelope(&self, envelope: &Value) -> Result<RecordedTx> {
        let anchored = digest(envelope);
        debug!("Anchoring {} as 0x{:x}", canonical_json(envelope), anchored);

        let gas = resolve_gas(&*self.node, &self.gas, self.gas.record_limit).await?;
        let sender = ensure_affordable(&*self.node, gas, U256::ZERO).await?;

        let tx_hash = self
            .node
            .submit(TxRequest {
                to: sender,
                value: U256::ZERO,
                data: Bytes::copy_from_slice(anchored.as_slice()),
                gas,
            })
            .await?;
        let outcome = await_confirmation(&*self.node, tx_hash, self.confirmation).await?;

        info!(
            "Anchored digest 0x{:x} in tx {} (block {})",
            anchored,
            outcome.tx_hash_hex(),
            outcome.block_number
        );
        Ok(RecordedTx {
            tx_hash: outcome.tx_hash_hex(),
            block_number: outcome.block_number,
            gas_used: outcome.gas_used,
            digest: Some(format!("0x{:x}", anchored)),
        })
    }

    /// Send `amount_wei` to `to` and wait for one confirmation.
    pub async fn transfer(&self, to: Address, amount_wei: U256) -> Result<RecordedTx> {
        let gas = resolve_gas(&*self.node, &self.gas, self.gas.transfer_limit).await?;
        ensure_affordable(&*self.node, gas, amount_wei).await?;

        let tx_hash = self
            .node
            .submit(TxRequest {
                to,
                value: amount_wei,
                data: Bytes::new(),
                gas,
            })
            .await?;
        let outcome = await_confirmation(&*self.node, tx_hash, self.confirmation).await?;

        info!(
            "Transferred {} wei to {} in tx {}",
            amount_wei,
            to,
            outcome.tx_hash_hex()
        );
        Ok(RecordedTx {
            tx_hash: outcome.tx_hash_hex(),
            block_number: outcome.block_number,
            gas_used: outcome.gas_used,
            digest: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_merges_object() {
        let value = envelope("addBatch", &json!({"batchId": "B1", "action": "spoofed"}));
        assert_eq!(value, json!({"batchId": "B1", "action": "addBatch"}));
    }

    #[test]
    fn test_envelope_wraps_scalar() {
        let value = envelope("addEvent", &json!("harvested"));
        assert_eq!(value, json!({"payload": "harvested", "action": "addEvent"}));
    }

    #[test]
    fn test_parse_eth_amount() {
        assert_eq!(
            parse_eth_amount("0.5").unwrap(),
            U256::from(500_000_000_000_000_000u64)
        );
        assert_eq!(
            parse_eth_amount("2").unwrap(),
            U256::from(2_000_000_000_000_000_000u128)
        );
        assert!(parse_eth_amount("").is_err());
        assert!(parse_eth_amount("-1").is_err());
        assert!(parse_eth_amount("0").is_err());
        assert!(parse_eth_amount("abc").is_err());
    }
}
