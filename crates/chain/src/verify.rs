//! Transaction verification by hash.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::explorer_tx_url;
use crate::error::{ChainError, Result};
use crate::gateway::unix_to_rfc3339;
use crate::node::ChainNode;

/// Receipt-derived facts about one transaction. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    /// `Success` or `Failed`
    pub status: String,
    pub gas_used: u64,
    /// Effective gas price in wei, as a decimal string
    pub gas_price: String,
    pub from: String,
    /// Receipt `to`: the contract for contract calls, the recipient otherwise
    pub contract_address: Option<String>,
    pub confirmations: u64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }
}

/// Accept exactly `0x` followed by 64 hex digits.
pub fn parse_tx_hash(hash: &str) -> Result<B256> {
    let hex = hash
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidHash(hash.to_string()))?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::InvalidHash(hash.to_string()));
    }
    B256::from_str(hash).map_err(|_| ChainError::InvalidHash(hash.to_string()))
}

pub struct VerificationReader<N: ?Sized = dyn ChainNode> {
    node: Arc<N>,
    explorer_url: Option<String>,
}

impl<N: ChainNode + ?Sized> VerificationReader<N> {
    pub fn new(node: Arc<N>, explorer_url: Option<String>) -> Self {
        Self { node, explorer_url }
    }

    /// Look the hash up once. Callers that want to wait poll this.
    pub async fn verify(&self, hash: &str) -> Result<VerificationResult> {
        let tx_hash = parse_tx_hash(hash)?;
        let canonical = format!("0x{:x}", tx_hash);
        debug!("Verifying transaction {}", canonical);

        let receipt = match self.node.receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                return match self.node.transaction(tx_hash).await? {
                    Some(_) => Err(ChainError::Pending(canonical)),
                    None => Err(ChainError::TransactionNotFound(canonical)),
                };
            }
        };

        let latest = self.node.latest_block().await?;
        let timestamp = match self.node.block_timestamp(receipt.block_number).await? {
            Some(secs) => unix_to_rfc3339(secs)?,
            None => String::new(),
        };

        Ok(VerificationResult {
            transaction_hash: canonical.clone(),
            block_number: receipt.block_number,
            block_hash: format!("0x{:x}", receipt.block_hash),
            status: if receipt.success { "Success" } else { "Failed" }.to_string(),
            gas_used: receipt.gas_used,
            gas_price: receipt.effective_gas_price.to_string(),
            from: format!("{}", receipt.from),
            contract_address: receipt.to.map(|to| format!("{}", to)),
            confirmations: latest.saturating_sub(receipt.block_number) + 1,
            timestamp,
            explorer_url: self
                .explorer_url
                .as_deref()
                .map(|base| explorer_tx_url(base, &canonical)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tx_hash() {
        let good = format!("0x{}", "ab".repeat(32));
        assert!(parse_tx_hash(&good).is_ok());
        assert!(parse_tx_hash(&good.to_uppercase().replacen("0X", "0x", 1)).is_ok());
        assert!(matches!(
            parse_tx_hash("0x1234"),
            Err(ChainError::InvalidHash(_))
        ));
        assert!(parse_tx_hash(&"ab".repeat(33)).is_err());
        assert!(parse_tx_hash(&format!("0x{}", "zz".repeat(32))).is_err());
    }
}
