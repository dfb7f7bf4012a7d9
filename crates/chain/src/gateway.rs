//! The only entry point to the supply-chain contract.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::config::GasPolicy;
use crate::error::{ChainError, Result};
use crate::node::{
    await_confirmation, ensure_affordable, resolve_gas, ChainNode, Confirmation, NewProduct,
    StageUpdate, StageView, TxOutcome,
};

/// Status written when a stage update does not name one.
pub const DEFAULT_STAGE_STATUS: &str = "Completed";

/// A stage as stored by the contract, timestamps rendered as RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainStage {
    pub index: usize,
    pub stage_name: String,
    pub location: String,
    pub timestamp: String,
    pub actor: String,
    pub status: String,
    pub notes: String,
}

/// `getProduct` plus `getProductStages` for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainProduct {
    pub product_id: String,
    pub product_name: String,
    pub farmer_name: String,
    pub farmer_location: String,
    pub crop_type: String,
    pub harvest_date: String,
    pub stage_count: u64,
    pub stages: Vec<OnChainStage>,
}

pub(crate) fn unix_to_rfc3339(secs: u64) -> Result<String> {
    let secs = i64::try_from(secs)
        .map_err(|_| ChainError::Rpc(format!("timestamp {} out of range", secs)))?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| ChainError::Rpc(format!("timestamp {} out of range: {}", secs, e)))?
        .format(&Rfc3339)
        .map_err(|e| ChainError::Rpc(format!("timestamp {} not formattable: {}", secs, e)))
}

fn render_stage(index: usize, stage: StageView) -> Result<OnChainStage> {
    Ok(OnChainStage {
        index,
        timestamp: unix_to_rfc3339(stage.timestamp)?,
        stage_name: stage.stage_name,
        location: stage.location,
        actor: format!("{}", stage.actor),
        status: stage.status,
        notes: stage.notes,
    })
}

pub struct ContractGateway<N: ?Sized = dyn ChainNode> {
    node: Arc<N>,
    gas: GasPolicy,
    confirmation: Confirmation,
}

impl<N: ChainNode + ?Sized> ContractGateway<N> {
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

    pub async fn product_exists(&self, product_id: &str) -> Result<bool> {
        self.node.product_exists(product_id).await
    }

    /// Register a product. Fails with `DuplicateProduct` before submitting
    /// anything when the identifier is already on chain.
    pub async fn add_product(&self, product: &NewProduct) -> Result<TxOutcome> {
        if self.node.product_exists(&product.product_id).await? {
            return Err(ChainError::DuplicateProduct(product.product_id.clone()));
        }

        let gas = resolve_gas(&*self.node, &self.gas, self.gas.add_product_limit).await?;
        ensure_affordable(&*self.node, gas, U256::ZERO).await?;

        debug!("Submitting addProduct for {}", product.product_id);
        let tx_hash = self.node.submit_add_product(product, gas).await?;
        let outcome = await_confirmation(&*self.node, tx_hash, self.confirmation).await?;

        info!(
            "Product {} added on chain in tx {}",
            product.product_id,
            outcome.tx_hash_hex()
        );
        Ok(outcome)
    }

    /// Append a stage. An empty status becomes `Completed`.
    pub async fn update_stage(&self, update: &StageUpdate) -> Result<TxOutcome> {
        if !self.node.product_exists(&update.product_id).await? {
            return Err(ChainError::ProductNotFound(update.product_id.clone()));
        }

        let mut update = update.clone();
        if update.status.trim().is_empty() {
            update.status = DEFAULT_STAGE_STATUS.to_string();
        }

        let gas = resolve_gas(&*self.node, &self.gas, self.gas.update_stage_limit).await?;
        ensure_affordable(&*self.node, gas, U256::ZERO).await?;

        debug!(
            "Submitting updateStage {} for {}",
            update.stage_name, update.product_id
        );
        let tx_hash = self.node.submit_update_stage(&update, gas).await?;
        let outcome = await_confirmation(&*self.node, tx_hash, self.confirmation).await?;

        info!(
            "Stage '{}' of {} recorded on chain in tx {}",
            update.stage_name,
            update.product_id,
            outcome.tx_hash_hex()
        );
        Ok(outcome)
    }

    pub async fn get_product(&self, product_id: &str) -> Result<OnChainProduct> {
        if !self.node.product_exists(product_id).await? {
            return Err(ChainError::ProductNotFound(product_id.to_string()));
        }

        let view = self.node.product(product_id).await?;
        let stages = self.get_product_stages(product_id).await?;

        Ok(OnChainProduct {
            product_id: product_id.to_string(),
            harvest_date: unix_to_rfc3339(view.harvest_date)?,
            product_name: view.product_name,
            farmer_name: view.farmer_name,
            farmer_location: view.farmer_location,
            crop_type: view.crop_type,
            stage_count: view.stage_count,
            stages,
        })
    }

    /// Stages in on-chain append order.
    pub async fn get_product_stages(&self, product_id: &str) -> Result<Vec<OnChainStage>> {
        self.node
            .product_stages(product_id)
            .await?
            .into_iter()
            .enumerate()
            .map(|(index, stage)| render_stage(index, stage))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_to_rfc3339() {
        assert_eq!(unix_to_rfc3339(0).unwrap(), "1970-01-01T00:00:00Z");
        assert_eq!(
            unix_to_rfc3339(1_700_000_000).unwrap(),
            "2023-11-14T22:13:20Z"
        );
        assert!(unix_to_rfc3339(u64::MAX).is_err());
    }
}
