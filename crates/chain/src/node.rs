//! The node abstraction every chain-facing component talks to.
//!
//! A [`ChainNode`] is split into four capabilities so that callers state
//! what they need. Writes are submitted with an explicit [`GasParams`] and
//! return the transaction hash immediately; confirmation is awaited
//! separately through [`ReceiptSource`] so that the wait can be bounded.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::config::GasPolicy;
use crate::error::{ChainError, Result};

/// Explicit gas for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub limit: u64,
    pub price_wei: u128,
}

impl GasParams {
    /// Upper bound on what the transaction can spend on gas.
    pub fn max_fee(&self) -> U256 {
        U256::from(self.limit) * U256::from(self.price_wei)
    }
}

/// A plain value/data transaction.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas: GasParams,
}

/// A write that reached one confirmation with a success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

impl TxOutcome {
    pub fn tx_hash_hex(&self) -> String {
        format!("0x{:x}", self.tx_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub from: Address,
    pub to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub tx_hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: Option<u128>,
    pub block_number: Option<u64>,
}

/// Arguments of `addProduct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub product_id: String,
    pub product_name: String,
    pub farmer_name: String,
    pub farmer_location: String,
    pub crop_type: String,
    /// Harvest date as Unix seconds
    pub harvest_date: u64,
}

/// Arguments of `updateStage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub product_id: String,
    pub stage_name: String,
    pub location: String,
    pub status: String,
    pub notes: String,
}

/// Decoded `getProduct` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductView {
    pub product_name: String,
    pub farmer_name: String,
    pub farmer_location: String,
    pub crop_type: String,
    pub harvest_date: u64,
    pub stage_count: u64,
}

/// One decoded element of `getProductStages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageView {
    pub stage_name: String,
    pub location: String,
    pub timestamp: u64,
    pub actor: Address,
    pub status: String,
    pub notes: String,
}

/// The signing account and network-level reads.
#[async_trait]
pub trait Account: Send + Sync {
    /// Address writes are sent from. `NoPrivateKey` when read-only.
    fn sender(&self) -> Result<Address>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn gas_price(&self) -> Result<u128>;

    async fn chain_id(&self) -> Result<u64>;
}

#[async_trait]
pub trait TransactionSender: Account {
    /// Sign and broadcast. Returns once the node has accepted the transaction.
    async fn submit(&self, tx: TxRequest) -> Result<B256>;
}

/// The supply-chain contract ABI.
#[async_trait]
pub trait SupplyChainContract: Account {
    async fn product_exists(&self, product_id: &str) -> Result<bool>;

    async fn product(&self, product_id: &str) -> Result<ProductView>;

    async fn product_stages(&self, product_id: &str) -> Result<Vec<StageView>>;

    async fn submit_add_product(&self, product: &NewProduct, gas: GasParams) -> Result<B256>;

    async fn submit_update_stage(&self, update: &StageUpdate, gas: GasParams) -> Result<B256>;
}

#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>>;

    async fn transaction(&self, tx_hash: B256) -> Result<Option<TransactionInfo>>;

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>>;

    async fn latest_block(&self) -> Result<u64>;
}

/// Everything the recorder, gateway and verifier need from a node.
pub trait ChainNode: Account + TransactionSender + SupplyChainContract + ReceiptSource {}

impl<T> ChainNode for T where
    T: Account + TransactionSender + SupplyChainContract + ReceiptSource + ?Sized
{
}

/// How long to wait for a receipt and how often to ask.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Confirmation {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Pick the gas for a write of the given limit under `policy`.
pub(crate) async fn resolve_gas<N>(node: &N, policy: &GasPolicy, limit: u64) -> Result<GasParams>
where
    N: Account + ?Sized,
{
    let node_price = if policy.needs_node_price() {
        node.gas_price().await?
    } else {
        0
    };
    Ok(GasParams {
        limit,
        price_wei: policy.price_wei(node_price)?,
    })
}

/// Refuse a write the sender cannot pay for: `balance >= limit * price + value`.
pub(crate) async fn ensure_affordable<N>(node: &N, gas: GasParams, value: U256) -> Result<Address>
where
    N: Account + ?Sized,
{
    let sender = node.sender()?;
    let balance = node.balance(sender).await?;
    let required = gas.max_fee() + value;
    if balance < required {
        return Err(ChainError::InsufficientFunds(format!(
            "balance {} wei is below required {} wei",
            balance, required
        )));
    }
    Ok(sender)
}

/// Poll for the receipt of `tx_hash` until `confirmation.timeout` elapses.
///
/// A mined receipt with a failed status becomes `Reverted`.
pub(crate) async fn await_confirmation<N>(
    node: &N,
    tx_hash: B256,
    confirmation: Confirmation,
) -> Result<TxOutcome>
where
    N: ReceiptSource + ?Sized,
{
    let poll = async {
        loop {
            if let Some(receipt) = node.receipt(tx_hash).await? {
                return Ok::<ReceiptInfo, ChainError>(receipt);
            }
            debug!("Receipt for 0x{:x} not available yet", tx_hash);
            tokio::time::sleep(confirmation.poll_interval).await;
        }
    };

    let receipt = tokio::time::timeout(confirmation.timeout, poll)
        .await
        .map_err(|_| ChainError::Timeout {
            tx_hash: format!("0x{:x}", tx_hash),
            secs: confirmation.timeout.as_secs(),
        })??;

    if !receipt.success {
        return Err(ChainError::Reverted(format!("0x{:x}", tx_hash)));
    }

    Ok(TxOutcome {
        tx_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
    })
}
