//! In-process simulated chain.
//!
//! `MemoryChain` keeps balances, blocks, transactions and the supply-chain
//! registry in memory. Every accepted transaction is mined into its own
//! block. The registry follows the contract's revert rules: a reverted call
//! is still mined, with a failed receipt.
//!
//! Failure knobs (`set_offline`, `set_balance`, `set_confirmation_delay`,
//! `withhold_receipts`) let tests drive the recorder, gateway and verifier
//! through every error path without a real node.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ChainError, Result};
use crate::node::{
    Account, GasParams, NewProduct, ProductView, ReceiptInfo, ReceiptSource, StageUpdate,
    StageView, SupplyChainContract, TransactionInfo, TransactionSender, TxRequest,
};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 2;
const BASE_TX_GAS: u64 = 21_000;
const ADD_PRODUCT_GAS: u64 = 240_000;
const UPDATE_STAGE_GAS: u64 = 110_000;
const DEFAULT_GAS_PRICE_WEI: u128 = 30_000_000_000;

struct SimTx {
    info: TransactionInfo,
    input: Bytes,
    receipt: ReceiptInfo,
    /// `None` while receipts are withheld
    visible_at: Option<Instant>,
}

struct SimProduct {
    view: ProductView,
    stages: Vec<StageView>,
}

/// A contract call to be mined.
enum Call {
    Transfer,
    AddProduct(NewProduct),
    UpdateStage(StageUpdate),
}

struct SimState {
    balances: HashMap<Address, U256>,
    gas_price: u128,
    block_hashes: Vec<B256>,
    txs: HashMap<B256, SimTx>,
    products: BTreeMap<String, SimProduct>,
    nonce: u64,
    offline: bool,
    confirmation_delay: Duration,
    withhold_receipts: bool,
}

impl SimState {
    fn latest_block(&self) -> u64 {
        self.block_hashes.len() as u64 - 1
    }

    fn balance(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }
}

pub struct MemoryChain {
    chain_id: u64,
    operator: Address,
    contract: Address,
    state: Mutex<SimState>,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

fn block_hash(number: u64) -> B256 {
    keccak256(format!("agritrace-sim-block-{}", number).as_bytes())
}

fn block_timestamp(number: u64) -> u64 {
    GENESIS_TIMESTAMP + BLOCK_TIME_SECS * number
}

fn calldata_gas(data: &Bytes) -> u64 {
    data.iter().map(|b| if *b == 0 { 4 } else { 16 }).sum()
}

impl MemoryChain {
    /// A chain at block 0 with a funded operator account (100 native tokens).
    pub fn new() -> Self {
        let operator = Address::repeat_byte(0x11);
        let mut balances = HashMap::new();
        balances.insert(
            operator,
            U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)),
        );

        Self {
            chain_id: 1337,
            operator,
            contract: Address::repeat_byte(0xcc),
            state: Mutex::new(SimState {
                balances,
                gas_price: DEFAULT_GAS_PRICE_WEI,
                block_hashes: vec![block_hash(0)],
                txs: HashMap::new(),
                products: BTreeMap::new(),
                nonce: 0,
                offline: false,
                confirmation_delay: Duration::ZERO,
                withhold_receipts: false,
            }),
        }
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// Every request fails as if the node were unreachable.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub async fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().await.balances.insert(address, balance);
    }

    pub async fn set_gas_price(&self, price_wei: u128) {
        self.state.lock().await.gas_price = price_wei;
    }

    /// Receipts of new transactions become visible only after `delay`.
    pub async fn set_confirmation_delay(&self, delay: Duration) {
        self.state.lock().await.confirmation_delay = delay;
    }

    /// New transactions are accepted but their receipts never appear until
    /// [`MemoryChain::release_receipts`].
    pub async fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().await.withhold_receipts = withhold;
    }

    pub async fn release_receipts(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        for tx in state.txs.values_mut() {
            if tx.visible_at.is_none() {
                tx.visible_at = Some(now);
            }
        }
    }

    /// Number of transactions accepted so far.
    pub async fn transaction_count(&self) -> u64 {
        self.state.lock().await.nonce
    }

    /// Raw input data of an accepted transaction.
    pub async fn transaction_input(&self, tx_hash: B256) -> Option<Bytes> {
        let state = self.state.lock().await;
        state.txs.get(&tx_hash).map(|tx| tx.input.clone())
    }

    async fn online(&self) -> Result<tokio::sync::MutexGuard<'_, SimState>> {
        let state = self.state.lock().await;
        if state.offline {
            return Err(ChainError::ChainUnavailable(
                "error sending request: connection refused".to_string(),
            ));
        }
        Ok(state)
    }

    /// Accept, execute and mine one transaction.
    fn mine(
        &self,
        state: &mut SimState,
        to: Address,
        value: U256,
        data: Bytes,
        gas: GasParams,
        call: Call,
    ) -> Result<B256> {
        let sender = self.operator;
        let max_cost = gas.max_fee() + value;
        if state.balance(&sender) < max_cost {
            return Err(ChainError::InsufficientFunds(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }

        let nonce = state.nonce;
        state.nonce += 1;
        let mut preimage = Vec::with_capacity(28 + data.len());
        preimage.extend_from_slice(sender.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&data);
        let tx_hash = keccak256(&preimage);

        let intrinsic = BASE_TX_GAS + calldata_gas(&data);
        let (needed, reverted) = match &call {
            Call::Transfer => (intrinsic, false),
            Call::AddProduct(product) => (
                intrinsic + ADD_PRODUCT_GAS,
                product.product_id.is_empty() || state.products.contains_key(&product.product_id),
            ),
            Call::UpdateStage(update) => (
                intrinsic + UPDATE_STAGE_GAS,
                !state.products.contains_key(&update.product_id),
            ),
        };
        let out_of_gas = needed > gas.limit;
        let success = !out_of_gas && !reverted;
        let gas_used = if out_of_gas { gas.limit } else { needed };

        let block_number = state.latest_block() + 1;
        let mined_in = block_hash(block_number);
        state.block_hashes.push(mined_in);

        let fee = U256::from(gas_used) * U256::from(gas.price_wei);
        let spent = if success { fee + value } else { fee };
        let sender_balance = state.balance(&sender);
        state
            .balances
            .insert(sender, sender_balance.saturating_sub(spent));

        if success {
            match call {
                Call::Transfer => {
                    let recipient = state.balance(&to);
                    state.balances.insert(to, recipient + value);
                }
                Call::AddProduct(product) => {
                    state.products.insert(
                        product.product_id.clone(),
                        SimProduct {
                            view: ProductView {
                                product_name: product.product_name,
                                farmer_name: product.farmer_name,
                                farmer_location: product.farmer_location,
                                crop_type: product.crop_type,
                                harvest_date: product.harvest_date,
                                stage_count: 0,
                            },
                            stages: Vec::new(),
                        },
                    );
                }
                Call::UpdateStage(update) => {
                    if let Some(entry) = state.products.get_mut(&update.product_id) {
                        entry.stages.push(StageView {
                            stage_name: update.stage_name,
                            location: update.location,
                            timestamp: block_timestamp(block_number),
                            actor: sender,
                            status: update.status,
                            notes: update.notes,
                        });
                        entry.view.stage_count = entry.stages.len() as u64;
                    }
                }
            }
        }

        let visible_at = if state.withhold_receipts {
            None
        } else {
            Some(Instant::now() + state.confirmation_delay)
        };

        debug!(
            "Simulated block {} mined 0x{:x} (success: {})",
            block_number, tx_hash, success
        );

        state.txs.insert(
            tx_hash,
            SimTx {
                info: TransactionInfo {
                    tx_hash,
                    from: sender,
                    to: Some(to),
                    value,
                    gas_price: Some(gas.price_wei),
                    block_number: Some(block_number),
                },
                input: data,
                receipt: ReceiptInfo {
                    tx_hash,
                    block_number,
                    block_hash: mined_in,
                    success,
                    gas_used,
                    effective_gas_price: gas.price_wei,
                    from: sender,
                    to: Some(to),
                },
                visible_at,
            },
        );
        Ok(tx_hash)
    }
}

#[async_trait]
impl Account for MemoryChain {
    fn sender(&self) -> Result<Address> {
        Ok(self.operator)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.online().await?.balance(&address))
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.online().await?.gas_price)
    }

    async fn chain_id(&self) -> Result<u64> {
        self.online().await?;
        Ok(self.chain_id)
    }
}

#[async_trait]
impl TransactionSender for MemoryChain {
    async fn submit(&self, tx: TxRequest) -> Result<B256> {
        let mut state = self.online().await?;
        self.mine(&mut state, tx.to, tx.value, tx.data, tx.gas, Call::Transfer)
    }
}

#[async_trait]
impl SupplyChainContract for MemoryChain {
    async fn product_exists(&self, product_id: &str) -> Result<bool> {
        Ok(self.online().await?.products.contains_key(product_id))
    }

    async fn product(&self, product_id: &str) -> Result<ProductView> {
        self.online()
            .await?
            .products
            .get(product_id)
            .map(|entry| entry.view.clone())
            .ok_or_else(|| ChainError::Rpc("execution reverted: Product does not exist".to_string()))
    }

    async fn product_stages(&self, product_id: &str) -> Result<Vec<StageView>> {
        Ok(self
            .online()
            .await?
            .products
            .get(product_id)
            .map(|entry| entry.stages.clone())
            .unwrap_or_default())
    }

    async fn submit_add_product(&self, product: &NewProduct, gas: GasParams) -> Result<B256> {
        let mut state = self.online().await?;
        let data = Bytes::from(format!("addProduct:{}", product.product_id).into_bytes());
        self.mine(
            &mut state,
            self.contract,
            U256::ZERO,
            data,
            gas,
            Call::AddProduct(product.clone()),
        )
    }

    async fn submit_update_stage(&self, update: &StageUpdate, gas: GasParams) -> Result<B256> {
        let mut state = self.online().await?;
        let data = Bytes::from(
            format!("updateStage:{}:{}", update.product_id, update.stage_name).into_bytes(),
        );
        self.mine(
            &mut state,
            self.contract,
            U256::ZERO,
            data,
            gas,
            Call::UpdateStage(update.clone()),
        )
    }
}

#[async_trait]
impl ReceiptSource for MemoryChain {
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>> {
        let state = self.online().await?;
        let now = Instant::now();
        Ok(state.txs.get(&tx_hash).and_then(|tx| match tx.visible_at {
            Some(at) if at <= now => Some(tx.receipt.clone()),
            _ => None,
        }))
    }

    async fn transaction(&self, tx_hash: B256) -> Result<Option<TransactionInfo>> {
        let state = self.online().await?;
        let now = Instant::now();
        Ok(state.txs.get(&tx_hash).map(|tx| {
            let mut info = tx.info.clone();
            if !matches!(tx.visible_at, Some(at) if at <= now) {
                info.block_number = None;
            }
            info
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        let state = self.online().await?;
        Ok((block_number <= state.latest_block()).then(|| block_timestamp(block_number)))
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(self.online().await?.latest_block())
    }
}
