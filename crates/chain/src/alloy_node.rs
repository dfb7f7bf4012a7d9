//! JSON-RPC node backed by alloy providers.

use std::str::FromStr;

use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, TransactionBuilder, TransactionResponse};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use tracing::debug;

use crate::abi::SupplyChain;
use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::node::{
    Account, GasParams, NewProduct, ProductView, ReceiptInfo, ReceiptSource, StageUpdate,
    StageView, SupplyChainContract, TransactionInfo, TransactionSender, TxRequest,
};

/// A node reached over HTTP JSON-RPC.
///
/// Providers are built per call, the way a short-lived client would; the
/// signer is parsed once at construction. Without a private key the node is
/// read-only and every write fails with `NoPrivateKey`.
pub struct AlloyNode {
    rpc_url: Url,
    chain_id: u64,
    contract_address: Option<Address>,
    signer: Option<PrivateKeySigner>,
}

impl AlloyNode {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let rpc_url = Url::parse(&config.rpc_url).map_err(|e| {
            ChainError::Configuration(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;

        let contract_address = if config.has_contract() {
            Some(Address::from_str(&config.contract_address).map_err(|e| {
                ChainError::Configuration(format!(
                    "Invalid contract address '{}': {}",
                    config.contract_address, e
                ))
            })?)
        } else {
            None
        };

        let signer = match config.private_key.as_deref() {
            Some(key) if !key.is_empty() => Some(key.parse::<PrivateKeySigner>().map_err(|e| {
                ChainError::Configuration(format!("Invalid private key: {}", e))
            })?),
            _ => None,
        };

        Ok(Self {
            rpc_url,
            chain_id: config.chain_id,
            contract_address,
            signer,
        })
    }

    pub fn has_wallet(&self) -> bool {
        self.signer.is_some()
    }

    fn create_provider(&self) -> impl Provider {
        ProviderBuilder::new().connect_http(self.rpc_url.clone())
    }

    fn create_provider_with_signer(&self) -> Result<impl Provider> {
        let signer = self.signer.clone().ok_or(ChainError::NoPrivateKey)?;
        let wallet = EthereumWallet::from(signer);
        Ok(ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone()))
    }

    fn contract_address(&self) -> Result<Address> {
        self.contract_address.ok_or_else(|| {
            ChainError::Configuration("contract_address is not configured".to_string())
        })
    }
}

fn node_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::from_node_message(&err.to_string())
}

#[async_trait]
impl Account for AlloyNode {
    fn sender(&self) -> Result<Address> {
        self.signer
            .as_ref()
            .map(|signer| signer.address())
            .ok_or(ChainError::NoPrivateKey)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.create_provider()
            .get_balance(address)
            .await
            .map_err(node_error)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.create_provider()
            .get_gas_price()
            .await
            .map_err(node_error)
    }

    async fn chain_id(&self) -> Result<u64> {
        self.create_provider()
            .get_chain_id()
            .await
            .map_err(node_error)
    }
}

#[async_trait]
impl TransactionSender for AlloyNode {
    async fn submit(&self, tx: TxRequest) -> Result<B256> {
        let provider = self.create_provider_with_signer()?;
        let request = TransactionRequest::default()
            .with_to(tx.to)
            .with_value(tx.value)
            .with_input(tx.data)
            .with_gas_limit(tx.gas.limit)
            .with_gas_price(tx.gas.price_wei)
            .with_chain_id(self.chain_id);

        let pending = provider
            .send_transaction(request)
            .await
            .map_err(node_error)?;
        let tx_hash = *pending.tx_hash();
        debug!("Submitted transaction 0x{:x}", tx_hash);
        Ok(tx_hash)
    }
}

#[async_trait]
impl SupplyChainContract for AlloyNode {
    async fn product_exists(&self, product_id: &str) -> Result<bool> {
        let provider = self.create_provider();
        let contract = SupplyChain::new(self.contract_address()?, &provider);
        contract
            .productExists(product_id.to_string())
            .call()
            .await
            .map_err(node_error)
    }

    async fn product(&self, product_id: &str) -> Result<ProductView> {
        let provider = self.create_provider();
        let contract = SupplyChain::new(self.contract_address()?, &provider);
        let result = contract
            .getProduct(product_id.to_string())
            .call()
            .await
            .map_err(node_error)?;

        Ok(ProductView {
            product_name: result.productName,
            farmer_name: result.farmerName,
            farmer_location: result.farmerLocation,
            crop_type: result.cropType,
            harvest_date: result.harvestDate.saturating_to::<u64>(),
            stage_count: result.stageCount.saturating_to::<u64>(),
        })
    }

    async fn product_stages(&self, product_id: &str) -> Result<Vec<StageView>> {
        let provider = self.create_provider();
        let contract = SupplyChain::new(self.contract_address()?, &provider);
        let stages = contract
            .getProductStages(product_id.to_string())
            .call()
            .await
            .map_err(node_error)?;

        Ok(stages
            .into_iter()
            .map(|stage| StageView {
                stage_name: stage.stageName,
                location: stage.location,
                timestamp: stage.timestamp.saturating_to::<u64>(),
                actor: stage.actor,
                status: stage.status,
                notes: stage.notes,
            })
            .collect())
    }

    async fn submit_add_product(&self, product: &NewProduct, gas: GasParams) -> Result<B256> {
        let provider = self.create_provider_with_signer()?;
        let contract = SupplyChain::new(self.contract_address()?, &provider);

        let pending = contract
            .addProduct(
                product.product_id.clone(),
                product.product_name.clone(),
                product.farmer_name.clone(),
                product.farmer_location.clone(),
                product.crop_type.clone(),
                U256::from(product.harvest_date),
            )
            .gas(gas.limit)
            .gas_price(gas.price_wei)
            .send()
            .await
            .map_err(node_error)?;
        Ok(*pending.tx_hash())
    }

    async fn submit_update_stage(&self, update: &StageUpdate, gas: GasParams) -> Result<B256> {
        let provider = self.create_provider_with_signer()?;
        let contract = SupplyChain::new(self.contract_address()?, &provider);

        let pending = contract
            .updateStage(
                update.product_id.clone(),
                update.stage_name.clone(),
                update.location.clone(),
                update.status.clone(),
                update.notes.clone(),
            )
            .gas(gas.limit)
            .gas_price(gas.price_wei)
            .send()
            .await
            .map_err(node_error)?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait]
impl ReceiptSource for AlloyNode {
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>> {
        let receipt = self
            .create_provider()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(node_error)?;

        // A receipt without a block is not mined yet.
        Ok(receipt.and_then(|receipt| {
            let block_number = receipt.block_number?;
            Some(ReceiptInfo {
                tx_hash: receipt.transaction_hash,
                block_number,
                block_hash: receipt.block_hash.unwrap_or_default(),
                success: receipt.status(),
                gas_used: receipt.gas_used,
                effective_gas_price: receipt.effective_gas_price,
                from: receipt.from,
                to: receipt.to,
            })
        }))
    }

    async fn transaction(&self, tx_hash: B256) -> Result<Option<TransactionInfo>> {
        let tx = self
            .create_provider()
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(node_error)?;

        Ok(tx.map(|tx| TransactionInfo {
            tx_hash,
            from: TransactionResponse::from(&tx),
            to: ConsensusTransaction::to(&tx),
            value: ConsensusTransaction::value(&tx),
            gas_price: ConsensusTransaction::gas_price(&tx),
            block_number: tx.block_number,
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        let block = self
            .create_provider()
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .map_err(node_error)?;
        Ok(block.map(|block| block.header.timestamp))
    }

    async fn latest_block(&self) -> Result<u64> {
        self.create_provider()
            .get_block_number()
            .await
            .map_err(node_error)
    }
}
