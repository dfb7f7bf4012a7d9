//! On-chain record keeping for agritrace.
//!
//! - [`ChainRecorder`] anchors a canonical payload digest as a zero-value
//!   self-transfer, or sends native-token payments
//! - [`ContractGateway`] is the single entry point to the supply-chain
//!   contract ABI (`addProduct`, `updateStage`, `getProduct`,
//!   `getProductStages`, `productExists`)
//! - [`VerificationReader`] reports receipt status for a transaction hash
//!
//! All three talk to a [`ChainNode`]: [`AlloyNode`] for a real JSON-RPC
//! endpoint, [`MemoryChain`] for an in-process simulation.

pub mod abi;
pub mod canonical;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod node;
pub mod recorder;
pub mod verify;

mod alloy_node;

pub use alloy_node::AlloyNode;
pub use canonical::{canonical_json, digest, digest_hex};
pub use config::{ChainConfig, GasPolicy, GasPriceMode};
pub use error::{ChainError, Result};
pub use gateway::{ContractGateway, OnChainProduct, OnChainStage, DEFAULT_STAGE_STATUS};
pub use memory::MemoryChain;
pub use node::{
    Account, ChainNode, Confirmation, GasParams, NewProduct, ProductView, ReceiptInfo, ReceiptSource,
    StageUpdate, StageView, SupplyChainContract, TransactionInfo, TransactionSender, TxOutcome,
    TxRequest,
};
pub use recorder::{envelope, parse_eth_amount, ChainRecorder, RecordedTx};
pub use verify::{parse_tx_hash, VerificationReader, VerificationResult};

pub use alloy::primitives::{Address, B256, U256};
