//! Chain configuration and gas policy.
//!
//! Resolution order at startup: built-in defaults, then an optional TOML
//! file, then `AGRITRACE_*` environment variables. Configuration is read
//! once and never written back.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Connection and signing settings for the chain backend.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint, e.g. `http://localhost:8545`
    pub rpc_url: String,

    /// Chain ID (1337 for a local Hardhat/Anvil node)
    pub chain_id: u64,

    /// Deployed supply-chain contract address (0x + 40 hex)
    pub contract_address: String,

    /// Signing key; absent means read-only
    pub private_key: Option<String>,

    /// Block explorer base URL; verification results link to `{explorer_url}/tx/{hash}`
    pub explorer_url: Option<String>,

    /// Upper bound on waiting for the single confirmation
    pub confirmation_timeout_secs: u64,

    pub gas: GasPolicy,
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("contract_address", &self.contract_address)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("explorer_url", &self.explorer_url)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("gas", &self.gas)
            .finish()
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 1337,
            contract_address: String::new(),
            private_key: None,
            explorer_url: None,
            confirmation_timeout_secs: 120,
            gas: GasPolicy::default(),
        }
    }
}

/// How the gas price of a write is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GasPriceMode {
    /// Always pay `gwei`.
    Fixed { gwei: u64 },
    /// Node-reported price scaled by `multiplier`, refused above `max_gwei`.
    Estimated { multiplier: f64, max_gwei: u64 },
}

/// Gas limits per call kind plus the price rule. Every write carries an
/// explicit limit and price taken from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPolicy {
    pub price: GasPriceMode,
    pub add_product_limit: u64,
    pub update_stage_limit: u64,
    pub record_limit: u64,
    pub transfer_limit: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            price: GasPriceMode::Fixed { gwei: 30 },
            add_product_limit: 500_000,
            update_stage_limit: 300_000,
            record_limit: 60_000,
            transfer_limit: 21_000,
        }
    }
}

impl GasPolicy {
    /// Resolve the price to pay given the node's current price.
    ///
    /// Fixed mode ignores the node. Estimated mode fails with
    /// `GasPriceTooHigh` when the scaled price exceeds the ceiling.
    pub fn price_wei(&self, node_price_wei: u128) -> Result<u128> {
        match &self.price {
            GasPriceMode::Fixed { gwei } => Ok(u128::from(*gwei) * WEI_PER_GWEI),
            GasPriceMode::Estimated {
                multiplier,
                max_gwei,
            } => {
                let scaled = (node_price_wei as f64 * multiplier).ceil() as u128;
                let max_wei = u128::from(*max_gwei) * WEI_PER_GWEI;
                if scaled > max_wei {
                    return Err(ChainError::GasPriceTooHigh {
                        current_wei: scaled,
                        max_wei,
                    });
                }
                Ok(scaled)
            }
        }
    }

    /// Whether pricing needs the node's current gas price.
    pub fn needs_node_price(&self) -> bool {
        matches!(self.price, GasPriceMode::Estimated { .. })
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match &self.price {
            GasPriceMode::Fixed { gwei } => {
                if *gwei == 0 {
                    return Err("gas.price.gwei must be > 0".to_string());
                }
            }
            GasPriceMode::Estimated {
                multiplier,
                max_gwei,
            } => {
                if *multiplier < 1.0 {
                    return Err("gas.price.multiplier must be >= 1.0".to_string());
                }
                if *multiplier > 10.0 {
                    return Err(
                        "gas.price.multiplier must be <= 10.0 (suspiciously high)".to_string()
                    );
                }
                if *max_gwei == 0 {
                    return Err("gas.price.max_gwei must be > 0".to_string());
                }
            }
        }
        for (name, limit) in [
            ("add_product_limit", self.add_product_limit),
            ("update_stage_limit", self.update_stage_limit),
            ("record_limit", self.record_limit),
            ("transfer_limit", self.transfer_limit),
        ] {
            if limit < 21_000 {
                return Err(format!("gas.{} must be >= 21000, got {}", name, limit));
            }
        }
        Ok(())
    }
}

impl ChainConfig {
    /// Defaults, then `path` if given, then environment overrides. Validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate().map_err(ChainError::Configuration)?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate().map_err(ChainError::Configuration)?;
        Ok(config)
    }

    /// Apply `AGRITRACE_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AGRITRACE_RPC_URL") {
            self.rpc_url = url;
        }
        if let Some(key) = lookup("AGRITRACE_PRIVATE_KEY") {
            self.private_key = if key.is_empty() { None } else { Some(key) };
        }
        if let Some(address) = lookup("AGRITRACE_CONTRACT_ADDRESS") {
            self.contract_address = address;
        }
        if let Some(chain_id) = lookup("AGRITRACE_CHAIN_ID") {
            self.chain_id = chain_id.trim().parse().map_err(|_| {
                ChainError::Configuration(format!(
                    "AGRITRACE_CHAIN_ID must be an integer, got '{}'",
                    chain_id
                ))
            })?;
        }
        if let Some(explorer) = lookup("AGRITRACE_EXPLORER_URL") {
            self.explorer_url = if explorer.is_empty() {
                None
            } else {
                Some(explorer)
            };
        }
        Ok(())
    }

    /// Validate configuration
    ///
    /// Returns `Ok(())` if valid, otherwise returns error message
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.rpc_url.is_empty() {
            return Err("rpc_url cannot be empty".to_string());
        }

        if !self.rpc_url.starts_with("http://") && !self.rpc_url.starts_with("https://") {
            return Err("rpc_url must start with http:// or https://".to_string());
        }

        if self.chain_id == 0 {
            return Err("chain_id must be > 0".to_string());
        }

        // An empty contract address is allowed: the recorder and verifier do
        // not touch the contract.
        if !self.contract_address.is_empty() {
            validate_hex("contract_address", &self.contract_address, 40)?;
        }

        if let Some(ref pk) = self.private_key {
            if !pk.is_empty() {
                validate_hex("private_key", pk, 64)?;
            }
        }

        if self.confirmation_timeout_secs == 0 {
            return Err("confirmation_timeout_secs must be > 0".to_string());
        }

        if self.confirmation_timeout_secs > 3600 {
            return Err("confirmation_timeout_secs too large (max 1 hour)".to_string());
        }

        self.gas.validate()
    }

    /// Check if a contract address is configured
    pub fn has_contract(&self) -> bool {
        !self.contract_address.is_empty()
    }
}

/// Block explorer page of a transaction.
pub(crate) fn explorer_tx_url(base: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash)
}

fn validate_hex(field: &str, value: &str, hex_len: usize) -> std::result::Result<(), String> {
    if !value.starts_with("0x") {
        return Err(format!("{} must start with 0x", field));
    }
    if value.len() != hex_len + 2 {
        return Err(format!(
            "{} must be {} characters (0x + {} hex), got {}",
            field,
            hex_len + 2,
            hex_len,
            value.len()
        ));
    }
    if !value[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "{} must contain only hex characters after 0x",
            field
        ));
    }
    Ok(())
}
