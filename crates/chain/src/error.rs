//! Error types for chain access

use thiserror::Error;

/// Result type alias for chain operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors that can occur while reading from or writing to the chain
#[derive(Debug, Error)]
pub enum ChainError {
    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No private key configured for write operations
    #[error("No private key configured - write operations require a signing key")]
    NoPrivateKey,

    /// Node could not be reached (transport failure, DNS, refused connection)
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Sender balance cannot cover value plus the gas ceiling
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The single confirmation did not arrive in time. The transaction was
    /// broadcast and may still be mined.
    #[error("Transaction {tx_hash} not confirmed after {secs} seconds")]
    Timeout { tx_hash: String, secs: u64 },

    /// Current gas price exceeds the configured ceiling
    #[error("Gas price too high: current {current_wei} wei exceeds max {max_wei} wei")]
    GasPriceTooHigh { current_wei: u128, max_wei: u128 },

    /// Transaction was mined with a failed status
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    /// `addProduct` pre-check: the id is already registered on chain
    #[error("Product already exists on blockchain: {0}")]
    DuplicateProduct(String),

    /// `updateStage` / `getProduct` pre-check: the id is not registered
    #[error("Product not found on blockchain: {0}")]
    ProductNotFound(String),

    /// Malformed transaction hash (not 0x + 64 hex)
    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),

    /// Malformed address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed native-token amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No receipt and no transaction known for the hash
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The transaction is known but has no receipt yet
    #[error("Transaction pending: {0}")]
    Pending(String),

    /// Any other node-reported failure (call error, decode error)
    #[error("RPC error: {0}")]
    Rpc(String),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Classify a node-reported error message.
    ///
    /// alloy surfaces transport and JSON-RPC failures as display strings; the
    /// variants callers care about are recovered from those.
    pub fn from_node_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") {
            return ChainError::InsufficientFunds(message.to_string());
        }
        const UNREACHABLE: [&str; 6] = [
            "error sending request",
            "connection refused",
            "connection reset",
            "dns error",
            "tcp connect error",
            "transport error",
        ];
        if UNREACHABLE.iter().any(|needle| lower.contains(needle)) {
            return ChainError::ChainUnavailable(message.to_string());
        }
        ChainError::Rpc(message.to_string())
    }

    /// Check if this error is retriable
    ///
    /// Transient node-side failures may succeed later; validation and
    /// registry errors will not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable(_)
                | Self::Timeout { .. }
                | Self::GasPriceTooHigh { .. }
                | Self::InsufficientFunds(_)
                | Self::Rpc(_)
        )
    }

    /// Hash of a transaction that reached the node but whose outcome is
    /// unknown. Every other error means nothing was broadcast, or it was
    /// mined and failed.
    pub fn unconfirmed_tx(&self) -> Option<&str> {
        match self {
            Self::Timeout { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_insufficient_funds() {
        let err = ChainError::from_node_message(
            "server returned an error response: error code -32000: insufficient funds for gas * price + value",
        );
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
    }

    #[test]
    fn test_classify_unreachable() {
        let err = ChainError::from_node_message(
            "error sending request for url (http://localhost:8545/)",
        );
        assert!(matches!(err, ChainError::ChainUnavailable(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = ChainError::from_node_message("execution reverted: Product already exists");
        assert!(matches!(err, ChainError::Rpc(_)));
    }

    #[test]
    fn test_is_retriable() {
        assert!(ChainError::Timeout {
            tx_hash: "0x01".into(),
            secs: 30
        }
        .is_retriable());
        assert!(ChainError::ChainUnavailable("down".into()).is_retriable());
        assert!(!ChainError::DuplicateProduct("P1".into()).is_retriable());
        assert!(!ChainError::InvalidHash("0x12".into()).is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = ChainError::GasPriceTooHigh {
            current_wei: 200,
            max_wei: 100,
        };
        assert_eq!(
            err.to_string(),
            "Gas price too high: current 200 wei exceeds max 100 wei"
        );
    }

    #[test]
    fn test_only_timeout_leaves_unconfirmed_tx() {
        let err = ChainError::Timeout {
            tx_hash: "0xabc".into(),
            secs: 120,
        };
        assert_eq!(err.unconfirmed_tx(), Some("0xabc"));
        assert_eq!(
            err.to_string(),
            "Transaction 0xabc not confirmed after 120 seconds"
        );
        assert_eq!(ChainError::Reverted("0xabc".into()).unconfirmed_tx(), None);
        assert_eq!(
            ChainError::InsufficientFunds("low".into()).unconfirmed_tx(),
            None
        );
    }
}
