//! Batch and product ledger operations for agritrace.
//!
//! [`LedgerService`] ties a [`agritrace_storage::LedgerStore`] to the chain
//! components in `agritrace-chain`. Writes to one identifier are serialized;
//! the store's version check catches anything that slips past.

mod error;
mod locks;
mod request;
mod service;
mod validate;

pub use error::{PartialRecord, Result, ServiceError};
pub use request::{
    BatchWrite, ChainReceipt, NewBatch, NewProductRequest, PaymentOutcome, PaymentResolution,
    ProductRetryReport, ProductWrite, RetryReport, StageRequest, StageWrite,
};
pub use service::LedgerService;
