mod document;
mod error;
mod json_file;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::{RecordKind, StorageError};
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::{
    now_rfc3339, BatchMeta, BatchRecord, ChainProof, ChainState, ChainStatus, PendingProof,
    PendingStatus, ProductRecord, ProofAction, StageRecord, StageStatus,
};
pub use traits::LedgerStore;
