//! Configuration, chain node and store setup shared by commands and the server.

use std::path::Path;
use std::process;
use std::sync::Arc;

use agritrace_chain::{AlloyNode, ChainConfig, ChainNode, MemoryChain};
use agritrace_ledger::{LedgerService, ServiceError};
use agritrace_storage::{JsonFileStore, LedgerStore};
use tracing::{info, warn};

use crate::{report_error, OutputFormat};

pub(crate) const DEFAULT_STORE: &str = "data.json";

pub(crate) fn load_config(path: Option<&Path>) -> Result<ChainConfig, String> {
    ChainConfig::load(path).map_err(|e| format!("configuration error: {}", e))
}

/// The configured node, or a fresh in-process chain when `simulate` is set.
pub(crate) fn connect(config: &ChainConfig, simulate: bool) -> Result<Arc<dyn ChainNode>, String> {
    if simulate {
        info!("Using simulated chain (chain id 1337, funded operator account)");
        return Ok(Arc::new(MemoryChain::new()));
    }

    let node = AlloyNode::new(config).map_err(|e| e.to_string())?;
    if !node.has_wallet() {
        warn!("No private key configured; chain writes will be rejected");
    }
    if !config.has_contract() {
        warn!("No contract address configured; product operations will be rejected");
    }
    info!("Using chain node {} (chain id {})", config.rpc_url, config.chain_id);
    Ok(Arc::new(node))
}

pub(crate) fn open_store(path: &Path) -> Arc<dyn LedgerStore> {
    Arc::new(JsonFileStore::open(path))
}

/// Build the ledger service for a one-shot command, exiting on setup errors.
pub(crate) fn ledger_or_exit(
    config_path: Option<&Path>,
    store: Arc<dyn LedgerStore>,
    simulate: bool,
    output: OutputFormat,
    quiet: bool,
) -> LedgerService {
    let config = config_or_exit(config_path, output, quiet);
    let node = node_or_exit(&config, simulate, output, quiet);
    LedgerService::new(store, node, &config)
}

pub(crate) fn config_or_exit(
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) -> ChainConfig {
    match load_config(config_path) {
        Ok(config) => config,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn node_or_exit(
    config: &ChainConfig,
    simulate: bool,
    output: OutputFormat,
    quiet: bool,
) -> Arc<dyn ChainNode> {
    match connect(config, simulate) {
        Ok(node) => node,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

/// Report a ledger error and exit non-zero. A partial failure also prints
/// the record that was saved locally, in JSON mode.
pub(crate) fn exit_with(err: &ServiceError, output: OutputFormat, quiet: bool) -> ! {
    if let (ServiceError::PartialFailure { record, source }, OutputFormat::Json) = (err, output) {
        if !quiet {
            eprintln!(
                "{}",
                serde_json::json!({
                    "error": err.to_string(),
                    "details": source.to_string(),
                    "record": record,
                })
            );
        }
    } else {
        report_error(&err.to_string(), output, quiet);
    }
    process::exit(1);
}
