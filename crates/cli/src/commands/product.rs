use std::path::Path;
use std::process;
use std::time::Duration;

use agritrace_chain::{ContractGateway, OnChainProduct};
use agritrace_ledger::{NewProductRequest, StageRequest};
use clap::Args;

use crate::context::{config_or_exit, exit_with, ledger_or_exit, node_or_exit, open_store};
use crate::{block_on, report_error, OutputFormat};

#[derive(Debug, Args)]
pub(crate) struct ProductArgs {
    /// Product identifier
    #[arg(long)]
    pub(crate) id: String,
    /// Product name
    #[arg(long)]
    pub(crate) name: String,
    /// Farmer name
    #[arg(long)]
    pub(crate) farmer: String,
    /// Farm location
    #[arg(long)]
    pub(crate) location: String,
    /// Crop type
    #[arg(long)]
    pub(crate) crop: String,
    /// Harvest date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub(crate) harvest_date: String,
}

impl From<ProductArgs> for NewProductRequest {
    fn from(args: ProductArgs) -> Self {
        NewProductRequest {
            product_id: args.id,
            product_name: args.name,
            farmer_name: args.farmer,
            farmer_location: args.location,
            crop_type: args.crop,
            harvest_date: args.harvest_date,
        }
    }
}

pub(crate) fn cmd_add(
    config_path: Option<&Path>,
    store_path: &Path,
    product: ProductArgs,
    output: OutputFormat,
    quiet: bool,
) {
    let ledger = ledger_or_exit(config_path, open_store(store_path), false, output, quiet);
    match block_on(ledger.register_product(product.into()), output, quiet) {
        Ok(write) => match output {
            OutputFormat::Json => crate::print_json(&write),
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "Registered product {} in tx {} (block {}, gas {})",
                        write.product.product_id,
                        write.blockchain.transaction_hash,
                        write.blockchain.block_number,
                        write.blockchain.gas_used
                    );
                }
            }
        },
        Err(e) => exit_with(&e, output, quiet),
    }
}

pub(crate) fn cmd_stage(
    config_path: Option<&Path>,
    store_path: &Path,
    product_id: &str,
    request: StageRequest,
    output: OutputFormat,
    quiet: bool,
) {
    let ledger = ledger_or_exit(config_path, open_store(store_path), false, output, quiet);
    match block_on(ledger.record_stage(product_id, request), output, quiet) {
        Ok(write) => match output {
            OutputFormat::Json => crate::print_json(&write),
            OutputFormat::Text => {
                if !quiet {
                    println!(
                        "Recorded stage '{}' ({}) for {} in tx {}",
                        write.stage.stage_name,
                        write.stage.status.as_str(),
                        write.product_id,
                        write.blockchain.transaction_hash
                    );
                }
            }
        },
        Err(e) => exit_with(&e, output, quiet),
    }
}

pub(crate) fn cmd_retry(
    config_path: Option<&Path>,
    store_path: &Path,
    product_id: &str,
    output: OutputFormat,
    quiet: bool,
) {
    let ledger = ledger_or_exit(config_path, open_store(store_path), false, output, quiet);
    let report = match block_on(ledger.retry_product(product_id), output, quiet) {
        Ok(report) => report,
        Err(e) => exit_with(&e, output, quiet),
    };
    match output {
        OutputFormat::Json => crate::print_json(&report),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "Product {}: {}, {} stage(s) confirmed now, {} still pending",
                    product_id,
                    if report.registered { "registered" } else { "not registered" },
                    report.confirmed_stages.len(),
                    report.still_pending.len()
                );
            }
        }
    }
    if !report.registered || !report.still_pending.is_empty() {
        process::exit(1);
    }
}

/// Read a product and its stages straight from the contract.
pub(crate) fn cmd_show(
    config_path: Option<&Path>,
    product_id: &str,
    output: OutputFormat,
    quiet: bool,
) {
    let config = config_or_exit(config_path, output, quiet);
    let node = node_or_exit(&config, false, output, quiet);
    let gateway = ContractGateway::new(
        node,
        config.gas.clone(),
        Duration::from_secs(config.confirmation_timeout_secs),
    );

    match block_on(gateway.get_product(product_id), output, quiet) {
        Ok(product) => match output {
            OutputFormat::Json => crate::print_json(&product),
            OutputFormat::Text => print_product(&product),
        },
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn print_product(product: &OnChainProduct) {
    println!("{} ({})", product.product_name, product.product_id);
    println!("  farmer:   {}, {}", product.farmer_name, product.farmer_location);
    println!("  crop:     {}", product.crop_type);
    println!("  harvest:  {}", product.harvest_date);
    println!("Stages ({}):", product.stage_count);
    for stage in &product.stages {
        let notes = if stage.notes.is_empty() {
            String::new()
        } else {
            format!(" - {}", stage.notes)
        };
        println!(
            "  {}. {} at {} [{}] {}{}",
            stage.index + 1,
            stage.stage_name,
            stage.location,
            stage.status,
            stage.timestamp,
            notes
        );
    }
}
