use std::path::Path;
use std::process;

use agritrace_storage::{BatchRecord, LedgerStore};

use crate::context::open_store;
use crate::{block_on, report_error, OutputFormat};

pub(crate) fn cmd_show(store_path: &Path, batch_id: &str, output: OutputFormat, quiet: bool) {
    let store = open_store(store_path);
    let batch = match block_on(store.get_batch(batch_id), output, quiet) {
        Ok(batch) => batch,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => crate::print_json(&batch),
        OutputFormat::Text => print_batch(&batch),
    }
}

fn print_batch(batch: &BatchRecord) {
    let meta = &batch.meta;
    println!("Batch {} (version {})", batch.batch_id, batch.version);
    println!("  farmer:    {}", meta.farmer_addr);
    if let Some(crop) = &meta.crop_type {
        println!("  crop:      {}", crop);
    }
    if let Some(price) = &meta.price_eth {
        println!("  price:     {} ETH", price);
    }
    println!("  delivered: {}", meta.delivered);
    match &meta.payment_tx {
        Some(tx) => println!("  paid:      yes ({})", tx),
        None => println!("  paid:      no"),
    }
    println!("  events:    {}", batch.events.len());

    println!("Chain proofs ({}):", batch.chain_proofs.len());
    for proof in &batch.chain_proofs {
        println!("  {} {} at {}", proof.action.as_str(), proof.tx_hash, proof.timestamp);
    }
    if !batch.pending_proofs.is_empty() {
        println!("Pending proofs ({}):", batch.pending_proofs.len());
        for pending in &batch.pending_proofs {
            println!(
                "  {} {:?} after {} attempt(s): {}",
                pending.id,
                pending.status,
                pending.attempts,
                pending.last_error.as_deref().unwrap_or("-")
            );
        }
    }
}
