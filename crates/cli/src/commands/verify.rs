use std::path::Path;
use std::process;

use agritrace_chain::{ChainError, VerificationReader, VerificationResult};

use crate::context::{config_or_exit, node_or_exit};
use crate::{block_on, report_error, OutputFormat};

pub(crate) fn cmd_verify(config_path: Option<&Path>, hash: &str, output: OutputFormat, quiet: bool) {
    let config = config_or_exit(config_path, output, quiet);
    let node = node_or_exit(&config, false, output, quiet);
    let reader = VerificationReader::new(node, config.explorer_url.clone());

    match block_on(reader.verify(hash.trim()), output, quiet) {
        Ok(result) => match output {
            OutputFormat::Json => crate::print_json(&serde_json::json!({
                "success": true,
                "verification": result,
            })),
            OutputFormat::Text => print_verification(&result),
        },
        Err(ChainError::Pending(hash)) => {
            match output {
                OutputFormat::Json => crate::print_json(&serde_json::json!({
                    "success": false,
                    "pending": true,
                    "transactionHash": hash,
                })),
                OutputFormat::Text => {
                    if !quiet {
                        println!("Transaction {} is pending (not yet mined)", hash);
                    }
                }
            }
            process::exit(2);
        }
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}

fn print_verification(result: &VerificationResult) {
    println!("Transaction  {}", result.transaction_hash);
    println!("Status       {}", result.status);
    println!(
        "Block        {} ({} confirmations)",
        result.block_number, result.confirmations
    );
    println!("Block hash   {}", result.block_hash);
    println!("Timestamp    {}", result.timestamp);
    println!("From         {}", result.from);
    if let Some(to) = &result.contract_address {
        println!("To           {}", to);
    }
    println!("Gas used     {}", result.gas_used);
    println!("Gas price    {} wei", result.gas_price);
    if let Some(url) = &result.explorer_url {
        println!("Explorer     {}", url);
    }
}
