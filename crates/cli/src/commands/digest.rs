use std::path::Path;
use std::process;

use agritrace_chain::{canonical_json, digest_hex};

use crate::{report_error, OutputFormat};

/// Print the canonical encoding of a JSON document and its keccak-256 digest.
/// Needs no chain connection.
pub(crate) fn cmd_digest(file: &Path, output: OutputFormat, quiet: bool) {
    let content = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", file.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let canonical = canonical_json(&value);
    let digest = digest_hex(&value);
    match output {
        OutputFormat::Json => {
            crate::print_json(&serde_json::json!({
                "canonical": canonical,
                "digest": digest,
            }));
        }
        OutputFormat::Text => {
            if !quiet {
                println!("{}", canonical);
            }
            println!("{}", digest);
        }
    }
}
