mod commands;
mod context;
mod serve;

use std::future::Future;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::commands::product::ProductArgs;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Farm-to-market traceability records anchored on an EVM chain.
#[derive(Parser)]
#[command(
    name = "agritrace",
    version,
    about = "Farm-to-market traceability records anchored on an EVM chain"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Chain configuration file (TOML); AGRITRACE_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "5000")]
        port: u16,
        /// Ledger store file
        #[arg(long, default_value = context::DEFAULT_STORE)]
        store: PathBuf,
        /// Use an in-process simulated chain instead of the configured node
        #[arg(long)]
        simulate: bool,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Register products and record supply-chain stages
    Product {
        #[command(subcommand)]
        command: ProductCommands,
    },

    /// Inspect batch records in the local store
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Look up a transaction receipt
    Verify {
        /// Transaction hash (0x + 64 hex characters)
        hash: String,
    },

    /// Print the canonical encoding and keccak-256 digest of a JSON file
    Digest {
        /// Path to the JSON document
        file: PathBuf,
    },

    /// Register a product, record three stages and read it back from chain
    Smoke {
        /// Product identifier (default: SMOKE-<unix seconds>)
        #[arg(long)]
        id: Option<String>,
        /// Use an in-process simulated chain instead of the configured node
        #[arg(long)]
        simulate: bool,
    },
}

#[derive(Subcommand)]
enum ProductCommands {
    /// Store a product locally and register it with the contract
    Add {
        #[command(flatten)]
        product: ProductArgs,
        /// Ledger store file
        #[arg(long, default_value = context::DEFAULT_STORE)]
        store: PathBuf,
    },
    /// Append a stage to a product
    Stage {
        /// Product identifier
        id: String,
        /// Stage name (e.g. Harvested, Transport, Mandi)
        #[arg(long)]
        stage: String,
        #[arg(long)]
        location: String,
        /// Defaults to Completed
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Ledger store file
        #[arg(long, default_value = context::DEFAULT_STORE)]
        store: PathBuf,
    },
    /// Re-send a product's unconfirmed registration and stages
    Retry {
        /// Product identifier
        id: String,
        /// Ledger store file
        #[arg(long, default_value = context::DEFAULT_STORE)]
        store: PathBuf,
    },
    /// Show a product as the contract reports it
    Show {
        /// Product identifier
        id: String,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Show a batch record with its proofs
    Show {
        /// Batch identifier
        id: String,
        /// Ledger store file
        #[arg(long, default_value = context::DEFAULT_STORE)]
        store: PathBuf,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve {
            port,
            store,
            simulate,
            tls_cert,
            tls_key,
        } => {
            // Validate TLS flags: both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                report_error(
                    "error: --tls-cert and --tls-key must both be provided",
                    cli.output,
                    cli.quiet,
                );
                process::exit(1);
            }
            let options = serve::ServeOptions {
                port,
                store,
                simulate,
                config: cli.config.clone(),
                tls_cert,
                tls_key,
            };
            if let Err(e) = block_on(serve::start_server(options), cli.output, cli.quiet) {
                report_error(&format!("Server error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
        }
        Commands::Product { command } => match command {
            ProductCommands::Add { product, store } => {
                commands::product::cmd_add(config, &store, product, cli.output, cli.quiet);
            }
            ProductCommands::Stage {
                id,
                stage,
                location,
                status,
                notes,
                store,
            } => {
                let request = agritrace_ledger::StageRequest {
                    stage_name: stage,
                    location,
                    status,
                    notes,
                };
                commands::product::cmd_stage(config, &store, &id, request, cli.output, cli.quiet);
            }
            ProductCommands::Retry { id, store } => {
                commands::product::cmd_retry(config, &store, &id, cli.output, cli.quiet);
            }
            ProductCommands::Show { id } => {
                commands::product::cmd_show(config, &id, cli.output, cli.quiet);
            }
        },
        Commands::Batch { command } => match command {
            BatchCommands::Show { id, store } => {
                commands::batch::cmd_show(&store, &id, cli.output, cli.quiet);
            }
        },
        Commands::Verify { hash } => {
            commands::verify::cmd_verify(config, &hash, cli.output, cli.quiet);
        }
        Commands::Digest { file } => {
            commands::digest::cmd_digest(&file, cli.output, cli.quiet);
        }
        Commands::Smoke { id, simulate } => {
            commands::smoke::cmd_smoke(config, id, simulate, cli.output, cli.quiet);
        }
    }
}

/// Run a future to completion on a fresh multi-threaded runtime.
pub(crate) fn block_on<F: Future>(future: F, output: OutputFormat, quiet: bool) -> F::Output {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(future),
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                output,
                quiet,
            );
            process::exit(1);
        }
    }
}

/// Print a serializable value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
    println!("{}", pretty);
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
