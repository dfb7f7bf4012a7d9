//! `agritrace serve` -- HTTP JSON API over the ledger service.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional API key authentication via AGRITRACE_API_KEY env var
//! - Request bodies capped at 1 MB
//!
//! Endpoints:
//! - GET  /health                     - Server status (exempt from auth)
//! - POST /api/batch                  - Register a batch
//! - GET  /api/batch/{id}             - Batch record with proofs
//! - GET  /api/batches                - All batches
//! - POST /api/event                  - Append a batch event
//! - POST /api/delivery               - Confirm delivery of a batch
//! - POST /api/pay                    - Pay the farmer of a batch
//! - POST /api/pay/resolve            - Settle an unconfirmed payment
//! - POST /api/retry                  - Re-submit a batch's pending proofs
//! - POST /api/products               - Register a product
//! - GET  /api/products/{id}          - Local product record
//! - POST /api/products/{id}/stages   - Record a stage
//! - POST /api/products/{id}/retry    - Re-send unconfirmed contract calls
//! - GET  /api/products/{id}/chain    - Product as the contract reports it
//! - GET  /api/verify/{hash}          - Transaction receipt lookup
//!
//! All responses use Content-Type: application/json.

mod error;
mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use agritrace_chain::Account;
use agritrace_ledger::LedgerService;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use self::handlers::{
    handle_add_batch, handle_add_event, handle_add_product, handle_add_stage,
    handle_chain_product, handle_confirm_delivery, handle_get_batch, handle_get_product,
    handle_health, handle_list_batches, handle_not_found, handle_pay_farmer,
    handle_resolve_payment, handle_retry, handle_retry_product, handle_verify,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::context;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Default rate limit: 60 requests per minute per IP.
const DEFAULT_RATE_LIMIT: u64 = 60;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

pub(crate) struct ServeOptions {
    pub(crate) port: u16,
    pub(crate) store: PathBuf,
    pub(crate) simulate: bool,
    pub(crate) config: Option<PathBuf>,
    pub(crate) tls_cert: Option<PathBuf>,
    pub(crate) tls_key: Option<PathBuf>,
}

/// Build the router with all routes and layers.
fn router(state: Arc<AppState>) -> Router {
    // CORS: permissive for local dev
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/batch", post(handle_add_batch))
        .route("/api/batch/{id}", get(handle_get_batch))
        .route("/api/batches", get(handle_list_batches))
        .route("/api/event", post(handle_add_event))
        .route("/api/delivery", post(handle_confirm_delivery))
        .route("/api/pay", post(handle_pay_farmer))
        .route("/api/pay/resolve", post(handle_resolve_payment))
        .route("/api/retry", post(handle_retry))
        .route("/api/products", post(handle_add_product))
        .route("/api/products/{id}", get(handle_get_product))
        .route("/api/products/{id}/stages", post(handle_add_stage))
        .route("/api/products/{id}/retry", post(handle_retry_product))
        .route("/api/products/{id}/chain", get(handle_chain_product))
        .route("/api/verify/{hash}", get(handle_verify))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
///
/// Security:
/// - CORS: Permissive (`Any` origin) for local dev; tighten for production.
/// - Rate limit: Per-IP, from `AGRITRACE_RATE_LIMIT` (default 60 req/min).
/// - API key: If `AGRITRACE_API_KEY` is set, all endpoints except /health require auth.
pub(crate) async fn start_server(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = context::load_config(options.config.as_deref())?;
    let node = context::connect(&config, options.simulate)?;
    let chain_id = if options.simulate {
        node.chain_id().await?
    } else {
        config.chain_id
    };

    let store = context::open_store(&options.store);
    let ledger = LedgerService::new(store, node, &config);
    info!("Ledger store: {}", options.store.display());

    // Rate limit: from AGRITRACE_RATE_LIMIT env var, or default
    let rate_limit = std::env::var("AGRITRACE_RATE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT);

    // API key: from AGRITRACE_API_KEY env var (None = no auth)
    let api_key = std::env::var("AGRITRACE_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());

    if api_key.is_some() {
        info!("API key authentication enabled");
    }
    info!("Rate limit: {} requests per minute per IP", rate_limit);

    let state = Arc::new(AppState {
        ledger,
        rate_limiter: RateLimiter::new(rate_limit),
        api_key,
        chain_id,
        store: options.store.display().to_string(),
    });

    let app = router(state);
    let addr = format!("0.0.0.0:{}", options.port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&options.tls_cert, &options.tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!("agritrace listening on https://0.0.0.0:{}", options.port);
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        return Ok(());
    }

    #[cfg(not(feature = "tls"))]
    if options.tls_cert.is_some() || options.tls_key.is_some() {
        warn!("TLS requested but agritrace was built without the `tls` feature; serving plain HTTP");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("agritrace listening on http://0.0.0.0:{}", options.port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
