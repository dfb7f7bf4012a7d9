//! HTTP route handlers: health, batches, products, verification.

use std::sync::Arc;

use agritrace_ledger::{NewBatch, NewProductRequest, PaymentOutcome, StageRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::json_error;
use super::state::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

/// Unwrap a JSON body, turning axum's plain-text rejection into a JSON 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(ApiError::from)
}

/// Amounts arrive as `"0.5"` or `0.5`.
fn amount_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct BatchRef {
    batch_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct EventRequest {
    batch_id: String,
    event: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PayRequest {
    batch_id: String,
    price_eth: Value,
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "chainId": state.chain_id,
        "store": state.store,
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

// ── Batches ──────────────────────────────────────────────────────────────────

/// POST /api/batch
pub(crate) async fn handle_add_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewBatch>, JsonRejection>,
) -> ApiResult {
    let write = state.ledger.add_batch(body(payload)?).await?;
    Ok(Json(json!({
        "ok": true,
        "batch": write.batch,
        "txHash": write.tx_hash,
    })))
}

/// GET /api/batch/{id}
pub(crate) async fn handle_get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let batch = state.ledger.read_batch(&id).await?;
    Ok(Json(json!(batch)))
}

/// GET /api/batches
pub(crate) async fn handle_list_batches(State(state): State<Arc<AppState>>) -> ApiResult {
    let batches = state.ledger.list_batches().await?;
    Ok(Json(json!({ "batches": batches })))
}

/// POST /api/event
pub(crate) async fn handle_add_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let write = state.ledger.add_event(&request.batch_id, request.event).await?;
    Ok(Json(json!({ "ok": true, "txHash": write.tx_hash })))
}

/// POST /api/delivery
pub(crate) async fn handle_confirm_delivery(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRef>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let write = state.ledger.confirm_delivery(&request.batch_id).await?;
    Ok(Json(json!({ "ok": true, "txHash": write.tx_hash })))
}

/// POST /api/pay
///
/// `priceEth` may be omitted when the batch was registered with a price.
pub(crate) async fn handle_pay_farmer(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PayRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let price = amount_text(&request.price_eth);
    let write = state
        .ledger
        .pay_farmer(&request.batch_id, price.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true, "txHash": write.tx_hash })))
}

/// POST /api/retry
pub(crate) async fn handle_retry(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRef>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let report = state.ledger.retry_pending(&request.batch_id).await?;
    Ok(Json(json!({
        "ok": report.still_pending.is_empty(),
        "confirmed": report.confirmed,
        "stillPending": report.still_pending,
        "skipped": report.skipped,
    })))
}

/// POST /api/pay/resolve
///
/// Settles a payment that was sent but not confirmed in time.
pub(crate) async fn handle_resolve_payment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRef>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let resolution = state.ledger.resolve_payment(&request.batch_id).await?;
    Ok(Json(json!({
        "ok": resolution.outcome == PaymentOutcome::Confirmed,
        "outcome": resolution.outcome,
        "txHash": resolution.tx_hash,
        "batch": resolution.batch,
    })))
}

// ── Products ─────────────────────────────────────────────────────────────────

/// POST /api/products
pub(crate) async fn handle_add_product(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewProductRequest>, JsonRejection>,
) -> ApiResult {
    let write = state.ledger.register_product(body(payload)?).await?;
    Ok(Json(json!({
        "success": true,
        "product": write.product,
        "blockchain": write.blockchain,
    })))
}

/// GET /api/products/{id}
pub(crate) async fn handle_get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let product = state.ledger.read_product(&id).await?;
    Ok(Json(json!(product)))
}

/// POST /api/products/{id}/stages
pub(crate) async fn handle_add_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<StageRequest>, JsonRejection>,
) -> ApiResult {
    let write = state.ledger.record_stage(&id, body(payload)?).await?;
    Ok(Json(json!({
        "success": true,
        "productId": write.product_id,
        "stage": write.stage,
        "blockchain": write.blockchain,
    })))
}

/// POST /api/products/{id}/retry
pub(crate) async fn handle_retry_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let report = state.ledger.retry_product(&id).await?;
    Ok(Json(json!({
        "success": report.registered && report.still_pending.is_empty(),
        "registered": report.registered,
        "confirmedStages": report.confirmed_stages,
        "stillPending": report.still_pending,
        "product": report.product,
    })))
}

/// GET /api/products/{id}/chain
pub(crate) async fn handle_chain_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let product = state.ledger.chain_product(&id).await?;
    Ok(Json(json!({
        "success": true,
        "product": product,
        "source": "blockchain",
    })))
}

// ── Verification ─────────────────────────────────────────────────────────────

/// GET /api/verify/{hash}
pub(crate) async fn handle_verify(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> ApiResult {
    let verification = state.ledger.verify(&hash).await?;
    Ok(Json(json!({
        "success": true,
        "verification": verification,
    })))
}
