//! Mapping from ledger errors to HTTP responses. Every error body is a JSON
//! object with an `error` field.

use agritrace_chain::ChainError;
use agritrace_ledger::ServiceError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

#[derive(Debug)]
pub(crate) enum ApiError {
    /// The request body could not be read as the expected JSON.
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn chain_status(err: &ChainError) -> StatusCode {
    match err {
        ChainError::InvalidHash(_) | ChainError::InvalidAddress(_) | ChainError::InvalidAmount(_) => {
            StatusCode::BAD_REQUEST
        }
        ChainError::ProductNotFound(_) | ChainError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        ChainError::DuplicateProduct(_) => StatusCode::CONFLICT,
        ChainError::Pending(_) => StatusCode::ACCEPTED,
        ChainError::ChainUnavailable(_) | ChainError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl ApiError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(err) => match err {
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Duplicate(_) | ServiceError::Conflict(_) => StatusCode::CONFLICT,
                ServiceError::Chain(chain) => chain_status(chain),
                ServiceError::PartialFailure { .. } => StatusCode::BAD_GATEWAY,
                ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::BadRequest(msg) => json!({ "error": msg }),
            ApiError::Service(ServiceError::PartialFailure { record, source }) => json!({
                "ok": false,
                "error": self.to_string(),
                "details": source.to_string(),
                "retriable": source.is_retriable(),
                "unconfirmedTx": source.unconfirmed_tx(),
                "record": record,
            }),
            ApiError::Service(ServiceError::Chain(ChainError::Pending(hash))) => json!({
                "error": self.to_string(),
                "pending": true,
                "transactionHash": hash,
            }),
            ApiError::Service(err) => json!({ "error": err.to_string() }),
        };
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, self);
        }
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "{}", msg),
            ApiError::Service(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ServiceError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_service_error_status_codes() {
        assert_eq!(status_of(ServiceError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::Duplicate("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(ServiceError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ServiceError::Storage("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_chain_error_status_codes() {
        let chain = |e: ChainError| status_of(ServiceError::Chain(e));
        assert_eq!(chain(ChainError::InvalidHash("0x1".into())), StatusCode::BAD_REQUEST);
        assert_eq!(chain(ChainError::ProductNotFound("P1".into())), StatusCode::NOT_FOUND);
        assert_eq!(chain(ChainError::TransactionNotFound("0x".into())), StatusCode::NOT_FOUND);
        assert_eq!(chain(ChainError::DuplicateProduct("P1".into())), StatusCode::CONFLICT);
        assert_eq!(chain(ChainError::Pending("0x".into())), StatusCode::ACCEPTED);
        assert_eq!(
            chain(ChainError::Timeout {
                tx_hash: "0x01".into(),
                secs: 120
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            chain(ChainError::ChainUnavailable("connection refused".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(chain(ChainError::Reverted("0x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(chain(ChainError::NoPrivateKey), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_partial_failure_body_reports_unconfirmed_tx() {
        let err = ServiceError::PartialFailure {
            record: Box::new(agritrace_ledger::PartialRecord::Batch(
                agritrace_storage::BatchRecord::new("B1", Default::default()),
            )),
            source: ChainError::Timeout {
                tx_hash: "0xfeed".into(),
                secs: 120,
            },
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["retriable"], true);
        assert_eq!(body["unconfirmedTx"], "0xfeed");
        assert_eq!(body["record"]["batchId"], "B1");
    }
}
