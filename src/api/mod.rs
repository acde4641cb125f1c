//! HTTP surface of the payment engine

pub mod fees;
pub mod files;
pub mod payments;
pub mod verification;
pub mod webhooks;

use crate::error::AppError;
use crate::payments::factory::GatewayRegistry;
use crate::services::{LocalProofStorage, PaymentEngine};
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: PaymentEngine,
    pub gateways: Arc<GatewayRegistry>,
    /// Set when proofs live on local disk and are served by this process
    pub local_storage: Option<Arc<LocalProofStorage>>,
    pub db_pool: Option<sqlx::PgPool>,
}

/// Caller identity forwarded by the API gateway in `X-User-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(AuthenticatedUser)
            .ok_or_else(|| AppError::forbidden("Missing or invalid X-User-Id header"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(crate::health::health_handler))
        .route("/api/fees", get(fees::get_fees))
        .route("/api/payment-methods", get(payments::list_payment_methods))
        .route("/api/payments/intents", post(payments::create_payment_intent))
        .route("/api/payments/{id}", get(payments::get_transaction))
        .route("/api/payments/{id}/confirm", post(payments::confirm_payment))
        .route("/api/payments/{id}/refund", post(payments::refund_payment))
        .route("/api/payments/{id}/proof", post(payments::upload_proof))
        .route("/api/payments/{id}/payouts", get(payments::list_payouts))
        .route(
            "/api/admin/payments/pending-verifications",
            get(verification::list_pending),
        )
        .route("/api/admin/payments/{id}/verify", post(verification::verify_payment))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/files/{*key}", get(files::serve_proof))
        .with_state(state)
}
