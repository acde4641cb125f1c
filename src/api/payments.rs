use super::{AppState, AuthenticatedUser};
use crate::database::payment_method_repository::PaymentMethodConfig;
use crate::database::payout_repository::PayoutDistribution;
use crate::database::transaction_repository::Transaction;
use crate::error::{AppError, AppResult};
use crate::services::manual_verification::UploadProofInput;
use crate::services::payment_orchestrator::{
    ConfirmPaymentInput, CreatePaymentIntentInput, PaymentIntentResponse, RefundPaymentInput,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmBody {
    pub gateway_transaction_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProofUploadBody {
    pub file_name: String,
    pub content_type: String,
    /// File bytes, standard base64
    pub content_base64: String,
}

/// POST /api/payments/intents
pub async fn create_payment_intent(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(input): Json<CreatePaymentIntentInput>,
) -> AppResult<(StatusCode, Json<PaymentIntentResponse>)> {
    let response = state
        .engine
        .orchestrator
        .create_payment_intent(user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/payments/{id}/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<ConfirmBody>>,
) -> AppResult<Json<Transaction>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let tx = state
        .engine
        .orchestrator
        .confirm_payment(
            user_id,
            ConfirmPaymentInput {
                transaction_id: id,
                gateway_transaction_id: body.gateway_transaction_id,
            },
        )
        .await?;
    Ok(Json(tx))
}

/// POST /api/payments/{id}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundBody>>,
) -> AppResult<Json<Transaction>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let tx = state
        .engine
        .orchestrator
        .refund_payment(
            user_id,
            RefundPaymentInput {
                transaction_id: id,
                amount: body.amount,
                reason: body.reason,
            },
        )
        .await?;
    Ok(Json(tx))
}

/// POST /api/payments/{id}/proof
pub async fn upload_proof(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ProofUploadBody>,
) -> AppResult<Json<Transaction>> {
    let bytes = STANDARD
        .decode(body.content_base64.trim())
        .map_err(|_| AppError::invalid_field("content_base64", "File content is not valid base64"))?;
    let tx = state
        .engine
        .verification
        .upload_payment_proof(
            user_id,
            UploadProofInput {
                transaction_id: id,
                file_name: body.file_name,
                content_type: body.content_type,
                bytes,
            },
        )
        .await?;
    Ok(Json(tx))
}

/// GET /api/payments/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    Ok(Json(state.engine.orchestrator.get_transaction(user_id, id).await?))
}

/// GET /api/payments/{id}/payouts
pub async fn list_payouts(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<PayoutDistribution>>> {
    let tx = state.engine.orchestrator.get_transaction(user_id, id).await?;
    Ok(Json(state.engine.payouts.payouts_for_transaction(tx.id).await?))
}

/// GET /api/payment-methods
pub async fn list_payment_methods(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<PaymentMethodConfig>>> {
    Ok(Json(state.engine.orchestrator.list_payment_methods().await?))
}
