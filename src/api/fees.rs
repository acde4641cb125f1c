//! GET /api/fees endpoint: fee quote for an amount before paying

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::payments::types::TransactionType;
use crate::services::fee_calculation::FeeBreakdown;
use axum::{
    extract::{Query, State},
    Json,
};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct FeesQueryParams {
    pub amount: String,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeeQuoteResponse {
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub provider: String,
    pub breakdown: FeeBreakdown,
}

pub async fn get_fees(
    State(state): State<AppState>,
    Query(params): Query<FeesQueryParams>,
) -> AppResult<Json<FeeQuoteResponse>> {
    let amount = BigDecimal::from_str(params.amount.trim())
        .map_err(|_| AppError::invalid_field("amount", "Amount must be a decimal number"))?;
    if amount <= BigDecimal::zero() {
        return Err(AppError::invalid_field("amount", "Amount must be greater than zero"));
    }
    let currency = params.currency.trim().to_uppercase();

    let provider = match params.provider {
        Some(provider) => provider.to_lowercase(),
        None => state.engine.selector.select_provider(&amount, &currency)?,
    };

    let breakdown = state
        .engine
        .fees
        .calculate_fees(&amount, &currency, params.transaction_type, &provider)
        .await?;

    debug!(amount = %amount, currency = %currency, provider = %provider, "fee quote served");

    Ok(Json(FeeQuoteResponse {
        amount,
        currency,
        transaction_type: params.transaction_type,
        provider,
        breakdown,
    }))
}
