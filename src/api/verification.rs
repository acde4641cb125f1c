use super::{AppState, AuthenticatedUser};
use crate::database::transaction_repository::{Transaction, VerificationQueueFilter};
use crate::error::AppResult;
use crate::payments::types::TransactionType;
use crate::services::manual_verification::{PendingVerification, VerifyPaymentInput};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub provider_id: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub currency: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PendingQuery {
    fn into_filter(self) -> VerificationQueueFilter {
        VerificationQueueFilter {
            provider_id: self.provider_id,
            transaction_type: self.transaction_type,
            currency: self.currency.map(|c| c.to_uppercase()),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// GET /api/admin/payments/pending-verifications
pub async fn list_pending(
    State(state): State<AppState>,
    AuthenticatedUser(reviewer_id): AuthenticatedUser,
    Query(query): Query<PendingQuery>,
) -> AppResult<Json<Vec<PendingVerification>>> {
    let items = state
        .engine
        .verification
        .get_pending_manual_verifications(reviewer_id, query.into_filter())
        .await?;
    Ok(Json(items))
}

/// POST /api/admin/payments/{id}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthenticatedUser(reviewer_id): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<VerifyPaymentInput>,
) -> AppResult<Json<Transaction>> {
    let tx = state
        .engine
        .verification
        .verify_manual_payment(reviewer_id, id, input)
        .await?;
    Ok(Json(tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let filter = PendingQuery {
            limit: Some(10_000),
            offset: Some(-3),
            currency: Some("myr".to_string()),
            ..Default::default()
        }
        .into_filter();
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.currency.as_deref(), Some("MYR"));
    }
}
