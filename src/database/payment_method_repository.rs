use crate::database::error::DatabaseError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

/// How a payment method code is routed
#[derive(Debug, Clone, Serialize, PartialEq, FromRow)]
pub struct PaymentMethodConfig {
    pub code: String,
    pub provider_id: String,
    pub method_type: String,
    pub requires_proof: bool,
    pub display_name: String,
    pub is_active: bool,
    /// Bank account or wallet details shown in manual payment instructions
    pub account_details: JsonValue,
}

impl PaymentMethodConfig {
    pub fn is_manual(&self) -> bool {
        self.method_type.starts_with("manual_")
    }
}

#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethodConfig>, DatabaseError>;

    async fn list_active(&self) -> Result<Vec<PaymentMethodConfig>, DatabaseError>;
}

pub struct PgPaymentMethodRepository {
    pool: PgPool,
}

impl PgPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PgPaymentMethodRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethodConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentMethodConfig>(
            "SELECT code, provider_id, method_type, requires_proof, display_name, is_active,
                    account_details
             FROM payment_method_configs
             WHERE code = $1 AND is_active = TRUE",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_active(&self) -> Result<Vec<PaymentMethodConfig>, DatabaseError> {
        sqlx::query_as::<_, PaymentMethodConfig>(
            "SELECT code, provider_id, method_type, requires_proof, display_name, is_active,
                    account_details
             FROM payment_method_configs
             WHERE is_active = TRUE
             ORDER BY display_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
