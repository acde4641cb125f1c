use crate::database::error::DatabaseError;
use crate::payments::types::TransactionType;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Platform fee rule for one transaction type
#[derive(Debug, Clone, Serialize, PartialEq, FromRow)]
pub struct PlatformFeeConfig {
    pub id: Uuid,
    pub transaction_type: String,
    pub percentage: BigDecimal,
    pub fixed_amount: BigDecimal,
    pub min_fee: Option<BigDecimal>,
    pub max_fee: Option<BigDecimal>,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
    pub priority: i32,
    pub is_active: bool,
}

impl PlatformFeeConfig {
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_from <= at
            && self.effective_until.map(|until| at < until).unwrap_or(true)
    }
}

#[async_trait]
pub trait FeeConfigRepository: Send + Sync {
    /// Active configs for a type, regardless of their effective window.
    async fn list_active_for_type(
        &self,
        transaction_type: TransactionType,
    ) -> Result<Vec<PlatformFeeConfig>, DatabaseError>;
}

pub struct PgFeeConfigRepository {
    pool: PgPool,
}

impl PgFeeConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeeConfigRepository for PgFeeConfigRepository {
    async fn list_active_for_type(
        &self,
        transaction_type: TransactionType,
    ) -> Result<Vec<PlatformFeeConfig>, DatabaseError> {
        sqlx::query_as::<_, PlatformFeeConfig>(
            "SELECT id, transaction_type, percentage, fixed_amount, min_fee, max_fee,
                    effective_from, effective_until, priority, is_active
             FROM platform_fee_configs
             WHERE transaction_type = $1 AND is_active = TRUE
             ORDER BY priority DESC, effective_from DESC",
        )
        .bind(transaction_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn effective_window_is_half_open() {
        let now = Utc::now();
        let config = PlatformFeeConfig {
            id: Uuid::new_v4(),
            transaction_type: "DONATION".to_string(),
            percentage: BigDecimal::from(0),
            fixed_amount: BigDecimal::from(0),
            min_fee: None,
            max_fee: None,
            effective_from: now - Duration::days(1),
            effective_until: Some(now),
            priority: 0,
            is_active: true,
        };
        assert!(config.is_effective_at(now - Duration::hours(1)));
        assert!(!config.is_effective_at(now));
        assert!(!config.is_effective_at(now - Duration::days(2)));
    }
}
