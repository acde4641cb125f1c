use crate::database::error::DatabaseError;
use crate::payments::types::{PayoutStatus, RecipientType};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// Funds held for a recipient until the release date
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PayoutDistribution {
    pub id: Uuid,
    pub payment_transaction_id: Uuid,
    pub recipient_id: Uuid,
    pub recipient_type: RecipientType,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PayoutStatus,
    pub release_date: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub gateway_payout_id: Option<String>,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayout {
    pub payment_transaction_id: Uuid,
    pub recipient_id: Uuid,
    pub recipient_type: RecipientType,
    pub amount: BigDecimal,
    pub currency: String,
    pub release_date: DateTime<Utc>,
    pub metadata: JsonValue,
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn exists_for_transaction(&self, transaction_id: Uuid) -> Result<bool, DatabaseError>;

    /// Insert payout holds, skipping any (transaction, recipient) pair that
    /// already exists. Returns the rows actually inserted.
    async fn insert_many(
        &self,
        payouts: Vec<NewPayout>,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError>;

    async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError>;

    /// PENDING payouts whose release date and retry time have passed.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError>;

    /// PENDING -> PROCESSING; `None` when another worker claimed it first.
    async fn mark_processing(
        &self,
        id: Uuid,
    ) -> Result<Option<PayoutDistribution>, DatabaseError>;

    async fn mark_released(
        &self,
        id: Uuid,
        gateway_payout_id: &str,
        released_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// PROCESSING -> PENDING with the attempt recorded.
    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), DatabaseError>;

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError>;

    /// Fail every PENDING payout of a transaction. Returns the count affected.
    async fn cancel_pending_for_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<u64, DatabaseError>;

    /// Lower a PENDING hold by `by`, never below zero.
    async fn reduce_pending_amount(
        &self,
        id: Uuid,
        by: &BigDecimal,
    ) -> Result<Option<PayoutDistribution>, DatabaseError>;
}

const PAYOUT_COLUMNS: &str = "id, payment_transaction_id, recipient_id, recipient_type, amount, \
     currency, status, release_date, released_at, gateway_payout_id, attempts, next_attempt_at, \
     failure_reason, metadata, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PayoutRow {
    id: Uuid,
    payment_transaction_id: Uuid,
    recipient_id: Uuid,
    recipient_type: String,
    amount: BigDecimal,
    currency: String,
    status: String,
    release_date: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    gateway_payout_id: Option<String>,
    attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PayoutRow> for PayoutDistribution {
    type Error = DatabaseError;

    fn try_from(row: PayoutRow) -> Result<Self, Self::Error> {
        Ok(PayoutDistribution {
            id: row.id,
            payment_transaction_id: row.payment_transaction_id,
            recipient_id: row.recipient_id,
            recipient_type: RecipientType::from_str(&row.recipient_type)
                .map_err(|e| DatabaseError::decode(e.to_string()))?,
            amount: row.amount,
            currency: row.currency,
            status: PayoutStatus::from_str(&row.status)
                .map_err(|e| DatabaseError::decode(e.to_string()))?,
            release_date: row.release_date,
            released_at: row.released_at,
            gateway_payout_id: row.gateway_payout_id,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            failure_reason: row.failure_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgPayoutRepository {
    pool: PgPool,
}

impl PgPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutRepository for PgPayoutRepository {
    async fn exists_for_transaction(&self, transaction_id: Uuid) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM payout_distributions WHERE payment_transaction_id = $1)",
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_many(
        &self,
        payouts: Vec<NewPayout>,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut inserted = Vec::with_capacity(payouts.len());

        for payout in payouts {
            let row = sqlx::query_as::<_, PayoutRow>(&format!(
                "INSERT INTO payout_distributions
                 (id, payment_transaction_id, recipient_id, recipient_type, amount, currency,
                  status, release_date, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $8)
                 ON CONFLICT (payment_transaction_id, recipient_id) DO NOTHING
                 RETURNING {}",
                PAYOUT_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(payout.payment_transaction_id)
            .bind(payout.recipient_id)
            .bind(payout.recipient_type.as_str())
            .bind(&payout.amount)
            .bind(&payout.currency)
            .bind(payout.release_date)
            .bind(&payout.metadata)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            if let Some(row) = row {
                inserted.push(PayoutDistribution::try_from(row)?);
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(inserted)
    }

    async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payout_distributions
             WHERE payment_transaction_id = $1 ORDER BY created_at",
            PAYOUT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PayoutDistribution::try_from).collect()
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        let rows = sqlx::query_as::<_, PayoutRow>(&format!(
            "SELECT {} FROM payout_distributions
             WHERE status = 'PENDING' AND release_date <= $1
               AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
             ORDER BY release_date ASC
             LIMIT $2",
            PAYOUT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PayoutDistribution::try_from).collect()
    }

    async fn mark_processing(
        &self,
        id: Uuid,
    ) -> Result<Option<PayoutDistribution>, DatabaseError> {
        sqlx::query_as::<_, PayoutRow>(&format!(
            "UPDATE payout_distributions
             SET status = 'PROCESSING', attempts = attempts + 1, updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PayoutDistribution::try_from)
        .transpose()
    }

    async fn mark_released(
        &self,
        id: Uuid,
        gateway_payout_id: &str,
        released_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payout_distributions
             SET status = 'RELEASED', gateway_payout_id = $2, released_at = $3,
                 failure_reason = NULL, next_attempt_at = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(gateway_payout_id)
        .bind(released_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payout_distributions
             SET status = 'PENDING', next_attempt_at = $2, failure_reason = $3, updated_at = NOW()
             WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payout_distributions
             SET status = 'FAILED', failure_reason = $2, next_attempt_at = NULL, updated_at = NOW()
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn reduce_pending_amount(
        &self,
        id: Uuid,
        by: &BigDecimal,
    ) -> Result<Option<PayoutDistribution>, DatabaseError> {
        sqlx::query_as::<_, PayoutRow>(&format!(
            "UPDATE payout_distributions
             SET amount = GREATEST(amount - $2, 0), updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .bind(by)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(PayoutDistribution::try_from)
        .transpose()
    }

    async fn cancel_pending_for_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payout_distributions
             SET status = 'FAILED', failure_reason = $2, updated_at = NOW()
             WHERE payment_transaction_id = $1 AND status = 'PENDING'",
        )
        .bind(transaction_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
