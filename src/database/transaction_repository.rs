use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::reference_repository::{apply_entity_update, EntityUpdate};
use crate::database::repository::TransactionalRepository;
use crate::payments::types::{ReferenceType, TransactionStatus, TransactionType, MANUAL_PROVIDER_ID};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// Payment transaction ledger entry
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub platform_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_amount: BigDecimal,
    pub refunded_amount: BigDecimal,
    /// Refunds reserved but not yet confirmed by the gateway
    pub pending_refund_amount: BigDecimal,
    pub provider_id: String,
    pub payment_method: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub gateway_metadata: JsonValue,
    pub description: Option<String>,
    pub metadata: JsonValue,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub manual_payment_details: Option<JsonValue>,
    pub proof_of_payment_url: Option<String>,
    #[serde(skip_serializing)]
    pub proof_key: Option<String>,
    pub proof_uploaded_at: Option<DateTime<Utc>>,
    pub proof_upload_attempts: i32,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_manual(&self) -> bool {
        self.provider_id.eq_ignore_ascii_case(MANUAL_PROVIDER_ID)
    }

    pub fn has_proof(&self) -> bool {
        self.proof_of_payment_url.is_some() || self.proof_key.is_some()
    }

    /// What a new refund may still claim.
    pub fn refundable_remaining(&self) -> BigDecimal {
        &self.amount - &self.refunded_amount - &self.pending_refund_amount
    }
}

/// Insert payload for a new PENDING transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub pricing: Pricing,
}

/// Mutable pricing and routing of a PENDING transaction
#[derive(Debug, Clone)]
pub struct Pricing {
    pub amount: BigDecimal,
    pub currency: String,
    pub platform_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_amount: BigDecimal,
    pub provider_id: String,
    pub payment_method: Option<String>,
    pub description: Option<String>,
    pub metadata: JsonValue,
    pub manual_payment_details: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ProofRecord {
    pub url: String,
    pub key: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Fields written alongside a status change. `None` leaves a column untouched.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: TransactionStatus,
    /// CAS guard for refunds: refunded_amount must still equal this
    pub expected_refunded_amount: Option<BigDecimal>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub gateway_transaction_id: Option<String>,
    /// Merged into the stored gateway metadata
    pub gateway_metadata: Option<JsonValue>,
    pub proof: Option<ProofRecord>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub refunded_amount: Option<BigDecimal>,
    /// Subtracted from the refund reservation
    pub released_refund_reservation: Option<BigDecimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: TransactionStatus) -> Self {
        Self {
            status,
            expected_refunded_amount: None,
            failure_reason: None,
            processed_at: None,
            gateway_transaction_id: None,
            gateway_metadata: None,
            proof: None,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            rejection_reason: None,
            refunded_amount: None,
            released_refund_reservation: None,
            refunded_at: None,
            refund_reason: None,
        }
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }

    pub fn gateway_metadata(mut self, metadata: Option<JsonValue>) -> Self {
        self.gateway_metadata = metadata;
        self
    }
}

/// Filters for the manual verification queue
#[derive(Debug, Clone)]
pub struct VerificationQueueFilter {
    pub provider_id: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub currency: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for VerificationQueueFilter {
    fn default() -> Self {
        Self {
            provider_id: None,
            transaction_type: None,
            currency: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_gateway_reference(
        &self,
        provider_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// The single PENDING transaction for this payer and reference, if any.
    async fn find_pending_for_reference(
        &self,
        user_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Replace pricing on a PENDING row; clears any previous gateway intent.
    async fn reprice_pending(&self, id: Uuid, pricing: Pricing)
        -> Result<Transaction, DatabaseError>;

    async fn record_gateway_intent(
        &self,
        id: Uuid,
        gateway_transaction_id: &str,
        gateway_metadata: JsonValue,
    ) -> Result<Transaction, DatabaseError>;

    /// Compare-and-swap the status from `expected`, applying the entity
    /// updates in the same unit of work.
    async fn transition(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        change: StatusChange,
        entity_updates: &[EntityUpdate],
    ) -> Result<Transaction, DatabaseError>;

    /// Hold `amount` against the refundable balance of a SUCCEEDED or
    /// PARTIALLY_REFUNDED row. Returns `None` when the row cannot take it.
    async fn reserve_refund(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Give back a reservation whose gateway refund did not happen.
    async fn release_refund_reservation(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DatabaseError>;

    /// Bump the proof upload counter unless it already reached `max_attempts`.
    /// Returns the new count, or `None` when the cap is hit.
    async fn increment_proof_attempts(
        &self,
        id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<i32>, DatabaseError>;

    async fn list_awaiting_verification(
        &self,
        filter: &VerificationQueueFilter,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;
}

// ============================================================================
// Postgres
// ============================================================================

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, reference_type, reference_id, \
     amount, currency, platform_fee, gateway_fee, total_fees, net_amount, refunded_amount, \
     pending_refund_amount, provider_id, payment_method, gateway_transaction_id, gateway_metadata, description, \
     metadata, status, failure_reason, manual_payment_details, proof_of_payment_url, proof_key, \
     proof_uploaded_at, proof_upload_attempts, verified_by, verified_at, verification_notes, \
     rejection_reason, refund_reason, created_at, updated_at, processed_at, refunded_at";

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    transaction_type: String,
    reference_type: String,
    reference_id: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    platform_fee: BigDecimal,
    gateway_fee: BigDecimal,
    total_fees: BigDecimal,
    net_amount: BigDecimal,
    refunded_amount: BigDecimal,
    pending_refund_amount: BigDecimal,
    provider_id: String,
    payment_method: Option<String>,
    gateway_transaction_id: Option<String>,
    gateway_metadata: JsonValue,
    description: Option<String>,
    metadata: JsonValue,
    status: String,
    failure_reason: Option<String>,
    manual_payment_details: Option<JsonValue>,
    proof_of_payment_url: Option<String>,
    proof_key: Option<String>,
    proof_uploaded_at: Option<DateTime<Utc>>,
    proof_upload_attempts: i32,
    verified_by: Option<Uuid>,
    verified_at: Option<DateTime<Utc>>,
    verification_notes: Option<String>,
    rejection_reason: Option<String>,
    refund_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let decode = |e: crate::payments::PaymentError| DatabaseError::decode(e.to_string());
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            transaction_type: TransactionType::from_str(&row.transaction_type).map_err(decode)?,
            reference_type: ReferenceType::from_str(&row.reference_type).map_err(decode)?,
            reference_id: row.reference_id,
            amount: row.amount,
            currency: row.currency,
            platform_fee: row.platform_fee,
            gateway_fee: row.gateway_fee,
            total_fees: row.total_fees,
            net_amount: row.net_amount,
            refunded_amount: row.refunded_amount,
            pending_refund_amount: row.pending_refund_amount,
            provider_id: row.provider_id,
            payment_method: row.payment_method,
            gateway_transaction_id: row.gateway_transaction_id,
            gateway_metadata: row.gateway_metadata,
            description: row.description,
            metadata: row.metadata,
            status: TransactionStatus::from_str(&row.status).map_err(decode)?,
            failure_reason: row.failure_reason,
            manual_payment_details: row.manual_payment_details,
            proof_of_payment_url: row.proof_of_payment_url,
            proof_key: row.proof_key,
            proof_uploaded_at: row.proof_uploaded_at,
            proof_upload_attempts: row.proof_upload_attempts,
            verified_by: row.verified_by,
            verified_at: row.verified_at,
            verification_notes: row.verification_notes,
            rejection_reason: row.rejection_reason,
            refund_reason: row.refund_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
            refunded_at: row.refunded_at,
        })
    }
}

fn decode_rows(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, DatabaseError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Repository for the payment ledger
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar::<_, String>("SELECT status FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn conflict(&self, id: Uuid, expected: TransactionStatus) -> DatabaseError {
        match self.current_status(id).await {
            Ok(None) => DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Transaction".to_string(),
                id: id.to_string(),
            }),
            Ok(actual) => DatabaseError::status_conflict(id, expected, actual),
            Err(e) => e,
        }
    }
}

impl TransactionalRepository for PgTransactionRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let p = new.pricing;
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions
             (id, user_id, transaction_type, reference_type, reference_id, amount, currency,
              platform_fee, gateway_fee, total_fees, net_amount, provider_id, payment_method,
              description, metadata, manual_payment_details, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 'PENDING')
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(new.id)
        .bind(new.user_id)
        .bind(new.transaction_type.as_str())
        .bind(new.reference_type.as_str())
        .bind(new.reference_id)
        .bind(&p.amount)
        .bind(&p.currency)
        .bind(&p.platform_fee)
        .bind(&p.gateway_fee)
        .bind(&p.total_fees)
        .bind(&p.net_amount)
        .bind(&p.provider_id)
        .bind(&p.payment_method)
        .bind(&p.description)
        .bind(&p.metadata)
        .bind(&p.manual_payment_details)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        provider_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE LOWER(provider_id) = LOWER($1) AND gateway_transaction_id = $2",
            TRANSACTION_COLUMNS
        ))
        .bind(provider_id)
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_pending_for_reference(
        &self,
        user_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = $1 AND reference_type = $2
               AND reference_id IS NOT DISTINCT FROM $3
               AND status = 'PENDING'
             ORDER BY created_at DESC
             LIMIT 1",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(reference_type.as_str())
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn reprice_pending(
        &self,
        id: Uuid,
        pricing: Pricing,
    ) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET amount = $2, currency = $3, platform_fee = $4, gateway_fee = $5,
                 total_fees = $6, net_amount = $7, provider_id = $8, payment_method = $9,
                 description = $10, metadata = $11, manual_payment_details = $12,
                 gateway_transaction_id = NULL, gateway_metadata = '{{}}'::JSONB,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(&pricing.amount)
        .bind(&pricing.currency)
        .bind(&pricing.platform_fee)
        .bind(&pricing.gateway_fee)
        .bind(&pricing.total_fees)
        .bind(&pricing.net_amount)
        .bind(&pricing.provider_id)
        .bind(&pricing.payment_method)
        .bind(&pricing.description)
        .bind(&pricing.metadata)
        .bind(&pricing.manual_payment_details)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.conflict(id, TransactionStatus::Pending).await),
        }
    }

    async fn record_gateway_intent(
        &self,
        id: Uuid,
        gateway_transaction_id: &str,
        gateway_metadata: JsonValue,
    ) -> Result<Transaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET gateway_transaction_id = $2, gateway_metadata = gateway_metadata || $3,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(gateway_transaction_id)
        .bind(gateway_metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.conflict(id, TransactionStatus::Pending).await),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        change: StatusChange,
        entity_updates: &[EntityUpdate],
    ) -> Result<Transaction, DatabaseError> {
        let mut tx = self.begin().await?;

        let (proof_url, proof_key, proof_uploaded_at) = match change.proof {
            Some(proof) => (Some(proof.url), Some(proof.key), Some(proof.uploaded_at)),
            None => (None, None, None),
        };

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET status = $3,
                 failure_reason = COALESCE($5, failure_reason),
                 processed_at = COALESCE($6, processed_at),
                 gateway_transaction_id = COALESCE($7, gateway_transaction_id),
                 gateway_metadata = gateway_metadata || COALESCE($8, '{{}}'::JSONB),
                 proof_of_payment_url = COALESCE($9, proof_of_payment_url),
                 proof_key = COALESCE($10, proof_key),
                 proof_uploaded_at = COALESCE($11, proof_uploaded_at),
                 verified_by = COALESCE($12, verified_by),
                 verified_at = COALESCE($13, verified_at),
                 verification_notes = COALESCE($14, verification_notes),
                 rejection_reason = COALESCE($15, rejection_reason),
                 refunded_amount = COALESCE($16, refunded_amount),
                 pending_refund_amount = GREATEST(pending_refund_amount - COALESCE($19::NUMERIC, 0), 0),
                 refunded_at = COALESCE($17, refunded_at),
                 refund_reason = COALESCE($18, refund_reason),
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
               AND ($4::NUMERIC IS NULL OR refunded_amount = $4)
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(change.status.as_str())
        .bind(&change.expected_refunded_amount)
        .bind(&change.failure_reason)
        .bind(change.processed_at)
        .bind(&change.gateway_transaction_id)
        .bind(&change.gateway_metadata)
        .bind(proof_url)
        .bind(proof_key)
        .bind(proof_uploaded_at)
        .bind(change.verified_by)
        .bind(change.verified_at)
        .bind(&change.verification_notes)
        .bind(&change.rejection_reason)
        .bind(&change.refunded_amount)
        .bind(change.refunded_at)
        .bind(&change.refund_reason)
        .bind(&change.released_refund_reservation)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(self.conflict(id, expected).await);
        };

        for update in entity_updates {
            apply_entity_update(&mut tx, update).await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn reserve_refund(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET pending_refund_amount = pending_refund_amount + $2, updated_at = NOW()
             WHERE id = $1
               AND status IN ('SUCCEEDED', 'PARTIALLY_REFUNDED')
               AND refunded_amount + pending_refund_amount + $2 <= amount
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Transaction::try_from).transpose()
    }

    async fn release_refund_reservation(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE transactions
             SET pending_refund_amount = GREATEST(pending_refund_amount - $2, 0), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn increment_proof_attempts(
        &self,
        id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<i32>, DatabaseError> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE transactions
             SET proof_upload_attempts = proof_upload_attempts + 1, updated_at = NOW()
             WHERE id = $1 AND proof_upload_attempts < $2
             RETURNING proof_upload_attempts",
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_awaiting_verification(
        &self,
        filter: &VerificationQueueFilter,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE status = 'PROCESSING'
               AND proof_of_payment_url IS NOT NULL
               AND ($1::TEXT IS NULL OR LOWER(provider_id) = LOWER($1))
               AND ($2::TEXT IS NULL OR transaction_type = $2)
               AND ($3::TEXT IS NULL OR currency = $3)
             ORDER BY proof_uploaded_at ASC NULLS LAST, created_at ASC
             LIMIT $4 OFFSET $5",
            TRANSACTION_COLUMNS
        ))
        .bind(&filter.provider_id)
        .bind(filter.transaction_type.map(|t| t.as_str()))
        .bind(&filter.currency)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        decode_rows(rows)
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions
             WHERE status = 'PENDING' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        decode_rows(rows)
    }
}
