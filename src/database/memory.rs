//! In-memory stores behind the repository traits.
//!
//! Used by the integration tests and by `SKIP_EXTERNALS=true` runs. They keep
//! the same guarantees as the PostgreSQL versions: status writes are
//! compare-and-swap, one PENDING row per payer and reference, one payout per
//! transaction and recipient, and entity updates land together with the
//! status change that caused them.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::fee_config_repository::{FeeConfigRepository, PlatformFeeConfig};
use crate::database::payment_method_repository::{PaymentMethodConfig, PaymentMethodRepository};
use crate::database::payout_repository::{NewPayout, PayoutDistribution, PayoutRepository};
use crate::database::reference_repository::{EntityUpdate, ReferenceEntity, ReferenceEntityStore};
use crate::database::transaction_repository::{
    NewTransaction, Pricing, StatusChange, Transaction, TransactionRepository,
    VerificationQueueFilter,
};
use crate::database::user_repository::{UserDirectory, UserProfile, UserRole};
use crate::payments::types::{PayoutStatus, ReferenceType, TransactionStatus, TransactionType};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(entity: &str, id: Uuid) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    })
}

fn merge_json(base: &mut JsonValue, patch: JsonValue) {
    match (base.as_object_mut(), patch) {
        (Some(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        (_, patch) => *base = patch,
    }
}

// ============================================================================
// Reference entities
// ============================================================================

#[derive(Default)]
struct ReferenceState {
    entities: HashMap<(ReferenceType, Uuid), ReferenceEntity>,
    sold: HashMap<Uuid, i32>,
    links: HashMap<(ReferenceType, Uuid), Uuid>,
}

impl ReferenceState {
    fn apply(&mut self, update: &EntityUpdate) {
        match update {
            EntityUpdate::SetStatus {
                reference_type,
                id,
                status,
            } => {
                if let Some(entity) = self.entities.get_mut(&(*reference_type, *id)) {
                    entity.status = Some(status.clone());
                }
            }
            EntityUpdate::IncrementSoldQuantity { event_id, quantity } => {
                let sold = self.sold.entry(*event_id).or_insert(0);
                *sold = (*sold + quantity).max(0);
            }
            EntityUpdate::ExtendSubscription { id, days } => {
                if let Some(entity) = self
                    .entities
                    .get_mut(&(ReferenceType::Subscription, *id))
                {
                    let now = Utc::now();
                    let base = entity.period_end.filter(|end| *end > now).unwrap_or(now);
                    entity.period_end = Some(base + Duration::days(i64::from(*days)));
                }
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryReferenceStore {
    state: Mutex<ReferenceState>,
    fail_links: AtomicBool,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: ReferenceEntity) {
        lock(&self.state)
            .entities
            .insert((entity.reference_type, entity.id), entity);
    }

    pub fn get(&self, reference_type: ReferenceType, id: Uuid) -> Option<ReferenceEntity> {
        lock(&self.state).entities.get(&(reference_type, id)).cloned()
    }

    pub fn sold_quantity(&self, event_id: Uuid) -> i32 {
        lock(&self.state).sold.get(&event_id).copied().unwrap_or(0)
    }

    pub fn linked_transaction(&self, reference_type: ReferenceType, id: Uuid) -> Option<Uuid> {
        lock(&self.state).links.get(&(reference_type, id)).copied()
    }

    /// Make `link_transaction` fail, to exercise best-effort linkage.
    pub fn set_fail_links(&self, fail: bool) {
        self.fail_links.store(fail, Ordering::SeqCst);
    }

    fn apply_all(&self, updates: &[EntityUpdate]) {
        let mut state = lock(&self.state);
        for update in updates {
            state.apply(update);
        }
    }
}

#[async_trait]
impl ReferenceEntityStore for InMemoryReferenceStore {
    async fn find_by_id(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
    ) -> Result<Option<ReferenceEntity>, DatabaseError> {
        Ok(self.get(reference_type, id))
    }

    async fn update_status(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        status: &str,
    ) -> Result<(), DatabaseError> {
        self.apply_all(&[EntityUpdate::SetStatus {
            reference_type,
            id,
            status: status.to_string(),
        }]);
        Ok(())
    }

    async fn increment_sold_quantity(
        &self,
        event_id: Uuid,
        quantity: i32,
    ) -> Result<(), DatabaseError> {
        self.apply_all(&[EntityUpdate::IncrementSoldQuantity { event_id, quantity }]);
        Ok(())
    }

    async fn link_transaction(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), DatabaseError> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "reference store unavailable".to_string(),
            }));
        }
        lock(&self.state)
            .links
            .insert((reference_type, id), transaction_id);
        Ok(())
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    rows: Mutex<HashMap<Uuid, Transaction>>,
    references: Option<Arc<InMemoryReferenceStore>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity updates passed to `transition` are applied to this store.
    pub fn with_reference_store(references: Arc<InMemoryReferenceStore>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            references: Some(references),
        }
    }

    fn conflict(row: Option<&Transaction>, id: Uuid, expected: TransactionStatus) -> DatabaseError {
        match row {
            Some(row) => {
                DatabaseError::status_conflict(id, expected, Some(row.status.to_string()))
            }
            None => not_found("Transaction", id),
        }
    }

    fn apply_pricing(row: &mut Transaction, pricing: Pricing) {
        row.amount = pricing.amount;
        row.currency = pricing.currency;
        row.platform_fee = pricing.platform_fee;
        row.gateway_fee = pricing.gateway_fee;
        row.total_fees = pricing.total_fees;
        row.net_amount = pricing.net_amount;
        row.provider_id = pricing.provider_id;
        row.payment_method = pricing.payment_method;
        row.description = pricing.description;
        row.metadata = pricing.metadata;
        row.manual_payment_details = pricing.manual_payment_details;
    }

    fn apply_change(row: &mut Transaction, change: StatusChange) {
        row.status = change.status;
        if let Some(reason) = change.failure_reason {
            row.failure_reason = Some(reason);
        }
        if let Some(at) = change.processed_at {
            row.processed_at = Some(at);
        }
        if let Some(gateway_id) = change.gateway_transaction_id {
            row.gateway_transaction_id = Some(gateway_id);
        }
        if let Some(metadata) = change.gateway_metadata {
            merge_json(&mut row.gateway_metadata, metadata);
        }
        if let Some(proof) = change.proof {
            row.proof_of_payment_url = Some(proof.url);
            row.proof_key = Some(proof.key);
            row.proof_uploaded_at = Some(proof.uploaded_at);
        }
        if let Some(verifier) = change.verified_by {
            row.verified_by = Some(verifier);
        }
        if let Some(at) = change.verified_at {
            row.verified_at = Some(at);
        }
        if let Some(notes) = change.verification_notes {
            row.verification_notes = Some(notes);
        }
        if let Some(reason) = change.rejection_reason {
            row.rejection_reason = Some(reason);
        }
        if let Some(amount) = change.refunded_amount {
            row.refunded_amount = amount;
        }
        if let Some(released) = change.released_refund_reservation {
            row.pending_refund_amount = (&row.pending_refund_amount - &released).max(BigDecimal::from(0));
        }
        if let Some(at) = change.refunded_at {
            row.refunded_at = Some(at);
        }
        if let Some(reason) = change.refund_reason {
            row.refund_reason = Some(reason);
        }
        row.updated_at = Utc::now();
    }

    pub fn all(&self) -> Vec<Transaction> {
        lock(&self.rows).values().cloned().collect()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let mut rows = lock(&self.rows);
        let duplicate = rows.values().any(|row| {
            row.status == TransactionStatus::Pending
                && row.user_id == new.user_id
                && row.reference_type == new.reference_type
                && row.reference_id == new.reference_id
        });
        if duplicate {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: Some("transactions_one_pending_per_reference".to_string()),
            }));
        }

        let now = Utc::now();
        let pricing = new.pricing;
        let row = Transaction {
            id: new.id,
            user_id: new.user_id,
            transaction_type: new.transaction_type,
            reference_type: new.reference_type,
            reference_id: new.reference_id,
            amount: pricing.amount,
            currency: pricing.currency,
            platform_fee: pricing.platform_fee,
            gateway_fee: pricing.gateway_fee,
            total_fees: pricing.total_fees,
            net_amount: pricing.net_amount,
            refunded_amount: BigDecimal::from(0),
            pending_refund_amount: BigDecimal::from(0),
            provider_id: pricing.provider_id,
            payment_method: pricing.payment_method,
            gateway_transaction_id: None,
            gateway_metadata: JsonValue::Object(Default::default()),
            description: pricing.description,
            metadata: pricing.metadata,
            status: TransactionStatus::Pending,
            failure_reason: None,
            manual_payment_details: pricing.manual_payment_details,
            proof_of_payment_url: None,
            proof_key: None,
            proof_uploaded_at: None,
            proof_upload_attempts: 0,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            rejection_reason: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            refunded_at: None,
        };
        rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        provider_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        Ok(lock(&self.rows)
            .values()
            .find(|row| {
                row.provider_id.eq_ignore_ascii_case(provider_id)
                    && row.gateway_transaction_id.as_deref() == Some(gateway_transaction_id)
            })
            .cloned())
    }

    async fn find_pending_for_reference(
        &self,
        user_id: Uuid,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
    ) -> Result<Option<Transaction>, DatabaseError> {
        Ok(lock(&self.rows)
            .values()
            .find(|row| {
                row.status == TransactionStatus::Pending
                    && row.user_id == user_id
                    && row.reference_type == reference_type
                    && row.reference_id == reference_id
            })
            .cloned())
    }

    async fn reprice_pending(
        &self,
        id: Uuid,
        pricing: Pricing,
    ) -> Result<Transaction, DatabaseError> {
        let mut rows = lock(&self.rows);
        match rows.get_mut(&id) {
            Some(row) if row.status == TransactionStatus::Pending => {
                Self::apply_pricing(row, pricing);
                row.gateway_transaction_id = None;
                row.gateway_metadata = JsonValue::Object(Default::default());
                row.updated_at = Utc::now();
                Ok(row.clone())
            }
            other => Err(Self::conflict(other.as_deref(), id, TransactionStatus::Pending)),
        }
    }

    async fn record_gateway_intent(
        &self,
        id: Uuid,
        gateway_transaction_id: &str,
        gateway_metadata: JsonValue,
    ) -> Result<Transaction, DatabaseError> {
        let mut rows = lock(&self.rows);
        match rows.get_mut(&id) {
            Some(row) if row.status == TransactionStatus::Pending => {
                row.gateway_transaction_id = Some(gateway_transaction_id.to_string());
                merge_json(&mut row.gateway_metadata, gateway_metadata);
                row.updated_at = Utc::now();
                Ok(row.clone())
            }
            other => Err(Self::conflict(other.as_deref(), id, TransactionStatus::Pending)),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        change: StatusChange,
        entity_updates: &[EntityUpdate],
    ) -> Result<Transaction, DatabaseError> {
        let mut rows = lock(&self.rows);
        let row = match rows.get_mut(&id) {
            Some(row)
                if row.status == expected
                    && change
                        .expected_refunded_amount
                        .as_ref()
                        .map(|guard| *guard == row.refunded_amount)
                        .unwrap_or(true) =>
            {
                row
            }
            other => return Err(Self::conflict(other.as_deref(), id, expected)),
        };

        Self::apply_change(row, change);
        let updated = row.clone();

        if let Some(references) = &self.references {
            references.apply_all(entity_updates);
        }
        Ok(updated)
    }

    async fn reserve_refund(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut rows = lock(&self.rows);
        let row = rows.get_mut(&id).ok_or_else(|| not_found("Transaction", id))?;
        let refundable = matches!(
            row.status,
            TransactionStatus::Succeeded | TransactionStatus::PartiallyRefunded
        );
        if !refundable || &row.refunded_amount + &row.pending_refund_amount + amount > row.amount {
            return Ok(None);
        }
        row.pending_refund_amount = &row.pending_refund_amount + amount;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn release_refund_reservation(
        &self,
        id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DatabaseError> {
        let mut rows = lock(&self.rows);
        let row = rows.get_mut(&id).ok_or_else(|| not_found("Transaction", id))?;
        row.pending_refund_amount = (&row.pending_refund_amount - amount).max(BigDecimal::from(0));
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_proof_attempts(
        &self,
        id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<i32>, DatabaseError> {
        let mut rows = lock(&self.rows);
        let row = rows.get_mut(&id).ok_or_else(|| not_found("Transaction", id))?;
        if row.proof_upload_attempts >= max_attempts {
            return Ok(None);
        }
        row.proof_upload_attempts += 1;
        row.updated_at = Utc::now();
        Ok(Some(row.proof_upload_attempts))
    }

    async fn list_awaiting_verification(
        &self,
        filter: &VerificationQueueFilter,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut queue: Vec<Transaction> = lock(&self.rows)
            .values()
            .filter(|row| row.status == TransactionStatus::Processing)
            .filter(|row| row.proof_of_payment_url.is_some())
            .filter(|row| {
                filter
                    .provider_id
                    .as_deref()
                    .map(|p| row.provider_id.eq_ignore_ascii_case(p))
                    .unwrap_or(true)
            })
            .filter(|row| {
                filter
                    .transaction_type
                    .map(|t: TransactionType| row.transaction_type == t)
                    .unwrap_or(true)
            })
            .filter(|row| {
                filter
                    .currency
                    .as_deref()
                    .map(|c| row.currency == c)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        queue.sort_by_key(|row| (row.proof_uploaded_at, row.created_at));
        Ok(queue
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut stale: Vec<Transaction> = lock(&self.rows)
            .values()
            .filter(|row| row.status == TransactionStatus::Pending)
            .filter(|row| row.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|row| row.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

// ============================================================================
// Payouts
// ============================================================================

#[derive(Default)]
pub struct InMemoryPayoutRepository {
    rows: Mutex<Vec<PayoutDistribution>>,
}

impl InMemoryPayoutRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PayoutDistribution> {
        lock(&self.rows).clone()
    }

    fn update<F>(&self, id: Uuid, from: &[PayoutStatus], f: F) -> Option<PayoutDistribution>
    where
        F: FnOnce(&mut PayoutDistribution),
    {
        let mut rows = lock(&self.rows);
        let row = rows
            .iter_mut()
            .find(|row| row.id == id && from.contains(&row.status))?;
        f(row);
        row.updated_at = Utc::now();
        Some(row.clone())
    }
}

#[async_trait]
impl PayoutRepository for InMemoryPayoutRepository {
    async fn exists_for_transaction(&self, transaction_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(lock(&self.rows)
            .iter()
            .any(|row| row.payment_transaction_id == transaction_id))
    }

    async fn insert_many(
        &self,
        payouts: Vec<NewPayout>,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        let mut rows = lock(&self.rows);
        let mut inserted = Vec::new();
        let now = Utc::now();

        for payout in payouts {
            let exists = rows.iter().any(|row| {
                row.payment_transaction_id == payout.payment_transaction_id
                    && row.recipient_id == payout.recipient_id
            });
            if exists {
                continue;
            }
            let row = PayoutDistribution {
                id: Uuid::new_v4(),
                payment_transaction_id: payout.payment_transaction_id,
                recipient_id: payout.recipient_id,
                recipient_type: payout.recipient_type,
                amount: payout.amount,
                currency: payout.currency,
                status: PayoutStatus::Pending,
                release_date: payout.release_date,
                released_at: None,
                gateway_payout_id: None,
                attempts: 0,
                next_attempt_at: None,
                failure_reason: None,
                metadata: payout.metadata,
                created_at: now,
                updated_at: now,
            };
            rows.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|row| row.payment_transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PayoutDistribution>, DatabaseError> {
        let mut due: Vec<PayoutDistribution> = lock(&self.rows)
            .iter()
            .filter(|row| row.status == PayoutStatus::Pending && row.release_date <= now)
            .filter(|row| row.next_attempt_at.map(|at| at <= now).unwrap_or(true))
            .cloned()
            .collect();
        due.sort_by_key(|row| row.release_date);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_processing(
        &self,
        id: Uuid,
    ) -> Result<Option<PayoutDistribution>, DatabaseError> {
        Ok(self.update(id, &[PayoutStatus::Pending], |row| {
            row.status = PayoutStatus::Processing;
            row.attempts += 1;
        }))
    }

    async fn mark_released(
        &self,
        id: Uuid,
        gateway_payout_id: &str,
        released_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.update(id, &[PayoutStatus::Processing], |row| {
            row.status = PayoutStatus::Released;
            row.gateway_payout_id = Some(gateway_payout_id.to_string());
            row.released_at = Some(released_at);
            row.failure_reason = None;
            row.next_attempt_at = None;
        });
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        self.update(id, &[PayoutStatus::Processing], |row| {
            row.status = PayoutStatus::Pending;
            row.next_attempt_at = Some(next_attempt_at);
            row.failure_reason = Some(reason.to_string());
        });
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        self.update(
            id,
            &[PayoutStatus::Pending, PayoutStatus::Processing],
            |row| {
                row.status = PayoutStatus::Failed;
                row.failure_reason = Some(reason.to_string());
                row.next_attempt_at = None;
            },
        );
        Ok(())
    }

    async fn cancel_pending_for_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<u64, DatabaseError> {
        let mut rows = lock(&self.rows);
        let mut count = 0;
        for row in rows.iter_mut().filter(|row| {
            row.payment_transaction_id == transaction_id && row.status == PayoutStatus::Pending
        }) {
            row.status = PayoutStatus::Failed;
            row.failure_reason = Some(reason.to_string());
            row.updated_at = Utc::now();
            count += 1;
        }
        Ok(count)
    }

    async fn reduce_pending_amount(
        &self,
        id: Uuid,
        by: &BigDecimal,
    ) -> Result<Option<PayoutDistribution>, DatabaseError> {
        Ok(self.update(id, &[PayoutStatus::Pending], |row| {
            row.amount = (&row.amount - by).max(BigDecimal::from(0));
        }))
    }
}

// ============================================================================
// Configuration tables
// ============================================================================

#[derive(Default)]
pub struct InMemoryFeeConfigRepository {
    rows: Mutex<Vec<PlatformFeeConfig>>,
}

impl InMemoryFeeConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: PlatformFeeConfig) {
        lock(&self.rows).push(config);
    }
}

#[async_trait]
impl FeeConfigRepository for InMemoryFeeConfigRepository {
    async fn list_active_for_type(
        &self,
        transaction_type: TransactionType,
    ) -> Result<Vec<PlatformFeeConfig>, DatabaseError> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|c| c.is_active && c.transaction_type == transaction_type.as_str())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentMethodRepository {
    rows: Mutex<HashMap<String, PaymentMethodConfig>>,
}

impl InMemoryPaymentMethodRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: PaymentMethodConfig) {
        lock(&self.rows).insert(config.code.clone(), config);
    }
}

#[async_trait]
impl PaymentMethodRepository for InMemoryPaymentMethodRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethodConfig>, DatabaseError> {
        Ok(lock(&self.rows)
            .get(code)
            .filter(|config| config.is_active)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<PaymentMethodConfig>, DatabaseError> {
        let mut active: Vec<_> = lock(&self.rows)
            .values()
            .filter(|config| config.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(active)
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<Uuid, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        lock(&self.users).insert(profile.id, profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        Ok(lock(&self.users).get(&id).cloned())
    }

    async fn list_by_roles(&self, roles: &[UserRole]) -> Result<Vec<UserProfile>, DatabaseError> {
        Ok(lock(&self.users)
            .values()
            .filter(|user| roles.contains(&user.role))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_tx(user_id: Uuid, reference_id: Uuid) -> NewTransaction {
        NewTransaction {
            id: Uuid::new_v4(),
            user_id,
            transaction_type: TransactionType::EventTicket,
            reference_type: ReferenceType::Ticket,
            reference_id: Some(reference_id),
            pricing: Pricing {
                amount: BigDecimal::from(50),
                currency: "MYR".to_string(),
                platform_fee: BigDecimal::from(0),
                gateway_fee: BigDecimal::from(0),
                total_fees: BigDecimal::from(0),
                net_amount: BigDecimal::from(50),
                provider_id: "mock".to_string(),
                payment_method: None,
                description: None,
                metadata: json!({}),
                manual_payment_details: None,
            },
        }
    }

    #[tokio::test]
    async fn second_pending_row_for_same_reference_is_rejected() {
        let repo = InMemoryTransactionRepository::new();
        let (user, reference) = (Uuid::new_v4(), Uuid::new_v4());
        repo.insert(new_tx(user, reference)).await.unwrap();
        let err = repo.insert(new_tx(user, reference)).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let repo = InMemoryTransactionRepository::new();
        let tx = repo
            .insert(new_tx(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        repo.transition(
            tx.id,
            TransactionStatus::Pending,
            StatusChange::to(TransactionStatus::Succeeded),
            &[],
        )
        .await
        .unwrap();

        let err = repo
            .transition(
                tx.id,
                TransactionStatus::Pending,
                StatusChange::to(TransactionStatus::Failed),
                &[],
            )
            .await
            .unwrap_err();
        assert!(err.is_status_conflict());
    }

    #[tokio::test]
    async fn entity_updates_apply_with_the_transition() {
        let references = Arc::new(InMemoryReferenceStore::new());
        let repo = InMemoryTransactionRepository::with_reference_store(references.clone());
        let event_id = Uuid::new_v4();
        let tx = repo
            .insert(new_tx(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        repo.transition(
            tx.id,
            TransactionStatus::Pending,
            StatusChange::to(TransactionStatus::Succeeded),
            &[EntityUpdate::IncrementSoldQuantity {
                event_id,
                quantity: 2,
            }],
        )
        .await
        .unwrap();

        assert_eq!(references.sold_quantity(event_id), 2);
    }

    #[tokio::test]
    async fn proof_attempts_stop_at_cap() {
        let repo = InMemoryTransactionRepository::new();
        let tx = repo
            .insert(new_tx(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        for expected in 1..=3 {
            assert_eq!(
                repo.increment_proof_attempts(tx.id, 3).await.unwrap(),
                Some(expected)
            );
        }
        assert_eq!(repo.increment_proof_attempts(tx.id, 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn refund_reservations_cannot_exceed_amount() {
        let repo = InMemoryTransactionRepository::new();
        let tx = repo
            .insert(new_tx(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        let thirty = BigDecimal::from(30);

        // not refundable while pending
        assert!(repo.reserve_refund(tx.id, &thirty).await.unwrap().is_none());

        repo.transition(
            tx.id,
            TransactionStatus::Pending,
            StatusChange::to(TransactionStatus::Succeeded),
            &[],
        )
        .await
        .unwrap();

        let held = repo.reserve_refund(tx.id, &thirty).await.unwrap().unwrap();
        assert_eq!(held.pending_refund_amount, thirty);
        assert_eq!(held.refundable_remaining(), BigDecimal::from(20));
        assert!(repo.reserve_refund(tx.id, &thirty).await.unwrap().is_none());

        repo.release_refund_reservation(tx.id, &thirty).await.unwrap();
        assert!(repo.reserve_refund(tx.id, &thirty).await.unwrap().is_some());
    }
}
