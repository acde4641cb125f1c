//! Manual payment verification
//!
//! Payers on the manual route upload proof of a bank transfer; staff review
//! the proof and approve or reject the payment.

use crate::config::PaymentsConfig;
use crate::database::payment_method_repository::PaymentMethodRepository;
use crate::database::transaction_repository::{
    ProofRecord, StatusChange, Transaction, TransactionRepository, VerificationQueueFilter,
};
use crate::database::user_repository::UserDirectory;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::payments::types::TransactionStatus;
use crate::services::notification::{Notification, NotificationKind};
use crate::services::side_effects::SideEffect;
use crate::services::storage::{ProofStorage, ProofUpload};
use crate::services::transaction_ledger::TransactionLedger;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const ALLOWED_PROOF_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];
pub const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct UploadProofInput {
    pub transaction_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentInput {
    pub action: VerificationAction,
    pub notes: Option<String>,
}

/// A transaction waiting for review, with a short-lived link to its proof
#[derive(Debug, Clone, Serialize)]
pub struct PendingVerification {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub proof_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub max_proof_uploads: u32,
    pub signed_url_ttl: Duration,
}

impl VerificationPolicy {
    pub fn from_config(config: &PaymentsConfig) -> Self {
        Self {
            max_proof_uploads: config.max_proof_uploads,
            signed_url_ttl: Duration::from_secs(config.signed_url_ttl_secs),
        }
    }
}

pub struct ManualVerificationService {
    transactions: Arc<dyn TransactionRepository>,
    payment_methods: Arc<dyn PaymentMethodRepository>,
    users: Arc<dyn UserDirectory>,
    storage: Arc<dyn ProofStorage>,
    ledger: Arc<TransactionLedger>,
    policy: VerificationPolicy,
}

impl ManualVerificationService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        payment_methods: Arc<dyn PaymentMethodRepository>,
        users: Arc<dyn UserDirectory>,
        storage: Arc<dyn ProofStorage>,
        ledger: Arc<TransactionLedger>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            transactions,
            payment_methods,
            users,
            storage,
            ledger,
            policy,
        }
    }

    /// Store proof of payment and move the transaction into review.
    pub async fn upload_payment_proof(
        &self,
        user_id: Uuid,
        input: UploadProofInput,
    ) -> AppResult<Transaction> {
        let tx = self.ledger.get(input.transaction_id).await?;
        if tx.user_id != user_id {
            return Err(AppError::forbidden("Transaction belongs to another user"));
        }
        if !self.requires_proof(&tx).await? {
            return Err(AppError::invalid_state(tx.id, tx.status, "upload proof"));
        }

        // the cap counts every attempt, whatever state the transaction is in
        let attempts = self
            .transactions
            .increment_proof_attempts(tx.id, self.policy.max_proof_uploads as i32)
            .await?;
        let Some(attempts) = attempts else {
            warn!(transaction_id = %tx.id, "proof upload cap reached");
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::TooManyAttempts {
                    transaction_id: tx.id.to_string(),
                    max_attempts: self.policy.max_proof_uploads,
                },
            )));
        };

        if tx.status != TransactionStatus::Pending {
            return Err(AppError::invalid_state(tx.id, tx.status, "upload proof"));
        }
        validate_proof(&input)?;

        let stored = self
            .storage
            .upload_proof(ProofUpload {
                transaction_id: tx.id,
                file_name: input.file_name,
                content_type: input.content_type,
                bytes: input.bytes,
            })
            .await?;

        let mut change = StatusChange::to(TransactionStatus::Processing);
        change.proof = Some(ProofRecord {
            url: stored.url.clone(),
            key: stored.key.clone(),
            uploaded_at: Utc::now(),
        });

        let data = json!({
            "transaction_id": tx.id,
            "amount": tx.amount.to_string(),
            "currency": tx.currency,
            "payment_method": tx.payment_method,
        });
        let effects = vec![
            SideEffect::NotifyReviewers {
                title: "Payment Proof Uploaded".to_string(),
                message: format!(
                    "A payment of {} {} is waiting for verification",
                    tx.amount, tx.currency
                ),
                data: data.clone(),
            },
            SideEffect::Notify(
                Notification::new(
                    tx.user_id,
                    NotificationKind::ProofReceived,
                    "Proof Received",
                    "We received your proof of payment and will review it shortly",
                )
                .with_data(data),
            ),
        ];

        let outcome = self.ledger.transition(&tx, change, effects).await?;
        if !outcome.applied {
            return Err(AppError::invalid_state(
                tx.id,
                outcome.transaction.status,
                "upload proof",
            ));
        }

        info!(transaction_id = %tx.id, attempts, key = %stored.key, "📎 payment proof uploaded");
        Ok(outcome.transaction)
    }

    /// Approve or reject a manual payment under review.
    pub async fn verify_manual_payment(
        &self,
        reviewer_id: Uuid,
        transaction_id: Uuid,
        input: VerifyPaymentInput,
    ) -> AppResult<Transaction> {
        let reviewer = self.users.find_by_id(reviewer_id).await?;
        if !reviewer.map(|r| r.role.is_staff()).unwrap_or(false) {
            return Err(AppError::forbidden("Only admins and moderators can verify payments"));
        }

        let tx = self.ledger.get(transaction_id).await?;
        if tx.status != TransactionStatus::Processing || !tx.has_proof() {
            return Err(AppError::invalid_state(tx.id, tx.status, "verify payment"));
        }

        let now = Utc::now();
        let data = json!({ "transaction_id": tx.id, "amount": tx.amount.to_string(), "currency": tx.currency });
        let (change, effects) = match input.action {
            VerificationAction::Approve => {
                let mut change = StatusChange::to(TransactionStatus::Succeeded).processed_at(now);
                change.verified_by = Some(reviewer_id);
                change.verified_at = Some(now);
                change.verification_notes = input.notes.clone();
                let notice = Notification::new(
                    tx.user_id,
                    NotificationKind::ManualPaymentApproved,
                    "Payment Verified",
                    format!("Your payment of {} {} has been verified", tx.amount, tx.currency),
                )
                .with_data(data);
                (change, vec![SideEffect::Notify(notice)])
            }
            VerificationAction::Reject => {
                let reason = input
                    .notes
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Proof of payment could not be verified".to_string());
                let mut change = StatusChange::to(TransactionStatus::Failed)
                    .failure_reason(format!("Manual verification rejected: {}", reason));
                change.verified_by = Some(reviewer_id);
                change.verified_at = Some(now);
                change.rejection_reason = Some(reason.clone());
                let notice = Notification::new(
                    tx.user_id,
                    NotificationKind::ManualPaymentRejected,
                    "Payment Not Verified",
                    format!(
                        "We could not verify your payment: {}. You can start a new payment and upload a fresh proof.",
                        reason
                    ),
                )
                .with_data(json!({ "transaction_id": tx.id, "reason": reason }));
                (change, vec![SideEffect::Notify(notice)])
            }
        };

        let outcome = self.ledger.transition(&tx, change, effects).await?;
        if !outcome.applied {
            return Err(AppError::invalid_state(
                tx.id,
                outcome.transaction.status,
                "verify payment",
            ));
        }

        info!(
            transaction_id = %tx.id,
            %reviewer_id,
            action = ?input.action,
            status = %outcome.transaction.status,
            "manual payment reviewed"
        );
        Ok(outcome.transaction)
    }

    /// The review queue, oldest first, with signed proof links.
    pub async fn get_pending_manual_verifications(
        &self,
        reviewer_id: Uuid,
        filter: VerificationQueueFilter,
    ) -> AppResult<Vec<PendingVerification>> {
        let reviewer = self.users.find_by_id(reviewer_id).await?;
        if !reviewer.map(|r| r.role.is_staff()).unwrap_or(false) {
            return Err(AppError::forbidden("Only admins and moderators can review payments"));
        }

        let transactions = self.transactions.list_awaiting_verification(&filter).await?;
        let mut items = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            let proof_url = match &transaction.proof_key {
                Some(key) => Some(self.storage.signed_url(key, self.policy.signed_url_ttl)?),
                None => transaction.proof_of_payment_url.clone(),
            };
            items.push(PendingVerification {
                transaction,
                proof_url,
            });
        }
        Ok(items)
    }

    /// The method's own flag decides; without a configured method only
    /// manual payments take proof.
    async fn requires_proof(&self, tx: &Transaction) -> AppResult<bool> {
        let method = match &tx.payment_method {
            Some(code) => self.payment_methods.find_by_code(code).await?,
            None => None,
        };
        Ok(method.map_or_else(|| tx.is_manual(), |m| m.requires_proof))
    }
}

fn validate_proof(input: &UploadProofInput) -> AppResult<()> {
    let content_type = input.content_type.to_ascii_lowercase();
    if !ALLOWED_PROOF_CONTENT_TYPES.contains(&content_type.as_str()) {
        return Err(AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: "content_type".to_string(),
            reason: format!("{} is not an accepted proof format", input.content_type),
        })));
    }
    if input.bytes.is_empty() {
        return Err(AppError::invalid_field("file", "Proof file is empty"));
    }
    if input.bytes.len() > MAX_PROOF_BYTES {
        return Err(AppError::invalid_field("file", "Proof file exceeds 10 MB"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: &str, size: usize) -> UploadProofInput {
        UploadProofInput {
            transaction_id: Uuid::new_v4(),
            file_name: "receipt".to_string(),
            content_type: content_type.to_string(),
            bytes: vec![1; size],
        }
    }

    #[test]
    fn accepts_images_and_pdf() {
        assert!(validate_proof(&upload("image/png", 10)).is_ok());
        assert!(validate_proof(&upload("IMAGE/JPEG", 10)).is_ok());
        assert!(validate_proof(&upload("application/pdf", 10)).is_ok());
    }

    #[test]
    fn rejects_other_formats_and_sizes() {
        assert!(validate_proof(&upload("text/html", 10)).is_err());
        assert!(validate_proof(&upload("image/png", 0)).is_err());
        assert!(validate_proof(&upload("image/png", MAX_PROOF_BYTES + 1)).is_err());
    }
}
