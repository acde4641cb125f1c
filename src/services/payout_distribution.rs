//! Escrow and payout distribution
//!
//! Once a payment succeeds the net proceeds are held for the recipient the
//! transaction type names, then released by the payout worker after the hold
//! period. Failed releases are retried with exponential backoff.

use crate::config::PaymentsConfig;
use crate::database::payout_repository::{NewPayout, PayoutDistribution, PayoutRepository};
use crate::database::reference_repository::ReferenceEntityStore;
use crate::database::transaction_repository::TransactionRepository;
use crate::error::{AppError, AppResult};
use crate::payments::error::PaymentResult;
use crate::payments::provider::PayoutSender;
use crate::payments::types::{PayoutReceipt, PayoutRequest, PayoutStatus, TransactionStatus};
use crate::services::fee_calculation::round_money;
use crate::services::reference_strategy::StrategyTable;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    pub hold: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl PayoutPolicy {
    pub fn from_config(config: &PaymentsConfig) -> Self {
        Self {
            hold: Duration::days(config.escrow_hold_days),
            max_attempts: config.payout_max_attempts,
            retry_base: Duration::seconds(config.payout_retry_base_secs as i64),
            retry_max: Duration::seconds(config.payout_retry_max_secs as i64),
        }
    }

    /// Delay before the next release attempt: `base * 2^(attempts - 1)`, capped.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
        let delay = self
            .retry_base
            .checked_mul(2_i32.pow(exponent))
            .unwrap_or(self.retry_max);
        delay.min(self.retry_max)
    }
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self::from_config(&PaymentsConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub released: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct PayoutDistributionService {
    transactions: Arc<dyn TransactionRepository>,
    payouts: Arc<dyn PayoutRepository>,
    references: Arc<dyn ReferenceEntityStore>,
    strategies: Arc<StrategyTable>,
    sender: Arc<dyn PayoutSender>,
    policy: PayoutPolicy,
}

impl PayoutDistributionService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        payouts: Arc<dyn PayoutRepository>,
        references: Arc<dyn ReferenceEntityStore>,
        strategies: Arc<StrategyTable>,
        sender: Arc<dyn PayoutSender>,
        policy: PayoutPolicy,
    ) -> Self {
        Self {
            transactions,
            payouts,
            references,
            strategies,
            sender,
            policy,
        }
    }

    /// Create the payout hold for a succeeded transaction. Calling it again
    /// returns the holds already recorded.
    pub async fn distribute_payout(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Vec<PayoutDistribution>> {
        let tx = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| AppError::not_found("Transaction", transaction_id))?;

        if tx.status != TransactionStatus::Succeeded {
            return Err(AppError::invalid_state(
                tx.id,
                tx.status,
                "distribute payout",
            ));
        }

        if self.payouts.exists_for_transaction(tx.id).await? {
            info!(transaction_id = %tx.id, "payouts already distributed");
            return Ok(self.payouts.find_by_transaction(tx.id).await?);
        }

        let strategy = self.strategies.get(tx.transaction_type);
        let Some(recipient) = strategy
            .resolve_recipient(&tx, self.references.as_ref())
            .await?
        else {
            info!(
                transaction_id = %tx.id,
                transaction_type = %tx.transaction_type,
                "no payout recipient, platform retains proceeds"
            );
            return Ok(Vec::new());
        };

        let amount = round_money(&(&tx.amount - &tx.platform_fee - &tx.gateway_fee));
        if amount <= BigDecimal::zero() {
            warn!(transaction_id = %tx.id, amount = %amount, "nothing left to pay out after fees");
            return Ok(Vec::new());
        }

        let release_date = Utc::now() + self.policy.hold;
        let inserted = self
            .payouts
            .insert_many(vec![NewPayout {
                payment_transaction_id: tx.id,
                recipient_id: recipient.recipient_id,
                recipient_type: recipient.recipient_type,
                amount: amount.clone(),
                currency: tx.currency.clone(),
                release_date,
                metadata: json!({
                    "transaction_type": tx.transaction_type,
                    "reference_type": tx.reference_type,
                    "reference_id": tx.reference_id,
                    "payer_id": tx.user_id,
                    "gross_amount": tx.amount.to_string(),
                    "platform_fee": tx.platform_fee.to_string(),
                    "gateway_fee": tx.gateway_fee.to_string(),
                }),
            }])
            .await?;

        if inserted.is_empty() {
            // lost a race with another distributor
            return Ok(self.payouts.find_by_transaction(tx.id).await?);
        }

        info!(
            transaction_id = %tx.id,
            recipient_id = %recipient.recipient_id,
            recipient_type = %recipient.recipient_type,
            amount = %amount,
            release_date = %release_date,
            "💰 payout hold created"
        );
        Ok(inserted)
    }

    /// Release holds whose date has passed.
    pub async fn process_pending_payouts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<ReleaseSummary> {
        let due = self.payouts.list_due(now, limit).await?;
        let mut summary = ReleaseSummary::default();

        for payout in due {
            let Some(claimed) = self.payouts.mark_processing(payout.id).await? else {
                continue;
            };

            let request = PayoutRequest {
                payout_id: claimed.id,
                recipient_id: claimed.recipient_id,
                recipient_type: claimed.recipient_type,
                amount: claimed.amount.clone(),
                currency: claimed.currency.clone(),
                metadata: claimed.metadata.clone(),
            };

            match self.sender.send_payout(request).await {
                Ok(receipt) => {
                    self.payouts
                        .mark_released(claimed.id, &receipt.gateway_payout_id, Utc::now())
                        .await?;
                    info!(
                        payout_id = %claimed.id,
                        gateway_payout_id = %receipt.gateway_payout_id,
                        "payout released"
                    );
                    summary.released += 1;
                }
                Err(e) if claimed.attempts >= self.policy.max_attempts as i32 => {
                    error!(
                        payout_id = %claimed.id,
                        attempts = claimed.attempts,
                        error = %e,
                        "payout failed permanently"
                    );
                    self.payouts.mark_failed(claimed.id, &e.to_string()).await?;
                    summary.failed += 1;
                }
                Err(e) => {
                    let next_attempt_at = now + self.policy.backoff(claimed.attempts);
                    warn!(
                        payout_id = %claimed.id,
                        attempts = claimed.attempts,
                        next_attempt_at = %next_attempt_at,
                        error = %e,
                        "payout release failed, retrying"
                    );
                    self.payouts
                        .schedule_retry(claimed.id, next_attempt_at, &e.to_string())
                        .await?;
                    summary.retried += 1;
                }
            }
        }

        Ok(summary)
    }

    pub async fn cancel_pending_payouts(&self, transaction_id: Uuid, reason: &str) -> AppResult<u64> {
        Ok(self
            .payouts
            .cancel_pending_for_transaction(transaction_id, reason)
            .await?)
    }

    /// Take a partial refund out of the holds still waiting for release.
    /// Returns how much was deducted; holds already paid out are untouched.
    pub async fn reduce_pending_payouts(
        &self,
        transaction_id: Uuid,
        refunded: &BigDecimal,
    ) -> AppResult<BigDecimal> {
        let mut remaining = round_money(refunded);
        let holds = self.payouts.find_by_transaction(transaction_id).await?;

        for hold in holds.iter().filter(|p| p.status == PayoutStatus::Pending) {
            if remaining <= BigDecimal::zero() {
                break;
            }
            let cut = if hold.amount < remaining {
                hold.amount.clone()
            } else {
                remaining.clone()
            };
            if self.payouts.reduce_pending_amount(hold.id, &cut).await?.is_some() {
                remaining = &remaining - &cut;
            }
        }

        let deducted = round_money(refunded) - &remaining;
        if remaining > BigDecimal::zero() {
            warn!(
                %transaction_id,
                deducted = %deducted,
                not_covered = %remaining,
                "partial refund exceeds held payouts"
            );
        }
        Ok(deducted)
    }

    pub async fn payouts_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Vec<PayoutDistribution>> {
        Ok(self.payouts.find_by_transaction(transaction_id).await?)
    }
}

/// Credits the recipient's platform balance. Real bank transfers plug in
/// through another [`PayoutSender`].
#[derive(Debug, Default, Clone)]
pub struct InternalLedgerPayoutSender;

#[async_trait]
impl PayoutSender for InternalLedgerPayoutSender {
    async fn send_payout(&self, request: PayoutRequest) -> PaymentResult<PayoutReceipt> {
        info!(
            payout_id = %request.payout_id,
            recipient_id = %request.recipient_id,
            amount = %request.amount,
            currency = %request.currency,
            "crediting recipient balance"
        );
        Ok(PayoutReceipt {
            gateway_payout_id: format!("ledger-{}", request.payout_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = PayoutPolicy {
            hold: Duration::days(7),
            max_attempts: 5,
            retry_base: Duration::seconds(60),
            retry_max: Duration::seconds(300),
        };
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(120));
        assert_eq!(policy.backoff(3), Duration::seconds(240));
        assert_eq!(policy.backoff(4), Duration::seconds(300));
        assert_eq!(policy.backoff(30), Duration::seconds(300));
    }
}
