//! Status writes for payment transactions.
//!
//! Every write is a compare-and-swap on the status the caller last read.
//! Reference entity updates commit together with the status change; the
//! remaining consequences are returned as side effects and dispatched after
//! the commit.

use crate::database::reference_repository::ReferenceEntityStore;
use crate::database::transaction_repository::{StatusChange, Transaction, TransactionRepository};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::payments::types::TransactionStatus;
use crate::services::fee_calculation::round_money;
use crate::services::notification::{Notification, NotificationKind};
use crate::services::reference_strategy::{SettlementPlan, StrategyTable};
use crate::services::side_effects::{SideEffect, SideEffectDispatcher};
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info};

/// Result of a ledger write
#[derive(Debug, Clone)]
pub struct LedgerOutcome {
    pub transaction: Transaction,
    /// `false` when another writer moved the transaction first
    pub applied: bool,
}

const MAX_REFUND_CAS_ATTEMPTS: usize = 3;

pub struct TransactionLedger {
    transactions: Arc<dyn TransactionRepository>,
    references: Arc<dyn ReferenceEntityStore>,
    strategies: Arc<StrategyTable>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl TransactionLedger {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        references: Arc<dyn ReferenceEntityStore>,
        strategies: Arc<StrategyTable>,
        dispatcher: Arc<SideEffectDispatcher>,
    ) -> Self {
        Self {
            transactions,
            references,
            strategies,
            dispatcher,
        }
    }

    pub async fn get(&self, id: uuid::Uuid) -> AppResult<Transaction> {
        self.transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Transaction", id))
    }

    /// Move `current` to `change.status`. Entering SUCCEEDED applies the
    /// type's settlement and queues the payout. `effects` run only if this
    /// call wins the swap.
    pub async fn transition(
        &self,
        current: &Transaction,
        change: StatusChange,
        effects: Vec<SideEffect>,
    ) -> AppResult<LedgerOutcome> {
        let target = change.status;
        if !current.status.can_transition_to(target) {
            return Err(AppError::invalid_state(
                current.id,
                current.status,
                format!("transition to {}", target),
            ));
        }

        let mut plan = match target {
            TransactionStatus::Succeeded => {
                let mut plan = self
                    .strategies
                    .get(current.transaction_type)
                    .on_succeeded(current, self.references.as_ref())
                    .await?;
                plan.side_effects.push(SideEffect::DistributePayout {
                    transaction_id: current.id,
                });
                plan
            }
            _ => SettlementPlan::default(),
        };
        plan.side_effects = effects.into_iter().chain(plan.side_effects).collect();

        self.commit(current, change, plan).await
    }

    /// Hold `amount` of the refundable balance for one refund. Only the
    /// holder may ask the gateway to move the money.
    pub async fn reserve_refund(
        &self,
        current: &Transaction,
        amount: &BigDecimal,
    ) -> AppResult<Transaction> {
        if !current.status.is_refundable() {
            return Err(AppError::invalid_state(current.id, current.status, "refund"));
        }
        check_refund_bound(current, amount)?;

        if let Some(reserved) = self.transactions.reserve_refund(current.id, amount).await? {
            return Ok(reserved);
        }

        let latest = self.get(current.id).await?;
        if !latest.status.is_refundable() {
            return Err(AppError::invalid_state(latest.id, latest.status, "refund"));
        }
        check_refund_bound(&latest, amount)?;
        // balance was taken and given back between the two reads
        Err(AppError::invalid_state(latest.id, latest.status, "refund"))
    }

    /// Undo a reservation after the gateway refused or never answered.
    pub async fn release_refund(&self, transaction_id: uuid::Uuid, amount: &BigDecimal) {
        if let Err(e) = self
            .transactions
            .release_refund_reservation(transaction_id, amount)
            .await
        {
            error!(
                transaction_id = %transaction_id,
                amount = %amount,
                error = %e,
                "failed to release refund reservation"
            );
        }
    }

    /// Record a reserved refund of `amount` against a SUCCEEDED or
    /// PARTIALLY_REFUNDED transaction. A full refund reverses the settlement
    /// and cancels held payouts.
    pub async fn record_refund(
        &self,
        current: &Transaction,
        amount: &BigDecimal,
        reason: Option<String>,
        gateway_metadata: Option<JsonValue>,
        effects: Vec<SideEffect>,
    ) -> AppResult<Transaction> {
        let amount = round_money(amount);
        let mut current = current.clone();

        for _ in 0..MAX_REFUND_CAS_ATTEMPTS {
            if !current.status.is_refundable() || amount > current.pending_refund_amount {
                return Err(AppError::invalid_state(current.id, current.status, "refund"));
            }

            let refunded_total = &current.refunded_amount + &amount;
            let fully_refunded = refunded_total >= current.amount;
            let status = if fully_refunded {
                TransactionStatus::Refunded
            } else {
                TransactionStatus::PartiallyRefunded
            };

            let mut change = StatusChange::to(status);
            change.expected_refunded_amount = Some(current.refunded_amount.clone());
            change.refunded_amount = Some(refunded_total);
            change.released_refund_reservation = Some(amount.clone());
            change.refunded_at = Some(Utc::now());
            change.refund_reason = reason.clone();
            change.gateway_metadata = gateway_metadata.clone();

            let mut plan = if fully_refunded {
                let mut plan = self
                    .strategies
                    .get(current.transaction_type)
                    .on_refunded(&current, self.references.as_ref())
                    .await?;
                plan.side_effects.push(SideEffect::CancelPendingPayouts {
                    transaction_id: current.id,
                    reason: "payment fully refunded".to_string(),
                });
                plan
            } else {
                SettlementPlan {
                    side_effects: vec![SideEffect::ReducePendingPayouts {
                        transaction_id: current.id,
                        amount: amount.clone(),
                    }],
                    ..SettlementPlan::default()
                }
            };
            plan.side_effects = effects.iter().cloned().chain(plan.side_effects).collect();

            let outcome = self.commit(&current, change, plan).await?;
            if outcome.applied {
                return Ok(outcome.transaction);
            }
            current = outcome.transaction;
        }

        error!(
            transaction_id = %current.id,
            amount = %amount,
            "refund could not be recorded after concurrent updates"
        );
        Err(AppError::invalid_state(current.id, current.status, "refund"))
    }

    async fn commit(
        &self,
        current: &Transaction,
        change: StatusChange,
        plan: SettlementPlan,
    ) -> AppResult<LedgerOutcome> {
        let target = change.status;
        match self
            .transactions
            .transition(current.id, current.status, change, &plan.entity_updates)
            .await
        {
            Ok(updated) => {
                info!(
                    transaction_id = %updated.id,
                    from = %current.status,
                    to = %updated.status,
                    "transaction status updated"
                );
                self.dispatcher.dispatch(plan.side_effects).await;
                Ok(LedgerOutcome {
                    transaction: updated,
                    applied: true,
                })
            }
            Err(e) if e.is_status_conflict() => {
                info!(
                    transaction_id = %current.id,
                    expected = %current.status,
                    target = %target,
                    "status changed concurrently, returning current state"
                );
                Ok(LedgerOutcome {
                    transaction: self.get(current.id).await?,
                    applied: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `amount` must be positive and fit in what has not been refunded yet.
pub fn check_refund_bound(tx: &Transaction, amount: &BigDecimal) -> AppResult<()> {
    if *amount <= BigDecimal::zero() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "Refund amount must be positive".to_string(),
            },
        )));
    }
    let remaining = tx.refundable_remaining();
    if *amount > remaining {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::RefundExceedsRemaining {
                requested: amount.to_string(),
                remaining: remaining.to_string(),
            },
        )));
    }
    Ok(())
}

/// Status change and payer notification for a gateway reported outcome.
pub fn payment_outcome(
    tx: &Transaction,
    target: TransactionStatus,
    failure_reason: Option<String>,
    provider_data: Option<JsonValue>,
) -> (StatusChange, Vec<SideEffect>) {
    let data = json!({ "transaction_id": tx.id, "amount": tx.amount.to_string(), "currency": tx.currency });
    let change = StatusChange::to(target).gateway_metadata(provider_data);

    match target {
        TransactionStatus::Succeeded => (
            change.processed_at(Utc::now()),
            vec![SideEffect::Notify(
                Notification::new(
                    tx.user_id,
                    NotificationKind::PaymentSucceeded,
                    "Payment Successful",
                    format!("Your payment of {} {} was successful", tx.amount, tx.currency),
                )
                .with_data(data),
            )],
        ),
        TransactionStatus::Failed | TransactionStatus::Canceled => {
            let reason = failure_reason.unwrap_or_else(|| {
                if target == TransactionStatus::Canceled {
                    "Payment expired before completion".to_string()
                } else {
                    "Payment was not completed".to_string()
                }
            });
            (
                change.failure_reason(reason.clone()),
                vec![SideEffect::Notify(
                    Notification::new(
                        tx.user_id,
                        NotificationKind::PaymentFailed,
                        "Payment Failed",
                        format!("Your payment of {} {} failed: {}", tx.amount, tx.currency, reason),
                    )
                    .with_data(data),
                )],
            )
        }
        _ => (change, Vec::new()),
    }
}
