use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::transaction_repository::{Transaction, TransactionRepository};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{TransactionStatus, WebhookEvent};
use crate::services::transaction_ledger::{payment_outcome, TransactionLedger};

/// What a delivered webhook did to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// The transaction already reflects this event or has moved past it
    Duplicate {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    Ignored {
        reason: String,
    },
}

pub struct WebhookProcessor {
    transactions: Arc<dyn TransactionRepository>,
    gateways: Arc<GatewayRegistry>,
    ledger: Arc<TransactionLedger>,
}

impl WebhookProcessor {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        gateways: Arc<GatewayRegistry>,
        ledger: Arc<TransactionLedger>,
    ) -> Self {
        Self {
            transactions,
            gateways,
            ledger,
        }
    }

    /// Verify, parse and apply a gateway webhook. Redelivered events are
    /// acknowledged without changing anything.
    pub async fn process_webhook(
        &self,
        provider_id: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookOutcome> {
        let adapter = self.gateways.get(provider_id)?;

        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            warn!(provider = %provider_id, "webhook rejected: missing signature");
            return Err(unverified(provider_id, "missing signature"));
        };

        let verification = adapter
            .verify_webhook_signature(payload, signature)
            .map_err(|e| unverified(provider_id, &e.to_string()))?;
        if !verification.valid {
            error!(provider = %provider_id, reason = ?verification.reason, "Invalid webhook signature");
            return Err(unverified(
                provider_id,
                verification.reason.as_deref().unwrap_or("invalid signature"),
            ));
        }

        let event = adapter
            .parse_webhook_event(payload)
            .map_err(|e| AppError::invalid_field("payload", e.to_string()))?;

        info!(
            provider = %provider_id,
            event_type = %event.event_type,
            event_id = ?event.event_id,
            gateway_transaction_id = ?event.gateway_transaction_id,
            "📨 webhook received"
        );

        let Some(target) = adapter.map_event_type(&event.event_type) else {
            info!(provider = %provider_id, event_type = %event.event_type, "ignoring unmapped webhook event");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unhandled event type {}", event.event_type),
            });
        };

        let Some(tx) = self.find_transaction(provider_id, &event).await? else {
            warn!(provider = %provider_id, event_type = %event.event_type, "webhook for unknown transaction");
            return Ok(WebhookOutcome::Ignored {
                reason: "no matching transaction".to_string(),
            });
        };

        if tx.status == target || !tx.status.can_transition_to(target) {
            info!(
                transaction_id = %tx.id,
                current = %tx.status,
                target = %target,
                "webhook already reflected, skipping"
            );
            return Ok(WebhookOutcome::Duplicate {
                transaction_id: tx.id,
                status: tx.status,
            });
        }

        let failure_reason = event
            .payload
            .pointer("/data/gateway_response")
            .or_else(|| event.payload.get("failure_reason"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let (mut change, effects) = payment_outcome(
            &tx,
            target,
            failure_reason,
            Some(serde_json::json!({
                "last_webhook": {
                    "event_type": event.event_type,
                    "event_id": event.event_id,
                    "received_at": event.received_at,
                }
            })),
        );
        if tx.gateway_transaction_id.is_none() {
            change.gateway_transaction_id = event.gateway_transaction_id.clone();
        }

        let outcome = self.ledger.transition(&tx, change, effects).await?;
        if !outcome.applied {
            return Ok(WebhookOutcome::Duplicate {
                transaction_id: tx.id,
                status: outcome.transaction.status,
            });
        }

        info!(
            transaction_id = %tx.id,
            status = %outcome.transaction.status,
            "✅ webhook applied"
        );
        Ok(WebhookOutcome::Applied {
            transaction_id: tx.id,
            status: outcome.transaction.status,
        })
    }

    async fn find_transaction(
        &self,
        provider_id: &str,
        event: &WebhookEvent,
    ) -> AppResult<Option<Transaction>> {
        if let Some(id) = event.transaction_id {
            if let Some(tx) = self.transactions.find_by_id(id).await? {
                if tx.provider_id.eq_ignore_ascii_case(provider_id) {
                    return Ok(Some(tx));
                }
                warn!(transaction_id = %id, provider = %provider_id, "webhook provider does not match transaction");
            }
        }
        match &event.gateway_transaction_id {
            Some(reference) => Ok(self
                .transactions
                .find_by_gateway_reference(provider_id, reference)
                .await?),
            None => Ok(None),
        }
    }
}

fn unverified(provider_id: &str, reason: &str) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::UnverifiedWebhook {
        provider: provider_id.to_string(),
        reason: reason.to_string(),
    }))
}
