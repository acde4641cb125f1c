use crate::database::transaction_repository::{Transaction, TransactionRepository};
use crate::payments::types::TransactionStatus;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::transaction_ledger::{payment_outcome, TransactionLedger};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaymentMonitorConfig {
    pub poll_interval: Duration,
    /// PENDING rows younger than this are left alone
    pub stale_after: ChronoDuration,
    /// Manual payers must upload proof within this window
    pub manual_deadline: ChronoDuration,
    pub batch_size: i64,
}

impl PaymentMonitorConfig {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.workers.monitor_interval_secs),
            stale_after: ChronoDuration::minutes(config.workers.stale_pending_after_mins),
            manual_deadline: ChronoDuration::hours(config.payments.manual_payment_deadline_hours),
            batch_size: config.workers.monitor_batch_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Ask the gateway for the current status
    Sync,
    /// Give up on the payment
    Expire,
    Wait,
}

/// What to do with a PENDING transaction found by the sweep.
pub fn classify(tx: &Transaction, manual_deadline: ChronoDuration, now: DateTime<Utc>) -> MonitorAction {
    let past_deadline = tx.created_at + manual_deadline < now;
    if tx.is_manual() {
        if past_deadline && !tx.has_proof() {
            MonitorAction::Expire
        } else {
            MonitorAction::Wait
        }
    } else if tx.gateway_transaction_id.is_some() {
        MonitorAction::Sync
    } else if past_deadline {
        // gateway intent was never created
        MonitorAction::Expire
    } else {
        MonitorAction::Wait
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Reconciles payments stuck in PENDING: polls gateways for automatic
/// payments and expires manual ones whose proof never arrived.
pub struct PaymentMonitorWorker {
    transactions: Arc<dyn TransactionRepository>,
    orchestrator: Arc<PaymentOrchestrator>,
    ledger: Arc<TransactionLedger>,
    config: PaymentMonitorConfig,
}

impl PaymentMonitorWorker {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        orchestrator: Arc<PaymentOrchestrator>,
        ledger: Arc<TransactionLedger>,
        config: PaymentMonitorConfig,
    ) -> Self {
        Self {
            transactions,
            orchestrator,
            ledger,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_mins = self.config.stale_after.num_minutes(),
            manual_deadline_hours = self.config.manual_deadline.num_hours(),
            "payment monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        warn!(error = %e, "payment monitor cycle failed");
                    }
                }
            }
        }

        info!("payment monitor worker stopped");
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let stale = self
            .transactions
            .list_stale_pending(now - self.config.stale_after, self.config.batch_size)
            .await?;

        for tx in stale {
            match classify(&tx, self.config.manual_deadline, now) {
                MonitorAction::Wait => {}
                MonitorAction::Sync => {
                    let Some(reference) = tx.gateway_transaction_id.clone() else {
                        continue;
                    };
                    match self.orchestrator.sync_with_gateway(&tx, &reference).await {
                        Ok(updated) if updated.status != tx.status => {
                            info!(transaction_id = %tx.id, status = %updated.status, "pending payment reconciled");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(transaction_id = %tx.id, error = %e, "gateway status check failed"),
                    }
                }
                MonitorAction::Expire => {
                    let reason = if tx.is_manual() {
                        "Proof of payment was not uploaded before the deadline"
                    } else {
                        "Payment expired before completion"
                    };
                    let (change, effects) = payment_outcome(
                        &tx,
                        TransactionStatus::Canceled,
                        Some(reason.to_string()),
                        None,
                    );
                    match self.ledger.transition(&tx, change, effects).await {
                        Ok(outcome) if outcome.applied => {
                            info!(transaction_id = %tx.id, "⏰ expired pending payment");
                        }
                        Ok(_) => {}
                        Err(e) => error!(transaction_id = %tx.id, error = %e, "failed to expire payment"),
                    }
                }
            }
        }
        Ok(())
    }
}
