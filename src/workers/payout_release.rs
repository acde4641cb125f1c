use crate::services::payout_distribution::PayoutDistributionService;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PayoutReleaseConfig {
    /// How often the worker looks for holds past their release date.
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl PayoutReleaseConfig {
    pub fn from_config(config: &crate::config::WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.payout_release_interval_secs),
            batch_size: config.payout_batch_size,
        }
    }
}

/// Releases escrowed payouts once their hold period has passed.
pub struct PayoutReleaseWorker {
    payouts: Arc<PayoutDistributionService>,
    config: PayoutReleaseConfig,
}

impl PayoutReleaseWorker {
    pub fn new(payouts: Arc<PayoutDistributionService>, config: PayoutReleaseConfig) -> Self {
        Self { payouts, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "payout release worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payout release worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("payout release worker stopped");
    }

    pub async fn run_cycle(&self) {
        match self
            .payouts
            .process_pending_payouts(Utc::now(), self.config.batch_size)
            .await
        {
            Ok(summary) if summary.released + summary.retried + summary.failed > 0 => {
                info!(
                    released = summary.released,
                    retried = summary.retried,
                    failed = summary.failed,
                    "payout release cycle complete"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "payout release cycle failed"),
        }
    }
}
