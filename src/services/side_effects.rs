use crate::database::reference_repository::ReferenceEntityStore;
use crate::database::user_repository::{UserDirectory, UserRole};
use crate::payments::types::ReferenceType;
use crate::services::notification::{Notification, NotificationKind, NotificationSink};
use crate::services::payout_distribution::PayoutDistributionService;
use crate::services::ticketing::{TicketAdmission, TicketIssuer};
use bigdecimal::BigDecimal;
use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const REVIEWER_FANOUT: usize = 8;

/// Work that runs after a ledger write has committed. Failures are logged and
/// never roll back or fail the operation that produced them.
#[derive(Debug, Clone)]
pub enum SideEffect {
    Notify(Notification),
    /// Issue the admission pass and send it with the ticket receipt
    IssueTicket {
        admission: TicketAdmission,
        receipt: Notification,
    },
    /// Fan out to every admin and moderator
    NotifyReviewers {
        title: String,
        message: String,
        data: JsonValue,
    },
    LinkReference {
        reference_type: ReferenceType,
        reference_id: Uuid,
        transaction_id: Uuid,
    },
    DistributePayout {
        transaction_id: Uuid,
    },
    CancelPendingPayouts {
        transaction_id: Uuid,
        reason: String,
    },
    /// Partial refund comes out of the recipient's held share
    ReducePendingPayouts {
        transaction_id: Uuid,
        amount: BigDecimal,
    },
}

impl SideEffect {
    fn name(&self) -> &'static str {
        match self {
            SideEffect::Notify(_) => "notify",
            SideEffect::IssueTicket { .. } => "issue_ticket",
            SideEffect::NotifyReviewers { .. } => "notify_reviewers",
            SideEffect::LinkReference { .. } => "link_reference",
            SideEffect::DistributePayout { .. } => "distribute_payout",
            SideEffect::CancelPendingPayouts { .. } => "cancel_pending_payouts",
            SideEffect::ReducePendingPayouts { .. } => "reduce_pending_payouts",
        }
    }
}

pub struct SideEffectDispatcher {
    notifier: Arc<dyn NotificationSink>,
    tickets: Arc<dyn TicketIssuer>,
    users: Arc<dyn UserDirectory>,
    references: Arc<dyn ReferenceEntityStore>,
    payouts: Arc<PayoutDistributionService>,
}

impl SideEffectDispatcher {
    pub fn new(
        notifier: Arc<dyn NotificationSink>,
        tickets: Arc<dyn TicketIssuer>,
        users: Arc<dyn UserDirectory>,
        references: Arc<dyn ReferenceEntityStore>,
        payouts: Arc<PayoutDistributionService>,
    ) -> Self {
        Self {
            notifier,
            tickets,
            users,
            references,
            payouts,
        }
    }

    /// Run every effect in order.
    pub async fn dispatch(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            let name = effect.name();
            if let Err(error) = self.run(effect).await {
                warn!(side_effect = name, %error, "side effect failed");
            }
        }
    }

    async fn run(&self, effect: SideEffect) -> anyhow::Result<()> {
        match effect {
            SideEffect::Notify(notification) => {
                self.notifier.notify(notification).await?;
            }
            SideEffect::IssueTicket {
                admission,
                mut receipt,
            } => {
                // the receipt goes out even when the pass cannot be issued
                match self.tickets.issue(&admission).await {
                    Ok(pass) => {
                        if let Some(data) = receipt.data.as_object_mut() {
                            data.insert("qr_payload".to_string(), JsonValue::String(pass.qr_payload));
                        }
                    }
                    Err(error) => {
                        warn!(ticket_id = %admission.ticket_id, %error, "admission pass not issued");
                    }
                }
                self.notifier.notify(receipt).await?;
            }
            SideEffect::NotifyReviewers {
                title,
                message,
                data,
            } => {
                let reviewers = self
                    .users
                    .list_by_roles(&[UserRole::Admin, UserRole::Moderator])
                    .await?;
                stream::iter(reviewers)
                    .for_each_concurrent(REVIEWER_FANOUT, |reviewer| {
                        let notification = Notification::new(
                            reviewer.id,
                            NotificationKind::ProofAwaitingReview,
                            title.clone(),
                            message.clone(),
                        )
                        .with_data(data.clone());
                        async move {
                            if let Err(error) = self.notifier.notify(notification).await {
                                warn!(reviewer_id = %reviewer.id, %error, "reviewer notification failed");
                            }
                        }
                    })
                    .await;
            }
            SideEffect::LinkReference {
                reference_type,
                reference_id,
                transaction_id,
            } => {
                self.references
                    .link_transaction(reference_type, reference_id, transaction_id)
                    .await?;
            }
            SideEffect::DistributePayout { transaction_id } => {
                let payouts = self
                    .payouts
                    .distribute_payout(transaction_id)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                info!(%transaction_id, payouts = payouts.len(), "payout distribution complete");
            }
            SideEffect::CancelPendingPayouts {
                transaction_id,
                reason,
            } => {
                let canceled = self
                    .payouts
                    .cancel_pending_payouts(transaction_id, &reason)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                info!(%transaction_id, canceled, "held payouts canceled");
            }
            SideEffect::ReducePendingPayouts {
                transaction_id,
                amount,
            } => {
                let deducted = self
                    .payouts
                    .reduce_pending_payouts(transaction_id, &amount)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                info!(%transaction_id, deducted = %deducted, "held payouts reduced");
            }
        }
        Ok(())
    }
}
