//! Per transaction type behaviour: who receives the proceeds, what the
//! referenced entity looks like once paid or refunded, and which extra
//! notifications go out.

use crate::database::reference_repository::{EntityUpdate, ReferenceEntity, ReferenceEntityStore};
use crate::database::transaction_repository::Transaction;
use crate::error::AppResult;
use crate::payments::types::{RecipientType, ReferenceType, TransactionType};
use crate::services::notification::{Notification, NotificationKind};
use crate::services::side_effects::SideEffect;
use crate::services::ticketing::TicketAdmission;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const SUBSCRIPTION_PERIOD_DAYS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub recipient_id: Uuid,
    pub recipient_type: RecipientType,
}

/// Writes committed with a status change plus what to do after the commit
#[derive(Debug, Clone, Default)]
pub struct SettlementPlan {
    pub entity_updates: Vec<EntityUpdate>,
    pub side_effects: Vec<SideEffect>,
}

#[async_trait]
pub trait ReferenceStrategy: Send + Sync {
    /// `None` means the platform keeps the proceeds.
    async fn resolve_recipient(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>>;

    async fn on_succeeded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan>;

    /// Only called once the transaction is fully refunded.
    async fn on_refunded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan>;

    /// Customer-facing description sent to the gateway.
    async fn describe(&self, tx: &Transaction, references: &dyn ReferenceEntityStore) -> String;
}

async fn load_reference(
    tx: &Transaction,
    references: &dyn ReferenceEntityStore,
) -> AppResult<Option<ReferenceEntity>> {
    let Some(reference_id) = tx.reference_id else {
        return Ok(None);
    };
    let entity = references
        .find_by_id(tx.reference_type, reference_id)
        .await?;
    if entity.is_none() {
        warn!(
            transaction_id = %tx.id,
            reference_type = %tx.reference_type,
            reference_id = %reference_id,
            "referenced entity not found"
        );
    }
    Ok(entity)
}

fn owner_as(entity: Option<ReferenceEntity>, recipient_type: RecipientType) -> Option<Recipient> {
    entity.and_then(|e| e.owner_id).map(|recipient_id| Recipient {
        recipient_id,
        recipient_type,
    })
}

fn titled(prefix: &str, entity: Option<&ReferenceEntity>) -> String {
    match entity.and_then(|e| e.title.as_deref()) {
        Some(title) => format!("{}: {}", prefix, title),
        None => prefix.to_string(),
    }
}

pub struct TicketStrategy;

#[async_trait]
impl ReferenceStrategy for TicketStrategy {
    async fn resolve_recipient(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>> {
        let ticket = load_reference(tx, references).await?;
        Ok(owner_as(ticket, RecipientType::EventOrganizer))
    }

    async fn on_succeeded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        let Some(ticket) = load_reference(tx, references).await? else {
            return Ok(SettlementPlan::default());
        };

        let mut plan = SettlementPlan::default();
        plan.entity_updates.push(EntityUpdate::SetStatus {
            reference_type: ReferenceType::Ticket,
            id: ticket.id,
            status: "CONFIRMED".to_string(),
        });
        if let Some(event_id) = ticket.event_id {
            plan.entity_updates.push(EntityUpdate::IncrementSoldQuantity {
                event_id,
                quantity: ticket.quantity,
            });
        }
        let admission = TicketAdmission {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            transaction_id: tx.id,
            holder_id: tx.user_id,
            quantity: ticket.quantity,
        };
        plan.side_effects.push(SideEffect::IssueTicket {
            admission,
            receipt: Notification::new(
                tx.user_id,
                NotificationKind::TicketConfirmed,
                "Ticket Confirmed",
                format!(
                    "Your ticket{} is confirmed. Receipt: {} {}",
                    ticket
                        .title
                        .as_deref()
                        .map(|t| format!(" for {}", t))
                        .unwrap_or_default(),
                    tx.amount,
                    tx.currency
                ),
            )
            .with_data(json!({
                "transaction_id": tx.id,
                "ticket_id": ticket.id,
                "event_id": ticket.event_id,
                "quantity": ticket.quantity,
            })),
        });
        Ok(plan)
    }

    async fn on_refunded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        let Some(ticket) = load_reference(tx, references).await? else {
            return Ok(SettlementPlan::default());
        };

        let mut plan = SettlementPlan::default();
        plan.entity_updates.push(EntityUpdate::SetStatus {
            reference_type: ReferenceType::Ticket,
            id: ticket.id,
            status: "REFUNDED".to_string(),
        });
        if let Some(event_id) = ticket.event_id {
            plan.entity_updates.push(EntityUpdate::IncrementSoldQuantity {
                event_id,
                quantity: -ticket.quantity,
            });
        }
        Ok(plan)
    }

    async fn describe(&self, tx: &Transaction, references: &dyn ReferenceEntityStore) -> String {
        let ticket = load_reference(tx, references).await.ok().flatten();
        titled("Event ticket", ticket.as_ref())
    }
}

pub struct MarketplaceOrderStrategy;

#[async_trait]
impl ReferenceStrategy for MarketplaceOrderStrategy {
    async fn resolve_recipient(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>> {
        let order = load_reference(tx, references).await?;
        Ok(owner_as(order, RecipientType::MarketplaceSeller))
    }

    async fn on_succeeded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        let Some(order) = load_reference(tx, references).await? else {
            return Ok(SettlementPlan::default());
        };

        let mut plan = SettlementPlan::default();
        plan.entity_updates.push(EntityUpdate::SetStatus {
            reference_type: ReferenceType::Order,
            id: order.id,
            status: "CONFIRMED".to_string(),
        });

        let data = json!({ "transaction_id": tx.id, "order_id": order.id });
        let buyer = order.holder_id.unwrap_or(tx.user_id);
        plan.side_effects.push(SideEffect::Notify(
            Notification::new(
                buyer,
                NotificationKind::OrderPaid,
                "Order Paid",
                format!("Your payment of {} {} for your order was received", tx.amount, tx.currency),
            )
            .with_data(data.clone()),
        ));
        if let Some(seller) = order.owner_id {
            plan.side_effects.push(SideEffect::Notify(
                Notification::new(
                    seller,
                    NotificationKind::OrderReceived,
                    "New Order",
                    format!(
                        "{} has been paid and is ready to fulfil",
                        titled("Order", Some(&order))
                    ),
                )
                .with_data(data),
            ));
        }
        Ok(plan)
    }

    async fn on_refunded(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        let Some(order) = load_reference(tx, references).await? else {
            return Ok(SettlementPlan::default());
        };
        Ok(SettlementPlan {
            entity_updates: vec![EntityUpdate::SetStatus {
                reference_type: ReferenceType::Order,
                id: order.id,
                status: "REFUNDED".to_string(),
            }],
            side_effects: Vec::new(),
        })
    }

    async fn describe(&self, tx: &Transaction, references: &dyn ReferenceEntityStore) -> String {
        let order = load_reference(tx, references).await.ok().flatten();
        titled("Marketplace order", order.as_ref())
    }
}

pub struct SubscriptionStrategy;

#[async_trait]
impl ReferenceStrategy for SubscriptionStrategy {
    async fn resolve_recipient(
        &self,
        _tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>> {
        Ok(None)
    }

    async fn on_succeeded(
        &self,
        tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        let Some(subscription_id) = tx.reference_id else {
            return Ok(SettlementPlan::default());
        };
        Ok(SettlementPlan {
            entity_updates: vec![
                EntityUpdate::ExtendSubscription {
                    id: subscription_id,
                    days: SUBSCRIPTION_PERIOD_DAYS,
                },
                EntityUpdate::SetStatus {
                    reference_type: ReferenceType::Subscription,
                    id: subscription_id,
                    status: "ACTIVE".to_string(),
                },
            ],
            side_effects: vec![SideEffect::Notify(Notification::new(
                tx.user_id,
                NotificationKind::SubscriptionRenewed,
                "Subscription Renewed",
                format!(
                    "Your subscription has been extended by {} days",
                    SUBSCRIPTION_PERIOD_DAYS
                ),
            ))],
        })
    }

    async fn on_refunded(
        &self,
        tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        Ok(SettlementPlan {
            entity_updates: tx
                .reference_id
                .map(|id| EntityUpdate::SetStatus {
                    reference_type: ReferenceType::Subscription,
                    id,
                    status: "CANCELED".to_string(),
                })
                .into_iter()
                .collect(),
            side_effects: Vec::new(),
        })
    }

    async fn describe(&self, tx: &Transaction, references: &dyn ReferenceEntityStore) -> String {
        let subscription = load_reference(tx, references).await.ok().flatten();
        titled("Subscription", subscription.as_ref())
    }
}

pub struct DonationStrategy;

#[async_trait]
impl ReferenceStrategy for DonationStrategy {
    async fn resolve_recipient(
        &self,
        tx: &Transaction,
        references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>> {
        let recipient_type = match tx.reference_type {
            ReferenceType::User => RecipientType::DonationRecipient,
            ReferenceType::Community => RecipientType::CommunityOrganizer,
            ReferenceType::Event => RecipientType::EventOrganizer,
            _ => return Ok(None),
        };
        let target = load_reference(tx, references).await?;
        Ok(owner_as(target, recipient_type))
    }

    async fn on_succeeded(
        &self,
        _tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        Ok(SettlementPlan::default())
    }

    async fn on_refunded(
        &self,
        _tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        Ok(SettlementPlan::default())
    }

    async fn describe(&self, tx: &Transaction, references: &dyn ReferenceEntityStore) -> String {
        let target = load_reference(tx, references).await.ok().flatten();
        match target.and_then(|t| t.title) {
            Some(title) => format!("Donation to {}", title),
            None => "Donation".to_string(),
        }
    }
}

/// Fallback: proceeds go back to the paying user's balance.
pub struct GenericStrategy;

#[async_trait]
impl ReferenceStrategy for GenericStrategy {
    async fn resolve_recipient(
        &self,
        tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<Option<Recipient>> {
        Ok(Some(Recipient {
            recipient_id: tx.user_id,
            recipient_type: RecipientType::User,
        }))
    }

    async fn on_succeeded(
        &self,
        _tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        Ok(SettlementPlan::default())
    }

    async fn on_refunded(
        &self,
        _tx: &Transaction,
        _references: &dyn ReferenceEntityStore,
    ) -> AppResult<SettlementPlan> {
        Ok(SettlementPlan::default())
    }

    async fn describe(&self, tx: &Transaction, _references: &dyn ReferenceEntityStore) -> String {
        tx.description
            .clone()
            .unwrap_or_else(|| "Community platform payment".to_string())
    }
}

/// Strategy lookup keyed by transaction type
pub struct StrategyTable {
    strategies: HashMap<TransactionType, Arc<dyn ReferenceStrategy>>,
    fallback: Arc<dyn ReferenceStrategy>,
}

impl StrategyTable {
    pub fn new(fallback: Arc<dyn ReferenceStrategy>) -> Self {
        Self {
            strategies: HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, transaction_type: TransactionType, strategy: Arc<dyn ReferenceStrategy>) -> Self {
        self.strategies.insert(transaction_type, strategy);
        self
    }

    pub fn standard() -> Self {
        Self::new(Arc::new(GenericStrategy))
            .with(TransactionType::EventTicket, Arc::new(TicketStrategy))
            .with(TransactionType::MarketplaceOrder, Arc::new(MarketplaceOrderStrategy))
            .with(TransactionType::Subscription, Arc::new(SubscriptionStrategy))
            .with(TransactionType::Donation, Arc::new(DonationStrategy))
    }

    pub fn get(&self, transaction_type: TransactionType) -> &dyn ReferenceStrategy {
        self.strategies
            .get(&transaction_type)
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryReferenceStore;
    use crate::database::transaction_repository::Transaction;
    use crate::payments::types::TransactionStatus;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn tx(transaction_type: TransactionType, reference_type: ReferenceType, reference_id: Option<Uuid>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            transaction_type,
            reference_type,
            reference_id,
            amount: BigDecimal::from(100),
            currency: "MYR".to_string(),
            platform_fee: BigDecimal::from(5),
            gateway_fee: BigDecimal::from(0),
            total_fees: BigDecimal::from(5),
            net_amount: BigDecimal::from(95),
            refunded_amount: BigDecimal::from(0),
            pending_refund_amount: BigDecimal::from(0),
            provider_id: "manual".to_string(),
            payment_method: None,
            gateway_transaction_id: None,
            gateway_metadata: json!({}),
            description: None,
            metadata: json!({}),
            status: TransactionStatus::Succeeded,
            failure_reason: None,
            manual_payment_details: None,
            proof_of_payment_url: None,
            proof_key: None,
            proof_uploaded_at: None,
            proof_upload_attempts: 0,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            rejection_reason: None,
            refund_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
            refunded_at: None,
        }
    }

    #[tokio::test]
    async fn subscription_has_no_recipient() {
        let refs = InMemoryReferenceStore::new();
        let table = StrategyTable::standard();
        let t = tx(TransactionType::Subscription, ReferenceType::Subscription, Some(Uuid::new_v4()));
        let recipient = table
            .get(TransactionType::Subscription)
            .resolve_recipient(&t, &refs)
            .await
            .unwrap();
        assert!(recipient.is_none());
    }

    #[tokio::test]
    async fn donation_to_community_pays_organizer() {
        let refs = InMemoryReferenceStore::new();
        let community_id = Uuid::new_v4();
        let organizer = Uuid::new_v4();
        let mut community = ReferenceEntity::new(ReferenceType::Community, community_id);
        community.owner_id = Some(organizer);
        refs.insert(community);

        let t = tx(TransactionType::Donation, ReferenceType::Community, Some(community_id));
        let recipient = StrategyTable::standard()
            .get(TransactionType::Donation)
            .resolve_recipient(&t, &refs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recipient.recipient_id, organizer);
        assert_eq!(recipient.recipient_type, RecipientType::CommunityOrganizer);
    }

    #[tokio::test]
    async fn donation_without_reference_stays_with_platform() {
        let refs = InMemoryReferenceStore::new();
        let t = tx(TransactionType::Donation, ReferenceType::User, None);
        let recipient = StrategyTable::standard()
            .get(TransactionType::Donation)
            .resolve_recipient(&t, &refs)
            .await
            .unwrap();
        assert!(recipient.is_none());
    }

    #[tokio::test]
    async fn generic_pays_the_payer() {
        let refs = InMemoryReferenceStore::new();
        let t = tx(TransactionType::Generic, ReferenceType::User, None);
        let recipient = StrategyTable::standard()
            .get(TransactionType::Generic)
            .resolve_recipient(&t, &refs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recipient.recipient_id, t.user_id);
        assert_eq!(recipient.recipient_type, RecipientType::User);
    }

    #[tokio::test]
    async fn ticket_success_confirms_and_counts() {
        let refs = InMemoryReferenceStore::new();
        let ticket_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();
        let mut ticket = ReferenceEntity::new(ReferenceType::Ticket, ticket_id);
        ticket.event_id = Some(event_id);
        ticket.quantity = 2;
        refs.insert(ticket);

        let t = tx(TransactionType::EventTicket, ReferenceType::Ticket, Some(ticket_id));
        let plan = StrategyTable::standard()
            .get(TransactionType::EventTicket)
            .on_succeeded(&t, &refs)
            .await
            .unwrap();

        assert!(plan.entity_updates.contains(&EntityUpdate::IncrementSoldQuantity {
            event_id,
            quantity: 2
        }));
        assert!(plan.entity_updates.contains(&EntityUpdate::SetStatus {
            reference_type: ReferenceType::Ticket,
            id: ticket_id,
            status: "CONFIRMED".to_string(),
        }));
        assert_eq!(plan.side_effects.len(), 1);
        match &plan.side_effects[0] {
            SideEffect::IssueTicket { admission, receipt } => {
                assert_eq!(admission.ticket_id, ticket_id);
                assert_eq!(admission.quantity, 2);
                assert_eq!(receipt.kind, NotificationKind::TicketConfirmed);
            }
            other => panic!("expected a ticket issue, got {:?}", other),
        }
    }
}
