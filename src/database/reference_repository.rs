//! Read/write access to the entities a payment settles: tickets, orders,
//! subscriptions, and the events, communities and users they point at.
//!
//! These tables belong to other platform features. The engine only reads the
//! columns it needs to route payouts and flips statuses once money settles.

use crate::database::error::DatabaseError;
use crate::payments::types::ReferenceType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReferenceEntity {
    pub reference_type: ReferenceType,
    pub id: Uuid,
    /// Party entitled to the proceeds: event host, seller, organizer, or the user itself
    pub owner_id: Option<Uuid>,
    /// Buyer or subscriber
    pub holder_id: Option<Uuid>,
    /// Parent event for tickets
    pub event_id: Option<Uuid>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub quantity: i32,
    pub period_end: Option<DateTime<Utc>>,
}

impl ReferenceEntity {
    pub fn new(reference_type: ReferenceType, id: Uuid) -> Self {
        Self {
            reference_type,
            id,
            owner_id: None,
            holder_id: None,
            event_id: None,
            title: None,
            status: None,
            quantity: 1,
            period_end: None,
        }
    }
}

/// A write against a reference entity, committed together with the ledger
/// status change that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntityUpdate {
    SetStatus {
        reference_type: ReferenceType,
        id: Uuid,
        status: String,
    },
    IncrementSoldQuantity { event_id: Uuid, quantity: i32 },
    ExtendSubscription { id: Uuid, days: i32 },
}

#[async_trait]
pub trait ReferenceEntityStore: Send + Sync {
    async fn find_by_id(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
    ) -> Result<Option<ReferenceEntity>, DatabaseError>;

    async fn update_status(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        status: &str,
    ) -> Result<(), DatabaseError>;

    async fn increment_sold_quantity(&self, event_id: Uuid, quantity: i32)
        -> Result<(), DatabaseError>;

    /// Record which transaction pays for the entity.
    async fn link_transaction(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), DatabaseError>;
}

fn settled_table(reference_type: ReferenceType) -> Option<&'static str> {
    match reference_type {
        ReferenceType::Ticket => Some("tickets"),
        ReferenceType::Order => Some("orders"),
        ReferenceType::Subscription => Some("subscriptions"),
        ReferenceType::User | ReferenceType::Community | ReferenceType::Event => None,
    }
}

#[derive(Debug, FromRow)]
struct ReferenceRow {
    id: Uuid,
    owner_id: Option<Uuid>,
    holder_id: Option<Uuid>,
    event_id: Option<Uuid>,
    title: Option<String>,
    status: Option<String>,
    quantity: i32,
    period_end: Option<DateTime<Utc>>,
}

/// Apply one update on an open connection, usually inside the ledger's
/// database transaction.
pub async fn apply_entity_update(
    conn: &mut PgConnection,
    update: &EntityUpdate,
) -> Result<(), DatabaseError> {
    match update {
        EntityUpdate::SetStatus {
            reference_type,
            id,
            status,
        } => {
            let Some(table) = settled_table(*reference_type) else {
                debug!(reference_type = %reference_type, "no status column to update");
                return Ok(());
            };
            sqlx::query(&format!(
                "UPDATE {} SET status = $2, updated_at = NOW() WHERE id = $1",
                table
            ))
            .bind(id)
            .bind(status)
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }
        EntityUpdate::IncrementSoldQuantity { event_id, quantity } => {
            sqlx::query(
                "UPDATE events
                 SET sold_quantity = GREATEST(sold_quantity + $2, 0), updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(event_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }
        EntityUpdate::ExtendSubscription { id, days } => {
            sqlx::query(
                "UPDATE subscriptions
                 SET current_period_end = GREATEST(COALESCE(current_period_end, NOW()), NOW())
                                          + make_interval(days => $2),
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(id)
            .bind(days)
            .execute(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }
    }
    Ok(())
}

pub struct PgReferenceEntityStore {
    pool: PgPool,
}

impl PgReferenceEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn lookup_query(reference_type: ReferenceType) -> &'static str {
        match reference_type {
            ReferenceType::Ticket => {
                "SELECT t.id, e.host_id AS owner_id, t.user_id AS holder_id, t.event_id,
                        e.title, t.status, t.quantity, NULL::TIMESTAMPTZ AS period_end
                 FROM tickets t JOIN events e ON e.id = t.event_id
                 WHERE t.id = $1"
            }
            ReferenceType::Order => {
                "SELECT id, seller_id AS owner_id, buyer_id AS holder_id, NULL::UUID AS event_id,
                        title, status, quantity, NULL::TIMESTAMPTZ AS period_end
                 FROM orders WHERE id = $1"
            }
            ReferenceType::Subscription => {
                "SELECT id, NULL::UUID AS owner_id, user_id AS holder_id, NULL::UUID AS event_id,
                        plan AS title, status, 1 AS quantity, current_period_end AS period_end
                 FROM subscriptions WHERE id = $1"
            }
            ReferenceType::Event => {
                "SELECT id, host_id AS owner_id, NULL::UUID AS holder_id, id AS event_id,
                        title, NULL::TEXT AS status, 1 AS quantity, NULL::TIMESTAMPTZ AS period_end
                 FROM events WHERE id = $1"
            }
            ReferenceType::Community => {
                "SELECT id, organizer_id AS owner_id, NULL::UUID AS holder_id,
                        NULL::UUID AS event_id, name AS title, NULL::TEXT AS status,
                        1 AS quantity, NULL::TIMESTAMPTZ AS period_end
                 FROM communities WHERE id = $1"
            }
            ReferenceType::User => {
                "SELECT id, id AS owner_id, NULL::UUID AS holder_id, NULL::UUID AS event_id,
                        display_name AS title, NULL::TEXT AS status, 1 AS quantity,
                        NULL::TIMESTAMPTZ AS period_end
                 FROM users WHERE id = $1"
            }
        }
    }
}

#[async_trait]
impl ReferenceEntityStore for PgReferenceEntityStore {
    async fn find_by_id(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
    ) -> Result<Option<ReferenceEntity>, DatabaseError> {
        let row = sqlx::query_as::<_, ReferenceRow>(Self::lookup_query(reference_type))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|row| ReferenceEntity {
            reference_type,
            id: row.id,
            owner_id: row.owner_id,
            holder_id: row.holder_id,
            event_id: row.event_id,
            title: row.title,
            status: row.status,
            quantity: row.quantity,
            period_end: row.period_end,
        }))
    }

    async fn update_status(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        status: &str,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        apply_entity_update(
            &mut conn,
            &EntityUpdate::SetStatus {
                reference_type,
                id,
                status: status.to_string(),
            },
        )
        .await
    }

    async fn increment_sold_quantity(
        &self,
        event_id: Uuid,
        quantity: i32,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        apply_entity_update(
            &mut conn,
            &EntityUpdate::IncrementSoldQuantity { event_id, quantity },
        )
        .await
    }

    async fn link_transaction(
        &self,
        reference_type: ReferenceType,
        id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let Some(table) = settled_table(reference_type) else {
            return Ok(());
        };
        sqlx::query(&format!(
            "UPDATE {} SET payment_transaction_id = $2, updated_at = NOW() WHERE id = $1",
            table
        ))
        .bind(id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_settled_entities_have_status_tables() {
        assert_eq!(settled_table(ReferenceType::Ticket), Some("tickets"));
        assert_eq!(settled_table(ReferenceType::Order), Some("orders"));
        assert_eq!(settled_table(ReferenceType::Community), None);
    }

    #[test]
    fn entity_update_serializes_with_op_tag() {
        let update = EntityUpdate::IncrementSoldQuantity {
            event_id: Uuid::nil(),
            quantity: 2,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["op"], "increment_sold_quantity");
        assert_eq!(json["quantity"], 2);
    }
}
