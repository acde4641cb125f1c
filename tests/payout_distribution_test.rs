mod common;

use chrono::{Duration, Utc};
use common::{dec, test_config, ticket_intent, Harness};
use community_payments::database::user_repository::UserRole;
use community_payments::payments::types::{
    PayoutStatus, ReferenceType, TransactionStatus, TransactionType,
};
use community_payments::services::payment_orchestrator::ConfirmPaymentInput;
use community_payments::services::payout_distribution::ReleaseSummary;
use uuid::Uuid;

/// A settled ticket payment; returns (transaction, organizer).
async fn settled_payment(h: &Harness, amount: &str) -> (Uuid, Uuid) {
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, host_id) = h.add_ticket(buyer, 1);
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, ticket_intent(ticket_id, amount))
        .await
        .unwrap();
    h.engine
        .orchestrator
        .confirm_payment(
            buyer,
            ConfirmPaymentInput {
                transaction_id: intent.transaction_id,
                gateway_transaction_id: None,
            },
        )
        .await
        .unwrap();
    (intent.transaction_id, host_id)
}

#[tokio::test]
async fn hold_is_released_only_after_escrow_period() {
    let h = Harness::new();
    let (tx_id, host_id) = settled_payment(&h, "100.00").await;

    let early = h
        .engine
        .payouts
        .process_pending_payouts(Utc::now() + Duration::days(6), 50)
        .await
        .unwrap();
    assert_eq!(early, ReleaseSummary::default());
    assert!(h.sender.sent.lock().unwrap().is_empty());

    let summary = h
        .engine
        .payouts
        .process_pending_payouts(Utc::now() + Duration::days(8), 50)
        .await
        .unwrap();
    assert_eq!(summary.released, 1);

    let payouts = h.engine.payouts.payouts_for_transaction(tx_id).await.unwrap();
    assert_eq!(payouts[0].status, PayoutStatus::Released);
    assert_eq!(payouts[0].attempts, 1);
    assert!(payouts[0].gateway_payout_id.is_some());
    assert!(payouts[0].released_at.is_some());

    let sent = h.sender.sent.lock().unwrap();
    assert_eq!(sent[0].recipient_id, host_id);
    assert_eq!(sent[0].amount, dec("95.60"));
}

#[tokio::test]
async fn distributing_twice_returns_existing_hold() {
    let h = Harness::new();
    let (tx_id, _) = settled_payment(&h, "10.00").await;

    let again = h.engine.payouts.distribute_payout(tx_id).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(h.payouts.all().len(), 1);
}

#[tokio::test]
async fn pending_payment_cannot_be_distributed() {
    let h = Harness::new();
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, ticket_intent(ticket_id, "10.00"))
        .await
        .unwrap();

    let err = h
        .engine
        .payouts
        .distribute_payout(intent.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn failed_release_is_retried_after_backoff() {
    let h = Harness::new();
    let (tx_id, _) = settled_payment(&h, "100.00").await;
    h.sender.fail_next(1);
    let start = Utc::now() + Duration::days(8);

    let first = h.engine.payouts.process_pending_payouts(start, 50).await.unwrap();
    assert_eq!(first.retried, 1);
    let payout = &h.payouts.all()[0];
    assert_eq!(payout.status, PayoutStatus::Pending);
    assert_eq!(payout.next_attempt_at, Some(start + Duration::seconds(60)));
    assert!(payout.failure_reason.is_some());

    let too_soon = h
        .engine
        .payouts
        .process_pending_payouts(start + Duration::seconds(30), 50)
        .await
        .unwrap();
    assert_eq!(too_soon, ReleaseSummary::default());

    let second = h
        .engine
        .payouts
        .process_pending_payouts(start + Duration::seconds(61), 50)
        .await
        .unwrap();
    assert_eq!(second.released, 1);
    let payouts = h.engine.payouts.payouts_for_transaction(tx_id).await.unwrap();
    assert_eq!(payouts[0].status, PayoutStatus::Released);
    assert_eq!(payouts[0].attempts, 2);
}

#[tokio::test]
async fn payout_fails_permanently_after_max_attempts() {
    let mut config = test_config();
    config.payout_max_attempts = 2;
    let h = Harness::with_config(config);
    settled_payment(&h, "100.00").await;
    h.sender.fail_next(10);
    let start = Utc::now() + Duration::days(8);

    let first = h.engine.payouts.process_pending_payouts(start, 50).await.unwrap();
    assert_eq!(first.retried, 1);
    let second = h
        .engine
        .payouts
        .process_pending_payouts(start + Duration::hours(1), 50)
        .await
        .unwrap();
    assert_eq!(second.failed, 1);

    let payout = &h.payouts.all()[0];
    assert_eq!(payout.status, PayoutStatus::Failed);
    assert_eq!(payout.attempts, 2);

    let later = h
        .engine
        .payouts
        .process_pending_payouts(start + Duration::days(1), 50)
        .await
        .unwrap();
    assert_eq!(later, ReleaseSummary::default());
}

#[tokio::test]
async fn platform_retains_proceeds_without_recipient() {
    let h = Harness::new();
    let buyer = h.add_user(UserRole::Member);
    let mut input = ticket_intent(Uuid::new_v4(), "20.00");
    input.transaction_type = TransactionType::Donation;
    input.reference_type = ReferenceType::Community;
    input.reference_id = None;
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, input)
        .await
        .unwrap();
    let tx = h
        .engine
        .orchestrator
        .confirm_payment(
            buyer,
            ConfirmPaymentInput {
                transaction_id: intent.transaction_id,
                gateway_transaction_id: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Succeeded);
    assert!(h.payouts.all().is_empty());
}
