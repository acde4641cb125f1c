mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{ticket_intent, Harness, MockGateway, GATEWAY_ID};
use community_payments::api::router;
use community_payments::database::user_repository::UserRole;
use community_payments::payments::types::TransactionStatus;
use community_payments::services::webhook_processor::WebhookOutcome;
use tower::ServiceExt;
use uuid::Uuid;

async fn pending_payment(h: &Harness) -> Uuid {
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    h.engine
        .orchestrator
        .create_payment_intent(buyer, ticket_intent(ticket_id, "45.00"))
        .await
        .unwrap()
        .transaction_id
}

#[tokio::test]
async fn paid_webhook_settles_payment() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;
    let (body, signature) = MockGateway::webhook("payment.paid", tx_id);

    let outcome = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            transaction_id: tx_id,
            status: TransactionStatus::Succeeded,
        }
    );
    let tx = &h.transactions.all()[0];
    assert_eq!(tx.status, TransactionStatus::Succeeded);
    assert_eq!(tx.gateway_metadata["last_webhook"]["event_type"], "payment.paid");
    assert_eq!(h.payouts.all().len(), 1);
}

#[tokio::test]
async fn redelivered_webhook_is_acknowledged_once() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;

    let (body, signature) = MockGateway::webhook("payment.paid", tx_id);
    h.engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();
    let again = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();

    assert_eq!(
        again,
        WebhookOutcome::Duplicate {
            transaction_id: tx_id,
            status: TransactionStatus::Succeeded,
        }
    );
    assert_eq!(h.payouts.all().len(), 1);

    // a late failure event cannot undo the settlement
    let (body, signature) = MockGateway::webhook("payment.failed", tx_id);
    let late = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(late, WebhookOutcome::Duplicate { .. }));
    assert_eq!(h.transactions.all()[0].status, TransactionStatus::Succeeded);
}

#[tokio::test]
async fn expired_webhook_cancels_payment() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;
    let (body, signature) = MockGateway::webhook("payment.expired", tx_id);

    h.engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();

    let tx = &h.transactions.all()[0];
    assert_eq!(tx.status, TransactionStatus::Canceled);
    assert!(tx.failure_reason.is_some());
    assert!(h.payouts.all().is_empty());
}

#[tokio::test]
async fn unmapped_and_unknown_events_are_ignored() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;

    let (body, signature) = MockGateway::webhook("customer.updated", tx_id);
    let outcome = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

    let (body, signature) = MockGateway::webhook("payment.paid", Uuid::new_v4());
    let outcome = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    assert_eq!(h.transactions.all()[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_touching_the_ledger() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;
    let (body, _) = MockGateway::webhook("payment.paid", tx_id);

    let err = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let err = h
        .engine
        .webhooks
        .process_webhook(GATEWAY_ID, &body, None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    assert_eq!(h.transactions.all()[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn webhook_route_checks_signature_header() {
    let h = Harness::new();
    let tx_id = pending_payment(&h).await;
    let (body, signature) = MockGateway::webhook("payment.paid", tx_id);
    let app = router(h.app_state());

    let rejected = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/mockpay")
                .header("x-webhook-signature", "not-a-signature")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.transactions.all()[0].status, TransactionStatus::Pending);

    let accepted = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/mockpay")
                .header("x-webhook-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(accepted.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["result"], "applied");
    assert_eq!(json["status"], "SUCCEEDED");
}

#[tokio::test]
async fn unknown_provider_route_is_not_found() {
    let h = Harness::new();
    let app = router(h.app_state());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/nopay")
                .header("x-webhook-signature", "abc")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
