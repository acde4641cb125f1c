mod common;

use common::{dec, ticket_intent, Harness};
use community_payments::database::payment_method_repository::PaymentMethodConfig;
use community_payments::database::transaction_repository::VerificationQueueFilter;
use community_payments::database::user_repository::UserRole;
use community_payments::payments::types::{PayoutStatus, TransactionStatus, TransactionType};
use community_payments::services::manual_verification::{
    UploadProofInput, VerificationAction, VerifyPaymentInput,
};
use community_payments::services::notification::NotificationKind;
use uuid::Uuid;

fn png(transaction_id: Uuid) -> UploadProofInput {
    UploadProofInput {
        transaction_id,
        file_name: "receipt.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47, 1, 2, 3],
    }
}

/// A manual ticket payment for a fresh buyer; returns (buyer, transaction).
async fn manual_payment(h: &Harness, amount: &str) -> (Uuid, Uuid) {
    let method = h.add_manual_method();
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    let mut input = ticket_intent(ticket_id, amount);
    input.payment_method = Some(method);
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, input)
        .await
        .unwrap();
    (buyer, intent.transaction_id)
}

#[tokio::test]
async fn manual_intent_returns_transfer_instructions() {
    let h = Harness::new();
    h.add_fee_config(TransactionType::EventTicket, "5");
    let method = h.add_manual_method();
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    let mut input = ticket_intent(ticket_id, "100.00");
    input.payment_method = Some(method);

    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, input)
        .await
        .unwrap();

    assert_eq!(intent.provider_id, "manual");
    assert!(intent.requires_proof);
    assert!(intent.payment_url.is_none());
    assert_eq!(intent.fees.gateway_fee, dec("0"));
    assert_eq!(intent.fees.net_amount, dec("95.00"));
    let instructions = intent.manual_instructions.unwrap();
    assert!(instructions.reference_code.starts_with("PAY-"));
    assert_eq!(instructions.account_details["bank_name"], "Maybank");
    assert_eq!(h.gateway.create_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uploading_proof_moves_payment_into_review() {
    let h = Harness::new();
    let admin = h.add_user(UserRole::Admin);
    let (buyer, tx_id) = manual_payment(&h, "80.00").await;

    let tx = h
        .engine
        .verification
        .upload_payment_proof(buyer, png(tx_id))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Processing);
    assert!(tx.proof_of_payment_url.is_some());
    assert_eq!(tx.proof_upload_attempts, 1);
    assert_eq!(h.storage.files.lock().unwrap().len(), 1);
    assert!(h
        .notifier
        .kinds_for(admin)
        .contains(&NotificationKind::ProofAwaitingReview));
    assert!(h
        .notifier
        .kinds_for(buyer)
        .contains(&NotificationKind::ProofReceived));

    let queue = h
        .engine
        .verification
        .get_pending_manual_verifications(admin, VerificationQueueFilter::default())
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].transaction.id, tx_id);
    assert!(queue[0]
        .proof_url
        .as_deref()
        .unwrap()
        .contains("signature="));
}

#[tokio::test]
async fn fourth_upload_attempt_is_rejected() {
    let h = Harness::new();
    let (buyer, tx_id) = manual_payment(&h, "80.00").await;

    for _ in 0..3 {
        let mut bad = png(tx_id);
        bad.content_type = "text/plain".to_string();
        let err = h
            .engine
            .verification
            .upload_payment_proof(buyer, bad)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    let err = h
        .engine
        .verification
        .upload_payment_proof(buyer, png(tx_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 429);

    let stored = h.transactions.all();
    assert_eq!(stored[0].status, TransactionStatus::Pending);
    assert_eq!(stored[0].proof_upload_attempts, 3);
    assert!(h.storage.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_method_without_proof_refuses_uploads() {
    let h = Harness::new();
    h.methods.insert(PaymentMethodConfig {
        code: "manual_cash_on_site".to_string(),
        provider_id: "manual".to_string(),
        method_type: "manual_cash".to_string(),
        requires_proof: false,
        display_name: "Cash at the venue".to_string(),
        is_active: true,
        account_details: serde_json::json!({}),
    });
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    let mut input = ticket_intent(ticket_id, "40.00");
    input.payment_method = Some("manual_cash_on_site".to_string());
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, input)
        .await
        .unwrap();
    assert_eq!(intent.provider_id, "manual");
    assert!(!intent.requires_proof);

    let err = h
        .engine
        .verification
        .upload_payment_proof(buyer, png(intent.transaction_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);

    let tx = &h.transactions.all()[0];
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.proof_upload_attempts, 0);
}

#[tokio::test]
async fn only_the_payer_can_upload_proof() {
    let h = Harness::new();
    let (_, tx_id) = manual_payment(&h, "15.00").await;
    let stranger = h.add_user(UserRole::Member);

    let err = h
        .engine
        .verification
        .upload_payment_proof(stranger, png(tx_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn gateway_payments_do_not_accept_proof() {
    let h = Harness::new();
    let buyer = h.add_user(UserRole::Member);
    let (ticket_id, _, _) = h.add_ticket(buyer, 1);
    let intent = h
        .engine
        .orchestrator
        .create_payment_intent(buyer, ticket_intent(ticket_id, "15.00"))
        .await
        .unwrap();

    let err = h
        .engine
        .verification
        .upload_payment_proof(buyer, png(intent.transaction_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn rejection_fails_payment_and_tells_the_payer() {
    let h = Harness::new();
    let moderator = h.add_user(UserRole::Moderator);
    let (buyer, tx_id) = manual_payment(&h, "80.00").await;
    h.engine
        .verification
        .upload_payment_proof(buyer, png(tx_id))
        .await
        .unwrap();

    let tx = h
        .engine
        .verification
        .verify_manual_payment(
            moderator,
            tx_id,
            VerifyPaymentInput {
                action: VerificationAction::Reject,
                notes: Some("amount mismatch".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.rejection_reason.as_deref(), Some("amount mismatch"));
    assert_eq!(
        tx.failure_reason.as_deref(),
        Some("Manual verification rejected: amount mismatch")
    );
    assert_eq!(tx.verified_by, Some(moderator));
    assert!(h.payouts.all().is_empty());

    let rejected = h
        .notifier
        .for_user(buyer)
        .into_iter()
        .find(|n| n.kind == NotificationKind::ManualPaymentRejected)
        .unwrap();
    assert!(rejected.message.contains("amount mismatch"));
}

#[tokio::test]
async fn approval_settles_and_creates_payout() {
    let h = Harness::new();
    h.add_fee_config(TransactionType::EventTicket, "5");
    let admin = h.add_user(UserRole::Admin);
    let (buyer, tx_id) = manual_payment(&h, "80.00").await;
    h.engine
        .verification
        .upload_payment_proof(buyer, png(tx_id))
        .await
        .unwrap();

    let tx = h
        .engine
        .verification
        .verify_manual_payment(
            admin,
            tx_id,
            VerifyPaymentInput {
                action: VerificationAction::Approve,
                notes: Some("matched bank statement".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Succeeded);
    assert_eq!(tx.verified_by, Some(admin));
    assert!(tx.verified_at.is_some());

    let payouts = h.payouts.all();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, dec("76.00"));
    assert_eq!(payouts[0].status, PayoutStatus::Pending);
    assert!(h
        .notifier
        .kinds_for(buyer)
        .contains(&NotificationKind::ManualPaymentApproved));

    // a second review of the same payment is refused
    let err = h
        .engine
        .verification
        .verify_manual_payment(
            admin,
            tx_id,
            VerifyPaymentInput {
                action: VerificationAction::Reject,
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn members_cannot_review_payments() {
    let h = Harness::new();
    let member = h.add_user(UserRole::Member);
    let (buyer, tx_id) = manual_payment(&h, "80.00").await;
    h.engine
        .verification
        .upload_payment_proof(buyer, png(tx_id))
        .await
        .unwrap();

    let err = h
        .engine
        .verification
        .verify_manual_payment(
            member,
            tx_id,
            VerifyPaymentInput {
                action: VerificationAction::Approve,
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let err = h
        .engine
        .verification
        .get_pending_manual_verifications(member, VerificationQueueFilter::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}
