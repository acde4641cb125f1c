//! Shared fixtures: an engine over the in-memory stores with a scripted
//! gateway, a recording notifier, an in-memory proof store and a payout
//! sender that can be told to fail.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use community_payments::api::AppState;
use community_payments::config::PaymentsConfig;
use community_payments::database::fee_config_repository::PlatformFeeConfig;
use community_payments::database::memory::{
    InMemoryFeeConfigRepository, InMemoryPaymentMethodRepository, InMemoryPayoutRepository,
    InMemoryReferenceStore, InMemoryTransactionRepository, InMemoryUserDirectory,
};
use community_payments::database::payment_method_repository::PaymentMethodConfig;
use community_payments::database::reference_repository::ReferenceEntity;
use community_payments::database::user_repository::{UserProfile, UserRole};
use community_payments::payments::error::{PaymentError, PaymentResult};
use community_payments::payments::factory::GatewayRegistry;
use community_payments::payments::provider::{EventStatusTable, GatewayAdapter, PayoutSender};
use community_payments::payments::types::{
    GatewayConfirmation, GatewayPaymentStatus, GatewayRefund, GatewayRefundRequest, PaymentIntent,
    PaymentIntentRequest, PayoutReceipt, PayoutRequest, ReferenceType, TransactionStatus,
    TransactionType, WebhookEvent, WebhookVerificationResult,
};
use community_payments::payments::utils::{hmac_sha512_hex, verify_hmac_sha512_hex};
use community_payments::services::notification::{
    Notification, NotificationError, NotificationKind, NotificationSink,
};
use community_payments::services::payment_orchestrator::CreatePaymentIntentInput;
use community_payments::services::storage::{ProofStorage, ProofUpload, StorageError, StoredProof};
use community_payments::services::{PaymentEngine, SignedTicketIssuer, Stores};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const GATEWAY_ID: &str = "mockpay";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TICKET_SECRET: &str = "door_test_secret";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

// ============================================================================
// Gateway
// ============================================================================

const EVENTS: EventStatusTable = &[
    ("payment.paid", TransactionStatus::Succeeded),
    ("payment.failed", TransactionStatus::Failed),
    ("payment.expired", TransactionStatus::Canceled),
];

/// Gateway charging 2.9% + 1.50 whose answers are set by the test.
pub struct MockGateway {
    confirm_status: Mutex<GatewayPaymentStatus>,
    fail_create: AtomicBool,
    fail_refund: AtomicBool,
    pub create_calls: AtomicUsize,
    pub refunds: Mutex<Vec<GatewayRefundRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            confirm_status: Mutex::new(GatewayPaymentStatus::Paid),
            fail_create: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn set_confirm_status(&self, status: GatewayPaymentStatus) {
        *self.confirm_status.lock().unwrap() = status;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    pub fn reference_for(transaction_id: Uuid) -> String {
        format!("mock_{}", transaction_id.simple())
    }

    /// A signed webhook body for `event` on the given transaction.
    pub fn webhook(event: &str, transaction_id: Uuid) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&json!({
            "event": event,
            "data": {
                "id": format!("evt_{}", Uuid::new_v4().simple()),
                "reference": Self::reference_for(transaction_id),
                "metadata": { "transaction_id": transaction_id.to_string() },
            }
        }))
        .unwrap();
        let signature = hmac_sha512_hex(&body, WEBHOOK_SECRET);
        (body, signature)
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn provider_id(&self) -> &str {
        GATEWAY_ID
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["MYR", "USD"]
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderError {
                provider: GATEWAY_ID.to_string(),
                message: "gateway unavailable".to_string(),
                provider_code: None,
                retryable: true,
            });
        }
        Ok(PaymentIntent {
            gateway_transaction_id: Self::reference_for(request.transaction_id),
            payment_url: Some(format!("https://pay.example.com/{}", request.transaction_id)),
            client_secret: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            provider_data: Some(json!({ "checkout": "hosted" })),
        })
    }

    async fn confirm_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<GatewayConfirmation> {
        Ok(GatewayConfirmation {
            status: self.confirm_status.lock().unwrap().clone(),
            gateway_transaction_id: gateway_transaction_id.to_string(),
            failure_reason: None,
            provider_data: None,
        })
    }

    async fn refund_payment(&self, request: GatewayRefundRequest) -> PaymentResult<GatewayRefund> {
        // let concurrent callers interleave
        tokio::task::yield_now().await;
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderError {
                provider: GATEWAY_ID.to_string(),
                message: "refund declined".to_string(),
                provider_code: None,
                retryable: false,
            });
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push(request);
        Ok(GatewayRefund {
            refund_id: format!("re_{}", refunds.len()),
            provider_data: None,
        })
    }

    fn calculate_fees(&self, amount: &BigDecimal, _currency: &str) -> BigDecimal {
        amount * dec("0.029") + dec("1.50")
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let valid = verify_hmac_sha512_hex(payload, WEBHOOK_SECRET, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: (!valid).then(|| "signature mismatch".to_string()),
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: Some("payload".to_string()),
            })?;
        let data = parsed.get("data").cloned().unwrap_or(JsonValue::Null);
        Ok(WebhookEvent {
            provider: GATEWAY_ID.to_string(),
            event_id: data.get("id").and_then(|v| v.as_str()).map(str::to_string),
            event_type: parsed
                .get("event")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            gateway_transaction_id: data
                .get("reference")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            transaction_id: data
                .pointer("/metadata/transaction_id")
                .and_then(|v| v.as_str())
                .and_then(|v| Uuid::parse_str(v).ok()),
            payload: parsed,
            received_at: Utc::now(),
        })
    }

    fn event_status_table(&self) -> EventStatusTable {
        EVENTS
    }
}

// ============================================================================
// Notifications, storage, payouts
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn for_user(&self, user_id: Uuid) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn kinds_for(&self, user_id: Uuid) -> Vec<NotificationKind> {
        self.for_user(user_id).into_iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProofStorage {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ProofStorage for MemoryProofStorage {
    async fn upload_proof(&self, upload: ProofUpload) -> Result<StoredProof, StorageError> {
        let key = format!("{}/{}.bin", upload.transaction_id, Uuid::new_v4().simple());
        self.files.lock().unwrap().insert(key.clone(), upload.bytes);
        Ok(StoredProof {
            url: format!("https://proofs.example.com/{}", key),
            key,
        })
    }

    fn signed_url(&self, key: &str, ttl: std::time::Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://proofs.example.com/{}?expires_in={}&signature=test",
            key,
            ttl.as_secs()
        ))
    }
}

/// Fails the first `failures` sends, then succeeds.
#[derive(Default)]
pub struct ScriptedPayoutSender {
    failures: AtomicUsize,
    pub sent: Mutex<Vec<PayoutRequest>>,
}

impl ScriptedPayoutSender {
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PayoutSender for ScriptedPayoutSender {
    async fn send_payout(&self, request: PayoutRequest) -> PaymentResult<PayoutReceipt> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PaymentError::ProviderError {
                provider: "bank".to_string(),
                message: "transfer rejected".to_string(),
                provider_code: None,
                retryable: true,
            });
        }
        let receipt = PayoutReceipt {
            gateway_payout_id: format!("po_{}", request.payout_id.simple()),
        };
        self.sent.lock().unwrap().push(request);
        Ok(receipt)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_config() -> PaymentsConfig {
    PaymentsConfig {
        default_provider: GATEWAY_ID.to_string(),
        fee_config_cache_ttl_secs: 0,
        gateway_timeout_secs: 2,
        ..PaymentsConfig::default()
    }
}

pub struct Harness {
    pub engine: PaymentEngine,
    pub transactions: Arc<InMemoryTransactionRepository>,
    pub payouts: Arc<InMemoryPayoutRepository>,
    pub fee_configs: Arc<InMemoryFeeConfigRepository>,
    pub methods: Arc<InMemoryPaymentMethodRepository>,
    pub references: Arc<InMemoryReferenceStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub gateway: Arc<MockGateway>,
    pub gateways: Arc<GatewayRegistry>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: Arc<MemoryProofStorage>,
    pub sender: Arc<ScriptedPayoutSender>,
    pub config: PaymentsConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PaymentsConfig) -> Self {
        let references = Arc::new(InMemoryReferenceStore::new());
        let transactions = Arc::new(InMemoryTransactionRepository::with_reference_store(
            references.clone(),
        ));
        let payouts = Arc::new(InMemoryPayoutRepository::new());
        let fee_configs = Arc::new(InMemoryFeeConfigRepository::new());
        let methods = Arc::new(InMemoryPaymentMethodRepository::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let storage = Arc::new(MemoryProofStorage::default());
        let sender = Arc::new(ScriptedPayoutSender::default());

        let gateways = Arc::new(
            GatewayRegistry::new(config.default_provider.clone()).with_adapter(gateway.clone()),
        );

        let engine = PaymentEngine::new(
            Stores {
                transactions: transactions.clone(),
                payouts: payouts.clone(),
                fee_configs: fee_configs.clone(),
                payment_methods: methods.clone(),
                references: references.clone(),
                users: users.clone(),
            },
            gateways.clone(),
            notifier.clone(),
            Arc::new(SignedTicketIssuer::new(TICKET_SECRET)),
            storage.clone(),
            sender.clone(),
            &config,
        );

        Self {
            engine,
            transactions,
            payouts,
            fee_configs,
            methods,
            references,
            users,
            gateway,
            gateways,
            notifier,
            storage,
            sender,
            config,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            gateways: self.gateways.clone(),
            local_storage: None,
            db_pool: None,
        }
    }

    pub fn add_user(&self, role: UserRole) -> Uuid {
        let id = Uuid::new_v4();
        self.users.insert(UserProfile {
            id,
            email: Some(format!("{}@example.com", id.simple())),
            display_name: Some("Test User".to_string()),
            role,
        });
        id
    }

    pub fn add_fee_config(&self, transaction_type: TransactionType, percentage: &str) {
        self.fee_configs.insert(PlatformFeeConfig {
            id: Uuid::new_v4(),
            transaction_type: transaction_type.as_str().to_string(),
            percentage: dec(percentage),
            fixed_amount: dec("0"),
            min_fee: None,
            max_fee: None,
            effective_from: Utc::now() - Duration::days(1),
            effective_until: None,
            priority: 0,
            is_active: true,
        });
    }

    pub fn add_manual_method(&self) -> String {
        let code = "manual_bank_transfer".to_string();
        self.methods.insert(PaymentMethodConfig {
            code: code.clone(),
            provider_id: "manual".to_string(),
            method_type: "manual_bank_transfer".to_string(),
            requires_proof: true,
            display_name: "Bank Transfer".to_string(),
            is_active: true,
            account_details: json!({
                "bank_name": "Maybank",
                "account_name": "Community Platform Sdn Bhd",
                "account_number": "5140 1234 5678",
            }),
        });
        code
    }

    /// A ticket for a hosted event; returns (ticket_id, event_id, host_id).
    pub fn add_ticket(&self, buyer_id: Uuid, quantity: i32) -> (Uuid, Uuid, Uuid) {
        let host_id = self.add_user(UserRole::Member);
        let event_id = Uuid::new_v4();
        let mut event = ReferenceEntity::new(ReferenceType::Event, event_id);
        event.owner_id = Some(host_id);
        event.title = Some("Community Meetup".to_string());
        self.references.insert(event);

        let ticket_id = Uuid::new_v4();
        let mut ticket = ReferenceEntity::new(ReferenceType::Ticket, ticket_id);
        ticket.owner_id = Some(host_id);
        ticket.holder_id = Some(buyer_id);
        ticket.event_id = Some(event_id);
        ticket.title = Some("Community Meetup".to_string());
        ticket.status = Some("PENDING".to_string());
        ticket.quantity = quantity;
        self.references.insert(ticket);

        (ticket_id, event_id, host_id)
    }
}

pub fn ticket_intent(ticket_id: Uuid, amount: &str) -> CreatePaymentIntentInput {
    CreatePaymentIntentInput {
        amount: dec(amount),
        currency: "MYR".to_string(),
        transaction_type: TransactionType::EventTicket,
        reference_type: ReferenceType::Ticket,
        reference_id: Some(ticket_id),
        payment_method: None,
        provider_id: None,
        description: None,
        metadata: None,
    }
}
