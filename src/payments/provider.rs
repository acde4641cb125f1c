use crate::payments::error::PaymentResult;
use crate::payments::types::{
    GatewayConfirmation, GatewayRefund, GatewayRefundRequest, PaymentIntent, PaymentIntentRequest,
    PayoutReceipt, PayoutRequest, TransactionStatus, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// Gateway event vocabulary: exact event names mapped to ledger statuses.
pub type EventStatusTable = &'static [(&'static str, TransactionStatus)];

/// Case-insensitive exact lookup. Names missing from the table are unknown.
pub fn lookup_event_status(table: EventStatusTable, event_type: &str) -> Option<TransactionStatus> {
    let needle = event_type.trim();
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(needle))
        .map(|(_, status)| *status)
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    fn supported_currencies(&self) -> &'static [&'static str];

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent>;

    async fn confirm_payment(&self, gateway_transaction_id: &str)
        -> PaymentResult<GatewayConfirmation>;

    async fn refund_payment(&self, request: GatewayRefundRequest) -> PaymentResult<GatewayRefund>;

    /// Gateway's own processing fee for an amount, before rounding.
    fn calculate_fees(&self, amount: &BigDecimal, currency: &str) -> BigDecimal;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;

    fn event_status_table(&self) -> EventStatusTable;

    fn map_event_type(&self, event_type: &str) -> Option<TransactionStatus> {
        lookup_event_status(self.event_status_table(), event_type)
    }

    fn supports_currency(&self, currency: &str) -> bool {
        self.supported_currencies()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency))
    }
}

/// Moves released escrow funds to a recipient.
#[async_trait]
pub trait PayoutSender: Send + Sync {
    async fn send_payout(&self, request: PayoutRequest) -> PaymentResult<PayoutReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::types::GatewayPaymentStatus;
    use std::str::FromStr;

    const TABLE: EventStatusTable = &[
        ("invoice.paid", TransactionStatus::Succeeded),
        ("invoice.failed", TransactionStatus::Failed),
        ("invoice.expired", TransactionStatus::Canceled),
    ];

    struct MockAdapter;

    #[async_trait]
    impl GatewayAdapter for MockAdapter {
        fn provider_id(&self) -> &str {
            "mock"
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["MYR"]
        }

        async fn create_payment_intent(
            &self,
            request: PaymentIntentRequest,
        ) -> PaymentResult<PaymentIntent> {
            Ok(PaymentIntent {
                gateway_transaction_id: format!("mock_{}", request.transaction_id),
                payment_url: Some("https://example.com/pay".to_string()),
                client_secret: None,
                expires_at: None,
                provider_data: None,
            })
        }

        async fn confirm_payment(
            &self,
            gateway_transaction_id: &str,
        ) -> PaymentResult<GatewayConfirmation> {
            Ok(GatewayConfirmation {
                status: GatewayPaymentStatus::Paid,
                gateway_transaction_id: gateway_transaction_id.to_string(),
                failure_reason: None,
                provider_data: None,
            })
        }

        async fn refund_payment(
            &self,
            _request: GatewayRefundRequest,
        ) -> PaymentResult<GatewayRefund> {
            Err(PaymentError::ProviderError {
                provider: "mock".to_string(),
                message: "refunds disabled".to_string(),
                provider_code: None,
                retryable: false,
            })
        }

        fn calculate_fees(&self, amount: &BigDecimal, _currency: &str) -> BigDecimal {
            amount * BigDecimal::from_str("0.01").unwrap()
        }

        fn verify_webhook_signature(
            &self,
            _payload: &[u8],
            signature: &str,
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: signature == "ok",
                reason: None,
            })
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Err(PaymentError::WebhookVerificationError {
                message: "not used".to_string(),
            })
        }

        fn event_status_table(&self) -> EventStatusTable {
            TABLE
        }
    }

    #[test]
    fn event_lookup_is_exact_and_case_insensitive() {
        let adapter = MockAdapter;
        assert_eq!(
            adapter.map_event_type("INVOICE.PAID"),
            Some(TransactionStatus::Succeeded)
        );
        assert_eq!(adapter.map_event_type("invoice.unpaid"), None);
        assert_eq!(adapter.map_event_type("paid"), None);
    }

    #[test]
    fn currency_support_ignores_case() {
        let adapter = MockAdapter;
        assert!(adapter.supports_currency("myr"));
        assert!(!adapter.supports_currency("USD"));
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_adapter() {
        let adapter: Box<dyn GatewayAdapter> = Box::new(MockAdapter);
        let confirmation = adapter
            .confirm_payment("mock_1")
            .await
            .expect("confirm should succeed");
        assert_eq!(
            confirmation.status.to_transaction_status(),
            TransactionStatus::Succeeded
        );
    }
}
