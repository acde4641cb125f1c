use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{EventStatusTable, GatewayAdapter};
use crate::payments::types::{
    GatewayConfirmation, GatewayPaymentStatus, GatewayRefund, GatewayRefundRequest,
    PaymentIntent, PaymentIntentRequest, TransactionStatus, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{to_minor_units, verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const PROVIDER_ID: &str = "paystack";

const EVENT_TABLE: EventStatusTable = &[
    ("charge.success", TransactionStatus::Succeeded),
    ("charge.failed", TransactionStatus::Failed),
    ("paymentrequest.success", TransactionStatus::Succeeded),
];

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Local-card pricing: percent + flat, flat waived below a threshold, capped
    pub fee_percent: BigDecimal,
    pub fee_flat: BigDecimal,
    pub fee_flat_waived_below: BigDecimal,
    pub fee_cap: Option<BigDecimal>,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            callback_url: None,
            timeout_secs: 30,
            max_retries: 3,
            fee_percent: BigDecimal::from_str("1.5").unwrap_or_default(),
            fee_flat: BigDecimal::from(100),
            fee_flat_waived_below: BigDecimal::from(2500),
            fee_cap: Some(BigDecimal::from(2000)),
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;
        let defaults = Self::default();
        let decimal = |key: &str, fallback: BigDecimal| {
            std::env::var(key)
                .ok()
                .and_then(|v| BigDecimal::from_str(&v).ok())
                .unwrap_or(fallback)
        };

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL").unwrap_or(defaults.base_url),
            callback_url: std::env::var("PAYSTACK_CALLBACK_URL").ok(),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            fee_percent: decimal("PAYSTACK_FEE_PERCENT", defaults.fee_percent),
            fee_flat: decimal("PAYSTACK_FEE_FLAT", defaults.fee_flat),
            fee_flat_waived_below: decimal(
                "PAYSTACK_FEE_FLAT_WAIVED_BELOW",
                defaults.fee_flat_waived_below,
            ),
            fee_cap: std::env::var("PAYSTACK_FEE_CAP")
                .ok()
                .and_then(|v| BigDecimal::from_str(&v).ok())
                .or(defaults.fee_cap),
            secret_key,
        })
    }

    /// `None` when Paystack is not configured for this deployment.
    pub fn from_env_optional() -> Option<Self> {
        Self::from_env().ok()
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            PROVIDER_ID,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn rejected(message: String) -> PaymentError {
        PaymentError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }

    fn map_charge_status(status: &str) -> GatewayPaymentStatus {
        match status {
            "success" => GatewayPaymentStatus::Paid,
            "pending" | "ongoing" | "processing" | "queued" => GatewayPaymentStatus::Pending,
            "abandoned" => GatewayPaymentStatus::Expired,
            "failed" | "reversed" => GatewayPaymentStatus::Failed,
            other => GatewayPaymentStatus::Unknown(other.to_string()),
        }
    }
}

#[async_trait]
impl GatewayAdapter for PaystackProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "ZAR", "KES", "USD"]
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent> {
        let email = request
            .customer
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "customer email is required for paystack initialization".to_string(),
                field: Some("customer.email".to_string()),
            })?;

        let payload = serde_json::json!({
            "email": email,
            "amount": to_minor_units(&request.amount)?,
            "currency": request.currency,
            "reference": request.transaction_id.to_string(),
            "callback_url": request.callback_url.as_ref().or(self.config.callback_url.as_ref()),
            "metadata": {
                "transaction_id": request.transaction_id,
                "description": request.description,
                "context": request.metadata,
            },
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;

        if !raw.status {
            return Err(Self::rejected(raw.message));
        }
        let data = raw.data;
        info!(reference = %data.reference, "paystack payment initialized");

        Ok(PaymentIntent {
            gateway_transaction_id: data.reference.clone(),
            payment_url: Some(data.authorization_url),
            client_secret: Some(data.access_code.clone()),
            expires_at: None,
            provider_data: Some(serde_json::json!({
                "access_code": data.access_code,
                "reference": data.reference,
            })),
        })
    }

    async fn confirm_payment(
        &self,
        gateway_transaction_id: &str,
    ) -> PaymentResult<GatewayConfirmation> {
        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", gateway_transaction_id)),
                Some(&self.config.secret_key),
                None,
            )
            .await?;
        if !raw.status {
            return Err(Self::rejected(raw.message));
        }

        let status = Self::map_charge_status(raw.data.status.as_str());
        Ok(GatewayConfirmation {
            failure_reason: match status {
                GatewayPaymentStatus::Paid | GatewayPaymentStatus::Pending => None,
                _ => raw.data.gateway_response.clone(),
            },
            status,
            gateway_transaction_id: gateway_transaction_id.to_string(),
            provider_data: Some(serde_json::json!({
                "channel": raw.data.channel,
                "paid_at": raw.data.paid_at,
                "amount_minor": raw.data.amount,
                "currency": raw.data.currency,
            })),
        })
    }

    async fn refund_payment(&self, request: GatewayRefundRequest) -> PaymentResult<GatewayRefund> {
        let payload = serde_json::json!({
            "transaction": request.gateway_transaction_id,
            "amount": to_minor_units(&request.amount)?,
            "currency": request.currency,
            "merchant_note": request.reason,
        });

        let raw: PaystackEnvelope<PaystackRefundData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;
        if !raw.status {
            return Err(Self::rejected(raw.message));
        }

        Ok(GatewayRefund {
            refund_id: raw.data.id.to_string(),
            provider_data: Some(serde_json::json!({ "status": raw.data.status })),
        })
    }

    fn calculate_fees(&self, amount: &BigDecimal, _currency: &str) -> BigDecimal {
        let mut fee = amount * &self.config.fee_percent / BigDecimal::from(100);
        if *amount >= self.config.fee_flat_waived_below {
            fee += &self.config.fee_flat;
        }
        match &self.config.fee_cap {
            Some(cap) if fee > *cap => cap.clone(),
            _ => fee,
        }
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        let valid = verify_hmac_sha512_hex(payload, secret, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid paystack signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: Some("payload".to_string()),
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data");
        let reference = data
            .and_then(|v| v.get("reference"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let event_id = data.and_then(|v| v.get("id")).map(|v| match v {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        });
        let transaction_id = data
            .and_then(|v| v.get("metadata"))
            .and_then(|v| v.get("transaction_id"))
            .and_then(|v| v.as_str())
            .and_then(|v| Uuid::parse_str(v).ok());

        Ok(WebhookEvent {
            provider: PROVIDER_ID.to_string(),
            event_id,
            event_type,
            gateway_transaction_id: reference,
            transaction_id,
            payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }

    fn event_status_table(&self) -> EventStatusTable {
        EVENT_TABLE
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    amount: u64,
    currency: String,
    status: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackRefundData {
    id: u64,
    #[serde(default)]
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::hmac_sha512_hex;

    fn provider() -> PaystackProvider {
        PaystackProvider::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
            timeout_secs: 5,
            max_retries: 1,
            ..Default::default()
        })
        .expect("provider init should succeed")
    }

    #[test]
    fn webhook_signature_validation() {
        let provider = provider();
        let payload = br#"{"event":"charge.success"}"#;
        let result = provider
            .verify_webhook_signature(payload, "invalid_signature")
            .expect("verification should not error");
        assert!(!result.valid);

        let signature = hmac_sha512_hex(payload, "whsec_test");
        let result = provider
            .verify_webhook_signature(payload, &signature)
            .expect("verification should not error");
        assert!(result.valid);
    }

    #[test]
    fn parses_reference_and_echoed_transaction_id() {
        let provider = provider();
        let id = Uuid::new_v4();
        let payload = serde_json::json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "ref_123",
                "metadata": { "transaction_id": id.to_string() }
            }
        });
        let event = provider
            .parse_webhook_event(payload.to_string().as_bytes())
            .expect("payload should parse");
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("ref_123"));
        assert_eq!(event.transaction_id, Some(id));
        assert_eq!(event.event_id.as_deref(), Some("302961"));
        assert_eq!(
            provider.map_event_type(&event.event_type),
            Some(TransactionStatus::Succeeded)
        );
    }

    #[test]
    fn fee_waives_flat_below_threshold_and_caps() {
        let provider = provider();
        assert_eq!(
            provider.calculate_fees(&BigDecimal::from(1000), "NGN"),
            BigDecimal::from(15)
        );
        assert_eq!(
            provider.calculate_fees(&BigDecimal::from(10000), "NGN"),
            BigDecimal::from(250)
        );
        assert_eq!(
            provider.calculate_fees(&BigDecimal::from(1_000_000), "NGN"),
            BigDecimal::from(2000)
        );
    }

    #[test]
    fn abandoned_charge_is_expired() {
        assert_eq!(
            PaystackProvider::map_charge_status("abandoned"),
            GatewayPaymentStatus::Expired
        );
        assert_eq!(
            PaystackProvider::map_charge_status("success"),
            GatewayPaymentStatus::Paid
        );
    }
}
