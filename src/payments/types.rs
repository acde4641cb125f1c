use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Provider id reserved for offline payments verified by staff.
pub const MANUAL_PROVIDER_ID: &str = "manual";

fn invalid_variant(kind: &str, value: &str, field: &str) -> PaymentError {
    PaymentError::ValidationError {
        message: format!("unsupported {}: {}", kind, value),
        field: Some(field.to_string()),
    }
}

// ============================================================================
// Transaction classification
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    EventTicket,
    MarketplaceOrder,
    Subscription,
    Donation,
    Generic,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::EventTicket,
        TransactionType::MarketplaceOrder,
        TransactionType::Subscription,
        TransactionType::Donation,
        TransactionType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::EventTicket => "EVENT_TICKET",
            TransactionType::MarketplaceOrder => "MARKETPLACE_ORDER",
            TransactionType::Subscription => "SUBSCRIPTION",
            TransactionType::Donation => "DONATION",
            TransactionType::Generic => "GENERIC",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "EVENT_TICKET" => Ok(TransactionType::EventTicket),
            "MARKETPLACE_ORDER" => Ok(TransactionType::MarketplaceOrder),
            "SUBSCRIPTION" => Ok(TransactionType::Subscription),
            "DONATION" => Ok(TransactionType::Donation),
            "GENERIC" => Ok(TransactionType::Generic),
            _ => Err(invalid_variant("transaction type", value, "transaction_type")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Ticket,
    Order,
    Subscription,
    User,
    Community,
    Event,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Ticket => "ticket",
            ReferenceType::Order => "order",
            ReferenceType::Subscription => "subscription",
            ReferenceType::User => "user",
            ReferenceType::Community => "community",
            ReferenceType::Event => "event",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ticket" => Ok(ReferenceType::Ticket),
            "order" => Ok(ReferenceType::Order),
            "subscription" => Ok(ReferenceType::Subscription),
            "user" => Ok(ReferenceType::User),
            "community" => Ok(ReferenceType::Community),
            "event" => Ok(ReferenceType::Event),
            _ => Err(invalid_variant("reference type", value, "reference_type")),
        }
    }
}

// ============================================================================
// Transaction status machine
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
    PartiallyRefunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 7] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Succeeded,
        TransactionStatus::Failed,
        TransactionStatus::Canceled,
        TransactionStatus::Refunded,
        TransactionStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Succeeded => "SUCCEEDED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Canceled => "CANCELED",
            TransactionStatus::Refunded => "REFUNDED",
            TransactionStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }

    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Pending => &[Processing, Succeeded, Failed, Canceled],
            Processing => &[Succeeded, Failed],
            Succeeded => &[PartiallyRefunded, Refunded],
            PartiallyRefunded => &[PartiallyRefunded, Refunded],
            Failed | Canceled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Succeeded | TransactionStatus::PartiallyRefunded
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SUCCEEDED" => Ok(TransactionStatus::Succeeded),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELED" => Ok(TransactionStatus::Canceled),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            "PARTIALLY_REFUNDED" => Ok(TransactionStatus::PartiallyRefunded),
            _ => Err(invalid_variant("transaction status", value, "status")),
        }
    }
}

// ============================================================================
// Payouts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Released,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Processing => "PROCESSING",
            PayoutStatus::Released => "RELEASED",
            PayoutStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(PayoutStatus::Pending),
            "PROCESSING" => Ok(PayoutStatus::Processing),
            "RELEASED" => Ok(PayoutStatus::Released),
            "FAILED" => Ok(PayoutStatus::Failed),
            _ => Err(invalid_variant("payout status", value, "status")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    EventOrganizer,
    MarketplaceSeller,
    DonationRecipient,
    CommunityOrganizer,
    User,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::EventOrganizer => "event_organizer",
            RecipientType::MarketplaceSeller => "marketplace_seller",
            RecipientType::DonationRecipient => "donation_recipient",
            RecipientType::CommunityOrganizer => "community_organizer",
            RecipientType::User => "user",
        }
    }
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "event_organizer" => Ok(RecipientType::EventOrganizer),
            "marketplace_seller" => Ok(RecipientType::MarketplaceSeller),
            "donation_recipient" => Ok(RecipientType::DonationRecipient),
            "community_organizer" => Ok(RecipientType::CommunityOrganizer),
            "user" => Ok(RecipientType::User),
            _ => Err(invalid_variant("recipient type", value, "recipient_type")),
        }
    }
}

// ============================================================================
// Gateway contract types
// ============================================================================

/// Status reported by a gateway when a payment is queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Paid,
    Settled,
    Pending,
    Expired,
    Failed,
    Unknown(String),
}

impl GatewayPaymentStatus {
    pub fn to_transaction_status(&self) -> TransactionStatus {
        match self {
            GatewayPaymentStatus::Paid | GatewayPaymentStatus::Settled => {
                TransactionStatus::Succeeded
            }
            GatewayPaymentStatus::Pending => TransactionStatus::Processing,
            GatewayPaymentStatus::Expired => TransactionStatus::Canceled,
            GatewayPaymentStatus::Failed | GatewayPaymentStatus::Unknown(_) => {
                TransactionStatus::Failed
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerContact {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub transaction_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub customer: CustomerContact,
    pub callback_url: Option<String>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub gateway_transaction_id: String,
    pub payment_url: Option<String>,
    pub client_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfirmation {
    pub status: GatewayPaymentStatus,
    pub gateway_transaction_id: String,
    pub failure_reason: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefundRequest {
    pub transaction_id: Uuid,
    pub gateway_transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub payout_id: Uuid,
    pub recipient_id: Uuid,
    pub recipient_type: RecipientType,
    pub amount: BigDecimal,
    pub currency: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutReceipt {
    pub gateway_payout_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: String,
    pub event_id: Option<String>,
    pub event_type: String,
    pub gateway_transaction_id: Option<String>,
    /// Our transaction id when the gateway echoes it back in metadata
    pub transaction_id: Option<Uuid>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}
