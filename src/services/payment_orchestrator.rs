//! Payment Orchestrator Service
//!
//! Drives a payment from intent to settlement: resolves the provider, prices
//! the payment, reuses the payer's pending attempt, talks to the gateway with
//! a bounded timeout, and hands status changes to the ledger.

use crate::database::payment_method_repository::{PaymentMethodConfig, PaymentMethodRepository};
use crate::database::reference_repository::ReferenceEntityStore;
use crate::database::transaction_repository::{
    NewTransaction, Pricing, Transaction, TransactionRepository,
};
use crate::database::user_repository::UserDirectory;
use crate::error::{
    AppError, AppErrorKind, AppResult, InfrastructureError, ValidationError,
};
use crate::logging::{mask_account_number, mask_email};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{
    CustomerContact, GatewayRefundRequest, PaymentIntentRequest, ReferenceType,
    TransactionStatus, TransactionType, MANUAL_PROVIDER_ID,
};
use crate::services::fee_calculation::{round_money, FeeBreakdown, FeeCalculationService};
use crate::services::notification::{Notification, NotificationKind};
use crate::services::provider_selection::ProviderSelector;
use crate::services::reference_strategy::StrategyTable;
use crate::services::side_effects::{SideEffect, SideEffectDispatcher};
use crate::services::transaction_ledger::{payment_outcome, TransactionLedger};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on every outbound gateway call
    pub gateway_timeout: Duration,
    /// Window a manual payer has to upload proof
    pub manual_payment_deadline: ChronoDuration,
    pub callback_url: Option<String>,
}

impl OrchestratorConfig {
    pub fn from_config(config: &crate::config::PaymentsConfig) -> Self {
        Self {
            gateway_timeout: config.gateway_timeout(),
            manual_payment_deadline: ChronoDuration::hours(config.manual_payment_deadline_hours),
            callback_url: config.callback_url.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&crate::config::PaymentsConfig::default())
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentIntentInput {
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub provider_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualPaymentInstructions {
    pub payment_method: Option<String>,
    pub display_name: Option<String>,
    pub account_details: JsonValue,
    /// Code the payer quotes in the transfer narration
    pub reference_code: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub provider_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub fees: FeeBreakdown,
    pub requires_proof: bool,
    pub payment_url: Option<String>,
    pub client_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub manual_instructions: Option<ManualPaymentInstructions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPaymentInput {
    pub transaction_id: Uuid,
    pub gateway_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundPaymentInput {
    pub transaction_id: Uuid,
    /// Defaults to everything not yet refunded
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

/// Provider and method a payment is routed through
#[derive(Debug, Clone)]
struct Route {
    provider_id: String,
    payment_method: Option<String>,
    manual: bool,
    method: Option<PaymentMethodConfig>,
}

/// Run a gateway call under the configured timeout.
pub async fn call_gateway<T, F>(provider_id: &str, timeout: Duration, call: F) -> AppResult<T>
where
    F: Future<Output = PaymentResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(provider = provider_id, timeout_secs = timeout.as_secs(), "gateway call timed out");
            Err(PaymentError::TimeoutError {
                provider: provider_id.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into())
        }
    }
}

/// Human reference quoted on manual transfers, e.g. `PAY-1A2B3C4D`.
pub fn manual_reference_code(transaction_id: Uuid) -> String {
    let simple = transaction_id.simple().to_string().to_uppercase();
    format!("PAY-{}", &simple[..8])
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    transactions: Arc<dyn TransactionRepository>,
    payment_methods: Arc<dyn PaymentMethodRepository>,
    users: Arc<dyn UserDirectory>,
    references: Arc<dyn ReferenceEntityStore>,
    gateways: Arc<GatewayRegistry>,
    fees: Arc<FeeCalculationService>,
    selector: Arc<ProviderSelector>,
    strategies: Arc<StrategyTable>,
    ledger: Arc<TransactionLedger>,
    dispatcher: Arc<SideEffectDispatcher>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        payment_methods: Arc<dyn PaymentMethodRepository>,
        users: Arc<dyn UserDirectory>,
        references: Arc<dyn ReferenceEntityStore>,
        gateways: Arc<GatewayRegistry>,
        fees: Arc<FeeCalculationService>,
        selector: Arc<ProviderSelector>,
        strategies: Arc<StrategyTable>,
        ledger: Arc<TransactionLedger>,
        dispatcher: Arc<SideEffectDispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transactions,
            payment_methods,
            users,
            references,
            gateways,
            fees,
            selector,
            strategies,
            ledger,
            dispatcher,
            config,
        }
    }

    /// Create (or refresh) the payer's pending payment for a reference.
    pub async fn create_payment_intent(
        &self,
        user_id: Uuid,
        input: CreatePaymentIntentInput,
    ) -> AppResult<PaymentIntentResponse> {
        self.create_payment_intent_inner(user_id, input)
            .await
            .map_err(|e| e.or_operation_failed("create payment intent"))
    }

    async fn create_payment_intent_inner(
        &self,
        user_id: Uuid,
        input: CreatePaymentIntentInput,
    ) -> AppResult<PaymentIntentResponse> {
        let currency = validate_currency(&input.currency)?;
        let amount = validate_amount(&input.amount)?;

        let route = self.resolve_route(&input, &amount, &currency).await?;
        let fees = self
            .fees
            .calculate_fees(&amount, &currency, input.transaction_type, &route.provider_id)
            .await?;

        let deadline = Utc::now() + self.config.manual_payment_deadline;
        let pricing_for = |id: Uuid| Pricing {
            amount: amount.clone(),
            currency: currency.clone(),
            platform_fee: fees.platform_fee.clone(),
            gateway_fee: fees.gateway_fee.clone(),
            total_fees: fees.total_fees.clone(),
            net_amount: fees.net_amount.clone(),
            provider_id: route.provider_id.clone(),
            payment_method: route.payment_method.clone(),
            description: input.description.clone(),
            metadata: input.metadata.clone().unwrap_or_else(|| json!({})),
            manual_payment_details: route.manual.then(|| {
                json!(manual_instructions(&route, id, &amount, &currency, deadline))
            }),
        };

        let tx = self.upsert_pending(user_id, &input, pricing_for).await?;

        info!(
            transaction_id = %tx.id,
            user_id = %user_id,
            provider_id = %tx.provider_id,
            amount = %tx.amount,
            currency = %tx.currency,
            manual = route.manual,
            "💳 payment intent created"
        );

        let mut effects = Vec::new();
        if let Some(reference_id) = tx.reference_id {
            effects.push(SideEffect::LinkReference {
                reference_type: tx.reference_type,
                reference_id,
                transaction_id: tx.id,
            });
        }

        if route.manual {
            let account = route
                .method
                .as_ref()
                .and_then(|m| m.account_details.get("account_number"))
                .and_then(|v| v.as_str())
                .map(mask_account_number);
            info!(
                transaction_id = %tx.id,
                account = ?account,
                reference_code = %manual_reference_code(tx.id),
                "manual transfer instructions issued"
            );
            self.dispatcher.dispatch(effects).await;
            return Ok(PaymentIntentResponse {
                transaction_id: tx.id,
                status: tx.status,
                provider_id: tx.provider_id.clone(),
                amount: tx.amount.clone(),
                currency: tx.currency.clone(),
                fees,
                requires_proof: route.method.as_ref().map_or(true, |m| m.requires_proof),
                payment_url: None,
                client_secret: None,
                expires_at: Some(deadline),
                manual_instructions: Some(manual_instructions(
                    &route, tx.id, &tx.amount, &tx.currency, deadline,
                )),
            });
        }

        let adapter = self.gateways.get(&route.provider_id)?;
        let customer = self.customer_contact(user_id).await;
        let description = self
            .strategies
            .get(tx.transaction_type)
            .describe(&tx, self.references.as_ref())
            .await;

        let request = PaymentIntentRequest {
            transaction_id: tx.id,
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            description,
            customer,
            callback_url: self.config.callback_url.clone(),
            metadata: json!({
                "transaction_id": tx.id,
                "transaction_type": tx.transaction_type,
                "reference_type": tx.reference_type,
                "reference_id": tx.reference_id,
            }),
        };

        let intent = call_gateway(
            &route.provider_id,
            self.config.gateway_timeout,
            adapter.create_payment_intent(request),
        )
        .await?;

        let tx = self
            .transactions
            .record_gateway_intent(
                tx.id,
                &intent.gateway_transaction_id,
                json!({
                    "payment_url": intent.payment_url,
                    "expires_at": intent.expires_at,
                    "intent": intent.provider_data,
                }),
            )
            .await?;

        effects.push(SideEffect::Notify(
            Notification::new(
                user_id,
                NotificationKind::PaymentInitiated,
                "Payment Initiated",
                format!("Complete your payment of {} {}", tx.amount, tx.currency),
            )
            .with_data(json!({ "transaction_id": tx.id, "payment_url": intent.payment_url })),
        ));
        self.dispatcher.dispatch(effects).await;

        Ok(PaymentIntentResponse {
            transaction_id: tx.id,
            status: tx.status,
            provider_id: tx.provider_id.clone(),
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            fees,
            requires_proof: route
                .method
                .as_ref()
                .map(|m| m.requires_proof)
                .unwrap_or(false),
            payment_url: intent.payment_url,
            client_secret: intent.client_secret,
            expires_at: intent.expires_at,
            manual_instructions: None,
        })
    }

    /// Ask the gateway where a pending payment stands and record the answer.
    pub async fn confirm_payment(
        &self,
        user_id: Uuid,
        input: ConfirmPaymentInput,
    ) -> AppResult<Transaction> {
        let tx = self.ledger.get(input.transaction_id).await?;
        if tx.user_id != user_id {
            return Err(AppError::forbidden("Transaction belongs to another user"));
        }
        let open = matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Processing
        );
        // PROCESSING is re-checked too so a gateway "pending" answer is not final
        if !open || tx.is_manual() {
            return Ok(tx);
        }
        let Some(gateway_transaction_id) = input
            .gateway_transaction_id
            .or_else(|| tx.gateway_transaction_id.clone())
        else {
            return Ok(tx);
        };

        self.sync_with_gateway(&tx, &gateway_transaction_id).await
    }

    /// Query the gateway for an automatic payment and apply its status.
    pub async fn sync_with_gateway(
        &self,
        tx: &Transaction,
        gateway_transaction_id: &str,
    ) -> AppResult<Transaction> {
        let adapter = self.gateways.get(&tx.provider_id)?;
        let confirmation = call_gateway(
            &tx.provider_id,
            self.config.gateway_timeout,
            adapter.confirm_payment(gateway_transaction_id),
        )
        .await?;

        let target = confirmation.status.to_transaction_status();
        if target == tx.status || !tx.status.can_transition_to(target) {
            return Ok(tx.clone());
        }

        info!(
            transaction_id = %tx.id,
            gateway_status = ?confirmation.status,
            target = %target,
            "gateway confirmation received"
        );

        let (mut change, effects) = payment_outcome(
            tx,
            target,
            confirmation.failure_reason.clone(),
            confirmation.provider_data.clone(),
        );
        change.gateway_transaction_id = Some(gateway_transaction_id.to_string());

        Ok(self.ledger.transition(tx, change, effects).await?.transaction)
    }

    /// Refund all or part of a settled payment.
    pub async fn refund_payment(
        &self,
        user_id: Uuid,
        input: RefundPaymentInput,
    ) -> AppResult<Transaction> {
        let tx = self.ledger.get(input.transaction_id).await?;
        if tx.user_id != user_id && !self.is_staff(user_id).await? {
            return Err(AppError::forbidden("Only the payer or an admin can refund"));
        }
        if !tx.status.is_refundable() {
            return Err(AppError::invalid_state(tx.id, tx.status, "refund"));
        }

        let amount = round_money(
            &input
                .amount
                .clone()
                .unwrap_or_else(|| tx.refundable_remaining()),
        );
        if !tx.is_manual() && tx.gateway_transaction_id.is_none() {
            return Err(AppError::invalid_state(
                tx.id,
                tx.status,
                "refund without gateway reference",
            ));
        }

        let tx = self.ledger.reserve_refund(&tx, &amount).await?;
        let gateway_metadata = match self.refund_at_gateway(&tx, &amount, &input.reason).await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.ledger.release_refund(tx.id, &amount).await;
                return Err(e);
            }
        };

        let reason_text = input
            .reason
            .clone()
            .unwrap_or_else(|| "No reason given".to_string());
        let effects = vec![SideEffect::Notify(
            Notification::new(
                tx.user_id,
                NotificationKind::PaymentRefunded,
                "Payment Refunded",
                format!("{} {} was refunded. Reason: {}", amount, tx.currency, reason_text),
            )
            .with_data(json!({ "transaction_id": tx.id, "amount": amount.to_string() })),
        )];

        let updated = self
            .ledger
            .record_refund(&tx, &amount, input.reason, gateway_metadata, effects)
            .await
            .map_err(|e| {
                // gateway refund went through; the reservation stays held
                error!(
                    transaction_id = %tx.id,
                    amount = %amount,
                    error = %e,
                    "refund sent but not recorded"
                );
                e
            })?;

        info!(
            transaction_id = %updated.id,
            amount = %amount,
            refunded_total = %updated.refunded_amount,
            status = %updated.status,
            "↩️ refund recorded"
        );
        Ok(updated)
    }

    async fn refund_at_gateway(
        &self,
        tx: &Transaction,
        amount: &BigDecimal,
        reason: &Option<String>,
    ) -> AppResult<Option<JsonValue>> {
        if tx.is_manual() {
            return Ok(None);
        }
        let Some(gateway_transaction_id) = tx.gateway_transaction_id.clone() else {
            return Ok(None);
        };
        let adapter = self.gateways.get(&tx.provider_id)?;
        let refund = call_gateway(
            &tx.provider_id,
            self.config.gateway_timeout,
            adapter.refund_payment(GatewayRefundRequest {
                transaction_id: tx.id,
                gateway_transaction_id,
                amount: amount.clone(),
                currency: tx.currency.clone(),
                reason: reason.clone(),
            }),
        )
        .await?;
        Ok(Some(json!({
            "last_refund": {
                "refund_id": refund.refund_id,
                "amount": amount.to_string(),
                "data": refund.provider_data,
            }
        })))
    }

    /// A transaction as seen by its payer or staff.
    pub async fn get_transaction(&self, user_id: Uuid, transaction_id: Uuid) -> AppResult<Transaction> {
        let tx = self.ledger.get(transaction_id).await?;
        if tx.user_id != user_id && !self.is_staff(user_id).await? {
            return Err(AppError::forbidden("Transaction belongs to another user"));
        }
        Ok(tx)
    }

    pub async fn list_payment_methods(&self) -> AppResult<Vec<PaymentMethodConfig>> {
        Ok(self.payment_methods.list_active().await?)
    }

    async fn is_staff(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .users
            .find_by_id(user_id)
            .await?
            .map(|user| user.role.is_staff())
            .unwrap_or(false))
    }

    async fn customer_contact(&self, user_id: Uuid) -> CustomerContact {
        let profile = match self.users.find_by_id(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(%user_id, error = %e, "could not load payer profile");
                None
            }
        };
        let email = profile.as_ref().and_then(|p| p.email.clone());
        if let Some(email) = &email {
            tracing::debug!(%user_id, email = %mask_email(email), "payer contact resolved");
        }
        CustomerContact {
            user_id,
            email,
            name: profile.and_then(|p| p.display_name),
        }
    }

    async fn resolve_route(
        &self,
        input: &CreatePaymentIntentInput,
        amount: &BigDecimal,
        currency: &str,
    ) -> AppResult<Route> {
        if let Some(code) = &input.payment_method {
            let method = self
                .payment_methods
                .find_by_code(code)
                .await?
                .ok_or_else(|| AppError::not_found("Payment method", code))?;
            if method.provider_id.trim().is_empty() {
                return Err(AppError::not_found("Payment provider for method", code));
            }

            let manual = method.is_manual() || GatewayRegistry::is_manual(&method.provider_id);
            let provider_id = if manual {
                MANUAL_PROVIDER_ID.to_string()
            } else {
                let provider_id = method.provider_id.to_lowercase();
                self.ensure_gateway(&provider_id, currency)?;
                provider_id
            };
            return Ok(Route {
                provider_id,
                payment_method: Some(code.clone()),
                manual,
                method: Some(method),
            });
        }

        let provider_id = match &input.provider_id {
            Some(provider_id) => provider_id.to_lowercase(),
            None => self.selector.select_provider(amount, currency)?,
        };

        if GatewayRegistry::is_manual(&provider_id) {
            let method = self
                .payment_methods
                .list_active()
                .await?
                .into_iter()
                .find(|m| m.is_manual());
            return Ok(Route {
                provider_id: MANUAL_PROVIDER_ID.to_string(),
                payment_method: method.as_ref().map(|m| m.code.clone()),
                manual: true,
                method,
            });
        }

        self.ensure_gateway(&provider_id, currency)?;
        Ok(Route {
            provider_id,
            payment_method: None,
            manual: false,
            method: None,
        })
    }

    fn ensure_gateway(&self, provider_id: &str, currency: &str) -> AppResult<()> {
        let adapter = self.gateways.get(provider_id)?;
        if !adapter.supports_currency(currency) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidCurrency {
                    currency: currency.to_string(),
                    reason: format!("{} does not support this currency", provider_id),
                },
            )));
        }
        Ok(())
    }

    /// Reprice the payer's pending attempt for this reference, or insert one.
    async fn upsert_pending<F>(
        &self,
        user_id: Uuid,
        input: &CreatePaymentIntentInput,
        pricing_for: F,
    ) -> AppResult<Transaction>
    where
        F: Fn(Uuid) -> Pricing + Send + Sync,
    {
        for _ in 0..3 {
            let existing = self
                .transactions
                .find_pending_for_reference(user_id, input.reference_type, input.reference_id)
                .await?;

            if let Some(existing) = existing {
                match self
                    .transactions
                    .reprice_pending(existing.id, pricing_for(existing.id))
                    .await
                {
                    Ok(tx) => {
                        info!(transaction_id = %tx.id, "Reusing existing pending transaction");
                        return Ok(tx);
                    }
                    Err(e) if e.is_status_conflict() => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let id = Uuid::new_v4();
            let new = NewTransaction {
                id,
                user_id,
                transaction_type: input.transaction_type,
                reference_type: input.reference_type,
                reference_id: input.reference_id,
                pricing: pricing_for(id),
            };
            match self.transactions.insert(new).await {
                Ok(tx) => return Ok(tx),
                Err(e) if e.is_unique_violation() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::OperationFailed {
                operation: "create payment intent".to_string(),
                message: "pending transaction changed concurrently".to_string(),
            },
        )))
    }
}

fn manual_instructions(
    route: &Route,
    transaction_id: Uuid,
    amount: &BigDecimal,
    currency: &str,
    deadline: DateTime<Utc>,
) -> ManualPaymentInstructions {
    ManualPaymentInstructions {
        payment_method: route.payment_method.clone(),
        display_name: route.method.as_ref().map(|m| m.display_name.clone()),
        account_details: route
            .method
            .as_ref()
            .map(|m| m.account_details.clone())
            .unwrap_or_else(|| json!({})),
        reference_code: manual_reference_code(transaction_id),
        amount: amount.clone(),
        currency: currency.to_string(),
        deadline,
    }
}

fn validate_amount(amount: &BigDecimal) -> AppResult<BigDecimal> {
    let rounded = round_money(amount);
    if rounded <= BigDecimal::zero() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "Amount must be greater than zero".to_string(),
            },
        )));
    }
    Ok(rounded)
}

fn validate_currency(currency: &str) -> AppResult<String> {
    let normalized = currency.trim().to_uppercase();
    if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidCurrency {
                currency: currency.to_string(),
                reason: "Currency must be a 3-letter ISO code".to_string(),
            },
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn reference_code_uses_first_eight_hex_chars() {
        let id = Uuid::from_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        assert_eq!(manual_reference_code(id), "PAY-1A2B3C4D");
    }

    #[test]
    fn amount_must_be_positive() {
        assert!(validate_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_amount(&BigDecimal::from_str("-5").unwrap()).is_err());
        assert!(validate_amount(&BigDecimal::from_str("0.001").unwrap()).is_err());
        assert_eq!(
            validate_amount(&BigDecimal::from_str("10.005").unwrap()).unwrap(),
            BigDecimal::from_str("10.01").unwrap()
        );
    }

    #[test]
    fn currency_is_normalised() {
        assert_eq!(validate_currency(" myr ").unwrap(), "MYR");
        assert!(validate_currency("RM").is_err());
        assert!(validate_currency("US1").is_err());
    }

    #[tokio::test]
    async fn gateway_calls_time_out() {
        let result: AppResult<()> = call_gateway("slowpay", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().status_code(), 504);
    }
}
