use crate::config::PaymentsConfig;
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::MANUAL_PROVIDER_ID;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Picks a provider when the caller names neither a method nor a provider.
///
/// Order: manual transfer above the configured amount, the currency's
/// preferred provider, the default provider, then any registered gateway that
/// settles the currency.
pub struct ProviderSelector {
    gateways: Arc<GatewayRegistry>,
    currency_providers: HashMap<String, String>,
    manual_above_amount: Option<BigDecimal>,
    manual_enabled: bool,
}

impl ProviderSelector {
    pub fn new(gateways: Arc<GatewayRegistry>, config: &PaymentsConfig) -> Self {
        Self {
            gateways,
            currency_providers: config.currency_providers.clone(),
            manual_above_amount: config.manual_above_amount.clone(),
            manual_enabled: config.manual_payments_enabled,
        }
    }

    pub fn select_provider(&self, amount: &BigDecimal, currency: &str) -> AppResult<String> {
        let currency = currency.to_uppercase();

        if self.manual_enabled {
            if let Some(threshold) = &self.manual_above_amount {
                if amount > threshold {
                    debug!(%currency, amount = %amount, "routing to manual transfer");
                    return Ok(MANUAL_PROVIDER_ID.to_string());
                }
            }
        }

        if let Some(preferred) = self.currency_providers.get(&currency) {
            if GatewayRegistry::is_manual(preferred) && self.manual_enabled {
                return Ok(MANUAL_PROVIDER_ID.to_string());
            }
            if self.supports(preferred, &currency) {
                return Ok(preferred.clone());
            }
        }

        let default = self.gateways.default_provider();
        if self.supports(default, &currency) {
            return Ok(default.to_string());
        }

        if let Some(provider) = self
            .gateways
            .list_available_providers()
            .into_iter()
            .find(|p| self.supports(p, &currency))
        {
            return Ok(provider);
        }

        if self.manual_enabled {
            return Ok(MANUAL_PROVIDER_ID.to_string());
        }

        Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidCurrency {
                currency,
                reason: "No payment provider supports this currency".to_string(),
            },
        )))
    }

    fn supports(&self, provider_id: &str, currency: &str) -> bool {
        self.gateways
            .get(provider_id)
            .map(|adapter| adapter.supports_currency(currency))
            .unwrap_or(false)
    }
}
