use crate::config::PaymentsConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayAdapter;
use crate::payments::providers::{PaystackConfig, PaystackProvider};
use crate::payments::types::MANUAL_PROVIDER_ID;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registered gateway adapters keyed by provider id.
///
/// The manual provider is never registered here: it has no gateway and is
/// recognised by id alone.
pub struct GatewayRegistry {
    adapters: HashMap<String, Arc<dyn GatewayAdapter>>,
    default_provider: String,
}

impl GatewayRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        let id = adapter.provider_id().to_lowercase();
        info!(provider = %id, "registered payment gateway");
        self.adapters.insert(id, adapter);
    }

    /// Build the registry from configuration. Paystack is registered when its
    /// secret key is present.
    pub fn from_config(config: &PaymentsConfig) -> PaymentResult<Self> {
        let mut registry = Self::new(config.default_provider.clone());
        if let Some(paystack) = PaystackConfig::from_env_optional() {
            registry.register(Arc::new(PaystackProvider::new(paystack)?));
        }
        Ok(registry)
    }

    pub fn is_manual(provider_id: &str) -> bool {
        provider_id.eq_ignore_ascii_case(MANUAL_PROVIDER_ID)
    }

    pub fn get(&self, provider_id: &str) -> PaymentResult<Arc<dyn GatewayAdapter>> {
        self.adapters
            .get(&provider_id.to_lowercase())
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedProvider {
                provider: provider_id.to_string(),
            })
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(&provider_id.to_lowercase())
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn list_available_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}
