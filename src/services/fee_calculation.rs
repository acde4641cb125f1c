use crate::database::fee_config_repository::{FeeConfigRepository, PlatformFeeConfig};
use crate::error::AppResult;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::TransactionType;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Fee split for one payment, every figure rounded to 2 decimal places
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub platform_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_amount: BigDecimal,
    /// Platform fee rule that priced the payment, if any matched
    pub applied_config_id: Option<Uuid>,
}

/// Round a money value to 2 decimal places, half-up.
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Highest priority config whose window contains `at`; ties go to the most
/// recently effective one.
pub fn select_fee_config(
    configs: &[PlatformFeeConfig],
    at: DateTime<Utc>,
) -> Option<&PlatformFeeConfig> {
    configs
        .iter()
        .filter(|config| config.is_effective_at(at))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.effective_from.cmp(&b.effective_from))
        })
}

/// `amount * percentage / 100 + fixed`, clamped to the config's min and max.
pub fn platform_fee(amount: &BigDecimal, config: &PlatformFeeConfig) -> BigDecimal {
    let mut fee = amount * &config.percentage / BigDecimal::from(100) + &config.fixed_amount;

    if let Some(min) = &config.min_fee {
        if &fee < min {
            fee = min.clone();
        }
    }
    if let Some(max) = &config.max_fee {
        if &fee > max {
            fee = max.clone();
        }
    }

    round_money(&fee)
}

pub fn compose_breakdown(
    amount: &BigDecimal,
    platform_fee: BigDecimal,
    gateway_fee: BigDecimal,
    applied_config_id: Option<Uuid>,
) -> FeeBreakdown {
    let platform_fee = round_money(&platform_fee);
    let gateway_fee = round_money(&gateway_fee);
    let total_fees = &platform_fee + &gateway_fee;
    let net_amount = round_money(&(amount - &total_fees));

    FeeBreakdown {
        platform_fee,
        gateway_fee,
        total_fees,
        net_amount,
        applied_config_id,
    }
}

struct CachedConfigs {
    loaded_at: Instant,
    configs: Vec<PlatformFeeConfig>,
}

pub struct FeeCalculationService {
    repository: Arc<dyn FeeConfigRepository>,
    gateways: Arc<GatewayRegistry>,
    cache: Arc<RwLock<HashMap<TransactionType, CachedConfigs>>>,
    cache_ttl: Duration,
}

impl FeeCalculationService {
    pub fn new(
        repository: Arc<dyn FeeConfigRepository>,
        gateways: Arc<GatewayRegistry>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            gateways,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
        }
    }

    pub async fn calculate_fees(
        &self,
        amount: &BigDecimal,
        currency: &str,
        transaction_type: TransactionType,
        provider_id: &str,
    ) -> AppResult<FeeBreakdown> {
        let configs = self.load_configs(transaction_type).await?;
        let config = select_fee_config(&configs, Utc::now());

        let platform = config
            .map(|config| platform_fee(amount, config))
            .unwrap_or_else(|| BigDecimal::from(0));

        let gateway = if GatewayRegistry::is_manual(provider_id) {
            BigDecimal::from(0)
        } else {
            self.gateways
                .get(provider_id)?
                .calculate_fees(amount, currency)
        };

        let breakdown = compose_breakdown(amount, platform, gateway, config.map(|c| c.id));

        debug!(
            transaction_type = %transaction_type,
            provider_id,
            amount = %amount,
            platform_fee = %breakdown.platform_fee,
            gateway_fee = %breakdown.gateway_fee,
            "fees calculated"
        );

        Ok(breakdown)
    }

    /// Drop cached fee rules so the next calculation reloads them.
    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        info!("Fee config cache invalidated");
    }

    async fn load_configs(
        &self,
        transaction_type: TransactionType,
    ) -> AppResult<Vec<PlatformFeeConfig>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&transaction_type) {
                if cached.loaded_at.elapsed() < self.cache_ttl {
                    return Ok(cached.configs.clone());
                }
            }
        }

        let configs = self
            .repository
            .list_active_for_type(transaction_type)
            .await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            transaction_type,
            CachedConfigs {
                loaded_at: Instant::now(),
                configs: configs.clone(),
            },
        );

        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn config(priority: i32, percentage: &str) -> PlatformFeeConfig {
        PlatformFeeConfig {
            id: Uuid::new_v4(),
            transaction_type: "MARKETPLACE_ORDER".to_string(),
            percentage: dec(percentage),
            fixed_amount: dec("0"),
            min_fee: None,
            max_fee: None,
            effective_from: Utc::now() - ChronoDuration::days(30),
            effective_until: None,
            priority,
            is_active: true,
        }
    }

    #[test]
    fn highest_priority_effective_config_wins() {
        let mut expired = config(10, "9");
        expired.effective_until = Some(Utc::now() - ChronoDuration::days(1));
        let configs = vec![config(1, "3"), expired, config(5, "5")];

        let selected = select_fee_config(&configs, Utc::now()).unwrap();
        assert_eq!(selected.percentage, dec("5"));
    }

    #[test]
    fn future_config_is_not_selected() {
        let mut future = config(1, "2");
        future.effective_from = Utc::now() + ChronoDuration::days(1);
        assert!(select_fee_config(&[future], Utc::now()).is_none());
    }

    #[test]
    fn platform_fee_applies_percentage_and_fixed() {
        let mut c = config(0, "2.5");
        c.fixed_amount = dec("1.00");
        assert_eq!(platform_fee(&dec("100"), &c), dec("3.50"));
    }

    #[test]
    fn platform_fee_is_clamped() {
        let mut c = config(0, "10");
        c.min_fee = Some(dec("2.00"));
        c.max_fee = Some(dec("50.00"));
        assert_eq!(platform_fee(&dec("5"), &c), dec("2.00"));
        assert_eq!(platform_fee(&dec("1000"), &c), dec("50.00"));
    }

    #[test]
    fn breakdown_matches_marketplace_example() {
        let breakdown = compose_breakdown(&dec("100"), dec("5"), dec("4.40"), None);
        assert_eq!(breakdown.platform_fee, dec("5.00"));
        assert_eq!(breakdown.gateway_fee, dec("4.40"));
        assert_eq!(breakdown.total_fees, dec("9.40"));
        assert_eq!(breakdown.net_amount, dec("90.60"));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_money(&dec("1.005")), dec("1.01"));
        assert_eq!(round_money(&dec("1.004")), dec("1.00"));
    }
}
