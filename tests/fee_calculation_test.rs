mod common;

use chrono::{Duration, Utc};
use common::{dec, Harness, MockGateway};
use community_payments::database::fee_config_repository::PlatformFeeConfig;
use community_payments::database::memory::InMemoryFeeConfigRepository;
use community_payments::payments::factory::GatewayRegistry;
use community_payments::payments::types::TransactionType;
use community_payments::services::fee_calculation::FeeCalculationService;
use std::sync::Arc;
use uuid::Uuid;

fn rule(
    transaction_type: TransactionType,
    percentage: &str,
    fixed: &str,
    priority: i32,
) -> PlatformFeeConfig {
    PlatformFeeConfig {
        id: Uuid::new_v4(),
        transaction_type: transaction_type.as_str().to_string(),
        percentage: dec(percentage),
        fixed_amount: dec(fixed),
        min_fee: None,
        max_fee: None,
        effective_from: Utc::now() - Duration::days(30),
        effective_until: None,
        priority,
        is_active: true,
    }
}

fn service(
    repo: Arc<InMemoryFeeConfigRepository>,
    ttl: std::time::Duration,
) -> FeeCalculationService {
    let gateways =
        Arc::new(GatewayRegistry::new("mockpay").with_adapter(Arc::new(MockGateway::new())));
    FeeCalculationService::new(repo, gateways, ttl)
}

#[tokio::test]
async fn platform_and_gateway_fees_are_combined() {
    let h = Harness::new();
    h.add_fee_config(TransactionType::MarketplaceOrder, "3");

    let fees = h
        .engine
        .fees
        .calculate_fees(&dec("250.00"), "MYR", TransactionType::MarketplaceOrder, "mockpay")
        .await
        .unwrap();

    assert_eq!(fees.platform_fee, dec("7.50"));
    assert_eq!(fees.gateway_fee, dec("8.75"));
    assert_eq!(fees.total_fees, dec("16.25"));
    assert_eq!(fees.net_amount, dec("233.75"));
    assert!(fees.applied_config_id.is_some());
}

#[tokio::test]
async fn no_rule_means_no_platform_fee() {
    let h = Harness::new();
    let fees = h
        .engine
        .fees
        .calculate_fees(&dec("10.00"), "MYR", TransactionType::Donation, "manual")
        .await
        .unwrap();

    assert_eq!(fees.platform_fee, dec("0"));
    assert_eq!(fees.gateway_fee, dec("0"));
    assert_eq!(fees.net_amount, dec("10.00"));
    assert!(fees.applied_config_id.is_none());
}

#[tokio::test]
async fn highest_priority_effective_rule_wins() {
    let repo = Arc::new(InMemoryFeeConfigRepository::new());
    repo.insert(rule(TransactionType::EventTicket, "10", "0", 0));
    let preferred = rule(TransactionType::EventTicket, "2", "1.00", 5);
    let preferred_id = preferred.id;
    repo.insert(preferred);
    let mut expired = rule(TransactionType::EventTicket, "1", "0", 9);
    expired.effective_until = Some(Utc::now() - Duration::days(1));
    repo.insert(expired);

    let fees = service(repo, std::time::Duration::ZERO)
        .calculate_fees(&dec("100.00"), "MYR", TransactionType::EventTicket, "manual")
        .await
        .unwrap();

    assert_eq!(fees.platform_fee, dec("3.00"));
    assert_eq!(fees.applied_config_id, Some(preferred_id));
}

#[tokio::test]
async fn min_and_max_clamp_platform_fee() {
    let repo = Arc::new(InMemoryFeeConfigRepository::new());
    let mut clamped = rule(TransactionType::Subscription, "10", "0", 0);
    clamped.min_fee = Some(dec("2.00"));
    clamped.max_fee = Some(dec("20.00"));
    repo.insert(clamped);
    let fees = service(repo, std::time::Duration::ZERO);

    let small = fees
        .calculate_fees(&dec("5.00"), "MYR", TransactionType::Subscription, "manual")
        .await
        .unwrap();
    assert_eq!(small.platform_fee, dec("2.00"));

    let large = fees
        .calculate_fees(&dec("1000.00"), "MYR", TransactionType::Subscription, "manual")
        .await
        .unwrap();
    assert_eq!(large.platform_fee, dec("20.00"));
}

#[tokio::test]
async fn cached_rules_are_reused_until_invalidated() {
    let repo = Arc::new(InMemoryFeeConfigRepository::new());
    repo.insert(rule(TransactionType::Generic, "1", "0", 0));
    let fees = service(repo.clone(), std::time::Duration::from_secs(300));

    let before = fees
        .calculate_fees(&dec("100.00"), "MYR", TransactionType::Generic, "manual")
        .await
        .unwrap();
    assert_eq!(before.platform_fee, dec("1.00"));

    repo.insert(rule(TransactionType::Generic, "4", "0", 1));
    let cached = fees
        .calculate_fees(&dec("100.00"), "MYR", TransactionType::Generic, "manual")
        .await
        .unwrap();
    assert_eq!(cached.platform_fee, dec("1.00"));

    fees.invalidate_cache().await;
    let fresh = fees
        .calculate_fees(&dec("100.00"), "MYR", TransactionType::Generic, "manual")
        .await
        .unwrap();
    assert_eq!(fresh.platform_fee, dec("4.00"));
}

#[tokio::test]
async fn unknown_gateway_is_an_error() {
    let h = Harness::new();
    let err = h
        .engine
        .fees
        .calculate_fees(&dec("10.00"), "MYR", TransactionType::Generic, "nopay")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}
