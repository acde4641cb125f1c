//! Services module for payment business logic

pub mod fee_calculation;
pub mod manual_verification;
pub mod notification;
pub mod payment_orchestrator;
pub mod payout_distribution;
pub mod provider_selection;
pub mod reference_strategy;
pub mod side_effects;
pub mod storage;
pub mod ticketing;
pub mod transaction_ledger;
pub mod webhook_processor;

use crate::config::PaymentsConfig;
use crate::database::fee_config_repository::FeeConfigRepository;
use crate::database::payment_method_repository::PaymentMethodRepository;
use crate::database::payout_repository::PayoutRepository;
use crate::database::reference_repository::ReferenceEntityStore;
use crate::database::transaction_repository::TransactionRepository;
use crate::database::user_repository::UserDirectory;
use crate::payments::factory::GatewayRegistry;
use crate::payments::provider::PayoutSender;
use std::sync::Arc;
use std::time::Duration;

pub use fee_calculation::{FeeBreakdown, FeeCalculationService};
pub use manual_verification::{ManualVerificationService, VerificationPolicy};
pub use notification::{LoggingNotificationSink, Notification, NotificationKind, NotificationSink};
pub use payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
pub use payout_distribution::{InternalLedgerPayoutSender, PayoutDistributionService, PayoutPolicy};
pub use provider_selection::ProviderSelector;
pub use storage::{LocalProofStorage, ProofStorage};
pub use ticketing::{SignedTicketIssuer, TicketIssuer};
pub use transaction_ledger::TransactionLedger;
pub use webhook_processor::{WebhookOutcome, WebhookProcessor};

/// Persistence the engine runs on
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
    pub fee_configs: Arc<dyn FeeConfigRepository>,
    pub payment_methods: Arc<dyn PaymentMethodRepository>,
    pub references: Arc<dyn ReferenceEntityStore>,
    pub users: Arc<dyn UserDirectory>,
}

/// Fully wired payment services sharing one ledger
#[derive(Clone)]
pub struct PaymentEngine {
    pub fees: Arc<FeeCalculationService>,
    pub selector: Arc<ProviderSelector>,
    pub ledger: Arc<TransactionLedger>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub verification: Arc<ManualVerificationService>,
    pub payouts: Arc<PayoutDistributionService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub transactions: Arc<dyn TransactionRepository>,
}

impl PaymentEngine {
    pub fn new(
        stores: Stores,
        gateways: Arc<GatewayRegistry>,
        notifier: Arc<dyn NotificationSink>,
        tickets: Arc<dyn TicketIssuer>,
        storage: Arc<dyn ProofStorage>,
        sender: Arc<dyn PayoutSender>,
        config: &PaymentsConfig,
    ) -> Self {
        let strategies = Arc::new(reference_strategy::StrategyTable::standard());

        let fees = Arc::new(FeeCalculationService::new(
            stores.fee_configs.clone(),
            gateways.clone(),
            Duration::from_secs(config.fee_config_cache_ttl_secs),
        ));
        let selector = Arc::new(ProviderSelector::new(gateways.clone(), config));

        let payouts = Arc::new(PayoutDistributionService::new(
            stores.transactions.clone(),
            stores.payouts.clone(),
            stores.references.clone(),
            strategies.clone(),
            sender,
            PayoutPolicy::from_config(config),
        ));

        let dispatcher = Arc::new(side_effects::SideEffectDispatcher::new(
            notifier,
            tickets,
            stores.users.clone(),
            stores.references.clone(),
            payouts.clone(),
        ));

        let ledger = Arc::new(TransactionLedger::new(
            stores.transactions.clone(),
            stores.references.clone(),
            strategies.clone(),
            dispatcher.clone(),
        ));

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            stores.transactions.clone(),
            stores.payment_methods.clone(),
            stores.users.clone(),
            stores.references.clone(),
            gateways.clone(),
            fees.clone(),
            selector.clone(),
            strategies,
            ledger.clone(),
            dispatcher,
            OrchestratorConfig::from_config(config),
        ));

        let verification = Arc::new(ManualVerificationService::new(
            stores.transactions.clone(),
            stores.payment_methods.clone(),
            stores.users.clone(),
            storage,
            ledger.clone(),
            VerificationPolicy::from_config(config),
        ));

        let webhooks = Arc::new(WebhookProcessor::new(
            stores.transactions.clone(),
            gateways,
            ledger.clone(),
        ));

        Self {
            fees,
            selector,
            ledger,
            orchestrator,
            verification,
            payouts,
            webhooks,
            transactions: stores.transactions,
        }
    }
}
