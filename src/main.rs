use community_payments::api::{self, AppState};
use community_payments::config::AppConfig;
use community_payments::database::fee_config_repository::PgFeeConfigRepository;
use community_payments::database::init_pool_from_config;
use community_payments::database::memory::{
    InMemoryFeeConfigRepository, InMemoryPaymentMethodRepository, InMemoryPayoutRepository,
    InMemoryReferenceStore, InMemoryTransactionRepository, InMemoryUserDirectory,
};
use community_payments::database::payment_method_repository::PgPaymentMethodRepository;
use community_payments::database::payout_repository::PgPayoutRepository;
use community_payments::database::reference_repository::PgReferenceEntityStore;
use community_payments::database::transaction_repository::PgTransactionRepository;
use community_payments::database::user_repository::PgUserDirectory;
use community_payments::logging::init_tracing;
use community_payments::middleware::logging::{request_logging_middleware, UuidRequestId};
use community_payments::payments::factory::GatewayRegistry;
use community_payments::services::{
    InternalLedgerPayoutSender, LocalProofStorage, LoggingNotificationSink, PaymentEngine,
    SignedTicketIssuer, Stores,
};
use community_payments::workers::payment_monitor::{PaymentMonitorConfig, PaymentMonitorWorker};
use community_payments::workers::payout_release::{PayoutReleaseConfig, PayoutReleaseWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting community payments service"
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        default_provider = %config.payments.default_provider,
        manual_payments_enabled = config.payments.manual_payments_enabled,
        "Server configuration loaded"
    );

    // Initialize database connection pool
    let db_pool = match &config.database {
        Some(database) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            Some(pool)
        }
        None => {
            info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), using in-memory stores");
            None
        }
    };

    let stores = match &db_pool {
        Some(pool) => Stores {
            transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
            payouts: Arc::new(PgPayoutRepository::new(pool.clone())),
            fee_configs: Arc::new(PgFeeConfigRepository::new(pool.clone())),
            payment_methods: Arc::new(PgPaymentMethodRepository::new(pool.clone())),
            references: Arc::new(PgReferenceEntityStore::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool.clone())),
        },
        None => {
            let references = Arc::new(InMemoryReferenceStore::new());
            Stores {
                transactions: Arc::new(InMemoryTransactionRepository::with_reference_store(
                    references.clone(),
                )),
                payouts: Arc::new(InMemoryPayoutRepository::new()),
                fee_configs: Arc::new(InMemoryFeeConfigRepository::new()),
                payment_methods: Arc::new(InMemoryPaymentMethodRepository::new()),
                references,
                users: Arc::new(InMemoryUserDirectory::new()),
            }
        }
    };

    // Payment gateways
    let gateways = Arc::new(GatewayRegistry::from_config(&config.payments)?);
    let providers = gateways.list_available_providers();
    if providers.is_empty() {
        warn!("⚠️  No payment gateway configured, only manual payments are available");
    } else {
        info!(providers = ?providers, "✅ Payment gateways registered");
    }

    let local_storage = Arc::new(LocalProofStorage::new(&config.storage));
    let engine = PaymentEngine::new(
        stores,
        gateways.clone(),
        Arc::new(LoggingNotificationSink::new()),
        Arc::new(SignedTicketIssuer::new(config.storage.signing_secret.clone())),
        local_storage.clone(),
        Arc::new(InternalLedgerPayoutSender),
        &config.payments,
    );

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let payout_worker = PayoutReleaseWorker::new(
        engine.payouts.clone(),
        PayoutReleaseConfig::from_config(&config.workers),
    );
    let payout_handle = tokio::spawn(payout_worker.run(worker_shutdown_rx.clone()));

    let monitor_worker = PaymentMonitorWorker::new(
        engine.transactions.clone(),
        engine.orchestrator.clone(),
        engine.ledger.clone(),
        PaymentMonitorConfig::from_config(&config),
    );
    let monitor_handle = tokio::spawn(monitor_worker.run(worker_shutdown_rx));
    info!("🔁 Payout release and payment monitor workers started");

    let state = AppState {
        engine,
        gateways,
        local_storage: Some(local_storage),
        db_pool,
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind server address");
        e
    })?;

    info!(address = %addr, "🌐 Server listening");
    info!("   POST /api/payments/intents");
    info!("   POST /api/payments/{{id}}/confirm | /refund | /proof");
    info!("   GET  /api/admin/payments/pending-verifications");
    info!("   POST /webhooks/{{provider}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for (name, handle) in [("payout release", payout_handle), ("payment monitor", monitor_handle)] {
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            error!(worker = name, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
