use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    error::{AppError, AppResult},
    ledger::LedgerRepository,
    queue::{PaymentJobStore, PaymentWorker, QueueRunner},
    risk::FailedPaymentTracker,
    scheduler::PaymentScheduler,
    x402::{
        service::TokenDomainResolver, FacilitatorClient, LocalSigner, SigningAccount,
        X402PaymentService,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Core repositories
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let tracker = Arc::new(FailedPaymentTracker::new(pool.clone()));
    let queue = Arc::new(PaymentJobStore::new(pool.clone()));
    info!("✅ Ledger, tracker and job queue initialized");

    // Signing & settlement client
    let facilitator = FacilitatorClient::new(&config.facilitator_url);
    let domains = TokenDomainResolver::new(&config.rpc_url);
    let x402 = Arc::new(X402PaymentService::new(
        facilitator,
        domains,
        config.chain_id(),
    ));
    info!(
        "✅ x402 payment service initialized (facilitator: {}, network: {})",
        config.facilitator_url, config.network
    );

    // The payer signing capability. Key custody stays behind the
    // SigningAccount trait; this process only ever sees the local variant.
    let payer_key = std::env::var("PAYER_PRIVATE_KEY").map_err(|_| {
        AppError::Config("PAYER_PRIVATE_KEY must be set for auto-pay settlement".to_string())
    })?;
    let signer: Arc<dyn SigningAccount> = Arc::new(LocalSigner::from_key(&payer_key)?);
    info!("✅ Payer signer loaded (address: {})", signer.address());

    // Worker + queue runner
    let worker = Arc::new(PaymentWorker::new(
        ledger.clone(),
        tracker.clone(),
        x402.clone(),
        signer,
        config.network.clone(),
        config.payment_asset.clone(),
        config.asset_decimals,
    ));
    let runner = QueueRunner::new(queue.clone(), worker, config.worker_slots);
    runner.start();

    // Scheduler: immediate sweep, then every interval
    let scheduler = Arc::new(PaymentScheduler::new(
        ledger.clone(),
        queue.clone(),
        Duration::from_secs(config.scheduler_interval_minutes * 60),
    ));
    scheduler.start();

    Ok(AppState {
        ledger,
        queue,
        tracker,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured");

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
