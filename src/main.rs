use axum::{ Router, routing::{ get, post } };
use brickfund::{ Config, Result };
use migration::MigratorTrait;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt };

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber
        ::registry()
        .with(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| "brickfund=debug,tower_http=debug".into())
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| brickfund::AppError::Config(e.to_string()))?;

    // Initialize database connection
    let db = sea_orm::Database
        ::connect(&config.database_url).await
        .map_err(brickfund::AppError::Database)?;

    tracing::info!("Database connected successfully");

    // Run migrations
    migration::Migrator::up(&db, None).await.map_err(brickfund::AppError::Database)?;

    tracing::info!("Migrations completed successfully");

    // Ledger store
    let ledger: Arc<dyn brickfund::db::LedgerStore> = Arc::new(brickfund::db::PgLedger::new(db));

    // Payment rails
    let gateway = Arc::new(
        brickfund::rails::PaymeeClient::new(
            &config.paymee_base_url,
            &config.paymee_api_token,
            config.gateway_timeout
        )?
    );
    let wallet_rail = Arc::new(brickfund::rails::WalletRail::new(ledger.clone()));
    let card_rail = Arc::new(brickfund::rails::CardRail::new(gateway.clone()));
    let bank_rail = Arc::new(brickfund::rails::BankTransferRail::new(gateway.clone()));

    // Chain settlement client and project directory
    let chain: Arc<dyn brickfund::chain::SettlementChain> = Arc::new(
        brickfund::chain::EvmSettlementClient::new(&config.chain)?
    );
    let projects: Arc<dyn brickfund::projects::ProjectDirectory> = Arc::new(
        brickfund::chain::EvmProjectDirectory::new(&config.chain)?
    );
    tracing::info!("Chain settlement client initialized");

    // Investment state machine
    let investment_service = Arc::new(
        brickfund::services::InvestmentService::new(
            ledger.clone(),
            wallet_rail,
            card_rail,
            bank_rail,
            chain.clone(),
            projects
        )
    );

    let config = Arc::new(config);

    // Reconciliation worker
    let reconciler = brickfund::services::Reconciler::new(
        ledger,
        investment_service.clone(),
        chain,
        config.policy.clone()
    );
    tokio::spawn(reconciler.start());
    tracing::info!("Reconciliation worker started");

    // Create app state
    let app_state = brickfund::api::AppState::new(investment_service, config.clone());

    // Build application router
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/investments",
            post(brickfund::api::investments::create_investment).get(
                brickfund::api::investments::list_investments
            )
        )
        .route("/api/investments/{id}", get(brickfund::api::investments::get_investment))
        .route(
            "/api/investments/{id}/cancel",
            post(brickfund::api::investments::cancel_investment)
        )
        .route("/webhooks/paymee", post(brickfund::api::webhooks::paymee_webhook))
        .route("/webhooks/chain", post(brickfund::api::webhooks::chain_webhook))
        .route("/api/ops/review-queue", get(brickfund::api::ops::review_queue))
        .route("/api/ops/investments/{id}/refund", post(brickfund::api::ops::refund_investment))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener
        ::bind(&addr).await
        .map_err(|e| brickfund::AppError::Internal(e.to_string()))?;

    axum::serve(listener, app).await.map_err(|e| brickfund::AppError::Internal(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
