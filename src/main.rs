//! Banking System - backend API
//!
//! Accounts with atomic transfers, runtime access policies, session-backed
//! tokens and a task queue for post-commit side effects.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use banking_system::api::{self, AppState};
use banking_system::auth::{AuthService, JwtMaker, PgSessionStore};
use banking_system::jobs::JobScheduler;
use banking_system::ledger::{LedgerService, PgLedgerStore};
use banking_system::policy::{seed_policies, PgPolicyAdapter, PolicyEngine};
use banking_system::tasks::{
    LogMailer, PgTaskBroker, ProcessorConfig, SendVerifyEmailHandler, TaskBroker,
    TaskDistributor, TaskProcessor, TASK_SEND_VERIFY_EMAIL,
};
use banking_system::users::{PgUserStore, UserService};
use banking_system::{db, Config};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "banking_system=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// CORS for the configured origins; any origin when none are configured
fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allowed_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_json);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting banking system server");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;
    db::run_migrations(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Stores
    let ledger_store = Arc::new(PgLedgerStore::new(pool.clone()));
    let user_store = Arc::new(PgUserStore::new(pool.clone()));
    let session_store = Arc::new(PgSessionStore::new(pool.clone()));
    let broker: Arc<dyn TaskBroker> = Arc::new(PgTaskBroker::new(pool.clone()));

    // Policies: load once, then make sure the defaults exist
    let policies = Arc::new(PolicyEngine::new(Arc::new(PgPolicyAdapter::new(pool.clone()))));
    let loaded = policies.load().await?;
    let seeded = seed_policies(&policies).await?;
    tracing::info!(loaded, seeded, "Policy engine ready");

    // Services
    let users = UserService::new(user_store.clone());
    let auth = AuthService::new(
        user_store,
        session_store,
        Arc::new(JwtMaker::new(&config.token_symmetric_key)?),
        chrono::Duration::from_std(config.access_token_duration)?,
        chrono::Duration::from_std(config.refresh_token_duration)?,
    );

    // Task consumers
    let mut processor = TaskProcessor::new(
        broker.clone(),
        ProcessorConfig {
            concurrency: config.worker_concurrency,
            retry: config.task_retry,
            ..Default::default()
        },
    )?;
    processor.register(
        TASK_SEND_VERIFY_EMAIL,
        Arc::new(SendVerifyEmailHandler::new(
            users.clone(),
            Arc::new(LogMailer::new(
                config.email_sender_name.clone(),
                config.email_sender_address.clone(),
            )),
            config.frontend_domain.clone(),
        )),
    );
    let processor = processor.start();

    // Maintenance jobs
    let (scheduler_tx, scheduler_rx) = watch::channel(false);
    let scheduler = JobScheduler::new(broker.clone()).start(scheduler_rx);

    let state = AppState {
        ledger: Arc::new(LedgerService::new(ledger_store)),
        users: Arc::new(users),
        auth: Arc::new(auth),
        policies,
        distributor: TaskDistributor::new(broker.clone()),
        tasks: broker,
        request_timeout: config.request_timeout,
        trust_forwarded_for: config.trust_forwarded_for,
    };

    let app: Router = api::create_router(state)
        .layer(cors_layer(&config)?)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Cleanup: stop consumers first so no handler outlives the pool
    tracing::info!("Server shutting down...");

    let report = processor.shutdown(config.shutdown_timeout).await;
    if report.drained {
        tracing::info!("Task processor drained");
    } else {
        tracing::warn!(
            aborted = report.aborted,
            requeued = report.requeued,
            "Task processor stopped before in-flight tasks finished"
        );
    }

    let _ = scheduler_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Job scheduler did not stop cleanly");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
