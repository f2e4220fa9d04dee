//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tx_orchestrator::api::create_router;
use tx_orchestrator::app::{AppState, JobService, TxListener, TxListenerConfig};
use tx_orchestrator::domain::OrchestrationClient;
use tx_orchestrator::infra::{
    EthRpcClient, HttpOrchestrationClient, LocalOrchestrationClient, OrchestrationConfig,
    PostgresClient, PostgresConfig, RpcClientConfig, WebhookNotifier, channel,
};

/// Capacity of the in-process message bus
const BUS_CAPACITY: usize = 1024;

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    /// Remote orchestration API; the in-process job service is used when unset
    orchestration_api_url: Option<String>,
    orchestration_api_key: Option<SecretString>,
    orchestration_use_proxy: bool,
    notifier_webhook_url: Option<String>,
    enable_tx_listener: bool,
    json_logs: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let orchestration_api_url = env::var("ORCHESTRATION_API_URL")
            .ok()
            .filter(|u| !u.is_empty());
        let orchestration_api_key = env::var("ORCHESTRATION_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        let orchestration_use_proxy = env::var("ORCHESTRATION_USE_PROXY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let notifier_webhook_url = env::var("NOTIFIER_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.is_empty());

        let enable_tx_listener = env::var("ENABLE_TX_LISTENER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let json_logs = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            host,
            port,
            orchestration_api_url,
            orchestration_api_key,
            orchestration_use_proxy,
            notifier_webhook_url,
            enable_tx_listener,
            json_logs,
        })
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    info!("🏗️  Transaction Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");
    let repository = Arc::new(postgres_client);

    let (publisher, bus_receiver) = channel(BUS_CAPACITY);
    let jobs = Arc::new(JobService::new(repository, Arc::new(publisher)));
    info!("   ✓ Job service created");

    let mut app_state = AppState::new(Arc::clone(&jobs));

    let tx_listener = if config.enable_tx_listener {
        let orchestration: Arc<dyn OrchestrationClient> = match &config.orchestration_api_url {
            Some(url) => {
                let mut orchestration_config = OrchestrationConfig::new(url.clone());
                orchestration_config.api_key = config.orchestration_api_key.clone();
                orchestration_config.use_proxy = config.orchestration_use_proxy;
                info!("   ✓ Orchestration API client created ({})", url);
                Arc::new(HttpOrchestrationClient::new(orchestration_config)?)
            }
            None => {
                info!("   ○ ORCHESTRATION_API_URL not set, using the in-process job service");
                Arc::new(LocalOrchestrationClient::new(Arc::clone(&jobs)))
            }
        };

        let chain_client = Arc::new(EthRpcClient::new(RpcClientConfig::from_env())?);
        info!("   ✓ Chain RPC client created");

        if config.notifier_webhook_url.is_none() {
            warn!("   ⚠ NOTIFIER_WEBHOOK_URL not set, contract events will be dropped");
        }
        let notifier = Arc::new(WebhookNotifier::new(config.notifier_webhook_url.clone())?);

        let listener = Arc::new(TxListener::new(
            TxListenerConfig::from_env(),
            chain_client,
            orchestration,
            notifier,
            CancellationToken::new(),
        ));

        match listener.recover().await {
            Ok(count) => info!("   ✓ Recovered {} pending jobs", count),
            Err(e) => warn!(error = %e, "   ⚠ Pending job recovery failed"),
        }
        listener.spawn_bus_consumer(bus_receiver);
        info!("   ✓ Tx-listener started");

        app_state = app_state.with_tx_listener(Arc::clone(&listener));
        Some(listener)
    } else {
        info!("   ○ Tx-listener disabled");
        None
    };

    let router = create_router(Arc::new(app_state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx_listener) = tx_listener {
        tx_listener.shutdown().await;
    }

    info!("Server shutdown complete");
    Ok(())
}
