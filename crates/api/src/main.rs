//! Inventory service entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use inventory::{EventConsumer, InventoryService};
use ledger::{InMemoryStockLedger, PostgresStockLedger, StockLedger};
use messaging::{Broker, EventPublisher, InMemoryBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(feature = "kafka")]
fn connect_broker(config: &Config) -> Arc<dyn Broker> {
    let Some(brokers) = &config.kafka_brokers else {
        return Arc::new(InMemoryBroker::new());
    };
    let broker =
        messaging::KafkaBroker::connect(brokers.as_str()).expect("failed to connect to Kafka");
    Arc::new(broker)
}

#[cfg(not(feature = "kafka"))]
fn connect_broker(config: &Config) -> Arc<dyn Broker> {
    if config.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS is set but the kafka feature is disabled, using in-process broker");
    }
    Arc::new(InMemoryBroker::new())
}

/// Runs the consumer and the HTTP server until a shutdown signal arrives.
async fn serve<L: StockLedger + 'static>(
    config: &Config,
    ledger: Arc<L>,
    broker: Arc<dyn Broker>,
    metrics_handle: PrometheusHandle,
) {
    if config.seed_demo_data {
        if let Err(e) = api::seed::seed_demo_items(&*ledger).await {
            tracing::error!(error = %e, "failed to seed demo inventory");
        }
    }

    let publisher = EventPublisher::new(Arc::clone(&broker), config.service_name.clone())
        .with_retry_policy(config.retry_policy())
        .with_confirm_timeout(config.publish_confirm_timeout());
    let service = InventoryService::new(ledger, publisher);

    let consumer = Arc::new(EventConsumer::new(service.clone(), config.consumer_config()));
    let subscription = consumer
        .subscribe(broker.as_ref())
        .await
        .expect("failed to subscribe to inventory queue");

    let (stop_consumer, stopped) = oneshot::channel::<()>();
    let consumer_task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move {
            consumer
                .run(subscription, async move {
                    let _ = stopped.await;
                })
                .await;
        }
    });

    let state = Arc::new(AppState::new(service.clone(), config.rpc_timeout()));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, service = %config.service_name, "starting inventory service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // The message in flight is finished before the consumer returns.
    let _ = stop_consumer.send(());
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "event consumer task failed");
    }
    service.publisher().close().await;
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect the broker
    let broker = connect_broker(&config);

    // 4. Open the ledger and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let ledger = Arc::new(PostgresStockLedger::new(pool));
            ledger
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("PostgreSQL ledger ready");

            serve(&config, Arc::clone(&ledger), broker, metrics_handle).await;
            ledger.close().await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger");
            serve(&config, Arc::new(InMemoryStockLedger::new()), broker, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
