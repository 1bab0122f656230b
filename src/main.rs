use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use tabletap_api as api;

use api::cart::{CartStore, JsonFileCartStorage, MenuCatalog, StaticMenuCatalog};
use api::gateway::snap::SnapGateway;
use api::repository::{InMemoryOrderRepository, OrderRepository, RedisOrderRepository};
use api::services::reconciliation::run_orphan_sweeper;
use api::services::{OrderService, PaymentReconciler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let repository: Arc<dyn OrderRepository> = match cfg.repository_backend.as_str() {
        "redis" => {
            info!(url = %cfg.redis_url, "using redis order store");
            let client = redis::Client::open(cfg.redis_url.clone())
                .context("invalid redis url")?;
            Arc::new(
                RedisOrderRepository::connect(&client, cfg.redis_namespace.clone())
                    .await
                    .context("failed to connect to redis")?,
            )
        }
        _ => {
            info!("using in-memory order store");
            Arc::new(InMemoryOrderRepository::new())
        }
    };

    let catalog: Arc<dyn MenuCatalog> = match &cfg.menu_path {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("failed to read menu file {path}"))?;
            let items = serde_json::from_slice(&raw)
                .with_context(|| format!("malformed menu file {path}"))?;
            Arc::new(StaticMenuCatalog::new(items))
        }
        None => Arc::new(StaticMenuCatalog::empty()),
    };

    let carts = Arc::new(
        CartStore::load(
            Arc::new(JsonFileCartStorage::new(cfg.cart_snapshot_path.clone())),
            catalog,
            event_sender.clone(),
        )
        .await?,
    );

    let gateway = Arc::new(SnapGateway::new(
        cfg.midtrans_server_key.clone(),
        cfg.midtrans_production,
    )?);

    let orders = Arc::new(OrderService::new(
        repository.clone(),
        gateway.clone(),
        event_sender.clone(),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        repository,
        gateway,
        event_sender,
        cfg.midtrans_server_key.clone(),
        cfg.poll_interval(),
        cfg.poll_ceiling(),
    ));

    tokio::spawn(run_orphan_sweeper(
        reconciler.clone(),
        cfg.sweep_interval(),
        cfg.sweep_cutoff(),
    ));

    let cfg = Arc::new(cfg);
    let state = api::AppState {
        orders,
        reconciler,
        carts,
        config: cfg.clone(),
    };

    let app = api::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = cfg.socket_addr()?;
    info!("tabletap-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
