//! Marquee booking server.

use marquee_server::metrics::{install_recorder, spawn_metrics_server};
use marquee_server::{Application, Config, Services, build_router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,marquee_server=debug,marquee_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Marquee booking server");

    let config = Config::from_env();
    config.validate()?;
    info!(
        order_store = ?config.orders.kind,
        hold_duration_secs = config.holds.hold_duration_secs,
        max_seats_per_session = config.holds.max_seats_per_session,
        "Configuration loaded"
    );

    let prometheus = install_recorder()?;
    let services = Services::from_config(&config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let sweeper = services.sweeper(&config).spawn(shutdown_tx.subscribe());
    let metrics_listener = TcpListener::bind(config.metrics_address()).await?;
    let metrics = spawn_metrics_server(metrics_listener, prometheus, shutdown_tx.subscribe());

    let app = build_router(services.app_state(&config));
    let listener = TcpListener::bind(config.bind_address()).await?;

    Application::new(
        listener,
        app,
        vec![("expiry_sweeper", sweeper), ("metrics_server", metrics)],
        shutdown_tx,
        config,
    )
    .run()
    .await
}
