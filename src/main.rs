use metrics_exporter_prometheus::PrometheusBuilder;
use pipeserve::{config, model, monitor, server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Init
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeserve=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    let metrics = PrometheusBuilder::new().install_recorder()?;

    // 2. Load Config
    let config_path =
        std::env::var("PIPESERVE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let mut config = config::AppConfig::load(&config_path)?;
    if let Ok(host) = std::env::var("PIPESERVE_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("PIPESERVE_PORT") {
        config.server.port = port.parse()?;
    }

    // 3. Initialize Models
    let stats: Arc<dyn monitor::StatsProvider> = Arc::new(monitor::SystemMonitor::new());
    let loader = model::loader::from_config(&config.models);
    let provisioner = Arc::new(model::provisioner::Provisioner::new(loader, Arc::clone(&stats)));
    info!(
        completion = %config.models.completion.name,
        qa = %config.models.qa.name,
        "Loading models"
    );
    if let Err(err) = provisioner.initialize().await {
        // Keep serving: health reports the failure and a reload can recover.
        error!(error = %err, "Starting without models");
    }

    let state = Arc::new(server::types::AppState::new(
        &config,
        provisioner,
        stats,
        metrics,
    ));

    // 4. Sweep idle rate-limit entries
    let limiter = Arc::clone(&state.limiter);
    let prune_every = Duration::from_secs(config.rate_limits.prune_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = limiter.prune(Instant::now());
            if pruned > 0 {
                info!(pruned, "Pruned idle rate-limit entries");
            }
        }
    });

    // 5. Create Router
    let app = server::routes::create_router(state);

    // 6. Bind & Serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
}
