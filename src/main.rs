use tokio_util::sync::CancellationToken;

use geofence::config::Settings;
use geofence::{logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::load()?;
    logging::init(&settings.log_level, settings.log_json)?;

    let state = AppState::from_settings(&settings).await?;

    let zones = state.warm_up().await;
    tracing::info!(
        zones,
        refresh_interval_secs = settings.refresh_interval_secs,
        dedup_window_secs = settings.dedup_window_secs,
        "Geofence engine ready"
    );

    let shutdown = CancellationToken::new();
    let tasks = state.spawn_background(&shutdown);

    shutdown_signal().await;
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    let counters = state.detection.counters();
    tracing::info!(
        checked = counters.checked,
        emitted = counters.emitted,
        suppressed = counters.suppressed,
        "Geofence engine stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping background tasks");
}
