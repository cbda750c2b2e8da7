//! droid-agent entry point.
//!
//! Starts the control API and, when a backend is configured, the task poll
//! loop. Environment variables:
//! - `DROID_AGENT_WEB_PORT` - Control API port (default: 8080)
//! - `DROID_AGENT_WEB_USER` - Basic auth username (default: "admin")
//! - `DROID_AGENT_WEB_PASS` - Basic auth password (auth disabled if not set)

use std::sync::Arc;

use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = agent_lib::init_logging();

    info!("Starting droid-agent");

    if let Some(dir) = agent_lib::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("DROID_AGENT_WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    if std::env::var("DROID_AGENT_WEB_PASS").map(|p| !p.is_empty()).unwrap_or(false) {
        let user = std::env::var("DROID_AGENT_WEB_USER").unwrap_or_else(|_| "admin".to_string());
        info!("Basic auth enabled (user: {})", user);
    } else {
        info!("Basic auth disabled (set DROID_AGENT_WEB_PASS to enable)");
    }

    let state = Arc::new(agent_lib::AppState::new());

    {
        let config = state.config.read().await;
        info!("Device id: {}", config.device_id);
        if config.backend_url.is_empty() {
            info!("Standalone mode: dispatch tasks via POST /api/task");
        } else {
            info!("Fleet mode: polling {} every {}s", config.backend_url, config.poll_interval_secs);
        }
    }

    // Backend poll loop (no-op without a configured backend)
    {
        let state = state.clone();
        tokio::spawn(async move {
            agent_lib::run_poll_loop(state).await;
        });
    }

    // Start the control API (blocks until shutdown)
    agent_lib::web::start_server(state, port).await?;

    Ok(())
}
