//! droid-agent
//!
//! Fleet-controlled device automation agent: executes scripted browsing tasks
//! dispatched by a backend, harvests advertisement redirect URLs, and rotates
//! the device fingerprint correlated to the egress proxy's geolocation.

pub mod backend;
pub mod browser;
pub mod extract;
pub mod geo;
pub mod proxy;
pub mod shell;
pub mod stats;
pub mod task;
pub mod uniqueness;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use backend::BackendClient;
use browser::{launch_driver, SessionConfig, SharedFingerprint};
use geo::GeoLookup;
use proxy::{ProxyGeoCorrelator, ProxyManager};
use shell::{RootShell, Shell};
use stats::GlobalStats;
use task::{DriverFactory, ExecutorConfig, TaskOrchestrator};
use uniqueness::UniquenessService;

/// Agent configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Stable identifier this device reports to the backend
    pub device_id: String,
    /// Fleet backend base URL; empty means standalone (web dispatch only)
    pub backend_url: String,
    pub api_key: String,
    /// Country used when proxy geolocation fails entirely
    pub default_country: String,
    /// Package whose browser storage uniqueness clears
    pub browser_package: String,
    /// Explicit Chrome executable; auto-detected when unset
    pub chrome_path: Option<String>,
    /// Backend task-poll interval in seconds
    pub poll_interval_secs: u64,
    /// Base retry backoff for step execution
    pub retry_base_delay_ms: u64,
    pub page_load_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub element_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            backend_url: String::new(),
            api_key: String::new(),
            default_country: "us".to_string(),
            browser_package: "com.android.chrome".to_string(),
            chrome_path: None,
            poll_interval_secs: 15,
            retry_base_delay_ms: 1000,
            page_load_timeout_secs: 30,
            settle_delay_ms: 1500,
            element_timeout_secs: 10,
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("droid-agent").join("logs"))
}

impl AgentConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("droid-agent").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        let config = Self::default();
        config.save();
        config
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry_base_delay_ms: self.retry_base_delay_ms,
            load_timeout: Duration::from_secs(self.page_load_timeout_secs),
            settle_delay_ms: self.settle_delay_ms,
            element_timeout: Duration::from_secs(self.element_timeout_secs),
        }
    }
}

/// Application state shared across the agent
pub struct AppState {
    pub config: Arc<RwLock<AgentConfig>>,
    pub shell: Arc<dyn Shell>,
    pub geo: Arc<GeoLookup>,
    pub proxies: Arc<ProxyManager>,
    pub fingerprint: SharedFingerprint,
    pub stats: Arc<GlobalStats>,
    pub backend: Option<Arc<BackendClient>>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub uniqueness: Arc<UniquenessService>,
    pub correlator: Arc<ProxyGeoCorrelator>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> Self {
        let loaded = AgentConfig::load();

        let backend = if !loaded.backend_url.is_empty() {
            let api_key = if loaded.api_key.is_empty() { None } else { Some(loaded.api_key.clone()) };
            match BackendClient::new(&loaded.backend_url, &loaded.device_id, api_key) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    error!("Backend client init failed: {}", e);
                    None
                }
            }
        } else {
            info!("No backend configured; tasks arrive via the web API only");
            None
        };

        let shell: Arc<dyn Shell> = Arc::new(RootShell::new());
        let geo = Arc::new(GeoLookup::new());
        let proxies = ProxyManager::new();
        let fingerprint = SharedFingerprint::new();
        let stats = Arc::new(GlobalStats::new());

        let config = Arc::new(RwLock::new(loaded.clone()));

        let factory = Self::driver_factory(config.clone(), fingerprint.clone());
        let orchestrator = Arc::new(TaskOrchestrator::new(
            factory,
            loaded.executor_config(),
            backend.clone(),
            stats.clone(),
            loaded.device_id.clone(),
        ));

        let uniqueness = Arc::new(UniquenessService::new(
            shell.clone(),
            geo.clone(),
            proxies.clone(),
            fingerprint.clone(),
            loaded.browser_package.clone(),
        ));

        let correlator = Arc::new(ProxyGeoCorrelator::new(
            shell.clone(),
            geo.clone(),
            proxies.clone(),
            fingerprint.clone(),
            loaded.default_country.clone(),
        ));

        Self {
            config,
            shell,
            geo,
            proxies,
            fingerprint,
            stats,
            backend,
            orchestrator,
            uniqueness,
            correlator,
        }
    }

    /// Production driver factory: one fresh browser session per task, with
    /// the current fingerprint overrides and the task's proxy applied.
    fn driver_factory(config: Arc<RwLock<AgentConfig>>, fingerprint: SharedFingerprint) -> DriverFactory {
        Arc::new(move |kind, proxy, task_id| {
            let config = config.clone();
            let fingerprint = fingerprint.clone();
            Box::pin(async move {
                let chrome_path = config.read().await.chrome_path.clone();
                let session_config = SessionConfig::for_task(&task_id)
                    .proxy(proxy)
                    .chrome_path(chrome_path);
                launch_driver(kind, session_config, &fingerprint.snapshot()).await
            })
        })
    }

    /// Apply new settings at runtime.
    ///
    /// Backend and device-id changes take effect on restart; timing and path
    /// settings apply to the next task.
    pub async fn configure(&self, config: AgentConfig) {
        config.save();
        *self.config.write().await = config;
        info!("Agent configured");
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the backend for dispatched tasks and execute them.
///
/// Runs forever; a missing backend client returns immediately.
pub async fn run_poll_loop(state: Arc<AppState>) {
    let Some(backend) = state.backend.clone() else {
        return;
    };

    info!("Backend poll loop started");
    loop {
        let interval = state.config.read().await.poll_interval_secs.max(1);

        match backend.fetch_next_task().await {
            Ok(Some(task)) => {
                info!("Task {} received from backend", task.id);
                let result = state.orchestrator.execute(task).await;
                info!(
                    "Task {} finished with status {}",
                    result.task_id,
                    result.status.as_str()
                );
                // Immediately look for the next task
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!("Task poll failed: {}", e),
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

/// Initialize logging (console + daily-rolling file)
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "droid-agent.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
