//! Orchestrator facade
//!
//! Wires the connectivity guard, catalog client, session manager, registry
//! and completion ledger together behind the handful of calls a front end
//! needs.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::core::backend::BackendApi;
use crate::core::catalog::FormatCatalogClient;
use crate::core::config::AppConfig;
use crate::core::connectivity::{ConnectivityGuard, EndpointSnapshot, Reachability};
use crate::core::error_handling::{errors, AppResult};
use crate::core::ledger::{CompletionStore, JsonLedgerStore, NoopStore};
use crate::core::manager::DownloadSessionManager;
use crate::core::models::{
    DeleteReport, Discovery, DownloadSession, HealthReport, MediaUrl, SessionEvent,
};
use crate::core::registry::{RecentDownloads, RecentEntry};
use crate::core::session::SessionHandle;

/// A session running on the tokio runtime
pub struct ActiveDownload {
    pub handle: SessionHandle,
    /// Subscribed before the transfer started, so no event is missed
    pub events: broadcast::Receiver<SessionEvent>,
    pub task: JoinHandle<AppResult<DownloadSession>>,
}

pub struct MediaOrchestrator {
    config: AppConfig,
    api: BackendApi,
    guard: Arc<ConnectivityGuard>,
    catalog: FormatCatalogClient,
    manager: Arc<DownloadSessionManager>,
    registry: Arc<RecentDownloads>,
}

impl MediaOrchestrator {
    /// Build from configuration. Endpoint changes are persisted to `config_path` when given.
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> AppResult<Self> {
        let store: Arc<dyn CompletionStore> = if config.history.ledger_enabled {
            let path = config
                .ledger_path()
                .map_err(|e| errors::storage(format!("{e:#}")))?;
            info!("Recording completed downloads in {:?}", path);
            Arc::new(JsonLedgerStore::new(path))
        } else {
            Arc::new(NoopStore)
        };
        Self::with_store(config, config_path, store)
    }

    pub fn with_store(
        config: AppConfig,
        config_path: Option<PathBuf>,
        store: Arc<dyn CompletionStore>,
    ) -> AppResult<Self> {
        let api = BackendApi::new(&config.backend)?;
        let guard = Arc::new(ConnectivityGuard::from_config(&config, api.clone(), config_path)?);
        let registry = Arc::new(RecentDownloads::new(config.history.capacity));
        let catalog = FormatCatalogClient::new(api.clone(), guard.clone());
        let manager = Arc::new(
            DownloadSessionManager::new(Arc::new(api.clone()), guard.clone())
                .with_store(store)
                .with_registry(registry.clone()),
        );

        Ok(Self {
            config,
            api,
            guard,
            catalog,
            manager,
            registry,
        })
    }

    /// Load the persisted configuration (falling back to defaults) and build from it
    pub fn load() -> anyhow::Result<Self> {
        let config = load_or_initialize_config();
        let config_path = AppConfig::get_config_path().ok();
        Self::new(config, config_path)
            .map_err(|e| anyhow::anyhow!("Failed to create orchestrator: {}", e))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn endpoint(&self) -> EndpointSnapshot {
        self.guard.endpoint()
    }

    pub fn registry(&self) -> Arc<RecentDownloads> {
        self.registry.clone()
    }

    pub fn set_endpoint(&self, endpoint: &str) -> AppResult<EndpointSnapshot> {
        self.guard.set_endpoint(endpoint)
    }

    pub async fn check_backend(&self) -> Reachability {
        self.guard.check_reachable().await
    }

    pub async fn health(&self) -> AppResult<HealthReport> {
        self.guard.health().await
    }

    /// Validate, probe, then ask the backend for formats
    #[instrument(skip(self))]
    pub async fn discover(&self, url: &str) -> AppResult<Discovery> {
        let url = MediaUrl::parse(url)?;
        let endpoint = self.guard.ensure_reachable().await?;
        self.catalog.fetch_formats_at(&endpoint, &url).await
    }

    /// Create a session and run it in the background
    #[instrument(skip(self))]
    pub async fn begin_download(&self, url: &str, format_id: &str) -> AppResult<ActiveDownload> {
        MediaUrl::parse(url)?;
        if format_id.trim().is_empty() {
            return Err(errors::invalid_input("format_id is empty"));
        }

        let endpoint = self.guard.ensure_reachable().await?;
        let handle = self.manager.create_session(url, format_id)?;
        Ok(self.spawn_at(handle, endpoint))
    }

    /// Like [`begin_download`](Self::begin_download) but waits for the outcome
    pub async fn download(&self, url: &str, format_id: &str) -> AppResult<DownloadSession> {
        let active = self.begin_download(url, format_id).await?;
        match active.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(active.handle.snapshot()),
        }
    }

    /// Run an existing Pending session (typically one returned by [`retry`](Self::retry))
    pub fn spawn(&self, handle: SessionHandle) -> ActiveDownload {
        let endpoint = self.guard.endpoint();
        self.spawn_at(handle, endpoint)
    }

    fn spawn_at(&self, handle: SessionHandle, endpoint: EndpointSnapshot) -> ActiveDownload {
        let events = handle.subscribe();
        let manager = self.manager.clone();
        let task_handle = handle.clone();
        let task = tokio::spawn(async move { manager.start_at(&task_handle, &endpoint).await });

        ActiveDownload {
            handle,
            events,
            task,
        }
    }

    pub fn cancel(&self, handle: &SessionHandle) -> AppResult<DownloadSession> {
        self.manager.cancel(handle)
    }

    pub fn retry(&self, handle: &SessionHandle) -> AppResult<SessionHandle> {
        self.manager.retry(handle)
    }

    /// Refresh server history (failures are logged, never returned) and list
    pub async fn recent(&self, limit: usize) -> Vec<RecentEntry> {
        let endpoint = self.guard.endpoint();
        self.registry.refresh(&self.api, &endpoint.url).await;
        self.registry.list(limit)
    }

    pub async fn delete_server_file(&self, name: &str) -> AppResult<DeleteReport> {
        let endpoint = self.guard.endpoint();
        let report = self.api.delete_file(&endpoint.url, name).await?;
        info!("Deleted server file {}", name);
        Ok(report)
    }

    pub async fn clear_server_files(&self) -> AppResult<DeleteReport> {
        let endpoint = self.guard.endpoint();
        let report = self.api.delete_all_files(&endpoint.url).await?;
        info!("Cleared server files ({:?} removed)", report.deleted_count);
        Ok(report)
    }
}

fn load_or_initialize_config() -> AppConfig {
    match AppConfig::load() {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                warn!(
                    "Invalid configuration detected ({}), falling back to defaults",
                    err
                );
                AppConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from disk: {}. Using defaults",
                err
            );
            AppConfig::default()
        }
    }
}
