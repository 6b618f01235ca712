//! Service connectivity guard
//!
//! Owns the process-wide "which backend am I talking to" setting. Operations
//! take an [`EndpointSnapshot`] when they begin and keep it until they
//! finish, so changing the endpoint never retargets work already in flight.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::backend::BackendApi;
use crate::core::config::AppConfig;
use crate::core::error_handling::{errors, AppResult, OrchestratorError};
use crate::core::models::HealthReport;
use crate::utils::validation::validate_endpoint;

/// Outcome of a reachability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Reachable,
    Unreachable(String),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// Endpoint value as seen at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub url: Url,
    /// Bumped on every endpoint change
    pub generation: u64,
}

#[derive(Debug)]
struct GuardState {
    endpoint: Url,
    generation: u64,
    last_result: Option<(u64, Reachability)>,
}

pub struct ConnectivityGuard {
    state: RwLock<GuardState>,
    /// Serializes endpoint changes so the config file and memory agree
    change_lock: Mutex<()>,
    api: BackendApi,
    probe_timeout: Duration,
    /// Where endpoint changes are persisted, if anywhere
    config_path: Option<PathBuf>,
}

impl ConnectivityGuard {
    pub fn new(endpoint: &str, api: BackendApi, probe_timeout: Duration) -> AppResult<Self> {
        let endpoint = validate_endpoint(endpoint)?;
        Ok(Self {
            state: RwLock::new(GuardState {
                endpoint,
                generation: 0,
                last_result: None,
            }),
            change_lock: Mutex::new(()),
            api,
            probe_timeout,
            config_path: None,
        })
    }

    /// Build from configuration; endpoint changes are written back to `config_path`
    pub fn from_config(
        config: &AppConfig,
        api: BackendApi,
        config_path: Option<PathBuf>,
    ) -> AppResult<Self> {
        let mut guard = Self::new(&config.backend.endpoint, api, config.backend.probe_timeout())?;
        guard.config_path = config_path;
        Ok(guard)
    }

    pub fn endpoint(&self) -> EndpointSnapshot {
        let state = self.state.read();
        EndpointSnapshot {
            url: state.endpoint.clone(),
            generation: state.generation,
        }
    }

    /// Replace the endpoint. Persists first; on persistence failure nothing changes.
    pub fn set_endpoint(&self, endpoint: &str) -> AppResult<EndpointSnapshot> {
        let url = validate_endpoint(endpoint)?;
        let _change = self.change_lock.lock();

        if let Some(path) = &self.config_path {
            let mut config = AppConfig::load_from(path)
                .map_err(|e| errors::storage(format!("{e:#}")))?;
            config.backend.endpoint = endpoint.trim().to_string();
            config
                .save_to(path)
                .map_err(|e| errors::storage(format!("{e:#}")))?;
        }

        let mut state = self.state.write();
        state.endpoint = url;
        state.generation += 1;
        state.last_result = None;
        info!("Backend endpoint changed to {}", state.endpoint);

        Ok(EndpointSnapshot {
            url: state.endpoint.clone(),
            generation: state.generation,
        })
    }

    /// Probe the current endpoint once. Never retried here.
    pub async fn check_reachable(&self) -> Reachability {
        self.check_snapshot(&self.endpoint()).await
    }

    /// Probe and return the snapshot that was checked, or `Unreachable`
    pub async fn ensure_reachable(&self) -> AppResult<EndpointSnapshot> {
        let snapshot = self.endpoint();
        match self.check_snapshot(&snapshot).await {
            Reachability::Reachable => Ok(snapshot),
            Reachability::Unreachable(reason) => Err(OrchestratorError::Unreachable(reason)),
        }
    }

    /// Most recent probe result, if it was taken against the current endpoint
    pub fn last_result(&self) -> Option<Reachability> {
        let state = self.state.read();
        match &state.last_result {
            Some((generation, result)) if *generation == state.generation => Some(result.clone()),
            _ => None,
        }
    }

    pub async fn health(&self) -> AppResult<HealthReport> {
        let snapshot = self.endpoint();
        self.api.health(&snapshot.url).await
    }

    async fn check_snapshot(&self, snapshot: &EndpointSnapshot) -> Reachability {
        let result = self.api.probe(&snapshot.url, self.probe_timeout).await;
        if !result.is_reachable() {
            debug!("Probe of {} failed: {:?}", snapshot.url, result);
        }

        let mut state = self.state.write();
        if state.generation == snapshot.generation {
            state.last_result = Some((snapshot.generation, result.clone()));
        } else {
            warn!(
                "Endpoint changed while probing {}; discarding result",
                snapshot.url
            );
        }
        result
    }
}
