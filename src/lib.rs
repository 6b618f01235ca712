//! Media Orchestrator - Core Library
//!
//! Client-side orchestration for a remote media extraction backend: checks
//! the backend is reachable, discovers the formats a media page offers,
//! drives download sessions to completion and keeps a short history of
//! recent downloads.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::{
    backend::BackendApi,
    catalog::FormatCatalogClient,
    config::AppConfig,
    connectivity::{ConnectivityGuard, EndpointSnapshot, Reachability},
    error_handling::{AppResult, ErrorCategory, OrchestratorError},
    ledger::{CompletionRecord, CompletionStore, JsonLedgerStore, NoopStore},
    manager::DownloadSessionManager,
    models::{
        Discovery, DownloadSession, FormatCatalog, FormatEntry, FormatInfo, MediaUrl,
        ServerFile, SessionEvent, SessionState,
    },
    orchestrator::{ActiveDownload, MediaOrchestrator},
    registry::{EntryKey, RecentDownloads, RecentEntry},
    session::SessionHandle,
    transport::{DownloadTransport, ProgressReport, TransferEvent},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing(None);
    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
        // Second initialisation is tolerated
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "media-orchestrator");
    }
}
