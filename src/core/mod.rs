//! Core business logic module
//!
//! Backend client, connectivity, format discovery, session state machine,
//! recent downloads and the orchestrator facade that ties them together.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod error_handling;
pub mod ledger;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod transport;


// Re-export commonly used types
pub use config::AppConfig;
pub use manager::DownloadSessionManager;
pub use orchestrator::MediaOrchestrator;
