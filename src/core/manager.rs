//! Download session manager
//!
//! Drives sessions from `Pending` to a terminal state. The manager keeps no
//! session table of its own: callers hold [`SessionHandle`]s and every
//! transition goes through the handle, optionally mirrored into a
//! [`RecentDownloads`] registry.

use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::core::connectivity::{ConnectivityGuard, EndpointSnapshot};
use crate::core::error_handling::{errors, AppResult};
use crate::core::ledger::{CompletionRecord, CompletionStore, NoopStore};
use crate::core::models::{DownloadSession, MediaUrl};
use crate::core::registry::RecentDownloads;
use crate::core::session::SessionHandle;
use crate::core::transport::{DownloadTransport, TransferEvent};
use crate::utils::network::resolve_location;

pub struct DownloadSessionManager {
    transport: Arc<dyn DownloadTransport>,
    guard: Arc<ConnectivityGuard>,
    store: Arc<dyn CompletionStore>,
    registry: Option<Arc<RecentDownloads>>,
}

impl DownloadSessionManager {
    pub fn new(transport: Arc<dyn DownloadTransport>, guard: Arc<ConnectivityGuard>) -> Self {
        Self {
            transport,
            guard,
            store: Arc::new(NoopStore),
            registry: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = store;
        self
    }

    /// Mirror every transition into `registry`
    pub fn with_registry(mut self, registry: Arc<RecentDownloads>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn create_session(&self, source_url: &str, format_id: &str) -> AppResult<SessionHandle> {
        let source_url = MediaUrl::parse(source_url)?;
        if format_id.trim().is_empty() {
            return Err(errors::invalid_input("format_id is empty"));
        }

        let handle = SessionHandle::new(DownloadSession::new(source_url, format_id));
        debug!("Created session {} for format {}", handle.id(), format_id);
        self.record(&handle.snapshot());
        Ok(handle)
    }

    /// Run the session against the current endpoint until it settles
    pub async fn start(&self, handle: &SessionHandle) -> AppResult<DownloadSession> {
        let endpoint = self.guard.endpoint();
        self.start_at(handle, &endpoint).await
    }

    /// Run the session against a previously captured endpoint.
    ///
    /// Only an invalid transition is returned as `Err`; transfer failures
    /// settle the session in `Failed` and come back as the final snapshot.
    #[instrument(skip(self, handle, endpoint), fields(session = %handle.id(), endpoint = %endpoint.url))]
    pub async fn start_at(
        &self,
        handle: &SessionHandle,
        endpoint: &EndpointSnapshot,
    ) -> AppResult<DownloadSession> {
        let started = handle.mark_started(&endpoint.url)?;
        self.record(&started);

        let token = handle.cancellation_token();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Transfer for session {} dropped after cancellation", handle.id());
                return Ok(handle.snapshot());
            }
            outcome = self.drive(handle, &endpoint.url) => outcome,
        };

        if let Err(e) = outcome {
            if let Some(failed) = handle.mark_failed(&e) {
                self.record(&failed);
            }
        }

        Ok(handle.snapshot())
    }

    pub fn cancel(&self, handle: &SessionHandle) -> AppResult<DownloadSession> {
        let cancelled = handle.request_cancel()?;
        self.record(&cancelled);
        Ok(cancelled)
    }

    /// New Pending session repeating a failed or cancelled one. Not started.
    pub fn retry(&self, handle: &SessionHandle) -> AppResult<SessionHandle> {
        let next = handle.snapshot().retry()?;
        info!("Session {} retries {}", next.id, handle.id());
        let next = SessionHandle::new(next);
        self.record(&next.snapshot());
        Ok(next)
    }

    async fn drive(&self, handle: &SessionHandle, endpoint: &Url) -> AppResult<()> {
        let session = handle.snapshot();
        let ticket = self
            .transport
            .initiate(endpoint, session.source_url.as_str(), &session.format_id)
            .await?;
        debug!("Session {} is backend download {}", handle.id(), ticket.download_id);

        let mut events = self.transport.events(endpoint, &ticket).await?;

        while let Some(event) = events.next().await {
            match event? {
                TransferEvent::Connected => {
                    debug!("Progress stream connected for {}", ticket.download_id);
                }
                TransferEvent::Progress(report) => {
                    if let Some(updated) = handle.record_progress(&report) {
                        self.record(&updated);
                    }
                }
                TransferEvent::Done {
                    title,
                    file_name,
                    download_url,
                } => {
                    let location = download_url
                        .as_deref()
                        .and_then(|url| resolve_location(endpoint, url))
                        .ok_or_else(|| errors::malformed("done event carried no download_url"))?;

                    let record = CompletionRecord::new(
                        &handle.snapshot(),
                        &location,
                        file_name.as_deref(),
                        title.as_deref(),
                    );
                    self.store.record(&record).await?;

                    if let Some(completed) = handle.mark_completed(location, file_name, title) {
                        self.record(&completed);
                    }
                    return Ok(());
                }
                TransferEvent::Error { message } => {
                    return Err(errors::backend(None, message));
                }
            }
        }

        warn!("Progress stream for {} ended without a result", ticket.download_id);
        Err(errors::malformed(
            "progress stream ended before the download finished",
        ))
    }

    fn record(&self, session: &DownloadSession) {
        if let Some(registry) = &self.registry {
            registry.record(session);
        }
    }
}
