//! Per-session state machine
//!
//! A [`SessionHandle`] is the only way to move a [`DownloadSession`] between
//! states. Every transition takes the session lock, checks the current state
//! and emits its [`SessionEvent`] before releasing the lock, so the event
//! channel always reflects transition order and nothing follows a terminal
//! event.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::core::error_handling::{AppResult, OrchestratorError, SessionAction};
use crate::core::models::{DownloadSession, MediaUrl, SessionEvent, SessionState};
use crate::core::transport::ProgressReport;

/// Buffered events per session before slow subscribers start lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

impl DownloadSession {
    pub fn new(source_url: MediaUrl, format_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_url,
            format_id: format_id.into(),
            endpoint: None,
            state: SessionState::Pending,
            progress_fraction: None,
            result_location: None,
            file_name: None,
            title: None,
            error_detail: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn rejected(&self, action: SessionAction) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            session_id: self.id.clone(),
            from: self.state,
            action,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Pending -> InProgress
    pub fn begin(&mut self, endpoint: &Url) -> AppResult<()> {
        if self.state != SessionState::Pending {
            return Err(self.rejected(SessionAction::Start));
        }
        self.state = SessionState::InProgress;
        self.endpoint = Some(endpoint.to_string());
        self.progress_fraction = Some(0.0);
        self.touch();
        Ok(())
    }

    /// Returns the new fraction only when it moved forward
    pub fn apply_progress(&mut self, fraction: f64) -> Option<f64> {
        if self.state != SessionState::InProgress || fraction.is_nan() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        match self.progress_fraction {
            Some(current) if fraction <= current => None,
            _ => {
                self.progress_fraction = Some(fraction);
                self.touch();
                Some(fraction)
            }
        }
    }

    /// InProgress -> Completed. False when the session already left InProgress.
    pub fn complete(
        &mut self,
        result_location: String,
        file_name: Option<String>,
        title: Option<String>,
    ) -> bool {
        if self.state != SessionState::InProgress {
            return false;
        }
        self.state = SessionState::Completed;
        self.progress_fraction = Some(1.0);
        self.result_location = Some(result_location);
        self.file_name = file_name;
        self.title = title;
        self.touch();
        true
    }

    /// InProgress -> Failed. False when the session already left InProgress.
    pub fn fail(&mut self, detail: String) -> bool {
        if self.state != SessionState::InProgress {
            return false;
        }
        self.state = SessionState::Failed;
        self.error_detail = Some(detail);
        self.touch();
        true
    }

    /// Pending | InProgress -> Cancelled
    pub fn cancel(&mut self) -> AppResult<()> {
        if self.state.is_terminal() {
            return Err(self.rejected(SessionAction::Cancel));
        }
        self.state = SessionState::Cancelled;
        self.touch();
        Ok(())
    }

    /// Fresh Pending session with the same selection
    pub fn retry(&self) -> AppResult<DownloadSession> {
        if !matches!(self.state, SessionState::Failed | SessionState::Cancelled) {
            return Err(self.rejected(SessionAction::Retry));
        }
        let mut next = DownloadSession::new(self.source_url.clone(), self.format_id.clone());
        next.retry_of = Some(self.id.clone());
        Ok(next)
    }
}

struct SessionInner {
    id: String,
    session: Mutex<DownloadSession>,
    cancel: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
}

/// Shared handle to one session; cheap to clone
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn new(session: DownloadSession) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                id: session.id.clone(),
                session: Mutex::new(session),
                cancel: CancellationToken::new(),
                events,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn snapshot(&self) -> DownloadSession {
        self.inner.session.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub fn mark_started(&self, endpoint: &Url) -> AppResult<DownloadSession> {
        let mut session = self.inner.session.lock();
        session.begin(endpoint)?;
        self.emit(SessionEvent::Started {
            session_id: session.id.clone(),
        });
        info!("🔄 Session {} started against {}", session.id, endpoint);
        Ok(session.clone())
    }

    /// Snapshot after the update, or `None` when nothing changed
    pub fn record_progress(&self, report: &ProgressReport) -> Option<DownloadSession> {
        let fraction = report.fraction()?;
        let mut session = self.inner.session.lock();
        let fraction = session.apply_progress(fraction)?;
        self.emit(SessionEvent::Progress {
            session_id: session.id.clone(),
            fraction,
            report: report.clone(),
        });
        debug!("Session {} at {:.1}%", session.id, fraction * 100.0);
        Some(session.clone())
    }

    pub fn mark_completed(
        &self,
        result_location: String,
        file_name: Option<String>,
        title: Option<String>,
    ) -> Option<DownloadSession> {
        let mut session = self.inner.session.lock();
        if !session.complete(result_location.clone(), file_name, title) {
            debug!("Ignoring completion for session {} in state {}", session.id, session.state);
            return None;
        }
        self.emit(SessionEvent::Completed {
            session_id: session.id.clone(),
            result_location,
        });
        info!("✅ Session {} completed", session.id);
        Some(session.clone())
    }

    pub fn mark_failed(&self, error: &OrchestratorError) -> Option<DownloadSession> {
        let mut session = self.inner.session.lock();
        let detail = error.detail();
        if !session.fail(detail.clone()) {
            debug!("Ignoring failure for session {} in state {}: {}", session.id, session.state, detail);
            return None;
        }
        self.emit(SessionEvent::Failed {
            session_id: session.id.clone(),
            error: detail,
        });
        warn!("❌ Session {} failed: {}", session.id, error);
        Some(session.clone())
    }

    /// Move to Cancelled and fire the cancellation token
    pub fn request_cancel(&self) -> AppResult<DownloadSession> {
        let mut session = self.inner.session.lock();
        session.cancel()?;
        self.inner.cancel.cancel();
        self.emit(SessionEvent::Cancelled {
            session_id: session.id.clone(),
        });
        info!("Session {} cancelled", session.id);
        Ok(session.clone())
    }
}
