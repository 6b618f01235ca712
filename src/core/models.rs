//! Core data models for the download orchestrator

use serde::{Deserialize, Serialize};

use crate::core::error_handling::AppResult;
use crate::core::transport::ProgressReport;
use crate::utils::validation::validate_media_url;

/// A validated absolute media page URL.
///
/// The caller's text is kept verbatim (minus surrounding whitespace) so the
/// backend sees exactly what the user typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaUrl(String);

impl MediaUrl {
    pub fn parse(input: &str) -> AppResult<Self> {
        let trimmed = input.trim();
        validate_media_url(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields shared by every selectable encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Opaque backend identifier, sent back unmodified when downloading
    pub format_id: String,
    /// Container / file extension tag, empty when the backend omits it
    pub container: String,
    pub size_bytes: Option<u64>,
    pub note: Option<String>,
}

/// One selectable encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatEntry {
    Video {
        #[serde(flatten)]
        info: FormatInfo,
        resolution: Option<String>,
    },
    Audio {
        #[serde(flatten)]
        info: FormatInfo,
        /// Audio bitrate in kbps
        bitrate: Option<f64>,
    },
}

impl FormatEntry {
    pub fn info(&self) -> &FormatInfo {
        match self {
            Self::Video { info, .. } | Self::Audio { info, .. } => info,
        }
    }

    pub fn format_id(&self) -> &str {
        &self.info().format_id
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }

    /// Short human readable description, e.g. `137 mp4 1080p` or `140 m4a 128kbps`
    pub fn label(&self) -> String {
        let info = self.info();
        let detail = match self {
            Self::Video { resolution, .. } => resolution.clone(),
            Self::Audio { bitrate, .. } => bitrate.map(|abr| format!("{abr:.0}kbps")),
        };

        let mut parts = vec![info.format_id.clone()];
        if !info.container.is_empty() {
            parts.push(info.container.clone());
        }
        if let Some(detail) = detail {
            parts.push(detail);
        }
        if let Some(size) = info.size_bytes {
            parts.push(format_bytes(size));
        }
        parts.join(" ")
    }
}

/// Formats discovered for one source URL. Always holds at least one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatCatalog {
    pub title: String,
    pub source_url: MediaUrl,
    pub video_formats: Vec<FormatEntry>,
    pub audio_formats: Vec<FormatEntry>,
    pub is_playlist: Option<bool>,
}

impl FormatCatalog {
    /// Video entries first, then audio, each in backend order
    pub fn all(&self) -> impl Iterator<Item = &FormatEntry> {
        self.video_formats.iter().chain(self.audio_formats.iter())
    }

    pub fn find(&self, format_id: &str) -> Option<&FormatEntry> {
        self.all().find(|entry| entry.format_id() == format_id)
    }

    pub fn len(&self) -> usize {
        self.video_formats.len() + self.audio_formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a successful discovery request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Discovery {
    Available(FormatCatalog),
    /// The backend understood the URL but offered nothing to download
    NoFormats { title: String, source_url: MediaUrl },
}

impl Discovery {
    pub fn catalog(&self) -> Option<&FormatCatalog> {
        match self {
            Self::Available(catalog) => Some(catalog),
            Self::NoFormats { .. } => None,
        }
    }

    pub fn into_catalog(self) -> Option<FormatCatalog> {
        match self {
            Self::Available(catalog) => Some(catalog),
            Self::NoFormats { .. } => None,
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Not yet terminal: pending or transferring
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One user-initiated transfer.
///
/// Only the session manager mutates these; everyone else sees snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSession {
    pub id: String,
    pub source_url: MediaUrl,
    pub format_id: String,
    /// Backend endpoint captured when the session started
    pub endpoint: Option<String>,
    pub state: SessionState,
    /// `None` until the session starts
    pub progress_fraction: Option<f64>,
    /// Set only on `Completed`
    pub result_location: Option<String>,
    pub file_name: Option<String>,
    pub title: Option<String>,
    /// Set only on `Failed`
    pub error_detail: Option<String>,
    /// The failed or cancelled session this one retries
    pub retry_of: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Notifications emitted on a session's channel, in transition order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    Started {
        session_id: String,
    },
    Progress {
        session_id: String,
        fraction: f64,
        /// The backend report the fraction was taken from
        report: ProgressReport,
    },
    Completed {
        session_id: String,
        result_location: String,
    },
    Failed {
        session_id: String,
        error: String,
    },
    Cancelled {
        session_id: String,
    },
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// A file the backend reports having produced earlier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFile {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// "video", "audio" or anything else the backend decides
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

/// Body of the backend's `/health` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub free_space_gb: Option<f64>,
    #[serde(default)]
    pub files_count: Option<u64>,
    #[serde(default)]
    pub active_downloads: Option<u64>,
}

/// Result of deleting one or all server files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub deleted_count: Option<u64>,
    #[serde(default)]
    pub freed_bytes: Option<u64>,
}

/// Format a byte count for display
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
