//! Format catalog client
//!
//! One discovery request per call, no retries, all-or-nothing parsing.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::backend::{BackendApi, RawFormat, RawFormatsResponse};
use crate::core::connectivity::{ConnectivityGuard, EndpointSnapshot};
use crate::core::error_handling::{errors, AppResult};
use crate::core::models::{Discovery, FormatCatalog, FormatEntry, FormatInfo, MediaUrl};

pub struct FormatCatalogClient {
    api: BackendApi,
    guard: Arc<ConnectivityGuard>,
}

impl FormatCatalogClient {
    pub fn new(api: BackendApi, guard: Arc<ConnectivityGuard>) -> Self {
        Self { api, guard }
    }

    /// Validate `url` and discover its formats against the current endpoint.
    /// Invalid input is rejected before anything is sent.
    pub async fn fetch_formats(&self, url: &str) -> AppResult<Discovery> {
        let url = MediaUrl::parse(url)?;
        let endpoint = self.guard.endpoint();
        self.fetch_formats_at(&endpoint, &url).await
    }

    #[instrument(skip(self), fields(endpoint = %endpoint.url, url = %url))]
    pub async fn fetch_formats_at(
        &self,
        endpoint: &EndpointSnapshot,
        url: &MediaUrl,
    ) -> AppResult<Discovery> {
        let raw = self.api.fetch_formats(&endpoint.url, url).await?;
        let discovery = parse_catalog(url, raw)?;

        match &discovery {
            Discovery::Available(catalog) => info!(
                "Discovered {} video and {} audio formats for '{}'",
                catalog.video_formats.len(),
                catalog.audio_formats.len(),
                catalog.title
            ),
            Discovery::NoFormats { .. } => info!("Backend offered no formats for {}", url),
        }
        Ok(discovery)
    }
}

/// Turn a backend body into a catalog. Any bad entry rejects the whole response.
pub fn parse_catalog(source_url: &MediaUrl, raw: RawFormatsResponse) -> AppResult<Discovery> {
    if let Some(echo) = raw.url.as_deref() {
        if echo != source_url.as_str() {
            debug!("Backend echoed a different URL: {}", echo);
        }
    }

    let mut seen = HashSet::new();
    let video_formats = raw
        .video_formats
        .unwrap_or_default()
        .into_iter()
        .map(|format| classify(format, false, &mut seen))
        .collect::<AppResult<Vec<_>>>()?;
    let audio_formats = raw
        .audio_formats
        .unwrap_or_default()
        .into_iter()
        .map(|format| classify(format, true, &mut seen))
        .collect::<AppResult<Vec<_>>>()?;

    let title = raw.title.unwrap_or_default();

    if video_formats.is_empty() && audio_formats.is_empty() {
        return Ok(Discovery::NoFormats {
            title,
            source_url: source_url.clone(),
        });
    }

    Ok(Discovery::Available(FormatCatalog {
        title,
        source_url: source_url.clone(),
        video_formats,
        audio_formats,
        is_playlist: raw.is_playlist,
    }))
}

fn classify(raw: RawFormat, audio: bool, seen: &mut HashSet<String>) -> AppResult<FormatEntry> {
    if raw.format_id.is_empty() {
        return Err(errors::malformed("format entry has an empty format_id"));
    }
    if !seen.insert(raw.format_id.clone()) {
        return Err(errors::malformed(format!(
            "format_id '{}' appears more than once",
            raw.format_id
        )));
    }

    let info = FormatInfo {
        format_id: raw.format_id,
        container: raw.ext.unwrap_or_default(),
        size_bytes: raw.filesize,
        note: raw.format_note,
    };

    Ok(if audio {
        FormatEntry::Audio {
            info,
            bitrate: raw.abr,
        }
    } else {
        FormatEntry::Video {
            info,
            resolution: raw.resolution,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BackendConfig;
    use crate::core::error_handling::OrchestratorError;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    const SOURCE: &str = "https://example.com/watch?v=abc";

    fn client(endpoint: &str) -> FormatCatalogClient {
        let api = BackendApi::new(&BackendConfig::default()).unwrap();
        let guard = ConnectivityGuard::new(endpoint, api.clone(), Duration::from_secs(2)).unwrap();
        FormatCatalogClient::new(api, Arc::new(guard))
    }

    async fn serve_formats(server: &mut Server, status: usize, body: String) -> mockito::Mock {
        server
            .mock("POST", "/api/formats")
            .match_body(Matcher::Json(json!({ "url": SOURCE })))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_classifies_entries_in_backend_order() {
        let mut server = Server::new_async().await;
        let mock = serve_formats(
            &mut server,
            200,
            json!({
                "title": "Sample",
                "url": SOURCE,
                "video_formats": [
                    {"format_id": "137", "ext": "mp4", "resolution": "1080p", "filesize": 1048576},
                    {"format_id": "18", "ext": "mp4", "resolution": "360p", "filesize": 2048.7}
                ],
                "audio_formats": [
                    {"format_id": "140", "ext": "m4a", "abr": 128, "format_note": "medium"}
                ],
                "is_playlist": false,
                "thumbnail": "ignored"
            })
            .to_string(),
        )
        .await;

        let discovery = client(&server.url()).fetch_formats(SOURCE).await.unwrap();
        let catalog = discovery.into_catalog().unwrap();

        assert_eq!(catalog.title, "Sample");
        let ids: Vec<_> = catalog.video_formats.iter().map(FormatEntry::format_id).collect();
        assert_eq!(ids, vec!["137", "18"]);
        assert_eq!(catalog.video_formats[1].info().size_bytes, Some(2048));
        assert_eq!(
            catalog.audio_formats[0],
            FormatEntry::Audio {
                info: FormatInfo {
                    format_id: "140".to_string(),
                    container: "m4a".to_string(),
                    size_bytes: None,
                    note: Some("medium".to_string()),
                },
                bitrate: Some(128.0),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_audio_list_is_valid() {
        let mut server = Server::new_async().await;
        let _m = serve_formats(
            &mut server,
            200,
            json!({"title": "Only video", "video_formats": [{"format_id": "22", "ext": "mp4"}]}).to_string(),
        )
        .await;

        let catalog = client(&server.url())
            .fetch_formats(SOURCE)
            .await
            .unwrap()
            .into_catalog()
            .unwrap();
        assert_eq!(catalog.video_formats.len(), 1);
        assert!(catalog.audio_formats.is_empty());
    }

    #[tokio::test]
    async fn test_empty_lists_are_no_formats() {
        let mut server = Server::new_async().await;
        let _m = serve_formats(
            &mut server,
            200,
            json!({"title": "Live", "video_formats": [], "audio_formats": []}).to_string(),
        )
        .await;

        let discovery = client(&server.url()).fetch_formats(SOURCE).await.unwrap();
        assert_eq!(
            discovery,
            Discovery::NoFormats {
                title: "Live".to_string(),
                source_url: MediaUrl::parse(SOURCE).unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_partial_entries_are_rejected_whole() {
        let mut server = Server::new_async().await;
        let _m = serve_formats(
            &mut server,
            200,
            json!({
                "title": "Broken",
                "video_formats": [{"format_id": "137"}, {"ext": "webm"}],
                "audio_formats": [{"format_id": "140"}]
            })
            .to_string(),
        )
        .await;

        let error = client(&server.url()).fetch_formats(SOURCE).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::MalformedResponse(_)));
    }

    #[test]
    fn test_duplicate_ids_are_malformed() {
        let raw: RawFormatsResponse = serde_json::from_value(json!({
            "video_formats": [{"format_id": "137"}],
            "audio_formats": [{"format_id": "137"}]
        }))
        .unwrap();
        let error = parse_catalog(&MediaUrl::parse(SOURCE).unwrap(), raw).unwrap_err();
        assert!(matches!(error, OrchestratorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_backend_rejection_carries_message() {
        let mut server = Server::new_async().await;
        let _m = serve_formats(
            &mut server,
            422,
            json!({"detail": "ERROR: [youtube] abc: Private video"}).to_string(),
        )
        .await;

        let error = client(&server.url()).fetch_formats(SOURCE).await.unwrap_err();
        assert_eq!(
            error,
            OrchestratorError::Backend {
                code: Some(422),
                message: "ERROR: [youtube] abc: Private video".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_never_sent() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", "/api/formats").expect(0).create_async().await;

        let error = client(&server.url()).fetch_formats("   ").await.unwrap_err();
        assert!(matches!(error, OrchestratorError::InvalidInput(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_network_failure() {
        let error = client("http://127.0.0.1:1").fetch_formats(SOURCE).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Network(_)));
        assert!(error.is_retryable());
    }
}
