//! HTTP client for the media extraction backend
//!
//! Every request takes the endpoint explicitly: callers capture it once at
//! the start of an operation and keep using that value even if the user
//! changes the configured endpoint meanwhile.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::core::config::BackendConfig;
use crate::core::connectivity::Reachability;
use crate::core::error_handling::{errors, AppResult, OrchestratorError};
use crate::core::models::{DeleteReport, HealthReport, MediaUrl, ServerFile};
use crate::core::transport::{
    parse_transfer_event, DownloadTicket, DownloadTransport, SseDecoder, TransferStream,
};
use crate::utils::network::{endpoint_url, resolve_location, CONNECT_TIMEOUT};

/// Format discovery body as sent by the backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormatsResponse {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub video_formats: Option<Vec<RawFormat>>,
    #[serde(default)]
    pub audio_formats: Option<Vec<RawFormat>>,
    #[serde(default)]
    pub is_playlist: Option<bool>,
}

/// One format entry as sent by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    url: &'a str,
    format_id: &'a str,
}

/// Sizes are estimates and sometimes arrive as floats
fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| {
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
    }))
}

/// Thin typed wrapper over the backend's REST + SSE surface
#[derive(Clone)]
pub struct BackendApi {
    client: Client,
    discovery_timeout: Duration,
}

impl BackendApi {
    pub fn new(config: &BackendConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            discovery_timeout: config.discovery_timeout(),
        })
    }

    /// Lightweight existence check against the endpoint root
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn probe(&self, endpoint: &Url, timeout: Duration) -> Reachability {
        match self.client.get(endpoint.clone()).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Backend answered probe with {}", response.status());
                Reachability::Reachable
            }
            Ok(response) => {
                let code = response.status().as_u16();
                warn!("Backend answered probe with error code {}", code);
                Reachability::Unreachable(format!("server responded with error code {code}"))
            }
            Err(e) => {
                warn!("Backend probe failed: {}", e);
                Reachability::Unreachable("no connection".to_string())
            }
        }
    }

    #[instrument(skip(self), fields(endpoint = %endpoint, url = %url))]
    pub async fn fetch_formats(&self, endpoint: &Url, url: &MediaUrl) -> AppResult<RawFormatsResponse> {
        let response = self
            .client
            .post(endpoint_url(endpoint, "/api/formats"))
            .timeout(self.discovery_timeout)
            .json(&FormatRequest { url: url.as_str() })
            .send()
            .await?;

        read_json(response).await
    }

    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn initiate_download(
        &self,
        endpoint: &Url,
        source_url: &str,
        format_id: &str,
    ) -> AppResult<DownloadTicket> {
        let response = self
            .client
            .post(endpoint_url(endpoint, "/api/download"))
            .timeout(self.discovery_timeout)
            .json(&DownloadRequest {
                url: source_url,
                format_id,
            })
            .send()
            .await?;

        let ticket: DownloadTicket = read_json(response).await?;
        if ticket.download_id.trim().is_empty() {
            return Err(errors::malformed("backend returned an empty download_id"));
        }

        match &ticket.message {
            Some(message) => info!("Backend accepted download {}: {}", ticket.download_id, message),
            None => info!("Backend accepted download {}", ticket.download_id),
        }
        Ok(ticket)
    }

    /// Open the server-sent progress stream for a download. No overall timeout.
    pub async fn progress_stream(&self, endpoint: &Url, download_id: &str) -> AppResult<TransferStream> {
        self.open_progress_stream(endpoint_url(endpoint, &format!("/api/progress/{download_id}")))
            .await
    }

    /// Stream for a ticket, following the backend's `sse_url` when it sent one
    pub async fn ticket_stream(&self, endpoint: &Url, ticket: &DownloadTicket) -> AppResult<TransferStream> {
        match ticket
            .sse_url
            .as_deref()
            .and_then(|sse_url| resolve_location(endpoint, sse_url))
        {
            Some(url) => self.open_progress_stream(url).await,
            None => self.progress_stream(endpoint, &ticket.download_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn open_progress_stream(&self, url: String) -> AppResult<TransferStream> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let bytes = Box::pin(response.bytes_stream());
        let state = (bytes, SseDecoder::default(), VecDeque::new(), false);

        let events = stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        for payload in decoder.push(&chunk) {
                            if let Some(event) = parse_transfer_event(&payload).transpose() {
                                pending.push_back(event);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        pending.push_back(Err(OrchestratorError::from(e)));
                        done = true;
                    }
                    None => {
                        if let Some(payload) = decoder.finish() {
                            if let Some(event) = parse_transfer_event(&payload).transpose() {
                                pending.push_back(event);
                            }
                        }
                        done = true;
                    }
                }
            }
        });

        Ok(events.boxed())
    }

    pub async fn list_files(&self, endpoint: &Url) -> AppResult<Vec<ServerFile>> {
        let response = self
            .client
            .get(endpoint_url(endpoint, "/api/files"))
            .timeout(self.discovery_timeout)
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn delete_file(&self, endpoint: &Url, name: &str) -> AppResult<DeleteReport> {
        if name.trim().is_empty() {
            return Err(errors::invalid_input("file name is empty"));
        }

        let mut url = Url::parse(&endpoint_url(endpoint, "/api/files/"))
            .map_err(|e| errors::invalid_input(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| errors::invalid_input("endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(name);

        let response = self
            .client
            .delete(url)
            .timeout(self.discovery_timeout)
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn delete_all_files(&self, endpoint: &Url) -> AppResult<DeleteReport> {
        let response = self
            .client
            .delete(endpoint_url(endpoint, "/api/files"))
            .timeout(self.discovery_timeout)
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn health(&self, endpoint: &Url) -> AppResult<HealthReport> {
        let response = self
            .client
            .get(endpoint_url(endpoint, "/health"))
            .timeout(self.discovery_timeout)
            .send()
            .await?;

        read_json(response).await
    }
}

#[async_trait]
impl DownloadTransport for BackendApi {
    async fn initiate(
        &self,
        endpoint: &Url,
        source_url: &str,
        format_id: &str,
    ) -> AppResult<DownloadTicket> {
        self.initiate_download(endpoint, source_url, format_id).await
    }

    async fn events(&self, endpoint: &Url, ticket: &DownloadTicket) -> AppResult<TransferStream> {
        self.ticket_stream(endpoint, ticket).await
    }
}

/// Turn a non-2xx response into `Backend`, keeping the server's message
async fn ensure_success(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(errors::backend(Some(status.as_u16()), backend_message(&body, status)))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> AppResult<T> {
    let response = ensure_success(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| errors::malformed(format!("{e}")))
}

/// Pull the human readable message out of an error body
fn backend_message(body: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(message) = object.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::TransferEvent;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn api() -> BackendApi {
        BackendApi::new(&BackendConfig::default()).unwrap()
    }

    fn endpoint(server: &Server) -> Url {
        Url::parse(&server.url()).unwrap()
    }

    #[tokio::test]
    async fn test_probe_success_and_error_code() {
        let mut server = Server::new_async().await;
        let ok = server.mock("GET", "/").with_status(200).create_async().await;

        let reachability = api().probe(&endpoint(&server), Duration::from_secs(2)).await;
        assert_eq!(reachability, Reachability::Reachable);
        ok.assert_async().await;

        server.reset_async().await;
        let _m = server.mock("GET", "/").with_status(503).create_async().await;
        let reachability = api().probe(&endpoint(&server), Duration::from_secs(2)).await;
        assert_eq!(
            reachability,
            Reachability::Unreachable("server responded with error code 503".to_string())
        );
    }

    #[tokio::test]
    async fn test_probe_without_server() {
        let dead = Url::parse("http://127.0.0.1:1").unwrap();
        let reachability = api().probe(&dead, Duration::from_secs(2)).await;
        assert_eq!(reachability, Reachability::Unreachable("no connection".to_string()));
    }

    #[tokio::test]
    async fn test_initiate_passes_format_id_through() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/download")
            .match_body(Matcher::Json(json!({
                "url": "https://example.com/watch?v=abc",
                "format_id": "bestvideo[height<=1080]+140"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"download_id": "dl-7", "sse_url": "/api/progress/dl-7", "message": "started"}).to_string())
            .create_async()
            .await;

        let ticket = api()
            .initiate_download(
                &endpoint(&server),
                "https://example.com/watch?v=abc",
                "bestvideo[height<=1080]+140",
            )
            .await
            .unwrap();

        assert_eq!(ticket.download_id, "dl-7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_backend_error_message_is_kept() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/download")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(json!({"detail": "Unsupported URL: https://example.com/nothing"}).to_string())
            .create_async()
            .await;

        let error = api()
            .initiate_download(&endpoint(&server), "https://example.com/nothing", "18")
            .await
            .unwrap_err();

        assert_eq!(
            error,
            OrchestratorError::Backend {
                code: Some(400),
                message: "Unsupported URL: https://example.com/nothing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_progress_stream_decodes_events() {
        let mut server = Server::new_async().await;
        let body = concat!(
            "data: {\"event\":\"connected\"}\n\n",
            ": keepalive\n\n",
            "data: {\"event\":\"progress\",\"percent\":\"40%\"}\n\n",
            "data: {\"event\":\"heartbeat\"}\n\n",
            "data: {\"event\":\"done\",\"filename\":\"clip.mp4\",\"download_url\":\"/files/clip.mp4\"}\n\n",
        );
        let _m = server
            .mock("GET", "/api/progress/dl-1")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let events: Vec<_> = api()
            .progress_stream(&endpoint(&server), "dl-1")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Ok(TransferEvent::Connected));
        assert!(matches!(events[1], Ok(TransferEvent::Progress(_))));
        assert!(matches!(events[2], Ok(TransferEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_ticket_stream_prefers_sse_url() {
        let mut server = Server::new_async().await;
        let advertised = server
            .mock("GET", "/api/events/dl-9")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"event\":\"connected\"}\n\n")
            .create_async()
            .await;
        let fallback = server
            .mock("GET", "/api/progress/dl-9")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"event\":\"connected\"}\n\n")
            .expect(1)
            .create_async()
            .await;

        let ticket = DownloadTicket {
            download_id: "dl-9".to_string(),
            sse_url: Some("/api/events/dl-9".to_string()),
            message: None,
        };
        let api = api();
        let events: Vec<_> = api.events(&endpoint(&server), &ticket).await.unwrap().collect().await;
        assert_eq!(events, vec![Ok(TransferEvent::Connected)]);
        advertised.assert_async().await;

        let ticket = DownloadTicket {
            sse_url: None,
            ..ticket
        };
        let events: Vec<_> = api.events(&endpoint(&server), &ticket).await.unwrap().collect().await;
        assert_eq!(events, vec![Ok(TransferEvent::Connected)]);
        fallback.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_files_and_malformed_body() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/files")
            .with_status(200)
            .with_body(json!([
                {"name": "a.mp4", "size": 10, "type": "video", "mimetype": "video/mp4",
                 "download_url": "/files/a.mp4", "extension": "mp4"},
                {"name": "b.m4a"}
            ]).to_string())
            .create_async()
            .await;

        let files = api().list_files(&endpoint(&server)).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "b.m4a");

        server.reset_async().await;
        let _m = server
            .mock("GET", "/api/files")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;
        let error = api().list_files(&endpoint(&server)).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_delete_single_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/files/clip-01.mp4")
            .with_status(200)
            .with_body(json!({"success": true, "message": "deleted", "filename": "clip-01.mp4", "freed_bytes": 42}).to_string())
            .create_async()
            .await;

        let report = api().delete_file(&endpoint(&server), "clip-01.mp4").await.unwrap();
        assert!(report.success);
        assert_eq!(report.freed_bytes, Some(42));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_report() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(json!({"status": "ok", "cookies": "missing", "free_space_gb": 12.5, "active_downloads": 1}).to_string())
            .create_async()
            .await;

        let health = api().health(&endpoint(&server)).await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_downloads, Some(1));
    }

    #[test]
    fn test_backend_message_fallbacks() {
        assert_eq!(
            backend_message(r#"{"error":"Video unavailable"}"#, StatusCode::BAD_REQUEST),
            "Video unavailable"
        );
        assert_eq!(backend_message("  plain text  ", StatusCode::BAD_GATEWAY), "plain text");
        assert_eq!(backend_message("", StatusCode::NOT_FOUND), "Not Found");
    }
}
