//! Download transport seam
//!
//! The session manager only needs two things from the backend: a way to
//! start a transfer and an ordered stream of what happens to it afterwards.
//! [`DownloadTransport`] captures exactly that so the state machine can be
//! driven by the real HTTP client or by a scripted stand-in.
//!
//! The backend pushes progress as server-sent events. [`SseDecoder`] turns
//! raw body chunks into `data:` payloads and [`parse_transfer_event`] turns a
//! payload into a [`TransferEvent`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::error_handling::{errors, AppResult};

/// Ordered events for one transfer
pub type TransferStream = BoxStream<'static, AppResult<TransferEvent>>;

/// Backend acknowledgement of a download request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTicket {
    pub download_id: String,
    #[serde(default)]
    pub sse_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait DownloadTransport: Send + Sync {
    /// Ask the backend to start producing `format_id` of `source_url`
    async fn initiate(
        &self,
        endpoint: &Url,
        source_url: &str,
        format_id: &str,
    ) -> AppResult<DownloadTicket>;

    /// Subscribe to the progress of a started transfer
    async fn events(&self, endpoint: &Url, ticket: &DownloadTicket) -> AppResult<TransferStream>;
}

/// One progress report as sent by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Percentage in `0..=100`, when given
    pub percent: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    /// Bytes per second
    pub speed: Option<f64>,
    /// Seconds remaining
    pub eta: Option<u64>,
    pub status: Option<String>,
    pub message: Option<String>,
}

impl ProgressReport {
    /// Completion fraction clamped to `[0, 1]`; byte counts win over the percent string
    pub fn fraction(&self) -> Option<f64> {
        let raw = match (self.downloaded_bytes, self.total_bytes) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 / total as f64),
            _ => self.percent.map(|percent| percent / 100.0),
        }?;

        if raw.is_nan() {
            return None;
        }
        Some(raw.clamp(0.0, 1.0))
    }
}

/// What the backend reports about a running transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferEvent {
    Connected,
    Progress(ProgressReport),
    Done {
        title: Option<String>,
        file_name: Option<String>,
        download_url: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Incremental `text/event-stream` decoder yielding `data:` payloads
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a body chunk; returns every event payload completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // `event:`, `id:`, `retry:` and `:` comments carry nothing we use
        }

        payloads
    }

    /// Flush an event left unterminated when the body ended
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let mut tail = std::mem::take(&mut self.buffer);
            tail.push(b'\n');
            let mut payloads = self.push(&tail);
            if let Some(last) = payloads.pop() {
                return Some(last);
            }
        }
        if self.data.is_empty() {
            None
        } else {
            let payload = self.data.join("\n");
            self.data.clear();
            Some(payload)
        }
    }
}

/// Parse one event payload. Unknown `event` kinds yield `Ok(None)`.
pub fn parse_transfer_event(payload: &str) -> AppResult<Option<TransferEvent>> {
    let value: Value = serde_json::from_str(payload)?;
    let object = value
        .as_object()
        .ok_or_else(|| errors::malformed(format!("progress event is not an object: {payload}")))?;

    let kind = object.get("event").and_then(Value::as_str).unwrap_or_default();
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

    let event = match kind {
        "connected" => TransferEvent::Connected,
        "progress" => TransferEvent::Progress(ProgressReport {
            percent: object.get("percent").and_then(parse_percent),
            downloaded_bytes: object.get("downloaded_bytes").and_then(parse_count),
            total_bytes: object.get("total_bytes").and_then(parse_count),
            speed: object.get("speed").and_then(parse_speed),
            eta: object.get("eta").and_then(parse_count),
            status: text("status"),
            message: text("message"),
        }),
        "done" => TransferEvent::Done {
            title: text("title"),
            file_name: text("filename"),
            download_url: text("download_url"),
        },
        "error" => TransferEvent::Error {
            message: text("error")
                .or_else(|| text("message"))
                .unwrap_or_else(|| "Unknown error".to_string()),
        },
        other => {
            tracing::debug!("Ignoring progress event of kind '{}'", other);
            return Ok(None);
        }
    };

    Ok(Some(event))
}

/// Accepts `40`, `40.5`, `"40%"`, `" 40.5 % "`
fn parse_percent(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Byte counts and ETAs sometimes arrive as floats or strings
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `1048576`, `1048576.5` or a string such as `"1048576.0 B/s"`
fn parse_speed(value: &Value) -> Option<f64> {
    let speed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let digits: String = text
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse().ok()
        }
        _ => None,
    };
    speed.filter(|speed| speed.is_finite() && *speed >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();

        assert!(decoder.push(b"data: {\"event\":\"conn").is_empty());
        let payloads = decoder.push(b"ected\"}\r\n\r\ndata: {\"event\":\"progress\"}\n\n");
        assert_eq!(
            payloads,
            vec![
                "{\"event\":\"connected\"}".to_string(),
                "{\"event\":\"progress\"}".to_string()
            ]
        );
    }

    #[test]
    fn test_decoder_ignores_comments_and_fields() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b": keepalive\nevent: message\nid: 4\ndata: a\ndata: b\n\n");
        assert_eq!(payloads, vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"event\":\"done\"}").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"event\":\"done\"}"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_parse_progress_variants() {
        let event = parse_transfer_event(r#"{"event":"progress","percent":"40.5%","status":"downloading"}"#)
            .unwrap()
            .unwrap();
        match event {
            TransferEvent::Progress(report) => {
                assert_eq!(report.percent, Some(40.5));
                assert!((report.fraction().unwrap() - 0.405).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let event = parse_transfer_event(
            r#"{"event":"progress","percent":"10%","downloaded_bytes":300.0,"total_bytes":1200}"#,
        )
        .unwrap()
        .unwrap();
        match event {
            TransferEvent::Progress(report) => assert_eq!(report.fraction(), Some(0.25)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parse_speed_eta_and_message() {
        let event = parse_transfer_event(
            r#"{"event":"progress","status":"downloading","percent":"50%","downloaded_bytes":1024,"total_bytes":2048,"speed":524288.5,"eta":12,"message":"fragment 3/6"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            TransferEvent::Progress(ProgressReport {
                percent: Some(50.0),
                downloaded_bytes: Some(1024),
                total_bytes: Some(2048),
                speed: Some(524288.5),
                eta: Some(12),
                status: Some("downloading".to_string()),
                message: Some("fragment 3/6".to_string()),
            })
        );

        let event = parse_transfer_event(r#"{"event":"progress","speed":"1048576.0 B/s","eta":"7"}"#)
            .unwrap()
            .unwrap();
        match event {
            TransferEvent::Progress(report) => {
                assert_eq!(report.speed, Some(1048576.0));
                assert_eq!(report.eta, Some(7));
                assert_eq!(report.fraction(), None);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let event = parse_transfer_event(r#"{"event":"progress","speed":null,"eta":"soon"}"#)
            .unwrap()
            .unwrap();
        match event {
            TransferEvent::Progress(report) => {
                assert_eq!(report.speed, None);
                assert_eq!(report.eta, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_fraction_is_clamped() {
        let over = ProgressReport {
            percent: Some(130.0),
            ..Default::default()
        };
        assert_eq!(over.fraction(), Some(1.0));

        let empty = ProgressReport::default();
        assert_eq!(empty.fraction(), None);
    }

    #[test]
    fn test_parse_terminal_events() {
        let done = parse_transfer_event(
            r#"{"event":"done","title":"Clip","filename":"clip.mp4","download_url":"/files/clip.mp4"}"#,
        )
        .unwrap();
        assert_eq!(
            done,
            Some(TransferEvent::Done {
                title: Some("Clip".to_string()),
                file_name: Some("clip.mp4".to_string()),
                download_url: Some("/files/clip.mp4".to_string()),
            })
        );

        let error = parse_transfer_event(r#"{"event":"error","error":"HTTP Error 403: Forbidden"}"#).unwrap();
        assert_eq!(
            error,
            Some(TransferEvent::Error {
                message: "HTTP Error 403: Forbidden".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_events_are_skipped() {
        assert_eq!(parse_transfer_event(r#"{"event":"heartbeat"}"#).unwrap(), None);
        assert!(parse_transfer_event("not json").is_err());
        assert!(parse_transfer_event("[1,2]").is_err());
    }
}
