//! How a client session reaches the server: directly in-process, or over
//! HTTP with Server-Sent Events for the signaling channel.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::ready;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use url::Url;

use crate::dto::public_dto::{
    ExamSessionSummary, HeartbeatResponse, PublishSignalRequest, SaveAnswerRequest,
    SaveAnswerResponse, StartExamResponse, SubmitExamRequest, SubmitExamResponse, UploadResponse,
    ViolationReport, ViolationResponse,
};
use crate::error::{Error, Result};
use crate::models::signal::{Origin, SignalEnvelope, SignalEvent};
use crate::services::storage_service::ObjectKind;
use crate::AppState;

#[async_trait]
pub trait ExamBackend: Send + Sync {
    async fn session(&self, token: &str) -> Result<ExamSessionSummary>;

    async fn start(&self, token: &str) -> Result<StartExamResponse>;

    async fn save_answer(&self, token: &str, req: SaveAnswerRequest) -> Result<SaveAnswerResponse>;

    async fn submit(&self, token: &str, req: SubmitExamRequest) -> Result<SubmitExamResponse>;

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse>;

    async fn report_violation(&self, token: &str, report: ViolationReport) -> Result<ViolationResponse>;

    async fn upload(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        data: Bytes,
    ) -> Result<UploadResponse>;
}

#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Returns how many subscribers the event reached.
    async fn publish(&self, token: &str, origin: Origin, event: SignalEvent) -> Result<usize>;

    async fn subscribe(&self, token: &str) -> Result<BoxStream<'static, SignalEnvelope>>;
}

/// Calls the services of an [`AppState`] living in the same process.
#[derive(Clone)]
pub struct LocalBackend {
    state: AppState,
}

impl LocalBackend {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ExamBackend for LocalBackend {
    async fn session(&self, token: &str) -> Result<ExamSessionSummary> {
        self.state.assignments.summary(token).await
    }

    async fn start(&self, token: &str) -> Result<StartExamResponse> {
        self.state.assignments.start(token, Utc::now()).await
    }

    async fn save_answer(&self, token: &str, req: SaveAnswerRequest) -> Result<SaveAnswerResponse> {
        self.state.assignments.save_answer(token, req, Utc::now()).await
    }

    async fn submit(&self, token: &str, req: SubmitExamRequest) -> Result<SubmitExamResponse> {
        self.state.assignments.submit(token, req, Utc::now()).await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse> {
        self.state.assignments.record_heartbeat(token, Utc::now()).await
    }

    async fn report_violation(&self, token: &str, report: ViolationReport) -> Result<ViolationResponse> {
        let event = self.state.proctor_log.record(token, report, Utc::now()).await?;
        Ok(ViolationResponse {
            recorded: true,
            event_id: event.id,
        })
    }

    async fn upload(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        data: Bytes,
    ) -> Result<UploadResponse> {
        self.state.uploads.accept(token, kind, captured_at, data).await
    }
}

#[async_trait]
impl SignalTransport for LocalBackend {
    async fn publish(&self, token: &str, origin: Origin, event: SignalEvent) -> Result<usize> {
        self.state
            .channel
            .publish(token, PublishSignalRequest { origin, event })
            .await
    }

    async fn subscribe(&self, token: &str) -> Result<BoxStream<'static, SignalEnvelope>> {
        self.state.channel.subscribe(token).await
    }
}

/// Talks to a remote server through its public candidate API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(client: Client, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid server URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    fn url(&self, token: &str, tail: &str) -> Result<Url> {
        let path = if tail.is_empty() {
            format!("api/public/sessions/{}", token)
        } else {
            format!("api/public/sessions/{}/{}", token, tail)
        };
        self.base
            .join(&path)
            .map_err(|e| Error::Internal(format!("Failed to build URL: {}", e)))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = request.send().await?;
        if resp.status().is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let status = resp.status();
        let body: JsonValue = resp.json().await.unwrap_or(JsonValue::Null);
        Err(decode_error(status, &body))
    }
}

/// Rebuilds the server's error from its `{"error", "message"}` body.
fn decode_error(status: StatusCode, body: &JsonValue) -> Error {
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
        .to_string();
    let at = |field: &str| {
        body.get(field)
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
    };
    match body.get("error").and_then(|e| e.as_str()) {
        Some("already_submitted") => Error::AlreadySubmitted,
        Some("too_early") => match at("opens_at") {
            Some(opens_at) => Error::TooEarly { opens_at },
            None => Error::Forbidden(message),
        },
        Some("session_ended") => match at("ended_at") {
            Some(ended_at) => Error::SessionEnded { ended_at },
            None => Error::Forbidden(message),
        },
        Some("invalid_state") => Error::InvalidState(message),
        Some("not_found") => Error::NotFound(message),
        Some("unauthorized") => Error::Unauthorized(message),
        Some("forbidden") => Error::Forbidden(message),
        Some("bad_request") | Some("validation") => Error::BadRequest(message),
        Some("upstream") => Error::Upstream(message),
        _ => Error::Internal(format!("{}: {}", status, message)),
    }
}

#[async_trait]
impl ExamBackend for HttpBackend {
    async fn session(&self, token: &str) -> Result<ExamSessionSummary> {
        self.send(self.client.get(self.url(token, "")?)).await
    }

    async fn start(&self, token: &str) -> Result<StartExamResponse> {
        self.send(self.client.post(self.url(token, "start")?)).await
    }

    async fn save_answer(&self, token: &str, req: SaveAnswerRequest) -> Result<SaveAnswerResponse> {
        self.send(self.client.patch(self.url(token, "answer")?).json(&req))
            .await
    }

    async fn submit(&self, token: &str, req: SubmitExamRequest) -> Result<SubmitExamResponse> {
        self.send(self.client.post(self.url(token, "submit")?).json(&req))
            .await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse> {
        self.send(self.client.post(self.url(token, "heartbeat")?)).await
    }

    async fn report_violation(&self, token: &str, report: ViolationReport) -> Result<ViolationResponse> {
        self.send(self.client.post(self.url(token, "events")?).json(&report))
            .await
    }

    async fn upload(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        data: Bytes,
    ) -> Result<UploadResponse> {
        let tail = match kind {
            ObjectKind::Snapshot => "snapshots",
            ObjectKind::Recording => "recordings",
        };
        let mut url = self.url(token, tail)?;
        url.query_pairs_mut()
            .append_pair("captured_at", &captured_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, kind.content_type())
            .body(data);
        self.send(request).await
    }
}

#[async_trait]
impl SignalTransport for HttpBackend {
    async fn publish(&self, token: &str, origin: Origin, event: SignalEvent) -> Result<usize> {
        #[derive(serde::Deserialize)]
        struct Delivered {
            delivered: usize,
        }
        let request = self
            .client
            .post(self.url(token, "signals")?)
            .json(&PublishSignalRequest { origin, event });
        let delivered: Delivered = self.send(request).await?;
        Ok(delivered.delivered)
    }

    async fn subscribe(&self, token: &str) -> Result<BoxStream<'static, SignalEnvelope>> {
        let resp = self
            .client
            .get(self.url(token, "signals")?)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body: JsonValue = resp.json().await.unwrap_or(JsonValue::Null);
            return Err(decode_error(status, &body));
        }

        let mut decoder = SseDecoder::default();
        let envelopes = resp
            .bytes_stream()
            .take_while(|chunk| {
                if let Err(e) = chunk {
                    tracing::warn!("Signal stream interrupted: {}", e);
                }
                ready(chunk.is_ok())
            })
            .flat_map(move |chunk| {
                let payloads = match chunk {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(_) => Vec::new(),
                };
                stream::iter(payloads)
            })
            .filter_map(|data| {
                ready(match serde_json::from_str::<SignalEnvelope>(&data) {
                    Ok(env) => Some(env),
                    Err(e) => {
                        tracing::warn!("Dropping undecodable signal: {}", e);
                        None
                    }
                })
            })
            .boxed();
        Ok(envelopes)
    }
}

/// Incremental `text/event-stream` parser yielding each event's data.
///
/// Chunks are buffered as raw bytes; a block is only decoded as UTF-8 once
/// its terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .collect();
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decoder_handles_split_chunks_and_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b":keep-alive\n\n").is_empty());
        assert!(decoder.push(b"event: heartbeat\ndata: {\"a\":").is_empty());
        let out = decoder.push(b"1}\n\nevent: x\r\ndata: 2\r\n\r\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "2".to_string()]);
    }

    #[test]
    fn decoder_keeps_characters_split_across_chunks() {
        let event = "data: {\"sdp\":\"é\"}\n\n".as_bytes();
        let cut = event.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&event[..cut]).is_empty());
        let out = decoder.push(&event[cut..]);
        assert_eq!(out, vec!["{\"sdp\":\"é\"}".to_string()]);
    }

    #[test]
    fn server_errors_map_back_to_typed_errors() {
        let err = decode_error(
            StatusCode::CONFLICT,
            &json!({"error": "already_submitted", "message": "Exam has already been submitted"}),
        );
        assert!(matches!(err, Error::AlreadySubmitted));

        let err = decode_error(
            StatusCode::FORBIDDEN,
            &json!({"error": "too_early", "message": "no", "opens_at": "2026-03-01T09:45:00Z"}),
        );
        assert!(matches!(err, Error::TooEarly { .. }));
    }

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let backend = HttpBackend::new(Client::new(), "http://localhost:8080/proctor").unwrap();
        assert_eq!(
            backend.url("abc", "start").unwrap().as_str(),
            "http://localhost:8080/proctor/api/public/sessions/abc/start"
        );
    }
}
