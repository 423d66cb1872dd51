//! Typed client for `/api/books`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use shelf_app::books::models::{Book, BookRequest, BookStatus, StatusFilter, StatusRequest};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// The operations a dashboard needs. Implemented over HTTP by [`BooksClient`].
#[async_trait]
pub trait BooksApi: Send + Sync {
    async fn list(&self, filter: StatusFilter) -> Result<Vec<Book>, ClientError>;
    async fn create(&self, request: &BookRequest) -> Result<Book, ClientError>;
    async fn update(&self, id: Uuid, request: &BookRequest) -> Result<Book, ClientError>;
    async fn set_status(&self, id: Uuid, status: BookStatus) -> Result<Book, ClientError>;
    async fn delete(&self, id: Uuid) -> Result<(), ClientError>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or(body)
        });
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[derive(Clone)]
pub struct BooksClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BooksClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/books{}", self.base_url, path)
    }

    /// Open the server-sent change feed.
    pub async fn changes(&self) -> Result<ChangeFeed, ClientError> {
        let response = self
            .http
            .get(self.url("/changes"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(ChangeFeed::new(check(response).await?))
    }
}

#[async_trait]
impl BooksApi for BooksClient {
    async fn list(&self, filter: StatusFilter) -> Result<Vec<Book>, ClientError> {
        let mut request = self.http.get(self.url("")).bearer_auth(&self.token);
        if let Some(status) = filter.as_query() {
            request = request.query(&[("status", status)]);
        }
        Ok(check(request.send().await?).await?.json().await?)
    }

    async fn create(&self, request: &BookRequest) -> Result<Book, ClientError> {
        let response = self
            .http
            .post(self.url(""))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn update(&self, id: Uuid, request: &BookRequest) -> Result<Book, ClientError> {
        let response = self
            .http
            .patch(self.url(&format!("/{id}")))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn set_status(&self, id: Uuid, status: BookStatus) -> Result<Book, ClientError> {
        let body = StatusRequest {
            status: Some(status.to_string()),
        };
        let response = self
            .http
            .put(self.url(&format!("/{id}")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn delete(&self, id: Uuid) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for a `text/event-stream` body.
///
/// Buffers raw bytes and decodes a frame only once its blank-line terminator
/// has arrived, so characters split across chunks survive.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    /// Feed raw bytes; returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FeedEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, terminator)) = frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + terminator).collect();
            let text = String::from_utf8_lossy(&frame[..end]).replace("\r\n", "\n");
            if let Some(event) = parse_frame(&text) {
                events.push(event);
            }
        }
        events
    }
}

/// Offset and length of the first frame terminator in `buffer`.
fn frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let find = |needle: &[u8]| {
        buffer
            .windows(needle.len())
            .position(|window| window == needle)
    };
    match (find(b"\n\n"), find(b"\r\n\r\n")) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn parse_frame(frame: &str) -> Option<FeedEvent> {
    let mut event = "message".to_string();
    let mut data: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    // Comment-only frames are keep-alives.
    if data.is_empty() {
        return None;
    }

    Some(FeedEvent {
        event,
        data: data.join("\n"),
    })
}

pub struct ChangeFeed {
    response: reqwest::Response,
    parser: FrameParser,
    pending: std::collections::VecDeque<FeedEvent>,
}

impl ChangeFeed {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            parser: FrameParser::default(),
            pending: Default::default(),
        }
    }

    /// Next event, or `None` once the server closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<FeedEvent>, ClientError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.response.chunk().await? {
                Some(bytes) => self.pending.extend(self.parser.push(&bytes)),
                None => return Ok(None),
            }
        }
    }
}

pub fn is_unauthorized(err: &ClientError) -> bool {
    matches!(err, ClientError::Api { status, .. } if *status == StatusCode::UNAUTHORIZED.as_u16())
}
