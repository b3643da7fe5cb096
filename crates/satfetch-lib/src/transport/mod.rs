mod http;

pub use http::{ReqwestTransport, TransportSettings};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use thiserror::Error;

/// Header the catalog uses to explain non-success responses.
pub const CAUSE_MESSAGE_HEADER: &str = "cause-message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// An HTTP byte range, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub range: Option<ByteRange>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            range: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            url: url.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), stream::empty().boxed())
    }

    pub fn cause_message(&self) -> Option<&str> {
        self.headers
            .get(CAUSE_MESSAGE_HEADER)
            .and_then(|value| value.to_str().ok())
    }

    /// Collects the whole body. Only meant for small metadata responses.
    pub async fn bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }

    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("Invalid request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest { .. })
    }
}

/// The server answers 403 with this cause when the user already has the maximum number of
/// concurrent transfers open. The product itself is online in that case.
pub fn is_concurrent_flow_limit(cause: Option<&str>) -> bool {
    cause.is_some_and(|cause| cause.contains("concurrent flows"))
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_values() {
        assert_eq!(ByteRange::from_offset(1024).header_value(), "bytes=1024-");
        assert_eq!(ByteRange::bounded(0, 1).header_value(), "bytes=0-1");
        assert_eq!(ByteRange::bounded(0, 0).header_value(), "bytes=0-0");
    }

    #[test]
    fn test_concurrent_flow_limit_detection() {
        assert!(is_concurrent_flow_limit(Some(
            "An exception occured while creating a stream: Maximum number of 4 concurrent flows achieved by the user \"alice\""
        )));
        assert!(!is_concurrent_flow_limit(Some(
            "User 'alice' offline products retrieval quota exceeded (20 fetches max)"
        )));
        assert!(!is_concurrent_flow_limit(None));
    }

    #[tokio::test]
    async fn test_response_text_collects_chunks() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"tr")),
            Ok(Bytes::from_static(b"ue")),
        ])
        .boxed();
        let response = TransportResponse::new(StatusCode::OK, HeaderMap::new(), body);
        assert_eq!(response.text().await.unwrap(), "true");
    }
}
