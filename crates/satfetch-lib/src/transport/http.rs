use super::{Method, Transport, TransportError, TransportRequest, TransportResponse};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct TransportSettings {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Applies to connecting and to every individual read, not to the whole transfer.
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            timeout: None,
            user_agent: concat!("satfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest` client with HTTP basic authentication.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    user: Option<String>,
    password: Option<String>,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(settings.user_agent);
        if let Some(timeout) = settings.timeout {
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidRequest {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            user: settings.user,
            password: settings.password,
        })
    }
}

fn classify_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        TransportError::InvalidRequest {
            url: url.to_string(),
            reason: err.to_string(),
        }
    } else {
        TransportError::Connection {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
        };
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_deref());
        }
        if let Some(range) = request.range {
            builder = builder.header(RANGE, range.header_value());
        }

        tracing::trace!(method = ?request.method, url = %request.url, range = ?request.range, "Sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(&request.url, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = request.url;
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout { url: url.clone() }
                    } else {
                        TransportError::Body {
                            url: url.clone(),
                            reason: e.to_string(),
                        }
                    }
                })
            })
            .boxed();

        Ok(TransportResponse::new(status, headers, body))
    }
}
