//! reqwest-backed transport

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use super::{StreamResponse, Transport};
use crate::config::ClientConfig;
use crate::{AgentError, Result};

/// Transport over a shared [`reqwest::Client`].
///
/// No overall request timeout is set on the client: streaming responses are
/// unbounded, and the client applies its own idle timeout per read.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("mtconnect-stream/", env!("CARGO_PKG_VERSION"))),
        );
        let accept = HeaderValue::from_str(&config.accept)
            .map_err(|e| AgentError::config_error(format!("invalid accept header: {e}")))?;
        headers.insert(ACCEPT, accept);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.streaming_timeout())
            .build()
            .map_err(|e| {
                AgentError::request_failed(&config.url, "cannot build HTTP client", Box::new(e))
            })?;
        Ok(Self { client })
    }

    /// Use an existing client, e.g. one with TLS or proxy settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::request_failed(url, "request failed", Box::new(e)))?;

        let status = response.status();
        // MTConnectError documents come with 4xx codes and carry the reason.
        if status.is_server_error() || (status.is_client_error() && !is_document(&response)) {
            return Err(AgentError::Status { url: url.to_string(), status: status.as_u16() });
        }
        Ok(response)
    }
}

fn is_document(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json") || ct.contains("xml"))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::request_failed(url, "reading body failed", Box::new(e)))?;
        Ok(body.to_vec())
    }

    async fn open(&self, url: &str) -> Result<StreamResponse> {
        let response = self.send(url).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map(|bytes| bytes.to_vec()).map_err(|e| {
                    AgentError::request_failed(url.as_str(), "stream read failed", Box::new(e))
                })
            })
            .boxed();

        Ok(StreamResponse { content_type, body })
    }
}
