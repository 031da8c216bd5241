//! HTTP access to an MTConnect agent.
//!
//! [`Transport`] is the seam between the monitoring loop and the network:
//! [`HttpTransport`] talks to a real agent through reqwest, tests script their
//! own implementation. Both bounded requests (`probe`, `current`, polled
//! `sample`) and the long-lived streaming `sample` response go through it.

mod http;
mod urls;

pub use http::HttpTransport;
pub use urls::RequestUrls;

use futures::stream::BoxStream;
use std::fmt;

use crate::Result;

/// Body of a long-lived response as it arrives from the network.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// An open streaming response.
pub struct StreamResponse {
    /// Raw `Content-Type` header, carrier of the multipart boundary
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse").field("content_type", &self.content_type).finish()
    }
}

/// Issues requests against an agent.
///
/// Dropping a returned future or a [`StreamResponse`] body must abandon the
/// request and close its connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetch a bounded response body.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Open a streaming response; resolves once headers have arrived.
    async fn open(&self, url: &str) -> Result<StreamResponse>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        (**self).fetch(url).await
    }

    async fn open(&self, url: &str) -> Result<StreamResponse> {
        (**self).open(url).await
    }
}
