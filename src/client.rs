//! Request operations against one agent: probe, current, poll and stream.
//!
//! [`RestClient`] performs single requests and decodes their responses. It
//! keeps no cursor; the monitoring loop in [`crate::driver`] owns the
//! [`Session`](crate::session::Session) and decides what to request next.

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::ClientConfig;
use crate::device::DeviceModel;
use crate::document::{self, DocumentAdapter, Header, StreamsDocument};
use crate::framing::{FrameDecoder, boundary_from_content_type};
use crate::stream::{Frames, FramesExt};
use crate::transport::{ByteStream, RequestUrls, Transport};
use crate::{AgentError, Result};

/// Everything learned from a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Adapter for the agent's JSON version, used for every later document
    pub adapter: Arc<dyn DocumentAdapter>,
    pub header: Header,
    pub model: DeviceModel,
}

/// Issues and decodes requests for one agent.
#[derive(Debug)]
pub struct RestClient<T> {
    transport: T,
    urls: RequestUrls,
    timeout: Duration,
    max_frame_len: usize,
}

impl<T: Transport> RestClient<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            transport,
            urls: RequestUrls::new(config)?,
            timeout: config.streaming_timeout(),
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn urls(&self) -> &RequestUrls {
        &self.urls
    }

    /// Fetch the device model and select the document adapter.
    ///
    /// Every failure is reported as [`AgentError::Probe`].
    pub async fn probe(&self) -> Result<ProbeResult> {
        let url = self.urls.probe()?;
        let result = async {
            let body = self.bounded(self.transport.fetch(&url)).await?;
            let doc = document::parse_json(&body)?;
            let adapter = document::adapter_for(&doc)?;
            let devices = adapter.parse_devices(&doc)?;
            let model = DeviceModel::build(&devices.devices)?;
            Ok::<_, AgentError>(ProbeResult { adapter, header: devices.header, model })
        }
        .await;

        match result {
            Ok(probe) => {
                info!(
                    version = probe.adapter.version(),
                    instance_id = probe.header.instance_id,
                    devices = probe.model.devices().len(),
                    data_items = probe.model.data_item_count(),
                    "Probe succeeded"
                );
                Ok(probe)
            }
            Err(e) => Err(AgentError::probe_failed(format!("{url}: {e}"), Some(e))),
        }
    }

    /// Fetch the present state of the selected data items.
    pub async fn current(
        &self,
        adapter: &dyn DocumentAdapter,
        path: Option<&str>,
    ) -> Result<StreamsDocument> {
        let url = self.urls.current(path)?;
        self.fetch_streams(adapter, &url).await
    }

    /// One bounded `sample` request starting at `from`.
    pub async fn poll(
        &self,
        adapter: &dyn DocumentAdapter,
        path: Option<&str>,
        from: Option<u64>,
    ) -> Result<StreamsDocument> {
        let url = self.urls.poll(path, from)?;
        self.fetch_streams(adapter, &url).await
    }

    /// Open a streaming `sample` request starting at `from`.
    ///
    /// Fails with a framing error when the response carries no multipart
    /// boundary.
    pub async fn stream(
        &self,
        adapter: Arc<dyn DocumentAdapter>,
        path: Option<&str>,
        from: Option<u64>,
    ) -> Result<SampleStream> {
        let url = self.urls.stream(path, from)?;
        let response = self.bounded(self.transport.open(&url)).await?;
        let boundary = boundary_from_content_type(response.content_type.as_deref())?;
        debug!(%boundary, "Streaming response opened");

        // The idle deadline restarts with every chunk, not every frame
        let idle = self.timeout;
        let body = tokio_stream::StreamExt::timeout(response.body, idle)
            .map(move |chunk| chunk.unwrap_or(Err(AgentError::Timeout { duration: idle })))
            .boxed();

        let decoder = FrameDecoder::with_max_frame_len(&boundary, self.max_frame_len);
        Ok(SampleStream { frames: body.frames(decoder), adapter, idle })
    }

    async fn fetch_streams(
        &self,
        adapter: &dyn DocumentAdapter,
        url: &str,
    ) -> Result<StreamsDocument> {
        let body = self.bounded(self.transport.fetch(url)).await?;
        trace!(url, len = body.len(), "Response received");
        adapter.parse_streams(&document::parse_json(&body)?)
    }

    async fn bounded<F, V>(&self, fut: F) -> Result<V>
    where
        F: Future<Output = Result<V>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| AgentError::Timeout { duration: self.timeout })?
    }
}

/// Documents decoded from one streaming response.
///
/// Dropping it closes the connection.
pub struct SampleStream {
    frames: Frames<ByteStream>,
    adapter: Arc<dyn DocumentAdapter>,
    idle: Duration,
}

impl SampleStream {
    /// Wait for the next document.
    ///
    /// `Ok(None)` when the agent closed the response. When no bytes arrive for
    /// longer than the streaming timeout this fails with [`AgentError::Timeout`].
    /// A frame that trickles in slowly is not idle.
    pub async fn next_document(&mut self) -> Result<Option<StreamsDocument>> {
        match self.frames.next().await {
            None => Ok(None),
            Some(frame) => {
                let frame = frame?;
                let doc = document::parse_json(&frame)?;
                self.adapter.parse_streams(&doc).map(Some)
            }
        }
    }
}

impl std::fmt::Debug for SampleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStream")
            .field("version", &self.adapter.version())
            .field("buffered", &self.frames.buffered_len())
            .field("idle", &self.idle)
            .finish()
    }
}
