//! Connection handle for a running monitor

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::RestClient;
use crate::clock::{Clock, TokioClock};
use crate::config::ClientConfig;
use crate::device::DeviceModel;
use crate::driver::Driver;
use crate::session::WatchList;
use crate::sink::{ChannelSink, SinkEvent, UpdateSink};
use crate::transport::{HttpTransport, Transport};
use crate::types::{MonitorStatus, ObservationBatch};
use crate::Result;

/// Entry point for monitoring an MTConnect agent.
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use mtconnect_stream::{ClientConfig, MtConnect, WatchList};
///
/// #[tokio::main]
/// async fn main() -> mtconnect_stream::Result<()> {
///     let config = ClientConfig::new("http://agent:5000");
///     let mut connection = MtConnect::connect(config, |model| {
///         model
///             .data_items()
///             .map(|(_, item)| (item.id().to_string(), item.id().to_string()))
///             .collect::<WatchList<String>>()
///     })
///     .await?;
///
///     let mut updates = connection.updates();
///     while let Some(batch) = updates.next().await {
///         for update in batch {
///             println!("{} = {:?}", update.item, update.observation.value);
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct MtConnect;

impl MtConnect {
    /// Monitor an agent over HTTP, delivering batches through [`Connection::updates`].
    pub async fn connect<R, F>(config: ClientConfig, select: F) -> Result<Connection<R>>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&DeviceModel) -> WatchList<R> + Send + 'static,
    {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::connect_with(transport, TokioClock, config, select).await
    }

    /// Like [`connect`](Self::connect) with an explicit transport and clock.
    pub async fn connect_with<T, C, R, F>(
        transport: T,
        clock: C,
        config: ClientConfig,
        select: F,
    ) -> Result<Connection<R>>
    where
        T: Transport,
        C: Clock,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&DeviceModel) -> WatchList<R> + Send + 'static,
    {
        let (sink, events) = ChannelSink::new();
        let mut connection = Self::monitor(transport, clock, config, select, sink).await?;
        connection.events = Some(events);
        Ok(connection)
    }

    /// Run a monitor that hands batches to a caller-supplied sink.
    ///
    /// The returned connection has no update stream; use it for status and
    /// shutdown.
    pub async fn monitor<T, C, R, F, S>(
        transport: T,
        clock: C,
        config: ClientConfig,
        select: F,
        sink: S,
    ) -> Result<Connection<R>>
    where
        T: Transport,
        C: Clock,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&DeviceModel) -> WatchList<R> + Send + 'static,
        S: UpdateSink<R> + 'static,
    {
        config.validate()?;
        info!(url = %config.url, polling = config.use_polling, "Connecting to agent");

        let client = RestClient::new(transport, &config)?;
        let channels = Driver::spawn(client, &config, select, sink, clock);

        Ok(Connection {
            events: None,
            status: channels.status,
            devices: channels.devices,
            cancel: channels.cancel,
            task: Some(channels.task),
        })
    }
}

/// Handle to a running monitor
///
/// Dropping the connection cancels the monitor and closes its HTTP connection.
pub struct Connection<R> {
    events: Option<mpsc::UnboundedReceiver<SinkEvent<R>>>,
    status: watch::Receiver<MonitorStatus>,
    devices: watch::Receiver<Option<Arc<DeviceModel>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<R: Send + 'static> Connection<R> {
    /// Take the stream of batches and gap notices.
    ///
    /// Only the first call gets the events; later calls get a stream that ends
    /// immediately.
    pub fn events(&mut self) -> impl Stream<Item = SinkEvent<R>> + Unpin + 'static {
        let events = self.events.take().unwrap_or_else(|| {
            debug!("Update stream already taken");
            mpsc::unbounded_channel().1
        });
        UnboundedReceiverStream::new(events)
    }

    /// Take the stream of observation batches, in server order.
    pub fn updates(&mut self) -> impl Stream<Item = ObservationBatch<R>> + Unpin + 'static {
        self.events().filter_map(|event| {
            futures::future::ready(match event {
                SinkEvent::Batch(batch) => Some(batch),
                SinkEvent::Discontinuity(_) => None,
            })
        })
    }

    /// Get monitor status changes as a stream
    ///
    /// Emits the current status immediately, then every change.
    pub fn status_updates(&self) -> impl Stream<Item = MonitorStatus> + Unpin + 'static {
        WatchStream::new(self.status.clone())
    }

    /// Current monitor status
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Device model of the last successful probe, if any
    pub fn device_model(&self) -> Option<Arc<DeviceModel>> {
        self.devices.borrow().clone()
    }

    /// Wait for the first successful probe.
    pub async fn wait_for_device_model(&self) -> Option<Arc<DeviceModel>> {
        let mut devices = self.devices.clone();
        let model = devices.wait_for(|model| model.is_some()).await.ok()?;
        model.clone()
    }

    /// Cancel the monitor and wait for its task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<R> Drop for Connection<R> {
    fn drop(&mut self) {
        debug!("Dropping connection");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockTransport, RecordingClock, Reply, fixtures};
    use crate::types::Phase;
    use std::time::Duration;

    fn watch_xact(model: &DeviceModel) -> WatchList<&'static str> {
        let mut list = WatchList::new();
        if model.data_item_by_id("Xact").is_some() {
            list.insert("Xact", "x");
        }
        list
    }

    fn scripted() -> MockTransport {
        let transport = MockTransport::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 1.0)));
        transport.push_open(
            Reply::stream(
                fixtures::MULTIPART_CONTENT_TYPE,
                vec![fixtures::multipart_part("BOUND", &fixtures::streams_v1(5, 110, 2.5))],
            )
            .hold_open(),
        );
        transport
    }

    #[tokio::test]
    async fn updates_arrive_in_server_order() {
        let transport = scripted();
        let mut connection = MtConnect::connect_with(
            transport,
            RecordingClock::new(),
            ClientConfig::new("http://agent"),
            watch_xact,
        )
        .await
        .unwrap();

        let positions: Vec<Option<f64>> = connection
            .updates()
            .take(2)
            .map(|batch| batch.updates[0].observation.value.as_f64())
            .collect()
            .await;
        assert_eq!(positions, vec![Some(1.0), Some(2.5)]);

        let model = connection.wait_for_device_model().await.unwrap();
        assert!(model.component_by_id("cont").is_some());
        let mut status = Box::pin(connection.status_updates());
        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(s) = status.next().await {
                if s.next_sequence == Some(110) {
                    break;
                }
            }
        })
        .await
        .unwrap();
        drop(status);
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn status_stream_reports_phases() {
        let transport = scripted();
        let connection = MtConnect::connect_with(
            transport,
            RecordingClock::new(),
            ClientConfig::new("http://agent"),
            watch_xact,
        )
        .await
        .unwrap();

        let mut status = Box::pin(connection.status_updates());
        let reached_sample = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(s) = status.next().await {
                if s.phase == Phase::Sample {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(reached_sample);
    }

    #[tokio::test]
    async fn dropping_the_connection_closes_the_stream() {
        let transport = scripted();
        let mut connection = MtConnect::connect_with(
            transport.clone(),
            RecordingClock::new(),
            ClientConfig::new("http://agent"),
            watch_xact,
        )
        .await
        .unwrap();

        let _ = connection.updates().take(2).collect::<Vec<_>>().await;
        assert_eq!(transport.open_bodies(), 1);
        drop(connection);

        tokio::time::timeout(Duration::from_secs(1), async {
            while transport.open_bodies() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("stream body still open after drop");
    }

    #[tokio::test]
    async fn second_update_stream_is_empty() {
        let transport = scripted();
        let mut connection = MtConnect::connect_with(
            transport,
            RecordingClock::new(),
            ClientConfig::new("http://agent"),
            watch_xact,
        )
        .await
        .unwrap();

        let _first = connection.events();
        assert!(connection.updates().next().await.is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_spawning() {
        let result = MtConnect::connect_with(
            MockTransport::new(),
            RecordingClock::new(),
            ClientConfig::new("http://agent").with_polling(true).with_streaming_timeout(Duration::ZERO),
            watch_xact,
        )
        .await;
        assert!(matches!(result, Err(crate::AgentError::Config { .. })));
    }
}
