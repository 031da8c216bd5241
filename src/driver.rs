//! Driver spawns and runs the monitoring task for one agent

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{RestClient, SampleStream};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::device::DeviceModel;
use crate::document::DocumentAdapter;
use crate::error::FailureKind;
use crate::retry::{Outcome, RetryPolicy, transition};
use crate::session::{Session, WatchList};
use crate::sink::UpdateSink;
use crate::transport::Transport;
use crate::types::{Mode, MonitorStatus, Phase};
use crate::{AgentError, Result};

/// Result of spawning a monitoring task
pub struct DriverChannels {
    /// Receiver for monitor status changes
    pub status: watch::Receiver<MonitorStatus>,
    /// Receiver for the device model, set once the first probe succeeds
    pub devices: watch::Receiver<Option<Arc<DeviceModel>>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// The monitoring task; completes after cancellation
    pub task: JoinHandle<()>,
}

/// Driver spawns and manages the monitoring task
///
/// The task runs `Probe → Snapshot → Sample` and reacts to failures through
/// [`crate::retry::transition`]. It never stops on its own: every failure is
/// logged and retried until the cancellation token fires.
pub struct Driver;

impl Driver {
    /// Spawn a monitor
    ///
    /// `select` runs once against the first probed device model and returns
    /// the data items to watch. Batches and gap notices go to `sink`.
    pub fn spawn<T, C, R, F, S>(
        client: RestClient<T>,
        config: &ClientConfig,
        select: F,
        sink: S,
        clock: C,
    ) -> DriverChannels
    where
        T: Transport,
        C: Clock,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(&DeviceModel) -> WatchList<R> + Send + 'static,
        S: UpdateSink<R> + 'static,
    {
        let mode = Mode::initial(config.use_polling);
        let (status_tx, status_rx) = watch::channel(MonitorStatus::new(mode));
        let (devices_tx, devices_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let monitor = Monitor {
            client,
            clock,
            sink,
            select: Some(select),
            policy: RetryPolicy::from_config(config),
            base_url: config.url.clone(),
            mode,
            probed: None,
            stream: None,
            status: MonitorStatus::new(mode),
            status_tx,
            devices_tx,
        };

        let cancel_task = cancel.clone();
        let task = tokio::spawn(async move {
            monitor.run(cancel_task).await;
        });

        DriverChannels { status: status_rx, devices: devices_rx, cancel, task }
    }
}

/// State established by a successful probe
struct Probed<R> {
    adapter: Arc<dyn DocumentAdapter>,
    session: Session<R>,
}

struct Monitor<T, C, R, F, S> {
    client: RestClient<T>,
    clock: C,
    sink: S,
    select: Option<F>,
    policy: RetryPolicy,
    base_url: String,
    mode: Mode,
    probed: Option<Probed<R>>,
    /// Open streaming response, kept across documents
    stream: Option<SampleStream>,
    status: MonitorStatus,
    status_tx: watch::Sender<MonitorStatus>,
    devices_tx: watch::Sender<Option<Arc<DeviceModel>>>,
}

impl<T, C, R, F, S> Monitor<T, C, R, F, S>
where
    T: Transport,
    C: Clock,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(&DeviceModel) -> WatchList<R> + Send + 'static,
    S: UpdateSink<R> + 'static,
{
    async fn run(mut self, cancel: CancellationToken) {
        info!(url = %self.base_url, mode = ?self.mode, "Monitor started");
        let mut phase = Phase::Probe;

        loop {
            self.status.phase = phase;
            self.status.mode = self.mode;
            self.publish();

            // Dropping the step future aborts the in-flight request
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Monitor cancelled during {:?}", phase);
                    break;
                }
                result = self.step(phase) => result,
            };

            let outcome = match result {
                Ok(()) => {
                    self.status.consecutive_failures = 0;
                    Outcome::Done
                }
                Err(e) => {
                    let kind = e.failure_kind();
                    self.record_failure(phase, kind, &e);
                    // The connection of a failed attempt is never reused
                    self.stream = None;
                    Outcome::Failed(kind)
                }
            };

            let next = transition(phase, self.mode, outcome, &self.policy);
            if next.downgrades(self.mode) {
                if let Some(probed) = self.probed.as_mut() {
                    probed.session.downgrade_to_polling();
                }
                warn!(url = %self.base_url, "Streaming framing failed, switching to polling");
            }
            self.mode = next.mode;
            if next.reset_cursor {
                if let Some(probed) = self.probed.as_mut() {
                    probed.session.reset_cursor();
                }
                self.status.instance_id = None;
                self.status.next_sequence = None;
            }
            phase = next.next;

            if let Some(delay) = next.delay {
                trace!(?delay, next = ?phase, "Waiting before next step");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Monitor cancelled while waiting");
                        break;
                    }
                    _ = self.clock.sleep(delay) => {}
                }
            }
        }

        self.stream = None;
        info!(url = %self.base_url, restarts = self.status.restarts, "Monitor stopped");
    }

    async fn step(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Probe => self.probe().await,
            Phase::Snapshot => self.snapshot().await,
            Phase::Sample => match self.mode {
                Mode::Streaming => self.stream().await,
                Mode::Polling => self.poll().await,
            },
        }
    }

    async fn probe(&mut self) -> Result<()> {
        let probe = self.client.probe().await?;
        let watched = match self.select.take() {
            Some(select) => select(&probe.model),
            None => match self.probed.take() {
                Some(previous) => previous.session.watched().clone(),
                None => WatchList::new(),
            },
        };
        if watched.is_empty() {
            warn!("No data items selected, only headers will be tracked");
        }
        debug!(watched = watched.len(), path = ?watched.path(), "Watch list ready");

        let session = Session::new(self.base_url.as_str(), self.mode, watched);
        self.probed = Some(Probed { adapter: probe.adapter, session });
        self.devices_tx.send_replace(Some(Arc::new(probe.model)));
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<()> {
        self.stream = None;
        let probed = self.probed.as_mut().ok_or_else(not_probed)?;
        let path = probed.session.watched().path();

        let doc = self.client.current(probed.adapter.as_ref(), path.as_deref()).await?;
        let delivered = probed.session.handle_document(&doc, &mut self.sink)?;
        debug!(
            instance_id = doc.header.instance_id,
            next_sequence = ?doc.header.next_sequence,
            delivered,
            "Snapshot applied"
        );
        record_cursor(&mut self.status, &probed.session);
        self.status_tx.send_replace(self.status.clone());
        Ok(())
    }

    async fn poll(&mut self) -> Result<()> {
        let probed = self.probed.as_mut().ok_or_else(not_probed)?;
        let path = probed.session.watched().path();
        let from = probed.session.next_sequence();

        let doc = self.client.poll(probed.adapter.as_ref(), path.as_deref(), from).await?;
        let delivered = probed.session.handle_document(&doc, &mut self.sink)?;
        trace!(next_sequence = ?doc.header.next_sequence, delivered, "Poll applied");
        record_cursor(&mut self.status, &probed.session);
        self.status_tx.send_replace(self.status.clone());
        Ok(())
    }

    /// Read documents until the agent closes the response or a read fails.
    async fn stream(&mut self) -> Result<()> {
        let probed = self.probed.as_mut().ok_or_else(not_probed)?;

        if self.stream.is_none() {
            let path = probed.session.watched().path();
            let from = probed.session.next_sequence();
            let stream = self.client.stream(probed.adapter.clone(), path.as_deref(), from).await?;
            info!(from = ?from, "Streaming");
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        loop {
            match stream.next_document().await? {
                Some(doc) => {
                    let delivered = probed.session.handle_document(&doc, &mut self.sink)?;
                    trace!(next_sequence = ?doc.header.next_sequence, delivered, "Frame applied");
                    self.status.consecutive_failures = 0;
                    record_cursor(&mut self.status, &probed.session);
                    self.status_tx.send_replace(self.status.clone());
                }
                None => {
                    debug!("Agent closed the stream");
                    self.stream = None;
                    return Ok(());
                }
            }
        }
    }

    fn record_failure(&mut self, phase: Phase, kind: FailureKind, error: &AgentError) {
        self.status.consecutive_failures += 1;
        self.status.last_error = Some(error.to_string());
        match kind {
            FailureKind::Restart => {
                self.status.restarts += 1;
                info!(%error, "Agent restarted, taking a fresh snapshot");
            }
            _ => warn!(
                ?phase,
                ?kind,
                failures = self.status.consecutive_failures,
                %error,
                "Step failed"
            ),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

fn record_cursor<R: Clone>(status: &mut MonitorStatus, session: &Session<R>) {
    status.instance_id = session.instance_id();
    status.next_sequence = session.next_sequence();
}

fn not_probed() -> AgentError {
    AgentError::probe_failed("no device model yet", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::sink::{ChannelSink, Discontinuity, SinkEvent};
    use crate::test_utils::{MockTransport, RecordingClock, Reply, fixtures};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::new("http://agent")
            .with_streaming_timeout(Duration::from_secs(5))
            .with_retry_delay(Duration::from_millis(7));
        config.probe_retry_delay_ms = 9;
        config
    }

    fn select(model: &DeviceModel) -> WatchList<String> {
        ["Xact", "exec"]
            .into_iter()
            .filter(|id| model.data_item_by_id(id).is_some())
            .map(|id| (id, format!("item:{id}")))
            .collect()
    }

    fn spawn(
        transport: &MockTransport,
        clock: &RecordingClock,
        config: ClientConfig,
    ) -> (DriverChannels, mpsc::UnboundedReceiver<SinkEvent<String>>) {
        let _ = tracing_subscriber::fmt::try_init();
        let client = RestClient::new(transport.clone(), &config).unwrap();
        let (sink, rx) = ChannelSink::new();
        (Driver::spawn(client, &config, select, sink, clock.clone()), rx)
    }

    fn part(instance: u64, next: u64) -> Vec<u8> {
        fixtures::multipart_part("BOUND", &fixtures::streams_v1(instance, next, 1.0))
    }

    async fn stop(channels: DriverChannels) {
        channels.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), channels.task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    fn batches(rx: &mut mpsc::UnboundedReceiver<SinkEvent<String>>) -> Vec<SinkEvent<String>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn streams_from_snapshot_cursor_and_resumes_after_close() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 0.0)));
        transport.push_open(Reply::stream(
            fixtures::MULTIPART_CONTENT_TYPE,
            vec![part(5, 120), part(5, 150)],
        ));

        let (channels, mut rx) = spawn(&transport, &clock, config());
        let requests = transport.wait_for_requests(4).await;

        assert!(requests[0].ends_with("/probe"));
        assert!(requests[1].contains("/current?path="));
        assert!(requests[2].contains("from=100") && requests[2].contains("interval=100"));
        assert!(requests[3].contains("from=150"), "resumed at {}", requests[3]);

        let status = channels.status.borrow().clone();
        assert_eq!(status.next_sequence, Some(150));
        assert_eq!(status.instance_id, Some(5));
        assert_eq!(status.mode, Mode::Streaming);
        assert!(clock.sleeps().is_empty());
        assert!(channels.devices.borrow().is_some());

        let events = batches(&mut rx);
        assert_eq!(events.len(), 3);
        for event in &events {
            match event {
                SinkEvent::Batch(batch) => {
                    let items: Vec<&str> = batch.iter().map(|u| u.item.as_str()).collect();
                    assert_eq!(items, vec!["item:Xact", "item:exec"]);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        stop(channels).await;
    }

    #[tokio::test]
    async fn missing_boundary_switches_to_polling_for_good() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 0.0)));
        transport.push_open(Reply::stream("application/json", Vec::new()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 110, 0.0)));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 130, 0.0)));

        let (channels, _rx) = spawn(&transport, &clock, config());
        let requests = transport.wait_for_requests(6).await;

        assert!(requests[2].contains("interval="));
        assert!(requests[3].contains("/current"));
        assert!(requests[4].contains("/sample") && requests[4].contains("from=110"));
        assert!(!requests[4].contains("interval="));
        assert!(requests[5].contains("from=130") && !requests[5].contains("interval="));

        assert_eq!(channels.status.borrow().mode, Mode::Polling);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(7), Duration::from_millis(250)]);
        stop(channels).await;
    }

    #[tokio::test]
    async fn part_without_content_length_switches_to_polling_for_good() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 0.0)));
        let unframed = b"--BOUND\r\nContent-type: application/json\r\n\r\n{}\r\n".to_vec();
        transport.push_open(
            Reply::stream(fixtures::MULTIPART_CONTENT_TYPE, vec![part(5, 101), unframed])
                .hold_open(),
        );
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 110, 0.0)));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 130, 0.0)));

        let (channels, _rx) = spawn(&transport, &clock, config());
        let requests = transport.wait_for_requests(6).await;

        assert!(requests[2].contains("/sample") && requests[2].contains("interval="));
        assert!(requests[3].contains("/current"), "expected a snapshot, got {}", requests[3]);
        assert!(requests[4].contains("from=110") && !requests[4].contains("interval="));
        assert!(requests[5].contains("from=130") && !requests[5].contains("interval="));
        assert_eq!(transport.open_bodies(), 0);

        let status = channels.status.borrow().clone();
        assert_eq!(status.mode, Mode::Polling);
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("Content-Length")));
        stop(channels).await;
    }

    #[tokio::test]
    async fn idle_stream_reconnects_without_downgrade() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v2()));
        transport.push_fetch(Reply::json(&fixtures::streams_v2(5, 100, 0.0)));
        let frame = fixtures::multipart_part("BOUND", &fixtures::streams_v2(5, 101, 1.0));
        transport.push_open(
            Reply::stream(fixtures::MULTIPART_CONTENT_TYPE, vec![frame]).hold_open(),
        );
        transport.push_fetch(Reply::json(&fixtures::streams_v2(5, 140, 0.0)));

        let idle = config().with_streaming_timeout(Duration::from_millis(40));
        let (channels, _rx) = spawn(&transport, &clock, idle);
        let requests = transport.wait_for_requests(5).await;

        assert!(requests[3].contains("/current"));
        assert!(requests[4].contains("interval=") && requests[4].contains("from=140"));
        assert_eq!(transport.open_bodies(), 0, "idle connection was not closed");

        let status = channels.status.borrow().clone();
        assert_eq!(status.mode, Mode::Streaming);
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("timed out")));
        assert_eq!(clock.sleeps()[0], Duration::from_millis(7));
        stop(channels).await;
    }

    #[tokio::test]
    async fn restart_discards_cursor_and_resnapshots() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 0.0)));
        transport.push_open(
            Reply::stream(fixtures::MULTIPART_CONTENT_TYPE, vec![part(5, 150), part(6, 3)])
                .hold_open(),
        );
        transport.push_fetch(Reply::json(&fixtures::streams_v1(6, 12, 0.0)));

        let (channels, mut rx) = spawn(&transport, &clock, config());
        let requests = transport.wait_for_requests(5).await;

        assert!(requests[3].contains("/current"));
        assert!(requests[4].contains("from=12"), "resumed at {}", requests[4]);
        assert!(clock.sleeps().is_empty());

        let status = channels.status.borrow().clone();
        assert_eq!(status.restarts, 1);
        assert_eq!(status.instance_id, Some(6));

        let gaps: Vec<Discontinuity> = batches(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Discontinuity(gap) => Some(gap),
                SinkEvent::Batch(_) => None,
            })
            .collect();
        assert_eq!(gaps, vec![Discontinuity { previous: 5, current: 6 }]);
        stop(channels).await;
    }

    #[tokio::test]
    async fn probe_is_retried_until_it_succeeds() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::Fail(AgentError::connection_failed("refused")));
        transport.push_fetch(Reply::Body(b"not json".to_vec()));
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));

        let (channels, _rx) = spawn(&transport, &clock, config().with_polling(true));
        let requests = transport.wait_for_requests(4).await;

        assert!(requests[..3].iter().all(|r| r.ends_with("/probe")));
        assert!(requests[3].contains("/current"));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(9); 2]);
        assert_eq!(channels.status.borrow().phase, Phase::Snapshot);
        stop(channels).await;
    }

    #[tokio::test]
    async fn agent_error_document_triggers_fresh_snapshot() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        transport.push_fetch(Reply::json(&fixtures::probe_v1()));
        transport.push_fetch(Reply::json(&fixtures::streams_v1(5, 100, 0.0)));
        transport.push_fetch(Reply::json(&fixtures::error_v1("OUT_OF_RANGE")));

        let (channels, _rx) = spawn(&transport, &clock, config().with_polling(true));
        let requests = transport.wait_for_requests(4).await;

        assert!(requests[2].contains("/sample"));
        assert!(requests[3].contains("/current"));
        let status = channels.status.borrow().clone();
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("OUT_OF_RANGE")));
        stop(channels).await;
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_request() {
        let transport = MockTransport::new();
        let clock = RecordingClock::new();
        let (channels, _rx) = spawn(&transport, &clock, config());
        transport.wait_for_requests(1).await;
        stop(channels).await;
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let transport = MockTransport::new();
        transport.push_fetch(Reply::Fail(AgentError::connection_failed("refused")));
        let config = config().with_retry_delay(Duration::from_secs(60));
        let client = RestClient::new(transport.clone(), &config).unwrap();
        let (sink, _rx) = ChannelSink::<String>::new();
        let channels = Driver::spawn(client, &config, select, sink, TokioClock);

        transport.wait_for_requests(1).await;
        // Let the failed probe reach its 60s wait
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.requests().len(), 1);

        let started = std::time::Instant::now();
        stop(channels).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
