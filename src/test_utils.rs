//! Test utilities: fixture documents, a scripted transport and a recording clock
//!
//! Shared by unit tests and benchmarks. Nothing here touches the network.

#![cfg(any(test, feature = "benchmark"))]

use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::transport::{StreamResponse, Transport};
use crate::{AgentError, Result};

/// Fixture documents for one device in both JSON layouts.
///
/// The device `Mill` has an `Axes` component with a `Linear` axis `x` (data item
/// `Xact`) and a `Controller` `cont` with `exec`, `unwatched` and the condition
/// `system`. Version 1 and version 2 variants decode to the same canonical
/// shapes.
pub mod fixtures {
    use serde_json::{Value, json};

    /// Content type of the streaming fixtures, boundary `BOUND`.
    pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=BOUND";

    fn header(instance_id: u64) -> Value {
        json!({
            "instanceId": instance_id,
            "sender": "agent",
            "version": "2.2.0.16",
            "bufferSize": 131072,
            "creationTime": "2024-03-01T10:00:00Z",
            "schemaVersion": "2.2"
        })
    }

    fn streams_header(instance_id: u64, next_sequence: u64) -> Value {
        let mut header = header(instance_id);
        header["nextSequence"] = json!(next_sequence);
        header["firstSequence"] = json!(1);
        header["lastSequence"] = json!(next_sequence.saturating_sub(1));
        header
    }

    fn data_item(id: &str, category: &str, kind: &str) -> Value {
        json!({"id": id, "category": category, "type": kind})
    }

    fn xact() -> Value {
        json!({
            "id": "Xact", "category": "SAMPLE", "type": "POSITION",
            "subType": "ACTUAL", "units": "MILLIMETER"
        })
    }

    fn controller_items() -> [Value; 3] {
        [
            data_item("exec", "EVENT", "EXECUTION"),
            data_item("unwatched", "EVENT", "PROGRAM"),
            data_item("system", "CONDITION", "SYSTEM"),
        ]
    }

    /// Probe document, `jsonVersion` 1.
    pub fn probe_v1() -> Value {
        let [exec, unwatched, system] = controller_items();
        json!({"MTConnectDevices": {
            "jsonVersion": 1,
            "Header": header(5),
            "Devices": [{"Device": {
                "id": "d1", "name": "Mill", "uuid": "mill-001",
                "DataItems": [{"DataItem": data_item("avail", "EVENT", "AVAILABILITY")}],
                "Components": [
                    {"Axes": {
                        "id": "axes", "name": "base",
                        "Components": [{"Linear": {
                            "id": "x", "name": "X",
                            "DataItems": [{"DataItem": xact()}],
                            "Configuration": {"Relationships": [
                                {"ComponentRelationship": {"id": "r1", "type": "PARENT", "idRef": "cont"}}
                            ]}
                        }}]
                    }},
                    {"Controller": {
                        "id": "cont", "name": "controller",
                        "DataItems": [
                            {"DataItem": exec},
                            {"DataItem": unwatched},
                            {"DataItem": system}
                        ]
                    }}
                ]
            }}]
        }})
    }

    /// Probe document, `jsonVersion` 2, with single-member groups as bare objects.
    pub fn probe_v2() -> Value {
        let [exec, unwatched, system] = controller_items();
        json!({"MTConnectDevices": {
            "jsonVersion": 2,
            "Header": header(5),
            "Devices": {"Device": [{
                "id": "d1", "name": "Mill", "uuid": "mill-001",
                "DataItems": {"DataItem": data_item("avail", "EVENT", "AVAILABILITY")},
                "Components": {
                    "Axes": [{
                        "id": "axes", "name": "base",
                        "Components": {"Linear": [{
                            "id": "x", "name": "X",
                            "DataItems": {"DataItem": [xact()]},
                            "Configuration": {"Relationships": {
                                "ComponentRelationship": [{"id": "r1", "type": "PARENT", "idRef": "cont"}]
                            }}
                        }]}
                    }],
                    "Controller": {
                        "id": "cont", "name": "controller",
                        "DataItems": {"DataItem": [exec, unwatched, system]}
                    }
                }
            }]}
        }})
    }

    fn position(seq: u64, value: f64) -> Value {
        json!({
            "dataItemId": "Xact", "sequence": seq, "timestamp": "2024-03-01T10:00:01Z",
            "subType": "ACTUAL", "value": value
        })
    }

    fn execution(seq: u64) -> Value {
        json!({
            "dataItemId": "exec", "sequence": seq, "timestamp": "2024-03-01T10:00:01Z",
            "value": "ACTIVE"
        })
    }

    fn program(seq: u64) -> Value {
        json!({
            "dataItemId": "unwatched", "sequence": seq, "timestamp": "2024-03-01T10:00:01Z",
            "value": "O1234"
        })
    }

    fn fault(seq: u64) -> Value {
        json!({
            "dataItemId": "system", "sequence": seq, "timestamp": "2024-03-01T10:00:01Z",
            "type": "SYSTEM", "nativeCode": "E1", "value": "Spindle overload"
        })
    }

    /// Streams document, `jsonVersion` 1, with one observation per controller
    /// item and the X position set to `x`.
    pub fn streams_v1(instance_id: u64, next_sequence: u64, x: f64) -> Value {
        let seq = next_sequence.saturating_sub(4);
        json!({"MTConnectStreams": {
            "jsonVersion": 1,
            "Header": streams_header(instance_id, next_sequence),
            "Streams": [{"DeviceStream": {
                "name": "Mill", "uuid": "mill-001",
                "ComponentStreams": [
                    {"ComponentStream": {
                        "component": "Linear", "componentId": "x", "name": "X",
                        "Samples": [{"Position": position(seq, x)}]
                    }},
                    {"ComponentStream": {
                        "component": "Controller", "componentId": "cont",
                        "Events": [
                            {"Execution": execution(seq + 1)},
                            {"Program": program(seq + 2)}
                        ],
                        "Condition": [{"Fault": fault(seq + 3)}]
                    }}
                ]
            }}]
        }})
    }

    /// Streams document, `jsonVersion` 2, equivalent to [`streams_v1`].
    pub fn streams_v2(instance_id: u64, next_sequence: u64, x: f64) -> Value {
        let seq = next_sequence.saturating_sub(4);
        json!({"MTConnectStreams": {
            "jsonVersion": 2,
            "Header": streams_header(instance_id, next_sequence),
            "Streams": {"DeviceStream": [{
                "name": "Mill", "uuid": "mill-001",
                "ComponentStream": [
                    {
                        "component": "Linear", "componentId": "x", "name": "X",
                        "Samples": {"Position": [position(seq, x)]}
                    },
                    {
                        "component": "Controller", "componentId": "cont",
                        "Events": {
                            "Execution": [execution(seq + 1)],
                            "Program": program(seq + 2)
                        },
                        "Condition": {"Fault": [fault(seq + 3)]}
                    }
                ]
            }]}
        }})
    }

    /// Error document, `jsonVersion` 1.
    pub fn error_v1(code: &str) -> Value {
        json!({"MTConnectError": {
            "jsonVersion": 1,
            "Header": header(5),
            "Errors": [{"Error": {"errorCode": code, "value": "'from' is out of range"}}]
        }})
    }

    /// Error document, `jsonVersion` 2.
    pub fn error_v2(code: &str) -> Value {
        json!({"MTConnectError": {
            "jsonVersion": 2,
            "Header": header(5),
            "Errors": {"Error": [{"errorCode": code, "value": "'from' is out of range"}]}
        }})
    }

    /// One multipart part carrying `body`.
    pub fn multipart_bytes(boundary: &str, body: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{boundary}\r\nContent-type: application/json\r\nContent-length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        part.extend_from_slice(body);
        part.extend_from_slice(b"\r\n");
        part
    }

    /// One multipart part carrying a JSON document.
    pub fn multipart_part(boundary: &str, doc: &Value) -> Vec<u8> {
        multipart_bytes(boundary, doc.to_string().as_bytes())
    }
}

/// A scripted response.
#[derive(Debug)]
pub enum Reply {
    Body(Vec<u8>),
    Fail(AgentError),
    Stream {
        content_type: Option<String>,
        chunks: Vec<Vec<u8>>,
        /// Keep the body open after the last chunk instead of ending it
        hold_open: bool,
        /// Wait this long before each chunk
        pace: Option<Duration>,
    },
}

impl Reply {
    pub fn json(doc: &Value) -> Self {
        Reply::Body(doc.to_string().into_bytes())
    }

    pub fn stream(content_type: &str, chunks: Vec<Vec<u8>>) -> Self {
        Reply::Stream {
            content_type: Some(content_type.to_string()),
            chunks,
            hold_open: false,
            pace: None,
        }
    }

    pub fn hold_open(mut self) -> Self {
        if let Reply::Stream { hold_open, .. } = &mut self {
            *hold_open = true;
        }
        self
    }

    /// Deliver the chunks one at a time, `delay` apart.
    pub fn paced(mut self, delay: Duration) -> Self {
        if let Reply::Stream { pace, .. } = &mut self {
            *pace = Some(delay);
        }
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    fetches: VecDeque<Reply>,
    opens: VecDeque<Reply>,
    requests: Vec<String>,
}

/// Transport that answers from queued [`Reply`]s and records request URLs.
///
/// When a queue runs dry the request never completes, which parks a monitor
/// until the test cancels it.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    open_bodies: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an answer for the next bounded request.
    pub fn push_fetch(&self, reply: Reply) {
        self.script().fetches.push_back(reply);
    }

    /// Queue an answer for the next streaming request.
    pub fn push_open(&self, reply: Reply) {
        self.script().opens.push_back(reply);
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.script().requests.clone()
    }

    /// Streaming bodies handed out and not yet dropped.
    pub fn open_bodies(&self) -> usize {
        self.open_bodies.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` requests were made.
    pub async fn wait_for_requests(&self, n: usize) -> Vec<String> {
        loop {
            let requests = self.requests();
            if requests.len() >= n {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn take(&self, url: &str, streaming: bool) -> Option<Reply> {
        let mut script = self.script();
        script.requests.push(url.to_string());
        if streaming { script.opens.pop_front() } else { script.fetches.pop_front() }
    }
}

struct BodyGuard(Arc<AtomicUsize>);

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        match self.take(url, false) {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Stream { .. }) => {
                Err(AgentError::connection_failed("stream reply queued for a bounded request"))
            }
            None => std::future::pending().await,
        }
    }

    async fn open(&self, url: &str) -> Result<StreamResponse> {
        match self.take(url, true) {
            Some(Reply::Stream { content_type, chunks, hold_open, pace }) => {
                self.open_bodies.fetch_add(1, Ordering::SeqCst);
                let guard = BodyGuard(self.open_bodies.clone());
                let chunks = futures::stream::iter(chunks).then(move |chunk| async move {
                    if let Some(delay) = pace {
                        tokio::time::sleep(delay).await;
                    }
                    Ok::<_, AgentError>(chunk)
                });
                let body = if hold_open {
                    chunks.chain(futures::stream::pending()).boxed()
                } else {
                    chunks.boxed()
                };
                let body = body
                    .map(move |chunk| {
                        let _guard = &guard;
                        chunk
                    })
                    .boxed();
                Ok(StreamResponse { content_type, body })
            }
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Body(_)) => {
                Err(AgentError::connection_failed("body reply queued for a streaming request"))
            }
            None => std::future::pending().await,
        }
    }
}

/// Clock that records requested delays and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
