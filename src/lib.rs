//! Async client for the MTConnect REST streaming protocol.
//!
//! MTConnect Stream monitors an MTConnect agent over HTTP: it probes the
//! agent's device model, takes a snapshot of the selected data items, then
//! follows changes through a long-lived multipart `sample` stream, falling
//! back to interval polling when the agent cannot stream.
//!
//! # Features
//!
//! - **Both JSON layouts**: `jsonVersion` 1 and 2 documents decode to one model
//! - **Resumable**: the sequence cursor survives reconnects, agent restarts
//!   trigger a fresh snapshot
//! - **Typed failures**: every error knows whether it is transient
//! - **Pluggable**: transport, clock and update sink are traits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use mtconnect_stream::{ClientConfig, MtConnect, WatchList};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load("agent.yaml")?;
//!     let mut connection = MtConnect::connect(config, |model| {
//!         let mut watch = WatchList::new();
//!         if model.data_item_by_id("Xact").is_some() {
//!             watch.insert("Xact", "x position");
//!         }
//!         watch
//!     })
//!     .await?;
//!
//!     let mut updates = connection.updates();
//!     while let Some(batch) = updates.next().await {
//!         for update in batch {
//!             println!("{}: {:?}", update.item, update.observation.value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod types;

// Wire formats
pub mod document;
pub mod framing;
pub mod stream;

// Agent model and cursor
pub mod device;
pub mod session;
pub mod sink;

// Requests and monitoring
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod driver;
pub mod retry;
pub mod transport;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Core exports
pub use error::*;
pub use types::*;

pub use client::{ProbeResult, RestClient, SampleStream};
pub use clock::{Clock, TokioClock};
pub use config::ClientConfig;
pub use connection::{Connection, MtConnect};
pub use device::{DataItemHandle, DeviceModel};
pub use document::{DocumentAdapter, JsonV1, JsonV2};
pub use driver::{Driver, DriverChannels};
pub use session::{Session, WatchList};
pub use sink::{ChannelSink, DataItemStates, DataItemValue, Discontinuity, SinkEvent, UpdateSink};
pub use transport::{HttpTransport, Transport};
