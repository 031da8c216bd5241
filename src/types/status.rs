//! Transport mode and monitor status

use serde::{Deserialize, Serialize};

/// How sample data is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// One long-lived multipart response
    Streaming,
    /// Repeated bounded `sample` requests
    Polling,
}

impl Mode {
    /// Initial mode for a session.
    pub fn initial(use_polling: bool) -> Self {
        if use_polling { Mode::Polling } else { Mode::Streaming }
    }
}

/// Step of the monitoring sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Probe,
    Snapshot,
    /// Streaming or polling, depending on [`Mode`]
    Sample,
}

/// Observable state of a running monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub phase: Phase,
    pub mode: Mode,
    pub instance_id: Option<u64>,
    pub next_sequence: Option<u64>,
    /// Agent restarts seen so far
    pub restarts: u32,
    /// Failures since the last successful step
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl MonitorStatus {
    pub fn new(mode: Mode) -> Self {
        Self {
            phase: Phase::Probe,
            mode,
            instance_id: None,
            next_sequence: None,
            restarts: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}
