//! Retry and fallback transitions of the monitoring loop.
//!
//! The loop runs `Probe → Snapshot → Sample → …` forever. After every step it
//! asks [`transition`] what to do next: which phase, how long to wait first,
//! whether to give up on streaming, and whether the cursor is void. The table
//! is a pure function of the current phase, the transport mode and the
//! [`Outcome`] of the step, so backoff, fallback and restart handling are
//! tested here without a network or a clock.
//!
//! | Phase    | Outcome                 | Next     | Wait            | Effect            |
//! |----------|-------------------------|----------|-----------------|-------------------|
//! | Probe    | done                    | Snapshot |                 |                   |
//! | Probe    | any failure             | Probe    | probe delay     |                   |
//! | Snapshot | done                    | Sample   |                 |                   |
//! | Snapshot | restart                 | Snapshot |                 | reset cursor      |
//! | Snapshot | other failure           | Snapshot | retry delay     |                   |
//! | Sample   | done (stream closed)    | Sample   |                 |                   |
//! | Sample   | done (poll answered)    | Sample   | poll interval   |                   |
//! | Sample   | restart                 | Snapshot |                 | reset cursor      |
//! | Sample   | framing, streaming      | Snapshot | retry delay     | switch to polling |
//! | Sample   | other failure           | Snapshot | retry delay     |                   |

use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::FailureKind;
use crate::types::{Mode, Phase};

/// Delays used by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub probe_retry_delay: Duration,
    pub poll_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            probe_retry_delay: config.probe_retry_delay(),
            poll_interval: config.poll_interval(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            probe_retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Result of one step of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The step completed; for streaming, the server closed the response.
    Done,
    Failed(FailureKind),
}

/// What the loop does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,
    /// Wait before starting `next`
    pub delay: Option<Duration>,
    /// Mode to continue in
    pub mode: Mode,
    /// Drop `instanceId` and `nextSequence` before `next`
    pub reset_cursor: bool,
}

impl Transition {
    fn to(next: Phase, mode: Mode) -> Self {
        Self { next, delay: None, mode, reset_cursor: false }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn resetting(mut self) -> Self {
        self.reset_cursor = true;
        self
    }

    /// Whether this transition leaves streaming for good.
    pub fn downgrades(&self, from: Mode) -> bool {
        from == Mode::Streaming && self.mode == Mode::Polling
    }
}

/// Look up the next step.
pub fn transition(phase: Phase, mode: Mode, outcome: Outcome, policy: &RetryPolicy) -> Transition {
    use FailureKind::*;

    match (phase, outcome) {
        (Phase::Probe, Outcome::Done) => Transition::to(Phase::Snapshot, mode),
        (Phase::Probe, Outcome::Failed(_)) => {
            Transition::to(Phase::Probe, mode).after(policy.probe_retry_delay)
        }

        (Phase::Snapshot, Outcome::Done) => Transition::to(Phase::Sample, mode),
        (Phase::Snapshot, Outcome::Failed(Restart)) => {
            Transition::to(Phase::Snapshot, mode).resetting()
        }
        (Phase::Snapshot, Outcome::Failed(_)) => {
            Transition::to(Phase::Snapshot, mode).after(policy.retry_delay)
        }

        (Phase::Sample, Outcome::Done) => match mode {
            Mode::Streaming => Transition::to(Phase::Sample, mode),
            Mode::Polling => Transition::to(Phase::Sample, mode).after(policy.poll_interval),
        },
        (Phase::Sample, Outcome::Failed(Restart)) => {
            Transition::to(Phase::Snapshot, mode).resetting()
        }
        (Phase::Sample, Outcome::Failed(Framing)) if mode == Mode::Streaming => {
            Transition::to(Phase::Snapshot, Mode::Polling).after(policy.retry_delay)
        }
        (Phase::Sample, Outcome::Failed(Transient | Framing | Probe)) => {
            Transition::to(Phase::Snapshot, mode).after(policy.retry_delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentError;
    use crate::framing::FramingError;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_delay: Duration::from_millis(10),
            probe_retry_delay: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn failed(err: AgentError) -> Outcome {
        Outcome::Failed(err.failure_kind())
    }

    #[test]
    fn happy_path_runs_probe_snapshot_sample() {
        let p = policy();
        let t = transition(Phase::Probe, Mode::Streaming, Outcome::Done, &p);
        assert_eq!(t, Transition::to(Phase::Snapshot, Mode::Streaming));
        let t = transition(Phase::Snapshot, Mode::Streaming, Outcome::Done, &p);
        assert_eq!(t, Transition::to(Phase::Sample, Mode::Streaming));
    }

    #[test]
    fn probe_failures_retry_probe_forever() {
        let p = policy();
        for _ in 0..3 {
            let t = transition(
                Phase::Probe,
                Mode::Polling,
                failed(AgentError::probe_failed("refused", None)),
                &p,
            );
            assert_eq!(t.next, Phase::Probe);
            assert_eq!(t.delay, Some(Duration::from_millis(20)));
        }
    }

    #[test]
    fn idle_timeout_reconnects_without_downgrade() {
        let err = AgentError::Timeout { duration: Duration::from_secs(11) };
        let t = transition(Phase::Sample, Mode::Streaming, failed(err), &policy());
        assert_eq!(t.next, Phase::Snapshot);
        assert_eq!(t.mode, Mode::Streaming);
        assert!(!t.downgrades(Mode::Streaming));
        assert_eq!(t.delay, Some(Duration::from_millis(10)));
    }

    #[test]
    fn missing_boundary_downgrades_permanently() {
        let err = AgentError::from(FramingError::MissingBoundary { content_type: None });
        let t = transition(Phase::Sample, Mode::Streaming, failed(err), &policy());
        assert_eq!(t.mode, Mode::Polling);
        assert!(t.downgrades(Mode::Streaming));

        // Once polling, later failures never switch back.
        let err = AgentError::from(FramingError::MissingContentLength);
        let t = transition(Phase::Sample, Mode::Polling, failed(err), &policy());
        assert_eq!(t.mode, Mode::Polling);
        let t = transition(Phase::Sample, Mode::Polling, Outcome::Done, &policy());
        assert_eq!(t.mode, Mode::Polling);
    }

    #[test]
    fn restart_resets_cursor_and_resnapshots() {
        let err = AgentError::StreamRestart { previous: 5, current: 6 };
        let t = transition(Phase::Sample, Mode::Streaming, failed(err), &policy());
        assert_eq!(t.next, Phase::Snapshot);
        assert!(t.reset_cursor);
        assert_eq!(t.delay, None);
        assert_eq!(t.mode, Mode::Streaming);
    }

    #[test]
    fn closed_stream_resumes_and_poll_waits() {
        let p = policy();
        let t = transition(Phase::Sample, Mode::Streaming, Outcome::Done, &p);
        assert_eq!((t.next, t.delay), (Phase::Sample, None));
        let t = transition(Phase::Sample, Mode::Polling, Outcome::Done, &p);
        assert_eq!((t.next, t.delay), (Phase::Sample, Some(Duration::from_millis(5))));
    }

    #[test]
    fn malformed_payload_is_transient() {
        let err = AgentError::parse_error("JSON document", "expected value");
        let t = transition(Phase::Sample, Mode::Streaming, failed(err), &policy());
        assert_eq!(t.next, Phase::Snapshot);
        assert_eq!(t.mode, Mode::Streaming);
        assert!(!t.reset_cursor);
    }

    #[test]
    fn failed_snapshot_retries_snapshot() {
        let err = AgentError::Status { url: "http://agent/current".into(), status: 503 };
        let t = transition(Phase::Snapshot, Mode::Streaming, failed(err), &policy());
        assert_eq!(t.next, Phase::Snapshot);
        assert_eq!(t.delay, Some(Duration::from_millis(10)));
    }
}
