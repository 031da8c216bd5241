//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::{AgentError, Result};

/// Settings for one monitored agent.
///
/// Every field except `url` has a default, so a YAML file may be as small as:
///
/// ```rust
/// use mtconnect_stream::ClientConfig;
///
/// let config = ClientConfig::from_yaml("url: http://agent:5000").unwrap();
/// assert_eq!(config.count, 1000);
/// assert!(!config.use_polling);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Agent base URL, e.g. `http://agent:5000` or `http://agent:5000/mill`
    pub url: String,

    /// `interval` query parameter for streaming requests
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Pause between two poll requests
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Idle bound on connecting and on each stream read
    #[serde(default = "default_streaming_timeout_ms")]
    pub streaming_timeout_ms: u64,

    /// `heartbeat` query parameter for streaming requests; the agent default when unset
    #[serde(default)]
    pub heartbeat_ms: Option<u64>,

    /// `count` query parameter for sample requests
    #[serde(default = "default_count")]
    pub count: u32,

    /// Start in polling mode instead of streaming
    #[serde(default)]
    pub use_polling: bool,

    /// Delay after a failed snapshot, stream or poll
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay between probe attempts
    #[serde(default = "default_retry_delay_ms")]
    pub probe_retry_delay_ms: u64,

    /// Largest accepted multipart body
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// `Accept` header sent with every request
    #[serde(default = "default_accept")]
    pub accept: String,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_streaming_timeout_ms() -> u64 {
    11_000
}

fn default_count() -> u32 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_accept() -> String {
    "application/json".to_string()
}

impl ClientConfig {
    /// Configuration with defaults for the given agent URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval_ms: default_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            streaming_timeout_ms: default_streaming_timeout_ms(),
            heartbeat_ms: None,
            count: default_count(),
            use_polling: false,
            retry_delay_ms: default_retry_delay_ms(),
            probe_retry_delay_ms: default_retry_delay_ms(),
            max_frame_len: default_max_frame_len(),
            accept: default_accept(),
        }
    }

    pub fn with_polling(mut self, use_polling: bool) -> Self {
        self.use_polling = use_polling;
        self
    }

    pub fn with_streaming_timeout(mut self, timeout: Duration) -> Self {
        self.streaming_timeout_ms = millis(timeout);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self.probe_retry_delay_ms = millis(delay);
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml_ng::from_str(yaml).map_err(|e| {
            AgentError::config_error(format!("YAML parsing failed: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading client configuration");
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AgentError::config_error(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(AgentError::config_error("url must not be empty"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(AgentError::config_error(format!(
                "url must start with http:// or https://, got {}",
                self.url
            )));
        }
        if self.streaming_timeout_ms == 0 {
            return Err(AgentError::config_error("streaming_timeout_ms must be positive"));
        }
        if let Some(heartbeat) = self.heartbeat_ms
            && heartbeat >= self.streaming_timeout_ms
        {
            return Err(AgentError::config_error(
                "heartbeat_ms must be shorter than streaming_timeout_ms",
            ));
        }
        for (name, value) in [
            ("retry_delay_ms", self.retry_delay_ms),
            ("probe_retry_delay_ms", self.probe_retry_delay_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(AgentError::config_error(format!("{name} must be positive")));
            }
        }
        if self.count == 0 {
            return Err(AgentError::config_error("count must be positive"));
        }
        if self.max_frame_len == 0 {
            return Err(AgentError::config_error("max_frame_len must be positive"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn streaming_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
