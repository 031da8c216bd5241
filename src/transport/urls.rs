//! Request URLs for the REST endpoints

use reqwest::Url;

use crate::config::ClientConfig;
use crate::{AgentError, Result};

/// Builds `probe`, `current` and `sample` URLs below one agent base URL.
#[derive(Debug, Clone)]
pub struct RequestUrls {
    base: String,
    count: u32,
    interval_ms: u64,
    heartbeat_ms: Option<u64>,
}

impl RequestUrls {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = config.url.trim_end_matches('/').to_string();
        Url::parse(&base)
            .map_err(|e| AgentError::config_error(format!("invalid url {base}: {e}")))?;
        Ok(Self {
            base,
            count: config.count,
            interval_ms: config.interval_ms,
            heartbeat_ms: config.heartbeat_ms,
        })
    }

    /// `GET {base}/probe`
    pub fn probe(&self) -> Result<String> {
        self.build("probe", &[])
    }

    /// `GET {base}/current?path=…`
    pub fn current(&self, path: Option<&str>) -> Result<String> {
        let mut query = Vec::new();
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }
        self.build("current", &query)
    }

    /// `GET {base}/sample?path=…&from=…&count=…`
    pub fn poll(&self, path: Option<&str>, from: Option<u64>) -> Result<String> {
        self.build("sample", &self.sample_query(path, from))
    }

    /// The poll URL plus `interval` (and `heartbeat` when configured), which
    /// makes the agent hold the response open and push parts.
    pub fn stream(&self, path: Option<&str>, from: Option<u64>) -> Result<String> {
        let mut query = self.sample_query(path, from);
        query.push(("interval", self.interval_ms.to_string()));
        if let Some(heartbeat) = self.heartbeat_ms {
            query.push(("heartbeat", heartbeat.to_string()));
        }
        self.build("sample", &query)
    }

    fn sample_query(&self, path: Option<&str>, from: Option<u64>) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }
        if let Some(from) = from {
            query.push(("from", from.to_string()));
        }
        query.push(("count", self.count.to_string()));
        query
    }

    fn build(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String> {
        let mut url = Url::parse(&format!("{}/{endpoint}", self.base))
            .map_err(|e| AgentError::config_error(format!("invalid url {}: {e}", self.base)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }
}
