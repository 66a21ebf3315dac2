//! Tunnel configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Knobs for negotiation, tracing and the reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Mirror the GET-tunnel request to the trace sink.
    #[serde(default)]
    pub dump_http_traffic: bool,

    /// Hex dump every data packet to the trace sink.
    #[serde(default)]
    pub trace_packets: bool,

    /// How many times a reconnect re-runs negotiation before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Pause between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dump_http_traffic: false,
            trace_packets: false,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl TunnelConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TunnelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_attempts == 0 {
            return Err(Error::Config("reconnect_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Pause between reconnect attempts.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}
