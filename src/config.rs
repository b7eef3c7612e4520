//! Worker configuration

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Address of the socket the worker connects to.
///
/// This is usually not the remote host itself but the local endpoint of an
/// already-established relay tunnel that forwards to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,

    /// TCP port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval to send keepalive messages in. Longer intervals cause
    /// connection failures to be detected later.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_interval_secs: u64,

    /// Timeout for the blocking connect/handshake/authenticate phase.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Whether `dispose` joins the connection thread.
    #[serde(default = "default_true")]
    pub join_on_dispose: bool,

    /// How often an idle loop iteration asks the engine whether a
    /// keepalive is due. Independent of `keep_alive_interval_secs`; the
    /// engine itself decides whether a keepalive actually goes out.
    #[serde(default = "default_keepalive_check_millis")]
    pub keepalive_check_interval_millis: u64,
}

fn default_port() -> u16 {
    22
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_connection_timeout_secs() -> u64 {
    15
}

fn default_keepalive_check_millis() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: default_keep_alive_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            join_on_dispose: true,
            keepalive_check_interval_millis: default_keepalive_check_millis(),
        }
    }
}

impl WorkerConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn keepalive_check_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_check_interval_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        let ep = Endpoint::new("127.0.0.1", 2222);
        assert_eq!(ep.to_string(), "127.0.0.1:2222");
    }

    #[test]
    fn config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(5));
        assert_eq!(config.connection_timeout(), Duration::from_secs(15));
        assert!(config.join_on_dispose);
        assert_eq!(config.keepalive_check_interval(), Duration::from_secs(1));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").expect("empty config");
        assert_eq!(config.connection_timeout_secs, 15);

        let config: WorkerConfig =
            serde_json::from_str(r#"{"connection_timeout_secs": 3}"#).expect("partial config");
        assert_eq!(config.connection_timeout_secs, 3);
    }
}
