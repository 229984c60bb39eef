//! Agent configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables and command line flags (see `Args` in main).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use playerwatch_k8s::StreamOptions;
use playerwatch_logs::SupervisorConfig;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Namespace the game server runs in
    pub namespace: String,

    /// Label selector matching the game server pod
    pub label_selector: String,

    /// Container within the pod that runs the game server
    pub container: String,

    /// Kubeconfig context. `None` uses the in-cluster service account or the
    /// current context.
    pub context: Option<String>,

    /// Seconds between discovery attempts while no pod is running
    pub discovery_interval_secs: u64,

    /// Seconds to wait after a lost log stream
    pub backoff_secs: u64,

    /// Reconnect if the log stream is silent this many seconds
    pub idle_timeout_secs: Option<u64>,

    /// Lines of history to replay when a stream opens
    pub tail_lines: Option<i64>,

    /// Seconds of history to replay when a stream opens (wins over tail_lines)
    pub since_seconds: Option<i64>,

    pub metrics_addr: IpAddr,
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            label_selector: "app=minecraft-bedrock".to_string(),
            container: "minecraft".to_string(),
            context: None,
            discovery_interval_secs: 10,
            backoff_secs: 5,
            idle_timeout_secs: None,
            tail_lines: None,
            since_seconds: None,
            metrics_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            metrics_port: 8000,
        }
    }
}

impl Config {
    /// Load a TOML config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).context(format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            bail!("namespace must not be empty");
        }
        if self.label_selector.trim().is_empty() {
            bail!("label selector must not be empty");
        }
        if self.container.trim().is_empty() {
            bail!("container must not be empty");
        }
        if self.discovery_interval_secs == 0 {
            bail!("discovery interval must be at least one second");
        }
        if self.backoff_secs == 0 {
            bail!("backoff must be at least one second");
        }
        if self.idle_timeout_secs == Some(0) {
            bail!("idle timeout must be at least one second");
        }
        if matches!(self.tail_lines, Some(n) if n < 0) {
            bail!("tail lines must not be negative");
        }
        if matches!(self.since_seconds, Some(n) if n <= 0) {
            bail!("since seconds must be positive");
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(
            self.namespace.as_str(),
            self.label_selector.as_str(),
            self.container.as_str(),
        );
        config.discovery_interval = Duration::from_secs(self.discovery_interval_secs);
        config.backoff_interval = Duration::from_secs(self.backoff_secs);
        config.idle_timeout = self.idle_timeout_secs.map(Duration::from_secs);
        config.stream_options = StreamOptions {
            tail_lines: self.tail_lines,
            since_seconds: self.since_seconds,
        };
        config
    }

    pub fn metrics_socket(&self) -> SocketAddr {
        SocketAddr::new(self.metrics_addr, self.metrics_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.metrics_socket().to_string(), "0.0.0.0:8000");

        let sup = config.supervisor_config();
        assert_eq!(sup.discovery_interval, Duration::from_secs(10));
        assert_eq!(sup.backoff_interval, Duration::from_secs(5));
        assert_eq!(sup.idle_timeout, None);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            namespace = "games"
            container = "bedrock"
            idle_timeout_secs = 900
            metrics_port = 9100
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "games");
        assert_eq!(config.container, "bedrock");
        assert_eq!(config.label_selector, "app=minecraft-bedrock");
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(
            config.supervisor_config().idle_timeout,
            Some(Duration::from_secs(900))
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::parse("namepsace = \"games\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: [fn(&mut Config); 5] = [
            |c| c.container = String::new(),
            |c| c.label_selector = " ".to_string(),
            |c| c.backoff_secs = 0,
            |c| c.idle_timeout_secs = Some(0),
            |c| c.tail_lines = Some(-1),
        ];
        for mutate in cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
