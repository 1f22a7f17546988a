//! Server configuration.
//!
//! Configuration is layered, later sources win:
//! - Built-in defaults
//! - TOML configuration file
//! - Environment variables (`COURIER_*`, nested keys separated by `__`)

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use courier_core::{HubConfig, RouterConfig};
use courier_transport::UpgradeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched when no path is given explicitly.
const CONFIG_PATHS: [&str; 3] = [
    "courier.toml",
    "/etc/courier/courier.toml",
    "~/.config/courier/courier.toml",
];

/// Deployment environment. Only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvType {
    /// JSON logs at info.
    #[default]
    Production,
    /// Human-readable logs at debug.
    Development,
    /// Human-readable logs at trace.
    Debug,
}

impl EnvType {
    /// Default log directive for this environment.
    #[must_use]
    pub fn default_filter(self) -> &'static str {
        match self {
            EnvType::Production => "courier=info",
            EnvType::Development => "courier=debug",
            EnvType::Debug => "courier=trace",
        }
    }

    /// Whether logs are emitted as JSON lines.
    #[must_use]
    pub fn json_logs(self) -> bool {
        self == EnvType::Production
    }
}

impl From<String> for EnvType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => EnvType::Development,
            "debug" => EnvType::Debug,
            _ => EnvType::Production,
        }
    }
}

impl From<EnvType> for String {
    fn from(value: EnvType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnvType::Production => "production",
            EnvType::Development => "development",
            EnvType::Debug => "debug",
        })
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment.
    #[serde(default)]
    pub env: EnvType,

    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for WebSocket upgrades.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Hub limits and tuning.
    #[serde(default)]
    pub hub: HubSection,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Status endpoint configuration.
    #[serde(default)]
    pub status: StatusConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Upgrade handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Hub limits and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Readiness events handled per wait.
    #[serde(default = "default_wait_batch")]
    pub wait_batch: usize,

    /// Readiness wait timeout in milliseconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// Routing tasks allowed in flight.
    #[serde(default = "default_route_concurrency")]
    pub route_concurrency: usize,

    /// Outbound status queue capacity.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,

    /// How long a routing task waits for queue space, in milliseconds.
    #[serde(default = "default_emit_timeout")]
    pub emit_timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Grace period for in-flight work in milliseconds.
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Serve `/` and `/health`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Status port.
    #[serde(default = "default_status_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_connections() -> usize {
    1_000_000
}

fn default_wait_batch() -> usize {
    100
}

fn default_wait_timeout() -> u64 {
    250
}

fn default_route_concurrency() -> usize {
    4096
}

fn default_output_capacity() -> usize {
    8192
}

fn default_emit_timeout() -> u64 {
    100
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_grace() -> u64 {
    5_000
}

fn default_status_port() -> u16 {
    8081
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: EnvType::default(),
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubSection::default(),
            heartbeat: HeartbeatConfig::default(),
            shutdown: ShutdownConfig::default(),
            status: StatusConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            handshake_timeout_ms: default_handshake_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            wait_batch: default_wait_batch(),
            wait_timeout_ms: default_wait_timeout(),
            route_concurrency: default_route_concurrency(),
            output_capacity: default_output_capacity(),
            emit_timeout_ms: default_emit_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_status_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, then apply `COURIER_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if any source
    /// cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        Self::from_sources(file.as_deref(), Environment::with_prefix("COURIER"))
    }

    /// Merge a TOML file (if any) and an environment source over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed.
    pub fn from_sources(file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let layered = builder
            .add_source(env.prefix_separator("_").separator("__").try_parsing(true))
            .build()
            .context("Failed to load configuration")?;

        let config: Config = layered
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Get the socket address for WebSocket upgrades.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.addr_with_port(self.port)
    }

    /// Get the socket address for the status endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn status_addr(&self) -> Result<SocketAddr> {
        self.addr_with_port(self.status.port)
    }

    fn addr_with_port(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.hub.max_connections,
            wait_batch: self.hub.wait_batch,
            wait_timeout: Duration::from_millis(self.hub.wait_timeout_ms),
            route_concurrency: self.hub.route_concurrency,
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            output_capacity: self.hub.output_capacity,
            emit_timeout: Duration::from_millis(self.hub.emit_timeout_ms),
        }
    }

    /// Upgrade settings.
    #[must_use]
    pub fn upgrade_config(&self) -> UpgradeConfig {
        UpgradeConfig {
            path: self.transport.websocket_path.clone(),
            handshake_timeout: Duration::from_millis(self.transport.handshake_timeout_ms),
            max_message_size: self.transport.max_message_size,
            ..UpgradeConfig::default()
        }
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_ms)
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("COURIER").source(Some(vars))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.env, EnvType::Production);
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
        assert_eq!(config.status_addr().unwrap().port(), 8081);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            env = "development"
            host = "127.0.0.1"
            port = 9000

            [hub]
            max_connections = 50000

            [heartbeat]
            interval_ms = 1000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.env, EnvType::Development);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.hub.max_connections, 50000);
        assert_eq!(config.hub.wait_batch, 100);
        assert_eq!(config.hub_config().heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_env_falls_back_to_production() {
        let config: Config = toml::from_str(r#"env = "staging""#).unwrap();
        assert_eq!(config.env, EnvType::Production);
    }

    #[test]
    fn test_env_type_logging() {
        assert!(EnvType::Production.json_logs());
        assert!(!EnvType::Debug.json_logs());
        assert_eq!(EnvType::Development.default_filter(), "courier=debug");
        assert_eq!(EnvType::from("DEBUG".to_string()), EnvType::Debug);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_sources(
            None,
            env(&[
                ("COURIER_PORT", "9000"),
                ("COURIER_ENV", "debug"),
                ("COURIER_HEARTBEAT__INTERVAL_MS", "1500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.env, EnvType::Debug);
        assert_eq!(config.heartbeat.interval_ms, 1500);
        assert_eq!(config.status.port, 8081);
    }

    #[test]
    fn test_file_then_environment() {
        let path = std::env::temp_dir().join(format!("courier-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "port = 7000\n[shutdown]\ngrace_ms = 100").unwrap();

        let config =
            Config::from_sources(Some(&path), env(&[("COURIER_PORT", "7001")])).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert_eq!(config.grace(), Duration::from_millis(100));
    }

    #[test]
    fn test_missing_explicit_file() {
        let missing = Path::new("/nonexistent/courier.toml");
        assert!(Config::load(Some(missing)).is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = Config::default();
        assert_eq!(config.router_config().output_capacity, 8192);
        assert_eq!(config.upgrade_config().path, "/ws");
        assert_eq!(config.hub_config().wait_timeout, Duration::from_millis(250));
    }
}
