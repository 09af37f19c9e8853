//! Orchestrator configuration
//!
//! Every section has defaults, so an empty file (or no file at all) gives a
//! working setup against the mock gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use blegw_core::{ConnectionSettings, ScanMode, D600_SERVICE_UUID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Reconnect to selected devices after they drop
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default)]
    pub pairing: PairingPolicy,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            connection: ConnectionSettings::default(),
            reconnect: true,
            scan_mode: ScanMode::default(),
            pairing: PairingPolicy::default(),
            timing: TimingConfig::default(),
            shutdown: ShutdownConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Active scanning requests scan responses
    #[serde(default = "default_true")]
    pub active: bool,
    /// Length of the discovery scan in seconds
    #[serde(default = "default_scan_period")]
    pub period_secs: u32,
    /// Length of the scan restarted after each connect cycle
    #[serde(default = "default_rescan_period")]
    pub rescan_period_secs: u32,
}

fn default_scan_period() -> u32 {
    1
}

fn default_rescan_period() -> u32 {
    1
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            active: true,
            period_secs: default_scan_period(),
            rescan_period_secs: default_rescan_period(),
        }
    }
}

// =============================================================================
// Pairing, timing and shutdown
// =============================================================================

/// Retry policy for pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPolicy {
    #[serde(default = "default_pair_backoff")]
    pub backoff_ms: u64,
    /// Give up after this many attempts; unset retries until shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

fn default_pair_backoff() -> u64 {
    500
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: default_pair_backoff(),
            max_attempts: None,
        }
    }
}

impl PairingPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after a connect batch before pairing
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// Pause between stopping the scan and unpairing after an encryption change
    #[serde(default = "default_encryption_recovery")]
    pub encryption_recovery_ms: u64,
    /// Pause after the operator picks devices
    #[serde(default = "default_selection_delay")]
    pub selection_delay_ms: u64,
    #[serde(default = "default_version_timeout")]
    pub version_timeout_ms: u64,
}

fn default_settle() -> u64 {
    1000
}

fn default_encryption_recovery() -> u64 {
    1000
}

fn default_selection_delay() -> u64 {
    200
}

fn default_version_timeout() -> u64 {
    5000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle(),
            encryption_recovery_ms: default_encryption_recovery(),
            selection_delay_ms: default_selection_delay(),
            version_timeout_ms: default_version_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn encryption_recovery(&self) -> Duration {
        Duration::from_millis(self.encryption_recovery_ms)
    }

    pub fn selection_delay(&self) -> Duration {
        Duration::from_millis(self.selection_delay_ms)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_millis(self.version_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Extra attempts at stopping the scan and disconnecting nodes
    #[serde(default = "default_shutdown_retries")]
    pub retries: u32,
    #[serde(default = "default_shutdown_retry_delay")]
    pub retry_delay_ms: u64,
    /// How long to wait for gateway tasks to wind down
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_shutdown_retries() -> u32 {
    3
}

fn default_shutdown_retry_delay() -> u64 {
    100
}

fn default_drain_timeout() -> u64 {
    1000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            retries: default_shutdown_retries(),
            retry_delay_ms: default_shutdown_retry_delay(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Gateway transport selection. The vendor cloud transport is provided by
/// integrators implementing `GatewayAccount`; the built-in one is simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Simulated gateways
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Simulated gateway account and devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    /// Delay applied to every request
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_mock_gateways")]
    pub gateways: Vec<String>,
    /// Whether a cached session is available, so `auth` succeeds
    #[serde(default = "default_true")]
    pub session_cached: bool,
    /// Password accepted by `login`; any password when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_gateway_version")]
    pub version: String,
    /// Delay between simulated card reads
    #[serde(default = "default_card_interval")]
    pub card_interval_ms: u64,
    /// Maximum hex characters per indication fragment
    #[serde(default = "default_fragment_len")]
    pub fragment_len: usize,
    #[serde(default = "default_mock_devices")]
    pub devices: Vec<MockDevice>,
}

fn default_mock_gateways() -> Vec<String> {
    vec!["mock-gw-01".to_string()]
}

fn default_gateway_version() -> String {
    "1.0.0-mock".to_string()
}

fn default_card_interval() -> u64 {
    5000
}

fn default_fragment_len() -> usize {
    40
}

fn default_mock_devices() -> Vec<MockDevice> {
    vec![
        MockDevice {
            did: "665544332211".to_string(),
            name: "D600-Sensor".to_string(),
            card_reads: vec!["01046A2B3C4D5E6F".to_string()],
            ..MockDevice::default()
        },
        MockDevice {
            did: "0a0b0c0d0e0f".to_string(),
            name: "HR-Band".to_string(),
            rssi: -78,
            services: vec!["0d18".to_string()],
            ..MockDevice::default()
        },
    ]
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            gateways: default_mock_gateways(),
            session_cached: true,
            password: None,
            version: default_gateway_version(),
            card_interval_ms: default_card_interval(),
            fragment_len: default_fragment_len(),
            devices: default_mock_devices(),
        }
    }
}

/// A simulated peripheral in radio range of every mock gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDevice {
    pub did: String,
    #[serde(default)]
    pub dtype: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_rssi")]
    pub rssi: i16,
    #[serde(default = "default_battery")]
    pub battery: u8,
    /// Advertised 128-bit service UUIDs
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    /// Reader text emitted as indications once subscribed
    #[serde(default)]
    pub card_reads: Vec<String>,
}

fn default_rssi() -> i16 {
    -60
}

fn default_battery() -> u8 {
    90
}

fn default_services() -> Vec<String> {
    vec![D600_SERVICE_UUID.to_string()]
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            did: String::new(),
            dtype: 0,
            name: String::new(),
            rssi: default_rssi(),
            battery: default_battery(),
            services: default_services(),
            card_reads: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert!(config.scan.active);
        assert_eq!(config.scan.period_secs, 1);
        assert_eq!(config.connection, ConnectionSettings::default());
        assert!(config.reconnect);
        assert_eq!(config.scan_mode, ScanMode::Single);
        assert_eq!(config.pairing.max_attempts, None);
        assert_eq!(config.timing.settle(), Duration::from_millis(1000));
        assert_eq!(config.transport, TransportConfig::Mock(MockConfig::default()));
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
reconnect = false
scan_mode = "continuous"

[scan]
active = false
period_secs = 10

[connection]
interval_min = 24

[pairing]
max_attempts = 5

[transport]
type = "mock"
gateways = ["gw-a", "gw-b"]

[[transport.devices]]
did = "112233445566"
name = "Bench"
"#;
        let config = OrchestratorConfig::from_toml_str(toml, Path::new("test.toml")).unwrap();
        assert!(!config.reconnect);
        assert_eq!(config.scan_mode, ScanMode::Continuous);
        assert!(!config.scan.active);
        assert_eq!(config.scan.period_secs, 10);
        assert_eq!(config.scan.rescan_period_secs, 1);
        assert_eq!(config.connection.interval_min, 24);
        assert_eq!(config.connection.interval_max, 80);
        assert_eq!(config.pairing.max_attempts, Some(5));

        let TransportConfig::Mock(mock) = config.transport;
        assert_eq!(mock.gateways, vec!["gw-a", "gw-b"]);
        assert_eq!(mock.devices.len(), 1);
        assert_eq!(mock.devices[0].battery, 90);
        assert_eq!(mock.devices[0].services, vec![D600_SERVICE_UUID.to_string()]);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = OrchestratorConfig::from_toml_str("scan = 3", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse bad.toml"));
    }
}
