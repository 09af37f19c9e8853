//! Gateway transport traits and message types
//!
//! A [`GatewayAccount`] authenticates against the gateway cloud and hands out
//! one [`GatewayTransport`] per gateway. Asynchronous events and reports are
//! delivered on a single-consumer channel obtained with
//! [`GatewayTransport::take_incoming`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::advertisement::RawAdvReport;
use crate::device::ConnectionParameters;
use crate::error::TransportError;

/// Account credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Scan control; a zero period stops an active scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    pub active: bool,
    pub period_secs: u32,
}

impl ScanRequest {
    pub fn start(active: bool, period_secs: u32) -> Self {
        Self {
            active,
            period_secs,
        }
    }

    pub fn stop(active: bool) -> Self {
        Self {
            active,
            period_secs: 0,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.period_secs == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectTarget {
    Device(String),
    /// Every node connected to the gateway
    All,
}

impl fmt::Display for DisconnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectTarget::Device(did) => f.write_str(did),
            DisconnectTarget::All => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PairOp {
    Unpair = 0,
    Pair = 1,
}

/// Pairing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairRequest {
    pub device_id: String,
    pub op: PairOp,
    pub bonding: bool,
    pub mitm: bool,
    pub secure: bool,
    pub oob: bool,
    /// Key distribution, initiator side
    pub initiator_keys: u8,
    /// Key distribution, responder side
    pub responder_keys: u8,
}

impl PairRequest {
    /// Bonding without MITM protection, secure connections or OOB data
    pub fn bond(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            op: PairOp::Pair,
            bonding: true,
            mitm: false,
            secure: false,
            oob: false,
            initiator_keys: 1,
            responder_keys: 1,
        }
    }

    pub fn unpair(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            op: PairOp::Unpair,
            bonding: false,
            mitm: false,
            secure: false,
            oob: false,
            initiator_keys: 0,
            responder_keys: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionMode {
    /// Acknowledged updates
    Indication,
    Notification,
}

/// Characteristic value update carried by an indication or notification report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNotification {
    #[serde(default)]
    pub handle: u16,
    pub value: String,
    #[serde(default)]
    pub tss: i64,
    #[serde(default)]
    pub tsus: u32,
}

/// Asynchronous gateway event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Disconnected { node: String, reason: u8 },
    EncryptionChanged { node: String, subcode: u8 },
    ScanComplete,
    Other { code: u16 },
}

impl GatewayEvent {
    pub const DISCONNECT: u16 = 1;
    pub const ENCRYPTION_CHANGE: u16 = 19;
    pub const SCAN_COMPLETE: u16 = 39;

    pub fn code(&self) -> u16 {
        match self {
            GatewayEvent::Disconnected { .. } => Self::DISCONNECT,
            GatewayEvent::EncryptionChanged { .. } => Self::ENCRYPTION_CHANGE,
            GatewayEvent::ScanComplete => Self::SCAN_COMPLETE,
            GatewayEvent::Other { code } => *code,
        }
    }
}

/// Asynchronous gateway report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReport {
    Advertisement(Vec<RawAdvReport>),
    Indication {
        node: String,
        notifications: Vec<RawNotification>,
    },
    Notification {
        node: String,
        notifications: Vec<RawNotification>,
    },
    Other { code: u16 },
}

impl GatewayReport {
    pub const ADVERTISEMENT: u16 = 1;
    pub const INDICATION: u16 = 26;
    pub const NOTIFICATION: u16 = 27;

    pub fn code(&self) -> u16 {
        match self {
            GatewayReport::Advertisement(_) => Self::ADVERTISEMENT,
            GatewayReport::Indication { .. } => Self::INDICATION,
            GatewayReport::Notification { .. } => Self::NOTIFICATION,
            GatewayReport::Other { code } => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMessage {
    Event(GatewayEvent),
    Report(GatewayReport),
}

/// Cloud account giving access to gateways
#[async_trait]
pub trait GatewayAccount: Send + Sync {
    /// Authenticate with a cached session, returning the gateway ids
    async fn auth(&self, credentials: &Credentials) -> Result<Vec<String>, TransportError>;

    /// Log in with user and password, returning the gateway ids
    async fn login(&self, credentials: &Credentials) -> Result<Vec<String>, TransportError>;

    async fn logout(&self) -> Result<(), TransportError>;

    fn is_logged_in(&self) -> bool;

    /// Transport for one gateway of this account
    fn gateway(&self, gateway_id: &str) -> std::sync::Arc<dyn GatewayTransport>;
}

/// Connection to a single gateway
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    fn gateway_id(&self) -> &str;

    async fn auth(&self, credentials: &Credentials) -> Result<(), TransportError>;

    async fn open(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Firmware version, failing if the gateway does not answer in `timeout`
    async fn version(&self, timeout: Duration) -> Result<String, TransportError>;

    /// Device ids of the nodes currently connected to the gateway
    async fn show(&self) -> Result<Vec<String>, TransportError>;

    async fn list(&self, request: ScanRequest) -> Result<(), TransportError>;

    async fn connect(&self, params: &ConnectionParameters) -> Result<(), TransportError>;

    async fn disconnect(&self, target: DisconnectTarget) -> Result<(), TransportError>;

    async fn pair(&self, request: &PairRequest) -> Result<(), TransportError>;

    /// Read a characteristic, returning its value as hex
    async fn read(&self, device_id: &str, handle: u16) -> Result<String, TransportError>;

    async fn write(&self, device_id: &str, handle: u16, value: &str)
        -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        device_id: &str,
        handle: u16,
        mode: SubscriptionMode,
    ) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Whether the gateway is reachable over the open connection
    fn is_live(&self) -> bool;

    /// Take the event/report channel; only the first call gets it
    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<GatewayMessage>>;
}
