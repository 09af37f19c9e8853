//! Error types for gateway operations

use std::fmt;

use thiserror::Error;

use crate::convert::display_address;
use crate::device::CharacteristicRole;

/// Result type for orchestrator operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result code reported when a polled task does not complete in time
pub const TASK_TIMEOUT_CODE: u16 = 408;

/// Errors reported by a gateway transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The gateway (or the cloud account) rejected the request
    #[error("Request rejected (code {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Gateway connection is not open")]
    NotOpen,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Transport kind not available in this build
    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

/// Errors raised while decoding device payloads
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Empty payload")]
    Empty,
}

/// Errors raised by the GATT capability table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("Unknown characteristic {characteristic} in service {service}")]
    UnknownCharacteristic {
        service: String,
        characteristic: String,
    },

    #[error("No characteristic at service #{service}, characteristic #{characteristic}")]
    UnknownIndex {
        service: usize,
        characteristic: usize,
    },

    /// Handles are discovered once and never rewritten
    #[error("Handle for characteristic {characteristic} is already resolved")]
    AlreadyResolved { characteristic: String },
}

/// Steps of the per-device configuration sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureStep {
    ReadBattery,
    Wink,
    ReadName,
    EnableScanner,
    ContinuousMode,
    Subscribe,
}

impl fmt::Display for ConfigureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigureStep::ReadBattery => "battery read",
            ConfigureStep::Wink => "wink",
            ConfigureStep::ReadName => "name read",
            ConfigureStep::EnableScanner => "scanner enable",
            ConfigureStep::ContinuousMode => "continuous scan mode",
            ConfigureStep::Subscribe => "indication subscribe",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A gateway-level transport call failed
    #[error("[{gateway}] {operation} failed: {source}")]
    Transport {
        gateway: String,
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Connection fail:[{}]: {source}", display_address(.device))]
    Connect {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error("Pairing failed:[{}] after {attempts} attempt(s): {source}", display_address(.device))]
    Pair {
        device: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Pairing cancelled:[{}]", display_address(.device))]
    PairCancelled { device: String },

    #[error("Config error:[{}] {step}: {source}", display_address(.device))]
    Configure {
        device: String,
        step: ConfigureStep,
        #[source]
        source: TransportError,
    },

    #[error("Decode error:[{}]: {source}", display_address(.device))]
    Decode {
        device: String,
        #[source]
        source: DecodeError,
    },

    #[error("No handle resolved for {role}")]
    UnresolvedHandle { role: CharacteristicRole },

    #[error("[{gateway}] shutdown failed: {source}")]
    Shutdown {
        gateway: String,
        #[source]
        source: TransportError,
    },

    #[error("Task did not complete within {waited_ms}ms")]
    TaskTimeout { waited_ms: u64 },

    #[error(transparent)]
    Gatt(#[from] GattError),
}

impl GatewayError {
    /// Numeric result code for errors that carry one
    pub fn result_code(&self) -> Option<u16> {
        match self {
            GatewayError::TaskTimeout { .. } => Some(TASK_TIMEOUT_CODE),
            _ => None,
        }
    }
}
