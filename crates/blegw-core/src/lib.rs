//! blegw-core - Core types for the BLE gateway orchestrator
//!
//! This crate holds the gateway-independent pieces of the orchestrator:
//! advertisement parsing and the per-gateway registry, the GATT capability
//! table, the device descriptor for the supported scanner, the connection
//! status tracker, indication reassembly/decoding and the transport traits
//! a gateway backend has to implement.

pub mod advertisement;
pub mod convert;
pub mod device;
pub mod error;
pub mod gatt;
pub mod indication;
pub mod status;
pub mod transport;

pub use advertisement::{AdEntry, AdvRecord, AdvRegistry, RawAdvReport};
pub use device::{
    CharacteristicRole, ConnectionParameters, ConnectionSettings, DeviceDescriptor, DeviceProfile,
    ScanMode, D600_PROFILE, D600_SERVICE_UUID,
};
pub use error::{ConfigureStep, DecodeError, GattError, GatewayError, TransportError};
pub use gatt::{CharacteristicRef, GattCapabilityTable};
pub use indication::{decode_card_read, printable_hex_ascii, CardRead, IndicationReassembler};
pub use status::{DeviceStatus, DeviceStatusTracker};
pub use transport::{
    Credentials, DisconnectTarget, GatewayAccount, GatewayEvent, GatewayMessage, GatewayReport,
    GatewayTransport, PairRequest, RawNotification, ScanRequest, SubscriptionMode,
};
