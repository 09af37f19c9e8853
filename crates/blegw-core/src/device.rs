//! Device descriptor for the supported scanner
//!
//! A [`DeviceProfile`] is the static description of a device type: which
//! service it advertises, its GATT layout, the characteristics the
//! orchestrator drives and the command values it writes. A
//! [`DeviceDescriptor`] pairs a profile with the connection settings in use
//! and a capability table whose handles are already resolved.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::advertisement::AdvRecord;
use crate::error::{GattError, GatewayError};
use crate::gatt::{properties, CharacteristicSpec, GattCapabilityTable, ServiceSpec};
use crate::transport::SubscriptionMode;

/// Service advertised by D600 scanners
pub const D600_SERVICE_UUID: &str = "f03c155f53d7b1acef4ef696b701b56c";

/// Characteristics the orchestrator reads, writes or subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    BatteryLevel,
    DeviceName,
    ScanControl,
    ScanData,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CharacteristicRole::BatteryLevel => "battery level",
            CharacteristicRole::DeviceName => "device name",
            CharacteristicRole::ScanControl => "scan control",
            CharacteristicRole::ScanData => "scan data",
        };
        f.write_str(name)
    }
}

/// Scanner reporting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// One read per trigger
    #[default]
    Single,
    /// Keep scanning until told otherwise
    Continuous,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Single => f.write_str("single"),
            ScanMode::Continuous => f.write_str("continuous"),
        }
    }
}

/// Connection interval settings applied to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Minimum connection interval (1.25ms units)
    #[serde(default = "default_interval_min")]
    pub interval_min: u16,

    /// Maximum connection interval (1.25ms units)
    #[serde(default = "default_interval_max")]
    pub interval_max: u16,

    /// Peripheral latency in connection events
    #[serde(default)]
    pub latency: u16,

    /// Supervision timeout (10ms units)
    #[serde(default = "default_supervision_timeout")]
    pub timeout: u16,
}

fn default_interval_min() -> u16 {
    16
}

fn default_interval_max() -> u16 {
    80
}

fn default_supervision_timeout() -> u16 {
    500
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            interval_min: default_interval_min(),
            interval_max: default_interval_max(),
            latency: 0,
            timeout: default_supervision_timeout(),
        }
    }
}

/// Parameters of a single connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParameters {
    pub device_id: String,
    pub device_type: u8,
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Binds a role to its characteristic and the handle the device exposes it on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleBinding {
    pub role: CharacteristicRole,
    pub service: &'static str,
    pub characteristic: &'static str,
    pub handle: u16,
    pub properties: u8,
}

/// Hex command values written to the scan control characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommands {
    /// Blink/beep so the operator can identify the device
    pub wink: &'static str,
    /// Put the reader into scanner mode
    pub scanner_mode: &'static str,
    /// Switch scanner mode to continuous reads
    pub continuous_scan: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub target_service: &'static str,
    pub services: &'static [ServiceSpec],
    pub roles: &'static [RoleBinding],
    /// Roles subscribed to once a device is configured
    pub subscriptions: &'static [CharacteristicRole],
    pub commands: DeviceCommands,
}

impl DeviceProfile {
    pub fn binding(&self, role: CharacteristicRole) -> Option<&RoleBinding> {
        self.roles.iter().find(|b| b.role == role)
    }
}

const GAP_SERVICE: &str = "0018";
const DEVICE_NAME: &str = "002a";
const BATTERY_SERVICE: &str = "0f18";
const BATTERY_LEVEL: &str = "192a";
const SCAN_DATA: &str = "a620150bfc5f78ba134671d8b8813ece";
const SCAN_CONTROL: &str = "ba49c41f8e4713814746a0bc64233a83";
const CONFIG_SERVICE: &str = "ca88c58fd616fd9a224ec7f7c985437a";

const fn characteristic(uuid: &'static str, name: &'static str) -> CharacteristicSpec {
    CharacteristicSpec {
        uuid,
        name,
        enabled: false,
    }
}

const D600_SERVICES: &[ServiceSpec] = &[
    ServiceSpec {
        uuid: GAP_SERVICE,
        characteristics: &[characteristic(DEVICE_NAME, "Device Name")],
    },
    ServiceSpec {
        uuid: BATTERY_SERVICE,
        characteristics: &[characteristic(BATTERY_LEVEL, "Battery Service")],
    },
    ServiceSpec {
        uuid: D600_SERVICE_UUID,
        characteristics: &[
            CharacteristicSpec {
                uuid: SCAN_DATA,
                name: "Scan Data",
                enabled: true,
            },
            characteristic(SCAN_CONTROL, "Scan Control"),
            characteristic("373c93921f591da87e4c1218c24b337c", "CCID Status"),
            characteristic("c09bcf780a0577bab140d6edfde9ac91", "CCID - PC to RDR"),
            characteristic("5abd46ae724a40bf1a4c55b8752dcab4", "CCID - RDR to PC"),
        ],
    },
    ServiceSpec {
        uuid: CONFIG_SERVICE,
        characteristics: &[characteristic("ce738dd2c771a8a0b24b6e3372fc5412", "D600 Config")],
    },
];

const D600_ROLES: &[RoleBinding] = &[
    RoleBinding {
        role: CharacteristicRole::BatteryLevel,
        service: BATTERY_SERVICE,
        characteristic: BATTERY_LEVEL,
        handle: 0x001a,
        properties: properties::READ | properties::NOTIFY,
    },
    RoleBinding {
        role: CharacteristicRole::DeviceName,
        service: GAP_SERVICE,
        characteristic: DEVICE_NAME,
        handle: 0x0006,
        properties: properties::READ,
    },
    RoleBinding {
        role: CharacteristicRole::ScanControl,
        service: D600_SERVICE_UUID,
        characteristic: SCAN_CONTROL,
        handle: 0x003f,
        properties: properties::WRITE,
    },
    RoleBinding {
        role: CharacteristicRole::ScanData,
        service: D600_SERVICE_UUID,
        characteristic: SCAN_DATA,
        handle: 0x0032,
        properties: properties::READ | properties::INDICATE,
    },
];

/// D600 RFID/NFC scanner
pub const D600_PROFILE: DeviceProfile = DeviceProfile {
    name: "D600",
    target_service: D600_SERVICE_UUID,
    services: D600_SERVICES,
    roles: D600_ROLES,
    subscriptions: &[CharacteristicRole::ScanData],
    commands: DeviceCommands {
        wink: "029f",
        scanner_mode: "03ae07",
        continuous_scan: "02a3",
    },
};

/// Device profile plus connection settings and a resolved capability table
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    profile: &'static DeviceProfile,
    connection: ConnectionSettings,
    gatt: GattCapabilityTable,
}

impl DeviceDescriptor {
    /// Build a descriptor, resolving the known handles of `profile`
    pub fn new(
        profile: &'static DeviceProfile,
        connection: ConnectionSettings,
    ) -> Result<Self, GattError> {
        let mut gatt = GattCapabilityTable::from_spec(profile.services);
        for binding in profile.roles {
            let reference = gatt.find(binding.service, binding.characteristic).ok_or_else(|| {
                GattError::UnknownCharacteristic {
                    service: binding.service.to_string(),
                    characteristic: binding.characteristic.to_string(),
                }
            })?;
            gatt.resolve(reference, binding.handle, binding.properties)?;
        }
        gatt.set_cached(true);

        let mut selection = Vec::new();
        for role in profile.subscriptions {
            if let Some(reference) = profile
                .binding(*role)
                .and_then(|b| gatt.find(b.service, b.characteristic))
            {
                selection.push(reference);
            }
        }
        gatt.select(&selection)?;

        Ok(Self {
            profile,
            connection,
            gatt,
        })
    }

    pub fn d600(connection: ConnectionSettings) -> Result<Self, GattError> {
        Self::new(&D600_PROFILE, connection)
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    pub fn gatt(&self) -> &GattCapabilityTable {
        &self.gatt
    }

    pub fn connection_parameters(&self, device_id: &str, device_type: u8) -> ConnectionParameters {
        ConnectionParameters {
            device_id: device_id.to_string(),
            device_type,
            interval_min: self.connection.interval_min,
            interval_max: self.connection.interval_max,
            latency: self.connection.latency,
            timeout: self.connection.timeout,
        }
    }

    /// Whether an advertisement belongs to this device type
    pub fn matches(&self, record: &AdvRecord) -> bool {
        record.advertises_service(self.profile.target_service)
    }

    /// Selected characteristics to subscribe to, indicating where supported
    pub fn subscriptions(&self) -> Vec<(u16, SubscriptionMode)> {
        self.gatt
            .selected()
            .into_iter()
            .filter_map(|c| {
                let mode = if c.properties.unwrap_or_default() & properties::INDICATE != 0 {
                    SubscriptionMode::Indication
                } else {
                    SubscriptionMode::Notification
                };
                Some((c.handle?, mode))
            })
            .collect()
    }

    /// Resolved handle for a role
    pub fn handle(&self, role: CharacteristicRole) -> Result<u16, GatewayError> {
        self.profile
            .binding(role)
            .and_then(|b| self.gatt.handle_of(b.service, b.characteristic))
            .ok_or(GatewayError::UnresolvedHandle { role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::{AdEntry, RawAdvReport};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_d600_handles_resolved() {
        let descriptor = DeviceDescriptor::d600(ConnectionSettings::default()).unwrap();
        assert!(descriptor.gatt().is_cached());
        assert_eq!(descriptor.handle(CharacteristicRole::BatteryLevel).unwrap(), 0x001a);
        assert_eq!(descriptor.handle(CharacteristicRole::DeviceName).unwrap(), 0x0006);
        assert_eq!(descriptor.handle(CharacteristicRole::ScanControl).unwrap(), 0x003f);
        assert_eq!(descriptor.handle(CharacteristicRole::ScanData).unwrap(), 0x0032);
    }

    #[test]
    fn test_d600_subscribes_to_scan_data() {
        let descriptor = DeviceDescriptor::d600(ConnectionSettings::default()).unwrap();
        let choices: Vec<_> = descriptor
            .gatt()
            .notification_choices()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(choices, vec!["Scan Data"]);
        assert_eq!(descriptor.gatt().services().len(), 4);
        assert_eq!(
            descriptor.subscriptions(),
            vec![(0x0032, SubscriptionMode::Indication)]
        );
    }

    #[test]
    fn test_connection_parameters() {
        let descriptor = DeviceDescriptor::d600(ConnectionSettings::default()).unwrap();
        let params = descriptor.connection_parameters("665544332211", 1);
        assert_eq!(
            params,
            ConnectionParameters {
                device_id: "665544332211".into(),
                device_type: 1,
                interval_min: 16,
                interval_max: 80,
                latency: 0,
                timeout: 500,
            }
        );
    }

    #[test]
    fn test_profile_without_binding_reports_unresolved() {
        static PROFILE: DeviceProfile = DeviceProfile {
            name: "bare",
            target_service: "aa00",
            services: &[],
            roles: &[],
            subscriptions: &[],
            commands: DeviceCommands {
                wink: "",
                scanner_mode: "",
                continuous_scan: "",
            },
        };
        let descriptor = DeviceDescriptor::new(&PROFILE, ConnectionSettings::default()).unwrap();
        let err = descriptor.handle(CharacteristicRole::ScanData).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UnresolvedHandle {
                role: CharacteristicRole::ScanData
            }
        ));
    }

    #[test]
    fn test_descriptor_matches_advertisement() {
        let descriptor = DeviceDescriptor::d600(ConnectionSettings::default()).unwrap();
        let raw = RawAdvReport {
            did: "665544332211".into(),
            dtype: 0,
            ev: 0,
            rssi: -40,
            tss: 0,
            tsus: 0,
            adv: vec![AdEntry::new(6, D600_SERVICE_UUID)],
            rsp: vec![],
        };
        assert!(descriptor.matches(&AdvRecord::from_report("gw", &raw)));
    }
}
