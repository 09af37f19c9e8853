//! GATT capability table
//!
//! The table is built once from a static declaration of the services and
//! characteristics a device type exposes. Only the handle and properties of
//! a characteristic change at runtime, and each is written at most once.

use serde::Serialize;

use crate::error::GattError;

/// Characteristic property bits
pub mod properties {
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
}

/// Static declaration of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicSpec {
    pub uuid: &'static str,
    pub name: &'static str,
    /// Whether the characteristic is offered for notification selection
    pub enabled: bool,
}

/// Static declaration of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSpec {
    pub uuid: &'static str,
    pub characteristics: &'static [CharacteristicSpec],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Characteristic {
    pub uuid: String,
    pub name: String,
    pub enabled: bool,
    pub selected: bool,
    handle: Option<u16>,
    properties: Option<u8>,
}

impl Characteristic {
    pub fn handle(&self) -> Option<u16> {
        self.handle
    }

    pub fn properties(&self) -> Option<u8> {
        self.properties
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub uuid: String,
    characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }
}

/// Position of a characteristic within the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicRef {
    pub service: usize,
    pub characteristic: usize,
}

/// Flattened view of a characteristic, as offered to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicInfo {
    #[serde(skip)]
    pub reference: CharacteristicRef,
    pub service_uuid: String,
    pub uuid: String,
    pub name: String,
    pub handle: Option<u16>,
    pub properties: Option<u8>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCapabilityTable {
    services: Vec<Service>,
    cached: bool,
}

impl GattCapabilityTable {
    /// Build the table from a static declaration
    pub fn from_spec(spec: &[ServiceSpec]) -> Self {
        let services = spec
            .iter()
            .map(|service| Service {
                uuid: service.uuid.to_string(),
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| Characteristic {
                        uuid: c.uuid.to_string(),
                        name: c.name.to_string(),
                        enabled: c.enabled,
                        selected: false,
                        handle: None,
                        properties: None,
                    })
                    .collect(),
            })
            .collect();
        Self {
            services,
            cached: false,
        }
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Service UUIDs in declaration order
    pub fn service_uuids(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.uuid.as_str()).collect()
    }

    /// Characteristics of the service at `service`
    pub fn characteristics_of(&self, service: usize) -> Vec<CharacteristicInfo> {
        self.services
            .get(service)
            .map(|s| {
                (0..s.characteristics.len())
                    .filter_map(|characteristic| {
                        self.info(CharacteristicRef {
                            service,
                            characteristic,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Characteristics offered for notification selection
    pub fn notification_choices(&self) -> Vec<CharacteristicInfo> {
        self.iter_refs()
            .filter(|r| self.get(*r).is_some_and(|c| c.enabled))
            .filter_map(|r| self.info(r))
            .collect()
    }

    /// Replace the current selection with `refs`
    pub fn select(&mut self, refs: &[CharacteristicRef]) -> Result<(), GattError> {
        for r in refs {
            self.get(*r).ok_or(GattError::UnknownIndex {
                service: r.service,
                characteristic: r.characteristic,
            })?;
        }
        for service in &mut self.services {
            for characteristic in &mut service.characteristics {
                characteristic.selected = false;
            }
        }
        for r in refs {
            if let Some(c) = self.get_mut(*r) {
                c.selected = true;
            }
        }
        Ok(())
    }

    /// Enabled characteristics currently selected
    pub fn selected(&self) -> Vec<CharacteristicInfo> {
        self.iter_refs()
            .filter(|r| self.get(*r).is_some_and(|c| c.enabled && c.selected))
            .filter_map(|r| self.info(r))
            .collect()
    }

    /// Locate a characteristic by service and characteristic UUID
    pub fn find(&self, service_uuid: &str, characteristic_uuid: &str) -> Option<CharacteristicRef> {
        let service = self.services.iter().position(|s| s.uuid == service_uuid)?;
        let characteristic = self.services[service]
            .characteristics
            .iter()
            .position(|c| c.uuid == characteristic_uuid)?;
        Some(CharacteristicRef {
            service,
            characteristic,
        })
    }

    /// Record the discovered handle and properties of a characteristic
    pub fn resolve(
        &mut self,
        reference: CharacteristicRef,
        handle: u16,
        properties: u8,
    ) -> Result<(), GattError> {
        let characteristic = self.get_mut(reference).ok_or(GattError::UnknownIndex {
            service: reference.service,
            characteristic: reference.characteristic,
        })?;
        if characteristic.handle.is_some() {
            return Err(GattError::AlreadyResolved {
                characteristic: characteristic.uuid.clone(),
            });
        }
        characteristic.handle = Some(handle);
        characteristic.properties = Some(properties);
        Ok(())
    }

    /// Handle of a characteristic, if it has been resolved
    pub fn handle_of(&self, service_uuid: &str, characteristic_uuid: &str) -> Option<u16> {
        self.find(service_uuid, characteristic_uuid)
            .and_then(|r| self.get(r))
            .and_then(|c| c.handle)
    }

    /// Whether handles have been discovered for this table
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    fn get(&self, r: CharacteristicRef) -> Option<&Characteristic> {
        self.services.get(r.service)?.characteristics.get(r.characteristic)
    }

    fn get_mut(&mut self, r: CharacteristicRef) -> Option<&mut Characteristic> {
        self.services
            .get_mut(r.service)?
            .characteristics
            .get_mut(r.characteristic)
    }

    fn iter_refs(&self) -> impl Iterator<Item = CharacteristicRef> + '_ {
        self.services.iter().enumerate().flat_map(|(service, s)| {
            (0..s.characteristics.len()).map(move |characteristic| CharacteristicRef {
                service,
                characteristic,
            })
        })
    }

    fn info(&self, r: CharacteristicRef) -> Option<CharacteristicInfo> {
        let service = self.services.get(r.service)?;
        let c = service.characteristics.get(r.characteristic)?;
        Some(CharacteristicInfo {
            reference: r,
            service_uuid: service.uuid.clone(),
            uuid: c.uuid.clone(),
            name: c.name.clone(),
            handle: c.handle,
            properties: c.properties,
            selected: c.selected,
        })
    }
}
