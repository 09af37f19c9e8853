//! Shared orchestrator context handed to every gateway session

use std::sync::Arc;

use parking_lot::Mutex;

use blegw_core::{AdvRecord, AdvRegistry, DeviceDescriptor, DeviceStatusTracker};

use crate::config::OrchestratorConfig;
use crate::report::Reporter;
use crate::selection::DeviceSelector;
use crate::shutdown::ShutdownSignal;

/// Operator selection state shared by all gateways
#[derive(Debug)]
pub struct SelectionState {
    /// Offer the selection menu after each scan; cleared once devices are picked
    pub interactive: bool,
    /// Devices to keep reconnecting to
    pub selected: AdvRegistry,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            interactive: true,
            selected: AdvRegistry::new(),
        }
    }
}

impl SelectionState {
    /// Leave interactive mode and add `devices` to the reconnect set
    pub fn freeze(&mut self, devices: &[AdvRecord]) {
        self.interactive = false;
        self.selected.merge(devices.iter().cloned());
    }
}

#[derive(Clone)]
pub struct OrchestratorContext {
    pub config: Arc<OrchestratorConfig>,
    pub descriptor: Arc<DeviceDescriptor>,
    pub tracker: DeviceStatusTracker,
    pub selection: Arc<Mutex<SelectionState>>,
    pub shutdown: ShutdownSignal,
    pub reporter: Arc<dyn Reporter>,
    pub selector: Arc<dyn DeviceSelector>,
}

impl OrchestratorContext {
    pub fn new(
        config: OrchestratorConfig,
        descriptor: DeviceDescriptor,
        reporter: Arc<dyn Reporter>,
        selector: Arc<dyn DeviceSelector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            descriptor: Arc::new(descriptor),
            tracker: DeviceStatusTracker::new(),
            selection: Arc::new(Mutex::new(SelectionState::default())),
            shutdown: ShutdownSignal::new(),
            reporter,
            selector,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.selection.lock().interactive
    }
}
