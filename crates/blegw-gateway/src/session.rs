//! Per-gateway session state

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use blegw_core::{AdvRegistry, GatewayTransport, IndicationReassembler};
use parking_lot::Mutex;

/// A device connected through a gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectedDevice {
    pub name: String,
    /// Last battery reading in percent
    pub battery: u8,
}

/// Mutable state of one gateway session
#[derive(Debug, Default)]
pub struct GatewaySession {
    pub gateway_id: String,
    /// Target devices seen during the current scan
    pub registry: AdvRegistry,
    pub connected: HashMap<String, ConnectedDevice>,
    pub indications: IndicationReassembler,
    pub scan_complete: bool,
}

impl GatewaySession {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            ..Self::default()
        }
    }

    /// Reset discovery state for a new scan
    pub fn begin_scan(&mut self) {
        self.registry.clear();
        self.scan_complete = false;
    }

    /// Register a freshly connected device with no name and zero battery
    pub fn register_connected(&mut self, device_id: &str) {
        self.connected
            .insert(device_id.to_string(), ConnectedDevice::default());
    }

    pub fn remove_connected(&mut self, device_id: &str) -> Option<ConnectedDevice> {
        self.indications.clear(device_id);
        self.connected.remove(device_id)
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.connected.contains_key(device_id)
    }
}

/// A gateway session shared between its message loop and pipeline tasks
pub struct SessionHandle {
    gateway_id: String,
    transport: Arc<dyn GatewayTransport>,
    state: Mutex<GatewaySession>,
    pipeline_active: AtomicBool,
}

/// Exclusive claim on a session's connect pipeline, released on drop
pub struct PipelineSlot(Arc<SessionHandle>);

impl Drop for PipelineSlot {
    fn drop(&mut self) {
        self.0.pipeline_active.store(false, Ordering::Release);
    }
}

impl SessionHandle {
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        let gateway_id = transport.gateway_id().to_string();
        Self {
            state: Mutex::new(GatewaySession::new(gateway_id.clone())),
            gateway_id,
            transport,
            pipeline_active: AtomicBool::new(false),
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn transport(&self) -> &Arc<dyn GatewayTransport> {
        &self.transport
    }

    /// Run `f` with the session state locked. Never hold the lock across an await.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut GatewaySession) -> R) -> R {
        f(&mut *self.state.lock())
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.state.lock().is_connected(device_id)
    }

    pub fn connected_device(&self, device_id: &str) -> Option<ConnectedDevice> {
        self.state.lock().connected.get(device_id).cloned()
    }

    /// Update a connected device; no-op if it has dropped in the meantime
    pub fn update_connected(&self, device_id: &str, f: impl FnOnce(&mut ConnectedDevice)) -> bool {
        match self.state.lock().connected.get_mut(device_id) {
            Some(device) => {
                f(device);
                true
            }
            None => false,
        }
    }

    /// Claim the pipeline slot; `None` while another pipeline holds it
    pub fn try_claim_pipeline(self: &Arc<Self>) -> Option<PipelineSlot> {
        self.pipeline_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PipelineSlot(self.clone()))
    }

    pub fn pipeline_active(&self) -> bool {
        self.pipeline_active.load(Ordering::Acquire)
    }
}
