//! Mock gateway account and transport for testing and demos
//!
//! Every mock gateway sees the same set of simulated devices. Scans report
//! them once and complete after the scan period; subscribed scanners emit
//! their configured card reads as fragmented indications.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use blegw_core::advertisement::{AdEntry, AD_TYPE_COMPLETE_NAME, AD_TYPE_SERVICE_UUIDS};
use blegw_core::{
    CharacteristicRole, ConnectionParameters, Credentials, DisconnectTarget, GatewayAccount,
    GatewayEvent, GatewayMessage, GatewayReport, GatewayTransport, PairRequest, RawAdvReport,
    RawNotification, ScanRequest, SubscriptionMode, TransportError, D600_PROFILE,
};

use crate::config::{MockConfig, MockDevice};

/// HCI reason "connection terminated by local host"
const LOCAL_HOST_TERMINATED: u8 = 0x16;

fn profile_handle(role: CharacteristicRole) -> u16 {
    D600_PROFILE.binding(role).map(|b| b.handle).unwrap_or_default()
}

// =============================================================================
// Account
// =============================================================================

pub struct MockGatewayAccount {
    config: MockConfig,
    logged_in: AtomicBool,
    gateways: Mutex<HashMap<String, Arc<MockGatewayTransport>>>,
}

impl MockGatewayAccount {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            config: config.clone(),
            logged_in: AtomicBool::new(false),
            gateways: Mutex::new(HashMap::new()),
        }
    }

    /// Concrete transport for a gateway, created on first use
    pub fn transport(&self, gateway_id: &str) -> Arc<MockGatewayTransport> {
        self.gateways
            .lock()
            .entry(gateway_id.to_string())
            .or_insert_with(|| Arc::new(MockGatewayTransport::new(gateway_id, &self.config)))
            .clone()
    }

    async fn delay(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

#[async_trait]
impl GatewayAccount for MockGatewayAccount {
    async fn auth(&self, _credentials: &Credentials) -> Result<Vec<String>, TransportError> {
        self.delay().await;
        if !self.config.session_cached {
            return Err(TransportError::AuthFailed("no cached session".to_string()));
        }
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(self.config.gateways.clone())
    }

    async fn login(&self, credentials: &Credentials) -> Result<Vec<String>, TransportError> {
        self.delay().await;
        if credentials.user.is_empty() {
            return Err(TransportError::AuthFailed("user name required".to_string()));
        }
        if let Some(expected) = &self.config.password {
            if expected != &credentials.password {
                return Err(TransportError::AuthFailed("invalid credentials".to_string()));
            }
        }
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(self.config.gateways.clone())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.delay().await;
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn gateway(&self, gateway_id: &str) -> Arc<dyn GatewayTransport> {
        self.transport(gateway_id)
    }
}

// =============================================================================
// Gateway transport
// =============================================================================

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Auth,
    Open,
    Close,
    Version,
    Show,
    List,
    Connect,
    Disconnect,
    Pair,
    Read,
    Write,
    Subscribe,
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Auth,
    Open,
    Close,
    Version,
    Show,
    List(ScanRequest),
    Connect(ConnectionParameters),
    Disconnect(DisconnectTarget),
    Pair(PairRequest),
    Read {
        device_id: String,
        handle: u16,
    },
    Write {
        device_id: String,
        handle: u16,
        value: String,
    },
    Subscribe {
        device_id: String,
        handle: u16,
        mode: SubscriptionMode,
    },
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::Auth => MockOp::Auth,
            MockCall::Open => MockOp::Open,
            MockCall::Close => MockOp::Close,
            MockCall::Version => MockOp::Version,
            MockCall::Show => MockOp::Show,
            MockCall::List(_) => MockOp::List,
            MockCall::Connect(_) => MockOp::Connect,
            MockCall::Disconnect(_) => MockOp::Disconnect,
            MockCall::Pair(_) => MockOp::Pair,
            MockCall::Read { .. } => MockOp::Read,
            MockCall::Write { .. } => MockOp::Write,
            MockCall::Subscribe { .. } => MockOp::Subscribe,
        }
    }
}

pub struct MockGatewayTransport {
    gateway_id: String,
    config: MockConfig,
    open: AtomicBool,
    live: AtomicBool,
    incoming_tx: mpsc::UnboundedSender<GatewayMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayMessage>>>,
    connected: RwLock<HashSet<String>>,
    /// Scripted read values, by device and handle
    reads: RwLock<HashMap<(String, u16), String>>,
    /// Remaining injected failures per operation
    failures: Mutex<HashMap<MockOp, u32>>,
    calls: Mutex<Vec<MockCall>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    card_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MockGatewayTransport {
    pub fn new(gateway_id: &str, config: &MockConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            gateway_id: gateway_id.to_string(),
            config: config.clone(),
            open: AtomicBool::new(false),
            live: AtomicBool::new(true),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            connected: RwLock::new(HashSet::new()),
            reads: RwLock::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            scan_task: Mutex::new(None),
            card_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_next(&self, op: MockOp, times: u32) {
        self.failures.lock().insert(op, times);
    }

    /// Script the value returned when reading `handle` on a device
    pub fn set_read(&self, device_id: &str, handle: u16, value: &str) {
        self.reads
            .write()
            .insert((device_id.to_string(), handle), value.to_string());
    }

    /// Deliver a message as if the gateway had sent it
    pub fn inject(&self, msg: GatewayMessage) {
        let _ = self.incoming_tx.send(msg);
    }

    /// Simulate a node that stayed connected from an earlier session
    pub fn attach_node(&self, device_id: &str) {
        self.connected.write().insert(device_id.to_string());
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls of one operation
    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op() == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn connected_devices(&self) -> Vec<String> {
        let mut devices: Vec<_> = self.connected.read().iter().cloned().collect();
        devices.sort();
        devices
    }

    fn device(&self, device_id: &str) -> Option<&MockDevice> {
        self.config.devices.iter().find(|d| d.did == device_id)
    }

    /// Record the call, apply latency and any injected failure
    async fn request(&self, call: MockCall) -> Result<(), TransportError> {
        let op = call.op();
        self.calls.lock().push(call);

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&op) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Rejected {
                        code: 500,
                        message: format!("injected {op:?} failure"),
                    });
                }
            }
        }

        if !matches!(op, MockOp::Auth | MockOp::Open | MockOp::Close)
            && !self.open.load(Ordering::SeqCst)
        {
            return Err(TransportError::NotOpen);
        }
        Ok(())
    }

    fn require_connected(&self, device_id: &str) -> Result<(), TransportError> {
        if self.connected.read().contains(device_id) {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                code: 404,
                message: format!("device {device_id} not connected"),
            })
        }
    }

    fn drop_node(&self, device_id: &str) {
        if let Some(task) = self.card_tasks.lock().remove(device_id) {
            task.abort();
        }
        self.inject(GatewayMessage::Event(GatewayEvent::Disconnected {
            node: device_id.to_string(),
            reason: LOCAL_HOST_TERMINATED,
        }));
    }

    fn stop_tasks(&self) {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
        for (_, task) in self.card_tasks.lock().drain() {
            task.abort();
        }
    }

    /// Start emitting card reads for a device; a running emitter is kept
    fn spawn_card_reads(&self, device: &MockDevice) {
        let mut card_tasks = self.card_tasks.lock();
        if card_tasks
            .get(&device.did)
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }

        let tx = self.incoming_tx.clone();
        let node = device.did.clone();
        let reads = device.card_reads.clone();
        let interval = Duration::from_millis(self.config.card_interval_ms);
        let fragment_len = (self.config.fragment_len.max(2)) & !1;

        let task = tokio::spawn(async move {
            for text in reads.iter().cycle() {
                tokio::time::sleep(interval).await;
                let value = format!("{}00", hex::encode(text));
                let now = Utc::now();
                let fragments = value.as_bytes().chunks(fragment_len).map(|chunk| RawNotification {
                    handle: profile_handle(CharacteristicRole::ScanData),
                    value: String::from_utf8_lossy(chunk).into_owned(),
                    tss: now.timestamp(),
                    tsus: now.timestamp_subsec_micros(),
                });
                for notification in fragments {
                    let report = GatewayReport::Indication {
                        node: node.clone(),
                        notifications: vec![notification],
                    };
                    if tx.send(GatewayMessage::Report(report)).is_err() {
                        return;
                    }
                }
            }
        });

        card_tasks.insert(device.did.clone(), task);
    }
}

fn advertisement(device: &MockDevice) -> RawAdvReport {
    let now = Utc::now();
    let mut adv = vec![AdEntry::new(0x01, "06")];
    adv.extend(
        device
            .services
            .iter()
            .map(|uuid| AdEntry::new(AD_TYPE_SERVICE_UUIDS, uuid.as_str())),
    );
    if !device.name.is_empty() {
        adv.push(AdEntry::new(AD_TYPE_COMPLETE_NAME, device.name.as_str()));
    }
    RawAdvReport {
        did: device.did.clone(),
        dtype: device.dtype,
        ev: 0,
        rssi: device.rssi,
        tss: now.timestamp(),
        tsus: now.timestamp_subsec_micros(),
        adv,
        rsp: Vec::new(),
    }
}

#[async_trait]
impl GatewayTransport for MockGatewayTransport {
    fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    async fn auth(&self, _credentials: &Credentials) -> Result<(), TransportError> {
        self.request(MockCall::Auth).await
    }

    async fn open(&self) -> Result<(), TransportError> {
        self.request(MockCall::Open).await?;
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.request(MockCall::Close).await?;
        self.stop_tasks();
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn version(&self, timeout: Duration) -> Result<String, TransportError> {
        self.request(MockCall::Version).await?;
        if !self.live.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(format!(
                "gateway did not answer within {}ms",
                timeout.as_millis()
            )));
        }
        Ok(self.config.version.clone())
    }

    async fn show(&self) -> Result<Vec<String>, TransportError> {
        self.request(MockCall::Show).await?;
        Ok(self.connected_devices())
    }

    async fn list(&self, request: ScanRequest) -> Result<(), TransportError> {
        self.request(MockCall::List(request)).await?;
        let mut scan_task = self.scan_task.lock();
        if let Some(task) = scan_task.take() {
            task.abort();
        }
        if request.is_stop() {
            return Ok(());
        }

        let tx = self.incoming_tx.clone();
        let reports: Vec<_> = self.config.devices.iter().map(advertisement).collect();
        let period = Duration::from_secs(u64::from(request.period_secs));
        *scan_task = Some(tokio::spawn(async move {
            if !reports.is_empty() {
                let _ = tx.send(GatewayMessage::Report(GatewayReport::Advertisement(reports)));
            }
            tokio::time::sleep(period).await;
            let _ = tx.send(GatewayMessage::Event(GatewayEvent::ScanComplete));
        }));
        Ok(())
    }

    async fn connect(&self, params: &ConnectionParameters) -> Result<(), TransportError> {
        self.request(MockCall::Connect(params.clone())).await?;
        if self.device(&params.device_id).is_none() {
            return Err(TransportError::Rejected {
                code: 404,
                message: format!("device {} not in range", params.device_id),
            });
        }
        self.connected.write().insert(params.device_id.clone());
        Ok(())
    }

    async fn disconnect(&self, target: DisconnectTarget) -> Result<(), TransportError> {
        self.request(MockCall::Disconnect(target.clone())).await?;
        let removed: Vec<String> = match &target {
            DisconnectTarget::Device(device_id) => {
                if self.connected.write().remove(device_id) {
                    vec![device_id.clone()]
                } else {
                    Vec::new()
                }
            }
            DisconnectTarget::All => self.connected.write().drain().collect(),
        };
        for device_id in removed {
            self.drop_node(&device_id);
        }
        Ok(())
    }

    async fn pair(&self, request: &PairRequest) -> Result<(), TransportError> {
        self.request(MockCall::Pair(request.clone())).await?;
        self.require_connected(&request.device_id)
    }

    async fn read(&self, device_id: &str, handle: u16) -> Result<String, TransportError> {
        self.request(MockCall::Read {
            device_id: device_id.to_string(),
            handle,
        })
        .await?;
        self.require_connected(device_id)?;

        if let Some(value) = self.reads.read().get(&(device_id.to_string(), handle)) {
            return Ok(value.clone());
        }
        let device = self.device(device_id).ok_or(TransportError::Rejected {
            code: 404,
            message: format!("device {device_id} not in range"),
        })?;
        if handle == profile_handle(CharacteristicRole::BatteryLevel) {
            Ok(format!("{:02x}", device.battery))
        } else if handle == profile_handle(CharacteristicRole::DeviceName) {
            Ok(hex::encode(&device.name))
        } else {
            Err(TransportError::Rejected {
                code: 2,
                message: format!("read not permitted on handle 0x{handle:04x}"),
            })
        }
    }

    async fn write(&self, device_id: &str, handle: u16, value: &str) -> Result<(), TransportError> {
        self.request(MockCall::Write {
            device_id: device_id.to_string(),
            handle,
            value: value.to_string(),
        })
        .await?;
        self.require_connected(device_id)
    }

    async fn subscribe(
        &self,
        device_id: &str,
        handle: u16,
        mode: SubscriptionMode,
    ) -> Result<(), TransportError> {
        self.request(MockCall::Subscribe {
            device_id: device_id.to_string(),
            handle,
            mode,
        })
        .await?;
        self.require_connected(device_id)?;

        if mode == SubscriptionMode::Indication
            && handle == profile_handle(CharacteristicRole::ScanData)
        {
            if let Some(device) = self.device(device_id).filter(|d| !d.card_reads.is_empty()) {
                self.spawn_card_reads(device);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<GatewayMessage>> {
        self.incoming_rx.lock().take()
    }
}

impl Drop for MockGatewayTransport {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blegw_core::{AdvRecord, D600_SERVICE_UUID};
    use pretty_assertions::assert_eq;

    const D600: &str = "665544332211";

    fn params(device_id: &str) -> ConnectionParameters {
        ConnectionParameters {
            device_id: device_id.into(),
            device_type: 0,
            interval_min: 16,
            interval_max: 80,
            latency: 0,
            timeout: 500,
        }
    }

    async fn opened() -> MockGatewayTransport {
        let transport = MockGatewayTransport::new("gw", &MockConfig::default());
        transport.open().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_account_auth_and_login() {
        let account = MockGatewayAccount::new(&MockConfig {
            session_cached: false,
            password: Some("secret".into()),
            ..MockConfig::default()
        });
        let creds = Credentials::new("user@example.com", "wrong");
        assert!(account.auth(&creds).await.is_err());
        assert!(account.login(&creds).await.is_err());
        assert!(!account.is_logged_in());

        let creds = Credentials::new("user@example.com", "secret");
        assert_eq!(account.login(&creds).await.unwrap(), vec!["mock-gw-01"]);
        assert!(account.is_logged_in());
        account.logout().await.unwrap();
        assert!(!account.is_logged_in());
    }

    #[tokio::test]
    async fn test_requires_open() {
        let transport = MockGatewayTransport::new("gw", &MockConfig::default());
        assert_eq!(transport.show().await, Err(TransportError::NotOpen));
        transport.open().await.unwrap();
        assert_eq!(transport.show().await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_reports_then_completes() {
        let transport = opened().await;
        let mut rx = transport.take_incoming().unwrap();
        assert!(transport.take_incoming().is_none());

        transport.list(ScanRequest::start(true, 2)).await.unwrap();
        let GatewayMessage::Report(GatewayReport::Advertisement(reports)) = rx.recv().await.unwrap()
        else {
            panic!("expected advertisement report");
        };
        assert_eq!(reports.len(), 2);
        let record = AdvRecord::from_report("gw", &reports[0]);
        assert!(record.advertises_service(D600_SERVICE_UUID));
        assert_eq!(record.name, "D600-Sensor");

        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayMessage::Event(GatewayEvent::ScanComplete)
        );
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let transport = opened().await;
        transport.fail_next(MockOp::Connect, 1);
        assert!(matches!(
            transport.connect(&params(D600)).await,
            Err(TransportError::Rejected { code: 500, .. })
        ));
        transport.connect(&params(D600)).await.unwrap();
        assert_eq!(transport.connected_devices(), vec![D600]);
        assert_eq!(transport.calls_of(MockOp::Connect).len(), 2);
    }

    #[tokio::test]
    async fn test_reads() {
        let transport = opened().await;
        transport.connect(&params(D600)).await.unwrap();
        assert_eq!(transport.read(D600, 0x001a).await.unwrap(), "5a");
        assert_eq!(
            transport.read(D600, 0x0006).await.unwrap(),
            hex::encode("D600-Sensor")
        );

        transport.set_read(D600, 0x001a, "32");
        assert_eq!(transport.read(D600, 0x001a).await.unwrap(), "32");
        assert!(transport.read(D600, 0x0099).await.is_err());
        assert!(transport.read("0a0b0c0d0e0f", 0x001a).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_all_emits_events() {
        let transport = opened().await;
        let mut rx = transport.take_incoming().unwrap();
        transport.attach_node(D600);
        assert_eq!(transport.show().await.unwrap(), vec![D600]);

        transport.disconnect(DisconnectTarget::All).await.unwrap();
        assert!(transport.connected_devices().is_empty());
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayMessage::Event(GatewayEvent::Disconnected {
                node: D600.into(),
                reason: LOCAL_HOST_TERMINATED,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_card_reads_are_fragmented() {
        let config = MockConfig {
            fragment_len: 8,
            card_interval_ms: 100,
            ..MockConfig::default()
        };
        let transport = MockGatewayTransport::new("gw", &config);
        transport.open().await.unwrap();
        let mut rx = transport.take_incoming().unwrap();
        transport.connect(&params(D600)).await.unwrap();
        transport
            .subscribe(D600, 0x0032, SubscriptionMode::Indication)
            .await
            .unwrap();

        let expected = format!("{}00", hex::encode("01046A2B3C4D5E6F"));
        let mut value = String::new();
        while !value.ends_with("00") {
            match rx.recv().await.unwrap() {
                GatewayMessage::Report(GatewayReport::Indication { notifications, .. }) => {
                    assert!(notifications[0].value.len() <= 8);
                    value.push_str(&notifications[0].value);
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(value, expected);
    }
}
