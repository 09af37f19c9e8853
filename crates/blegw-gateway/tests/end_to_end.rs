//! End-to-end tests against the simulated gateway
//!
//! These drive the full orchestrator (scan, select, connect, pair, configure,
//! indications, shutdown) over the mock transport with tokio's paused clock,
//! so the scan windows and card read intervals elapse instantly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use blegw_core::advertisement::{AD_TYPE_COMPLETE_NAME, AD_TYPE_SERVICE_UUIDS};
use blegw_core::{
    AdEntry, AdvRecord, Credentials, DeviceDescriptor, DeviceStatus, GatewayAccount,
    GatewayEvent, GatewayMessage, GatewayReport, GatewayTransport, PairRequest, RawAdvReport,
    ScanRequest, D600_SERVICE_UUID,
};
use blegw_gateway::config::{MockConfig, OrchestratorConfig};
use blegw_gateway::dispatcher::EXIT_REQUESTED;
use blegw_gateway::orchestrator::NO_GATEWAYS;
use blegw_gateway::shutdown::wait_until;
use blegw_gateway::transport::mock::{MockCall, MockGatewayAccount, MockOp};
use blegw_gateway::{
    authenticate, AutoSelector, DeviceSelector, IndicationRecord, Orchestrator,
    OrchestratorContext, Reporter, SelectionAction, SessionHandle, SessionRunner,
};

const GATEWAY: &str = "mock-gw-01";
const D600: &str = "665544332211";
const ADDRESS: &str = "11:22:33:44:55:66";

/// Collects status lines and forwards card reads to the test
struct ChannelReporter {
    lines: Mutex<Vec<String>>,
    records: mpsc::UnboundedSender<IndicationRecord>,
    closed: AtomicBool,
}

impl ChannelReporter {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<IndicationRecord>) {
        let (records, rx) = mpsc::unbounded_channel();
        let reporter = Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            records,
            closed: AtomicBool::new(false),
        });
        (reporter, rx)
    }

    fn has_line(&self, line: &str) -> bool {
        self.lines.lock().iter().any(|l| l == line)
    }
}

impl Reporter for ChannelReporter {
    fn message(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn indication(&self, record: &IndicationRecord) {
        let _ = self.records.send(record.clone());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Always answers the menu the same way
struct FixedSelector(SelectionAction);

#[async_trait]
impl DeviceSelector for FixedSelector {
    async fn select_devices(&self, _gateway_id: &str, _candidates: &[AdvRecord]) -> SelectionAction {
        self.0.clone()
    }
}

fn credentials() -> Credentials {
    Credentials::new("operator@example.com", "secret")
}

fn context(
    config: &OrchestratorConfig,
    reporter: Arc<ChannelReporter>,
    selector: Arc<dyn DeviceSelector>,
) -> OrchestratorContext {
    let descriptor = DeviceDescriptor::d600(config.connection).unwrap();
    OrchestratorContext::new(config.clone(), descriptor, reporter, selector)
}

fn d600_advertisement() -> RawAdvReport {
    RawAdvReport {
        did: D600.into(),
        dtype: 0,
        ev: 0,
        rssi: -61,
        tss: 1_700_000_000,
        tsus: 0,
        adv: vec![
            AdEntry::new(AD_TYPE_SERVICE_UUIDS, D600_SERVICE_UUID),
            AdEntry::new(AD_TYPE_COMPLETE_NAME, "D600-Sensor"),
        ],
        rsp: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_select_connect_and_read_card() {
    let config = OrchestratorConfig::default();
    let account = Arc::new(MockGatewayAccount::new(&MockConfig::default()));
    let gateways = authenticate(account.as_ref(), &credentials()).await.unwrap();
    assert_eq!(gateways, vec![GATEWAY.to_string()]);

    let (reporter, mut records) = ChannelReporter::new();
    let ctx = context(&config, reporter.clone(), Arc::new(AutoSelector));
    let orchestrator = Orchestrator::new(account.clone(), ctx.clone());

    let watcher = async {
        let record = records.recv().await.unwrap();
        ctx.shutdown.trigger("test complete");
        record
    };
    let creds = credentials();
    let (reason, record) = tokio::join!(orchestrator.run(&gateways, &creds), watcher);

    assert_eq!(reason, "test complete");
    assert_eq!(record.gateway_id, GATEWAY);
    assert_eq!(record.device_id, D600);
    assert_eq!(record.name, "D600-Sensor");
    assert_eq!(record.battery, 90);
    assert!(record.card_type.starts_with("ISO 14443 type A"));
    assert_eq!(record.payload, "046A2B3C4D5E6F");
    assert_eq!(record.handle, 0x0032);
    assert_eq!(record.raw, format!("{}00", hex::encode("01046A2B3C4D5E6F")));

    for line in [
        format!("Connected:[{ADDRESS}]"),
        format!("Pair ok:[{ADDRESS}]"),
        format!("Battery:[{ADDRESS}][90%]"),
        format!("D600 Ready to Scan[{ADDRESS}]"),
        format!("[{GATEWAY}] test complete"),
    ] {
        assert!(reporter.has_line(&line), "missing line {line}");
    }

    {
        let selection = ctx.selection.lock();
        assert!(!selection.interactive);
        assert!(selection.selected.contains(D600));
    }

    // teardown
    let transport = account.transport(GATEWAY);
    assert!(!transport.is_open());
    assert!(transport.connected_devices().is_empty());
    assert!(!account.is_logged_in());
    assert!(reporter.closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_event_releases_device() {
    let config = OrchestratorConfig::default();
    let account = MockGatewayAccount::new(&MockConfig::default());
    let transport = account.transport(GATEWAY);
    transport.open().await.unwrap();

    let (reporter, _records) = ChannelReporter::new();
    let ctx = context(&config, reporter.clone(), Arc::new(AutoSelector));
    let session = Arc::new(SessionHandle::new(transport.clone()));
    let runner = SessionRunner::new(session.clone(), ctx.clone());

    runner
        .handle(GatewayMessage::Report(GatewayReport::Advertisement(vec![
            d600_advertisement(),
        ])))
        .await;
    runner
        .handle(GatewayMessage::Event(GatewayEvent::ScanComplete))
        .await;

    wait_until(Duration::from_millis(10), Duration::from_secs(10), || {
        session
            .connected_device(D600)
            .is_some_and(|device| device.name == "D600-Sensor" && device.battery == 90)
    })
    .await
    .unwrap();
    assert_eq!(ctx.tracker.status(D600), DeviceStatus::Connected);

    runner
        .handle(GatewayMessage::Event(GatewayEvent::Disconnected {
            node: D600.into(),
            reason: 0x13,
        }))
        .await;

    assert_eq!(ctx.tracker.status(D600), DeviceStatus::Unconnected);
    assert!(!session.is_connected(D600));
    assert!(reporter.has_line(&format!("Device disconnect event:[{ADDRESS}] reason 19")));
}

#[tokio::test(start_paused = true)]
async fn test_encryption_failure_forces_unpair() {
    let config = OrchestratorConfig::default();
    let account = MockGatewayAccount::new(&MockConfig::default());
    let transport = account.transport(GATEWAY);
    transport.open().await.unwrap();

    let (reporter, _records) = ChannelReporter::new();
    let ctx = context(&config, reporter, Arc::new(AutoSelector));
    let session = Arc::new(SessionHandle::new(transport.clone()));
    let runner = SessionRunner::new(session, ctx);
    transport.clear_calls();

    runner
        .handle(GatewayMessage::Event(GatewayEvent::EncryptionChanged {
            node: D600.into(),
            subcode: 0,
        }))
        .await;
    assert!(transport.calls().is_empty());

    runner
        .handle(GatewayMessage::Event(GatewayEvent::EncryptionChanged {
            node: D600.into(),
            subcode: 5,
        }))
        .await;
    assert_eq!(
        transport.calls(),
        vec![
            MockCall::List(ScanRequest::stop(true)),
            MockCall::Pair(PairRequest::unpair(D600)),
            MockCall::List(ScanRequest::start(true, 1)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exit_from_selection_shuts_down() {
    let config = OrchestratorConfig::default();
    let account = Arc::new(MockGatewayAccount::new(&MockConfig::default()));
    let (reporter, _records) = ChannelReporter::new();
    let ctx = context(&config, reporter, Arc::new(FixedSelector(SelectionAction::Exit)));

    let reason = Orchestrator::new(account.clone(), ctx)
        .run(&[GATEWAY.to_string()], &credentials())
        .await;

    assert_eq!(reason, EXIT_REQUESTED);
    let transport = account.transport(GATEWAY);
    assert!(transport.calls_of(MockOp::Connect).is_empty());
    assert!(!transport.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure_is_fatal() {
    let config = OrchestratorConfig::default();
    let account = Arc::new(MockGatewayAccount::new(&MockConfig::default()));
    account.transport(GATEWAY).fail_next(MockOp::Open, 1);
    let (reporter, _records) = ChannelReporter::new();
    let ctx = context(&config, reporter.clone(), Arc::new(AutoSelector));

    let reason = Orchestrator::new(account, ctx)
        .run(&[GATEWAY.to_string()], &credentials())
        .await;

    assert!(reason.starts_with("Error! Exiting..."), "{reason}");
    assert!(reason.contains("open failed"));
    assert!(reporter.closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_no_gateways_selected() {
    let config = OrchestratorConfig::default();
    let account = Arc::new(MockGatewayAccount::new(&MockConfig::default()));
    let (reporter, _records) = ChannelReporter::new();
    let ctx = context(&config, reporter.clone(), Arc::new(AutoSelector));

    let reason = Orchestrator::new(account, ctx).run(&[], &credentials()).await;
    assert_eq!(reason, NO_GATEWAYS);
    assert!(reporter.has_line(NO_GATEWAYS));
}
