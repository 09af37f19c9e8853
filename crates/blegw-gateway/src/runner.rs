//! Per-gateway message loop
//!
//! The runner owns the consuming end of a gateway's message channel. Each
//! message is dispatched under the session lock and the resulting actions
//! are executed in order, with follow-up actions (from the selection menu)
//! run before anything still queued.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use blegw_core::convert::display_address;
use blegw_core::indication::decode_indication;
use blegw_core::{AdvRecord, CharacteristicRole, GatewayMessage, PairRequest, ScanRequest};

use crate::context::OrchestratorContext;
use crate::dispatcher::{self, Action};
use crate::pipeline;
use crate::report::IndicationRecord;
use crate::session::SessionHandle;
use crate::shutdown::spawn_supervised;

#[derive(Clone)]
pub struct SessionRunner {
    session: Arc<SessionHandle>,
    ctx: OrchestratorContext,
}

impl SessionRunner {
    pub fn new(session: Arc<SessionHandle>, ctx: OrchestratorContext) -> Self {
        Self { session, ctx }
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Process gateway messages until shutdown or the channel closes
    pub async fn run(self, mut incoming: mpsc::UnboundedReceiver<GatewayMessage>) {
        let gateway = self.session.gateway_id().to_string();
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.triggered() => {
                    debug!(gateway = %gateway, "Message loop stopping for shutdown");
                    break;
                }
                msg = incoming.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => {
                        info!(gateway = %gateway, "Gateway message channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Dispatch one message and execute the resulting actions
    pub async fn handle(&self, msg: GatewayMessage) {
        let (kind, code) = match &msg {
            GatewayMessage::Event(event) => ("event", event.code()),
            GatewayMessage::Report(report) => ("report", report.code()),
        };
        debug!(gateway = %self.session.gateway_id(), kind, code, "Gateway message");
        let actions = self.session.with_state(|state| match &msg {
            GatewayMessage::Event(event) => dispatcher::on_event(state, &self.ctx, event),
            GatewayMessage::Report(report) => dispatcher::on_report(state, &self.ctx, report),
        });
        self.execute(actions).await;
    }

    pub async fn execute(&self, actions: Vec<Action>) {
        let gateway = self.session.gateway_id();
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::StartScan { period_secs } => self.start_scan(period_secs).await,
                Action::StopScan => self.stop_scan().await,
                Action::Sleep(duration) => tokio::time::sleep(duration).await,
                Action::Unpair { device_id } => self.unpair(&device_id).await,
                Action::PresentSelection { candidates } => {
                    let choice = self.ctx.selector.select_devices(gateway, &candidates).await;
                    let follow_up = dispatcher::on_selection(&self.ctx, choice);
                    for action in follow_up.into_iter().rev() {
                        queue.push_front(action);
                    }
                }
                Action::ConnectAndConfigure {
                    candidates,
                    rescan_period_secs,
                } => self.spawn_pipeline(candidates, rescan_period_secs),
                Action::EmitIndication {
                    device_id,
                    value,
                    timestamp,
                } => self.emit_indication(&device_id, value, timestamp).await,
                Action::ScanProgress { devices } => self.ctx.reporter.scan_progress(gateway, devices),
                Action::ScanFinished => self.ctx.reporter.scan_finished(gateway),
                Action::Message(line) => self.ctx.reporter.message(&line),
                Action::Shutdown { reason } => {
                    self.ctx.shutdown.trigger(reason);
                }
            }
        }
    }

    /// Clear the registry and start a scan, unless shutting down
    pub async fn start_scan(&self, period_secs: u32) {
        if self.ctx.shutdown.is_triggered() {
            debug!(gateway = %self.session.gateway_id(), "Not scanning during shutdown");
            return;
        }
        self.session.with_state(|state| state.begin_scan());
        if self.ctx.is_interactive() {
            self.ctx.reporter.scan_started(self.session.gateway_id());
        }

        let request = ScanRequest::start(self.ctx.config.scan.active, period_secs);
        if let Err(e) = self.session.transport().list(request).await {
            warn!(gateway = %self.session.gateway_id(), error = %e, "Scan start failed");
            self.ctx.reporter.scan_finished(self.session.gateway_id());
            self.ctx
                .reporter
                .message(&format!("[{}] Scan error: {e}", self.session.gateway_id()));
        }
    }

    async fn stop_scan(&self) {
        let request = ScanRequest::stop(self.ctx.config.scan.active);
        if let Err(e) = self.session.transport().list(request).await {
            warn!(gateway = %self.session.gateway_id(), error = %e, "Scan stop failed");
        }
    }

    async fn unpair(&self, device_id: &str) {
        match self.session.transport().pair(&PairRequest::unpair(device_id)).await {
            Ok(()) => info!(device = %display_address(device_id), "Unpaired"),
            Err(e) => warn!(device = %display_address(device_id), error = %e, "Unpair failed"),
        }
    }

    /// Start a connect pipeline unless one is still running on this gateway.
    /// The running pipeline rescans when it finishes, so a skipped request is
    /// picked up by the next selection.
    fn spawn_pipeline(&self, candidates: Vec<AdvRecord>, rescan_period_secs: u32) {
        let Some(slot) = self.session.try_claim_pipeline() else {
            info!(gateway = %self.session.gateway_id(), "Connect pipeline already running, request skipped");
            return;
        };
        let runner = self.clone();
        spawn_supervised("pipeline", self.ctx.shutdown.clone(), async move {
            pipeline::connect_and_configure(&runner.session, &runner.ctx, &candidates).await;
            drop(slot);
            runner.start_scan(rescan_period_secs).await;
        });
    }

    async fn emit_indication(&self, device_id: &str, value: String, timestamp: DateTime<Local>) {
        let card = decode_indication(&value);

        match pipeline::read_battery(&self.session, &self.ctx.descriptor, device_id).await {
            Ok(level) => {
                self.session
                    .update_connected(device_id, |device| device.battery = level);
            }
            Err(e) => warn!(device = %display_address(device_id), error = %e, "read batt err"),
        }

        let device = self.session.connected_device(device_id).unwrap_or_default();
        let handle = self
            .ctx
            .descriptor
            .handle(CharacteristicRole::ScanData)
            .unwrap_or_default();
        let record = IndicationRecord {
            gateway_id: self.session.gateway_id().to_string(),
            device_id: device_id.to_string(),
            name: device.name,
            timestamp,
            battery: device.battery,
            card_type: card.card_type,
            payload: card.payload,
            handle,
            raw: value,
        };
        self.ctx.reporter.indication(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use blegw_core::advertisement::{AD_TYPE_COMPLETE_NAME, AD_TYPE_SERVICE_UUIDS};
    use blegw_core::{AdEntry, ConnectionSettings, DeviceDescriptor, GatewayTransport, RawAdvReport, D600_SERVICE_UUID};

    use crate::config::{MockConfig, OrchestratorConfig};
    use crate::report::TracingReporter;
    use crate::selection::AutoSelector;
    use crate::transport::mock::{MockGatewayTransport, MockOp};

    const D600: &str = "665544332211";

    fn d600_record() -> AdvRecord {
        AdvRecord::from_report(
            "gw",
            &RawAdvReport {
                did: D600.into(),
                dtype: 0,
                ev: 0,
                rssi: -60,
                tss: 1_700_000_000,
                tsus: 0,
                adv: vec![
                    AdEntry::new(AD_TYPE_SERVICE_UUIDS, D600_SERVICE_UUID),
                    AdEntry::new(AD_TYPE_COMPLETE_NAME, "D600-Sensor"),
                ],
                rsp: Vec::new(),
            },
        )
    }

    async fn runner() -> (SessionRunner, Arc<MockGatewayTransport>) {
        let transport = Arc::new(MockGatewayTransport::new("gw", &MockConfig::default()));
        transport.open().await.unwrap();
        let session = Arc::new(SessionHandle::new(transport.clone()));
        let descriptor = DeviceDescriptor::d600(ConnectionSettings::default()).unwrap();
        let ctx = OrchestratorContext::new(
            OrchestratorConfig::default(),
            descriptor,
            Arc::new(TracingReporter),
            Arc::new(AutoSelector),
        );
        (SessionRunner::new(session, ctx), transport)
    }

    fn connect_action() -> Vec<Action> {
        vec![Action::ConnectAndConfigure {
            candidates: vec![d600_record()],
            rescan_period_secs: 1,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_pipeline_skipped_while_first_runs() {
        let (runner, transport) = runner().await;
        let slot = runner.session().try_claim_pipeline().unwrap();

        runner.execute(connect_action()).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.calls_of(MockOp::Connect).is_empty());
        assert!(transport.calls_of(MockOp::Pair).is_empty());

        drop(slot);
        runner.execute(connect_action()).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.calls_of(MockOp::Connect).len(), 1);
        assert_eq!(transport.calls_of(MockOp::Pair).len(), 1);
        assert!(!runner.session().pipeline_active());
    }
}
