//! Gateway event and report dispatch
//!
//! Dispatch functions update session state and return the follow-up work as
//! a list of [`Action`]s. They never await; the session runner executes the
//! actions against the transport.

use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use blegw_core::convert::{display_address, unix_to_local};
use blegw_core::{AdvRecord, AdvRegistry, GatewayEvent, GatewayReport};

use crate::context::OrchestratorContext;
use crate::selection::SelectionAction;
use crate::session::GatewaySession;

/// Reason given when the operator exits from the selection menu
pub const EXIT_REQUESTED: &str = "Shutting down.. please wait";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Clear the registry and scan for `period_secs`
    StartScan { period_secs: u32 },
    StopScan,
    Sleep(Duration),
    Unpair { device_id: String },
    /// Ask the operator which devices to use
    PresentSelection { candidates: Vec<AdvRecord> },
    /// Connect, pair and configure, then scan again for `rescan_period_secs`
    ConnectAndConfigure {
        candidates: Vec<AdvRecord>,
        rescan_period_secs: u32,
    },
    /// A complete indication value is ready for decoding
    EmitIndication {
        device_id: String,
        value: String,
        timestamp: DateTime<Local>,
    },
    ScanProgress { devices: usize },
    ScanFinished,
    Message(String),
    Shutdown { reason: String },
}

pub fn on_event(
    session: &mut GatewaySession,
    ctx: &OrchestratorContext,
    event: &GatewayEvent,
) -> Vec<Action> {
    match event {
        GatewayEvent::Disconnected { node, reason } => {
            info!(gateway = %session.gateway_id, device = %display_address(node), reason, "Device disconnected");
            ctx.tracker.mark_disconnected(node);
            session.remove_connected(node);
            vec![Action::Message(format!(
                "Device disconnect event:[{}] reason {}",
                display_address(node),
                reason
            ))]
        }
        GatewayEvent::EncryptionChanged { node, subcode } => {
            info!(gateway = %session.gateway_id, device = %display_address(node), subcode, "Encryption change");
            if *subcode == 0 {
                return Vec::new();
            }
            vec![
                Action::StopScan,
                Action::Sleep(ctx.config.timing.encryption_recovery()),
                Action::Unpair {
                    device_id: node.clone(),
                },
                Action::StartScan {
                    period_secs: ctx.config.scan.rescan_period_secs,
                },
            ]
        }
        GatewayEvent::ScanComplete => on_scan_complete(session, ctx),
        GatewayEvent::Other { code } => {
            debug!(gateway = %session.gateway_id, code, "Other unhandled event");
            Vec::new()
        }
    }
}

fn on_scan_complete(session: &mut GatewaySession, ctx: &OrchestratorContext) -> Vec<Action> {
    session.scan_complete = true;
    let mut actions = vec![Action::ScanFinished];
    if ctx.shutdown.is_triggered() {
        return actions;
    }

    let selection = ctx.selection.lock();
    if selection.interactive {
        actions.push(Action::PresentSelection {
            candidates: session.registry.sorted(),
        });
        return actions;
    }

    let candidates =
        reconnect_candidates(&session.registry, &selection.selected, ctx.config.reconnect);
    drop(selection);
    actions.extend(proceed_with(ctx, candidates));
    actions
}

/// Apply the operator's choice from the selection menu
pub fn on_selection(ctx: &OrchestratorContext, choice: SelectionAction) -> Vec<Action> {
    let mut actions = vec![Action::Sleep(ctx.config.timing.selection_delay())];
    match choice {
        SelectionAction::Exit => actions.push(Action::Shutdown {
            reason: EXIT_REQUESTED.to_string(),
        }),
        SelectionAction::Rescan => actions.push(Action::StartScan {
            period_secs: ctx.config.scan.period_secs,
        }),
        SelectionAction::ContinueWithoutConnections => {
            ctx.selection.lock().interactive = false;
            actions.extend(proceed_with(ctx, Vec::new()));
        }
        SelectionAction::Connect(devices) => {
            {
                let mut selection = ctx.selection.lock();
                selection.freeze(&devices);
                for record in selection.selected.records() {
                    ctx.tracker.reset(&record.device_id);
                }
            }
            actions.extend(proceed_with(ctx, devices));
        }
    }
    actions
}

/// Registry entries that belong to the selected set, if reconnecting is enabled
pub fn reconnect_candidates(
    registry: &AdvRegistry,
    selected: &AdvRegistry,
    reconnect: bool,
) -> Vec<AdvRecord> {
    if !reconnect {
        return Vec::new();
    }
    registry
        .sorted()
        .into_iter()
        .filter(|record| selected.contains(&record.device_id))
        .collect()
}

fn proceed_with(ctx: &OrchestratorContext, candidates: Vec<AdvRecord>) -> Vec<Action> {
    let rescan_period_secs = ctx.config.scan.rescan_period_secs;
    let targets: Vec<_> = candidates
        .into_iter()
        .filter(|record| ctx.descriptor.matches(record))
        .collect();
    if targets.is_empty() {
        return vec![Action::StartScan {
            period_secs: rescan_period_secs,
        }];
    }
    vec![Action::ConnectAndConfigure {
        candidates: targets,
        rescan_period_secs,
    }]
}

pub fn on_report(
    session: &mut GatewaySession,
    ctx: &OrchestratorContext,
    report: &GatewayReport,
) -> Vec<Action> {
    match report {
        GatewayReport::Advertisement(nodes) => {
            let gateway_id = session.gateway_id.clone();
            let records = nodes
                .iter()
                .map(|raw| AdvRecord::from_report(&gateway_id, raw))
                .filter(|record| ctx.descriptor.matches(record));
            session.registry.merge(records);
            vec![Action::ScanProgress {
                devices: session.registry.len(),
            }]
        }
        GatewayReport::Indication {
            node,
            notifications,
        } => notifications
            .iter()
            .filter_map(|n| {
                session
                    .indications
                    .push(node, &n.value)
                    .map(|value| Action::EmitIndication {
                        device_id: node.clone(),
                        value,
                        timestamp: unix_to_local(n.tss, n.tsus),
                    })
            })
            .collect(),
        GatewayReport::Notification { node, .. } => {
            debug!(gateway = %session.gateway_id, device = %display_address(node), "Notification report ignored");
            Vec::new()
        }
        GatewayReport::Other { code } => {
            debug!(gateway = %session.gateway_id, code, "Other unhandled report");
            Vec::new()
        }
    }
}
