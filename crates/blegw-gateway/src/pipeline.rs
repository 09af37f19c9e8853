//! Connect, pair and configure selected devices
//!
//! Devices are connected and paired one after another in candidate order,
//! since a gateway serializes its connection slots. Every candidate that is
//! connected afterwards is paired and configured, including devices that came
//! up in an earlier cycle. Configuration runs as one supervised task per
//! device and is not awaited by the pipeline; a panic in any of them shuts
//! the orchestrator down.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use blegw_core::convert::{decode_battery_level, display_address, utf8_from_hex};
use blegw_core::{
    AdvRecord, CharacteristicRole, ConfigureStep, DeviceDescriptor, GatewayError, PairRequest,
    ScanMode,
};

use crate::context::OrchestratorContext;
use crate::session::SessionHandle;
use crate::shutdown::spawn_supervised;

/// What a pipeline run did
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Devices connected in this run
    pub connected: Vec<String>,
    pub paired: Vec<String>,
    /// Per-device configuration tasks
    pub configure: Vec<JoinHandle<()>>,
}

/// Connect, pair and configure `candidates` on one gateway
pub async fn connect_and_configure(
    session: &Arc<SessionHandle>,
    ctx: &OrchestratorContext,
    candidates: &[AdvRecord],
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome {
        connected: connect_all(session, ctx, candidates).await,
        ..PipelineOutcome::default()
    };

    for record in candidates {
        if !session.is_connected(&record.device_id) {
            continue;
        }
        match pair_with_retry(session, ctx, &record.device_id).await {
            Ok(true) => outcome.paired.push(record.device_id.clone()),
            Ok(false) => debug!(device = %record.display_address(), "Device dropped before pairing"),
            Err(e) => {
                warn!(device = %record.display_address(), error = %e, "Pairing abandoned");
                ctx.reporter.message(&e.to_string());
            }
        }
    }

    for record in candidates {
        if !session.is_connected(&record.device_id) {
            continue;
        }
        let session = session.clone();
        let ctx = ctx.clone();
        let device_id = record.device_id.clone();
        let shutdown = ctx.shutdown.clone();
        outcome.configure.push(spawn_supervised("configure", shutdown, async move {
            if let Err(e) = configure_device(&session, &ctx, &device_id).await {
                warn!(gateway = %session.gateway_id(), error = %e, "Device configuration failed");
                ctx.reporter.message(&e.to_string());
            }
        }));
    }

    outcome
}

/// Connect every candidate the tracker allows, then let the gateway settle
pub async fn connect_all(
    session: &SessionHandle,
    ctx: &OrchestratorContext,
    candidates: &[AdvRecord],
) -> Vec<String> {
    let mut connected = Vec::new();
    for record in candidates {
        let device_id = &record.device_id;
        if !ctx.tracker.try_begin_connect(device_id) {
            debug!(device = %record.display_address(), "Connection already in progress or established");
            continue;
        }

        let params = ctx
            .descriptor
            .connection_parameters(device_id, record.address_type);
        match session.transport().connect(&params).await {
            Ok(()) => {
                if ctx.tracker.mark_connected(device_id) {
                    session.with_state(|state| state.register_connected(device_id));
                    info!(gateway = %session.gateway_id(), device = %record.display_address(), "Connected");
                    ctx.reporter
                        .message(&format!("Connected:[{}]", record.display_address()));
                    connected.push(device_id.clone());
                } else {
                    warn!(device = %record.display_address(), "Disconnected while connecting");
                }
            }
            Err(source) => {
                ctx.tracker.mark_failed(device_id);
                let err = GatewayError::Connect {
                    device: device_id.clone(),
                    source,
                };
                warn!(gateway = %session.gateway_id(), error = %err, "Connect failed");
                ctx.reporter.message(&err.to_string());
            }
        }
    }

    ctx.shutdown.sleep(ctx.config.timing.settle()).await;
    connected
}

/// Pair a connected device, retrying with a fixed backoff.
///
/// Returns `Ok(false)` if the device disconnects before pairing succeeds.
/// Retries stop at the configured attempt limit or on shutdown.
pub async fn pair_with_retry(
    session: &SessionHandle,
    ctx: &OrchestratorContext,
    device_id: &str,
) -> Result<bool, GatewayError> {
    let policy = &ctx.config.pairing;
    let request = PairRequest::bond(device_id);
    let address = display_address(device_id);
    let mut attempts = 0u32;

    loop {
        if !session.is_connected(device_id) {
            return Ok(false);
        }
        attempts += 1;
        match session.transport().pair(&request).await {
            Ok(()) => {
                info!(device = %address, attempts, "Paired");
                ctx.reporter.message(&format!("Pair ok:[{address}]"));
                return Ok(true);
            }
            Err(source) => {
                ctx.reporter
                    .message(&format!("Pair: retry:[{address}] {source}"));
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(GatewayError::Pair {
                        device: device_id.to_string(),
                        attempts,
                        source,
                    });
                }
                if !ctx.shutdown.sleep(policy.backoff()).await {
                    return Err(GatewayError::PairCancelled {
                        device: device_id.to_string(),
                    });
                }
            }
        }
    }
}

/// Read the battery level of a connected device
pub async fn read_battery(
    session: &SessionHandle,
    descriptor: &DeviceDescriptor,
    device_id: &str,
) -> Result<u8, GatewayError> {
    let handle = descriptor.handle(CharacteristicRole::BatteryLevel)?;
    let value = session
        .transport()
        .read(device_id, handle)
        .await
        .map_err(|source| GatewayError::Configure {
            device: device_id.to_string(),
            step: ConfigureStep::ReadBattery,
            source,
        })?;
    decode_battery_level(&value).map_err(|source| GatewayError::Decode {
        device: device_id.to_string(),
        source,
    })
}

async fn write_command(
    session: &SessionHandle,
    device_id: &str,
    handle: u16,
    value: &str,
    step: ConfigureStep,
) -> Result<(), GatewayError> {
    session
        .transport()
        .write(device_id, handle, value)
        .await
        .map_err(|source| GatewayError::Configure {
            device: device_id.to_string(),
            step,
            source,
        })
}

/// Bring a connected scanner into scanning mode and subscribe to its reads
pub async fn configure_device(
    session: &SessionHandle,
    ctx: &OrchestratorContext,
    device_id: &str,
) -> Result<(), GatewayError> {
    if !session.is_connected(device_id) {
        return Ok(());
    }
    let descriptor = &ctx.descriptor;
    let profile = descriptor.profile();
    let address = display_address(device_id);

    let battery = read_battery(session, descriptor, device_id).await?;
    session.update_connected(device_id, |device| device.battery = battery);
    ctx.reporter
        .message(&format!("Battery:[{address}][{battery}%]"));

    let control = descriptor.handle(CharacteristicRole::ScanControl)?;
    write_command(session, device_id, control, profile.commands.wink, ConfigureStep::Wink).await?;

    let name_handle = descriptor.handle(CharacteristicRole::DeviceName)?;
    let raw_name = session
        .transport()
        .read(device_id, name_handle)
        .await
        .map_err(|source| GatewayError::Configure {
            device: device_id.to_string(),
            step: ConfigureStep::ReadName,
            source,
        })?;
    let name = utf8_from_hex(&raw_name).map_err(|source| GatewayError::Decode {
        device: device_id.to_string(),
        source,
    })?;
    session.update_connected(device_id, |device| device.name = name.clone());

    write_command(
        session,
        device_id,
        control,
        profile.commands.scanner_mode,
        ConfigureStep::EnableScanner,
    )
    .await?;
    if ctx.config.scan_mode == ScanMode::Continuous {
        write_command(
            session,
            device_id,
            control,
            profile.commands.continuous_scan,
            ConfigureStep::ContinuousMode,
        )
        .await?;
    }

    for (handle, mode) in descriptor.subscriptions() {
        session
            .transport()
            .subscribe(device_id, handle, mode)
            .await
            .map_err(|source| GatewayError::Configure {
                device: device_id.to_string(),
                step: ConfigureStep::Subscribe,
                source,
            })?;
    }

    info!(gateway = %session.gateway_id(), device = %address, %name, "Configured");
    ctx.reporter.message(&format!("Config ok:[{address}]"));
    ctx.reporter
        .message(&format!("{} Ready to Scan[{address}]", profile.name));
    Ok(())
}
