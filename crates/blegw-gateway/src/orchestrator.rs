//! Top-level orchestration across gateways

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use blegw_core::{Credentials, DisconnectTarget, GatewayAccount, GatewayError, TransportError};

use crate::context::OrchestratorContext;
use crate::runner::SessionRunner;
use crate::session::SessionHandle;
use crate::shutdown::{spawn_supervised, ShutdownCoordinator};

/// Reason given when no gateway was picked
pub const NO_GATEWAYS: &str = "No Gateways Selected. Shutting down...";

/// Authenticate with a cached session, falling back to a full login
pub async fn authenticate(
    account: &dyn GatewayAccount,
    credentials: &Credentials,
) -> Result<Vec<String>, TransportError> {
    match account.auth(credentials).await {
        Ok(gateways) => Ok(gateways),
        Err(e) => {
            info!(error = %e, "Cached session rejected, logging in");
            account.login(credentials).await
        }
    }
}

pub struct Orchestrator {
    account: Arc<dyn GatewayAccount>,
    ctx: OrchestratorContext,
    sessions: Vec<Arc<SessionHandle>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(account: Arc<dyn GatewayAccount>, ctx: OrchestratorContext) -> Self {
        Self {
            account,
            ctx,
            sessions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    pub fn sessions(&self) -> &[Arc<SessionHandle>] {
        &self.sessions
    }

    fn coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            self.ctx.config.shutdown.clone(),
            self.ctx.config.scan.active,
            self.ctx.reporter.clone(),
        )
    }

    /// Bring one gateway online and start its first scan
    pub async fn start_gateway(
        &mut self,
        gateway_id: &str,
        credentials: &Credentials,
    ) -> Result<Arc<SessionHandle>, GatewayError> {
        let transport = self.account.gateway(gateway_id);
        let session = Arc::new(SessionHandle::new(transport.clone()));
        self.sessions.push(session.clone());

        let step = |operation: &'static str| {
            let gateway = gateway_id.to_string();
            move |source: TransportError| GatewayError::Transport {
                gateway,
                operation,
                source,
            }
        };

        transport.auth(credentials).await.map_err(step("auth"))?;
        transport.open().await.map_err(step("open"))?;
        let version = transport
            .version(self.ctx.config.timing.version_timeout())
            .await
            .map_err(step("version"))?;
        info!(gateway = %gateway_id, %version, "Gateway online");

        let nodes = transport.show().await.map_err(step("show"))?;
        if !nodes.is_empty() {
            info!(gateway = %gateway_id, nodes = nodes.len(), "Disconnecting nodes left from a previous run");
            transport
                .disconnect(DisconnectTarget::All)
                .await
                .map_err(step("disconnect"))?;
        }

        let incoming = transport.take_incoming().ok_or_else(|| GatewayError::Transport {
            gateway: gateway_id.to_string(),
            operation: "attach",
            source: TransportError::InvalidResponse("message channel already taken".to_string()),
        })?;

        let runner = SessionRunner::new(session.clone(), self.ctx.clone());
        self.tasks.push(spawn_supervised(
            "gateway-runner",
            self.ctx.shutdown.clone(),
            runner.clone().run(incoming),
        ));
        runner.start_scan(self.ctx.config.scan.period_secs).await;

        Ok(session)
    }

    fn log_capabilities(&self) {
        let gatt = self.ctx.descriptor.gatt();
        for (index, service) in gatt.service_uuids().into_iter().enumerate() {
            let characteristics: Vec<String> = gatt
                .characteristics_of(index)
                .into_iter()
                .map(|c| match c.handle {
                    Some(handle) => format!("{} @0x{handle:04x}", c.name),
                    None => c.name,
                })
                .collect();
            debug!(service, ?characteristics, "GATT service");
        }
    }

    /// Start every gateway, wait for shutdown, then tear everything down.
    ///
    /// Returns the shutdown reason.
    pub async fn run(mut self, gateway_ids: &[String], credentials: &Credentials) -> String {
        if gateway_ids.is_empty() {
            self.ctx.shutdown.trigger(NO_GATEWAYS);
        }
        self.log_capabilities();

        let mut started = 0;
        let mut last_failure = None;
        for gateway_id in gateway_ids {
            if self.ctx.shutdown.is_triggered() {
                break;
            }
            match self.start_gateway(gateway_id, credentials).await {
                Ok(_) => started += 1,
                Err(e) => {
                    let reason = format!("Error! Exiting... {e}");
                    error!(gateway = %gateway_id, error = %e, "Gateway startup failed");
                    // a failed gateway is torn down on its own
                    if let Some(session) = self.sessions.pop() {
                        if let Err(e) = self.coordinator().shutdown_gateway(&session, &reason).await {
                            warn!(gateway = %gateway_id, error = %e, "Gateway shutdown failed");
                        }
                    }
                    last_failure = Some(reason);
                }
            }
        }
        if started == 0 {
            if let Some(reason) = last_failure {
                self.ctx.shutdown.trigger(reason);
            }
        }

        let reason = self.ctx.shutdown.triggered().await;
        self.shutdown(&reason).await;
        reason
    }

    async fn shutdown(&mut self, reason: &str) {
        info!(%reason, "Shutting down");
        self.ctx.reporter.message(reason);
        self.coordinator()
            .shutdown_all(&self.sessions, &self.tasks, self.account.as_ref(), reason)
            .await;
    }
}
