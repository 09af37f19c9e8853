//! Shutdown signalling and gateway teardown

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use blegw_core::{DisconnectTarget, GatewayAccount, GatewayError, ScanRequest, TransportError};

use crate::config::ShutdownConfig;
use crate::report::Reporter;
use crate::session::SessionHandle;

/// Reason recorded when a background task panics
pub const UNHANDLED_FAILURE: &str = "Unhandled failure - shutting down..";

/// Process-wide shutdown flag carrying the first reason given
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns false if it was already requested.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Wait for shutdown, returning its reason
    pub async fn triggered(&self) -> String {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => String::new(),
        };
        reason
    }

    /// Sleep unless shutdown is requested first. Returns false if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = self.triggered() => false,
        }
    }
}

/// Poll `done` every `interval` until it holds or `timeout` expires
pub async fn wait_until<F>(interval: Duration, timeout: Duration, mut done: F) -> Result<(), GatewayError>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if done() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(GatewayError::TaskTimeout {
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
    }
}

/// Aborting the supervisor aborts the supervised task too
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn a task whose panic triggers a full shutdown
pub fn spawn_supervised<F>(name: &'static str, shutdown: ShutdownSignal, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(task));
    tokio::spawn(async move {
        match (&mut task.0).await {
            Ok(()) => debug!(task = name, "Task finished"),
            Err(e) if e.is_panic() => {
                error!(task = name, error = %e, "Task panicked");
                shutdown.trigger(UNHANDLED_FAILURE);
            }
            Err(_) => debug!(task = name, "Task cancelled"),
        }
    })
}

/// Stops scans, disconnects nodes and closes gateways on the way out
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    scan_active: bool,
    reporter: Arc<dyn Reporter>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig, scan_active: bool, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            scan_active,
            reporter,
        }
    }

    /// Tear down one gateway. The connection is closed even if quiescing fails.
    pub async fn shutdown_gateway(
        &self,
        session: &SessionHandle,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let gateway = session.gateway_id();
        let transport = session.transport();
        self.reporter.message(&format!("[{gateway}] {reason}"));

        if !transport.is_open() {
            debug!(gateway = %gateway, "Gateway not open, nothing to shut down");
            return Ok(());
        }

        let mut result = Ok(());
        if transport.is_live() {
            let mut attempt = 0;
            loop {
                match self.quiesce(session).await {
                    Ok(()) => break,
                    Err(source) if attempt < self.config.retries => {
                        attempt += 1;
                        warn!(gateway = %gateway, attempt, error = %source, "Shutdown step failed, retrying");
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                    Err(source) => {
                        error!(gateway = %gateway, error = %source, "Shutdown step failed, giving up");
                        result = Err(GatewayError::Shutdown {
                            gateway: gateway.to_string(),
                            source,
                        });
                        break;
                    }
                }
            }
        }

        if let Err(e) = transport.close().await {
            warn!(gateway = %gateway, error = %e, "Failed to close gateway");
        }
        info!(gateway = %gateway, "Gateway closed");
        result
    }

    async fn quiesce(&self, session: &SessionHandle) -> Result<(), TransportError> {
        let transport = session.transport();
        transport.list(ScanRequest::stop(self.scan_active)).await?;
        let nodes = transport.show().await?;
        if !nodes.is_empty() {
            transport.disconnect(DisconnectTarget::All).await?;
        }
        Ok(())
    }

    /// Tear down every gateway, wait for their tasks, then log out
    pub async fn shutdown_all(
        &self,
        sessions: &[Arc<SessionHandle>],
        tasks: &[JoinHandle<()>],
        account: &dyn GatewayAccount,
        reason: &str,
    ) {
        for session in sessions {
            if let Err(e) = self.shutdown_gateway(session, reason).await {
                self.reporter.message(&e.to_string());
            }
        }

        let drained = wait_until(
            Duration::from_millis(20),
            Duration::from_millis(self.config.drain_timeout_ms),
            || tasks.iter().all(JoinHandle::is_finished),
        )
        .await;
        if let Err(e) = drained {
            warn!(error = %e, code = ?e.result_code(), "Gateway tasks still running, aborting");
            for task in tasks {
                task.abort();
            }
        }

        if account.is_logged_in() {
            if let Err(e) = account.logout().await {
                warn!(error = %e, "Logout failed");
            }
        }
        self.reporter.close();
    }
}
