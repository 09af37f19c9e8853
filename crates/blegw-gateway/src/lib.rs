//! blegw-gateway - Orchestration of BLE gateways and D600 scanners
//!
//! Each gateway gets a session with its own message loop. Gateway messages
//! are turned into actions by the dispatcher; connecting, pairing and
//! configuring selected scanners runs as a separate pipeline task. Decoded
//! card reads and status lines go to a [`Reporter`].

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod selection;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::{ConfigError, OrchestratorConfig, TransportConfig};
pub use context::{OrchestratorContext, SelectionState};
pub use dispatcher::Action;
pub use orchestrator::{authenticate, Orchestrator};
pub use report::{IndicationRecord, Reporter, TracingReporter};
pub use runner::SessionRunner;
pub use selection::{AutoSelector, DeviceSelector, SelectionAction};
pub use session::{ConnectedDevice, GatewaySession, SessionHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use transport::create_account;
