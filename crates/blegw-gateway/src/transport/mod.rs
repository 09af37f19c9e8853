//! Gateway account construction
//!
//! # Example
//!
//! ```ignore
//! use blegw_gateway::config::TransportConfig;
//! use blegw_gateway::transport::create_account;
//!
//! let account = create_account(&TransportConfig::default());
//! let gateways = account.login(&credentials).await?;
//! let transport = account.gateway(&gateways[0]);
//! ```

pub mod mock;

use std::sync::Arc;

use blegw_core::GatewayAccount;

use crate::config::TransportConfig;

/// Create the gateway account for the configured transport
pub fn create_account(config: &TransportConfig) -> Arc<dyn GatewayAccount> {
    match config {
        TransportConfig::Mock(cfg) => Arc::new(mock::MockGatewayAccount::new(cfg)),
    }
}
