//! Output of scan progress, status lines and card reads

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use blegw_core::convert::{display_address, format_timestamp};

/// One decoded card read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicationRecord {
    pub gateway_id: String,
    pub device_id: String,
    pub name: String,
    pub timestamp: DateTime<Local>,
    pub battery: u8,
    pub card_type: String,
    pub payload: String,
    /// Characteristic the read arrived on
    pub handle: u16,
    /// Reassembled value as hex
    pub raw: String,
}

impl IndicationRecord {
    /// `name[AA:BB:..][timestamp][Batt=N%][card type]["payload"]`
    pub fn console_line(&self) -> String {
        let payload = serde_json::to_string(&self.payload).unwrap_or_else(|_| self.payload.clone());
        format!(
            "{}[{}][{}][Batt={}%][{}][{}]",
            self.name,
            display_address(&self.device_id),
            format_timestamp(&self.timestamp),
            self.battery,
            self.card_type,
            payload
        )
    }
}

/// Sink for user-facing output
pub trait Reporter: Send + Sync {
    /// A discovery scan the operator is waiting on has started
    fn scan_started(&self, _gateway_id: &str) {}

    fn scan_progress(&self, _gateway_id: &str, _devices: usize) {}

    fn scan_finished(&self, _gateway_id: &str) {}

    /// A status line (connect, pair, configure, shutdown)
    fn message(&self, line: &str);

    fn indication(&self, record: &IndicationRecord);

    /// Flush and release any output files
    fn close(&self) {}
}

/// Reporter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn scan_progress(&self, gateway_id: &str, devices: usize) {
        tracing::debug!(gateway = %gateway_id, devices, "Scanning");
    }

    fn message(&self, line: &str) {
        info!("{}", line);
    }

    fn indication(&self, record: &IndicationRecord) {
        info!(gateway = %record.gateway_id, "{}", record.console_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blegw_core::convert::unix_to_local;

    #[test]
    fn test_console_line() {
        let timestamp = unix_to_local(1_700_000_000, 250_000);
        let record = IndicationRecord {
            gateway_id: "gw".into(),
            device_id: "665544332211".into(),
            name: "D600".into(),
            timestamp,
            battery: 90,
            card_type: "ISO 15693".into(),
            payload: "E004".into(),
            handle: 0x32,
            raw: String::new(),
        };
        let expected = format!(
            "D600[11:22:33:44:55:66][{}][Batt=90%][ISO 15693][\"E004\"]",
            format_timestamp(&timestamp)
        );
        assert_eq!(record.console_line(), expected);
    }
}
