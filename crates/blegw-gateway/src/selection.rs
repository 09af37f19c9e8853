//! Device selection after a discovery scan

use async_trait::async_trait;

use blegw_core::AdvRecord;

/// What the operator chose to do with the scanned devices
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionAction {
    /// Connect to these devices and keep reconnecting to them
    Connect(Vec<AdvRecord>),
    Rescan,
    Exit,
    /// Stop offering selection without connecting anything
    ContinueWithoutConnections,
}

/// Presents scan results and returns the operator's choice
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    async fn select_devices(&self, gateway_id: &str, candidates: &[AdvRecord]) -> SelectionAction;
}

/// Selects every candidate without asking; rescans while nothing is found
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoSelector;

#[async_trait]
impl DeviceSelector for AutoSelector {
    async fn select_devices(&self, _gateway_id: &str, candidates: &[AdvRecord]) -> SelectionAction {
        if candidates.is_empty() {
            SelectionAction::Rescan
        } else {
            SelectionAction::Connect(candidates.to_vec())
        }
    }
}

/// Menu label of a scanned device: `1) [11:22:33:44:55:66]->gw -60dBm D600`
pub fn device_label(index: usize, record: &AdvRecord) -> String {
    format!(
        "{}) [{}]->{} {}dBm {}",
        index + 1,
        record.display_address(),
        record.gateway_id,
        record.rssi,
        record.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use blegw_core::{AdEntry, RawAdvReport};

    fn record() -> AdvRecord {
        AdvRecord::from_report(
            "gw-1",
            &RawAdvReport {
                did: "665544332211".into(),
                dtype: 0,
                ev: 0,
                rssi: -61,
                tss: 0,
                tsus: 0,
                adv: vec![AdEntry::new(9, "D600")],
                rsp: vec![],
            },
        )
    }

    #[test]
    fn test_device_label() {
        assert_eq!(
            device_label(0, &record()),
            "1) [11:22:33:44:55:66]->gw-1 -61dBm D600"
        );
    }

    #[tokio::test]
    async fn test_auto_selector() {
        let selector = AutoSelector;
        assert_eq!(
            selector.select_devices("gw-1", &[]).await,
            SelectionAction::Rescan
        );
        assert_eq!(
            selector.select_devices("gw-1", &[record()]).await,
            SelectionAction::Connect(vec![record()])
        );
    }
}
