//! Process-wide device connection status
//!
//! Connection attempts are only started from [`DeviceStatus::Unconnected`].
//! [`DeviceStatusTracker::try_begin_connect`] checks and claims a device in
//! one locked step, so at most one attempt per device is ever in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeviceStatus {
    #[default]
    Unconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Shared status map; clones refer to the same state
#[derive(Debug, Clone, Default)]
pub struct DeviceStatusTracker {
    inner: Arc<Mutex<HashMap<String, DeviceStatus>>>,
}

impl DeviceStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status; unknown devices are unconnected
    pub fn status(&self, device_id: &str) -> DeviceStatus {
        self.inner
            .lock()
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    /// Claim a device for a connection attempt.
    ///
    /// Returns false if an attempt is in flight or the device is connected.
    pub fn try_begin_connect(&self, device_id: &str) -> bool {
        let mut map = self.inner.lock();
        let status = map.entry(device_id.to_string()).or_default();
        if *status != DeviceStatus::Unconnected {
            return false;
        }
        *status = DeviceStatus::Connecting;
        true
    }

    /// Connecting -> Connected. Returns false if the attempt was superseded.
    pub fn mark_connected(&self, device_id: &str) -> bool {
        self.transition(device_id, DeviceStatus::Connecting, DeviceStatus::Connected)
    }

    /// Connecting -> Unconnected
    pub fn mark_failed(&self, device_id: &str) -> bool {
        self.transition(device_id, DeviceStatus::Connecting, DeviceStatus::Unconnected)
    }

    /// Any -> Unconnected, returning the previous status
    pub fn mark_disconnected(&self, device_id: &str) -> DeviceStatus {
        self.inner
            .lock()
            .insert(device_id.to_string(), DeviceStatus::Unconnected)
            .unwrap_or_default()
    }

    /// Force a device back to unconnected, e.g. when it is (re)selected
    pub fn reset(&self, device_id: &str) {
        self.inner
            .lock()
            .insert(device_id.to_string(), DeviceStatus::Unconnected);
    }

    fn transition(&self, device_id: &str, from: DeviceStatus, to: DeviceStatus) -> bool {
        let mut map = self.inner.lock();
        match map.get_mut(device_id) {
            Some(status) if *status == from => {
                *status = to;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DID: &str = "665544332211";

    #[test]
    fn test_try_begin_connect_once() {
        let tracker = DeviceStatusTracker::new();
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);

        assert!(tracker.try_begin_connect(DID));
        assert!(!tracker.try_begin_connect(DID));
        assert_eq!(tracker.status(DID), DeviceStatus::Connecting);
    }

    #[test]
    fn test_try_begin_connect_across_threads() {
        let tracker = DeviceStatusTracker::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.try_begin_connect(DID))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn test_lifecycle() {
        let tracker = DeviceStatusTracker::new();
        assert!(tracker.try_begin_connect(DID));
        assert!(tracker.mark_connected(DID));
        assert_eq!(tracker.status(DID), DeviceStatus::Connected);
        assert!(!tracker.try_begin_connect(DID));

        assert_eq!(tracker.mark_disconnected(DID), DeviceStatus::Connected);
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);
        assert!(tracker.try_begin_connect(DID));

        assert!(tracker.mark_failed(DID));
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);
    }

    #[test]
    fn test_mark_connected_requires_connecting() {
        let tracker = DeviceStatusTracker::new();
        assert!(!tracker.mark_connected(DID));
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);

        // a disconnect event while connecting supersedes the attempt
        assert!(tracker.try_begin_connect(DID));
        tracker.mark_disconnected(DID);
        assert!(!tracker.mark_connected(DID));
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);
    }

    #[test]
    fn test_reset() {
        let tracker = DeviceStatusTracker::new();
        assert!(tracker.try_begin_connect(DID));
        tracker.reset(DID);
        assert_eq!(tracker.status(DID), DeviceStatus::Unconnected);
    }
}
