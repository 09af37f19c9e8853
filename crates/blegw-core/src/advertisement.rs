//! Advertisement report parsing and the per-gateway device registry
//!
//! Gateways deliver discovery results as batches of raw reports. Each report
//! carries the advertisement (`adv`) and scan response (`rsp`) payloads as
//! lists of AD structures. [`AdvRecord::from_report`] flattens those into a
//! map from AD type to the values seen for it, in arrival order, and derives a
//! display name.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::convert::{display_address, unix_to_local};

/// Incomplete list of 128-bit service UUIDs
pub const AD_TYPE_SERVICE_UUIDS: u8 = 0x06;
/// Shortened local name
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// Complete local name
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// Map from AD type to the values reported for it
pub type AdMap = BTreeMap<u8, Vec<String>>;

/// A single AD structure as delivered by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdEntry {
    /// AD type tag; entries without one are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u8>,
    /// Value as reported by the gateway (hex, or text for names)
    #[serde(default)]
    pub v: String,
}

impl AdEntry {
    pub fn new(t: u8, v: impl Into<String>) -> Self {
        Self {
            t: Some(t),
            v: v.into(),
        }
    }
}

/// Raw advertisement report as received from a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdvReport {
    /// Device id (little-endian hex address)
    pub did: String,
    /// Address type
    #[serde(default)]
    pub dtype: u8,
    /// Advertising event type
    #[serde(default)]
    pub ev: u8,
    #[serde(default)]
    pub rssi: i16,
    /// Timestamp seconds
    #[serde(default)]
    pub tss: i64,
    /// Timestamp microseconds
    #[serde(default)]
    pub tsus: u32,
    #[serde(default)]
    pub adv: Vec<AdEntry>,
    #[serde(default)]
    pub rsp: Vec<AdEntry>,
}

/// Most recently seen advertisement for one device on one gateway
#[derive(Debug, Clone, PartialEq)]
pub struct AdvRecord {
    pub gateway_id: String,
    pub timestamp: DateTime<Local>,
    pub device_id: String,
    pub address_type: u8,
    pub event_type: u8,
    pub rssi: i16,
    pub name: String,
    pub adv: AdMap,
    pub rsp: AdMap,
}

impl AdvRecord {
    /// Stamp a raw report with its gateway and parse its payloads
    pub fn from_report(gateway_id: &str, report: &RawAdvReport) -> Self {
        Self {
            gateway_id: gateway_id.to_string(),
            timestamp: unix_to_local(report.tss, report.tsus),
            device_id: report.did.clone(),
            address_type: report.dtype,
            event_type: report.ev,
            rssi: report.rssi,
            name: extract_name(&report.adv, &report.rsp),
            adv: collect_ad_map(&report.adv),
            rsp: collect_ad_map(&report.rsp),
        }
    }

    /// Whether the advertised 128-bit service list contains `uuid`
    pub fn advertises_service(&self, uuid: &str) -> bool {
        self.adv
            .get(&AD_TYPE_SERVICE_UUIDS)
            .is_some_and(|uuids| uuids.iter().any(|u| u == uuid))
    }

    pub fn display_address(&self) -> String {
        display_address(&self.device_id)
    }
}

/// True if the record advertises the given target service
pub fn matches_target_service(record: &AdvRecord, target_uuid: &str) -> bool {
    record.advertises_service(target_uuid)
}

fn collect_ad_map(entries: &[AdEntry]) -> AdMap {
    let mut map = AdMap::new();
    for entry in entries {
        let Some(tag) = entry.t else {
            continue;
        };
        map.entry(tag).or_default().push(entry.v.clone());
    }
    map
}

/// First name entry in the advertisement, then the scan response
pub fn extract_name(adv: &[AdEntry], rsp: &[AdEntry]) -> String {
    adv.iter()
        .chain(rsp.iter())
        .find(|entry| matches!(entry.t, Some(AD_TYPE_SHORT_NAME | AD_TYPE_COMPLETE_NAME)))
        .map(|entry| entry.v.clone())
        .unwrap_or_default()
}

/// Advertisement registry keyed by device id, last write wins
#[derive(Debug, Clone, Default)]
pub struct AdvRegistry {
    records: HashMap<String, AdvRecord>,
}

impl AdvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store a batch of raw reports, returning how many were stored
    pub fn ingest(&mut self, gateway_id: &str, reports: &[RawAdvReport]) -> usize {
        self.merge(
            reports
                .iter()
                .map(|report| AdvRecord::from_report(gateway_id, report)),
        )
    }

    /// Store already parsed records, returning how many were stored
    pub fn merge<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = AdvRecord>,
    {
        let mut stored = 0;
        for record in records {
            self.insert(record);
            stored += 1;
        }
        stored
    }

    pub fn insert(&mut self, record: AdvRecord) -> Option<AdvRecord> {
        self.records.insert(record.device_id.clone(), record)
    }

    pub fn get(&self, device_id: &str) -> Option<&AdvRecord> {
        self.records.get(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.records.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> impl Iterator<Item = &AdvRecord> {
        self.records.values()
    }

    /// Records ordered by device id, for stable presentation
    pub fn sorted(&self) -> Vec<AdvRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TARGET: &str = "f03c155f53d7b1acef4ef696b701b56c";

    fn report(did: &str, rssi: i16, adv: Vec<AdEntry>) -> RawAdvReport {
        RawAdvReport {
            did: did.to_string(),
            dtype: 1,
            ev: 0,
            rssi,
            tss: 1_700_000_000,
            tsus: 0,
            adv,
            rsp: Vec::new(),
        }
    }

    #[test]
    fn test_name_from_advertisement() {
        let adv = vec![AdEntry::new(9, "D600-Sensor")];
        assert_eq!(extract_name(&adv, &[]), "D600-Sensor");
    }

    #[test]
    fn test_name_falls_back_to_scan_response() {
        let adv = vec![AdEntry::new(1, "06")];
        let rsp = vec![AdEntry::new(8, "D600")];
        assert_eq!(extract_name(&adv, &rsp), "D600");
    }

    #[test]
    fn test_name_absent() {
        let adv = vec![AdEntry::new(1, "06"), AdEntry::new(6, TARGET)];
        assert_eq!(extract_name(&adv, &[AdEntry::new(0xff, "0102")]), "");
        assert_eq!(extract_name(&[], &[]), "");
    }

    #[test]
    fn test_target_service_match() {
        let matching = AdvRecord::from_report(
            "gw",
            &report("665544332211", -50, vec![AdEntry::new(6, TARGET)]),
        );
        assert!(matches_target_service(&matching, TARGET));

        let untagged = AdvRecord::from_report(
            "gw",
            &report("665544332211", -50, vec![AdEntry::new(9, "other")]),
        );
        assert!(!matches_target_service(&untagged, TARGET));

        let mismatched = AdvRecord::from_report(
            "gw",
            &report(
                "665544332211",
                -50,
                vec![AdEntry::new(6, "0000180f00001000800000805f9b34fb")],
            ),
        );
        assert!(!matches_target_service(&mismatched, TARGET));

        // list membership is exact; a longer value embedding the UUID is not a match
        let embedded = AdvRecord::from_report(
            "gw",
            &report("665544332211", -50, vec![AdEntry::new(6, format!("{TARGET}00"))]),
        );
        assert!(!matches_target_service(&embedded, TARGET));
    }

    #[test]
    fn test_repeated_tags_are_appended() {
        let record = AdvRecord::from_report(
            "gw",
            &report(
                "01",
                -70,
                vec![
                    AdEntry::new(6, "aa"),
                    AdEntry::new(6, TARGET),
                    AdEntry { t: None, v: "ignored".into() },
                ],
            ),
        );
        assert_eq!(record.adv.get(&6).unwrap(), &vec!["aa".to_string(), TARGET.to_string()]);
        assert_eq!(record.adv.len(), 1);
        assert!(record.advertises_service(TARGET));
    }

    #[test]
    fn test_registry_last_write_wins() {
        let mut registry = AdvRegistry::new();
        registry.ingest("gw", &[report("665544332211", -80, vec![])]);
        registry.ingest(
            "gw",
            &[
                report("665544332211", -60, vec![]),
                report("aabbccddeeff", -40, vec![]),
            ],
        );
        registry.ingest("gw", &[report("665544332211", -55, vec![])]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("665544332211").unwrap().rssi, -55);
        assert_eq!(registry.get("665544332211").unwrap().gateway_id, "gw");

        let order: Vec<_> = registry.sorted().into_iter().map(|r| r.device_id).collect();
        assert_eq!(order, vec!["665544332211", "aabbccddeeff"]);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_report_deserialize_without_rsp() {
        let json = r#"{"did":"665544332211","dtype":0,"ev":0,"rssi":-61,"tss":1700000000,"tsus":5,
            "adv":[{"t":1,"v":"06"},{"v":"no-tag"},{"t":9,"v":"D600"}]}"#;
        let raw: RawAdvReport = serde_json::from_str(json).unwrap();
        assert!(raw.rsp.is_empty());

        let record = AdvRecord::from_report("gw", &raw);
        assert_eq!(record.name, "D600");
        assert_eq!(record.display_address(), "11:22:33:44:55:66");
    }
}
