//! Hex, address and timestamp conversions

use chrono::{DateTime, Local};

use crate::error::DecodeError;

/// Timestamp layout used for console records and the data file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Split a hex string into byte pairs, left-padding odd input with `0`
fn byte_pairs(hex: &str) -> Vec<String> {
    let padded = if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else {
        hex.to_string()
    };
    padded
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect()
}

/// Reverse the byte order of a hex string.
///
/// Input of one byte or less is returned unchanged.
pub fn swap_endianness(hex: &str) -> String {
    if hex.len() <= 2 {
        return hex.to_string();
    }
    byte_pairs(hex).into_iter().rev().collect()
}

/// Render a little-endian device id as a colon separated, uppercase address.
///
/// `"665544332211"` becomes `"11:22:33:44:55:66"`.
pub fn display_address(device_id: &str) -> String {
    if device_id.len() <= 2 {
        return device_id.to_string();
    }
    byte_pairs(&swap_endianness(device_id))
        .join(":")
        .to_uppercase()
}

/// Convert a gateway timestamp (seconds + microseconds) to local time
pub fn unix_to_local(seconds: i64, micros: u32) -> DateTime<Local> {
    let nanos = micros.min(999_999) * 1_000;
    DateTime::from_timestamp(seconds, nanos)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

/// Local ISO-8601 timestamp with milliseconds and no zone suffix
pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Battery level is the first byte of the characteristic value
pub fn decode_battery_level(hex: &str) -> Result<u8, DecodeError> {
    let bytes = hex::decode(hex)?;
    bytes.first().copied().ok_or(DecodeError::Empty)
}

/// Decode a hex string into UTF-8 text, dropping trailing NULs
pub fn utf8_from_hex(hex: &str) -> Result<String, DecodeError> {
    let bytes = hex::decode(hex)?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_address() {
        assert_eq!(display_address("665544332211"), "11:22:33:44:55:66");
        assert_eq!(display_address("abcdef"), "EF:CD:AB");
        assert_eq!(display_address("bcdef"), "EF:CD:0B");
        assert_eq!(display_address("ab"), "ab");
        assert_eq!(display_address(""), "");
    }

    #[test]
    fn test_swap_endianness() {
        assert_eq!(swap_endianness("1a00"), "001a");
        assert_eq!(swap_endianness("a00"), "000a");
        assert_eq!(swap_endianness("7f"), "7f");
    }

    #[test]
    fn test_decode_battery_level() {
        assert_eq!(decode_battery_level("5a").unwrap(), 90);
        assert_eq!(decode_battery_level("6400").unwrap(), 100);
        assert_eq!(decode_battery_level(""), Err(DecodeError::Empty));
        assert!(matches!(decode_battery_level("zz"), Err(DecodeError::Hex(_))));
    }

    #[test]
    fn test_utf8_from_hex() {
        assert_eq!(utf8_from_hex("44363030").unwrap(), "D600");
        assert_eq!(utf8_from_hex("4436303000").unwrap(), "D600");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = unix_to_local(1_700_000_000, 123_456);
        let text = format_timestamp(&ts);
        assert_eq!(text.len(), "2023-11-14T22:13:20.123".len());
        assert!(text.ends_with(".123"));
        assert!(!text.ends_with('Z'));
        assert_eq!(ts.nanosecond(), 123_456_000);
    }
}
