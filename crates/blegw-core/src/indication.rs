//! Indication reassembly and card read decoding
//!
//! Scan results arrive as hex encoded indications, split over as many
//! fragments as the link needs. A fragment ending in `00` closes the
//! message; anything else is buffered per device until the closing
//! fragment arrives.

use std::collections::HashMap;

use serde::Serialize;

/// Trailing byte that closes a reassembled message
pub const TERMINATOR: &str = "00";

/// Per-device buffer of pending indication fragments
#[derive(Debug, Clone, Default)]
pub struct IndicationReassembler {
    pending: HashMap<String, String>,
}

impl IndicationReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning the complete value once it is terminated
    pub fn push(&mut self, device_id: &str, fragment: &str) -> Option<String> {
        if !fragment.ends_with(TERMINATOR) {
            self.pending
                .entry(device_id.to_string())
                .or_default()
                .push_str(fragment);
            return None;
        }
        let mut value = self.pending.remove(device_id).unwrap_or_default();
        value.push_str(fragment);
        Some(value)
    }

    pub fn pending(&self, device_id: &str) -> Option<&str> {
        self.pending.get(device_id).map(String::as_str)
    }

    /// Drop any partial message for a device
    pub fn clear(&mut self, device_id: &str) {
        self.pending.remove(device_id);
    }
}

fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Decode hex into printable ASCII.
///
/// Returns an empty string for odd-length input or if any byte falls outside
/// `0x20..=0x7f`. A trailing `00` byte is skipped; with `terminate_on_null`
/// the first `00` byte ends decoding.
pub fn printable_hex_ascii(hex: &str, terminate_on_null: bool) -> String {
    let bytes = hex.as_bytes();
    if bytes.len() % 2 == 1 {
        return String::new();
    }

    let mut out = String::with_capacity(bytes.len() / 2);
    for (index, pair) in bytes.chunks(2).enumerate() {
        let is_null = pair == b"00";
        if terminate_on_null && is_null {
            break;
        }
        if is_null && index * 2 == bytes.len() - 2 {
            continue;
        }

        let c = (nibble(pair[0]) << 4) | nibble(pair[1]);
        if !(0x20..=0x7f).contains(&c) {
            return String::new();
        }
        out.push(char::from(c));
    }
    out
}

/// Card technology reported by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Iso14443A,
    Iso14443B,
    Felica,
    Iso15693,
    NxpIcode1,
    PicoTag,
    Topaz,
    ThinfilmBarcode,
    StSrFamily,
    AskCts,
    NfcForum,
    Innovatron,
}

impl CardType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let card_type = match byte {
            0x01 => CardType::Iso14443A,
            0x02 => CardType::Iso14443B,
            0x03 => CardType::Felica,
            0x04 => CardType::Iso15693,
            0x08 => CardType::NxpIcode1,
            0x10 => CardType::PicoTag,
            0x11 => CardType::Topaz,
            0x18 => CardType::ThinfilmBarcode,
            0x20 => CardType::StSrFamily,
            0x40 => CardType::AskCts,
            0x4f => CardType::NfcForum,
            0x80 => CardType::Innovatron,
            _ => return None,
        };
        Some(card_type)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CardType::Iso14443A => "ISO 14443 type A (at least level 3)",
            CardType::Iso14443B => "ISO 14443 type B (at least level 3)",
            CardType::Felica => "Felica",
            CardType::Iso15693 => "ISO 15693",
            CardType::NxpIcode1 => "NXP ICODE1",
            CardType::PicoTag => "Inside Secure PicoTag (including HID iClass)",
            CardType::Topaz => "Innovision Topaz/Jewel",
            CardType::ThinfilmBarcode => "Thinfilm NFC Barcode",
            CardType::StSrFamily => "ST MicroElectronics SR family",
            CardType::AskCts => "ASK CTS256B or CTS512B",
            CardType::NfcForum => "NFC Forum",
            CardType::Innovatron => "Innovatron Radio Protocol (deprecated Calypso card)",
        }
    }
}

/// Label for a card type byte, `unknown(xx)` if unmapped
pub fn card_type_label(byte: u8) -> String {
    CardType::from_byte(byte)
        .map(|t| t.label().to_string())
        .unwrap_or_else(|| format!("unknown({byte:02x})"))
}

/// A decoded card read: technology label and payload text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardRead {
    pub card_type: String,
    pub payload: String,
}

/// Leading hex digits of the two-character class prefix
fn class_byte(prefix: &str) -> Option<u8> {
    let digits: String = prefix.chars().take_while(char::is_ascii_hexdigit).collect();
    if digits.is_empty() {
        return None;
    }
    u8::from_str_radix(&digits, 16).ok()
}

/// Split decoded reader text into card class and payload.
///
/// The reader prefixes each read with the card class as two hex digits.
/// URL reads (`ht...`) carry no prefix and are reported as NFC Forum.
pub fn decode_card_read(text: &str) -> CardRead {
    let prefix = text.get(..2).unwrap_or(text);
    let rest = text.get(2..).unwrap_or_default();

    if let Some(card_type) = class_byte(prefix).and_then(CardType::from_byte) {
        return CardRead {
            card_type: card_type.label().to_string(),
            payload: rest.to_string(),
        };
    }
    if prefix == "ht" {
        return CardRead {
            card_type: CardType::NfcForum.label().to_string(),
            payload: text.to_string(),
        };
    }
    CardRead {
        card_type: format!("unknown({prefix})"),
        payload: rest.to_string(),
    }
}

/// Decode a reassembled indication value into a card read
pub fn decode_indication(value: &str) -> CardRead {
    decode_card_read(&printable_hex_ascii(value, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DID: &str = "665544332211";

    #[test]
    fn test_reassembly() {
        let mut reassembler = IndicationReassembler::new();
        assert_eq!(reassembler.push(DID, "414243"), None);
        assert_eq!(reassembler.pending(DID), Some("414243"));

        let value = reassembler.push(DID, "444500").unwrap();
        assert_eq!(value, "414243444500");
        assert_eq!(reassembler.pending(DID), None);

        // the class prefix "AB" is not a known card type
        let read = decode_indication(&value);
        assert_eq!(read.card_type, "unknown(AB)");
        assert_eq!(read.payload, "CDE");
    }

    #[test]
    fn test_reassembly_is_per_device() {
        let mut reassembler = IndicationReassembler::new();
        assert_eq!(reassembler.push("aa", "3031"), None);
        assert_eq!(reassembler.push("bb", "303200").as_deref(), Some("303200"));
        assert_eq!(reassembler.push("aa", "3300").as_deref(), Some("30313300"));
    }

    #[test]
    fn test_single_fragment() {
        let mut reassembler = IndicationReassembler::new();
        assert_eq!(reassembler.push(DID, "303141424300").as_deref(), Some("303141424300"));
        let read = decode_indication("303141424300");
        assert_eq!(read.card_type, "ISO 14443 type A (at least level 3)");
        assert_eq!(read.payload, "ABC");
    }

    #[test]
    fn test_interior_null_truncates_decoded_text() {
        // a fragment that happens to end on a 00 byte closes the message early
        let mut reassembler = IndicationReassembler::new();
        assert_eq!(reassembler.push(DID, "30314100").as_deref(), Some("30314100"));
        assert_eq!(reassembler.push(DID, "424300").as_deref(), Some("424300"));

        assert_eq!(reassembler.push(DID, "3031410042"), None);
        let value = reassembler.push(DID, "4300").unwrap();
        assert_eq!(value, "30314100424300");

        // the sanitizer stops at the first 00 byte and drops the rest
        assert_eq!(printable_hex_ascii(&value, true), "01A");
        assert_eq!(printable_hex_ascii(&value, false), "");
    }

    #[test]
    fn test_printable_hex_ascii() {
        assert_eq!(printable_hex_ascii("48656c6c6f", false), "Hello");
        assert_eq!(printable_hex_ascii("48656c6c6f00", false), "Hello");
        assert_eq!(printable_hex_ascii("48656c6c6f0", false), "");
        assert_eq!(printable_hex_ascii("480a", false), "");
        assert_eq!(printable_hex_ascii("", true), "");
    }

    #[test]
    fn test_card_type_lookup() {
        assert_eq!(card_type_label(0x01), "ISO 14443 type A (at least level 3)");
        assert_eq!(card_type_label(0x4f), "NFC Forum");
        assert_eq!(card_type_label(0xff), "unknown(ff)");
    }

    #[test]
    fn test_decode_url_read() {
        let read = decode_card_read("https://example.com");
        assert_eq!(read.card_type, "NFC Forum");
        assert_eq!(read.payload, "https://example.com");
    }

    #[test]
    fn test_decode_short_text() {
        let read = decode_card_read("Z");
        assert_eq!(read.card_type, "unknown(Z)");
        assert_eq!(read.payload, "");

        // a single leading hex digit is enough to pick the class
        let read = decode_card_read("4x1234");
        assert_eq!(read.card_type, "ISO 15693");
        assert_eq!(read.payload, "1234");
    }
}
