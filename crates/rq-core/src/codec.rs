//! # Context Codec
//!
//! Packs a flat `field -> value` record into the single free-text metadata slot
//! the card store offers, and recovers it from whatever shape the store hands
//! back later.
//!
//! Wire format: `key=value|key=value`, each value percent-encoded with the
//! `encodeURIComponent` character set so neither separator can occur inside it.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Separates `key=value` pairs.
pub const PAIR_SEPARATOR: char = '|';
/// Separates a key from its value. Only the first occurrence counts.
pub const KV_SEPARATOR: char = '=';
/// Key under which the encoded payload is filed in the store's context map.
pub const ENTRY_KEY: &str = "entry";

/// Everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// The shapes a store may report a card's metadata in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContextPayload {
    /// Nothing recognizable was attached.
    #[default]
    Missing,
    /// The encoded string exactly as written.
    RawString(String),
    /// The encoded string, rewrapped under `custom.entry` or `entry`.
    NestedEntry(String),
    /// Already split into fields by the store.
    FlatRecord(BTreeMap<String, String>),
}

impl ContextPayload {
    /// Classifies a JSON value reported by a store.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(raw) => ContextPayload::RawString(raw.clone()),
            Value::Object(map) => {
                let custom = map.get("custom").and_then(Value::as_object);

                let entry = custom
                    .and_then(|c| c.get(ENTRY_KEY))
                    .or_else(|| map.get(ENTRY_KEY))
                    .and_then(Value::as_str);
                if let Some(entry) = entry {
                    return ContextPayload::NestedEntry(entry.to_string());
                }

                let fields: BTreeMap<String, String> = custom
                    .unwrap_or(map)
                    .iter()
                    .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                    .collect();
                if fields.is_empty() {
                    ContextPayload::Missing
                } else {
                    ContextPayload::FlatRecord(fields)
                }
            }
            _ => ContextPayload::Missing,
        }
    }

    /// Recovers the field map. Never fails; unknown shapes yield an empty map.
    pub fn decode(&self) -> BTreeMap<String, String> {
        match self {
            ContextPayload::Missing => BTreeMap::new(),
            ContextPayload::RawString(raw) | ContextPayload::NestedEntry(raw) => decode(raw),
            ContextPayload::FlatRecord(fields) => fields.clone(),
        }
    }
}

impl<'de> Deserialize<'de> for ContextPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(ContextPayload::from_json(&value))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Encodes a record as `key=value|key=value`.
pub fn encode(fields: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        if !out.is_empty() {
            out.push(PAIR_SEPARATOR);
        }
        out.push_str(key);
        out.push(KV_SEPARATOR);
        out.extend(utf8_percent_encode(value, COMPONENT));
    }
    out
}

/// Decodes an encoded string. A malformed value resolves to `""` without
/// affecting its neighbours.
pub fn decode(raw: &str) -> BTreeMap<String, String> {
    raw.split(PAIR_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once(KV_SEPARATOR) {
            Some((key, value)) => (key.to_string(), decode_value(value)),
            None => (segment.to_string(), String::new()),
        })
        .collect()
}

fn decode_value(value: &str) -> String {
    if !has_valid_escapes(value) {
        return String::new();
    }
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .unwrap_or_default()
}

/// Every `%` must introduce two hex digits.
fn has_valid_escapes(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip_with_reserved_characters() {
        let fields = record(&[
            ("indicatif", "F4ABC"),
            ("note", "73 & merci | a=b 100%"),
            ("report", "59+"),
            ("mode", "SSB"),
            ("date", "2025-03-01"),
            ("empty", ""),
            ("unicode", "Grüße de Montréal ✓"),
        ]);
        let encoded = encode(&fields);
        assert_eq!(encoded.matches(PAIR_SEPARATOR).count(), fields.len() - 1);
        assert_eq!(decode(&encoded), fields);
    }

    #[test]
    fn test_encode_uses_uri_component_set() {
        let encoded = encode(&record(&[("note", "a b=c|d~*'()!")]));
        assert_eq!(encoded, "note=a%20b%3Dc%7Cd~*'()!");
    }

    #[test]
    fn test_decode_splits_on_first_separator_only() {
        let decoded = decode("note=x=y|band=20m");
        assert_eq!(decoded["note"], "x=y");
        assert_eq!(decoded["band"], "20m");
    }

    #[test]
    fn test_malformed_segment_resolves_to_empty() {
        let decoded = decode("note=100%|band=20m|mode=%E0%A4%A|call=%FF");
        assert_eq!(decoded["note"], "");
        assert_eq!(decoded["band"], "20m");
        assert_eq!(decoded["mode"], "");
        assert_eq!(decoded["call"], "");
    }

    #[test]
    fn test_decode_tolerates_empty_input() {
        assert!(decode("").is_empty());
        assert!(decode("|||").is_empty());
        assert!(ContextPayload::Missing.decode().is_empty());
        assert_eq!(decode("orphan")["orphan"], "");
    }

    #[test]
    fn test_payload_shapes() {
        let raw = encode(&record(&[("indicatif", "F4ABC"), ("band", "20m")]));

        let shapes = [
            json!(raw.clone()),
            json!({ "custom": { "entry": raw.clone() } }),
            json!({ "entry": raw.clone() }),
            json!({ "custom": { "indicatif": "F4ABC", "band": "20m" } }),
            json!({ "indicatif": "F4ABC", "band": "20m" }),
        ];
        for shape in shapes {
            let decoded = ContextPayload::from_json(&shape).decode();
            assert_eq!(decoded["indicatif"], "F4ABC", "shape {shape}");
            assert_eq!(decoded["band"], "20m", "shape {shape}");
        }
    }

    #[test]
    fn test_unrecognized_shapes_are_missing() {
        for value in [json!(null), json!(42), json!([]), json!({}), json!({ "custom": {} })] {
            assert_eq!(ContextPayload::from_json(&value), ContextPayload::Missing);
        }
    }

    #[test]
    fn test_flat_record_stringifies_scalars() {
        let payload = ContextPayload::from_json(&json!({ "downloads": 3, "ok": true, "nested": {} }));
        let decoded = payload.decode();
        assert_eq!(decoded["downloads"], "3");
        assert_eq!(decoded["ok"], "true");
        assert!(!decoded.contains_key("nested"));
    }

    #[test]
    fn test_deserializes_inside_store_response() {
        #[derive(Deserialize)]
        struct Resource {
            #[serde(default)]
            context: ContextPayload,
        }

        let with: Resource =
            serde_json::from_value(json!({ "context": { "custom": { "entry": "band=40m" } } })).unwrap();
        assert_eq!(with.context, ContextPayload::NestedEntry("band=40m".to_string()));

        let without: Resource = serde_json::from_value(json!({})).unwrap();
        assert_eq!(without.context, ContextPayload::Missing);
    }
}
