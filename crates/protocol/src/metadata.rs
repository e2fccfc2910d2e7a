//! Opaque per-object metadata.
//!
//! Callers attach an arbitrary JSON mapping to an object. It travels as one
//! JSON string stored in the reserved [`METADATA_SLOT`] of the store's
//! user-metadata map, leaving every other slot untouched.

use std::collections::HashMap;

use crate::ProtocolError;

/// Name of the user-metadata slot holding the encoded mapping.
pub const METADATA_SLOT: &str = "stowage";

/// Caller-supplied metadata: string keys to JSON values.
pub type ObjectMetadata = serde_json::Map<String, serde_json::Value>;

/// Raw user-metadata slots as the store keeps them (string to string).
pub type MetadataSlots = HashMap<String, String>;

/// Serializes `metadata` into the string stored in the reserved slot.
pub fn encode_metadata(metadata: &ObjectMetadata) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(metadata)?)
}

/// Parses a slot value back into a mapping.
///
/// An absent slot decodes to an empty mapping: objects written before the slot
/// existed, or by other tools, simply have no metadata.
pub fn decode_metadata(slot: Option<&str>) -> Result<ObjectMetadata, ProtocolError> {
    match slot {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(ObjectMetadata::new()),
    }
}

/// Builds the slot map carrying `metadata`.
pub fn to_slots(metadata: &ObjectMetadata) -> Result<MetadataSlots, ProtocolError> {
    let mut slots = MetadataSlots::new();
    slots.insert(METADATA_SLOT.to_string(), encode_metadata(metadata)?);
    Ok(slots)
}

/// Extracts and decodes the reserved slot from a store's slot map.
pub fn from_slots(slots: &MetadataSlots) -> Result<ObjectMetadata, ProtocolError> {
    decode_metadata(slots.get(METADATA_SLOT).map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: serde_json::Value) -> ObjectMetadata {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn absent_slot_is_empty() {
        assert!(decode_metadata(None).unwrap().is_empty());
    }

    #[test]
    fn round_trip_nested_values() {
        let meta = mapping(json!({
            "owner": "alice",
            "version": 3,
            "ratio": 0.25,
            "tags": ["raw", "2024"],
            "nested": {"ok": true, "none": null},
        }));
        let encoded = encode_metadata(&meta).unwrap();
        assert_eq!(decode_metadata(Some(&encoded)).unwrap(), meta);
    }

    #[test]
    fn round_trip_empty_mapping() {
        let meta = ObjectMetadata::new();
        let encoded = encode_metadata(&meta).unwrap();
        assert_eq!(encoded, "{}");
        assert_eq!(decode_metadata(Some(&encoded)).unwrap(), meta);
    }

    #[test]
    fn round_trip_unicode_keys() {
        let meta = mapping(json!({"clé": "välue", "": ""}));
        let encoded = encode_metadata(&meta).unwrap();
        assert_eq!(decode_metadata(Some(&encoded)).unwrap(), meta);
    }

    #[test]
    fn malformed_slot_is_an_error() {
        assert!(matches!(
            decode_metadata(Some("{not json")),
            Err(ProtocolError::Metadata(_))
        ));
        // Valid JSON that is not a mapping is rejected too.
        assert!(decode_metadata(Some("[1,2]")).is_err());
    }

    #[test]
    fn slots_only_touch_reserved_name() {
        let meta = mapping(json!({"a": 1}));
        let mut slots = to_slots(&meta).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots.contains_key(METADATA_SLOT));

        slots.insert("other-tool".into(), "x".into());
        assert_eq!(from_slots(&slots).unwrap(), meta);
    }

    #[test]
    fn slots_without_reserved_name_decode_empty() {
        let mut slots = MetadataSlots::new();
        slots.insert("content-origin".into(), "elsewhere".into());
        assert!(from_slots(&slots).unwrap().is_empty());
    }
}
