//! Announce app-data composition and decoding.
//!
//! The wire format is a canonical msgpack three-element sequence shared
//! with the wider delivery ecosystem:
//!
//! 1. display name bytes (empty when unset)
//! 2. inbound stamp cost, or nil
//! 3. avatar metadata map `{h, t, s, u}`, or nil
//!
//! Peers parse this exactly; the encoding must byte-match what their
//! routers emit.

use rmpv::Value;

/// Avatar metadata carried inside announce app-data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarMeta {
    /// 16-byte truncated fingerprint of the avatar bytes.
    pub fingerprint: Vec<u8>,
    /// Mime type, e.g. `image/png`.
    pub mime: String,
    /// Avatar size in bytes.
    pub size: u64,
    /// Unix mtime of the last avatar change.
    pub updated: u64,
}

/// Decoded announce app-data.
#[derive(Debug, Clone, Default)]
pub struct DecodedAppData {
    /// Display name, empty when unset.
    pub display_name: String,
    /// Inbound stamp cost, when advertised.
    pub stamp_cost: Option<u8>,
    /// Avatar metadata, when advertised.
    pub avatar: Option<AvatarMeta>,
}

/// Compose announce app-data.
///
/// The stamp cost is emitted only when strictly between 0 and 255,
/// matching what peers accept.
pub fn compose_app_data(
    display_name: &str,
    stamp_cost: Option<u8>,
    avatar: Option<&AvatarMeta>,
) -> Vec<u8> {
    let name = if display_name.is_empty() {
        Value::Binary(Vec::new())
    } else {
        Value::Binary(display_name.as_bytes().to_vec())
    };

    let cost = match stamp_cost {
        Some(cost) if cost > 0 && cost < 255 => Value::from(cost),
        _ => Value::Nil,
    };

    let avatar_value = match avatar {
        Some(meta) => Value::Map(vec![
            (Value::String("h".into()), Value::Binary(meta.fingerprint.clone())),
            (Value::String("t".into()), Value::String(meta.mime.clone().into())),
            (Value::String("s".into()), Value::from(meta.size)),
            (Value::String("u".into()), Value::from(meta.updated)),
        ]),
        None => Value::Nil,
    };

    let value = Value::Array(vec![name, cost, avatar_value]);
    let mut out = Vec::new();
    // Encoding a fully-owned value tree cannot fail.
    if rmpv::encode::write_value(&mut out, &value).is_err() {
        return Vec::new();
    }
    out
}

/// Decode announce app-data. Returns `None` when the bytes are not the
/// expected sequence.
pub fn decode_app_data(bytes: &[u8]) -> Option<DecodedAppData> {
    if bytes.is_empty() {
        return None;
    }
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor).ok()?;
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return None,
    };

    let mut decoded = DecodedAppData {
        display_name: name_from_value(&items[0]),
        ..Default::default()
    };

    if let Some(cost) = items.get(1).and_then(Value::as_u64) {
        if cost > 0 && cost < 255 {
            decoded.stamp_cost = Some(cost as u8);
        }
    }

    if let Some(Value::Map(pairs)) = items.get(2) {
        decoded.avatar = avatar_from_map(pairs);
    }

    Some(decoded)
}

/// Extract just the display name, tolerating both binary and string
/// encodings. Empty string when absent or undecodable.
pub fn display_name_from_app_data(bytes: &[u8]) -> String {
    decode_app_data(bytes)
        .map(|decoded| decoded.display_name)
        .unwrap_or_default()
}

fn name_from_value(value: &Value) -> String {
    match value {
        Value::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::String(s) => s.as_str().unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn avatar_from_map(pairs: &[(Value, Value)]) -> Option<AvatarMeta> {
    let mut meta = AvatarMeta {
        fingerprint: Vec::new(),
        mime: String::new(),
        size: 0,
        updated: 0,
    };

    for (key, value) in pairs {
        let key = match key {
            Value::String(s) => s.as_str().unwrap_or_default().to_string(),
            Value::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            _ => continue,
        };
        match key.as_str() {
            "h" => {
                if let Value::Binary(bytes) = value {
                    meta.fingerprint = bytes.clone();
                }
            }
            "t" => {
                if let Some(s) = value.as_str() {
                    meta.mime = s.to_string();
                }
            }
            "s" => meta.size = value.as_u64().unwrap_or(0),
            "u" => meta.updated = value.as_u64().unwrap_or(0),
            _ => {}
        }
    }

    if meta.fingerprint.is_empty() && meta.mime.is_empty() && meta.size == 0 && meta.updated == 0 {
        return None;
    }
    Some(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_decode_full_payload() {
        let avatar = AvatarMeta {
            fingerprint: vec![0xAB; 16],
            mime: "image/png".into(),
            size: 1024,
            updated: 1_700_000_000,
        };
        let bytes = compose_app_data("Alice", None, Some(&avatar));
        let decoded = decode_app_data(&bytes).unwrap();

        assert_eq!(decoded.display_name, "Alice");
        assert_eq!(decoded.stamp_cost, None);
        assert_eq!(decoded.avatar, Some(avatar));
    }

    #[test]
    fn test_payload_shape_matches_wire_contract() {
        // ["Alice" (bin), nil, {h, t, s, u}]
        let avatar = AvatarMeta {
            fingerprint: vec![1; 16],
            mime: "image/png".into(),
            size: 1024,
            updated: 1_700_000_000,
        };
        let bytes = compose_app_data("Alice", None, Some(&avatar));

        let mut cursor = &bytes[..];
        let value = rmpv::decode::read_value(&mut cursor).unwrap();
        let items = match value {
            Value::Array(items) => items,
            other => panic!("expected array, got {other:?}"),
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Value::Binary(b"Alice".to_vec()));
        assert_eq!(items[1], Value::Nil);
        assert!(matches!(items[2], Value::Map(_)));
    }

    #[test]
    fn test_empty_display_name_packs_empty_bytes() {
        let bytes = compose_app_data("", None, None);
        let mut cursor = &bytes[..];
        let value = rmpv::decode::read_value(&mut cursor).unwrap();
        let items = match value {
            Value::Array(items) => items,
            other => panic!("expected array, got {other:?}"),
        };
        assert_eq!(items[0], Value::Binary(Vec::new()));
        assert_eq!(items[2], Value::Nil);
    }

    #[test]
    fn test_stamp_cost_bounds() {
        for (cost, expected) in [(Some(0), None), (Some(32), Some(32)), (Some(255), None)] {
            let bytes = compose_app_data("n", cost, None);
            let decoded = decode_app_data(&bytes).unwrap();
            assert_eq!(decoded.stamp_cost, expected, "cost {cost:?}");
        }
    }

    #[test]
    fn test_decode_tolerates_string_display_name() {
        let value = Value::Array(vec![
            Value::String("Bob".into()),
            Value::Nil,
            Value::Nil,
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();

        assert_eq!(display_name_from_app_data(&bytes), "Bob");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_app_data(b"").is_none());
        assert!(decode_app_data(b"\xc1\xc1\xc1").is_none());
    }
}
