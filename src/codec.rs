//! `MessageCodec`: JSON encode/decode of the wire envelope.
//!
//! Dates use RFC3339 with millisecond precision (via `chrono`'s serde
//! support, wired into [`crate::message::Ctrl`]/[`crate::message::Meta`]).
//! Binary attributes use base64 (no padding concerns, standard alphabet).

use base64::Engine;

use crate::{
    error::{Error, Result},
    message::{ClientMessage, ServerMessage},
};

/// Encodes client messages, decodes server frames.
///
/// Stateless, kept as a named type rather than free functions to give
/// callers a seam to swap in a different wire format later.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Serializes a client message. Emits exactly one top-level tag; never
    /// emits null-valued optional fields (they are simply omitted via
    /// `skip_serializing_if`) except where a field's value is literally the
    /// null-sentinel string, which serializes as that string, not `null`.
    pub fn encode(&self, msg: &ClientMessage) -> Result<String> {
        serde_json::to_string(msg).map_err(Error::JsonEncode)
    }

    /// Decodes one server frame. Fails if the outer JSON object has zero or
    /// more than one recognized tag (enforced by `ServerMessage`'s derived
    /// externally-tagged `Deserialize` impl), or if the JSON itself is
    /// malformed.
    pub fn decode(&self, raw: &str) -> Result<ServerMessage> {
        serde_json::from_str(raw).map_err(Error::JsonDecode)
    }
}

/// RFC3339 (millisecond precision) timestamp, as used on `ctrl.ts` and the
/// `desc.updated`/`desc.touched` fields the core reads out of `meta`.
#[must_use]
pub fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Standard-alphabet base64 encode, used for binary payload attributes.
#[must_use]
pub fn encode_binary(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_binary(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Message(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, Hi};

    #[test]
    fn encode_then_decode_ctrl_fixture() {
        let codec = MessageCodec::new();
        let hi = ClientMessage::Hi(Hi {
            id: "1".into(),
            ver: Some("0.16".into()),
            ua: Some("app (os; en);tinode-core/x".into()),
            dev: None,
            lang: Some("en".into()),
        });
        let encoded = codec.encode(&hi).unwrap();
        assert!(encoded.contains("\"ver\":\"0.16\""));

        let decoded = codec
            .decode(r#"{"ctrl":{"id":"1","code":201,"text":"Created","params":{"ver":"0.20","build":"abc"}}}"#)
            .unwrap();
        assert!(matches!(decoded, ServerMessage::Ctrl(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = MessageCodec::new();
        assert!(codec.decode("not json").is_err());
    }

    #[test]
    fn base64_roundtrip() {
        let bytes = b"hello world";
        let encoded = encode_binary(bytes);
        let decoded = decode_binary(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn timestamp_roundtrip_millis() {
        let now = chrono::Utc::now();
        let formatted = format_timestamp(now);
        let parsed = parse_timestamp(&formatted).unwrap();
        assert_eq!(now.timestamp_millis(), parsed.timestamp_millis());
    }
}
