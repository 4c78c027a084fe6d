use crate::domain::record::IdempotencyRecord;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Default cap on the stored payload, in bytes of serialized JSON.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 4096;

/// Cap on the fallback Debug rendering used when serialization fails.
const FALLBACK_REF_LEN: usize = 256;

/// A result type storable by the engine.
///
/// `stable_ref` is the statically-checked replacement for probing a result
/// object at runtime for a `publicId`-shaped accessor: types that carry a
/// short public identifier override it, everything else inherits the `None`
/// default and is handled by the codec's fallbacks.
pub trait IdempotentPayload: Serialize + DeserializeOwned + Debug + Send {
    /// Short public identifier retained even when the serialized payload is
    /// truncated, so a truncated record still has a usable handle.
    fn stable_ref(&self) -> Option<String> {
        None
    }
}

impl IdempotentPayload for () {}

impl IdempotentPayload for String {
    fn stable_ref(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl IdempotentPayload for serde_json::Value {}

/// Encoded form of a result: a small stable reference plus the (possibly
/// truncated) serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub result_ref: Option<String>,
    pub result_json: Option<String>,
}

/// Serializes business results into a storable form, with size capping and
/// stable-reference extraction.
///
/// Injected into the executor at construction; its lifecycle is owned by the
/// caller, there is no process-wide serializer singleton.
#[derive(Debug, Clone)]
pub struct JsonResultCodec {
    max_payload_len: usize,
}

impl Default for JsonResultCodec {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl JsonResultCodec {
    pub fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }

    /// Encode a result. Never fails: an oversized payload is truncated and a
    /// serialization failure falls back to the stable reference or a short
    /// Debug rendering, so a terminal record can always be written.
    pub fn encode<T: IdempotentPayload>(&self, value: &T) -> EncodedPayload {
        let result_ref = value.stable_ref();
        match serde_json::to_string(value) {
            Ok(json) if json.len() > self.max_payload_len => EncodedPayload {
                result_ref,
                result_json: Some(truncate_at_char_boundary(&json, self.max_payload_len)),
            },
            Ok(json) => EncodedPayload {
                result_ref,
                result_json: Some(json),
            },
            Err(_) => EncodedPayload {
                result_ref: result_ref
                    .or_else(|| Some(truncate_at_char_boundary(&format!("{value:?}"), FALLBACK_REF_LEN))),
                result_json: None,
            },
        }
    }

    /// Decode a stored record back into the result type.
    ///
    /// An absent payload falls back to the stable reference (as a JSON
    /// string, which covers `String` results), then to JSON `null`, which
    /// covers void-result operations.
    pub fn decode<T: IdempotentPayload>(&self, record: &IdempotencyRecord) -> Result<T> {
        if let Some(json) = &record.result_json {
            return Ok(serde_json::from_str(json)?);
        }
        if let Some(result_ref) = &record.result_ref
            && let Ok(value) = serde_json::from_value(serde_json::Value::String(result_ref.clone()))
        {
            return Ok(value);
        }
        Ok(serde_json::from_value(serde_json::Value::Null)?)
    }
}

fn truncate_at_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{IdemStatus, IdempotencyRecord};
    use serde::Deserialize;
    use std::time::SystemTime;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Receipt {
        order_id: u64,
        public_id: String,
    }

    impl IdempotentPayload for Receipt {
        fn stable_ref(&self) -> Option<String> {
            Some(self.public_id.clone())
        }
    }

    fn record_with(result_ref: Option<String>, result_json: Option<String>) -> IdempotencyRecord {
        let now = SystemTime::now();
        IdempotencyRecord {
            tenant_id: 1,
            biz_type: "ORDER_SUBMIT".into(),
            idem_key: "k-1".into(),
            request_hash: "h1".into(),
            status: IdemStatus::Succeeded,
            result_ref,
            result_json,
            error_code: None,
            error_msg: None,
            expire_at: now,
            lock_until: now,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_encode_small_payload_keeps_full_json() {
        let codec = JsonResultCodec::default();
        let receipt = Receipt {
            order_id: 42,
            public_id: "ord_42".into(),
        };

        let encoded = codec.encode(&receipt);
        assert_eq!(encoded.result_ref.as_deref(), Some("ord_42"));
        let json = encoded.result_json.unwrap();
        let parsed: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, receipt);
    }

    #[test]
    fn test_encode_oversized_payload_truncates_and_keeps_ref() {
        let codec = JsonResultCodec::new(32);
        let receipt = Receipt {
            order_id: 42,
            public_id: "x".repeat(100),
        };

        let encoded = codec.encode(&receipt);
        assert_eq!(encoded.result_ref.as_deref(), Some("x".repeat(100).as_str()));
        assert!(encoded.result_json.unwrap().len() <= 32);
    }

    #[test]
    fn test_decode_round_trip() {
        let codec = JsonResultCodec::default();
        let receipt = Receipt {
            order_id: 7,
            public_id: "ord_7".into(),
        };
        let encoded = codec.encode(&receipt);
        let record = record_with(encoded.result_ref, encoded.result_json);

        let decoded: Receipt = codec.decode(&record).unwrap();
        assert_eq!(decoded, receipt);
    }

    #[test]
    fn test_decode_truncated_payload_is_a_codec_error() {
        let codec = JsonResultCodec::default();
        let record = record_with(Some("ord_42".into()), Some("{\"order_id\":4".into()));

        let result: crate::error::Result<Receipt> = codec.decode(&record);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_string_from_ref_only() {
        let codec = JsonResultCodec::default();
        let record = record_with(Some("ord_42".into()), None);

        let decoded: String = codec.decode(&record).unwrap();
        assert_eq!(decoded, "ord_42");
    }

    #[test]
    fn test_decode_absent_payload_as_unit() {
        let codec = JsonResultCodec::default();
        let record = record_with(None, None);

        codec.decode::<()>(&record).unwrap();
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let s = "aé".repeat(20);
        let truncated = truncate_at_char_boundary(&s, 4);
        assert!(truncated.len() <= 4);
        assert!(s.starts_with(&truncated));
    }
}
