//! Value codecs
//!
//! A codec maps block values to the raw bytes stored in a log and back.
//! Codecs are looked up by name so descriptors can persist their encoding
//! as a string; the registry ships `binary`, `utf-8` and `json` and accepts
//! caller-registered codecs under new names.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A decoded block value.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockValue {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl BlockValue {
    /// The value as text, when it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            BlockValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as raw bytes, when it is bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BlockValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The value as JSON, when it is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            BlockValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for BlockValue {
    fn from(s: &str) -> Self {
        BlockValue::Text(s.to_string())
    }
}

impl From<String> for BlockValue {
    fn from(s: String) -> Self {
        BlockValue::Text(s)
    }
}

impl From<Vec<u8>> for BlockValue {
    fn from(b: Vec<u8>) -> Self {
        BlockValue::Bytes(b)
    }
}

impl From<&[u8]> for BlockValue {
    fn from(b: &[u8]) -> Self {
        BlockValue::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for BlockValue {
    fn from(v: serde_json::Value) -> Self {
        BlockValue::Json(v)
    }
}

/// Errors raised while encoding or decoding block values
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("codec {codec} cannot encode this value")]
    Unsupported { codec: String },

    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode/decode seam for one named encoding.
pub trait BlockCodec: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, value: &BlockValue) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<BlockValue, CodecError>;
}

/// Pass-through codec: bytes in, bytes out. Text is stored as its utf-8 bytes.
pub struct BinaryCodec;

impl BlockCodec for BinaryCodec {
    fn name(&self) -> &str {
        "binary"
    }

    fn encode(&self, value: &BlockValue) -> Result<Vec<u8>, CodecError> {
        match value {
            BlockValue::Bytes(b) => Ok(b.clone()),
            BlockValue::Text(s) => Ok(s.as_bytes().to_vec()),
            BlockValue::Json(_) => Err(CodecError::Unsupported {
                codec: "binary".into(),
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<BlockValue, CodecError> {
        Ok(BlockValue::Bytes(bytes.to_vec()))
    }
}

/// Text codec: values must be valid utf-8 on both sides.
pub struct Utf8Codec;

impl BlockCodec for Utf8Codec {
    fn name(&self) -> &str {
        "utf-8"
    }

    fn encode(&self, value: &BlockValue) -> Result<Vec<u8>, CodecError> {
        match value {
            BlockValue::Text(s) => Ok(s.as_bytes().to_vec()),
            BlockValue::Bytes(b) => {
                // Accept bytes that happen to be valid text.
                let s = String::from_utf8(b.clone())?;
                Ok(s.into_bytes())
            }
            BlockValue::Json(_) => Err(CodecError::Unsupported {
                codec: "utf-8".into(),
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<BlockValue, CodecError> {
        Ok(BlockValue::Text(String::from_utf8(bytes.to_vec())?))
    }
}

/// JSON codec over `serde_json::Value`.
pub struct JsonCodec;

impl BlockCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &BlockValue) -> Result<Vec<u8>, CodecError> {
        match value {
            BlockValue::Json(v) => Ok(serde_json::to_vec(v)?),
            BlockValue::Text(s) => Ok(serde_json::to_vec(&serde_json::Value::String(s.clone()))?),
            BlockValue::Bytes(_) => Err(CodecError::Unsupported {
                codec: "json".into(),
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<BlockValue, CodecError> {
        Ok(BlockValue::Json(serde_json::from_slice(bytes)?))
    }
}

/// Registry of named codecs.
///
/// Cheap to clone; registered codecs are shared.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn BlockCodec>>,
}

impl CodecRegistry {
    /// Registry with the built-in `binary`, `utf-8` and `json` codecs.
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(Arc::new(BinaryCodec));
        registry.register(Arc::new(Utf8Codec));
        registry.register(Arc::new(JsonCodec));
        registry
    }

    /// Register a codec under its own name, replacing any previous codec
    /// with that name.
    pub fn register(&mut self, codec: Arc<dyn BlockCodec>) {
        self.codecs.insert(codec.name().to_string(), codec);
    }

    /// Look up a codec by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BlockCodec>> {
        self.codecs.get(name).cloned()
    }

    /// Look up a codec by name, erroring on unknown names.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BlockCodec>, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::UnknownEncoding(name.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_present() {
        let registry = CodecRegistry::new();
        for name in ["binary", "utf-8", "json"] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
        assert!(registry.get("msgpack").is_none());
    }

    #[test]
    fn test_utf8_round_trip() {
        let codec = Utf8Codec;
        let bytes = codec.encode(&"Foundation and Empire".into()).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!(back.as_text(), Some("Foundation and Empire"));
    }

    #[test]
    fn test_utf8_rejects_bad_bytes() {
        let codec = Utf8Codec;
        assert!(codec.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        let value = BlockValue::Json(json!({"topic": "books", "n": 3}));
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_binary_passthrough() {
        let codec = BinaryCodec;
        let bytes = codec.encode(&vec![0u8, 1, 2, 255].into()).unwrap();
        assert_eq!(bytes, vec![0u8, 1, 2, 255]);
        assert_eq!(
            codec.decode(&bytes).unwrap().as_bytes(),
            Some(&[0u8, 1, 2, 255][..])
        );
    }

    #[test]
    fn test_custom_codec_registration() {
        struct Upper;
        impl BlockCodec for Upper {
            fn name(&self) -> &str {
                "upper"
            }
            fn encode(&self, value: &BlockValue) -> Result<Vec<u8>, CodecError> {
                match value {
                    BlockValue::Text(s) => Ok(s.to_uppercase().into_bytes()),
                    _ => Err(CodecError::Unsupported {
                        codec: "upper".into(),
                    }),
                }
            }
            fn decode(&self, bytes: &[u8]) -> Result<BlockValue, CodecError> {
                Ok(BlockValue::Text(String::from_utf8(bytes.to_vec())?))
            }
        }

        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(Upper));
        let codec = registry.resolve("upper").unwrap();
        assert_eq!(codec.encode(&"abc".into()).unwrap(), b"ABC".to_vec());
    }
}
