use serde_json::{json, Value};

use crate::error::CodecError;
use crate::messages::{Message, MessageKind};

pub const PROTOCOL_VERSION: u16 = 1;
pub const SUPPORTED_VERSIONS: &[u16] = &[1];
pub const DEFAULT_MAX_MESSAGE_MB: usize = 64;

const ENVELOPE_KEYS: [&str; 3] = ["version", "type", "body"];

/// How a decoder treats fields its protocol version does not know.
///
/// Unknown top-level body fields are kept in the message's `extra` map and
/// emitted again on encode. Unknown fields nested inside typed values (a
/// result, a record) and unknown envelope fields have nowhere to live, so
/// lenient decoding drops them with a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Reject messages carrying any field this version does not know, at any
    /// depth and in the envelope.
    Strict,
    /// Accept unknown fields, keeping the top-level body ones.
    #[default]
    Lenient,
}

impl std::str::FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(DecodeMode::Strict),
            "lenient" => Ok(DecodeMode::Lenient),
            other => Err(format!("unknown protocol mode {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub mode: DecodeMode,
    pub max_message_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Lenient,
            max_message_bytes: DEFAULT_MAX_MESSAGE_MB * 1024 * 1024,
        }
    }
}

/// Encodes messages as `{"version", "type", "body"}` JSON envelopes.
#[derive(Debug, Clone, Default)]
pub struct ProtocolCodec {
    config: CodecConfig,
}

impl ProtocolCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn strict() -> Self {
        Self::new(CodecConfig {
            mode: DecodeMode::Strict,
            ..CodecConfig::default()
        })
    }

    pub fn mode(&self) -> DecodeMode {
        self.config.mode
    }

    pub fn max_message_bytes(&self) -> usize {
        self.config.max_message_bytes
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let envelope = json!({
            "version": PROTOCOL_VERSION,
            "type": message.kind().as_str(),
            "body": message.body()?,
        });
        let bytes = serde_json::to_vec(&envelope)?;
        self.check_size(bytes.len())?;
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        self.check_size(bytes.len())?;
        let envelope: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut envelope) = envelope else {
            return Err(CodecError::Malformed("envelope is not an object".into()));
        };

        let version = envelope
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::Malformed("envelope has no numeric version".into()))?;
        if !SUPPORTED_VERSIONS.iter().any(|v| u64::from(*v) == version) {
            let sender = envelope
                .get("body")
                .and_then(|b| b.get("sender"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Err(CodecError::UnsupportedVersion { version, sender });
        }

        let kind_name = envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::Malformed("envelope has no type".into()))?;
        let kind = MessageKind::parse(kind_name).ok_or_else(|| CodecError::UnknownType(kind_name.to_string()))?;

        let body = envelope
            .remove("body")
            .filter(Value::is_object)
            .ok_or_else(|| CodecError::Malformed(format!("{} envelope has no body object", kind)))?;
        let message = Message::from_body(kind, &body)?;

        let envelope_fields: Vec<String> = envelope
            .keys()
            .filter(|k| !ENVELOPE_KEYS.contains(&k.as_str()))
            .map(|k| format!("envelope.{}", k))
            .collect();
        let mut nested_fields = Vec::new();
        dropped_fields(&body, &message.body()?, "", &mut nested_fields);

        match self.config.mode {
            DecodeMode::Strict => {
                let mut fields: Vec<String> = message.extra().keys().cloned().collect();
                fields.extend(nested_fields);
                fields.extend(envelope_fields);
                if !fields.is_empty() {
                    fields.sort();
                    return Err(CodecError::UnknownFields { kind, fields });
                }
            }
            DecodeMode::Lenient => {
                if !nested_fields.is_empty() || !envelope_fields.is_empty() {
                    log::warn!(
                        "{} from {}: dropping unknown fields {}",
                        kind,
                        message.sender(),
                        nested_fields.iter().chain(envelope_fields.iter()).cloned().collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }
        Ok(message)
    }

    fn check_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.config.max_message_bytes {
            return Err(CodecError::TooLarge {
                size,
                limit: self.config.max_message_bytes,
            });
        }
        Ok(())
    }
}

/// Collects the dotted paths present in `raw` that did not survive into the
/// re-serialised `typed` value.
fn dropped_fields(raw: &Value, typed: &Value, path: &str, out: &mut Vec<String>) {
    match (raw, typed) {
        (Value::Object(raw), Value::Object(typed)) => {
            for (key, value) in raw {
                let at = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match typed.get(key) {
                    Some(kept) => dropped_fields(value, kept, &at, out),
                    None => out.push(at),
                }
            }
        }
        (Value::Array(raw), Value::Array(typed)) => {
            for (i, (value, kept)) in raw.iter().zip(typed).enumerate() {
                dropped_fields(value, kept, &format!("{}[{}]", path, i), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Heartbeat;

    #[test]
    fn test_envelope_shape() {
        let codec = ProtocolCodec::default();
        let bytes = codec
            .encode(&Message::Heartbeat(Heartbeat::new("validator-a", Some(10))))
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["body"]["sender"], "validator-a");
        assert_eq!(value["body"]["latest_block"], 10);
    }

    #[test]
    fn test_dropped_fields_paths() {
        let raw = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [{"f": 1}, {"f": 1, "g": 2}]});
        let typed = json!({"a": 1, "b": {"c": 2}, "e": [{"f": 1}, {"f": 1}]});
        let mut out = Vec::new();
        dropped_fields(&raw, &typed, "", &mut out);
        assert_eq!(out, vec!["b.d".to_string(), "e[1].g".to_string()]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("STRICT".parse::<DecodeMode>().unwrap(), DecodeMode::Strict);
        assert!("loose".parse::<DecodeMode>().is_err());
    }
}
