use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard alphabet, padding optional on decode, padded on encode.
pub const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Sender id stamped on messages the relay itself originates.
pub const SERVER_SENDER: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Call,
    Payment,
    PaymentAck,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Call => "call",
            MessageKind::Payment => "payment",
            MessageKind::PaymentAck => "payment_ack",
            MessageKind::File => "file",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "call" => Ok(MessageKind::Call),
            "payment" => Ok(MessageKind::Payment),
            "payment_ack" => Ok(MessageKind::PaymentAck),
            "file" => Ok(MessageKind::File),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// The unit the relay routes. On the wire each WebSocket text frame carries
/// one envelope as JSON; `payload` travels as base64 and is never inspected
/// except for `payment` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: MessageKind, sender_id: &str, recipient: &str, payload: Vec<u8>) -> Self {
        Self {
            kind,
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient: recipient.to_string(),
            payload,
            timestamp: 0,
        }
    }

    /// Rebuild the envelope as the relay accepts it: sender bound to the
    /// authenticated user, timestamp replaced by the server clock, and a
    /// message id assigned when the client sent none.
    pub fn stamped(self, sender_id: &str, timestamp: i64) -> Self {
        let message_id = if self.message_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.message_id
        };
        Self {
            message_id,
            sender_id: sender_id.to_string(),
            timestamp,
            ..self
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::BASE64_LENIENT;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_LENIENT.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => BASE64_LENIENT
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
