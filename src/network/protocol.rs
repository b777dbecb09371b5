//! Game Change Messages
//!
//! Wire format for peer-to-peer game traffic.
//!
//! ```text
//! ┌─────────┬─────────┬──────────────────────────────────────┐
//! │ version │   tag   │ payload (bincode, varint, LE)        │
//! │  1 byte │  1 byte │ map<string, value>, no trailing data │
//! └─────────┴─────────┴──────────────────────────────────────┘
//! ```
//!
//! Every decode is checked: short, oversized, unknown-tag or otherwise
//! unparseable packets are rejected with [`ProtocolError::MalformedMessage`].

use std::collections::BTreeMap;
use std::fmt;

use bincode::Options;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version byte + event tag.
pub const HEADER_LEN: usize = 2;

/// Default upper bound for a single encoded message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

// =============================================================================
// EVENTS
// =============================================================================

/// Kind of game change. The discriminant is the wire tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameEvent {
    /// Host started the match.
    GameStarted = 0,
    /// Match is over.
    GameEnded = 1,
    /// A runner jumped.
    PlayerJumped = 2,
    /// A runner ducked.
    PlayerDucked = 3,
    /// A runner hit an obstacle.
    PlayerCollided = 4,
}

impl GameEvent {
    /// All events, in tag order.
    pub const ALL: [GameEvent; 5] = [
        GameEvent::GameStarted,
        GameEvent::GameEnded,
        GameEvent::PlayerJumped,
        GameEvent::PlayerDucked,
        GameEvent::PlayerCollided,
    ];

    /// Wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Look up an event by wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|event| event.tag() == tag)
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// A single payload field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PayloadValue {
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Flag.
    Bool(bool),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Int(v)
    }
}

impl From<i32> for PayloadValue {
    fn from(v: i32) -> Self {
        PayloadValue::Int(v.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(v: u32) -> Self {
        PayloadValue::Int(v.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Float(v)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Text(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Text(v)
    }
}

impl From<Vec<u8>> for PayloadValue {
    fn from(v: Vec<u8>) -> Self {
        PayloadValue::Bytes(v)
    }
}

/// Named fields attached to a game change.
///
/// Fields serialize in key order; deserializing rejects repeated or
/// out-of-order keys so each payload has one encoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of payload fields in ascending key order")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Payload, A::Error> {
        let mut fields: BTreeMap<String, PayloadValue> = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, PayloadValue>()? {
            if let Some((last, _)) = fields.last_key_value() {
                if &key <= last {
                    return Err(de::Error::custom(format!(
                        "payload field {key:?} repeated or out of order"
                    )));
                }
            }
            fields.insert(key, value);
        }
        Ok(Payload(fields))
    }
}

impl Payload {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PayloadValue>,
    ) -> Option<PayloadValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    /// Integer field, if present with that type.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            PayloadValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float field. Integers are widened.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            PayloadValue::Float(v) => Some(*v),
            PayloadValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            PayloadValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text field.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            PayloadValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Byte field.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key)? {
            PayloadValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<PayloadValue>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// GAME CHANGE
// =============================================================================

/// A discrete game event with its data, exchanged between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameChange {
    /// What happened.
    pub event: GameEvent,
    /// Associated fields.
    pub data: Payload,
}

impl GameChange {
    /// Change with an empty payload.
    pub fn new(event: GameEvent) -> Self {
        Self {
            event,
            data: Payload::new(),
        }
    }

    /// Change with the given payload.
    pub fn with_data(event: GameEvent, data: Payload) -> Self {
        Self { event, data }
    }

    /// Builder-style payload insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.data.insert(key, value);
        self
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why an inbound packet was rejected.
#[derive(Debug, Error)]
pub enum MalformedReason {
    /// Shorter than the header.
    #[error("truncated packet ({len} bytes)")]
    Truncated {
        /// Packet length.
        len: usize,
    },

    /// Version byte did not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Tag is not a known [`GameEvent`].
    #[error("unknown event tag {0}")]
    UnknownEvent(u8),

    /// Packet exceeds the configured limit.
    #[error("packet of {len} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Packet length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Payload did not parse or had trailing bytes.
    #[error("invalid payload: {0}")]
    InvalidPayload(bincode::Error),
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound packet could not be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] MalformedReason),

    /// Outbound message exceeds the configured limit.
    #[error("Message too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Payload serialization failed.
    #[error("Encode failed: {0}")]
    Encode(bincode::Error),
}

impl ProtocolError {
    /// True for inbound decode failures.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::MalformedMessage(_))
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Checked encoder/decoder for [`GameChange`].
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec {
    /// Codec enforcing `max_message_size` on both directions.
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Configured limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Serialize a change to its wire form.
    pub fn encode(&self, change: &GameChange) -> Result<Vec<u8>, ProtocolError> {
        let body = bincode::DefaultOptions::new()
            .reject_trailing_bytes()
            .serialize(&change.data)
            .map_err(ProtocolError::Encode)?;

        let size = HEADER_LEN + body.len();
        if size > self.max_message_size {
            return Err(ProtocolError::TooLarge {
                size,
                limit: self.max_message_size,
            });
        }

        let mut bytes = Vec::with_capacity(size);
        bytes.push(PROTOCOL_VERSION);
        bytes.push(change.event.tag());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse a wire packet.
    pub fn decode(&self, bytes: &[u8]) -> Result<GameChange, ProtocolError> {
        if bytes.len() > self.max_message_size {
            return Err(MalformedReason::TooLarge {
                len: bytes.len(),
                limit: self.max_message_size,
            }
            .into());
        }

        let (header, body) = match bytes {
            [version, tag, body @ ..] => ((*version, *tag), body),
            _ => return Err(MalformedReason::Truncated { len: bytes.len() }.into()),
        };

        let (version, tag) = header;
        if version != PROTOCOL_VERSION {
            return Err(MalformedReason::UnsupportedVersion(version).into());
        }

        let event = GameEvent::from_tag(tag).ok_or(MalformedReason::UnknownEvent(tag))?;

        let data: Payload = bincode::DefaultOptions::new()
            .with_limit(self.max_message_size as u64)
            .reject_trailing_bytes()
            .deserialize(body)
            .map_err(MalformedReason::InvalidPayload)?;

        Ok(GameChange { event, data })
    }
}

/// Encode with the default limit.
pub fn encode(change: &GameChange) -> Result<Vec<u8>, ProtocolError> {
    MessageCodec::default().encode(change)
}

/// Decode with the default limit.
pub fn decode(bytes: &[u8]) -> Result<GameChange, ProtocolError> {
    MessageCodec::default().decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn jump(height: i64) -> GameChange {
        GameChange::new(GameEvent::PlayerJumped).with("height", height)
    }

    #[test]
    fn test_jump_roundtrip() {
        let change = jump(12);
        let bytes = encode(&change).unwrap();

        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], GameEvent::PlayerJumped.tag());

        let parsed = decode(&bytes).unwrap();
        assert_eq!(parsed, change);
        assert_eq!(parsed.data.get_int("height"), Some(12));
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        for event in GameEvent::ALL {
            let change = GameChange::new(event);
            let parsed = decode(&encode(&change).unwrap()).unwrap();
            assert_eq!(parsed.event, event);
            assert!(parsed.data.is_empty());
        }
    }

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(GameEvent::GameStarted.tag(), 0);
        assert_eq!(GameEvent::GameEnded.tag(), 1);
        assert_eq!(GameEvent::PlayerJumped.tag(), 2);
        assert_eq!(GameEvent::PlayerDucked.tag(), 3);
        assert_eq!(GameEvent::PlayerCollided.tag(), 4);
        assert_eq!(GameEvent::from_tag(5), None);
    }

    #[test]
    fn test_truncated_rejected() {
        for bytes in [&[][..], &[PROTOCOL_VERSION][..]] {
            let err = decode(bytes).unwrap_err();
            assert!(matches!(
                err,
                ProtocolError::MalformedMessage(MalformedReason::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut bytes = encode(&jump(3)).unwrap();
        bytes[1] = 42;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage(MalformedReason::UnknownEvent(42))
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = encode(&jump(3)).unwrap();
        bytes[0] = PROTOCOL_VERSION + 1;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage(MalformedReason::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&jump(3)).unwrap();
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage(MalformedReason::InvalidPayload(_))
        ));
    }

    fn packet_with_fields(fields: &[(&str, i64)]) -> Vec<u8> {
        // A sequence of pairs encodes exactly like a map with those entries.
        let entries: Vec<(String, PayloadValue)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), PayloadValue::Int(*v)))
            .collect();
        let mut bytes = vec![PROTOCOL_VERSION, GameEvent::PlayerJumped.tag()];
        bytes.extend(bincode::DefaultOptions::new().serialize(&entries).unwrap());
        bytes
    }

    #[test]
    fn test_repeated_or_unordered_fields_rejected() {
        let ordered = decode(&packet_with_fields(&[("a", 1), ("b", 2)])).unwrap();
        assert_eq!(ordered.data, Payload::new().with("a", 1).with("b", 2));

        for fields in [&[("a", 1), ("a", 2)][..], &[("b", 2), ("a", 1)][..]] {
            let err = decode(&packet_with_fields(fields)).unwrap_err();
            assert!(matches!(
                err,
                ProtocolError::MalformedMessage(MalformedReason::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn test_short_payload_rejected() {
        let bytes = encode(&jump(3)).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_size_limit() {
        let codec = MessageCodec::new(16);
        let big = GameChange::new(GameEvent::GameEnded).with("ghost", vec![7u8; 64]);

        let err = codec.encode(&big).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { limit: 16, .. }));

        let bytes = encode(&big).unwrap();
        let err = codec.decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedMessage(MalformedReason::TooLarge { limit: 16, .. })
        ));
    }

    #[test]
    fn test_payload_accessors() {
        let data = Payload::new()
            .with("score", 1200u32)
            .with("speed", 3.5)
            .with("ghost", true)
            .with("name", "alice")
            .with("seed", vec![1u8, 2, 3]);

        assert_eq!(data.len(), 5);
        assert_eq!(data.get_int("score"), Some(1200));
        assert_eq!(data.get_float("score"), Some(1200.0));
        assert_eq!(data.get_float("speed"), Some(3.5));
        assert_eq!(data.get_bool("ghost"), Some(true));
        assert_eq!(data.get_text("name"), Some("alice"));
        assert_eq!(data.get_bytes("seed"), Some(&[1u8, 2, 3][..]));
        assert_eq!(data.get_int("name"), None);
        assert_eq!(data.get("missing"), None);

        let keys: Vec<&str> = data.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ghost", "name", "score", "seed", "speed"]);
    }

    fn value_strategy() -> impl Strategy<Value = PayloadValue> {
        prop_oneof![
            any::<i64>().prop_map(PayloadValue::Int),
            (-1.0e9f64..1.0e9).prop_map(PayloadValue::Float),
            any::<bool>().prop_map(PayloadValue::Bool),
            "[a-z0-9 ]{0,16}".prop_map(PayloadValue::Text),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(PayloadValue::Bytes),
        ]
    }

    fn change_strategy() -> impl Strategy<Value = GameChange> {
        (
            0usize..GameEvent::ALL.len(),
            proptest::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..8),
        )
            .prop_map(|(idx, fields)| {
                GameChange::with_data(GameEvent::ALL[idx], fields.into_iter().collect())
            })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(change in change_strategy()) {
            let bytes = encode(&change).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), change);
        }

        #[test]
        fn prop_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes);
        }

        #[test]
        fn prop_unknown_tags_rejected(tag in 5u8..=255, change in change_strategy()) {
            let mut bytes = encode(&change).unwrap();
            bytes[1] = tag;
            prop_assert!(decode(&bytes).unwrap_err().is_malformed());
        }
    }
}
