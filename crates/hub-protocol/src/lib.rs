// hub-protocol: envelope types exchanged between sessions, the Hub, and the
// cluster bus. Encoding is self-describing JSON; `payload` is carried as an
// already-encoded string and never re-interpreted here.

use serde::de::Error as _;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("event must not be empty")]
    EmptyEvent,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// The application-visible envelope exchanged with a peer and carried
/// (already encoded) inside bus envelopes.
///
/// `payload` is stored as already-encoded JSON text, but it is spliced
/// into the wire form raw (via [`RawValue`]) rather than serialized as a
/// JSON string — otherwise a payload of `"x"` would round-trip to the
/// wire as `"\"x\""`, double-encoding it. This mirrors the Go source's
/// `Payload json.RawMessage`: pass-through, never re-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub event: String,
    /// Opaque, already-encoded payload. Never re-encoded by the hub.
    pub payload: String,
}

impl Message {
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        if self.event.is_empty() {
            return Err(CodecError::EmptyEvent);
        }
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let msg: Message = serde_json::from_str(text)?;
        if msg.event.is_empty() {
            return Err(CodecError::EmptyEvent);
        }
        Ok(msg)
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw = RawValue::from_string(self.payload.clone()).map_err(S::Error::custom)?;
        let mut state = serializer.serialize_struct("Message", 2)?;
        state.serialize_field("event", &self.event)?;
        state.serialize_field("payload", &raw)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct MessageWire<'a> {
    event: String,
    #[serde(borrow)]
    payload: &'a RawValue,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = MessageWire::deserialize(deserializer)?;
        Ok(Message {
            event: wire.event,
            payload: wire.payload.get().to_owned(),
        })
    }
}

/// Wire envelope published/consumed on the room pub/sub channel.
///
/// `message` is the already-encoded `Message` bytes (i.e. the output of
/// `Message::encode`), carried opaquely end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBusEnvelope {
    pub node_id: String,
    pub room_id: String,
    pub message: String,
    #[serde(default)]
    pub exclude_ids: Vec<String>,
}

impl RoomBusEnvelope {
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Wire envelope published/consumed on the broadcast pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastBusEnvelope {
    pub node_id: String,
    pub message: String,
}

impl BroadcastBusEnvelope {
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Channel names a namespace maps to on the broker. Both publish and
/// subscribe sides must use these — an earlier revision of this protocol
/// published on the bare prefix but subscribed on the namespaced one,
/// which meant a node never saw its own correctly-routed peers.
pub fn room_channel(namespace: &str) -> String {
    format!("ignite_room_chan_{namespace}")
}

pub fn broadcast_channel(namespace: &str) -> String {
    format!("ignite_broadcast_chan_{namespace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_event_and_payload_bytewise() {
        let msg = Message::new("hi", "\"x\"");
        let encoded = msg.encode().expect("encode");
        let decoded = Message::decode(&encoded).expect("decode");
        assert_eq!(decoded.event, msg.event);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn string_payload_is_not_double_encoded_on_the_wire() {
        // spec.md §8 scenario 2: a `"x"`-quoted payload must appear on the
        // wire as `"x"`, not re-escaped to `"\"x\""`.
        let msg = Message::new("hi", "\"x\"");
        let encoded = msg.encode().expect("encode");
        assert_eq!(encoded, r#"{"event":"hi","payload":"x"}"#);
    }

    #[test]
    fn object_and_array_payloads_round_trip_without_re_escaping() {
        for payload in ["{\"a\":1}", "[1,2,3]", "null", "42"] {
            let msg = Message::new("evt", payload);
            let encoded = msg.encode().expect("encode");
            assert!(
                encoded.contains(payload),
                "expected raw payload {payload} to appear un-escaped in {encoded}"
            );
            let decoded = Message::decode(&encoded).expect("decode");
            assert_eq!(decoded.payload, payload);
        }
    }

    #[test]
    fn message_with_empty_event_fails_to_encode() {
        let msg = Message::new("", "\"x\"");
        assert!(matches!(msg.encode(), Err(CodecError::EmptyEvent)));
    }

    #[test]
    fn message_decode_rejects_malformed_json() {
        assert!(Message::decode("{not-json").is_err());
    }

    #[test]
    fn room_bus_envelope_defaults_exclude_ids_when_absent() {
        let json = r#"{"node_id":"n1","room_id":"r1","message":"{}"}"#;
        let env = RoomBusEnvelope::decode(json).expect("decode");
        assert!(env.exclude_ids.is_empty());
    }

    #[test]
    fn room_bus_envelope_round_trips() {
        let env = RoomBusEnvelope {
            node_id: "n1".to_owned(),
            room_id: "r1".to_owned(),
            message: "{\"event\":\"hi\",\"payload\":\"\\\"x\\\"\"}".to_owned(),
            exclude_ids: vec!["c1".to_owned()],
        };
        let encoded = env.encode().expect("encode");
        let decoded = RoomBusEnvelope::decode(&encoded).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn broadcast_bus_envelope_round_trips() {
        let env = BroadcastBusEnvelope {
            node_id: "n1".to_owned(),
            message: "{}".to_owned(),
        };
        let encoded = env.encode().expect("encode");
        let decoded = BroadcastBusEnvelope::decode(&encoded).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn channel_names_are_namespaced_for_both_room_and_broadcast() {
        assert_eq!(room_channel("ns1"), "ignite_room_chan_ns1");
        assert_eq!(broadcast_channel("ns1"), "ignite_broadcast_chan_ns1");
    }
}
