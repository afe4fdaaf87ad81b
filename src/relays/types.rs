//! Nostr relay protocol types (NIP-01, NIP-42).
//!
//! Wire frames are JSON arrays with a leading type string. Inbound frames
//! decode into the [`RelayMessage`] tagged union before anything acts on
//! them; malformed frames simply fail to decode and are dropped by the
//! dispatcher.

use serde_json::Value;
use thiserror::Error;

use crate::types::filter::Filter;
use crate::types::nostr::Event;

/// Client-to-relay messages.
pub enum ClientMessage<'a> {
    /// `["EVENT", <event>]`
    Event(&'a Event),
    /// `["REQ", <sub_id>, <filter>]`
    Req {
        subscription_id: &'a str,
        filter: &'a Filter,
    },
    /// `["CLOSE", <sub_id>]`
    Close { subscription_id: &'a str },
    /// `["AUTH", <event>]`
    Auth(&'a Event),
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> String {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filter,
            } => serde_json::json!(["REQ", subscription_id, filter]),
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
            ClientMessage::Auth(event) => serde_json::json!(["AUTH", event]),
        };
        value.to_string()
    }
}

/// Relay-to-client messages.
#[derive(Debug)]
pub enum RelayMessage {
    /// `["EVENT", <sub_id>, <event>]`
    Event {
        subscription_id: String,
        event: Event,
    },
    /// `["OK", <event_id>, <accepted>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["EOSE", <sub_id>]`
    Eose { subscription_id: String },
    /// `["NOTICE", <message>]`
    Notice { message: String },
    /// `["CLOSED", <sub_id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// `["AUTH", <challenge>]`
    Auth { challenge: String },
}

impl RelayMessage {
    /// Decode one inbound frame. Returns `None` for anything malformed or
    /// unknown: extra array elements are tolerated, missing ones are not.
    pub fn from_json(json: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(json).ok()?;
        let array = value.as_array()?;
        let leader = array.first()?.as_str()?;

        match leader {
            "EVENT" if array.len() >= 3 => {
                let subscription_id = array[1].as_str()?.to_string();
                let event = Event::from_value(&array[2]).ok()?;
                Some(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" if array.len() >= 4 => Some(RelayMessage::Ok {
                event_id: array[1].as_str()?.to_string(),
                accepted: array[2].as_bool()?,
                message: array[3].as_str().unwrap_or_default().to_string(),
            }),
            "EOSE" if array.len() >= 2 => Some(RelayMessage::Eose {
                subscription_id: array[1].as_str()?.to_string(),
            }),
            "NOTICE" if array.len() >= 2 => Some(RelayMessage::Notice {
                message: array[1].as_str()?.to_string(),
            }),
            "CLOSED" if array.len() >= 3 => Some(RelayMessage::Closed {
                subscription_id: array[1].as_str()?.to_string(),
                message: array[2].as_str().unwrap_or_default().to_string(),
            }),
            "AUTH" if array.len() >= 2 => Some(RelayMessage::Auth {
                challenge: array[1].as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// Socket state of one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket yet.
    Idle,
    /// Connection in progress.
    Connecting,
    /// Connected and ready.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Socket gone.
    Closed,
    /// Last connection attempt failed.
    Failed,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

/// Connection lifecycle notifications delivered to the optional listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful connection to a relay.
    Connect { url: String },
    /// Connection re-established after a drop.
    Reconnected { url: String },
    /// A reconnect attempt has been scheduled.
    Reconnecting { url: String, attempt: u32 },
    /// An established connection went away.
    Disconnect { url: String, reason: String },
}

/// Errors surfaced by the connection supervisor.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One-way callback interface from a supervisor up into its owner. The
/// orchestrator owns the supervisors; supervisors only hold this weak seam,
/// never a back-reference.
pub(crate) trait ConnectionDelegate: Send + Sync {
    /// Socket reached Open. `reconnected` distinguishes a re-established
    /// connection from the first one.
    fn on_open(&self, url: &str, reconnected: bool);
    /// A text frame arrived.
    fn on_frame(&self, url: &str, raw: &str);
    /// An established connection dropped.
    fn on_disconnect(&self, url: &str, reason: &str);
    /// A reconnect was scheduled for `attempt`.
    fn on_reconnecting(&self, url: &str, attempt: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keys;
    use crate::types::nostr::{Template, TEXT_NOTE};

    #[test]
    fn client_message_wire_shapes() {
        let keys = Keys::generate();
        let event = Template::new(TEXT_NOTE, "hi", vec![]).sign(&keys).unwrap();

        let event_json = ClientMessage::Event(&event).to_json();
        assert!(event_json.starts_with(r#"["EVENT",{"#));
        assert!(event_json.contains(&event.id().to_hex()));

        let filter = Filter::new().kind(1).limit(1);
        let req_json = ClientMessage::Req {
            subscription_id: "sub_1",
            filter: &filter,
        }
        .to_json();
        assert_eq!(req_json, r#"["REQ","sub_1",{"kinds":[1],"limit":1}]"#);

        assert_eq!(
            ClientMessage::Close {
                subscription_id: "sub_1"
            }
            .to_json(),
            r#"["CLOSE","sub_1"]"#
        );
    }

    #[test]
    fn relay_message_decoding() {
        let keys = Keys::generate();
        let event = Template::new(TEXT_NOTE, "hi", vec![]).sign(&keys).unwrap();
        let frame = format!(r#"["EVENT","sub_1",{}]"#, event.to_json());
        match RelayMessage::from_json(&frame) {
            Some(RelayMessage::Event {
                subscription_id,
                event: parsed,
            }) => {
                assert_eq!(subscription_id, "sub_1");
                assert_eq!(parsed.id(), event.id());
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        match RelayMessage::from_json(r#"["OK","abcd",true,""]"#) {
            Some(RelayMessage::Ok {
                event_id, accepted, ..
            }) => {
                assert_eq!(event_id, "abcd");
                assert!(accepted);
            }
            other => panic!("unexpected decode: {other:?}"),
        }

        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE","sub_1"]"#),
            Some(RelayMessage::Eose { .. })
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["AUTH","challenge-string"]"#),
            Some(RelayMessage::Auth { .. })
        ));
        assert!(matches!(
            RelayMessage::from_json(r#"["CLOSED","sub_1","rate limited"]"#),
            Some(RelayMessage::Closed { .. })
        ));
    }

    #[test]
    fn malformed_frames_decode_to_none() {
        assert!(RelayMessage::from_json("not json").is_none());
        assert!(RelayMessage::from_json(r#"{"EVENT":1}"#).is_none());
        assert!(RelayMessage::from_json(r#"[]"#).is_none());
        assert!(RelayMessage::from_json(r#"["OK","id",true]"#).is_none()); // arity < 4
        assert!(RelayMessage::from_json(r#"["EVENT","sub"]"#).is_none());
        assert!(RelayMessage::from_json(r#"["WHAT","ever"]"#).is_none());
        // Event payload that does not parse drops the frame.
        assert!(RelayMessage::from_json(r#"["EVENT","sub",{"id":"zz"}]"#).is_none());
    }

    #[test]
    fn extra_elements_are_tolerated() {
        assert!(matches!(
            RelayMessage::from_json(r#"["EOSE","sub_1","future-field"]"#),
            Some(RelayMessage::Eose { .. })
        ));
    }
}
