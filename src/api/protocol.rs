//! Push channel framing
//!
//! Text frames follow the Socket.IO v4 layout the observation server speaks:
//! a one or two digit packet type followed by an optional JSON body.
//!
//! | frame                 | meaning                          |
//! |-----------------------|----------------------------------|
//! | `0{...}`              | engine open (session parameters) |
//! | `1`                   | engine close                     |
//! | `2` / `3`             | ping / pong                      |
//! | `40`                  | namespace connect (both ways)    |
//! | `41`                  | namespace disconnect             |
//! | `42["name", payload]` | event                            |

use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Event carrying a transcript update
pub const EVENT_TRANSCRIPTION_UPDATE: &str = "transcription_update";
/// Event carrying a server status message
pub const EVENT_STATUS: &str = "status";

const CONNECT: &str = "40";
const DISCONNECT: &str = "41";
const EVENT_PREFIX: &str = "42";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Value),
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    Event { name: String, payload: Value },
    Unknown(String),
}

impl Frame {
    pub fn event(name: impl Into<String>, payload: &impl Serialize) -> Result<Self, ProtocolError> {
        Ok(Frame::Event {
            name: name.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Open(params) => format!("0{}", params),
            Frame::Close => "1".to_string(),
            Frame::Ping => "2".to_string(),
            Frame::Pong => "3".to_string(),
            Frame::Connect => CONNECT.to_string(),
            Frame::Disconnect => DISCONNECT.to_string(),
            Frame::Event { name, payload } => {
                format!("{}{}", EVENT_PREFIX, Value::Array(vec![Value::String(name.clone()), payload.clone()]))
            }
            Frame::Unknown(raw) => raw.clone(),
        }
    }
}

/// Decode one text frame
///
/// Unrecognised packet types decode to `Frame::Unknown` so newer servers do
/// not break older clients. Only a malformed event body is an error.
pub fn decode(raw: &str) -> Result<Frame, ProtocolError> {
    let raw = raw.trim();

    if let Some(body) = raw.strip_prefix(EVENT_PREFIX) {
        return decode_event(body);
    }
    if raw.starts_with(CONNECT) {
        return Ok(Frame::Connect);
    }
    if raw == DISCONNECT {
        return Ok(Frame::Disconnect);
    }

    let frame = match raw {
        "1" => Frame::Close,
        "2" => Frame::Ping,
        "3" => Frame::Pong,
        _ => match raw.strip_prefix('0') {
            Some(body) => Frame::Open(serde_json::from_str(body).unwrap_or(Value::Null)),
            None => Frame::Unknown(raw.to_string()),
        },
    };

    Ok(frame)
}

fn decode_event(body: &str) -> Result<Frame, ProtocolError> {
    // Skip an optional ack id between the packet type and the array
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());

    let mut parts = match serde_json::from_str::<Value>(body)? {
        Value::Array(parts) => parts.into_iter(),
        other => return Err(ProtocolError::Malformed(format!("expected array, got {}", other))),
    };

    let name = match parts.next() {
        Some(Value::String(name)) => name,
        Some(other) => return Err(ProtocolError::Malformed(format!("event name is {}", other))),
        None => return Err(ProtocolError::Malformed("empty event".to_string())),
    };

    Ok(Frame::Event {
        name,
        payload: parts.next().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_transcription_event() {
        let frame = decode(r#"42["transcription_update",{"transcription":"hello","classification":"normal"}]"#)
            .unwrap();

        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, EVENT_TRANSCRIPTION_UPDATE);
                assert_eq!(payload["transcription"], "hello");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(decode("2").unwrap(), Frame::Ping);
        assert_eq!(decode("3").unwrap(), Frame::Pong);
        assert_eq!(decode("40").unwrap(), Frame::Connect);
        assert_eq!(decode(r#"40{"sid":"abc"}"#).unwrap(), Frame::Connect);
        assert_eq!(decode("41").unwrap(), Frame::Disconnect);
        assert_eq!(decode("1").unwrap(), Frame::Close);
        assert_eq!(
            decode(r#"0{"sid":"x","pingInterval":25000}"#).unwrap(),
            Frame::Open(json!({"sid": "x", "pingInterval": 25000}))
        );
    }

    #[test]
    fn test_decode_unknown_is_not_an_error() {
        assert_eq!(decode("5").unwrap(), Frame::Unknown("5".to_string()));
        assert_eq!(decode("hello").unwrap(), Frame::Unknown("hello".to_string()));
    }

    #[test]
    fn test_decode_event_without_payload() {
        let frame = decode(r#"42["status"]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                name: "status".to_string(),
                payload: Value::Null
            }
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let frame = decode(r#"4213["status",{"message":"ok"}]"#).unwrap();
        assert!(matches!(frame, Frame::Event { ref name, .. } if name == "status"));
    }

    #[test]
    fn test_decode_malformed_event() {
        assert!(decode("42{not json").is_err());
        assert!(decode(r#"42{"event":"x"}"#).is_err());
        assert!(decode("42[]").is_err());
        assert!(decode("42[7, {}]").is_err());
    }

    #[test]
    fn test_encode_event() {
        let frame = Frame::event(EVENT_STATUS, &json!({"message": "connected"})).unwrap();
        assert_eq!(frame.encode(), r#"42["status",{"message":"connected"}]"#);
        assert_eq!(decode(&frame.encode()).unwrap(), frame);
    }
}
