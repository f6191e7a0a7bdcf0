//! Wire protocol for the realtime channel.
//!
//! Engine.IO v4 frames carried over WebSocket text messages, with
//! Socket.IO v5 packets inside Engine.IO `message` frames.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Namespace used when a packet names none.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,
    #[error("Unknown packet type: {0:?}")]
    UnknownType(char),
    #[error("Malformed packet: {0}")]
    Malformed(String),
    #[error("Unsupported packet: {0}")]
    Unsupported(&'static str),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Longest silence allowed between two server pings.
    #[must_use]
    pub const fn ping_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Engine.IO frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    /// Socket.IO payload.
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error on empty frames, unknown types or a bad handshake.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        let data = (!rest.is_empty()).then(|| rest.to_string());

        Ok(match kind {
            '0' => Self::Open(serde_json::from_str(rest)?),
            '1' => Self::Close,
            '2' => Self::Ping(data),
            '3' => Self::Pong(data),
            '4' => Self::Message(rest.to_string()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }

    /// Encode as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{}", data.as_deref().unwrap_or("")),
            Self::Pong(data) => format!("3{}", data.as_deref().unwrap_or("")),
            Self::Message(payload) => format!("4{payload}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Connect to the default namespace.
    #[must_use]
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    /// Leave the default namespace.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace.
    #[must_use]
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args: vec![payload],
        }
    }

    /// Decode the payload of an Engine.IO message frame.
    ///
    /// # Errors
    /// Returns error on malformed packets and on binary packets, which this
    /// client does not support.
    pub fn decode(payload: &str) -> Result<Self, ProtocolError> {
        let mut chars = payload.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::Unsupported("binary packet"));
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            let (ns, tail) = rest
                .split_once(',')
                .map_or((rest, ""), |(ns, tail)| (ns, tail));
            namespace = ns.to_string();
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => return Err(ProtocolError::Malformed("event without array".into())),
                };
                if args.is_empty() {
                    return Err(ProtocolError::Malformed("event without name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ProtocolError::Malformed(format!(
                            "event name is not a string: {other}"
                        )));
                    }
                };
                Ok(Self::Event {
                    namespace,
                    ack_id,
                    name,
                    args,
                })
            }
            '3' => {
                let ack_id =
                    ack_id.ok_or_else(|| ProtocolError::Malformed("ack without id".into()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    _ => Vec::new(),
                };
                Ok(Self::Ack {
                    namespace,
                    ack_id,
                    args,
                })
            }
            '4' => Ok(Self::ConnectError { namespace, data }),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// Encode as the payload of an Engine.IO message frame.
    #[must_use]
    pub fn encode(&self) -> String {
        fn prefix(kind: char, namespace: &str) -> String {
            if namespace == DEFAULT_NAMESPACE {
                kind.to_string()
            } else {
                format!("{kind}{namespace},")
            }
        }
        let json = |v: &Value| serde_json::to_string(v).unwrap_or_default();

        match self {
            Self::Connect { namespace, data } => {
                let mut out = prefix('0', namespace);
                if let Some(data) = data {
                    out.push_str(&json(data));
                }
                out
            }
            Self::Disconnect { namespace } => prefix('1', namespace),
            Self::Event {
                namespace,
                ack_id,
                name,
                args,
            } => {
                let mut out = prefix('2', namespace);
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&json(&Value::Array(items)));
                out
            }
            Self::Ack {
                namespace,
                ack_id,
                args,
            } => {
                let mut out = prefix('3', namespace);
                out.push_str(&ack_id.to_string());
                out.push_str(&json(&Value::Array(args.clone())));
                out
            }
            Self::ConnectError { namespace, data } => {
                let mut out = prefix('4', namespace);
                if let Some(data) = data {
                    out.push_str(&json(data));
                }
                out
            }
        }
    }

    /// Encode wrapped in an Engine.IO message frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}
