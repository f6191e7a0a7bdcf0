//! Realtime transport for the NeuralFlow client.
//!
//! Provides:
//! - Wire protocol (Engine.IO v4 frames, Socket.IO v5 packets)
//! - Shared realtime channel over WebSocket (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod channel;

pub use protocol::{EnginePacket, Handshake, ProtocolError, SocketPacket};

#[cfg(feature = "websocket")]
pub use channel::{ConnectionState, HandlerId, RealtimeChannel, RealtimeError, TaskSubscription};
