//! NeuralFlow client runtime.
//!
//! Wires the token source, session bridge, auth state, liveness monitor and
//! realtime channel into one explicitly constructed [`AppContext`].

pub mod context;

pub use context::{AppContext, ClientError, SESSION_SUBSCRIBER, SharedAuth};
pub use neuralflow_core::{AuthNotice, AuthSignal, ClientConfig, Identity, RealtimeEvent};
pub use neuralflow_session::token_source;
pub use neuralflow_transport::{ConnectionState, RealtimeChannel, TaskSubscription};
