//! Core abstractions for the NeuralFlow session client.
//!
//! This crate provides the fundamental building blocks:
//! - `Identity` - The signed-in user as known to the client
//! - `ListenerRegistry` - Ordered callback registrations with drop-to-unsubscribe handles
//! - `ClientConfig` - Endpoint and timing configuration
//! - `TokenSource` and `SessionBackend` traits
//! - Typed provider, session and config errors

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod listeners;
pub mod traits;

pub use config::{ClientConfig, ConfigError};
pub use error::{AuthNotice, ProviderError, ProviderErrorKind, SessionError};
pub use events::{AiCompletion, AuthSignal, RealtimeEvent};
pub use identity::{AuthProvider, Identity, SocialProvider};
pub use listeners::{Listener, ListenerHandle, ListenerId, ListenerRegistry};
pub use traits::{Liveness, SessionBackend, SessionState, TokenSource};
