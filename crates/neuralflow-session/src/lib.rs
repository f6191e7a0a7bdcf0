//! Session lifecycle for the NeuralFlow client.
//!
//! Provides:
//! - `HttpSessionBridge` - Exchange bearer tokens for session cookies
//! - `AuthStateHolder` - Single source of truth for the signed-in user
//! - `LivenessMonitor` - Fixed-interval session re-validation
//! - Token source implementations (memory, Firebase)

pub mod bridge;
pub mod holder;
pub mod monitor;
pub mod token_source;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::HttpSessionBridge;
pub use holder::{AuthStateHolder, ProviderLink};
pub use monitor::LivenessMonitor;
