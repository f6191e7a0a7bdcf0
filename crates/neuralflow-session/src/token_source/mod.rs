//! Token source implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "firebase")]
pub mod firebase;

#[cfg(feature = "memory")]
pub use memory::MemoryTokenSource;

#[cfg(feature = "firebase")]
pub use firebase::{FirebaseConfig, FirebaseTokenSource};
