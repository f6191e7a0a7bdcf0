//! Core traits for identity providers and session backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Identity, ListenerHandle, SocialProvider,
    error::{ProviderError, SessionError},
    listeners::Listener,
};

/// Client-side belief about the server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session cookie is believed to exist.
    NoSession,
    /// A bearer token is being exchanged for a cookie.
    Establishing,
    /// The server accepted the token.
    Active,
}

/// Outcome of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The server answered 401.
    Expired,
}

/// Trait for identity providers.
///
/// Implementations translate provider-specific user objects into
/// [`Identity`] and provider error codes into typed kinds.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Register a listener for signed-in user changes.
    ///
    /// Events are delivered in the order the provider emits them. A token
    /// refresh re-emits the current user so the server session can be
    /// renewed. The listener is removed when the returned handle is dropped.
    fn subscribe(&self, listener: Listener<Option<Identity>>) -> ListenerHandle;

    /// The currently signed-in user, if any.
    fn current_user(&self) -> Option<Identity>;

    /// Short-lived bearer token for the current user.
    async fn id_token(&self) -> Result<Option<String>, ProviderError>;

    /// Sign in with email and password.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError>;

    /// Create an account and sign it in.
    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, ProviderError>;

    /// Sign in through a provider-controlled popup.
    async fn sign_in_with_popup(&self, provider: SocialProvider)
    -> Result<Identity, ProviderError>;

    /// Send a password reset email.
    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    /// Sign out of the provider. Safe to call when already signed out.
    async fn sign_out(&self) -> Result<(), ProviderError>;
}

/// Trait for the server session backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Exchange a bearer token for a session cookie.
    async fn establish(&self, token: &str) -> Result<(), SessionError>;

    /// Ask the server whether the session cookie is still valid.
    async fn check_liveness(&self) -> Result<Liveness, SessionError>;

    /// Ask the server to clear its cookie. Never fails.
    async fn logout(&self);

    /// Current client-side session state.
    fn state(&self) -> SessionState;
}
