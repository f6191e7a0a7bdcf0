//! Auth state holder: who is signed in.
//!
//! The holder owns the current [`Identity`] and keeps the server session in
//! step with it. Every identity replacement bumps an epoch; session failures
//! observed under an older epoch are ignored, so a late 401 from a previous
//! session cannot sign out a user who signed in afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{StreamExt, future, stream::BoxStream};
use neuralflow_core::{
    AuthNotice, AuthSignal, Identity, ListenerHandle, ProviderError, SessionError, SocialProvider,
    traits::{Liveness, SessionBackend, SessionState, TokenSource},
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Shown after a successful sign-up.
pub const SIGN_UP_SUCCESS: &str = "Your account has been created.";
/// Shown after a password reset email was requested.
pub const PASSWORD_RESET_SENT: &str = "Password reset email sent. Check your inbox.";

const SIGNAL_CAPACITY: usize = 64;

/// Single source of truth for the signed-in user.
///
/// Construct one per application and share it through `Arc`.
pub struct AuthStateHolder<T: ?Sized, B: ?Sized> {
    token_source: Arc<T>,
    backend: Arc<B>,
    identity: watch::Sender<Option<Identity>>,
    epoch: Mutex<u64>,
    signals: broadcast::Sender<AuthSignal>,
}

impl<T, B> AuthStateHolder<T, B>
where
    T: TokenSource + ?Sized,
    B: SessionBackend + ?Sized,
{
    /// Create a holder with nobody signed in.
    #[must_use]
    pub fn new(token_source: Arc<T>, backend: Arc<B>) -> Self {
        let (identity, _) = watch::channel(None);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            token_source,
            backend,
            identity,
            epoch: Mutex::new(0),
            signals,
        }
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current identity (a copy).
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Receiver that observes every identity replacement.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    /// Receiver for sign-in, sign-out and expiry signals.
    #[must_use]
    pub fn signals(&self) -> broadcast::Receiver<AuthSignal> {
        self.signals.subscribe()
    }

    /// Stream of signals, skipping any a slow consumer missed.
    #[must_use]
    pub fn signal_stream(&self) -> BoxStream<'static, AuthSignal> {
        BroadcastStream::new(self.signals())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }

    /// Generation of the current identity.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.backend.state()
    }

    #[must_use]
    pub fn token_source(&self) -> &Arc<T> {
        &self.token_source
    }

    /// Replace the current identity and return the new epoch.
    ///
    /// The last write wins; no ordering against in-flight session calls
    /// is applied here.
    pub fn set_identity(&self, identity: Option<Identity>) -> u64 {
        let (epoch, previous) = {
            let mut epoch = self.lock_epoch();
            *epoch += 1;
            (*epoch, self.identity.send_replace(identity.clone()))
        };
        self.announce(previous.as_ref(), identity);
        epoch
    }

    /// Clear the identity only if no replacement happened since `expected`.
    fn clear_if_epoch(&self, expected: u64) -> bool {
        let previous = {
            let mut epoch = self.lock_epoch();
            if *epoch != expected {
                return false;
            }
            *epoch += 1;
            self.identity.send_replace(None)
        };
        self.announce(previous.as_ref(), None);
        true
    }

    fn announce(&self, previous: Option<&Identity>, current: Option<Identity>) {
        let signal = match current {
            Some(identity) if previous != Some(&identity) => AuthSignal::SignedIn(identity),
            None if previous.is_some() => AuthSignal::SignedOut,
            _ => return,
        };
        debug!(?signal, "Auth state changed");
        let _ = self.signals.send(signal);
    }

    /// Apply an identity change reported by the token source.
    ///
    /// A signed-in user triggers a session bootstrap; if the bootstrap
    /// fails the user is logged out again.
    pub async fn handle_provider_event(&self, identity: Option<Identity>) {
        match identity {
            Some(identity) => {
                info!(uid = %identity.uid, provider = %identity.provider, "User signed in");
                let epoch = self.set_identity(Some(identity));
                if let Err(e) = self.establish_session().await {
                    warn!("Session bootstrap failed: {e}");
                    self.expire_session(epoch).await;
                }
            }
            None => {
                let had_identity = self.identity().is_some();
                self.set_identity(None);
                if had_identity {
                    info!("User signed out");
                    self.backend.logout().await;
                }
            }
        }
    }

    async fn establish_session(&self) -> Result<(), SessionError> {
        let token = self
            .token_source
            .id_token()
            .await?
            .ok_or(SessionError::NoToken)?;
        self.backend.establish(&token).await
    }

    /// Log out: provider sign-out, server logout, then clear the identity.
    ///
    /// Safe to call repeatedly and when nobody is signed in. Failures in the
    /// first two steps are logged and do not stop the final step.
    pub async fn logout(&self) {
        if let Err(e) = self.token_source.sign_out().await {
            warn!("Provider sign-out failed: {e}");
        }
        self.backend.logout().await;
        self.set_identity(None);
    }

    /// Force logout after a session failure observed under `epoch`.
    ///
    /// Returns false and leaves state untouched when the identity was
    /// replaced since `epoch`.
    pub async fn expire_session(&self, epoch: u64) -> bool {
        if self.epoch() != epoch {
            debug!(epoch, current = self.epoch(), "Ignoring stale session failure");
            return false;
        }

        info!("Session is no longer valid, signing out");
        if let Err(e) = self.token_source.sign_out().await {
            warn!("Provider sign-out failed: {e}");
        }
        self.backend.logout().await;
        // The provider may already have reported the sign-out.
        self.clear_if_epoch(epoch);

        if self.identity().is_some() {
            return false;
        }
        let _ = self.signals.send(AuthSignal::SessionExpired);
        true
    }

    /// Run one liveness check for the current identity.
    ///
    /// Returns `None` without contacting the server when nobody is signed
    /// in. A 401 or a transport failure forces logout.
    pub async fn check_liveness(&self) -> Option<Liveness> {
        if self.identity().is_none() {
            return None;
        }
        let epoch = self.epoch();

        let liveness = match self.backend.check_liveness().await {
            Ok(liveness) => liveness,
            Err(e) => {
                warn!("Liveness check failed: {e}");
                Liveness::Expired
            }
        };

        if liveness == Liveness::Expired {
            self.expire_session(epoch).await;
        }
        Some(liveness)
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    /// Returns the notice to display when the provider rejects the attempt.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, AuthNotice> {
        self.token_source
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| failure_notice("Password sign-in", &e))
    }

    /// Sign in through a social provider popup.
    ///
    /// # Errors
    /// Returns the notice to display when the popup fails.
    pub async fn sign_in_with_popup(
        &self,
        provider: SocialProvider,
    ) -> Result<Identity, AuthNotice> {
        self.token_source
            .sign_in_with_popup(provider)
            .await
            .map_err(|e| failure_notice("Popup sign-in", &e))
    }

    /// Create an account; the returned notice is a success or failure.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> AuthNotice {
        match self
            .token_source
            .sign_up_with_password(email, password, display_name)
            .await
        {
            Ok(_) => AuthNotice::success(SIGN_UP_SUCCESS),
            Err(e) => failure_notice("Sign-up", &e),
        }
    }

    /// Request a password reset email.
    pub async fn send_password_reset(&self, email: &str) -> AuthNotice {
        match self.token_source.send_password_reset(email).await {
            Ok(()) => AuthNotice::success(PASSWORD_RESET_SENT),
            Err(e) => failure_notice("Password reset", &e),
        }
    }
}

fn failure_notice(action: &str, error: &ProviderError) -> AuthNotice {
    warn!(kind = %error.kind, "{action} failed: {}", error.detail);
    error.notice()
}

impl<T, B> AuthStateHolder<T, B>
where
    T: TokenSource + ?Sized + 'static,
    B: SessionBackend + ?Sized + 'static,
{
    /// Follow the token source: every identity it reports is applied in
    /// emission order. The current user, if any, is applied first.
    ///
    /// Dropping the returned link stops following.
    #[must_use]
    pub fn attach(self: &Arc<Self>) -> ProviderLink {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Identity>>();

        let listener_tx = tx.clone();
        let listener = self
            .token_source
            .subscribe(Arc::new(move |identity: &Option<Identity>| {
                let _ = listener_tx.send(identity.clone());
            }));

        if let Some(current) = self.token_source.current_user() {
            let _ = tx.send(Some(current));
        }
        drop(tx);

        let holder = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(identity) = rx.recv().await {
                holder.handle_provider_event(identity).await;
            }
        });

        ProviderLink {
            _listener: listener,
            task,
        }
    }
}

/// Subscription of a holder to its token source.
pub struct ProviderLink {
    _listener: ListenerHandle,
    task: JoinHandle<()>,
}

impl Drop for ProviderLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
