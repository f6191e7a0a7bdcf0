//! In-memory token source.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use neuralflow_core::{
    AuthProvider, Identity, ListenerHandle, ListenerRegistry, ProviderError, ProviderErrorKind,
    SocialProvider, listeners::Listener, traits::TokenSource,
};
use uuid::Uuid;

/// Shortest password accepted on sign-up.
const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    password: String,
    identity: Identity,
}

/// In-memory identity provider.
///
/// Useful for development, demos and tests. Accounts live only as long as
/// the value. Popup sign-in replays outcomes queued with
/// [`MemoryTokenSource::queue_popup`].
pub struct MemoryTokenSource {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Identity>>,
    popup_outcomes: RwLock<VecDeque<Result<Identity, ProviderErrorKind>>>,
    password_resets: RwLock<Vec<String>>,
    listeners: ListenerRegistry<Option<Identity>>,
    tokens_issued: AtomicU64,
}

impl MemoryTokenSource {
    /// Create an empty provider with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            popup_outcomes: RwLock::new(VecDeque::new()),
            password_resets: RwLock::new(Vec::new()),
            listeners: ListenerRegistry::new(),
            tokens_issued: AtomicU64::new(0),
        }
    }

    /// Register an email/password account.
    #[must_use]
    pub fn with_account(self, email: &str, password: &str, identity: Identity) -> Self {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                email.to_ascii_lowercase(),
                Account {
                    password: password.to_string(),
                    identity,
                },
            );
        self
    }

    /// Queue the outcome of the next popup sign-in.
    pub fn queue_popup(&self, outcome: Result<Identity, ProviderErrorKind>) {
        self.popup_outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Emit a provider-driven change, as a token refresh or remote sign-out would.
    pub fn emit(&self, identity: Option<Identity>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = identity.clone();
        self.listeners.emit(&identity);
    }

    /// Emails that requested a password reset, oldest first.
    #[must_use]
    pub fn password_resets(&self) -> Vec<String> {
        self.password_resets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of bearer tokens handed out so far.
    #[must_use]
    pub fn tokens_issued(&self) -> u64 {
        self.tokens_issued.load(Ordering::SeqCst)
    }

    fn sign_in_as(&self, identity: &Identity) {
        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let changed = current.as_ref() != Some(identity);
            *current = Some(identity.clone());
            changed
        };
        if changed {
            self.listeners.emit(&Some(identity.clone()));
        }
    }

    fn internal(e: impl ToString) -> ProviderError {
        ProviderError::new(ProviderErrorKind::Other, e.to_string())
    }
}

impl Default for MemoryTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for MemoryTokenSource {
    fn subscribe(&self, listener: Listener<Option<Identity>>) -> ListenerHandle {
        self.listeners.subscribe(listener)
    }

    fn current_user(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn id_token(&self) -> Result<Option<String>, ProviderError> {
        let Some(identity) = self.current_user() else {
            return Ok(None);
        };
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("mem.{}.{n}", identity.uid)))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let identity = {
            let accounts = self.accounts.read().map_err(Self::internal)?;
            match accounts.get(&email.to_ascii_lowercase()) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(ProviderError::from_code("INVALID_LOGIN_CREDENTIALS")),
            }
        };
        self.sign_in_as(&identity);
        Ok(identity)
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, ProviderError> {
        let key = email.to_ascii_lowercase();
        let identity = {
            let mut accounts = self.accounts.write().map_err(Self::internal)?;
            if accounts.contains_key(&key) {
                return Err(ProviderError::from_code("auth/email-already-in-use"));
            }
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(ProviderError::from_code("auth/weak-password"));
            }

            let mut identity =
                Identity::new(Uuid::new_v4().to_string(), AuthProvider::Password).with_email(email);
            if let Some(name) = display_name {
                identity = identity.with_display_name(name);
            }
            accounts.insert(
                key,
                Account {
                    password: password.to_string(),
                    identity: identity.clone(),
                },
            );
            identity
        };
        self.sign_in_as(&identity);
        Ok(identity)
    }

    async fn sign_in_with_popup(
        &self,
        provider: SocialProvider,
    ) -> Result<Identity, ProviderError> {
        let outcome = self
            .popup_outcomes
            .write()
            .map_err(Self::internal)?
            .pop_front()
            .unwrap_or(Err(ProviderErrorKind::PopupClosed));

        let mut identity = outcome
            .map_err(|kind| ProviderError::new(kind, format!("{provider:?} popup failed")))?;
        identity.provider = provider.into();

        // An email registered with a password cannot be claimed by a social login.
        if let Some(email) = identity.email.as_deref() {
            let accounts = self.accounts.read().map_err(Self::internal)?;
            if let Some(existing) = accounts.get(&email.to_ascii_lowercase()) {
                if existing.identity.provider != identity.provider {
                    return Err(ProviderError::from_code(
                        "auth/account-exists-with-different-credential",
                    ));
                }
            }
        }

        self.sign_in_as(&identity);
        Ok(identity)
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let known = self
            .accounts
            .read()
            .map_err(Self::internal)?
            .contains_key(&email.to_ascii_lowercase());
        if !known {
            return Err(ProviderError::from_code("EMAIL_NOT_FOUND"));
        }
        self.password_resets
            .write()
            .map_err(Self::internal)?
            .push(email.to_string());
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let was_signed_in = self
            .current
            .write()
            .map_err(Self::internal)?
            .take()
            .is_some();
        if was_signed_in {
            self.listeners.emit(&None);
        }
        Ok(())
    }
}
