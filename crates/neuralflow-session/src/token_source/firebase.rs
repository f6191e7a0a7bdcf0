//! Firebase Authentication REST token source (feature-gated).
//!
//! Talks to the Identity Toolkit and Secure Token endpoints directly.
//! Popup sign-in needs a browser and is reported as unsupported.

use std::{
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use neuralflow_core::{
    AuthProvider, Identity, ListenerHandle, ListenerRegistry, ProviderError, ProviderErrorKind,
    SocialProvider, listeners::Listener, traits::TokenSource,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com";

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Firebase project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseConfig {
    /// Web API key of the Firebase project.
    pub api_key: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_secure_token_url")]
    pub secure_token_url: String,
}

fn default_identity_url() -> String {
    DEFAULT_IDENTITY_URL.to_string()
}

fn default_secure_token_url() -> String {
    DEFAULT_SECURE_TOKEN_URL.to_string()
}

impl FirebaseConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            identity_url: default_identity_url(),
            secure_token_url: default_secure_token_url(),
        }
    }

    /// Read `FIREBASE_API_KEY` from the environment.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("FIREBASE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
    }

    fn accounts_url(&self, action: &str) -> String {
        format!(
            "{}/v1/accounts:{action}?key={}",
            self.identity_url.trim_end_matches('/'),
            self.api_key
        )
    }

    fn token_url(&self) -> String {
        format!(
            "{}/v1/token?key={}",
            self.secure_token_url.trim_end_matches('/'),
            self.api_key
        )
    }
}

#[derive(Debug)]
struct Credentials {
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl Credentials {
    fn new(id_token: String, refresh_token: String, expires_in: &str) -> Self {
        let secs = expires_in.parse().unwrap_or(3600);
        Self {
            id_token,
            refresh_token,
            expires_at: Instant::now() + Duration::from_secs(secs),
        }
    }

    fn needs_refresh(&self) -> bool {
        self.expires_at.saturating_duration_since(Instant::now()) < REFRESH_MARGIN
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Token source backed by Firebase Authentication.
pub struct FirebaseTokenSource {
    http_client: reqwest::Client,
    config: FirebaseConfig,
    credentials: Mutex<Option<Credentials>>,
    current: RwLock<Option<Identity>>,
    listeners: ListenerRegistry<Option<Identity>>,
}

impl FirebaseTokenSource {
    #[must_use]
    pub fn new(config: FirebaseConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
            credentials: Mutex::new(None),
            current: RwLock::new(None),
            listeners: ListenerRegistry::new(),
        }
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        decode(response).await
    }

    async fn complete_sign_in(&self, account: AccountResponse) -> Identity {
        let mut identity = Identity::new(account.local_id, AuthProvider::Password);
        identity.email = account.email;
        identity.display_name = account.display_name;
        identity.photo_url = account.photo_url;

        *self.credentials.lock().await = Some(Credentials::new(
            account.id_token,
            account.refresh_token,
            &account.expires_in,
        ));
        self.set_current(Some(identity.clone()));
        info!(uid = %identity.uid, "Signed in with Firebase");
        identity
    }

    fn set_current(&self, identity: Option<Identity>) {
        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != identity;
            current.clone_from(&identity);
            changed
        };
        if changed {
            self.listeners.emit(&identity);
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ProviderError> {
        debug!("Refreshing Firebase id token");
        let response = self
            .http_client
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(network_error)?;
        let refreshed: RefreshResponse = decode(response).await?;
        Ok(Credentials::new(
            refreshed.id_token,
            refreshed.refresh_token,
            &refreshed.expires_in,
        ))
    }
}

fn network_error(e: reqwest::Error) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Network, e.to_string())
}

async fn decode<Resp: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Resp, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Other, e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => Err(ProviderError::from_code(&envelope.error.message)),
        Err(_) => Err(ProviderError::new(
            ProviderErrorKind::Other,
            format!("HTTP {status}"),
        )),
    }
}

#[async_trait]
impl TokenSource for FirebaseTokenSource {
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
        let (token, refreshed) = {
            let mut credentials = self.credentials.lock().await;
            let Some(current) = credentials.as_ref() else {
                return Ok(None);
            };
            let mut refreshed = false;
            if current.needs_refresh() {
                let refresh_token = current.refresh_token.clone();
                match self.refresh(&refresh_token).await {
                    Ok(fresh) => {
                        *credentials = Some(fresh);
                        refreshed = true;
                    }
                    Err(e) => {
                        warn!("Token refresh failed: {e}");
                        return Err(e);
                    }
                }
            }
            (credentials.as_ref().map(|c| c.id_token.clone()), refreshed)
        };

        // Subscribers hear about rotated tokens, as they do for sign-in.
        if refreshed {
            let current = self.current_user();
            if current.is_some() {
                self.listeners.emit(&current);
            }
        }
        Ok(token)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let url = self.config.accounts_url("signInWithPassword");
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let account: AccountResponse = self.post_json(&url, &body).await?;
        Ok(self.complete_sign_in(account).await)
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, ProviderError> {
        let url = self.config.accounts_url("signUp");
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let mut account: AccountResponse = self.post_json(&url, &body).await?;

        if let Some(name) = display_name {
            let update_url = self.config.accounts_url("update");
            let update = serde_json::json!({
                "idToken": account.id_token,
                "displayName": name,
                "returnSecureToken": false,
            });
            match self.post_json::<_, serde_json::Value>(&update_url, &update).await {
                Ok(_) => account.display_name = Some(name.to_string()),
                Err(e) => warn!("Failed to set display name: {e}"),
            }
        }

        Ok(self.complete_sign_in(account).await)
    }

    async fn sign_in_with_popup(
        &self,
        provider: SocialProvider,
    ) -> Result<Identity, ProviderError> {
        Err(ProviderError::new(
            ProviderErrorKind::Unsupported,
            format!("{provider:?} popup sign-in requires a browser"),
        ))
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let url = self.config.accounts_url("sendOobCode");
        let body = serde_json::json!({
            "requestType": "PASSWORD_RESET",
            "email": email,
        });
        self.post_json::<_, serde_json::Value>(&url, &body).await?;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.credentials.lock().await.take();
        self.set_current(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, body_string_contains, method, path, query_param},
    };

    use super::*;

    fn source_for(server: &MockServer) -> FirebaseTokenSource {
        FirebaseTokenSource::new(FirebaseConfig {
            api_key: "test-key".into(),
            identity_url: server.uri(),
            secure_token_url: server.uri(),
        })
    }

    fn account(expires_in: &str) -> serde_json::Value {
        json!({
            "localId": "fb-1",
            "email": "ada@example.com",
            "displayName": "Ada",
            "idToken": "id-1",
            "refreshToken": "refresh-1",
            "expiresIn": expires_in,
        })
    }

    #[tokio::test]
    async fn test_sign_in_with_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({"email": "ada@example.com", "returnSecureToken": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(account("3600")))
            .mount(&server)
            .await;

        let source = source_for(&server);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = source.subscribe(Arc::new(move |identity: &Option<Identity>| {
            sink.lock().unwrap().push(identity.clone());
        }));

        let identity = assert_ok!(source.sign_in_with_password("ada@example.com", "pw").await);
        assert_eq!(identity.uid, "fb-1");
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        assert_eq!(assert_ok!(source.id_token().await).as_deref(), Some("id-1"));
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert_ok!(source.sign_out().await);
        assert_eq!(assert_ok!(source.id_token().await), None);
        assert_eq!(*seen.lock().unwrap().last().unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_codes_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signUp"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "code": 400,
                    "message": "WEAK_PASSWORD : Password should be at least 6 characters",
                }
            })))
            .mount(&server)
            .await;

        let source = source_for(&server);
        let err = assert_err!(source.sign_up_with_password("ada@example.com", "1", None).await);
        assert_eq!(err.kind, ProviderErrorKind::WeakPassword);
        assert_eq!(source.current_user(), None);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account("30")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "id-2",
                "refresh_token": "refresh-2",
                "expires_in": "3600",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = source.subscribe(Arc::new(move |identity: &Option<Identity>| {
            sink.lock().unwrap().push(identity.clone());
        }));

        assert_ok!(source.sign_in_with_password("ada@example.com", "pw").await);
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert_eq!(assert_ok!(source.id_token().await).as_deref(), Some("id-2"));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].as_ref().map(|i| i.uid.as_str()), Some("fb-1"));
        }

        // A token that is still fresh is handed out without notifying anyone.
        assert_eq!(assert_ok!(source.id_token().await).as_deref(), Some("id-2"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_popup_is_unsupported() {
        let source = FirebaseTokenSource::new(FirebaseConfig::new("k"));
        let err = assert_err!(source.sign_in_with_popup(SocialProvider::Google).await);
        assert_eq!(err.kind, ProviderErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_password_reset_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendOobCode"))
            .and(body_partial_json(json!({"requestType": "PASSWORD_RESET"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"email": "ada@example.com"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server);
        assert_ok!(source.send_password_reset("ada@example.com").await);
    }
}
