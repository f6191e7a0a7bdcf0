//! HTTP session bridge.
//!
//! Exchanges a bearer token for a server-side session cookie and checks
//! that the cookie is still honoured. The cookie lives in a shared jar so
//! the realtime channel can present the same credentials.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use neuralflow_core::{
    ClientConfig, SessionError,
    traits::{Liveness, SessionBackend, SessionState},
};
use reqwest::{StatusCode, cookie::Jar};
use tracing::{debug, info, warn};

/// Session backend speaking to `{API_URL}/auth`.
pub struct HttpSessionBridge {
    client: reqwest::Client,
    jar: Arc<Jar>,
    auth_url: String,
    logout_url: String,
    state: RwLock<SessionState>,
}

impl HttpSessionBridge {
    /// Create a bridge with a fresh cookie jar.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, SessionError> {
        Self::with_jar(config, Arc::new(Jar::default()))
    }

    /// Create a bridge storing cookies in `jar`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_jar(config: &ClientConfig, jar: Arc<Jar>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            jar,
            auth_url: config.endpoint("auth"),
            logout_url: config.endpoint("auth/logout"),
            state: RwLock::new(SessionState::NoSession),
        })
    }

    /// Cookie jar holding the session cookie.
    #[must_use]
    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(from = ?*state, to = ?next, "Session state changed");
            *state = next;
        }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBridge {
    async fn establish(&self, token: &str) -> Result<(), SessionError> {
        self.set_state(SessionState::Establishing);

        let response = match self.client.post(&self.auth_url).bearer_auth(token).send().await {
            Ok(r) => r,
            Err(e) => {
                self.set_state(SessionState::NoSession);
                return Err(SessionError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            self.set_state(SessionState::Active);
            info!("Session established");
            Ok(())
        } else {
            self.set_state(SessionState::NoSession);
            warn!(status = %status, "Session bootstrap rejected");
            Err(SessionError::Rejected(status.as_u16()))
        }
    }

    async fn check_liveness(&self) -> Result<Liveness, SessionError> {
        let response = match self.client.post(&self.auth_url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.set_state(SessionState::NoSession);
                return Err(SessionError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.set_state(SessionState::NoSession);
            return Ok(Liveness::Expired);
        }
        if !status.is_success() {
            // Only 401 invalidates the session.
            warn!(status = %status, "Unexpected liveness response");
        }
        Ok(Liveness::Alive)
    }

    async fn logout(&self) {
        match self.client.post(&self.logout_url).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Server logout returned error status");
            }
            Ok(_) => debug!("Server session cleared"),
            Err(e) => warn!("Server logout failed: {e}"),
        }
        self.set_state(SessionState::NoSession);
    }

    fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::cookie::CookieStore;
    use tokio_test::{assert_err, assert_ok};
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;

    fn bridge_for(server: &MockServer) -> HttpSessionBridge {
        let config = ClientConfig::new(Url::parse(&server.uri()).unwrap());
        HttpSessionBridge::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_establish_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        assert_eq!(bridge.state(), SessionState::NoSession);
        assert_ok!(bridge.establish("tok-1").await);
        assert_eq!(bridge.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_establish_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        let err = assert_err!(bridge.establish("tok-1").await);
        assert!(matches!(err, SessionError::Rejected(403)));
        assert_eq!(bridge.state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_cookie_carried_to_liveness_check() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        assert_ok!(bridge.establish("tok-1").await);
        assert_eq!(assert_ok!(bridge.check_liveness().await), Liveness::Alive);

        let url = Url::parse(&server.uri()).unwrap();
        let cookies = bridge.cookie_jar().cookies(&url).unwrap();
        assert_eq!(cookies.to_str().unwrap(), "session=abc");
    }

    #[tokio::test]
    async fn test_liveness_401_expires() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        assert_eq!(assert_ok!(bridge.check_liveness().await), Liveness::Expired);
        assert_eq!(bridge.state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_liveness_server_error_is_not_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        assert_eq!(assert_ok!(bridge.check_liveness().await), Liveness::Alive);
    }

    fn unreachable_bridge() -> HttpSessionBridge {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = ClientConfig::new(Url::parse(&format!("http://127.0.0.1:{port}")).unwrap());
        HttpSessionBridge::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let bridge = unreachable_bridge();

        let err = assert_err!(bridge.check_liveness().await);
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_logout_swallows_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let bridge = bridge_for(&server);
        bridge.logout().await;
        bridge.logout().await;
        assert_eq!(bridge.state(), SessionState::NoSession);

        unreachable_bridge().logout().await;
    }
}
