//! Application context.

use std::sync::Arc;

use neuralflow_core::{ClientConfig, SessionError, traits::TokenSource};
use neuralflow_session::{AuthStateHolder, HttpSessionBridge, LivenessMonitor, ProviderLink};
use neuralflow_transport::RealtimeChannel;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Subscriber key under which a signed-in session holds the realtime
/// connection open.
pub const SESSION_SUBSCRIBER: &str = "session";

/// Auth state shared by everything in the context.
pub type SharedAuth = AuthStateHolder<dyn TokenSource, HttpSessionBridge>;

/// Context startup error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session bridge error: {0}")]
    Session(#[from] SessionError),
}

/// Everything a client view needs, constructed once and passed down.
///
/// Dropping the context stops its background tasks.
pub struct AppContext {
    config: ClientConfig,
    auth: Arc<SharedAuth>,
    realtime: RealtimeChannel,
    monitor: Option<LivenessMonitor>,
    link: Option<ProviderLink>,
    follower: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Build the context and start following `token_source`.
    ///
    /// The realtime channel is held open for as long as somebody is
    /// signed in.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn start(
        config: ClientConfig,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<Self, ClientError> {
        let bridge = Arc::new(HttpSessionBridge::new(&config)?);
        let realtime = RealtimeChannel::new(config.socket_url.clone(), Some(bridge.cookie_jar()));
        let auth = Arc::new(AuthStateHolder::new(token_source, bridge));

        let link = auth.attach();
        let monitor = LivenessMonitor::spawn(Arc::clone(&auth), config.liveness_interval());
        let follower = tokio::spawn(follow_identity(Arc::clone(&auth), realtime.clone()));

        info!(
            api_url = %config.api_url,
            socket_url = %config.socket_url,
            interval_ms = config.liveness_interval_ms,
            "Client context started"
        );

        Ok(Self {
            config,
            auth,
            realtime,
            monitor: Some(monitor),
            link: Some(link),
            follower: Some(follower),
        })
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<SharedAuth> {
        &self.auth
    }

    #[must_use]
    pub fn realtime(&self) -> &RealtimeChannel {
        &self.realtime
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether background tasks are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(LivenessMonitor::is_running)
    }

    /// Stop the monitor, stop following the token source and close the
    /// realtime connection. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let was_running = self.monitor.is_some();
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.link.take();
        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
        self.realtime.release(SESSION_SUBSCRIBER);
        self.realtime.disconnect();
        if was_running {
            info!("Client context stopped");
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn follow_identity(auth: Arc<SharedAuth>, realtime: RealtimeChannel) {
    let mut identity = auth.watch();
    loop {
        let signed_in = identity.borrow_and_update().is_some();
        if signed_in {
            realtime.acquire(SESSION_SUBSCRIBER);
        } else {
            realtime.release(SESSION_SUBSCRIBER);
        }
        debug!(signed_in, "Realtime follows identity");
        if identity.changed().await.is_err() {
            break;
        }
    }
}
