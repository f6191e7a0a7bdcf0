//! Session monitor demo.
//!
//! Signs in, keeps the server session alive and prints realtime events
//! until interrupted.
//!
//! Run with:
//! `API_URL=http://localhost:5000/api NEURALFLOW_EMAIL=... \
//!  NEURALFLOW_PASSWORD=... cargo run -p session-monitor`
//!
//! Set `FIREBASE_API_KEY` to sign in against Firebase instead of the
//! in-memory account, and `NEURALFLOW_TASK_ID` to print completions of one
//! AI task.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use neuralflow_client::{AppContext, AuthSignal, ClientConfig, RealtimeEvent};
use neuralflow_core::{AuthProvider, Identity, traits::TokenSource};
use neuralflow_session::token_source::{FirebaseConfig, FirebaseTokenSource, MemoryTokenSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::from_env().context("Invalid client configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    let email = std::env::var("NEURALFLOW_EMAIL").context("NEURALFLOW_EMAIL is not set")?;
    let password = std::env::var("NEURALFLOW_PASSWORD").context("NEURALFLOW_PASSWORD is not set")?;

    let source: Arc<dyn TokenSource> = if let Some(firebase) = FirebaseConfig::from_env() {
        tracing::info!("Using Firebase token source");
        Arc::new(FirebaseTokenSource::new(firebase))
    } else {
        tracing::info!("FIREBASE_API_KEY not set, using in-memory account");
        Arc::new(MemoryTokenSource::new().with_account(
            &email,
            &password,
            Identity::new("demo", AuthProvider::Password).with_email(&email),
        ))
    };

    let mut ctx = AppContext::start(config, source)?;
    let mut signals = ctx.auth().signal_stream();
    let mut events = ctx.realtime().events();

    let _task = std::env::var("NEURALFLOW_TASK_ID").ok().map(|task_id| {
        tracing::info!(%task_id, "Watching AI task");
        ctx.realtime().on_ai_completed(task_id, |completion| {
            tracing::info!(
                task_id = %completion.task_id,
                result = ?completion.result,
                "AI task completed"
            );
        })
    });

    match ctx.auth().sign_in_with_password(&email, &password).await {
        Ok(identity) => tracing::info!("Welcome, {}", identity.greeting_name()),
        Err(notice) => anyhow::bail!("{}: {}", notice.title, notice.message),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(signal) = signals.next() => match signal {
                AuthSignal::SignedIn(identity) => tracing::info!(uid = %identity.uid, "Signed in"),
                AuthSignal::SignedOut => tracing::info!("Signed out"),
                AuthSignal::SessionExpired => {
                    tracing::warn!("Session expired, sign in again");
                    break;
                }
            },
            Some(event) = events.next() => match event {
                RealtimeEvent::AiCompleted(completion) => {
                    tracing::debug!(task_id = %completion.task_id, "ai:completed received");
                }
                RealtimeEvent::Other { name, payload } => {
                    tracing::info!(%name, %payload, "Realtime event");
                }
            },
        }
    }

    ctx.auth().logout().await;
    ctx.shutdown();
    Ok(())
}
