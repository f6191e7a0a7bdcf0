//! Fixed-interval session liveness monitor.

use std::{sync::Arc, time::Duration};

use neuralflow_core::traits::{SessionBackend, TokenSource};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

use crate::AuthStateHolder;

/// Background task re-validating the session cookie.
///
/// Checks once immediately, then every `period`. No backoff, no jitter.
/// The task stops when the monitor is stopped or dropped.
pub struct LivenessMonitor {
    task: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Spawn the monitor for `holder`.
    #[must_use]
    pub fn spawn<T, B>(holder: Arc<AuthStateHolder<T, B>>, period: Duration) -> Self
    where
        T: TokenSource + ?Sized + 'static,
        B: SessionBackend + ?Sized + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(liveness) = holder.check_liveness().await {
                    debug!(?liveness, "Liveness check finished");
                }
            }
        });
        Self { task }
    }

    /// Stop checking.
    pub fn stop(self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use neuralflow_core::{AuthProvider, AuthSignal, Identity, traits::Liveness};
    use tokio::time::sleep;

    use super::*;
    use crate::{testing::FakeBackend, token_source::MemoryTokenSource};

    const PERIOD: Duration = Duration::from_secs(30);

    fn setup() -> (Arc<FakeBackend>, Arc<AuthStateHolder<MemoryTokenSource, FakeBackend>>) {
        let backend = Arc::new(FakeBackend::default());
        let holder = Arc::new(AuthStateHolder::new(
            Arc::new(MemoryTokenSource::new()),
            Arc::clone(&backend),
        ));
        (backend, holder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_immediately_then_every_period() {
        let (backend, holder) = setup();
        holder.set_identity(Some(Identity::new("u1", AuthProvider::Password)));

        let monitor = LivenessMonitor::spawn(Arc::clone(&holder), PERIOD);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(FakeBackend::count(&backend.liveness_calls), 1);

        sleep(PERIOD).await;
        assert_eq!(FakeBackend::count(&backend.liveness_calls), 2);

        sleep(PERIOD * 2).await;
        assert_eq!(FakeBackend::count(&backend.liveness_calls), 4);
        assert!(monitor.is_running());
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_signs_out_on_next_tick() {
        let (backend, holder) = setup();
        holder.set_identity(Some(Identity::new("u1", AuthProvider::Password)));
        let mut signals = holder.signals();

        let _monitor = LivenessMonitor::spawn(Arc::clone(&holder), PERIOD);
        sleep(Duration::from_millis(1)).await;
        assert!(holder.identity().is_some());

        backend.push_liveness(Ok(Liveness::Expired));
        sleep(PERIOD).await;

        assert_eq!(holder.identity(), None);
        assert_eq!(signals.recv().await.unwrap(), AuthSignal::SignedOut);
        assert_eq!(signals.recv().await.unwrap(), AuthSignal::SessionExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_requests_while_signed_out() {
        let (backend, holder) = setup();
        let _monitor = LivenessMonitor::spawn(Arc::clone(&holder), PERIOD);

        sleep(PERIOD * 3).await;
        assert_eq!(FakeBackend::count(&backend.liveness_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_checks() {
        let (backend, holder) = setup();
        holder.set_identity(Some(Identity::new("u1", AuthProvider::Password)));

        let monitor = LivenessMonitor::spawn(Arc::clone(&holder), PERIOD);
        sleep(Duration::from_millis(1)).await;
        drop(monitor);

        sleep(PERIOD * 2).await;
        assert_eq!(FakeBackend::count(&backend.liveness_calls), 1);
    }
}
