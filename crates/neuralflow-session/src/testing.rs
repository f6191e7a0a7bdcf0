//! Scripted session backend for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use neuralflow_core::{
    SessionError,
    traits::{Liveness, SessionBackend, SessionState},
};

#[derive(Default)]
pub struct FakeBackend {
    establish_results: Mutex<VecDeque<Result<(), u16>>>,
    liveness_results: Mutex<VecDeque<Result<Liveness, String>>>,
    state: Mutex<Option<SessionState>>,
    pub establish_calls: AtomicUsize,
    pub liveness_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl FakeBackend {
    /// Queue an establish outcome; `Err(status)` is a rejection.
    pub fn push_establish(&self, result: Result<(), u16>) {
        self.establish_results.lock().unwrap().push_back(result);
    }

    /// Queue a liveness outcome; `Err` is a transport failure.
    pub fn push_liveness(&self, result: Result<Liveness, String>) {
        self.liveness_results.lock().unwrap().push_back(result);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = Some(state);
    }
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn establish(&self, _token: &str) -> Result<(), SessionError> {
        self.establish_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.establish_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match next {
            Ok(()) => {
                self.set_state(SessionState::Active);
                Ok(())
            }
            Err(status) => {
                self.set_state(SessionState::NoSession);
                Err(SessionError::Rejected(status))
            }
        }
    }

    async fn check_liveness(&self) -> Result<Liveness, SessionError> {
        self.liveness_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .liveness_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Liveness::Alive));
        match next {
            Ok(Liveness::Expired) => {
                self.set_state(SessionState::NoSession);
                Ok(Liveness::Expired)
            }
            Ok(alive) => Ok(alive),
            Err(e) => Err(SessionError::Transport(e)),
        }
    }

    async fn logout(&self) {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(SessionState::NoSession);
    }

    fn state(&self) -> SessionState {
        self.state.lock().unwrap().unwrap_or(SessionState::NoSession)
    }
}
