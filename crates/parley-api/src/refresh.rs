use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use parley_session::{SessionContext, token};
use parley_types::api::RefreshResponse;

/// Why a fresh access token could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token; login required")]
    MissingRefreshToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Transport(String),

    /// The caller driving the refresh went away before it resolved.
    #[error("refresh abandoned")]
    Cancelled,
}

/// Mints a new access token from a refresh token.
pub trait TokenRefresher: Send + Sync {
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, RefreshError>> + Send;
}

struct Waiter {
    seq: u64,
    tx: oneshot::Sender<Result<String, RefreshError>>,
}

/// FIFO of callers parked behind an in-flight refresh.
#[derive(Default)]
struct RefreshQueue {
    next_seq: u64,
    waiters: VecDeque<Waiter>,
}

impl RefreshQueue {
    fn push(&mut self, tx: oneshot::Sender<Result<String, RefreshError>>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waiters.push_back(Waiter { seq, tx });
        seq
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Resolve every parked caller in arrival order. Returns the sequence
    /// numbers in the order they were released.
    fn resolve(&mut self, outcome: &Result<String, RefreshError>) -> Vec<u64> {
        self.waiters
            .drain(..)
            .map(|waiter| {
                // receiver dropped: that caller was cancelled, nothing to replay
                let _ = waiter.tx.send(outcome.clone());
                waiter.seq
            })
            .collect()
    }
}

#[derive(Default)]
struct Gate {
    refreshing: bool,
    queue: RefreshQueue,
}

/// Hands out valid access tokens, refreshing at most once at a time.
///
/// The first caller that finds the token expired becomes the leader and runs
/// the refresh; everyone arriving while it is in flight parks in a queue and
/// is released in arrival order with the leader's outcome.
pub struct RefreshCoordinator<R> {
    session: SessionContext,
    refresher: R,
    gate: Mutex<Gate>,
}

enum Entry {
    Ready(String),
    Wait(oneshot::Receiver<Result<String, RefreshError>>),
    Lead,
}

impl<R: TokenRefresher> RefreshCoordinator<R> {
    pub fn new(session: SessionContext, refresher: R) -> Self {
        Self {
            session,
            refresher,
            gate: Mutex::new(Gate::default()),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Callers currently parked behind the in-flight refresh.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// A token that is not expired, refreshing first if needed.
    pub async fn access_token(&self) -> Result<String, RefreshError> {
        let entry = self.enter(|current| match current {
            Some(t) if !token::is_expired(t, Utc::now()) => Some(t.to_string()),
            _ => None,
        });
        self.complete(entry).await
    }

    /// Called after the server rejected `stale` with 401. If another caller
    /// already replaced that token the current one is returned as is,
    /// otherwise a refresh runs.
    pub async fn refresh_after_unauthorized(&self, stale: &str) -> Result<String, RefreshError> {
        let entry = self.enter(|current| match current {
            Some(t) if t != stale && !token::is_expired(t, Utc::now()) => Some(t.to_string()),
            _ => None,
        });
        self.complete(entry).await
    }

    fn enter(&self, usable: impl FnOnce(Option<&str>) -> Option<String>) -> Entry {
        let mut gate = self.lock();
        if gate.refreshing {
            let (tx, rx) = oneshot::channel();
            let seq = gate.queue.push(tx);
            debug!("Refresh in flight, queued caller seq={}", seq);
            return Entry::Wait(rx);
        }

        let current = self.session.access_token();
        if let Some(token) = usable(current.as_deref()) {
            return Entry::Ready(token);
        }

        gate.refreshing = true;
        Entry::Lead
    }

    async fn complete(&self, entry: Entry) -> Result<String, RefreshError> {
        match entry {
            Entry::Ready(token) => Ok(token),
            Entry::Wait(rx) => rx.await.unwrap_or(Err(RefreshError::Cancelled)),
            Entry::Lead => self.lead_refresh().await,
        }
    }

    async fn lead_refresh(&self) -> Result<String, RefreshError> {
        let mut guard = LeaderGuard {
            coordinator: self,
            done: false,
        };

        let outcome = match self.session.refresh_token() {
            None => Err(RefreshError::MissingRefreshToken),
            Some(refresh) => {
                info!("Access token expired, refreshing");
                self.refresher.refresh(&refresh).await
            }
        };

        let outcome = match outcome {
            Ok(resp) => {
                self.session.update_tokens(resp.access.clone(), resp.refresh);
                Ok(resp.access)
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.session.invalidate();
                Err(e)
            }
        };

        guard.finish(&outcome);
        outcome
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Gate> {
        self.gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reopens the gate and releases the queue even if the leader's future is
/// dropped mid-refresh.
struct LeaderGuard<'a, R: TokenRefresher> {
    coordinator: &'a RefreshCoordinator<R>,
    done: bool,
}

impl<R: TokenRefresher> LeaderGuard<'_, R> {
    fn finish(&mut self, outcome: &Result<String, RefreshError>) {
        self.done = true;
        let mut gate = self.coordinator.lock();
        gate.refreshing = false;
        let released = gate.queue.resolve(outcome);
        if !released.is_empty() {
            debug!("Released {} queued callers", released.len());
        }
    }
}

impl<R: TokenRefresher> Drop for LeaderGuard<'_, R> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(&Err(RefreshError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_resolves_in_arrival_order() {
        let mut queue = RefreshQueue::default();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = oneshot::channel();
            queue.push(tx);
            receivers.push(rx);
        }

        let released = queue.resolve(&Ok("fresh".to_string()));
        assert_eq!(released, vec![0, 1, 2, 3]);
        assert_eq!(queue.len(), 0);
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Ok("fresh".to_string()));
        }

        // sequence numbers keep increasing across refresh rounds
        let (tx, _rx) = oneshot::channel();
        assert_eq!(queue.push(tx), 4);
    }

    #[test]
    fn queue_tolerates_dropped_waiters() {
        let mut queue = RefreshQueue::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        queue.push(tx1);
        queue.push(tx2);
        drop(rx1);

        assert_eq!(queue.resolve(&Err(RefreshError::Cancelled)), vec![0, 1]);
        assert_eq!(rx2.try_recv().unwrap(), Err(RefreshError::Cancelled));
    }
}
