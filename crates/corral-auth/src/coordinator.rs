//! Single-flight token refresh.
//!
//! Any number of callers may hit an expired token at once. The first caller
//! to arrive while the coordinator is idle starts the one refresh call; every
//! other caller queues behind it and receives the same outcome, in the order
//! it subscribed.
//!
//! The refresh itself runs on a spawned task, so a caller that drops its
//! future does not strand the queue: the call still settles and every
//! remaining waiter is notified. A panic inside the backend call settles the
//! queue the same way, as a failed refresh.
//!
//! Every sign-out bumps a session epoch. A refresh that settles after the
//! epoch moved is discarded and never writes to the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::backend::SharedAuthBackend;
use crate::error::{AuthError, Result};
use crate::events::{AuthEvent, EVENT_CAPACITY};
use crate::store::SharedTokenStore;
use crate::token::TokenPair;

type Waiter = oneshot::Sender<Result<String>>;

/// Pending refresh state. At most one `Refreshing` exists at a time.
#[derive(Debug, Default)]
enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        waiters: Vec<Waiter>,
    },
}

/// What a caller does after looking at the state.
enum Entry {
    Lead { refresh_token: String, epoch: u64 },
    Wait,
    NoRefreshToken,
}

/// Coordinates token refreshes so concurrent 401s share a single call.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Debug)]
struct CoordinatorInner {
    store: SharedTokenStore,
    backend: SharedAuthBackend,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
    refresh_calls: AtomicU64,
    /// Bumped on every sign-out, always while holding `state`.
    epoch: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(store: SharedTokenStore, backend: SharedAuthBackend) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                backend,
                state: Mutex::new(RefreshState::Idle),
                events,
                refresh_calls: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh the access token, or join the refresh already in flight.
    ///
    /// Returns the new access token. On failure the store has been cleared
    /// and [`AuthEvent::LoginRequired`] broadcast; callers must propagate
    /// the error rather than retry.
    pub async fn refresh_or_wait(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();

        // Test-and-set before the first suspension point.
        let entry = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    Entry::Wait
                }
                RefreshState::Idle => match self.inner.stored_refresh_token() {
                    Some(refresh_token) => {
                        *state = RefreshState::Refreshing { waiters: vec![tx] };
                        Entry::Lead {
                            refresh_token,
                            epoch: self.inner.epoch.load(Ordering::SeqCst),
                        }
                    }
                    None => Entry::NoRefreshToken,
                },
            }
        };

        match entry {
            Entry::NoRefreshToken => {
                let err = AuthError::NoRefreshToken;
                self.inner.end_session(&err);
                return Err(err);
            }
            Entry::Lead {
                refresh_token,
                epoch,
            } => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.run_refresh(refresh_token, epoch).await });
            }
            Entry::Wait => tracing::debug!("Refresh in flight, waiting for result"),
        }

        rx.await.unwrap_or_else(|_| {
            tracing::error!("Refresh task dropped its waiters without a result");
            Err(AuthError::RefreshFailed(
                "refresh ended without a result".to_string(),
            ))
        })
    }

    /// Clear the stored pair for an explicit sign-out.
    ///
    /// Any refresh still in flight is discarded when it settles: its waiters
    /// get [`AuthError::Unauthenticated`] and the store stays empty. No
    /// `LoginRequired` is broadcast.
    pub fn sign_out(&self) -> Result<()> {
        let _state = self.inner.state.lock();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.store.clear()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// True while a refresh call is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of callers queued on the in-flight refresh, the leader included.
    pub fn waiting(&self) -> usize {
        match &*self.inner.state.lock() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Refresh calls issued to the backend over this coordinator's lifetime.
    pub fn refresh_calls(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &SharedTokenStore {
        &self.inner.store
    }
}

impl CoordinatorInner {
    fn stored_refresh_token(&self) -> Option<String> {
        self.store
            .get()
            .filter(|pair| pair.has_refresh_token())
            .map(|pair| pair.refresh_token)
    }

    async fn run_refresh(&self, refresh_token: String, epoch: u64) {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Refreshing access token");

        let backend = Arc::clone(&self.backend);
        let fetched = tokio::spawn(async move {
            let response = backend.refresh(&refresh_token).await?;
            response.into_pair(Utc::now(), Some(&refresh_token))
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Refresh call aborted");
            Err(AuthError::RefreshFailed(format!("refresh call aborted: {}", e)))
        });

        // Settle under the state lock so a concurrent sign-out is either fully
        // before or fully after the store write.
        let (outcome, waiters) = {
            let mut state = self.state.lock();
            let outcome = if self.epoch.load(Ordering::SeqCst) != epoch {
                tracing::info!("Session signed out during refresh, discarding result");
                Err(AuthError::Unauthenticated)
            } else {
                match fetched.and_then(|pair| self.store_pair(pair)) {
                    Ok(access_token) => {
                        tracing::info!("Access token refreshed");
                        let _ = self.events.send(AuthEvent::Refreshed);
                        Ok(access_token)
                    }
                    Err(e) => {
                        let err = match e {
                            AuthError::RefreshFailed(_) => e,
                            other => AuthError::RefreshFailed(other.to_string()),
                        };
                        self.end_session(&err);
                        Err(err)
                    }
                }
            };
            let waiters = match std::mem::take(&mut *state) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            };
            (outcome, waiters)
        };

        for waiter in waiters {
            // A waiter that went away no longer cares.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn store_pair(&self, pair: TokenPair) -> Result<String> {
        let access_token = pair.access_token.clone();
        self.store.set(pair)?;
        Ok(access_token)
    }

    /// Drop every credential and ask for a fresh login.
    ///
    /// Only the call that actually drops a stored pair broadcasts
    /// `LoginRequired`; later failures against an empty store stay quiet.
    fn end_session(&self, err: &AuthError) {
        let had_session = self.store.get().is_some();
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear token store");
        }
        if !had_session {
            tracing::debug!(error = %err, "No session to end");
            return;
        }
        tracing::warn!(error = %err, "Session ended, login required");
        let _ = self.events.send(AuthEvent::LoginRequired {
            reason: err.to_string(),
        });
    }
}
