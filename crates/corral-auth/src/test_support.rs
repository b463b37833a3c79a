//! Scripted collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::backend::{AuthBackend, AuthConfig};
use crate::claims::Claims;
use crate::error::Result;
use crate::session::Navigator;
use crate::token::{TokenPair, TokenResponse};

/// A pair expiring `secs` from now (negative for already expired).
pub(crate) fn pair(access: &str, refresh: &str, secs: i64) -> TokenPair {
    TokenPair::new(access, refresh, Utc::now() + Duration::seconds(secs))
}

pub(crate) fn valid_config() -> AuthConfig {
    AuthConfig {
        authorization_endpoint: Some("https://idp.example.com/authorize".into()),
        client_id: Some("corral-ui".into()),
        logout_endpoint: Some("https://idp.example.com/logout".into()),
    }
}

/// Backend with canned responses. Refresh calls can be held until released.
#[derive(Debug)]
pub(crate) struct ScriptedBackend {
    config: Mutex<Result<AuthConfig>>,
    exchange: Mutex<Result<TokenResponse>>,
    refresh: Mutex<Result<TokenResponse>>,
    user_info: Mutex<Result<Claims>>,
    gate: Semaphore,
    refresh_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    exchanges_seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self {
            config: Mutex::new(Ok(valid_config())),
            exchange: Mutex::new(Ok(TokenResponse::new("A1", Some("R1".into()), 3600))),
            refresh: Mutex::new(Ok(TokenResponse::new("A2", Some("R2".into()), 3600))),
            user_info: Mutex::new(Ok(Claims {
                subject: "u1".into(),
                email: Some("ops@example.com".into()),
                display_name: None,
                username: Some("ops".into()),
                roles: Some(["admin".to_string()].into()),
            })),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            refresh_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            exchanges_seen: Mutex::new(Vec::new()),
        }
    }

    /// Hold refresh calls until [`ScriptedBackend::release`].
    pub(crate) fn gated(self) -> Self {
        Self {
            gate: Semaphore::new(0),
            ..self
        }
    }

    pub(crate) fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub(crate) fn with_refresh(self, result: Result<TokenResponse>) -> Self {
        self.set_refresh(result);
        self
    }

    pub(crate) fn with_config(self, result: Result<AuthConfig>) -> Self {
        *self.config.lock() = result;
        self
    }

    pub(crate) fn with_exchange(self, result: Result<TokenResponse>) -> Self {
        *self.exchange.lock() = result;
        self
    }

    pub(crate) fn set_refresh(&self, result: Result<TokenResponse>) {
        *self.refresh.lock() = result;
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }

    pub(crate) fn exchanges_seen(&self) -> Vec<(String, String)> {
        self.exchanges_seen.lock().clone()
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn auth_config(&self) -> Result<AuthConfig> {
        self.config.lock().clone()
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.exchanges_seen
            .lock()
            .push((code.to_string(), redirect_uri.to_string()));
        self.exchange.lock().clone()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());
        let _permit = self.gate.acquire().await;
        self.refresh.lock().clone()
    }

    async fn user_info(&self, _access_token: &str) -> Result<Claims> {
        self.user_info.lock().clone()
    }
}

/// Navigator that records every URL it is sent to.
#[derive(Debug, Default)]
pub(crate) struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub(crate) fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }

    pub(crate) fn last(&self) -> Option<String> {
        self.visits.lock().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) {
        self.visits.lock().push(url.to_string());
    }
}
