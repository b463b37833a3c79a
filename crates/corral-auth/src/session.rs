//! Session façade: login redirect, callback exchange, refresh, logout and
//! authentication status.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use url::Url;

use crate::backend::{SharedAuthBackend, with_query};
use crate::claims::Claims;
use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::events::AuthEvent;
use crate::store::{IntendedRoute, SharedTokenStore};
use crate::token::TokenPair;

/// Path the authorization server redirects back to.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Scope requested on every login.
pub const SCOPE: &str = "openid profile email";

/// Route used after login when none was stashed.
pub const DEFAULT_ROUTE: &str = "/";

/// The routing layer: sends the user agent somewhere else.
pub trait Navigator: Send + Sync + std::fmt::Debug {
    fn navigate(&self, url: &str);
}

/// Shared navigator handle.
pub type SharedNavigator = Arc<dyn Navigator>;

/// Navigator that only logs the destination.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, url: &str) {
        tracing::info!(%url, "Navigate");
    }
}

/// High-level session operations for the UI.
#[derive(Debug)]
pub struct Session {
    backend: SharedAuthBackend,
    store: SharedTokenStore,
    coordinator: RefreshCoordinator,
    navigator: SharedNavigator,
    origin: String,
    intended_route: IntendedRoute,
}

impl Session {
    /// Create a session for an application served from `origin`.
    pub fn new(
        backend: SharedAuthBackend,
        coordinator: RefreshCoordinator,
        navigator: SharedNavigator,
        origin: &Url,
    ) -> Self {
        Self {
            backend,
            store: coordinator.store().clone(),
            coordinator,
            navigator,
            origin: origin.origin().ascii_serialization(),
            intended_route: IntendedRoute::new(),
        }
    }

    /// The application origin, e.g. `https://console.example.com`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Callback URI registered with the authorization server.
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.origin, CALLBACK_PATH)
    }

    /// Build the authorization-code login URL from the live backend config.
    pub async fn build_authorization_url(&self) -> Result<String> {
        let config = self.backend.auth_config().await?;
        let (endpoint, client_id) = config.authorization()?;
        let redirect_uri = self.redirect_uri();

        Ok(with_query(
            endpoint,
            &[
                ("client_id", client_id),
                ("redirect_uri", &redirect_uri),
                ("response_type", "code"),
                ("scope", SCOPE),
            ],
        ))
    }

    /// Navigate to the login page, remembering where to return afterwards.
    pub async fn redirect_to_login(&self, intended_route: Option<&str>) -> Result<()> {
        if let Some(route) = intended_route {
            self.intended_route.stash(route);
        }

        let url = self.build_authorization_url().await?;
        tracing::info!("Redirecting to login");
        self.navigator.navigate(&url);
        Ok(())
    }

    /// Trade an authorization code for tokens and store them.
    ///
    /// Codes are single-use, so a failed exchange is not retried.
    pub async fn exchange_code_for_tokens(&self, code: &str) -> Result<TokenPair> {
        let response = self
            .backend
            .exchange_code(code, &self.redirect_uri())
            .await?;
        let pair = response.into_pair(Utc::now(), None)?;
        self.store.set(pair.clone())?;
        tracing::info!("Signed in");
        Ok(pair)
    }

    /// Complete the login callback: exchange the code, then consume the
    /// stashed route. Returns where the user should land.
    pub async fn handle_callback(&self, code: &str) -> Result<String> {
        self.exchange_code_for_tokens(code).await?;
        Ok(self
            .intended_route
            .take()
            .unwrap_or_else(|| DEFAULT_ROUTE.to_string()))
    }

    /// Fetch the signed-in user's claims.
    pub async fn fetch_user_info(&self) -> Result<Claims> {
        let access_token = self
            .store
            .get()
            .map(|pair| pair.access_token)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Unauthenticated)?;
        self.backend.user_info(&access_token).await
    }

    /// Explicitly refresh the access token.
    pub async fn refresh(&self) -> Result<String> {
        self.coordinator.refresh_or_wait().await
    }

    /// True if a token is stored and has not expired. Never refreshes.
    pub fn is_authenticated(&self) -> bool {
        self.store
            .get()
            .is_some_and(|pair| !pair.access_token.is_empty() && !pair.is_expired())
    }

    /// Snapshot of the stored pair.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.store.get()
    }

    /// Sign out.
    ///
    /// Credentials are cleared before anything else, and a refresh still in
    /// flight is discarded rather than signing the user back in. The user is
    /// sent to the provider's logout page when the backend advertises one,
    /// and to the application root otherwise, including when the config
    /// fetch fails.
    pub async fn logout(&self) -> Result<()> {
        self.intended_route.clear();
        let cleared = self.coordinator.sign_out();

        let provider_logout = match self.backend.auth_config().await {
            Ok(config) => config.logout_url(&self.origin),
            Err(e) => {
                tracing::warn!(error = %e, "Auth config unavailable, logging out locally");
                None
            }
        };
        let target = provider_logout.unwrap_or_else(|| format!("{}{}", self.origin, DEFAULT_ROUTE));

        tracing::info!("Signed out");
        self.navigator.navigate(&target);
        cleared
    }

    /// Redirect to login whenever the coordinator gives up on the session.
    pub fn watch_login_required(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut events = self.coordinator.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::LoginRequired { reason }) => {
                        tracing::debug!(%reason, "Login required");
                        if let Err(e) = session.redirect_to_login(None).await {
                            tracing::warn!(error = %e, "Failed to redirect to login");
                        }
                    }
                    Ok(AuthEvent::Refreshed) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Session event watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
