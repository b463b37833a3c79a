//! The control plane's auth endpoints.
//!
//! [`AuthBackend`] is the seam the session core talks through; the HTTP
//! implementation speaks the JSON contract below.
//!
//! | Endpoint | Method | Request body | Response body |
//! |---|---|---|---|
//! | auth configuration | GET | | `{auth_url, client_id, logout_url}` |
//! | token exchange | POST | `{code, redirect_uri}` | token pair |
//! | refresh | POST | `{refresh_token}` | token pair |
//! | userinfo | GET (bearer) | | claims |

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::claims::Claims;
use crate::error::{AuthError, Result};
use crate::token::TokenResponse;

/// Authorization server configuration, fetched fresh for every login/logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, rename = "auth_url")]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, rename = "logout_url")]
    pub logout_endpoint: Option<String>,
}

impl AuthConfig {
    /// Authorization endpoint and client id, both required to be non-empty.
    pub fn authorization(&self) -> Result<(&str, &str)> {
        let endpoint = non_empty(self.authorization_endpoint.as_deref()).ok_or_else(|| {
            AuthError::InvalidAuthConfig("authorization endpoint is missing".to_string())
        })?;
        let client_id = non_empty(self.client_id.as_deref())
            .ok_or_else(|| AuthError::InvalidAuthConfig("client id is missing".to_string()))?;
        Ok((endpoint, client_id))
    }

    /// Provider logout URL that sends the browser back to `post_logout_redirect`.
    ///
    /// `None` when the backend advertises no logout endpoint.
    pub fn logout_url(&self, post_logout_redirect: &str) -> Option<String> {
        let endpoint = non_empty(self.logout_endpoint.as_deref())?;
        let mut params = Vec::with_capacity(2);
        if let Some(client_id) = non_empty(self.client_id.as_deref()) {
            params.push(("client_id", client_id));
        }
        params.push(("post_logout_redirect_uri", post_logout_redirect));
        Some(with_query(endpoint, &params))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Append percent-encoded query parameters to `base`, keeping any existing query.
pub(crate) fn with_query(base: &str, params: &[(&str, &str)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, query)
}

// ============================================================================
// Endpoint paths
// ============================================================================

/// Paths of the auth endpoints, relative to the control plane base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEndpoints {
    pub config: String,
    pub token: String,
    pub refresh: String,
    pub userinfo: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            config: "api/auth/config".to_string(),
            token: "api/auth/token".to_string(),
            refresh: "api/auth/refresh".to_string(),
            userinfo: "api/auth/userinfo".to_string(),
        }
    }
}

impl AuthEndpoints {
    /// Resolve every path against `base_url`.
    pub fn resolve(&self, base_url: &Url) -> Result<EndpointUrls> {
        let join = |path: &str| base_url.join(path.trim_start_matches('/'));
        Ok(EndpointUrls {
            config: join(&self.config)?,
            token: join(&self.token)?,
            refresh: join(&self.refresh)?,
            userinfo: join(&self.userinfo)?,
        })
    }
}

/// Absolute auth endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrls {
    pub config: Url,
    pub token: Url,
    pub refresh: Url,
    pub userinfo: Url,
}

impl EndpointUrls {
    /// True for the token exchange and refresh endpoints, which must never be
    /// sent with an attached bearer token or replayed after a 401.
    pub fn is_token_endpoint(&self, url: &Url) -> bool {
        same_endpoint(url, &self.token) || same_endpoint(url, &self.refresh)
    }
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

// ============================================================================
// AuthBackend Trait
// ============================================================================

/// The backend calls the session core depends on.
#[async_trait]
pub trait AuthBackend: Send + Sync + std::fmt::Debug {
    /// Fetch the authorization server configuration.
    async fn auth_config(&self) -> Result<AuthConfig>;

    /// Trade a single-use authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse>;

    /// Trade a refresh token for a new token pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;

    /// Fetch the signed-in user's claims.
    async fn user_info(&self, access_token: &str) -> Result<Claims>;
}

/// Shared backend handle.
pub type SharedAuthBackend = Arc<dyn AuthBackend>;

// ============================================================================
// HttpAuthBackend
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    refresh_token: &'a str,
}

/// JSON-over-HTTP implementation of [`AuthBackend`].
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    http: reqwest::Client,
    urls: EndpointUrls,
}

impl HttpAuthBackend {
    pub fn new(http: reqwest::Client, urls: EndpointUrls) -> Self {
        Self { http, urls }
    }

    /// Build against a base URL with the default endpoint paths.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base = crate::client::normalize_base_url(base_url)?;
        let urls = AuthEndpoints::default().resolve(&base)?;
        Ok(Self::new(reqwest::Client::new(), urls))
    }

    pub fn urls(&self) -> &EndpointUrls {
        &self.urls
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::Serialization(format!("Failed to parse {}: {}", what, e)))
            .inspect_err(|e| tracing::debug!(%status, error = %e, "Undecodable auth response"))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn auth_config(&self) -> Result<AuthConfig> {
        let response = self.http.get(self.urls.config.clone()).send().await?;
        Self::read_json(response, "auth config").await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.urls.token.clone())
            .json(&TokenExchangeRequest { code, redirect_uri })
            .send()
            .await?;
        Self::read_json(response, "token exchange response").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.urls.refresh.clone())
            .json(&TokenRefreshRequest { refresh_token })
            .send()
            .await?;
        Self::read_json(response, "refresh response").await
    }

    async fn user_info(&self, access_token: &str) -> Result<Claims> {
        let response = self
            .http
            .get(self.urls.userinfo.clone())
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await?;
        Self::read_json(response, "userinfo").await
    }
}

/// Error body some backends send alongside a failure status.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error_description", alias = "error")]
    message: String,
}

/// Turn a failed response into [`AuthError::Api`], keeping the server's message.
pub(crate) async fn error_from_response(response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => err.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => format!("HTTP {}", status),
    };

    AuthError::Api { status, message }
}
