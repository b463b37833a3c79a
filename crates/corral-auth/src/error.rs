//! Error types for the session core.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while authenticating or dispatching requests.
///
/// Payloads are plain strings so a single refresh outcome can be cloned to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The backend's authorization configuration lacks an endpoint or client id.
    #[error("Invalid auth config: {0}")]
    InvalidAuthConfig(String),

    /// A refresh was requested but no refresh token is stored.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The backend rejected the refresh call.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// An operation that needs an access token ran without one.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Network/transport error.
    #[error("Network error: {0}")]
    Network(String),

    /// Backend returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Token persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Check if this error means the caller must log in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken | AuthError::RefreshFailed(_) | AuthError::Unauthenticated
        )
    }

    /// Check if this is an unauthorized response.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Api { status: 401, .. })
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, AuthError::Api { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Network(e.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        AuthError::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Serialization(e.to_string())
    }
}
