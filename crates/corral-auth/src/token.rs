//! Access/refresh token pairs and decoding of backend token responses.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// An issued access/refresh token pair.
///
/// Pairs are never mutated after issue; a refresh produces a new pair that
/// replaces the old one in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// True once `now` has reached the expiry instant. No grace period.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check expiry against the current wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiry, zero if already expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Human-readable remaining lifetime for status output.
    pub fn expires_in_display(&self, now: DateTime<Utc>) -> String {
        if self.is_expired_at(now) {
            "expired".to_string()
        } else {
            let secs = self.expires_in(now).num_seconds();
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}

/// Expiry as sent by the backend: unix seconds or an RFC 3339 timestamp.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireExpiry {
    Unix(i64),
    Timestamp(DateTime<Utc>),
}

/// Token body returned by the exchange and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<WireExpiry>,
}

impl TokenResponse {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in: Some(expires_in),
            expires_at: None,
        }
    }

    /// Convert into a [`TokenPair`].
    ///
    /// Expiry comes from `expires_at`, then `expires_in`, then the JWT `exp`
    /// claim of the access token. A missing or empty refresh token falls back
    /// to `previous_refresh` when the backend does not rotate it.
    pub fn into_pair(self, now: DateTime<Utc>, previous_refresh: Option<&str>) -> Result<TokenPair> {
        if self.access_token.is_empty() {
            return Err(AuthError::Serialization(
                "token response has an empty access_token".to_string(),
            ));
        }

        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(WireExpiry::Timestamp(at)), _) => at,
            (Some(WireExpiry::Unix(secs)), _) => DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| out_of_range("expires_at", secs))?,
            (None, Some(secs)) => Duration::try_seconds(secs)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| out_of_range("expires_in", secs))?,
            (None, None) => jwt_expiry(&self.access_token).ok_or_else(|| {
                AuthError::Serialization("token response carries no usable expiry".to_string())
            })?,
        };

        let refresh_token = match self.refresh_token {
            Some(token) if !token.is_empty() => token,
            _ => previous_refresh.unwrap_or_default().to_string(),
        };

        Ok(TokenPair {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        })
    }
}

fn out_of_range(field: &str, value: i64) -> AuthError {
    AuthError::Serialization(format!("token response {} is out of range: {}", field, value))
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: i64,
}

/// Read the `exp` claim from a JWT payload without verifying it.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpClaim = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claim.exp, 0)
}
