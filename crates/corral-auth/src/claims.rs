//! Identity claims returned by the userinfo endpoint.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Decoded identity of the signed-in user. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "name")]
    pub display_name: Option<String>,
    #[serde(default, rename = "preferred_username")]
    pub username: Option<String>,
    /// `None` when the backend sent no roles collection at all.
    #[serde(default)]
    pub roles: Option<BTreeSet<String>>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.as_ref().is_some_and(|roles| roles.contains(role))
    }

    /// Best label for the user: name, then username, then email, then subject.
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(&self.subject)
    }
}

/// Role check for UI authorization. False when no claims are loaded.
pub fn has_role(claims: Option<&Claims>, role: &str) -> bool {
    claims.is_some_and(|claims| claims.has_role(role))
}
