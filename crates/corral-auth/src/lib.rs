//! Client-side session core for the Corral control plane.
//!
//! This crate keeps a user signed in against an OAuth2/OIDC
//! authorization-code deployment:
//!
//! - **Session**: login redirect, callback code exchange, user info, logout
//! - **Pipeline**: attaches the bearer token to every request and replays a
//!   request once after a 401
//! - **Coordinator**: collapses concurrent refreshes into a single call and
//!   fans the outcome out to every waiter in order
//! - **Stores**: in-memory and file-backed token storage
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use corral_auth::{CorralClient, FileTokenStore, Result};
//!
//! # async fn example() -> Result<()> {
//! let store = Arc::new(FileTokenStore::new(std::path::Path::new("/tmp/corral")));
//! let client = CorralClient::builder()
//!     .base_url("https://corral.example.com")
//!     .store(store)
//!     .build()?;
//!
//! // Kick off login; the navigator receives the authorization URL.
//! client.session().redirect_to_login(Some("/clusters")).await?;
//!
//! // Later, with the code from the callback:
//! let landing = client.session().handle_callback("abc123").await?;
//! println!("Signed in, continue at {}", landing);
//!
//! // Any request now carries the bearer token and survives expiry.
//! let me: serde_json::Value = client.pipeline().get_json("api/auth/userinfo").await?;
//! println!("{}", me);
//! # Ok(())
//! # }
//! ```

mod backend;
mod claims;
mod client;
mod coordinator;
mod error;
mod events;
mod pipeline;
mod session;
mod store;
mod token;

#[cfg(test)]
mod test_support;

pub use backend::{
    AuthBackend, AuthConfig, AuthEndpoints, EndpointUrls, HttpAuthBackend, SharedAuthBackend,
};
pub use claims::{Claims, has_role};
pub use client::{ClientBuilder, CorralClient, DEFAULT_TIMEOUT};
pub use coordinator::RefreshCoordinator;
pub use error::{AuthError, Result};
pub use events::AuthEvent;
pub use pipeline::RequestPipeline;
pub use session::{
    CALLBACK_PATH, DEFAULT_ROUTE, LogNavigator, Navigator, SCOPE, Session, SharedNavigator,
};
pub use store::{
    FileTokenStore, IntendedRoute, MemoryTokenStore, SharedTokenStore, TOKEN_FILE, TokenStore,
};
pub use token::{TokenPair, TokenResponse, jwt_expiry};
