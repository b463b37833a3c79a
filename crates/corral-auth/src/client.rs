//! Client assembly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use crate::backend::{AuthEndpoints, HttpAuthBackend, SharedAuthBackend};
use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::pipeline::RequestPipeline;
use crate::session::{LogNavigator, Session, SharedNavigator};
use crate::store::{MemoryTokenStore, SharedTokenStore};

/// Default timeout for requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse a base URL and make sure its path ends in `/` so joins stay under it.
pub(crate) fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

/// Authenticated control-plane client.
///
/// Owns one token store, one refresh coordinator, the request pipeline and
/// the session façade, all sharing the same state.
///
/// # Example
///
/// ```no_run
/// use corral_auth::CorralClient;
///
/// # async fn example() -> corral_auth::Result<()> {
/// let client = CorralClient::builder()
///     .base_url("https://corral.example.com")
///     .build()?;
///
/// let clusters: serde_json::Value = client.pipeline().get_json("api/clusters").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CorralClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    store: SharedTokenStore,
    coordinator: RefreshCoordinator,
    pipeline: RequestPipeline,
    session: Arc<Session>,
}

impl CorralClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.inner.pipeline
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn store(&self) -> &SharedTokenStore {
        &self.inner.store
    }

    pub fn base_url(&self) -> &Url {
        self.inner.pipeline.base_url()
    }
}

/// Builder for creating a [`CorralClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<String>,
    origin: Option<String>,
    endpoints: AuthEndpoints,
    timeout: Duration,
    user_agent: Option<String>,
    store: Option<SharedTokenStore>,
    navigator: Option<SharedNavigator>,
    backend: Option<SharedAuthBackend>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            origin: None,
            endpoints: AuthEndpoints::default(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
            store: None,
            navigator: None,
            backend: None,
        }
    }

    /// Set the control-plane base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the application origin used for callback and logout redirects.
    /// Defaults to the origin of the base URL.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Override the auth endpoint paths.
    pub fn endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Use a specific token store. Defaults to an in-memory store.
    pub fn store(mut self, store: SharedTokenStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: SharedNavigator) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Replace the HTTP auth backend.
    pub fn backend(mut self, backend: SharedAuthBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CorralClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| AuthError::InvalidUrl("base_url is required".to_string()))?;
        let base_url = normalize_base_url(&base_url)?;
        let origin = match &self.origin {
            Some(origin) => Url::parse(origin)?,
            None => base_url.clone(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("corral-auth/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(self.timeout)
            .build()?;

        let urls = self.endpoints.resolve(&base_url)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(HttpAuthBackend::new(http.clone(), urls.clone())));
        let navigator = self.navigator.unwrap_or_else(|| Arc::new(LogNavigator));

        let coordinator = RefreshCoordinator::new(store.clone(), backend.clone());
        let pipeline = RequestPipeline::new(
            http,
            base_url,
            self.timeout,
            urls,
            coordinator.clone(),
        );
        let session = Arc::new(Session::new(
            backend,
            coordinator.clone(),
            navigator,
            &origin,
        ));

        Ok(CorralClient {
            inner: Arc::new(ClientInner {
                store,
                coordinator,
                pipeline,
                session,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
