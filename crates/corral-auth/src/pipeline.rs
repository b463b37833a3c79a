//! Outbound request pipeline.
//!
//! Every application request goes through [`RequestPipeline::send`], which
//! attaches the current bearer token and, on a 401, refreshes through the
//! [`RefreshCoordinator`] and replays the request exactly once.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use url::Url;

use crate::backend::{EndpointUrls, error_from_response};
use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::store::SharedTokenStore;

/// Bearer-attaching, refresh-on-401 request pipeline.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    endpoints: EndpointUrls,
    store: SharedTokenStore,
    coordinator: RefreshCoordinator,
}

impl RequestPipeline {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        timeout: Duration,
        endpoints: EndpointUrls,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            base_url,
            timeout,
            endpoints,
            store: coordinator.store().clone(),
            coordinator,
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Start building a request against an API path.
    pub fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        Ok(self
            .http
            .request(method, self.url(path)?)
            .timeout(self.timeout))
    }

    /// Dispatch a request.
    ///
    /// Responses other than 401 pass through untouched, whatever their
    /// status. A 401 from the token exchange or refresh endpoints, or from a
    /// request that was already replayed once, is returned as
    /// [`AuthError::Api`].
    pub async fn send(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        if self.endpoints.is_token_endpoint(request.url()) {
            request.headers_mut().remove(AUTHORIZATION);
            let response = self.http.execute(request).await?;
            return terminal(response).await;
        }

        let sent_token = self.access_token_for_dispatch().await?;
        if let Some(token) = &sent_token {
            attach_bearer(&mut request, token)?;
        }

        let replay = request.try_clone();
        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            tracing::debug!("401 on a streaming request, cannot replay");
            return terminal(response).await;
        };

        let token = self.token_after_unauthorized(sent_token.as_deref()).await?;
        attach_bearer(&mut replay, &token)?;

        tracing::debug!(url = %replay.url(), "Replaying request with refreshed token");
        let response = self.http.execute(replay).await?;
        terminal(response).await
    }

    /// GET a path and decode the JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.request(reqwest::Method::GET, path)?.build()?;
        self.handle_response(self.send(request).await?).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let request = self.request(reqwest::Method::POST, path)?.json(body).build()?;
        self.handle_response(self.send(request).await?).await
    }

    /// PUT a JSON body and decode the JSON response.
    pub async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let request = self.request(reqwest::Method::PUT, path)?.json(body).build()?;
        self.handle_response(self.send(request).await?).await
    }

    /// DELETE a path.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = self.request(reqwest::Method::DELETE, path)?.build()?;
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Current access token, refreshed first if the stored pair has expired.
    async fn access_token_for_dispatch(&self) -> Result<Option<String>> {
        match self.store.get() {
            None => Ok(None),
            Some(pair) if pair.is_expired() => {
                tracing::debug!("Stored token expired, refreshing before dispatch");
                self.coordinator.refresh_or_wait().await.map(Some)
            }
            Some(pair) => Ok(Some(pair.access_token)),
        }
    }

    /// Token to replay with after a 401.
    ///
    /// If another caller already replaced the token this request carried,
    /// reuse that one instead of starting a new refresh.
    async fn token_after_unauthorized(&self, sent: Option<&str>) -> Result<String> {
        if let Some(current) = self.store.get()
            && !current.access_token.is_empty()
            && !current.is_expired()
            && sent != Some(current.access_token.as_str())
        {
            return Ok(current.access_token);
        }
        self.coordinator.refresh_or_wait().await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

fn attach_bearer(request: &mut reqwest::Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        AuthError::Serialization("access token is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Pass a response through unless it is a 401, which ends the request.
async fn terminal(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status() == StatusCode::UNAUTHORIZED {
        Err(error_from_response(response).await)
    } else {
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::client::CorralClient;
    use crate::events::AuthEvent;
    use crate::store::{MemoryTokenStore, TokenStore};
    use crate::test_support::pair;

    use super::*;

    fn client_for(server: &MockServer, store: Arc<MemoryTokenStore>) -> CorralClient {
        CorralClient::builder()
            .base_url(server.uri())
            .store(store)
            .build()
            .unwrap()
    }

    fn refreshed_body() -> serde_json::Value {
        json!({"access_token": "A2", "refresh_token": "R2", "expires_in": 3600})
    }

    async fn mount_clusters_for(server: &MockServer, token: &str) {
        Mock::given(method("GET"))
            .and(path("/api/clusters"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .with_priority(1)
            .mount(server)
            .await;
    }

    async fn mount_unauthorized(server: &MockServer, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/api/clusters"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})),
            )
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let server = MockServer::start().await;
        mount_clusters_for(&server, "A1").await;
        mount_unauthorized(&server, 0).await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store);

        let body: serde_json::Value = client.pipeline().get_json("/api/clusters").await.unwrap();
        assert_eq!(body["items"], json!([]));
        assert_eq!(client.coordinator().refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_sends_without_token_when_signed_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
        let request = client
            .pipeline()
            .request(reqwest::Method::GET, "api/health")
            .unwrap()
            .build()
            .unwrap();
        let response = client.pipeline().send(request).await.unwrap();

        assert_eq!(response.status(), 200);
        let received = server.received_requests().await.unwrap();
        assert!(!received[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_refreshes_and_replays_once_on_401() {
        let server = MockServer::start().await;
        mount_clusters_for(&server, "A2").await;
        mount_unauthorized(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(json!({"refresh_token": "R1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());

        let body: serde_json::Value = client.pipeline().get_json("api/clusters").await.unwrap();

        assert_eq!(body["items"], json!([]));
        let stored = store.get().unwrap();
        assert_eq!(stored.access_token, "A2");
        assert_eq!(stored.refresh_token, "R2");
    }

    #[tokio::test]
    async fn test_refresh_endpoint_never_carries_bearer() {
        let server = MockServer::start().await;
        mount_unauthorized(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(1)
            .mount(&server)
            .await;
        mount_clusters_for(&server, "A2").await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store);
        let _: serde_json::Value = client.pipeline().get_json("api/clusters").await.unwrap();

        let received = server.received_requests().await.unwrap();
        let refresh = received
            .iter()
            .find(|r| r.url.path() == "/api/auth/refresh")
            .unwrap();
        assert!(!refresh.headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_second_401_is_returned_not_retried() {
        let server = MockServer::start().await;
        mount_unauthorized(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());

        let err = client
            .pipeline()
            .get_json::<serde_json::Value>("api/clusters")
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(store.get().unwrap().access_token, "A2");
    }

    #[tokio::test]
    async fn test_rejected_refresh_ends_session() {
        let server = MockServer::start().await;
        mount_unauthorized(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "refresh token revoked"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());
        let mut events = client.coordinator().subscribe();

        let err = client
            .pipeline()
            .get_json::<serde_json::Value>("api/clusters")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshFailed(_)));
        assert!(err.requires_login());
        assert!(store.get().is_none());
        assert!(matches!(
            events.try_recv(),
            Ok(AuthEvent::LoginRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_401_from_token_endpoint_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad code"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());
        let request = client
            .pipeline()
            .request(reqwest::Method::POST, "api/auth/token")
            .unwrap()
            .json(&json!({"code": "abc123"}))
            .build()
            .unwrap();

        let err = client.pipeline().send(request).await.unwrap_err();

        assert_eq!(
            err,
            AuthError::Api {
                status: 401,
                message: "bad code".into()
            }
        );
        assert_eq!(store.get().unwrap().access_token, "A1");
    }

    #[tokio::test]
    async fn test_401_on_streaming_body_is_not_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clusters/prod/manifests"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());
        let chunks: Vec<std::result::Result<&'static str, std::io::Error>> =
            vec![Ok("kind: Deployment\n"), Ok("replicas: 3\n")];
        let request = client
            .pipeline()
            .request(reqwest::Method::POST, "api/clusters/prod/manifests")
            .unwrap()
            .body(reqwest::Body::wrap_stream(futures::stream::iter(chunks)))
            .build()
            .unwrap();
        assert!(request.try_clone().is_none());

        let err = client.pipeline().send(request).await.unwrap_err();

        assert_eq!(
            err,
            AuthError::Api {
                status: 401,
                message: "token expired".into()
            }
        );
        assert_eq!(client.coordinator().refresh_calls(), 0);
        assert_eq!(store.get().unwrap().access_token, "A1");
    }

    #[tokio::test]
    async fn test_401_replays_with_token_replaced_meanwhile() {
        let server = MockServer::start().await;
        mount_clusters_for(&server, "A2").await;
        Mock::given(method("GET"))
            .and(path("/api/clusters"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"message": "token expired"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());

        let pending = {
            let pipeline = client.pipeline().clone();
            tokio::spawn(async move { pipeline.get_json::<serde_json::Value>("api/clusters").await })
        };
        // Another caller finishes a refresh while the first request is in flight.
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set(pair("A2", "R2", 3600)).unwrap();

        let body = pending.await.unwrap().unwrap();

        assert_eq!(body["items"], json!([]));
        assert_eq!(client.coordinator().refresh_calls(), 0);
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].headers["authorization"], "Bearer A2");
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clusters/prod"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/clusters/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store.clone());

        for (route, status) in [("api/clusters/prod", 403), ("api/clusters/broken", 503)] {
            let request = client
                .pipeline()
                .request(reqwest::Method::GET, route)
                .unwrap()
                .build()
                .unwrap();
            let response = client.pipeline().send(request).await.unwrap();
            assert_eq!(response.status().as_u16(), status);
        }

        let err = client
            .pipeline()
            .get_json::<serde_json::Value>("api/clusters/broken")
            .await
            .unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(client.coordinator().refresh_calls(), 0);
        assert_eq!(store.get().unwrap().access_token, "A1");
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_before_dispatch() {
        let server = MockServer::start().await;
        mount_clusters_for(&server, "A2").await;
        mount_unauthorized(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", -5)));
        let client = client_for(&server, store);

        let body: serde_json::Value = client.pipeline().get_json("api/clusters").await.unwrap();
        assert_eq!(body["items"], json!([]));
    }

    #[tokio::test]
    async fn test_401_without_any_session() {
        let server = MockServer::start().await;
        mount_unauthorized(&server, 1).await;

        let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
        let err = client
            .pipeline()
            .get_json::<serde_json::Value>("api/clusters")
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::NoRefreshToken);
    }

    #[tokio::test]
    async fn test_put_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/clusters/prod"))
            .and(header("authorization", "Bearer A1"))
            .and(body_json(json!({"replicas": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"replicas": 3})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/clusters/prod"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_pair(pair("A1", "R1", 3600)));
        let client = client_for(&server, store);

        let updated: serde_json::Value = client
            .pipeline()
            .put_json("api/clusters/prod", &json!({"replicas": 3}))
            .await
            .unwrap();
        assert_eq!(updated["replicas"], 3);
        client.pipeline().delete("api/clusters/prod").await.unwrap();
    }
}
