//! Outbound request decoration
//!
//! `AuthDecorator` is what `OAuthClient::apply_auth` hands out: a cheap,
//! cloneable per-caller handle whose `apply` sets `Authorization: Bearer ..`
//! on requests bound for the protected API host and leaves every other
//! request untouched. `AuthorizedTransport` is the `Do(request) -> response`
//! issuer built on top of it.

use std::sync::Arc;

use mangadex_auth::{Error, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use crate::client::OAuthClient;

/// Anything with a target host and mutable headers.
pub trait AuthTarget {
    fn host(&self) -> Option<&str>;
    fn headers_mut(&mut self) -> &mut HeaderMap;
}

impl AuthTarget for reqwest::Request {
    fn host(&self) -> Option<&str> {
        self.url().host_str()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        reqwest::Request::headers_mut(self)
    }
}

/// `host` is `api_host` itself or one of its subdomains.
pub fn host_matches(host: &str, api_host: &str) -> bool {
    let host = host.trim_end_matches('.');
    if host.eq_ignore_ascii_case(api_host) {
        return true;
    }
    let Some(split) = host.len().checked_sub(api_host.len()) else {
        return false;
    };
    match (host.get(..split), host.get(split..)) {
        (Some(prefix), Some(suffix)) => {
            prefix.len() > 1 && prefix.ends_with('.') && suffix.eq_ignore_ascii_case(api_host)
        }
        _ => false,
    }
}

#[derive(Clone)]
pub struct AuthDecorator {
    client: Arc<OAuthClient>,
    caller_key: String,
}

impl AuthDecorator {
    pub fn new(client: Arc<OAuthClient>, caller_key: impl Into<String>) -> Self {
        Self {
            client,
            caller_key: caller_key.into(),
        }
    }

    pub fn caller_key(&self) -> &str {
        &self.caller_key
    }

    /// Authenticate `target` if it is bound for the protected API host.
    ///
    /// Loads the caller's pair, refreshing it inline when it is inside the
    /// refresh window, and replaces any existing `Authorization` header.
    /// Requests for other hosts are a no-op even when no store is configured.
    pub async fn apply<T: AuthTarget + ?Sized>(&self, target: &mut T) -> Result<()> {
        let protected = target
            .host()
            .is_some_and(|host| host_matches(host, self.client.api_host()));
        if !protected {
            return Ok(());
        }

        let token = self.client.access_token(&self.caller_key).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            Error::InvalidArgument(format!("access token is not a valid header value: {e}"))
        })?;
        value.set_sensitive(true);
        target.headers_mut().insert(AUTHORIZATION, value);

        debug!(caller_key = %self.caller_key, "request decorated");
        Ok(())
    }
}

impl std::fmt::Debug for AuthDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthDecorator")
            .field("caller_key", &self.caller_key)
            .field("api_host", &self.client.api_host())
            .finish()
    }
}

/// HTTP client that decorates every request before sending it.
#[derive(Debug, Clone)]
pub struct AuthorizedTransport {
    http: reqwest::Client,
    decorator: AuthDecorator,
}

impl AuthorizedTransport {
    pub fn new(http: reqwest::Client, decorator: AuthDecorator) -> Self {
        Self { http, decorator }
    }

    /// Decorate and send. A decoration failure aborts the send.
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        self.decorator.apply(&mut request).await?;
        self.http
            .execute(request)
            .await
            .map_err(|e| Error::Transport(format!("sending request: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap as AxumHeaderMap;
    use chrono::{DateTime, Utc};
    use mangadex_auth::{
        Clock, ManualClock, MemoryTokenStore, OAuthCredentials, OAuthTokens, StoreFuture,
        StoredEntry, TokenStore,
    };
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    /// Mock token endpoint recording every form it receives.
    async fn start_token_server() -> (String, Arc<StdMutex<Vec<HashMap<String, String>>>>) {
        let forms = Arc::new(StdMutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let captured = forms.clone();
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/token",
                axum::routing::post(
                    move |axum::Form(form): axum::Form<HashMap<String, String>>| {
                        let captured = captured.clone();
                        async move {
                            captured.lock().unwrap().push(form);
                            axum::Json(serde_json::json!({
                                "access_token": "at_new",
                                "refresh_token": "rt_new",
                                "expires_in": 900
                            }))
                        }
                    },
                ),
            );
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/token"), forms)
    }

    /// Mock API echoing back the Authorization header it saw.
    async fn start_api_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/manga",
                axum::routing::get(|headers: AxumHeaderMap| async move {
                    headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string()
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/manga")
    }

    /// Store that never expires anything on its own, so a pair can sit past
    /// its `expires_at`.
    #[derive(Default)]
    struct StaleStore {
        entries: StdMutex<HashMap<String, StoredEntry>>,
    }

    impl TokenStore for StaleStore {
        fn load<'a>(&'a self, caller_key: &'a str) -> StoreFuture<'a, StoredEntry> {
            Box::pin(async move {
                self.entries
                    .lock()
                    .unwrap()
                    .get(caller_key)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(caller_key.to_string()))
            })
        }

        fn save<'a>(
            &'a self,
            caller_key: &'a str,
            tokens: OAuthTokens,
            credentials: Option<OAuthCredentials>,
            expires_at: DateTime<Utc>,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                let mut entries = self.entries.lock().unwrap();
                let credentials = credentials.filter(|c| !c.is_empty()).or_else(|| {
                    entries
                        .get(caller_key)
                        .and_then(|existing| existing.credentials.clone())
                });
                entries.insert(
                    caller_key.to_string(),
                    StoredEntry {
                        tokens,
                        credentials,
                        expires_at,
                    },
                );
                Ok(())
            })
        }
    }

    fn defaults() -> OAuthCredentials {
        OAuthCredentials::new("default", "default-client", "default-secret")
    }

    fn get(url: &str) -> reqwest::Request {
        reqwest::Client::new().get(url).build().unwrap()
    }

    #[test]
    fn host_matching_is_exact_or_subdomain() {
        assert!(host_matches("api.mangadex.org", "api.mangadex.org"));
        assert!(host_matches("API.MangaDex.org", "api.mangadex.org"));
        assert!(host_matches("api.mangadex.org.", "api.mangadex.org"));
        assert!(host_matches("eu.api.mangadex.org", "api.mangadex.org"));
        assert!(!host_matches("uploads.mangadex.org", "api.mangadex.org"));
        assert!(!host_matches("evilapi.mangadex.org", "api.mangadex.org"));
        assert!(!host_matches("api.mangadex.org.evil.com", "api.mangadex.org"));
        assert!(!host_matches("mangadex.org", "api.mangadex.org"));
    }

    #[tokio::test]
    async fn unrelated_host_is_untouched_without_store() {
        let client = Arc::new(OAuthClient::builder(defaults()).build());
        let decorator = client.apply_auth("u1");

        let mut request = get("https://example.com/path");
        request
            .headers_mut()
            .insert("x-custom", HeaderValue::from_static("keep"));
        let before = request.headers().clone();

        decorator.apply(&mut request).await.unwrap();
        assert_eq!(request.headers(), &before);
    }

    #[tokio::test]
    async fn protected_host_without_store_is_not_found() {
        let client = Arc::new(OAuthClient::builder(defaults()).build());
        let mut request = get("https://api.mangadex.org/manga");

        let err = client.apply_auth("u1").apply(&mut request).await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn live_pair_sets_bearer_and_replaces_existing() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryTokenStore::with_clock(clock.clone()));
        store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 60),
                None,
                clock.now() + chrono::Duration::seconds(300),
            )
            .await
            .unwrap();
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store)
                .clock(clock)
                .build(),
        );

        let mut request = get("https://api.mangadex.org/manga");
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        client.apply_auth("u1").apply(&mut request).await.unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer a1");
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test]
    async fn missing_entry_propagates_not_found() {
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(Arc::new(MemoryTokenStore::new()))
                .build(),
        );
        let mut request = get("https://api.mangadex.org/manga");
        let err = client.apply_auth("u1").apply(&mut request).await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn past_expiry_refreshes_and_uses_new_token() {
        let (url, forms) = start_token_server().await;
        let store = Arc::new(StaleStore::default());
        store
            .save(
                "u1",
                OAuthTokens::new("a_old", "r_old", 0),
                Some(OAuthCredentials::new("u1", "c", "s")),
                Utc::now() - chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store.clone())
                .token_endpoint(url)
                .build(),
        );

        let mut request = get("https://api.mangadex.org/manga");
        client.apply_auth("u1").apply(&mut request).await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer at_new");

        let form = forms.lock().unwrap()[0].clone();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "r_old");
        assert_eq!(form["client_id"], "c");

        let entry = store.load("u1").await.unwrap();
        assert_eq!(entry.tokens.access_token, "at_new");
        assert_eq!(entry.tokens.refresh_token, "rt_new");
        assert!(entry.expires_at > Utc::now());
        assert_eq!(entry.credentials.unwrap().client_secret, "s");
    }

    #[tokio::test]
    async fn entry_at_expiry_instant_refreshes() {
        let (url, _) = start_token_server().await;
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryTokenStore::with_clock(clock.clone()));
        let expires_at = clock.now() + chrono::Duration::seconds(30);
        store
            .save("u1", OAuthTokens::new("a_old", "r_old", 60), None, expires_at)
            .await
            .unwrap();
        clock.set(expires_at);

        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store.clone())
                .token_endpoint(url)
                .clock(clock.clone())
                .build(),
        );

        let mut request = get("https://api.mangadex.org/manga");
        client.apply_auth("u1").apply(&mut request).await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer at_new");

        let entry = store.load("u1").await.unwrap();
        assert_eq!(entry.tokens.access_token, "at_new");
        assert_eq!(entry.expires_at, expires_at + chrono::Duration::seconds(870));
    }

    #[tokio::test]
    async fn refresh_falls_back_to_default_credentials() {
        let (url, forms) = start_token_server().await;
        let store = Arc::new(StaleStore::default());
        store
            .save(
                "u1",
                OAuthTokens::new("a_old", "r_old", 0),
                None,
                Utc::now() - chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store)
                .token_endpoint(url)
                .build(),
        );

        let mut request = get("https://api.mangadex.org/manga");
        client.apply_auth("u1").apply(&mut request).await.unwrap();

        let form = forms.lock().unwrap()[0].clone();
        assert_eq!(form["client_id"], "default-client");
        assert_eq!(form["client_secret"], "default-secret");
    }

    #[tokio::test]
    async fn default_decorator_uses_default_caller_key() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryTokenStore::with_clock(clock.clone()));
        store
            .save(
                "service",
                OAuthTokens::new("a_service", "r", 60),
                None,
                clock.now() + chrono::Duration::seconds(300),
            )
            .await
            .unwrap();
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store)
                .clock(clock)
                .default_caller_key("service")
                .build(),
        );

        let decorator = client.apply_default_auth();
        assert_eq!(decorator.caller_key(), "service");
        let mut request = get("https://api.mangadex.org/manga");
        decorator.apply(&mut request).await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer a_service");
    }

    #[tokio::test]
    async fn transport_sends_decorated_request() {
        let api = start_api_server().await;
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryTokenStore::with_clock(clock.clone()));
        store
            .save(
                "u1",
                OAuthTokens::new("a1", "r1", 60),
                None,
                clock.now() + chrono::Duration::seconds(300),
            )
            .await
            .unwrap();
        // The mock API listens on 127.0.0.1, so protect that host
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(store)
                .clock(clock)
                .api_host("127.0.0.1")
                .build(),
        );

        let http = reqwest::Client::new();
        let transport = AuthorizedTransport::new(http.clone(), client.apply_auth("u1"));
        let response = transport
            .execute(http.get(&api).build().unwrap())
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "Bearer a1");
    }

    #[tokio::test]
    async fn transport_aborts_when_decoration_fails() {
        let api = start_api_server().await;
        let client = Arc::new(
            OAuthClient::builder(defaults())
                .store(Arc::new(MemoryTokenStore::new()))
                .api_host("127.0.0.1")
                .build(),
        );

        let http = reqwest::Client::new();
        let transport = AuthorizedTransport::new(http.clone(), client.apply_auth("nobody"));
        let err = transport
            .execute(http.get(&api).build().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }
}
