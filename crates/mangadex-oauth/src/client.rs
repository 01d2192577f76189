//! OAuth client: login, request-time refresh, credential resolution
//!
//! There is no background refresh task. A pair is refreshed inline by whichever
//! request first observes it inside the refresh window
//! (`now + refresh_skew >= expires_at`). The token store is the only holder of
//! token state; the client keeps none of its own between calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mangadex_auth::{
    API_HOST, Clock, DEFAULT_TIMEOUT_SECS, Error, Grant, OAuthCredentials, OAuthTokens, Result,
    StoredEntry, SystemClock, TOKEN_ENDPOINT, TokenEndpoint, TokenStore,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::decorate::AuthDecorator;
use crate::metrics;

/// How concurrent observers of an expiring pair refresh it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// Every observer refreshes on its own; last write wins.
    #[default]
    Independent,
    /// One refresh per caller key at a time within this process. Waiters
    /// re-read the store and reuse the pair the winner stored.
    SingleFlight,
}

/// What happens when the token store rejects a freshly granted pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Log at warn, count it, and report `persisted = false`.
    #[default]
    BestEffort,
    /// Fail the login or refresh with the store error.
    Strict,
}

/// Result of a successful login or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub tokens: OAuthTokens,
    pub expires_at: DateTime<Utc>,
    /// Whether the pair reached the token store.
    pub persisted: bool,
}

pub struct OAuthClient {
    default_credentials: OAuthCredentials,
    store: Option<Arc<dyn TokenStore>>,
    endpoint: TokenEndpoint,
    api_host: String,
    default_caller_key: String,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    refresh_mode: RefreshMode,
    persist_policy: PersistPolicy,
    refresh_locks: RefreshLocks,
}

impl OAuthClient {
    /// Start building a client that falls back to `default_credentials`
    /// whenever a caller has no complete client registration of its own.
    pub fn builder(default_credentials: OAuthCredentials) -> OAuthClientBuilder {
        OAuthClientBuilder::new(default_credentials)
    }

    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    pub fn default_caller_key(&self) -> &str {
        &self.default_caller_key
    }

    pub fn token_endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Password grant for `credentials.caller_key`.
    ///
    /// The pair is stored together with `credentials` so later refreshes for
    /// this caller use the same client registration.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        credentials: &OAuthCredentials,
    ) -> Result<TokenGrant> {
        if credentials.caller_key.is_empty() {
            return Err(Error::InvalidArgument(
                "login requires a non-empty caller key".into(),
            ));
        }
        let caller_key = credentials.caller_key.as_str();

        let result = self
            .endpoint
            .password_grant(username, password, credentials)
            .await;
        metrics::record_token_request(Grant::Password, metrics::outcome_label(&result));
        let tokens = result?;
        info!(caller_key, "login succeeded");

        self.persist(Grant::Password, caller_key, tokens, Some(credentials.clone()))
            .await
    }

    /// Refresh-token grant, stored under `caller_key`.
    ///
    /// Credentials are not passed to the store, so whatever registration is
    /// already stored for the caller survives.
    pub async fn refresh(
        &self,
        caller_key: &str,
        tokens: &OAuthTokens,
        credentials: &OAuthCredentials,
    ) -> Result<TokenGrant> {
        let result = self
            .endpoint
            .refresh_grant(&tokens.refresh_token, credentials)
            .await;
        metrics::record_token_request(Grant::RefreshToken, metrics::outcome_label(&result));
        let tokens = result?;
        info!(caller_key, "token refresh succeeded");

        self.persist(Grant::RefreshToken, caller_key, tokens, None)
            .await
    }

    /// Stored credentials when both halves are present, else the defaults.
    pub fn resolve_credentials(&self, stored: Option<&OAuthCredentials>) -> OAuthCredentials {
        match stored {
            Some(creds) if creds.is_complete() => creds.clone(),
            _ => self.default_credentials.clone(),
        }
    }

    /// Decorator that authenticates requests for `caller_key`.
    pub fn apply_auth(self: &Arc<Self>, caller_key: impl Into<String>) -> AuthDecorator {
        AuthDecorator::new(self.clone(), caller_key)
    }

    /// Decorator for the configured default caller key.
    pub fn apply_default_auth(self: &Arc<Self>) -> AuthDecorator {
        self.apply_auth(self.default_caller_key.clone())
    }

    /// Live access token for `caller_key`, refreshing it first if it is inside
    /// the refresh window.
    pub async fn access_token(&self, caller_key: &str) -> Result<String> {
        let entry = self.load_entry(caller_key).await?;
        if !self.needs_refresh(entry.expires_at) {
            return usable_token(caller_key, entry.tokens.access_token);
        }

        let tokens = match self.refresh_mode {
            RefreshMode::Independent => self.refresh_entry(caller_key, entry).await?,
            RefreshMode::SingleFlight => {
                let slot = self.refresh_slot(caller_key);
                let _guard = slot.lock.lock().await;

                let entry = self.load_entry(caller_key).await?;
                if !self.needs_refresh(entry.expires_at) {
                    debug!(caller_key, "pair refreshed by another task");
                    return usable_token(caller_key, entry.tokens.access_token);
                }
                self.refresh_entry(caller_key, entry).await?
            }
        };

        usable_token(caller_key, tokens.access_token)
    }

    async fn load_entry(&self, caller_key: &str) -> Result<StoredEntry> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("no token store configured for {caller_key}")))?;
        store.load(caller_key).await
    }

    async fn refresh_entry(&self, caller_key: &str, entry: StoredEntry) -> Result<OAuthTokens> {
        debug!(caller_key, expires_at = %entry.expires_at, "pair inside refresh window");
        let credentials = self.resolve_credentials(entry.credentials.as_ref());
        let grant = self.refresh(caller_key, &entry.tokens, &credentials).await?;
        Ok(grant.tokens)
    }

    fn needs_refresh(&self, expires_at: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        match chrono::Duration::from_std(self.refresh_skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
        {
            Some(horizon) => horizon >= expires_at,
            None => true,
        }
    }

    fn refresh_slot<'a>(&'a self, caller_key: &'a str) -> RefreshSlot<'a> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(caller_key.to_string()).or_default().clone();
        RefreshSlot {
            locks: &self.refresh_locks,
            caller_key,
            lock,
        }
    }

    async fn persist(
        &self,
        grant: Grant,
        caller_key: &str,
        tokens: OAuthTokens,
        credentials: Option<OAuthCredentials>,
    ) -> Result<TokenGrant> {
        let expires_at = tokens.expires_at_from(self.clock.now())?;

        let Some(store) = self.store.as_ref() else {
            debug!(caller_key, "no token store configured, pair not persisted");
            return Ok(TokenGrant {
                tokens,
                expires_at,
                persisted: false,
            });
        };

        let persisted = match store
            .save(caller_key, tokens.clone(), credentials, expires_at)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                metrics::record_persist_failure(grant);
                match self.persist_policy {
                    PersistPolicy::Strict => return Err(e),
                    PersistPolicy::BestEffort => {
                        warn!(caller_key, grant = grant.as_str(), error = %e, "failed to persist token pair");
                        false
                    }
                }
            }
        };

        Ok(TokenGrant {
            tokens,
            expires_at,
            persisted,
        })
    }
}

type RefreshLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// A caller key's single-flight lock, checked out of the registry.
///
/// The registry entry is removed when the last slot for the key drops, so the
/// map only holds keys with a refresh in progress. Clones are only taken under
/// the registry mutex, which makes the strong count check race-free.
struct RefreshSlot<'a> {
    locks: &'a RefreshLocks,
    caller_key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for RefreshSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Ours plus the registry's
        let idle = Arc::strong_count(&self.lock) == 2;
        if idle
            && locks
                .get(self.caller_key)
                .is_some_and(|l| Arc::ptr_eq(l, &self.lock))
        {
            locks.remove(self.caller_key);
        }
    }
}

fn usable_token(caller_key: &str, access_token: String) -> Result<String> {
    if access_token.is_empty() {
        return Err(Error::MissingAccessToken(caller_key.to_string()));
    }
    Ok(access_token)
}

pub struct OAuthClientBuilder {
    default_credentials: OAuthCredentials,
    store: Option<Arc<dyn TokenStore>>,
    http_client: Option<reqwest::Client>,
    token_endpoint: String,
    timeout: Duration,
    api_host: String,
    default_caller_key: String,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    refresh_mode: RefreshMode,
    persist_policy: PersistPolicy,
}

impl OAuthClientBuilder {
    fn new(default_credentials: OAuthCredentials) -> Self {
        Self {
            default_caller_key: default_credentials.caller_key.clone(),
            default_credentials,
            store: None,
            http_client: None,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            api_host: API_HOST.to_string(),
            clock: Arc::new(SystemClock),
            refresh_skew: Duration::ZERO,
            refresh_mode: RefreshMode::default(),
            persist_policy: PersistPolicy::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    /// Per-request timeout for token endpoint calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn default_caller_key(mut self, caller_key: impl Into<String>) -> Self {
        self.default_caller_key = caller_key.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    pub fn persist_policy(mut self, policy: PersistPolicy) -> Self {
        self.persist_policy = policy;
        self
    }

    pub fn build(self) -> OAuthClient {
        let endpoint = TokenEndpoint::new(self.http_client.unwrap_or_default())
            .with_url(self.token_endpoint)
            .with_timeout(self.timeout);

        info!(
            api_host = %self.api_host,
            token_endpoint = endpoint.url(),
            store = self.store.is_some(),
            refresh_mode = ?self.refresh_mode,
            persist_policy = ?self.persist_policy,
            "oauth client configured"
        );

        OAuthClient {
            default_credentials: self.default_credentials,
            store: self.store,
            endpoint,
            api_host: self.api_host,
            default_caller_key: self.default_caller_key,
            clock: self.clock,
            refresh_skew: self.refresh_skew,
            refresh_mode: self.refresh_mode,
            persist_policy: self.persist_policy,
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }
}
